//! Per-item download task state machine.
//!
//! One task owns one item's lifecycle for one attempt, executed entirely by
//! one worker: metadata resolution, live-stream rejection, media and
//! thumbnail fetch, atomic finalize, tagging, and library registration.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::{RemoteCatalog, RemoteItem, ResolvedMedia};
use crate::error::{DownloadError, Error, Result};
use crate::fetcher::{CancelToken, FetchOutcome, MediaFetcher, Progress, ProgressFn};
use crate::library::{LocalPlaylist, MediaLibrary};
use crate::metadata;
use crate::storage::MediaStorage;

/// Total number of media-resolution attempts before giving up.
const RESOLVE_ATTEMPTS: u32 = 3;

/// How one task attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    /// The item was downloaded, finalized and registered.
    Completed,
    /// The task was cancelled; no partial files remain.
    Cancelled,
    /// The task failed; the error goes to the failed ledger.
    Failed(DownloadError),
}

/// A single item's download attempt and its collaborators.
pub struct DownloadTask {
    item: RemoteItem,
    playlists: Vec<LocalPlaylist>,
    cancel: CancelToken,
    catalog: Arc<dyn RemoteCatalog>,
    fetcher: Arc<dyn MediaFetcher>,
    library: Arc<dyn MediaLibrary>,
    storage: Arc<MediaStorage>,
}

impl DownloadTask {
    /// Create a task for `item`, to be registered with `playlists` once
    /// completed.
    #[must_use]
    pub fn new(
        item: RemoteItem,
        playlists: Vec<LocalPlaylist>,
        catalog: Arc<dyn RemoteCatalog>,
        fetcher: Arc<dyn MediaFetcher>,
        library: Arc<dyn MediaLibrary>,
        storage: Arc<MediaStorage>,
    ) -> Self {
        Self {
            item,
            playlists,
            cancel: CancelToken::new(),
            catalog,
            fetcher,
            library,
            storage,
        }
    }

    /// The item this task downloads.
    #[must_use]
    pub fn item(&self) -> &RemoteItem {
        &self.item
    }

    /// The playlists requested at enqueue time.
    #[must_use]
    pub fn playlists(&self) -> &[LocalPlaylist] {
        &self.playlists
    }

    /// The task's cooperative cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run the attempt to a terminal outcome.
    ///
    /// Never leaves a partial media file behind: cancellation and failure
    /// both discard the in-flight file.
    pub(crate) async fn run(&self, on_progress: &ProgressFn) -> TaskOutcome {
        match self.execute(on_progress).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.storage.discard_partial(&self.item.id);
                TaskOutcome::Failed(into_download_error(err))
            }
        }
    }

    async fn execute(&self, on_progress: &ProgressFn) -> Result<TaskOutcome> {
        let resolved = self.resolve().await?;

        if resolved.live {
            return Err(DownloadError::LiveStream {
                item_id: self.item.id.clone(),
            }
            .into());
        }

        if self.cancel.is_cancelled() {
            debug!("{} cancelled before transfer started", self.item.id);
            return Ok(TaskOutcome::Cancelled);
        }

        match self.fetch_media(&resolved, on_progress).await? {
            FetchOutcome::Cancelled => return Ok(TaskOutcome::Cancelled),
            FetchOutcome::Completed { bytes } => {
                debug!("media transfer for {} complete ({bytes} bytes)", self.item.id);
            }
        }

        // Thumbnail failures do not fail the task; the audio is what counts.
        match self.fetch_thumbnail().await {
            Ok(FetchOutcome::Cancelled) => {
                self.storage.discard_partial(&self.item.id);
                return Ok(TaskOutcome::Cancelled);
            }
            Ok(FetchOutcome::Completed { .. }) => {}
            Err(err) => warn!("thumbnail fetch for {} failed: {err}", self.item.id),
        }

        let media_file = self.storage.finalize(&self.item.id)?;

        if let Err(err) = metadata::write_basic_tags(&media_file, &self.item) {
            warn!("tagging {} failed: {err}", self.item.id);
        }

        self.library
            .register_completed_item(self.item.clone(), self.playlists.clone())
            .await
            .map_err(|err| DownloadError::Registration {
                item_id: self.item.id.clone(),
                reason: err.to_string(),
            })?;

        info!("downloaded {} ({})", self.item.id, self.item.title);
        Ok(TaskOutcome::Completed)
    }

    /// Resolve media metadata, retrying immediately on failure.
    async fn resolve(&self) -> Result<ResolvedMedia> {
        let mut attempt = 1;
        loop {
            match self.catalog.resolve_item(&self.item.id).await {
                Ok(resolved) => return Ok(resolved),
                Err(err) if attempt == RESOLVE_ATTEMPTS => {
                    return Err(DownloadError::Resolution {
                        item_id: self.item.id.clone(),
                        attempts: RESOLVE_ATTEMPTS,
                        reason: err.to_string(),
                    }
                    .into());
                }
                Err(err) => {
                    debug!(
                        "resolution attempt {attempt} for {} failed: {err}",
                        self.item.id
                    );
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_media(
        &self,
        resolved: &ResolvedMedia,
        on_progress: &ProgressFn,
    ) -> Result<FetchOutcome> {
        let destination = self.storage.downloading_file(&self.item.id);
        self.fetcher
            .fetch(&resolved.media_url, &destination, on_progress, &self.cancel)
            .await
    }

    async fn fetch_thumbnail(&self) -> Result<FetchOutcome> {
        let destination = self.storage.thumbnail_file(&self.item.id);
        let no_progress = |_: Progress| {};
        self.fetcher
            .fetch(
                &self.item.thumbnail_url,
                &destination,
                &no_progress,
                &self.cancel,
            )
            .await
    }
}

/// Map an arbitrary error into the ledger taxonomy. Typed download errors
/// pass through; anything else surfaces as a mid-transfer failure.
fn into_download_error(err: Error) -> DownloadError {
    match err {
        Error::Download(download) => download,
        other => DownloadError::Network {
            reason: other.to_string(),
        },
    }
}
