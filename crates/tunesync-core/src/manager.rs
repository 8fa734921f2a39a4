//! Download manager facade.
//!
//! The single entry point for the download engine: enqueue, cancel, retry,
//! point-in-time queries and the multicast status stream. Collaborators are
//! injected explicitly; there is no global state.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::catalog::{RemoteCatalog, RemoteItem};
use crate::error::Result;
use crate::fetcher::MediaFetcher;
use crate::library::{LocalPlaylist, MediaLibrary};
use crate::pool::{DownloadingJob, FailedJob, JobState, StatusEvent, WorkerPool};
use crate::storage::MediaStorage;
use crate::task::DownloadTask;

/// Facade over the worker pool and the download collaborators.
///
/// All operations are safe to call concurrently from multiple callers.
/// `enqueue` and `retry` must be called from within a Tokio runtime.
pub struct DownloadManager {
    pool: WorkerPool,
    catalog: Arc<dyn RemoteCatalog>,
    fetcher: Arc<dyn MediaFetcher>,
    library: Arc<dyn MediaLibrary>,
    storage: Arc<MediaStorage>,
}

impl DownloadManager {
    /// Create a manager with a pool sized to the host's logical cores.
    ///
    /// Ensures the storage directories exist and purges any partial files
    /// left behind by a previous crash.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage root cannot be prepared.
    pub fn new(
        catalog: Arc<dyn RemoteCatalog>,
        fetcher: Arc<dyn MediaFetcher>,
        library: Arc<dyn MediaLibrary>,
        storage: Arc<MediaStorage>,
    ) -> Result<Self> {
        Self::with_pool(catalog, fetcher, library, storage, WorkerPool::new())
    }

    /// Create a manager with an explicitly sized pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage root cannot be prepared.
    pub fn with_pool(
        catalog: Arc<dyn RemoteCatalog>,
        fetcher: Arc<dyn MediaFetcher>,
        library: Arc<dyn MediaLibrary>,
        storage: Arc<MediaStorage>,
        pool: WorkerPool,
    ) -> Result<Self> {
        storage.ensure_directories()?;
        let purged = storage.purge_stale_downloads()?;
        if purged > 0 {
            info!("purged {purged} stale partial downloads");
        }

        Ok(Self {
            pool,
            catalog,
            fetcher,
            library,
            storage,
        })
    }

    /// Enqueue a download for `item`, to be registered with `playlists` on
    /// completion. Fire-and-forget: returns as soon as the task is queued.
    ///
    /// Returns `false` if the item already has a non-terminal task or sits
    /// in the failed ledger. Whether the item is already in the media
    /// library is the caller's concern and is not re-checked here.
    pub fn enqueue(&self, item: RemoteItem, playlists: Vec<LocalPlaylist>) -> bool {
        debug!("enqueue requested for {}", item.id);
        let accepted = self.pool.submit(self.build_task(item, playlists));
        if !accepted {
            debug!("enqueue was a no-op");
        }
        accepted
    }

    /// Cancel the download of `item_id`. Idempotent: cancelling an item
    /// without a non-terminal task returns `false` and changes nothing.
    pub fn cancel(&self, item_id: &str) -> bool {
        self.pool.cancel(item_id)
    }

    /// Retry a failed download.
    ///
    /// Valid only while `item_id` is in the failed ledger; the task is
    /// re-submitted with the originally requested playlists. Returns `false`
    /// otherwise.
    pub fn retry(&self, item_id: &str) -> bool {
        let Some(failed) = self.pool.take_failed(item_id) else {
            warn!("retry rejected: {item_id} is not in the failed ledger");
            return false;
        };

        info!("retrying {item_id}");
        self.pool
            .submit(self.build_task(failed.item, failed.playlists))
    }

    /// Point-in-time state of `item_id`: the live state of a non-terminal
    /// task, the retained error of a failed one, or `None`.
    #[must_use]
    pub fn job_state(&self, item_id: &str) -> Option<JobState> {
        self.pool.job_state(item_id)
    }

    /// All non-terminal jobs with their display metadata as captured at
    /// enqueue time.
    #[must_use]
    pub fn downloading_jobs(&self) -> Vec<DownloadingJob> {
        self.pool.active_jobs()
    }

    /// Snapshot of the failed ledger.
    #[must_use]
    pub fn failed_jobs(&self) -> Vec<FailedJob> {
        self.pool.failed_jobs()
    }

    /// Subscribe to status transitions. New subscribers receive only future
    /// transitions; there is no replay.
    #[must_use]
    pub fn observe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.pool.subscribe()
    }

    /// The storage layout backing this manager.
    #[must_use]
    pub fn storage(&self) -> &MediaStorage {
        &self.storage
    }

    fn build_task(&self, item: RemoteItem, playlists: Vec<LocalPlaylist>) -> DownloadTask {
        DownloadTask::new(
            item,
            playlists,
            Arc::clone(&self.catalog),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.library),
            Arc::clone(&self.storage),
        )
    }
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("workers", &self.pool.workers())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MockRemoteCatalog, ResolvedMedia};
    use crate::error::Error;
    use crate::fetcher::{CancelToken, FetchOutcome, Progress, ProgressFn};
    use crate::library::MockMediaLibrary;
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    struct InstantFetcher;

    #[async_trait]
    impl MediaFetcher for InstantFetcher {
        async fn fetch(
            &self,
            _source_url: &str,
            destination: &Path,
            on_progress: &ProgressFn,
            cancel: &CancelToken,
        ) -> crate::error::Result<FetchOutcome> {
            if cancel.is_cancelled() {
                return Ok(FetchOutcome::Cancelled);
            }
            std::fs::write(destination, b"data")?;
            on_progress(Progress::completed(4));
            Ok(FetchOutcome::Completed { bytes: 4 })
        }
    }

    fn item(id: &str) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            title: format!("Title {id}"),
            author: "Author".to_string(),
            duration_millis: 1000,
            description: String::new(),
            thumbnail_url: format!("https://img.test/{id}.jpeg"),
        }
    }

    fn manager_with(
        dir: &TempDir,
        catalog: MockRemoteCatalog,
        library: MockMediaLibrary,
    ) -> DownloadManager {
        DownloadManager::with_pool(
            Arc::new(catalog),
            Arc::new(InstantFetcher),
            Arc::new(library),
            Arc::new(MediaStorage::new(dir.path())),
            WorkerPool::with_workers(2),
        )
        .unwrap()
    }

    async fn wait_terminal(
        events: &mut broadcast::Receiver<StatusEvent>,
        item_id: &str,
    ) -> JobState {
        timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(event) = events.recv().await
                    && event.item_id == item_id
                    && event.state.is_terminal()
                {
                    return event.state;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {item_id}"))
    }

    #[tokio::test]
    async fn test_construction_purges_stale_partials() {
        let dir = TempDir::new().unwrap();
        let storage = MediaStorage::new(dir.path());
        storage.ensure_directories().unwrap();
        std::fs::write(storage.downloading_file("ghost"), b"stale").unwrap();

        let manager = manager_with(&dir, MockRemoteCatalog::new(), MockMediaLibrary::new());

        assert!(!manager.storage().downloading_file("ghost").exists());
    }

    #[tokio::test]
    async fn test_enqueue_completes_and_clears_job_list() {
        let dir = TempDir::new().unwrap();

        let mut catalog = MockRemoteCatalog::new();
        catalog.expect_resolve_item().returning(|id| {
            Ok(ResolvedMedia {
                media_url: format!("https://cdn.test/{id}"),
                content_length: Some(4),
                live: false,
            })
        });
        let mut library = MockMediaLibrary::new();
        library
            .expect_register_completed_item()
            .times(1)
            .returning(|_, _| Ok(()));

        let manager = manager_with(&dir, catalog, library);
        let mut events = manager.observe_status();

        assert!(manager.enqueue(item("abc"), vec![LocalPlaylist::new(1, "Rock")]));
        let jobs = manager.downloading_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].title, "Title abc");
        assert_eq!(jobs[0].thumbnail_url, "https://img.test/abc.jpeg");

        assert_eq!(wait_terminal(&mut events, "abc").await, JobState::Completed);
        assert!(manager.downloading_jobs().is_empty());
        assert!(manager.job_state("abc").is_none());
    }

    #[tokio::test]
    async fn test_double_enqueue_runs_once() {
        let dir = TempDir::new().unwrap();

        let mut catalog = MockRemoteCatalog::new();
        catalog.expect_resolve_item().times(1).returning(|id| {
            Ok(ResolvedMedia {
                media_url: format!("https://cdn.test/{id}"),
                content_length: Some(4),
                live: false,
            })
        });
        let mut library = MockMediaLibrary::new();
        library
            .expect_register_completed_item()
            .times(1)
            .returning(|_, _| Ok(()));

        let manager = manager_with(&dir, catalog, library);
        let mut events = manager.observe_status();

        assert!(manager.enqueue(item("x"), Vec::new()));
        assert!(!manager.enqueue(item("x"), Vec::new()));

        wait_terminal(&mut events, "x").await;
    }

    #[tokio::test]
    async fn test_retry_requires_a_ledger_entry() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, MockRemoteCatalog::new(), MockMediaLibrary::new());

        assert!(!manager.retry("never-failed"));
    }

    #[tokio::test]
    async fn test_retry_reuses_original_playlists() {
        let dir = TempDir::new().unwrap();

        // Resolution fails on the first attempt set, succeeds afterwards.
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut catalog = MockRemoteCatalog::new();
        catalog.expect_resolve_item().returning(move |id| {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 3 {
                Err(Error::Catalog("down".to_string()))
            } else {
                Ok(ResolvedMedia {
                    media_url: format!("https://cdn.test/{id}"),
                    content_length: Some(4),
                    live: false,
                })
            }
        });

        let mut library = MockMediaLibrary::new();
        library
            .expect_register_completed_item()
            .withf(|_, playlists| playlists == &[LocalPlaylist::new(7, "Jazz")])
            .times(1)
            .returning(|_, _| Ok(()));

        let manager = manager_with(&dir, catalog, library);
        let mut events = manager.observe_status();

        assert!(manager.enqueue(item("r"), vec![LocalPlaylist::new(7, "Jazz")]));
        let state = wait_terminal(&mut events, "r").await;
        assert!(matches!(state, JobState::Failed(_)));
        assert_eq!(manager.failed_jobs().len(), 1);

        // While failed, a plain enqueue is rejected but retry goes through.
        assert!(!manager.enqueue(item("r"), Vec::new()));
        assert!(manager.retry("r"));
        assert_eq!(wait_terminal(&mut events, "r").await, JobState::Completed);
        assert!(manager.failed_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_item_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, MockRemoteCatalog::new(), MockMediaLibrary::new());

        assert!(!manager.cancel("nothing"));
        assert!(!manager.cancel("nothing"));
    }
}
