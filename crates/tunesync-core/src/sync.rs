//! Periodic reconciliation of remote playlists against the local library.
//!
//! Each cycle pages the remote catalog to exhaustion, diffs every bound
//! playlist against the media library, and enqueues the items that are not
//! downloaded yet. A cycle either runs to completion or aborts as a whole;
//! because enqueueing is gated on library membership, re-running a partially
//! completed cycle is safe.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::catalog::{RemoteCatalog, collect_playlist_ids, collect_playlist_items};
use crate::error::Result;
use crate::library::{LocalPlaylist, MediaLibrary};
use crate::manager::DownloadManager;

/// Reference interval between reconciliation cycles.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Association between one remote playlist and the local playlists newly
/// discovered items are routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistBind {
    /// Remote playlist to watch.
    pub remote_playlist_id: String,
    /// Local playlists for items discovered through this binding.
    pub local_playlists: Vec<LocalPlaylist>,
}

impl PlaylistBind {
    /// Create a binding.
    #[must_use]
    pub fn new(remote_playlist_id: impl Into<String>, local_playlists: Vec<LocalPlaylist>) -> Self {
        Self {
            remote_playlist_id: remote_playlist_id.into(),
            local_playlists,
        }
    }
}

/// Source of the current synchronization bindings, read once per cycle.
#[cfg_attr(test, mockall::automock)]
pub trait BindingProvider: Send + Sync {
    /// The bindings to reconcile in this cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the bindings cannot be read; the cycle aborts.
    fn bindings(&self) -> Result<Vec<PlaylistBind>>;
}

/// Fixed set of bindings, typically loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticBindings {
    bindings: Vec<PlaylistBind>,
}

impl StaticBindings {
    /// Wrap a fixed binding list.
    #[must_use]
    pub const fn new(bindings: Vec<PlaylistBind>) -> Self {
        Self { bindings }
    }
}

impl BindingProvider for StaticBindings {
    fn bindings(&self) -> Result<Vec<PlaylistBind>> {
        Ok(self.bindings.clone())
    }
}

/// Outcome of one reconciliation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Remote playlists discovered while paging the catalog.
    pub playlists_scanned: usize,
    /// Bindings skipped because their remote playlist disappeared.
    pub bindings_skipped: usize,
    /// Items seen across all bound playlists.
    pub items_seen: usize,
    /// Items actually enqueued for download.
    pub items_enqueued: usize,
}

/// Commands accepted by a running synchronization worker.
enum SyncCommand {
    /// Run a cycle now, outside the periodic schedule.
    SyncNow,
    /// Stop the worker.
    Shutdown,
}

/// Handle to a spawned synchronization worker.
pub struct SyncHandle {
    commands: mpsc::Sender<SyncCommand>,
    worker: JoinHandle<()>,
}

impl SyncHandle {
    /// Trigger an immediate cycle. Returns `false` if the worker stopped.
    pub async fn trigger(&self) -> bool {
        self.commands.send(SyncCommand::SyncNow).await.is_ok()
    }

    /// Stop the worker and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SyncCommand::Shutdown).await;
        let _ = self.worker.await;
    }
}

/// Periodic job that keeps the local library in step with bound remote
/// playlists.
pub struct SyncWorker {
    catalog: Arc<dyn RemoteCatalog>,
    library: Arc<dyn MediaLibrary>,
    manager: Arc<DownloadManager>,
    bindings: Arc<dyn BindingProvider>,
    interval: Duration,
}

impl SyncWorker {
    /// Create a worker with the reference 15-minute interval.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn RemoteCatalog>,
        library: Arc<dyn MediaLibrary>,
        manager: Arc<DownloadManager>,
        bindings: Arc<dyn BindingProvider>,
    ) -> Self {
        Self {
            catalog,
            library,
            manager,
            bindings,
            interval: DEFAULT_SYNC_INTERVAL,
        }
    }

    /// Override the cycle interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one reconciliation cycle.
    ///
    /// # Errors
    ///
    /// Any failure aborts the entire cycle; nothing is partially committed.
    /// Re-running after an abort is safe because only items absent from the
    /// library are enqueued.
    pub async fn run_cycle(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        let remote_ids: HashSet<String> = collect_playlist_ids(self.catalog.as_ref()).await?;
        report.playlists_scanned = remote_ids.len();

        for bind in self.bindings.bindings()? {
            if !remote_ids.contains(&bind.remote_playlist_id) {
                // The remote playlist disappeared; the binding stays in
                // place and is simply not reconciled.
                debug!(
                    "skipping binding for {}: playlist no longer exists remotely",
                    bind.remote_playlist_id
                );
                report.bindings_skipped += 1;
                continue;
            }

            let items =
                collect_playlist_items(self.catalog.as_ref(), &bind.remote_playlist_id).await?;
            report.items_seen += items.len();

            for item in items {
                if self.library.exists(&item.id).await? {
                    continue;
                }
                if self.manager.enqueue(item, bind.local_playlists.clone()) {
                    report.items_enqueued += 1;
                }
            }
        }

        info!(
            "synchronization cycle: {} playlists, {} items seen, {} enqueued, {} bindings skipped",
            report.playlists_scanned,
            report.items_seen,
            report.items_enqueued,
            report.bindings_skipped
        );
        Ok(report)
    }

    /// Spawn the periodic worker onto its own task.
    ///
    /// The first cycle runs immediately; afterwards one cycle runs per
    /// interval tick or external trigger. A failed cycle is logged and
    /// retried wholesale at the next tick.
    #[must_use]
    pub fn spawn(self) -> SyncHandle {
        let (commands, receiver) = mpsc::channel(8);
        let worker = tokio::spawn(self.run_loop(receiver));
        SyncHandle { commands, worker }
    }

    async fn run_loop(self, mut commands: mpsc::Receiver<SyncCommand>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_and_log().await,
                command = commands.recv() => match command {
                    Some(SyncCommand::SyncNow) => self.run_and_log().await,
                    Some(SyncCommand::Shutdown) | None => {
                        debug!("synchronization worker stopped");
                        break;
                    }
                },
            }
        }
    }

    async fn run_and_log(&self) {
        if let Err(err) = self.run_cycle().await {
            warn!("synchronization cycle aborted: {err}; retrying at the next tick");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ItemPage, MockRemoteCatalog, PlaylistPage, RemoteItem, RemotePlaylist};
    use crate::error::Error;
    use crate::fetcher::{CancelToken, FetchOutcome, MediaFetcher, ProgressFn};
    use crate::library::MockMediaLibrary;
    use crate::pool::WorkerPool;
    use crate::storage::MediaStorage;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    struct NoopFetcher;

    #[async_trait]
    impl MediaFetcher for NoopFetcher {
        async fn fetch(
            &self,
            _source_url: &str,
            destination: &Path,
            _on_progress: &ProgressFn,
            _cancel: &CancelToken,
        ) -> Result<FetchOutcome> {
            std::fs::write(destination, b"data")?;
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

    fn playlist(id: &str) -> RemotePlaylist {
        RemotePlaylist {
            id: id.to_string(),
            title: format!("Playlist {id}"),
            thumbnail_url: String::new(),
            item_count: 0,
        }
    }

    fn single_playlist_catalog(items: Vec<RemoteItem>) -> MockRemoteCatalog {
        let mut catalog = MockRemoteCatalog::new();
        catalog.expect_playlists_page().returning(|_| {
            Ok(PlaylistPage {
                items: vec![playlist("p1")],
                next_page_token: None,
            })
        });
        catalog
            .expect_playlist_items_page()
            .returning(move |_, _| {
                Ok(ItemPage {
                    items: items.clone(),
                    next_page_token: None,
                })
            });
        catalog
    }

    fn manager(dir: &TempDir, library: Arc<MockMediaLibrary>) -> Arc<DownloadManager> {
        // The sync catalog and the task-resolution catalog are the same
        // interface; tasks never run far enough here to need resolution
        // beyond what the mock provides.
        let mut task_catalog = MockRemoteCatalog::new();
        task_catalog
            .expect_resolve_item()
            .returning(|_| Err(Error::Catalog("not under test".to_string())));

        Arc::new(
            DownloadManager::with_pool(
                Arc::new(task_catalog),
                Arc::new(NoopFetcher),
                library,
                Arc::new(MediaStorage::new(dir.path())),
                WorkerPool::with_workers(1),
            )
            .unwrap(),
        )
    }

    fn worker(
        catalog: MockRemoteCatalog,
        library: Arc<MockMediaLibrary>,
        manager: Arc<DownloadManager>,
        binds: Vec<PlaylistBind>,
    ) -> SyncWorker {
        SyncWorker::new(
            Arc::new(catalog),
            library,
            manager,
            Arc::new(StaticBindings::new(binds)),
        )
    }

    #[tokio::test]
    async fn test_cycle_enqueues_missing_items() {
        let dir = TempDir::new().unwrap();

        let mut library = MockMediaLibrary::new();
        library
            .expect_exists()
            .returning(|id| Ok(id == "already-there"));
        let library = Arc::new(library);

        let catalog =
            single_playlist_catalog(vec![item("already-there"), item("new1"), item("new2")]);
        let manager = manager(&dir, Arc::clone(&library));
        let worker = worker(
            catalog,
            library,
            manager,
            vec![PlaylistBind::new("p1", vec![LocalPlaylist::new(1, "Rock")])],
        );

        let report = worker.run_cycle().await.unwrap();

        assert_eq!(report.playlists_scanned, 1);
        assert_eq!(report.items_seen, 3);
        assert_eq!(report.items_enqueued, 2);
        assert_eq!(report.bindings_skipped, 0);
    }

    #[tokio::test]
    async fn test_missing_remote_playlist_is_skipped() {
        let dir = TempDir::new().unwrap();

        let library = Arc::new(MockMediaLibrary::new());
        let catalog = single_playlist_catalog(Vec::new());
        let manager = manager(&dir, Arc::clone(&library));
        let worker = worker(
            catalog,
            library,
            manager,
            vec![
                PlaylistBind::new("p1", Vec::new()),
                PlaylistBind::new("gone", Vec::new()),
            ],
        );

        let report = worker.run_cycle().await.unwrap();

        assert_eq!(report.bindings_skipped, 1);
        assert_eq!(report.items_enqueued, 0);
    }

    #[tokio::test]
    async fn test_catalog_failure_aborts_the_whole_cycle() {
        let dir = TempDir::new().unwrap();

        let mut catalog = MockRemoteCatalog::new();
        catalog
            .expect_playlists_page()
            .returning(|_| Err(Error::Catalog("catalog down".to_string())));

        let library = Arc::new(MockMediaLibrary::new());
        let manager = manager(&dir, Arc::clone(&library));
        let worker = worker(
            catalog,
            library,
            manager,
            vec![PlaylistBind::new("p1", Vec::new())],
        );

        let err = worker.run_cycle().await.unwrap_err();
        assert!(err.to_string().contains("catalog down"));
    }

    #[tokio::test]
    async fn test_second_cycle_is_idempotent_for_non_terminal_items() {
        let dir = TempDir::new().unwrap();

        // Nothing is ever in the library, so dedupe falls to the pool's
        // one-non-terminal-task-per-item invariant.
        let mut library = MockMediaLibrary::new();
        library.expect_exists().returning(|_| Ok(false));
        let library = Arc::new(library);

        let catalog = single_playlist_catalog(vec![item("slow")]);
        let catalog2 = single_playlist_catalog(vec![item("slow")]);

        let manager = manager(&dir, Arc::clone(&library));
        let binds = vec![PlaylistBind::new("p1", Vec::new())];

        let first = worker(
            catalog,
            Arc::clone(&library),
            Arc::clone(&manager),
            binds.clone(),
        );
        let report = first.run_cycle().await.unwrap();
        assert_eq!(report.items_enqueued, 1);

        // The task is still queued (one worker, nothing awaited it), so the
        // second cycle discovers the same item but enqueues nothing.
        let second = worker(catalog2, library, manager, binds);
        let report = second.run_cycle().await.unwrap();
        assert_eq!(report.items_seen, 1);
        assert_eq!(report.items_enqueued, 0);
    }

    #[tokio::test]
    async fn test_spawned_worker_can_be_triggered_and_stopped() {
        let dir = TempDir::new().unwrap();

        let mut library = MockMediaLibrary::new();
        library.expect_exists().returning(|_| Ok(true));
        let library = Arc::new(library);

        let catalog = single_playlist_catalog(vec![item("a")]);
        let manager = manager(&dir, Arc::clone(&library));
        let handle = worker(
            catalog,
            library,
            manager,
            vec![PlaylistBind::new("p1", Vec::new())],
        )
        .spawn();

        assert!(handle.trigger().await);
        handle.shutdown().await;
    }
}
