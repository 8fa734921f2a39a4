//! Tunesync Core Library
//!
//! This crate provides the download/synchronization engine for Tunesync:
//! - Streaming media fetching with chunked progress and cooperative
//!   cancellation
//! - A bounded worker pool running per-item download tasks
//! - A download manager facade with a multicast status stream and a failed
//!   ledger for user-triggered retries
//! - Periodic reconciliation of remote playlists against the local library

pub mod catalog;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod library;
pub mod manager;
pub mod metadata;
pub mod pool;
pub mod storage;
pub mod sync;
pub mod task;

pub use catalog::{
    HttpCatalog, ItemPage, PlaylistPage, RemoteCatalog, RemoteItem, RemotePlaylist, ResolvedMedia,
};
pub use config::AppConfig;
pub use error::{DownloadError, Error, Result};
pub use fetcher::{CancelToken, FetchOutcome, HttpMediaFetcher, MediaFetcher, Progress};
pub use library::{InMemoryMediaLibrary, LocalPlaylist, MediaLibrary};
pub use manager::DownloadManager;
pub use pool::{DownloadingJob, FailedJob, JobState, StatusEvent, WorkerPool};
pub use storage::MediaStorage;
pub use sync::{BindingProvider, PlaylistBind, StaticBindings, SyncHandle, SyncReport, SyncWorker};
pub use task::DownloadTask;
