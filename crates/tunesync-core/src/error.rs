//! Error types for Tunesync core operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Tunesync core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A download task failed. These errors are retained in the failed
    /// ledger and surfaced for user-triggered retry.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// The remote catalog returned an unusable response.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// File system operation failed.
    #[error("File system error at {}: {message}", path.display())]
    FileSystem {
        /// Path where the error occurred.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Writing audio metadata to a finalized file failed.
    #[error("Metadata error at {}: {reason}", path.display())]
    Metadata {
        /// File the tags were written to.
        path: PathBuf,
        /// Error message.
        reason: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure taxonomy for download tasks.
///
/// Each variant maps to one way a task attempt can end up in the failed
/// ledger. Cancellation is deliberately absent: a cancelled task is not a
/// failure and leaves no ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// Remote media metadata could not be obtained after all attempts.
    #[error("failed to resolve media for {item_id} after {attempts} attempts: {reason}")]
    Resolution {
        /// Item whose metadata resolution failed.
        item_id: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last resolution error.
        reason: String,
    },

    /// The resolved content is a live stream and cannot be downloaded.
    #[error("{item_id} is a live stream and cannot be downloaded")]
    LiveStream {
        /// Item identified as a live stream.
        item_id: String,
    },

    /// I/O failure mid-transfer.
    #[error("network failure during transfer: {reason}")]
    Network {
        /// Underlying transfer error.
        reason: String,
    },

    /// Renaming the temporary file to its final name failed. This leaves the
    /// file system in an inconsistent state and requires a manual retry.
    #[error("failed to finalize download: cannot rename {} to {}: {reason}", from.display(), to.display())]
    Rename {
        /// Temporary file path.
        from: PathBuf,
        /// Final media file path.
        to: PathBuf,
        /// Rename error message.
        reason: String,
    },

    /// Registering the completed item with the media library failed.
    #[error("failed to register {item_id} in the media library: {reason}")]
    Registration {
        /// Item that could not be registered.
        item_id: String,
        /// Registration error message.
        reason: String,
    },
}
