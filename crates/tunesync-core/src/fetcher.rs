//! Streaming media fetcher with chunked progress and cooperative cancellation.
//!
//! This module downloads a single remote resource to a local file:
//! - The response body is streamed to disk chunk by chunk
//! - Progress is reported only when the integer percentage strictly increases
//! - A [`CancelToken`] is checked between chunks; cancellation deletes the
//!   partial file and is reported as an outcome, never as an error

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{DownloadError, Result};

/// Cooperative cancellation token threaded through every I/O call.
///
/// Cancellation is not preemptive: a running transfer observes the token at
/// the next chunk boundary, so cancellation latency is bounded by the
/// latency of one chunk.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new, non-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Transfer progress for one download attempt.
///
/// `percent` is `floor(bytes_transferred / total_bytes * 100)`, clamped to
/// 100. Within a single attempt it is monotonically non-decreasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Completed percentage, 0 to 100 inclusive.
    pub percent: u8,
    /// Bytes written so far.
    pub bytes_transferred: u64,
    /// Expected total size in bytes.
    pub total_bytes: u64,
}

impl Progress {
    /// Compute progress from transferred and total byte counts.
    #[must_use]
    pub const fn new(bytes_transferred: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes == 0 {
            0
        } else {
            let percent = bytes_transferred.saturating_mul(100) / total_bytes;
            if percent > 100 { 100 } else { percent as u8 }
        };
        Self {
            percent,
            bytes_transferred,
            total_bytes,
        }
    }

    /// Progress representing a finished transfer of `total_bytes`.
    #[must_use]
    pub const fn completed(total_bytes: u64) -> Self {
        Self {
            percent: 100,
            bytes_transferred: total_bytes,
            total_bytes,
        }
    }

    /// Whether the transfer has reached 100%.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.percent >= 100
    }

    /// Bytes transferred, in megabytes.
    #[must_use]
    pub fn transferred_megabytes(&self) -> f64 {
        self.bytes_transferred as f64 / 1_000_000.0
    }

    /// Total size, in megabytes.
    #[must_use]
    pub fn total_megabytes(&self) -> f64 {
        self.total_bytes as f64 / 1_000_000.0
    }
}

/// Progress callback invoked on strict percentage increases.
pub type ProgressFn = dyn Fn(Progress) + Send + Sync;

/// How a fetch ended when no error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The transfer finished and the destination file is complete.
    Completed {
        /// Number of bytes written.
        bytes: u64,
    },
    /// The transfer was cancelled; the partial destination file was deleted.
    Cancelled,
}

/// Fetches a single remote resource to a local file.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Stream `source_url` to `destination`.
    ///
    /// `on_progress` is invoked whenever the completed percentage strictly
    /// increases. `cancel` is observed between chunks; on cancellation the
    /// partial destination file is removed and `Ok(FetchOutcome::Cancelled)`
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the request or the transfer fails; any partially
    /// written destination file is removed first.
    async fn fetch(
        &self,
        source_url: &str,
        destination: &Path,
        on_progress: &ProgressFn,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome>;
}

/// HTTP implementation of [`MediaFetcher`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpMediaFetcher {
    http: reqwest::Client,
}

impl HttpMediaFetcher {
    /// Create a fetcher with a default HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Create a fetcher reusing an existing HTTP client.
    #[must_use]
    pub const fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Default for HttpMediaFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(
        &self,
        source_url: &str,
        destination: &Path,
        on_progress: &ProgressFn,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome> {
        let response = self
            .http
            .get(source_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| DownloadError::Network {
                reason: e.to_string(),
            })?;

        let total_bytes = response.content_length();
        debug!(
            "fetching {source_url} ({} bytes) to {}",
            total_bytes.map_or_else(|| "unknown".to_string(), |t| t.to_string()),
            destination.display()
        );

        write_stream(
            response.bytes_stream(),
            total_bytes,
            destination,
            on_progress,
            cancel,
        )
        .await
    }
}

/// Stream chunks to `destination`, enforcing the progress and cancellation
/// contracts. Shared by the HTTP fetcher and exercised directly in tests.
pub(crate) async fn write_stream<S, E>(
    stream: S,
    total_bytes: Option<u64>,
    destination: &Path,
    on_progress: &ProgressFn,
    cancel: &CancelToken,
) -> Result<FetchOutcome>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send,
    E: std::fmt::Display,
{
    let mut stream = Box::pin(stream);
    let mut file = File::create(destination).await?;
    let mut written: u64 = 0;
    let mut last_percent: u8 = 0;

    while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            drop(file);
            remove_partial(destination).await;
            debug!("transfer cancelled at {written} bytes, partial file removed");
            return Ok(FetchOutcome::Cancelled);
        }

        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                remove_partial(destination).await;
                return Err(DownloadError::Network {
                    reason: e.to_string(),
                }
                .into());
            }
        };

        if let Err(e) = file.write_all(&chunk).await {
            drop(file);
            remove_partial(destination).await;
            return Err(DownloadError::Network {
                reason: e.to_string(),
            }
            .into());
        }
        written += chunk.len() as u64;

        if let Some(total) = total_bytes
            && total > 0
        {
            let progress = Progress::new(written, total);
            if progress.percent > last_percent {
                last_percent = progress.percent;
                on_progress(progress);
            }
        }
    }

    if let Err(e) = file.flush().await {
        drop(file);
        remove_partial(destination).await;
        return Err(DownloadError::Network {
            reason: e.to_string(),
        }
        .into());
    }
    drop(file);

    if let Some(total) = total_bytes
        && written != total
    {
        remove_partial(destination).await;
        return Err(DownloadError::Network {
            reason: format!("transfer truncated: {written} of {total} bytes received"),
        }
        .into());
    }

    Ok(FetchOutcome::Completed { bytes: written })
}

/// Best-effort removal of a partially written destination file.
async fn remove_partial(destination: &Path) {
    if let Err(e) = tokio::fs::remove_file(destination).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(
            "failed to remove partial file {}: {e}",
            destination.display()
        );
    }
}
