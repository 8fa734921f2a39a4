//! Bounded worker pool owning the in-flight task set and the failed ledger.
//!
//! The pool enforces at-most-one-active-task-per-item, sizes its concurrency
//! to the host's logical cores, and multicasts every state transition over a
//! broadcast channel. Per-item events are strictly ordered because one
//! worker owns one item for the duration of its task.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, broadcast};
use tracing::{debug, warn};

use crate::catalog::RemoteItem;
use crate::error::DownloadError;
use crate::fetcher::Progress;
use crate::library::LocalPlaylist;
use crate::task::{DownloadTask, TaskOutcome};

/// Fallback worker count when the host's parallelism cannot be queried.
const DEFAULT_WORKERS: usize = 4;

/// Capacity of the status broadcast channel. Lagging subscribers lose the
/// oldest events, mirroring a drop-oldest shared flow.
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle state of one download job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker.
    Queued,
    /// Transfer in progress.
    Downloading(Progress),
    /// Downloaded, finalized and registered. Terminal.
    Completed,
    /// Failed with a user-facing message. Terminal, retained in the ledger.
    Failed(String),
    /// Cancelled by request. Terminal, retained nowhere.
    Cancelled,
}

impl JobState {
    /// Whether this state ends the job's lifecycle.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "Queued"),
            Self::Downloading(progress) => write!(f, "Downloading ({}%)", progress.percent),
            Self::Completed => write!(f, "Completed"),
            Self::Failed(message) => write!(f, "Failed: {message}"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// One state transition, multicast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Item the transition belongs to.
    pub item_id: String,
    /// The state entered.
    pub state: JobState,
}

/// Display snapshot of a non-terminal job. Title and thumbnail are captured
/// at enqueue time and never re-fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadingJob {
    /// Item identifier.
    pub item_id: String,
    /// Item title at enqueue time.
    pub title: String,
    /// Thumbnail URL at enqueue time.
    pub thumbnail_url: String,
    /// Current state.
    pub state: JobState,
}

/// A failed job retained in the ledger for user-triggered retry.
#[derive(Debug, Clone)]
pub struct FailedJob {
    /// The item that failed.
    pub item: RemoteItem,
    /// Playlists requested at enqueue time, reused on retry.
    pub playlists: Vec<LocalPlaylist>,
    /// What went wrong.
    pub error: DownloadError,
}

struct ActiveEntry {
    item: RemoteItem,
    playlists: Vec<LocalPlaylist>,
    state: JobState,
    cancel: crate::fetcher::CancelToken,
}

#[derive(Default)]
struct PoolState {
    active: HashMap<String, ActiveEntry>,
    failed: HashMap<String, FailedJob>,
}

/// Bounded executor for download tasks.
pub struct WorkerPool {
    workers: usize,
    semaphore: Arc<Semaphore>,
    state: Arc<Mutex<PoolState>>,
    events: broadcast::Sender<StatusEvent>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    /// Create a pool sized to the host's logical core count.
    #[must_use]
    pub fn new() -> Self {
        Self::with_workers(default_worker_count())
    }

    /// Create a pool with an explicit worker count (clamped to at least 1).
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        let workers = workers.max(1);
        let (events, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            workers,
            semaphore: Arc::new(Semaphore::new(workers)),
            state: Arc::new(Mutex::new(PoolState::default())),
            events,
        }
    }

    /// Number of workers in the pool.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Subscribe to status transitions. Only future transitions are
    /// delivered; there is no replay.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Submit a task for execution.
    ///
    /// Returns `false` without scheduling anything if a non-terminal task
    /// for the same item already exists, or if the item sits in the failed
    /// ledger awaiting an explicit retry.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, task: DownloadTask) -> bool {
        let item_id = task.item().id.clone();

        {
            let mut state = lock(&self.state);
            if state.active.contains_key(&item_id) {
                debug!("submit rejected: {item_id} already has a non-terminal task");
                return false;
            }
            if state.failed.contains_key(&item_id) {
                debug!("submit rejected: {item_id} is in the failed ledger awaiting retry");
                return false;
            }
            state.active.insert(
                item_id.clone(),
                ActiveEntry {
                    item: task.item().clone(),
                    playlists: task.playlists().to_vec(),
                    state: JobState::Queued,
                    cancel: task.cancel_token().clone(),
                },
            );
        }
        self.emit(&item_id, JobState::Queued);

        let semaphore = Arc::clone(&self.semaphore);
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                // The pool was closed; nothing to do.
                return;
            };

            if task.cancel_token().is_cancelled() {
                // Cancelled while pending: `cancel` already removed the
                // entry and emitted the event. Zero bytes were written.
                lock(&state).active.remove(&item_id);
                return;
            }

            if !begin(&state, &events, &item_id) {
                return;
            }

            let progress_state = Arc::clone(&state);
            let progress_events = events.clone();
            let progress_id = item_id.clone();
            let on_progress = move |progress: Progress| {
                update_progress(&progress_state, &progress_events, &progress_id, progress);
            };

            let outcome = task.run(&on_progress).await;
            complete(&state, &events, &item_id, &task, outcome);
        });

        true
    }

    /// Cancel the task for `item_id`, if any.
    ///
    /// A task still waiting in the queue is removed synchronously with zero
    /// bytes written; a running task observes the flag at its next chunk
    /// boundary. Returns `false` if the item has no non-terminal task.
    pub fn cancel(&self, item_id: &str) -> bool {
        let pending = {
            let mut state = lock(&self.state);
            let Some(entry) = state.active.get(item_id) else {
                debug!("cancel: {item_id} has no active task");
                return false;
            };
            entry.cancel.cancel();

            let pending = matches!(entry.state, JobState::Queued);
            if pending {
                state.active.remove(item_id);
            }
            pending
        };

        if pending {
            self.emit(item_id, JobState::Cancelled);
        }
        true
    }

    /// Snapshot of all non-terminal jobs, ordered by item id.
    #[must_use]
    pub fn active_jobs(&self) -> Vec<DownloadingJob> {
        let state = lock(&self.state);
        let mut jobs: Vec<_> = state
            .active
            .iter()
            .map(|(item_id, entry)| DownloadingJob {
                item_id: item_id.clone(),
                title: entry.item.title.clone(),
                thumbnail_url: entry.item.thumbnail_url.clone(),
                state: entry.state.clone(),
            })
            .collect();
        jobs.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        jobs
    }

    /// Snapshot of the failed ledger, ordered by item id.
    #[must_use]
    pub fn failed_jobs(&self) -> Vec<FailedJob> {
        let state = lock(&self.state);
        let mut jobs: Vec<_> = state.failed.values().cloned().collect();
        jobs.sort_by(|a, b| a.item.id.cmp(&b.item.id));
        jobs
    }

    /// Point-in-time state for `item_id`: the live state of a non-terminal
    /// task, or the retained error of a ledger entry.
    #[must_use]
    pub fn job_state(&self, item_id: &str) -> Option<JobState> {
        let state = lock(&self.state);
        if let Some(entry) = state.active.get(item_id) {
            return Some(entry.state.clone());
        }
        state
            .failed
            .get(item_id)
            .map(|failed| JobState::Failed(failed.error.to_string()))
    }

    /// Remove and return the ledger entry for `item_id`, if present.
    pub(crate) fn take_failed(&self, item_id: &str) -> Option<FailedJob> {
        lock(&self.state).failed.remove(item_id)
    }

    fn emit(&self, item_id: &str, state: JobState) {
        send_event(&self.events, item_id, state);
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism().map_or(DEFAULT_WORKERS, NonZeroUsize::get)
}

fn lock(state: &Mutex<PoolState>) -> std::sync::MutexGuard<'_, PoolState> {
    // A panic while holding this lock is a bug; propagate the poison.
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn send_event(events: &broadcast::Sender<StatusEvent>, item_id: &str, state: JobState) {
    let _ = events.send(StatusEvent {
        item_id: item_id.to_string(),
        state,
    });
}

/// Move a queued entry to `Downloading`. Returns `false` when the entry was
/// removed by a cancellation racing the worker start.
fn begin(
    state: &Mutex<PoolState>,
    events: &broadcast::Sender<StatusEvent>,
    item_id: &str,
) -> bool {
    {
        let mut state = lock(state);
        let Some(entry) = state.active.get_mut(item_id) else {
            return false;
        };
        entry.state = JobState::Downloading(Progress::new(0, 0));
    }
    send_event(events, item_id, JobState::Downloading(Progress::new(0, 0)));
    true
}

fn update_progress(
    state: &Mutex<PoolState>,
    events: &broadcast::Sender<StatusEvent>,
    item_id: &str,
    progress: Progress,
) {
    {
        let mut state = lock(state);
        let Some(entry) = state.active.get_mut(item_id) else {
            return;
        };
        entry.state = JobState::Downloading(progress);
    }
    send_event(events, item_id, JobState::Downloading(progress));
}

/// Retire a finished task: drop it from the in-flight set, ledger a failure,
/// and emit the terminal transition.
fn complete(
    state: &Mutex<PoolState>,
    events: &broadcast::Sender<StatusEvent>,
    item_id: &str,
    task: &DownloadTask,
    outcome: TaskOutcome,
) {
    let final_state = {
        let mut state = lock(state);
        state.active.remove(item_id);

        match outcome {
            TaskOutcome::Completed => JobState::Completed,
            TaskOutcome::Cancelled => JobState::Cancelled,
            TaskOutcome::Failed(error) => {
                warn!("{item_id} failed: {error}");
                let message = error.to_string();
                state.failed.insert(
                    item_id.to_string(),
                    FailedJob {
                        item: task.item().clone(),
                        playlists: task.playlists().to_vec(),
                        error,
                    },
                );
                JobState::Failed(message)
            }
        }
    };
    send_event(events, item_id, final_state);
}
