//! Progress snapshots and the worker -> consumer progress pipeline.
//!
//! The worker produces [`ImportProgress`] snapshots through a [`ProgressSender`].
//! Intermediate snapshots are best-effort: when the queue is full the sender waits
//! a short moment and then drops the snapshot rather than stalling the import.
//! Only [`ProgressSender::send_final`] waits for room, because the last snapshot
//! is the one the user keeps looking at once the batch is over.
//!
//! The consumer never trusts a snapshot blindly. [`validate`] checks it against
//! itself and against the last accepted snapshot before the controller applies it.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tracing::debug;

use super::models::{ImportError, ImportJob, ImportResult};

/// Maximum allowed distance between a snapshot's percentage and the value
/// recomputed from its counts.
pub const PERCENTAGE_TOLERANCE: f64 = 1.0;

/// Slack for float rounding on top of [`PERCENTAGE_TOLERANCE`].
const FLOAT_EPSILON: f64 = 1e-9;

/// Point-in-time view of a running batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportProgress {
    pub current_file: String,
    pub total_files: usize,
    pub processed_files: usize,
    pub percentage: f64,
    pub errors: Vec<ImportError>,
    pub waiting_for_password: bool,
    pub password_file: Option<String>,
    pub start_time: DateTime<Utc>,
    pub elapsed: Duration,
}

impl ImportProgress {
    /// Empty snapshot for a batch of `total_files` jobs that started at `start_time`.
    pub fn initial(total_files: usize, start_time: DateTime<Utc>) -> Self {
        Self {
            current_file: String::new(),
            total_files,
            processed_files: 0,
            percentage: 0.0,
            errors: Vec::new(),
            waiting_for_password: false,
            password_file: None,
            start_time,
            elapsed: Duration::ZERO,
        }
    }

    /// Percentage implied by the processed and total counts.
    pub fn expected_percentage(processed: usize, total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        if processed >= total {
            return 100.0;
        }
        processed as f64 / total as f64 * 100.0
    }

    pub fn is_finished(&self) -> bool {
        self.total_files > 0 && self.processed_files == self.total_files
    }
}

/// Why a snapshot was dropped instead of applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProgressRejection {
    #[error("total file count must be positive")]
    NoFiles,
    #[error("processed count {processed} exceeds total {total}")]
    ProcessedExceedsTotal { processed: usize, total: usize },
    #[error("percentage {0} is outside 0..=100")]
    PercentageOutOfRange(f64),
    #[error("percentage {actual:.2} deviates from expected {expected:.2}")]
    PercentageMismatch { actual: f64, expected: f64 },
    #[error("total file count changed from {previous} to {current} mid-batch")]
    TotalChanged { previous: usize, current: usize },
    #[error("processed count went backwards from {previous} to {current}")]
    ProcessedDecreased { previous: usize, current: usize },
}

/// Check a snapshot for internal consistency and against the last accepted one.
///
/// Counts are unsigned, so the "negative processed count" case cannot be
/// represented and needs no check.
pub fn validate(
    progress: &ImportProgress,
    previous: Option<&ImportProgress>,
) -> Result<(), ProgressRejection> {
    if progress.total_files == 0 {
        return Err(ProgressRejection::NoFiles);
    }

    if progress.processed_files > progress.total_files {
        return Err(ProgressRejection::ProcessedExceedsTotal {
            processed: progress.processed_files,
            total: progress.total_files,
        });
    }

    if !(0.0..=100.0).contains(&progress.percentage) {
        return Err(ProgressRejection::PercentageOutOfRange(progress.percentage));
    }

    let expected =
        ImportProgress::expected_percentage(progress.processed_files, progress.total_files);
    if (progress.percentage - expected).abs() > PERCENTAGE_TOLERANCE + FLOAT_EPSILON {
        return Err(ProgressRejection::PercentageMismatch {
            actual: progress.percentage,
            expected,
        });
    }

    if let Some(previous) = previous {
        if previous.total_files != progress.total_files {
            return Err(ProgressRejection::TotalChanged {
                previous: previous.total_files,
                current: progress.total_files,
            });
        }

        // Dropping back to zero is an explicit reset and always allowed.
        if progress.processed_files != 0 && progress.processed_files < previous.processed_files {
            return Err(ProgressRejection::ProcessedDecreased {
                previous: previous.processed_files,
                current: progress.processed_files,
            });
        }
    }

    Ok(())
}

/// Result of a timed poll on one of the worker queues.
#[derive(Debug, PartialEq)]
pub enum Polled<T> {
    Item(T),
    Timeout,
    Closed,
}

/// Create a bounded progress pipeline.
pub fn progress_channel(
    capacity: usize,
    send_timeout: Duration,
) -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ProgressSender { tx, send_timeout }, ProgressReceiver { rx })
}

/// Worker side of the progress pipeline.
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ImportProgress>,
    send_timeout: Duration,
}

impl ProgressSender {
    /// Best-effort delivery. Returns `false` if the snapshot was dropped.
    pub async fn send(&self, progress: ImportProgress) -> bool {
        match self.tx.try_send(progress) {
            Ok(()) => true,
            Err(TrySendError::Full(progress)) => {
                match self.tx.send_timeout(progress, self.send_timeout).await {
                    Ok(()) => true,
                    Err(SendTimeoutError::Timeout(p)) => {
                        debug!(processed = p.processed_files, "Progress queue full, dropping snapshot");
                        false
                    }
                    Err(SendTimeoutError::Closed(_)) => false,
                }
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Deliver the last snapshot of a batch, waiting for room if needed.
    pub async fn send_final(&self, progress: ImportProgress) -> bool {
        self.tx.send(progress).await.is_ok()
    }
}

/// Consumer side of the progress pipeline.
pub struct ProgressReceiver {
    rx: mpsc::Receiver<ImportProgress>,
}

impl ProgressReceiver {
    /// Wait up to `timeout` for the next snapshot.
    pub async fn poll(&mut self, timeout: Duration) -> Polled<ImportProgress> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(progress)) => Polled::Item(progress),
            Ok(None) => Polled::Closed,
            Err(_) => Polled::Timeout,
        }
    }
}

/// Builds consistent snapshots for a worker as it walks its job list.
pub struct ProgressReporter {
    sender: ProgressSender,
    total: usize,
    processed: usize,
    current_file: String,
    errors: Vec<ImportError>,
    password_file: Option<String>,
    start_time: DateTime<Utc>,
    clock: Instant,
}

impl ProgressReporter {
    pub fn new(sender: ProgressSender, total: usize) -> Self {
        Self {
            sender,
            total,
            processed: 0,
            current_file: String::new(),
            errors: Vec::new(),
            password_file: None,
            start_time: Utc::now(),
            clock: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> ImportProgress {
        ImportProgress {
            current_file: self.current_file.clone(),
            total_files: self.total,
            processed_files: self.processed,
            percentage: ImportProgress::expected_percentage(self.processed, self.total),
            errors: self.errors.clone(),
            waiting_for_password: self.password_file.is_some(),
            password_file: self.password_file.clone(),
            start_time: self.start_time,
            elapsed: self.clock.elapsed(),
        }
    }

    pub async fn file_started(&mut self, job: &ImportJob) {
        self.current_file = job.file_name();
        self.password_file = None;
        self.sender.send(self.snapshot()).await;
    }

    pub async fn awaiting_password(&mut self, job: &ImportJob) {
        self.password_file = Some(job.file_name());
        self.sender.send(self.snapshot()).await;
    }

    pub async fn file_finished(&mut self, result: &ImportResult) {
        self.processed = (self.processed + 1).min(self.total);
        self.password_file = None;
        self.errors.extend(result.as_error());
        self.sender.send(self.snapshot()).await;
    }

    /// Send the closing snapshot of the batch.
    pub async fn finish(&mut self) {
        self.password_file = None;
        self.current_file.clear();
        self.sender.send_final(self.snapshot()).await;
    }
}
