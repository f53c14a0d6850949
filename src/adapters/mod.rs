//! Concrete [`BatchImporter`]s and the per-job loop they share.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::core::handshake::{PasswordPrompter, PasswordRequest, PasswordResponse};
use crate::core::importer::{BatchChannels, BatchImporter};
use crate::core::models::{ImportJob, ImportResult};
use crate::core::progress::ProgressReporter;
use tokio_util::sync::CancellationToken;

pub mod keystore;
pub mod simulated;

pub use keystore::FsImporter;
pub use simulated::SimulatedImporter;

pub const CANCELLED_BY_USER: &str = "import cancelled by user";
pub const SKIPPED_BY_USER: &str = "skipped by user";
pub const PASSWORD_FILE_REJECTED: &str = "password file rejected";
pub const INCORRECT_PASSWORD: &str = "incorrect password";

pub fn create_importer(config: &AppConfig) -> Arc<dyn BatchImporter> {
    if config.simulation {
        info!("Using simulated importer");
        return Arc::new(
            SimulatedImporter::new()
                .protect_all("password")
                .with_delay(Duration::from_millis(300))
                .with_max_attempts(config.max_password_attempts),
        );
    }

    Arc::new(FsImporter::new(config))
}

/// First look at a job, before any password is tried.
pub(crate) enum Preflight {
    /// Nothing to unlock; the job is finished.
    Done(Result<(), String>),
    /// The keystore is encrypted. `stored` is a password found without asking.
    NeedsPassword { stored: Option<String> },
}

pub(crate) enum Unlock {
    Imported,
    WrongPassword(String),
    Failed(String),
}

/// Importer-specific half of a job.
#[async_trait]
pub(crate) trait KeyLoader: Send + Sync {
    async fn preflight(&self, job: &ImportJob) -> Preflight;

    async fn unlock(&self, job: &ImportJob, password: &str) -> Unlock;
}

struct Cancelled;

/// Run `jobs` in order, reporting progress and asking for passwords as needed.
///
/// Returns exactly one result per job. A cancel answer (or cancellation of the
/// batch) marks the current and all remaining jobs as skipped.
pub(crate) async fn run_jobs<L: KeyLoader + ?Sized>(
    loader: &L,
    jobs: Vec<ImportJob>,
    channels: BatchChannels,
    max_attempts: u32,
) -> Vec<ImportResult> {
    let BatchChannels {
        progress,
        mut passwords,
        cancel,
    } = channels;

    let mut reporter = ProgressReporter::new(progress, jobs.len());
    let mut results = Vec::with_capacity(jobs.len());
    let mut cancelled = false;

    for job in jobs {
        if cancelled || cancel.is_cancelled() {
            cancelled = true;
            let result = ImportResult::skipped(job, CANCELLED_BY_USER);
            reporter.file_finished(&result).await;
            results.push(result);
            continue;
        }

        reporter.file_started(&job).await;
        let outcome = import_one(
            loader,
            &job,
            &mut passwords,
            &cancel,
            &mut reporter,
            max_attempts,
        )
        .await;
        let result = match outcome {
            Ok(result) => result,
            Err(Cancelled) => {
                info!(file = %job.file_name(), "Import cancelled");
                cancelled = true;
                ImportResult::skipped(job, CANCELLED_BY_USER)
            }
        };

        let file = result.job.file_name();
        match &result.error {
            None => info!(file = %file, target = %result.job.target_name, "Keystore imported"),
            Some(e) if result.skipped => debug!(file = %file, reason = %e, "Keystore skipped"),
            Some(e) => warn!(file = %file, error = %e, "Keystore import failed"),
        }

        reporter.file_finished(&result).await;
        results.push(result);
    }

    reporter.finish().await;
    results
}

async fn import_one<L: KeyLoader + ?Sized>(
    loader: &L,
    job: &ImportJob,
    passwords: &mut PasswordPrompter,
    cancel: &CancellationToken,
    reporter: &mut ProgressReporter,
    max_attempts: u32,
) -> Result<ImportResult, Cancelled> {
    let stored = match loader.preflight(job).await {
        Preflight::Done(Ok(())) => return Ok(ImportResult::succeeded(job.clone())),
        Preflight::Done(Err(e)) => return Ok(ImportResult::failed(job.clone(), e)),
        Preflight::NeedsPassword { stored } => stored,
    };

    let mut previous_error = None;

    if let Some(password) = stored {
        debug!(file = %job.file_name(), "Trying password file");
        match loader.unlock(job, &password).await {
            Unlock::Imported => return Ok(ImportResult::succeeded(job.clone())),
            Unlock::WrongPassword(_) => {
                previous_error = Some(PASSWORD_FILE_REJECTED.to_string());
            }
            Unlock::Failed(e) => return Ok(ImportResult::failed(job.clone(), e)),
        }
    }

    for attempt in 1..=max_attempts {
        reporter.awaiting_password(job).await;

        let request = PasswordRequest {
            file: job.file_name(),
            attempt,
            retry: previous_error.is_some(),
            previous_error: previous_error.clone(),
        };

        let response = tokio::select! {
            response = passwords.ask(request) => response,
            _ = cancel.cancelled() => PasswordResponse::cancel(),
        };

        if response.cancelled {
            return Err(Cancelled);
        }
        if response.skip {
            return Ok(ImportResult::skipped(job.clone(), SKIPPED_BY_USER));
        }

        match loader.unlock(job, &response.password).await {
            Unlock::Imported => return Ok(ImportResult::succeeded(job.clone())),
            Unlock::WrongPassword(e) => {
                debug!(file = %job.file_name(), attempt, "Password rejected");
                previous_error = Some(e);
            }
            Unlock::Failed(e) => return Ok(ImportResult::failed(job.clone(), e)),
        }
    }

    Ok(ImportResult::failed(
        job.clone(),
        format!("{INCORRECT_PASSWORD} after {max_attempts} attempts"),
    ))
}
