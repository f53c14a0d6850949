//! The batch-import worker contract.
//!
//! The controller never decrypts anything itself. It hands jobs to a
//! [`BatchImporter`] and talks to the running batch only through
//! [`BatchChannels`].

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::handshake::PasswordPrompter;
use super::models::{ImportJob, ImportResult, ImportSummary};
use super::progress::ProgressSender;

/// Worker half of a batch's queues.
pub struct BatchChannels {
    pub progress: ProgressSender,
    pub passwords: PasswordPrompter,
    /// Fired when the user cancels the whole import.
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait BatchImporter: Send + Sync {
    fn create_import_jobs_from_files(&self, paths: &[PathBuf]) -> Result<Vec<ImportJob>>;

    fn create_import_jobs_from_directory(&self, path: &Path) -> Result<Vec<ImportJob>>;

    fn validate_import_jobs(&self, jobs: &[ImportJob]) -> Result<()>;

    /// Run the whole batch. Must return exactly one result per job, in job order,
    /// and must honour the password handshake: every request sent on
    /// `channels.passwords` is followed by a wait for its answer.
    async fn import_batch(
        &self,
        jobs: Vec<ImportJob>,
        channels: BatchChannels,
    ) -> Vec<ImportResult>;

    fn import_summary(&self, results: &[ImportResult]) -> ImportSummary {
        ImportSummary::from_results(results)
    }

    /// Optional capability for importers that read side-car password files.
    ///
    /// May be `None`: callers must treat a missing capability as "password
    /// files are not supported" rather than an error of the importer.
    fn password_files(&self) -> Option<&dyn PasswordFileControl> {
        None
    }
}

/// Toggle automatic password-file lookup.
pub trait PasswordFileControl: Send + Sync {
    fn set_password_files_enabled(&self, enabled: bool);

    fn password_files_enabled(&self) -> bool;
}
