//! In-memory importer for demos and tests.
//!
//! Nothing is read or written except directory listings. Which files need a
//! password, which fail and how long each job takes are all scripted.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use async_trait::async_trait;

use super::{INCORRECT_PASSWORD, KeyLoader, Preflight, Unlock, run_jobs};
use crate::core::importer::{BatchChannels, BatchImporter, PasswordFileControl};
use crate::core::models::{ImportJob, ImportResult};

pub struct SimulatedImporter {
    protected: HashSet<String>,
    protect_all: bool,
    password: String,
    password_files: HashMap<String, String>,
    password_files_enabled: AtomicBool,
    failures: HashMap<String, String>,
    delay: Duration,
    max_attempts: u32,
}

impl Default for SimulatedImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedImporter {
    pub fn new() -> Self {
        Self {
            protected: HashSet::new(),
            protect_all: false,
            password: String::new(),
            password_files: HashMap::new(),
            password_files_enabled: AtomicBool::new(true),
            failures: HashMap::new(),
            delay: Duration::ZERO,
            max_attempts: 3,
        }
    }

    /// Files (by file name) that only import with `password`.
    pub fn with_protected<I, S>(mut self, files: I, password: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protected.extend(files.into_iter().map(Into::into));
        self.password = password.into();
        self
    }

    /// Every file needs `password`.
    pub fn protect_all(mut self, password: impl Into<String>) -> Self {
        self.protect_all = true;
        self.password = password.into();
        self
    }

    /// Pretend a password file next to `file` contains `password`.
    pub fn with_password_file(mut self, file: impl Into<String>, password: impl Into<String>) -> Self {
        self.password_files.insert(file.into(), password.into());
        self
    }

    /// `file` always fails with `error`.
    pub fn with_failure(mut self, file: impl Into<String>, error: impl Into<String>) -> Self {
        self.failures.insert(file.into(), error.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    fn is_protected(&self, file: &str) -> bool {
        self.protect_all || self.protected.contains(file)
    }
}

#[async_trait]
impl BatchImporter for SimulatedImporter {
    fn create_import_jobs_from_files(&self, paths: &[PathBuf]) -> Result<Vec<ImportJob>> {
        Ok(paths.iter().cloned().map(ImportJob::from_path).collect())
    }

    fn create_import_jobs_from_directory(&self, path: &Path) -> Result<Vec<ImportJob>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(path)
            .with_context(|| format!("Failed to read directory {}", path.display()))?
        {
            let file = entry?.path();
            if file.extension().is_some_and(|ext| ext == "json") {
                files.push(file);
            }
        }
        files.sort();
        Ok(files.into_iter().map(ImportJob::from_path).collect())
    }

    fn validate_import_jobs(&self, jobs: &[ImportJob]) -> Result<()> {
        ensure!(!jobs.is_empty(), "no keystores to import");

        let mut sources = HashSet::new();
        let mut targets = HashSet::new();
        for job in jobs {
            ensure!(
                sources.insert(&job.source) && targets.insert(&job.target_name),
                "duplicate keystore {}",
                job.source.display()
            );
        }
        Ok(())
    }

    async fn import_batch(
        &self,
        jobs: Vec<ImportJob>,
        channels: BatchChannels,
    ) -> Vec<ImportResult> {
        run_jobs(self, jobs, channels, self.max_attempts).await
    }

    fn password_files(&self) -> Option<&dyn PasswordFileControl> {
        Some(self)
    }
}

impl PasswordFileControl for SimulatedImporter {
    fn set_password_files_enabled(&self, enabled: bool) {
        self.password_files_enabled.store(enabled, Ordering::Relaxed);
    }

    fn password_files_enabled(&self) -> bool {
        self.password_files_enabled.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl KeyLoader for SimulatedImporter {
    async fn preflight(&self, job: &ImportJob) -> Preflight {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let file = job.file_name();
        if let Some(error) = self.failures.get(&file) {
            return Preflight::Done(Err(error.clone()));
        }
        if !self.is_protected(&file) {
            return Preflight::Done(Ok(()));
        }

        let stored = if self.password_files_enabled() {
            self.password_files.get(&file).cloned()
        } else {
            None
        };
        Preflight::NeedsPassword { stored }
    }

    async fn unlock(&self, _job: &ImportJob, password: &str) -> Unlock {
        if password == self.password {
            Unlock::Imported
        } else {
            Unlock::WrongPassword(INCORRECT_PASSWORD.to_string())
        }
    }
}
