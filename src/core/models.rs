use std::path::{Path, PathBuf};

use serde::Serialize;

/// One keystore file to import.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImportJob {
    pub source: PathBuf,
    pub target_name: String,
}

impl ImportJob {
    pub fn new(source: impl Into<PathBuf>, target_name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target_name: target_name.into(),
        }
    }

    /// Build a job whose target name is the file stem of `source`.
    pub fn from_path(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let target_name = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());
        Self {
            source,
            target_name,
        }
    }

    /// Short name used in progress snapshots and password prompts.
    pub fn file_name(&self) -> String {
        display_name(&self.source)
    }
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Outcome of a single job. Built once by the worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportResult {
    pub job: ImportJob,
    pub success: bool,
    pub skipped: bool,
    pub error: Option<String>,
}

impl ImportResult {
    pub fn succeeded(job: ImportJob) -> Self {
        Self {
            job,
            success: true,
            skipped: false,
            error: None,
        }
    }

    pub fn failed(job: ImportJob, error: impl Into<String>) -> Self {
        Self {
            job,
            success: false,
            skipped: false,
            error: Some(error.into()),
        }
    }

    pub fn skipped(job: ImportJob, reason: impl Into<String>) -> Self {
        Self {
            job,
            success: false,
            skipped: true,
            error: Some(reason.into()),
        }
    }

    /// The error entry this result contributes to progress and summaries, if any.
    pub fn as_error(&self) -> Option<ImportError> {
        if self.success {
            return None;
        }
        Some(ImportError {
            file: self.job.file_name(),
            error: self
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
            skipped: self.skipped,
        })
    }
}

/// A failed or skipped file as reported to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportError {
    pub file: String,
    pub error: String,
    /// `true` when the user chose to skip the file, `false` when it failed.
    pub skipped: bool,
}

/// Aggregate counts over a result list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub total_files: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<ImportError>,
}

impl ImportSummary {
    pub fn from_results(results: &[ImportResult]) -> Self {
        let mut summary = Self {
            total_files: results.len(),
            ..Self::default()
        };

        for result in results {
            if result.success {
                summary.success_count += 1;
            } else if result.skipped {
                summary.skipped_count += 1;
            } else {
                summary.failed_count += 1;
            }
            summary.errors.extend(result.as_error());
        }

        summary
    }

    pub fn has_failures(&self) -> bool {
        self.failed_count > 0
    }
}
