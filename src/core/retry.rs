//! Retry policy for finished batches.
//!
//! Failures are classified by their error text. Password, permission and
//! timeout failures are worth another attempt; anything else (corrupted files,
//! duplicate targets, ...) will fail the same way again. Skipped files are a
//! user decision and are never reported as retryable.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::RegexSet;
use serde::Serialize;

use super::models::{ImportJob, ImportResult};

/// Pattern order matches [`FailureCategory`] priority.
static RETRYABLE_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)password|passphrase|decrypt",
        r"(?i)permission|access denied|access is denied|not permitted|unauthori[sz]ed",
        r"(?i)timed?[ -]?out|deadline exceeded",
    ])
    .expect("retry patterns are valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureCategory {
    Password,
    Permission,
    Timeout,
    Other,
}

impl FailureCategory {
    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureCategory::Other)
    }
}

/// Classify an error message (case-insensitive substring match).
pub fn classify_error(message: &str) -> FailureCategory {
    match RETRYABLE_PATTERNS.matches(message).iter().next() {
        Some(0) => FailureCategory::Password,
        Some(1) => FailureCategory::Permission,
        Some(2) => FailureCategory::Timeout,
        _ => FailureCategory::Other,
    }
}

pub fn is_retryable(result: &ImportResult) -> bool {
    if result.success || result.skipped {
        return false;
    }
    result
        .error
        .as_deref()
        .is_some_and(|e| classify_error(e).is_retryable())
}

/// Which results a retry should pick up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RetryStrategy {
    Failed,
    Skipped,
    AllNonSuccessful,
    /// Same files as [`RetryStrategy::Failed`], but password files are ignored
    /// so every password is typed in.
    ManualPasswords,
}

impl RetryStrategy {
    pub fn forces_manual_passwords(self) -> bool {
        matches!(self, RetryStrategy::ManualPasswords)
    }

    fn selects(self, result: &ImportResult) -> bool {
        let failed = !result.success && !result.skipped;
        match self {
            RetryStrategy::Failed | RetryStrategy::ManualPasswords => failed,
            RetryStrategy::Skipped => result.skipped,
            RetryStrategy::AllNonSuccessful => !result.success,
        }
    }
}

/// A retry asked for by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryRequest {
    Strategy(RetryStrategy),
    File(PathBuf),
}

impl RetryRequest {
    pub fn forces_manual_passwords(&self) -> bool {
        match self {
            RetryRequest::Strategy(strategy) => strategy.forces_manual_passwords(),
            RetryRequest::File(_) => false,
        }
    }
}

/// Results split by outcome.
#[derive(Debug, Default)]
pub struct ClassifiedResults<'a> {
    pub successful: Vec<&'a ImportResult>,
    pub failed: Vec<&'a ImportResult>,
    pub skipped: Vec<&'a ImportResult>,
    pub retryable: Vec<&'a ImportResult>,
}

pub fn classify(results: &[ImportResult]) -> ClassifiedResults<'_> {
    let mut classified = ClassifiedResults::default();
    for result in results {
        if result.success {
            classified.successful.push(result);
        } else if result.skipped {
            classified.skipped.push(result);
        } else {
            classified.failed.push(result);
            if is_retryable(result) {
                classified.retryable.push(result);
            }
        }
    }
    classified
}

pub fn jobs_for_strategy(results: &[ImportResult], strategy: RetryStrategy) -> Vec<ImportJob> {
    results
        .iter()
        .filter(|r| strategy.selects(r))
        .map(|r| r.job.clone())
        .collect()
}

/// The job behind a single result, looked up by its source path.
pub fn job_for_file(results: &[ImportResult], path: &Path) -> Option<ImportJob> {
    results
        .iter()
        .find(|r| r.job.source == path)
        .map(|r| r.job.clone())
}

/// Resolve a retry request against a result list.
pub fn jobs_for_request(results: &[ImportResult], request: &RetryRequest) -> Vec<ImportJob> {
    match request {
        RetryRequest::Strategy(strategy) => jobs_for_strategy(results, *strategy),
        RetryRequest::File(path) => job_for_file(results, path).into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results() -> Vec<ImportResult> {
        vec![
            ImportResult::succeeded(ImportJob::from_path("/k/ok.json")),
            ImportResult::failed(ImportJob::from_path("/k/pw.json"), "Incorrect Password"),
            ImportResult::failed(ImportJob::from_path("/k/bad.json"), "file corrupted: eof"),
            ImportResult::skipped(ImportJob::from_path("/k/skip.json"), "incorrect password"),
        ]
    }

    #[test]
    fn classifies_error_categories() {
        assert_eq!(classify_error("incorrect password"), FailureCategory::Password);
        assert_eq!(classify_error("Permission denied (os error 13)"), FailureCategory::Permission);
        assert_eq!(classify_error("ACCESS DENIED"), FailureCategory::Permission);
        assert_eq!(classify_error("operation timed out"), FailureCategory::Timeout);
        assert_eq!(classify_error("request timeout"), FailureCategory::Timeout);
        assert_eq!(classify_error("file corrupted"), FailureCategory::Other);
    }

    #[test]
    fn skipped_results_are_never_retryable() {
        let results = results();
        assert!(is_retryable(&results[1]));
        assert!(!is_retryable(&results[2]));
        assert!(!is_retryable(&results[3]));
        assert!(!is_retryable(&results[0]));
    }

    #[test]
    fn classify_splits_by_outcome() {
        let results = results();
        let classified = classify(&results);
        assert_eq!(classified.successful.len(), 1);
        assert_eq!(classified.failed.len(), 2);
        assert_eq!(classified.skipped.len(), 1);
        assert_eq!(classified.retryable.len(), 1);
        assert_eq!(classified.retryable[0].job.target_name, "pw");
    }

    #[test]
    fn strategies_pick_expected_jobs() {
        let results = results();
        let names = |strategy| {
            jobs_for_strategy(&results, strategy)
                .into_iter()
                .map(|j| j.target_name)
                .collect::<Vec<_>>()
        };

        assert_eq!(names(RetryStrategy::Failed), vec!["pw", "bad"]);
        assert_eq!(names(RetryStrategy::ManualPasswords), vec!["pw", "bad"]);
        assert_eq!(names(RetryStrategy::Skipped), vec!["skip"]);
        assert_eq!(names(RetryStrategy::AllNonSuccessful), vec!["pw", "bad", "skip"]);
    }

    #[test]
    fn single_file_retry_is_keyed_by_path() {
        let results = results();
        let request = RetryRequest::File(PathBuf::from("/k/bad.json"));
        let jobs = jobs_for_request(&results, &request);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].source, PathBuf::from("/k/bad.json"));

        assert!(job_for_file(&results, Path::new("/k/missing.json")).is_none());
        assert!(!request.forces_manual_passwords());
        assert!(RetryRequest::Strategy(RetryStrategy::ManualPasswords).forces_manual_passwords());
    }
}
