//! Import phase state machine.
//!
//! [`ImportController`] owns the current phase, the file selection, the job and
//! result lists and the consumer half of the batch queues. Every mutation goes
//! through one `RwLock`, and every phase change runs that phase's setup while the
//! write lock is held, so no caller ever observes a half-applied transition.
//!
//! The worker never touches this state. It gets its half of the queues from
//! [`ImportController::process_import_batch`] and talks through them only.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::events::ImportEvent;
use super::handshake::{
    HandshakeError, PasswordRequest, PasswordRequestReceiver, PasswordResponder,
    PasswordResponse, password_channels,
};
use super::importer::{BatchChannels, BatchImporter};
use super::models::{ImportJob, ImportResult, ImportSummary};
use super::phase::ImportPhase;
use super::progress::{self, ImportProgress, Polled, ProgressReceiver, progress_channel};
use super::retry::{self, RetryRequest};
use super::selection::FileSelector;
use crate::config::AppConfig;
use crate::logging::LogThrottle;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid phase transition from {from} to {to}")]
    InvalidTransition { from: ImportPhase, to: ImportPhase },
    #[error("cannot {operation} during {phase}")]
    WrongPhase {
        operation: &'static str,
        phase: ImportPhase,
    },
    #[error("no files or directory selected")]
    NoSelection,
    #[error("failed to create import jobs: {0:#}")]
    JobCreation(#[source] anyhow::Error),
    #[error("import jobs are invalid: {0:#}")]
    JobValidation(#[source] anyhow::Error),
    #[error("password channel unavailable: {0}")]
    ChannelUnavailable(#[from] HandshakeError),
    #[error("no import batch is ready to run")]
    BatchNotReady,
    #[error("nothing to retry")]
    NothingToRetry,
    #[error("no result recorded for {}", .0.display())]
    UnknownFile(PathBuf),
    #[error("importer does not support disabling password files")]
    ManualPasswordsUnsupported,
}

/// Tunables handed to the controller at construction.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub progress_capacity: usize,
    pub progress_poll: Duration,
    pub password_poll: Duration,
    pub progress_send_timeout: Duration,
    pub start_directory: PathBuf,
    pub keystore_extension: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            progress_capacity: 256,
            progress_poll: Duration::from_secs(1),
            password_poll: Duration::from_millis(100),
            progress_send_timeout: Duration::from_millis(50),
            start_directory: PathBuf::from("."),
            keystore_extension: "json".to_string(),
        }
    }
}

impl From<&AppConfig> for ControllerSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            progress_capacity: config.progress_capacity,
            progress_poll: Duration::from_millis(config.progress_poll_ms),
            password_poll: Duration::from_millis(config.password_poll_ms),
            progress_send_timeout: Duration::from_millis(config.progress_send_timeout_ms),
            start_directory: config
                .start_directory
                .clone()
                .unwrap_or_else(|| PathBuf::from(".")),
            keystore_extension: "json".to_string(),
        }
    }
}

/// Data for the password popup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPopup {
    pub file: String,
    pub attempt: u32,
    /// Error from the previous attempt, only set when the request is a retry.
    pub error: Option<String>,
}

/// Progress bar model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressDisplay {
    pub total: usize,
    pub current: usize,
    pub finished: bool,
}

impl ProgressDisplay {
    fn reset(&mut self, total: usize) {
        *self = Self {
            total,
            current: 0,
            finished: false,
        };
    }

    fn finish(&mut self) {
        self.current = self.total;
        self.finished = true;
    }

    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return if self.finished { 1.0 } else { 0.0 };
        }
        (self.current as f64 / self.total as f64).clamp(0.0, 1.0)
    }
}

/// Diagnostic snapshot of the controller for logging and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateInfo {
    pub phase: ImportPhase,
    pub run_id: Option<Uuid>,
    pub total_jobs: usize,
    pub processed_files: usize,
    pub result_count: usize,
    pub error_count: usize,
    pub completed: bool,
    pub cancelled: bool,
    pub showing_popup: bool,
    pub pending_password: bool,
    pub manual_passwords: bool,
    pub selected_files: usize,
    pub selected_directory: Option<PathBuf>,
}

type CleanupFn = Box<dyn FnOnce() + Send + Sync>;

/// Consumer half of a batch's queues.
struct ConsumerChannels {
    progress: Arc<tokio::sync::Mutex<ProgressReceiver>>,
    requests: Arc<tokio::sync::Mutex<PasswordRequestReceiver>>,
    responder: PasswordResponder,
    cancel: CancellationToken,
}

struct ImportState {
    phase: ImportPhase,
    run_id: Option<Uuid>,
    selector: FileSelector,
    jobs: Vec<ImportJob>,
    results: Option<Vec<ImportResult>>,
    summary: Option<ImportSummary>,
    completed: bool,
    cancelled: bool,
    showing_popup: bool,
    popup: Option<PasswordPopup>,
    pending_password: Option<PasswordRequest>,
    progress: Option<ImportProgress>,
    display: ProgressDisplay,
    start_time: Option<DateTime<Utc>>,
    manual_passwords: bool,
    cleanup: Vec<CleanupFn>,
    consumer: Option<ConsumerChannels>,
    worker: Option<BatchChannels>,
}

impl ImportState {
    fn new(selector: FileSelector) -> Self {
        Self {
            phase: ImportPhase::FileSelection,
            run_id: None,
            selector,
            jobs: Vec::new(),
            results: None,
            summary: None,
            completed: false,
            cancelled: false,
            showing_popup: false,
            popup: None,
            pending_password: None,
            progress: None,
            display: ProgressDisplay::default(),
            start_time: None,
            manual_passwords: false,
            cleanup: Vec::new(),
            consumer: None,
            worker: None,
        }
    }

    fn require(&self, phase: ImportPhase, operation: &'static str) -> Result<(), ControllerError> {
        if self.phase != phase {
            return Err(ControllerError::WrongPhase {
                operation,
                phase: self.phase,
            });
        }
        Ok(())
    }

    fn check_transition(&self, to: ImportPhase) -> Result<(), ControllerError> {
        if !self.phase.can_transition_to(to) {
            return Err(ControllerError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        Ok(())
    }

    fn setup_file_selection(&mut self) {
        self.selector.reset();
        self.run_id = None;
        self.jobs.clear();
        self.results = None;
        self.summary = None;
        self.completed = false;
        self.cancelled = false;
        self.showing_popup = false;
        self.popup = None;
        self.pending_password = None;
        self.progress = None;
        self.display = ProgressDisplay::default();
        self.start_time = None;
        self.manual_passwords = false;
        self.consumer = None;
        self.worker = None;
    }

    fn setup_importing(&mut self, from: ImportPhase) {
        self.showing_popup = false;
        self.popup = None;

        // Coming back from a password prompt resumes the batch in flight.
        if from == ImportPhase::PasswordInput && self.progress.is_some() {
            return;
        }

        let now = Utc::now();
        self.start_time = Some(now);
        self.display.reset(self.jobs.len());
        self.progress = (!self.jobs.is_empty()).then(|| ImportProgress::initial(self.jobs.len(), now));
    }

    fn setup_password_input(&mut self) {
        self.showing_popup = true;
        self.popup = self.pending_password.as_ref().map(|request| PasswordPopup {
            file: request.file.clone(),
            attempt: request.attempt,
            error: if request.retry {
                request.previous_error.clone()
            } else {
                None
            },
        });
    }

    fn setup_complete(&mut self, importer: &dyn BatchImporter) {
        self.completed = true;
        self.showing_popup = false;
        self.popup = None;
        self.pending_password = None;
        self.display.finish();
        if let Some(results) = &self.results {
            self.summary = Some(importer.import_summary(results));
        }
    }

    fn setup_cancelled(&mut self) {
        self.cancelled = true;
        self.showing_popup = false;
        self.popup = None;
        self.pending_password = None;

        // Wakes a worker blocked on the handshake and stops it between jobs.
        if let Some(consumer) = self.consumer.take() {
            consumer.cancel.cancel();
        }
        self.worker = None;

        let callbacks = std::mem::take(&mut self.cleanup);
        if !callbacks.is_empty() {
            debug!(count = callbacks.len(), "Running cleanup callbacks");
        }
        for callback in callbacks {
            callback();
        }
    }
}

pub struct ImportController {
    importer: Arc<dyn BatchImporter>,
    settings: ControllerSettings,
    state: RwLock<ImportState>,
    progress_log: LogThrottle,
}

impl ImportController {
    pub fn new(importer: Arc<dyn BatchImporter>, settings: ControllerSettings) -> Self {
        let selector = FileSelector::new(
            settings.start_directory.clone(),
            settings.keystore_extension.clone(),
        );
        Self {
            importer,
            settings,
            state: RwLock::new(ImportState::new(selector)),
            progress_log: LogThrottle::new(Duration::from_millis(500)),
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn current_phase(&self) -> ImportPhase {
        self.state.read().phase
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.state.read().run_id
    }

    /// Move to `to`, running its setup. Fails without side effects when the
    /// transition is not in the table.
    pub fn transition_to_phase(&self, to: ImportPhase) -> Result<(), ControllerError> {
        let mut state = self.state.write();
        self.transition_locked(&mut state, to)
    }

    fn transition_locked(
        &self,
        state: &mut ImportState,
        to: ImportPhase,
    ) -> Result<(), ControllerError> {
        state.check_transition(to)?;
        self.enter_locked(state, to);
        Ok(())
    }

    fn enter_locked(&self, state: &mut ImportState, to: ImportPhase) {
        let from = state.phase;
        match to {
            ImportPhase::FileSelection => state.setup_file_selection(),
            ImportPhase::Importing => state.setup_importing(from),
            ImportPhase::PasswordInput => state.setup_password_input(),
            ImportPhase::Complete => state.setup_complete(self.importer.as_ref()),
            ImportPhase::Cancelled => state.setup_cancelled(),
        }
        state.phase = to;
        info!(from = %from, to = %to, "Phase transition");
    }

    /// Turn the current selection into jobs and enter `Importing`.
    pub fn start_import(&self) -> Result<usize, ControllerError> {
        let (files, directory) = {
            let state = self.state.read();
            state.require(ImportPhase::FileSelection, "start import")?;
            (
                state.selector.selected_files(),
                state.selector.selected_directory().map(Path::to_path_buf),
            )
        };

        let jobs = match (&directory, files.is_empty()) {
            (None, true) => return Err(ControllerError::NoSelection),
            (Some(dir), _) => self.importer.create_import_jobs_from_directory(dir),
            (None, false) => self.importer.create_import_jobs_from_files(&files),
        }
        .map_err(ControllerError::JobCreation)?;

        self.importer
            .validate_import_jobs(&jobs)
            .map_err(ControllerError::JobValidation)?;

        let mut state = self.state.write();
        state.require(ImportPhase::FileSelection, "start import")?;

        if let Some(control) = self.importer.password_files() {
            control.set_password_files_enabled(true);
        }

        let count = jobs.len();
        self.arm_batch(&mut state, jobs);
        self.transition_locked(&mut state, ImportPhase::Importing)?;
        info!(jobs = count, "Import started");
        Ok(count)
    }

    /// Store the jobs and create a fresh set of queues for them.
    fn arm_batch(&self, state: &mut ImportState, jobs: Vec<ImportJob>) {
        let (progress_tx, progress_rx) = progress_channel(
            self.settings.progress_capacity,
            self.settings.progress_send_timeout,
        );
        let (prompter, requests, responder) = password_channels();
        let cancel = CancellationToken::new();

        state.jobs = jobs;
        state.run_id = Some(Uuid::now_v7());
        state.worker = Some(BatchChannels {
            progress: progress_tx,
            passwords: prompter,
            cancel: cancel.clone(),
        });
        state.consumer = Some(ConsumerChannels {
            progress: Arc::new(tokio::sync::Mutex::new(progress_rx)),
            requests: Arc::new(tokio::sync::Mutex::new(requests)),
            responder,
            cancel,
        });
    }

    /// Hand out the worker half of the current batch's queues. Only once per batch.
    pub fn take_worker_channels(&self) -> Option<BatchChannels> {
        self.state.write().worker.take()
    }

    /// The batch as a future to run on its own task. Resolves to
    /// [`ImportEvent::BatchComplete`] with one result per job.
    pub fn process_import_batch(
        &self,
    ) -> Result<impl Future<Output = ImportEvent> + Send + 'static, ControllerError> {
        let (channels, jobs, run_id) = {
            let mut state = self.state.write();
            let channels = state.worker.take().ok_or(ControllerError::BatchNotReady)?;
            let run_id = state.run_id.unwrap_or_else(Uuid::now_v7);
            (channels, state.jobs.clone(), run_id)
        };

        let importer = Arc::clone(&self.importer);
        let span = info_span!("import_batch", run_id = %run_id, jobs = jobs.len());

        Ok(async move {
            info!("Import batch running");
            let results = importer.import_batch(jobs, channels).await;
            info!(results = results.len(), "Import batch finished");
            ImportEvent::BatchComplete { run_id, results }
        }
        .instrument(span))
    }

    /// Record a worker's password request and show the prompt.
    pub fn handle_password_request(&self, request: PasswordRequest) -> Result<(), ControllerError> {
        let mut state = self.state.write();
        state.check_transition(ImportPhase::PasswordInput)?;
        debug!(file = %request.file, attempt = request.attempt, "Password requested");
        state.pending_password = Some(request);
        self.enter_locked(&mut state, ImportPhase::PasswordInput);
        Ok(())
    }

    pub fn submit_password(&self, password: impl Into<String>) -> Result<(), ControllerError> {
        self.respond(PasswordResponse::submit(password), "submit a password")
    }

    pub fn cancel_password_input(&self) -> Result<(), ControllerError> {
        self.respond(PasswordResponse::cancel(), "cancel password input")
    }

    pub fn skip_password_input(&self) -> Result<(), ControllerError> {
        self.respond(PasswordResponse::skip(), "skip password input")
    }

    fn respond(
        &self,
        response: PasswordResponse,
        operation: &'static str,
    ) -> Result<(), ControllerError> {
        let mut state = self.state.write();
        state.require(ImportPhase::PasswordInput, operation)?;

        let responder = state
            .consumer
            .as_ref()
            .map(|c| c.responder.clone())
            .ok_or(HandshakeError::Closed)?;
        responder.try_respond(response)?;

        state.pending_password = None;
        self.transition_locked(&mut state, ImportPhase::Importing)
    }

    /// Store the batch results and enter `Complete`.
    pub fn complete_import(&self, results: Vec<ImportResult>) -> Result<(), ControllerError> {
        let mut state = self.state.write();
        state.check_transition(ImportPhase::Complete)?;
        state.results = Some(results);
        self.enter_locked(&mut state, ImportPhase::Complete);
        Ok(())
    }

    /// Enter `Cancelled` from any phase. Runs and clears cleanup callbacks.
    pub fn cancel_import(&self) {
        let mut state = self.state.write();
        self.enter_locked(&mut state, ImportPhase::Cancelled);
    }

    /// Register a callback to run once when the import is cancelled.
    ///
    /// Callbacks run while the controller is locked and must not call back into it.
    pub fn register_cleanup(&self, callback: impl FnOnce() + Send + Sync + 'static) {
        self.state.write().cleanup.push(Box::new(callback));
    }

    /// Apply a worker snapshot if it passes validation; otherwise log and drop it.
    pub fn update_progress(&self, snapshot: ImportProgress) {
        let mut state = self.state.write();

        if let Err(reason) = progress::validate(&snapshot, state.progress.as_ref()) {
            warn!(
                reason = %reason,
                processed = snapshot.processed_files,
                total = snapshot.total_files,
                "Dropping invalid progress update"
            );
            return;
        }

        if self.progress_log.should_log() {
            debug!(
                processed = snapshot.processed_files,
                total = snapshot.total_files,
                file = %snapshot.current_file,
                "Progress"
            );
        }

        state.display.total = snapshot.total_files;
        state.display.current = snapshot.processed_files;
        state.progress = Some(snapshot);
    }

    /// Re-run part of a finished batch. Valid only in `Complete`.
    pub fn retry(&self, request: RetryRequest) -> Result<usize, ControllerError> {
        let jobs = {
            let state = self.state.read();
            state.require(ImportPhase::Complete, "retry")?;
            retry::jobs_for_request(state.results.as_deref().unwrap_or_default(), &request)
        };

        if jobs.is_empty() {
            return Err(match request {
                RetryRequest::File(path) => ControllerError::UnknownFile(path),
                RetryRequest::Strategy(_) => ControllerError::NothingToRetry,
            });
        }

        let manual = request.forces_manual_passwords();
        let control = self.importer.password_files();
        if manual && control.is_none() {
            return Err(ControllerError::ManualPasswordsUnsupported);
        }

        self.importer
            .validate_import_jobs(&jobs)
            .map_err(ControllerError::JobValidation)?;

        let mut state = self.state.write();
        state.require(ImportPhase::Complete, "retry")?;

        if let Some(control) = control {
            control.set_password_files_enabled(!manual);
        }

        let count = jobs.len();
        self.enter_locked(&mut state, ImportPhase::FileSelection);
        self.arm_batch(&mut state, jobs);
        state.manual_passwords = manual;
        self.enter_locked(&mut state, ImportPhase::Importing);
        info!(jobs = count, manual_passwords = manual, request = ?request, "Retry started");
        Ok(count)
    }

    /// Wait for the next progress snapshot of batch `run_id`.
    ///
    /// Re-arms on timeout while the batch is active. Returns `None` once the
    /// batch is no longer active, was replaced, or its worker has finished.
    pub async fn listen_for_progress(&self, run_id: Uuid) -> Option<ImportEvent> {
        loop {
            let receiver = {
                let state = self.state.read();
                if !state.phase.is_active() || state.run_id != Some(run_id) {
                    return None;
                }
                Arc::clone(&state.consumer.as_ref()?.progress)
            };

            let polled = receiver.lock().await.poll(self.settings.progress_poll).await;
            match polled {
                Polled::Item(progress) => {
                    return Some(ImportEvent::ProgressUpdate { run_id, progress });
                }
                Polled::Closed => return None,
                Polled::Timeout => continue,
            }
        }
    }

    /// Wait for the next password request of batch `run_id`. Same lifetime rules
    /// as [`ImportController::listen_for_progress`].
    pub async fn listen_for_password_request(&self, run_id: Uuid) -> Option<ImportEvent> {
        loop {
            let receiver = {
                let state = self.state.read();
                if !state.phase.is_active() || state.run_id != Some(run_id) {
                    return None;
                }
                Arc::clone(&state.consumer.as_ref()?.requests)
            };

            let polled = receiver.lock().await.poll(self.settings.password_poll).await;
            match polled {
                Polled::Item(request) => return Some(ImportEvent::PasswordRequest(request)),
                Polled::Closed => return None,
                Polled::Timeout => continue,
            }
        }
    }

    /// Mutate the file selection. Only allowed while selecting files.
    pub fn with_selector<R>(
        &self,
        f: impl FnOnce(&mut FileSelector) -> R,
    ) -> Result<R, ControllerError> {
        let mut state = self.state.write();
        state.require(ImportPhase::FileSelection, "change the selection")?;
        Ok(f(&mut state.selector))
    }

    pub fn selector(&self) -> FileSelector {
        self.state.read().selector.clone()
    }

    pub fn jobs(&self) -> Vec<ImportJob> {
        self.state.read().jobs.clone()
    }

    pub fn current_progress(&self) -> Option<ImportProgress> {
        self.state.read().progress.clone()
    }

    pub fn progress_display(&self) -> ProgressDisplay {
        self.state.read().display
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().start_time
    }

    pub fn pending_password(&self) -> Option<PasswordRequest> {
        self.state.read().pending_password.clone()
    }

    pub fn password_popup(&self) -> Option<PasswordPopup> {
        self.state.read().popup.clone()
    }

    pub fn results(&self) -> Option<Vec<ImportResult>> {
        self.state.read().results.clone()
    }

    pub fn summary(&self) -> Option<ImportSummary> {
        self.state.read().summary.clone()
    }

    pub fn state_info(&self) -> StateInfo {
        let state = self.state.read();
        let results = state.results.as_deref().unwrap_or_default();
        StateInfo {
            phase: state.phase,
            run_id: state.run_id,
            total_jobs: state.jobs.len(),
            processed_files: state.progress.as_ref().map_or(0, |p| p.processed_files),
            result_count: results.len(),
            error_count: results.iter().filter(|r| !r.success).count(),
            completed: state.completed,
            cancelled: state.cancelled,
            showing_popup: state.showing_popup,
            pending_password: state.pending_password.is_some(),
            manual_passwords: state.manual_passwords,
            selected_files: state.selector.selected_files().len(),
            selected_directory: state.selector.selected_directory().map(Path::to_path_buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::phase::ImportPhase::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Importer that only builds jobs; batches are driven by hand in these tests.
    #[derive(Default)]
    struct StubImporter {
        fail_creation: bool,
        fail_validation: bool,
        password_files: Option<StubPasswordFiles>,
    }

    #[derive(Default)]
    struct StubPasswordFiles(AtomicBool);

    impl crate::core::importer::PasswordFileControl for StubPasswordFiles {
        fn set_password_files_enabled(&self, enabled: bool) {
            self.0.store(enabled, Ordering::SeqCst);
        }

        fn password_files_enabled(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BatchImporter for StubImporter {
        fn create_import_jobs_from_files(&self, paths: &[PathBuf]) -> anyhow::Result<Vec<ImportJob>> {
            if self.fail_creation {
                anyhow::bail!("disk on fire");
            }
            Ok(paths.iter().cloned().map(ImportJob::from_path).collect())
        }

        fn create_import_jobs_from_directory(&self, path: &Path) -> anyhow::Result<Vec<ImportJob>> {
            self.create_import_jobs_from_files(&[path.join("a.json"), path.join("b.json")])
        }

        fn validate_import_jobs(&self, jobs: &[ImportJob]) -> anyhow::Result<()> {
            anyhow::ensure!(!jobs.is_empty(), "no import jobs");
            anyhow::ensure!(!self.fail_validation, "duplicate target name a");
            Ok(())
        }

        async fn import_batch(
            &self,
            jobs: Vec<ImportJob>,
            _channels: BatchChannels,
        ) -> Vec<ImportResult> {
            jobs.into_iter().map(ImportResult::succeeded).collect()
        }

        fn password_files(&self) -> Option<&dyn crate::core::importer::PasswordFileControl> {
            self.password_files
                .as_ref()
                .map(|c| c as &dyn crate::core::importer::PasswordFileControl)
        }
    }

    fn controller_with(importer: StubImporter) -> ImportController {
        ImportController::new(Arc::new(importer), ControllerSettings::default())
    }

    fn controller() -> ImportController {
        controller_with(StubImporter::default())
    }

    fn started(files: usize) -> ImportController {
        let c = controller();
        c.with_selector(|s| {
            s.select_files((0..files).map(|i| PathBuf::from(format!("/keys/{i}.json"))))
        })
        .unwrap();
        c.start_import().unwrap();
        c
    }

    fn snapshot(processed: usize, total: usize) -> ImportProgress {
        let mut p = ImportProgress::initial(total, Utc::now());
        p.processed_files = processed;
        p.percentage = ImportProgress::expected_percentage(processed, total);
        p
    }

    fn request(file: &str) -> PasswordRequest {
        PasswordRequest {
            file: file.to_string(),
            attempt: 1,
            retry: false,
            previous_error: None,
        }
    }

    /// Put a fresh controller into `phase` through legal transitions.
    fn controller_in(phase: ImportPhase) -> ImportController {
        let c = controller();
        let path: &[ImportPhase] = match phase {
            FileSelection => &[],
            Importing => &[Importing],
            PasswordInput => &[Importing, PasswordInput],
            Complete => &[Importing, Complete],
            Cancelled => &[Cancelled],
        };
        for step in path {
            c.transition_to_phase(*step).unwrap();
        }
        assert_eq!(c.current_phase(), phase);
        c
    }

    #[test]
    fn transitions_follow_the_table() {
        for from in ImportPhase::ALL {
            for to in ImportPhase::ALL {
                let c = controller_in(from);
                let result = c.transition_to_phase(to);
                if from.can_transition_to(to) {
                    assert!(result.is_ok(), "{from} -> {to} should succeed");
                    assert_eq!(c.current_phase(), to);
                } else {
                    assert!(matches!(
                        result,
                        Err(ControllerError::InvalidTransition { .. })
                    ));
                    assert_eq!(c.current_phase(), from);
                }
            }
        }
    }

    #[test]
    fn start_import_without_selection_fails() {
        let c = controller();
        assert!(matches!(c.start_import(), Err(ControllerError::NoSelection)));
        assert_eq!(c.current_phase(), FileSelection);
    }

    #[test]
    fn start_import_surfaces_delegate_failure_without_changing_phase() {
        let c = controller_with(StubImporter {
            fail_creation: true,
            ..Default::default()
        });
        c.with_selector(|s| s.select_files([PathBuf::from("/keys/a.json")]))
            .unwrap();

        let err = c.start_import().unwrap_err();
        assert!(matches!(err, ControllerError::JobCreation(_)));
        assert!(err.to_string().contains("disk on fire"));
        assert_eq!(c.current_phase(), FileSelection);
        assert!(c.jobs().is_empty());
    }

    #[test]
    fn start_import_keeps_phase_when_validation_fails() {
        let c = controller_with(StubImporter {
            fail_validation: true,
            ..Default::default()
        });
        c.with_selector(|s| s.select_files([PathBuf::from("/keys/a.json")]))
            .unwrap();

        let err = c.start_import().unwrap_err();
        assert!(matches!(err, ControllerError::JobValidation(_)));
        assert!(err.to_string().contains("duplicate target name a"));
        assert_eq!(c.current_phase(), FileSelection);
        assert!(c.jobs().is_empty());
        assert!(c.run_id().is_none());
        assert_eq!(c.state_info().selected_files, 1);
    }

    #[test]
    fn start_import_from_directory_initialises_progress() {
        let c = controller();
        c.with_selector(|s| s.select_directory(PathBuf::from("/keys")))
            .unwrap();

        assert_eq!(c.start_import().unwrap(), 2);
        assert_eq!(c.current_phase(), Importing);
        assert!(c.run_id().is_some());
        assert!(c.start_time().is_some());

        let progress = c.current_progress().unwrap();
        assert_eq!(progress.total_files, 2);
        assert_eq!(progress.processed_files, 0);
        assert_eq!(c.progress_display().total, 2);
        assert!(matches!(
            c.with_selector(|_| ()),
            Err(ControllerError::WrongPhase { .. })
        ));
    }

    #[test]
    fn rejects_processed_beyond_total() {
        let c = controller();
        c.update_progress(snapshot(3, 3));
        let mut bad = snapshot(3, 3);
        bad.processed_files = 5;
        c.update_progress(bad);
        assert_eq!(c.current_progress().unwrap().processed_files, 3);
    }

    #[test]
    fn progress_is_monotonic() {
        let c = started(3);

        for processed in 0..=3 {
            c.update_progress(snapshot(processed, 3));
            assert_eq!(c.current_progress().unwrap().processed_files, processed);
        }

        c.update_progress(snapshot(1, 3));
        assert_eq!(c.current_progress().unwrap().processed_files, 3);
        assert_eq!(c.current_phase(), Importing);
    }

    #[test]
    fn mismatched_total_is_dropped() {
        let c = started(3);
        c.update_progress(snapshot(1, 4));
        assert_eq!(c.current_progress().unwrap().total_files, 3);
    }

    #[tokio::test]
    async fn submit_password_answers_worker_and_resumes() {
        let c = started(3);
        let mut channels = c.take_worker_channels().unwrap();
        c.update_progress(snapshot(1, 3));
        let started_at = c.start_time();

        c.handle_password_request(request("1.json")).unwrap();
        assert_eq!(c.current_phase(), PasswordInput);
        assert_eq!(c.password_popup().unwrap().file, "1.json");

        c.submit_password("pw").unwrap();
        assert_eq!(c.current_phase(), Importing);
        assert!(c.pending_password().is_none());
        assert!(c.password_popup().is_none());
        assert_eq!(c.current_progress().unwrap().processed_files, 1);
        assert_eq!(c.start_time(), started_at);

        let response = channels.passwords.next_response().await.unwrap();
        assert_eq!(response.password, "pw");
        assert!(!response.cancelled);
        assert!(!response.skip);
    }

    #[tokio::test]
    async fn skip_and_cancel_send_matching_responses() {
        let c = started(2);
        let mut channels = c.take_worker_channels().unwrap();

        c.handle_password_request(request("0.json")).unwrap();
        c.skip_password_input().unwrap();
        assert!(channels.passwords.next_response().await.unwrap().skip);

        c.handle_password_request(request("1.json")).unwrap();
        c.cancel_password_input().unwrap();
        assert!(channels.passwords.next_response().await.unwrap().cancelled);
        assert_eq!(c.current_phase(), Importing);
    }

    #[test]
    fn answering_when_worker_is_not_waiting_fails_fast() {
        let c = started(1);
        let _channels = c.take_worker_channels().unwrap();

        c.handle_password_request(request("0.json")).unwrap();
        c.submit_password("first").unwrap();

        // The first answer was never read, so the single slot is still taken.
        c.handle_password_request(request("0.json")).unwrap();
        assert!(matches!(
            c.submit_password("second"),
            Err(ControllerError::ChannelUnavailable(HandshakeError::NotWaiting))
        ));
        assert_eq!(c.current_phase(), PasswordInput);
        assert!(c.pending_password().is_some());
    }

    #[test]
    fn submit_outside_password_input_is_rejected() {
        let c = started(1);
        assert!(matches!(
            c.submit_password("pw"),
            Err(ControllerError::WrongPhase { .. })
        ));
    }

    #[test]
    fn retry_popup_carries_previous_error() {
        let c = started(1);
        c.handle_password_request(PasswordRequest {
            file: "0.json".to_string(),
            attempt: 2,
            retry: true,
            previous_error: Some("incorrect password".to_string()),
        })
        .unwrap();

        let popup = c.password_popup().unwrap();
        assert_eq!(popup.attempt, 2);
        assert_eq!(popup.error.as_deref(), Some("incorrect password"));
        assert!(c.state_info().showing_popup);
    }

    #[test]
    fn password_request_from_file_selection_is_invalid() {
        let c = controller();
        assert!(c.handle_password_request(request("a.json")).is_err());
        assert!(c.pending_password().is_none());
        assert_eq!(c.current_phase(), FileSelection);
    }

    #[test]
    fn cancel_runs_cleanup_exactly_once_from_every_phase() {
        for phase in ImportPhase::ALL {
            let c = controller_in(phase);
            let calls = Arc::new(AtomicUsize::new(0));
            for _ in 0..3 {
                let calls = Arc::clone(&calls);
                c.register_cleanup(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                });
            }

            c.cancel_import();
            assert_eq!(c.current_phase(), Cancelled);
            assert_eq!(calls.load(Ordering::SeqCst), 3, "from {phase}");

            c.cancel_import();
            assert_eq!(calls.load(Ordering::SeqCst), 3, "callbacks cleared after {phase}");
            assert!(c.state_info().cancelled);
        }
    }

    #[tokio::test]
    async fn cancel_unblocks_waiting_worker() {
        let c = started(1);
        let mut channels = c.take_worker_channels().unwrap();

        let worker = tokio::spawn(async move {
            let response = channels.passwords.ask(request("0.json")).await;
            (response, channels.cancel.is_cancelled())
        });

        let run_id = c.run_id().unwrap();
        match c.listen_for_password_request(run_id).await {
            Some(ImportEvent::PasswordRequest(r)) => c.handle_password_request(r).unwrap(),
            other => panic!("expected password request, got {:?}", other),
        }

        c.cancel_import();
        let (response, cancelled) = worker.await.unwrap();
        assert!(response.cancelled);
        assert!(cancelled);
    }

    #[tokio::test]
    async fn complete_builds_summary_and_back_to_selection_clears() {
        let c = started(2);
        let batch = c.process_import_batch().unwrap();
        assert!(matches!(
            c.process_import_batch().map(|_| ()),
            Err(ControllerError::BatchNotReady)
        ));

        let ImportEvent::BatchComplete { results, .. } = batch.await else {
            panic!("expected batch completion");
        };
        c.complete_import(results).unwrap();

        assert_eq!(c.current_phase(), Complete);
        let summary = c.summary().unwrap();
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.success_count, 2);
        assert!(c.progress_display().finished);

        c.transition_to_phase(FileSelection).unwrap();
        let info = c.state_info();
        assert_eq!(info.total_jobs, 0);
        assert_eq!(info.result_count, 0);
        assert!(!info.completed);
        assert!(c.summary().is_none());
        assert!(c.run_id().is_none());
    }

    #[test]
    fn complete_from_file_selection_keeps_state() {
        let c = controller();
        let results = vec![ImportResult::succeeded(ImportJob::from_path("a.json"))];
        assert!(c.complete_import(results).is_err());
        assert!(c.results().is_none());
    }

    #[test]
    fn retry_rearms_a_batch_with_selected_jobs() {
        let c = controller_with(StubImporter {
            password_files: Some(StubPasswordFiles::default()),
            ..Default::default()
        });
        c.with_selector(|s| {
            s.select_files([PathBuf::from("/keys/a.json"), PathBuf::from("/keys/b.json")])
        })
        .unwrap();
        c.start_import().unwrap();
        let previous_run = c.run_id();

        c.complete_import(vec![
            ImportResult::succeeded(ImportJob::from_path("/keys/a.json")),
            ImportResult::failed(ImportJob::from_path("/keys/b.json"), "incorrect password"),
        ])
        .unwrap();

        assert!(matches!(
            c.retry(RetryRequest::Strategy(retry::RetryStrategy::Skipped)),
            Err(ControllerError::NothingToRetry)
        ));
        assert!(matches!(
            c.retry(RetryRequest::File(PathBuf::from("/keys/zzz.json"))),
            Err(ControllerError::UnknownFile(_))
        ));
        assert_eq!(c.current_phase(), Complete);

        let count = c
            .retry(RetryRequest::Strategy(retry::RetryStrategy::ManualPasswords))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(c.current_phase(), Importing);
        assert_ne!(c.run_id(), previous_run);
        assert_eq!(c.jobs()[0].target_name, "b");
        assert!(c.state_info().manual_passwords);
        assert!(c.results().is_none());
        assert!(c.take_worker_channels().is_some());
    }

    #[test]
    fn manual_password_retry_requires_capability() {
        let c = started(1);
        c.complete_import(vec![ImportResult::failed(
            ImportJob::from_path("/keys/0.json"),
            "incorrect password",
        )])
        .unwrap();

        assert!(matches!(
            c.retry(RetryRequest::Strategy(retry::RetryStrategy::ManualPasswords)),
            Err(ControllerError::ManualPasswordsUnsupported)
        ));
        assert_eq!(c.current_phase(), Complete);
    }

    #[tokio::test]
    async fn listeners_stop_when_batch_is_inactive() {
        let c = started(1);
        let run_id = c.run_id().unwrap();
        c.cancel_import();
        assert!(c.listen_for_progress(run_id).await.is_none());
        assert!(c.listen_for_password_request(run_id).await.is_none());
    }

    #[tokio::test]
    async fn progress_listener_rearms_until_data_arrives() {
        let c = Arc::new(ImportController::new(
            Arc::new(StubImporter::default()),
            ControllerSettings {
                progress_poll: Duration::from_millis(10),
                ..ControllerSettings::default()
            },
        ));
        c.with_selector(|s| s.select_files([PathBuf::from("/keys/a.json")]))
            .unwrap();
        c.start_import().unwrap();
        let channels = c.take_worker_channels().unwrap();
        let run_id = c.run_id().unwrap();

        let listener = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.listen_for_progress(run_id).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!listener.is_finished());

        channels.progress.send(snapshot(1, 1)).await;
        let event = tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener should wake")
            .unwrap();
        assert!(matches!(event, Some(ImportEvent::ProgressUpdate { progress, .. }) if progress.processed_files == 1));
    }
}
