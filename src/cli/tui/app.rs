//! TUI application state and logic.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::core::controller::{ControllerError, ImportController};
use crate::core::driver::{self, EventReceiver, EventSender, Flow};
use crate::core::events::ImportEvent;
use crate::core::phase::ImportPhase;
use crate::core::retry::{RetryRequest, RetryStrategy};

/// Which key map applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Browse,
    Progress,
    Password,
    Summary,
    Cancelled,
}

impl From<ImportPhase> for InputMode {
    fn from(phase: ImportPhase) -> Self {
        match phase {
            ImportPhase::FileSelection => InputMode::Browse,
            ImportPhase::Importing => InputMode::Progress,
            ImportPhase::PasswordInput => InputMode::Password,
            ImportPhase::Complete => InputMode::Summary,
            ImportPhase::Cancelled => InputMode::Cancelled,
        }
    }
}

/// Actions that can be triggered by user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Up,
    Down,
    Open,
    Parent,
    Toggle,
    PickDirectory,
    Start,
    Refresh,
    Cancel,
    Input(char),
    DeleteChar,
    Submit,
    Skip,
    Retry(RetryStrategy),
    RetrySelected,
    Back,
}

/// Main TUI application state.
pub struct TuiApp {
    pub controller: Arc<ImportController>,
    pub config: Arc<AppConfig>,
    events: EventSender,
    inbox: EventReceiver,
    pub running: bool,
    pub status: Option<String>,
    pub password: String,
    pub result_cursor: usize,
    last_phase: Option<ImportPhase>,
}

impl TuiApp {
    pub fn new(controller: Arc<ImportController>, config: Arc<AppConfig>) -> Self {
        let (events, inbox) = driver::event_channel();
        Self {
            controller,
            config,
            events,
            inbox,
            running: true,
            status: None,
            password: String::new(),
            result_cursor: 0,
            last_phase: None,
        }
    }

    pub fn phase(&self) -> ImportPhase {
        self.controller.current_phase()
    }

    pub fn input_mode(&self) -> InputMode {
        self.phase().into()
    }

    /// Apply every queued event, then react to a phase change.
    pub fn pump(&mut self) {
        while let Ok(event) = self.inbox.try_recv() {
            match driver::apply(&self.controller, event, &self.events) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => self.running = false,
                Err(e) => self.report(e),
            }
        }
        self.sync();
    }

    fn sync(&mut self) {
        let phase = self.phase();
        if self.last_phase == Some(phase) {
            return;
        }
        debug!(phase = %phase, "Screen changed");
        self.last_phase = Some(phase);

        match phase {
            ImportPhase::FileSelection => self.refresh_listing(),
            ImportPhase::Complete => self.result_cursor = 0,
            _ => {}
        }
        if phase != ImportPhase::PasswordInput {
            self.password.clear();
        }
    }

    fn refresh_listing(&mut self) {
        match self.controller.with_selector(|s| s.refresh()) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.status = Some(format!("Cannot read directory: {e}")),
            Err(e) => self.report(e),
        }
    }

    fn report(&mut self, error: ControllerError) {
        warn!(error = %error, "Action failed");
        self.status = Some(error.to_string());
    }

    /// Queue an event for the next pump.
    fn emit(&mut self, event: ImportEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!(error = %e, "Event queue full");
            self.status = Some("Busy, try again".to_string());
        }
    }

    /// Handle an action and update state accordingly.
    pub fn handle_action(&mut self, action: Action) {
        self.status = None;
        let result = match self.input_mode() {
            InputMode::Browse => self.browse(action),
            InputMode::Progress => self.progress(action),
            InputMode::Password => self.password_prompt(action),
            InputMode::Summary => self.summary(action),
            InputMode::Cancelled => self.cancelled(action),
        };
        if let Err(e) = result {
            self.report(e);
        }
        self.pump();
    }

    fn browse(&mut self, action: Action) -> Result<(), ControllerError> {
        let c = Arc::clone(&self.controller);
        match action {
            Action::Quit => self.emit(ImportEvent::ReturnToMenu),
            Action::Up => c.with_selector(|s| s.move_up())?,
            Action::Down => c.with_selector(|s| s.move_down())?,
            Action::Open => {
                let opened = c.with_selector(|s| match s.current().map(|e| e.is_dir) {
                    Some(true) => s.enter(),
                    Some(false) => {
                        s.toggle_current();
                        Ok(())
                    }
                    None => Ok(()),
                })?;
                if let Err(e) = opened {
                    self.status = Some(format!("Cannot open directory: {e}"));
                }
            }
            Action::Parent => {
                if let Err(e) = c.with_selector(|s| s.parent())? {
                    self.status = Some(format!("Cannot open directory: {e}"));
                }
            }
            Action::Toggle => c.with_selector(|s| s.toggle_current())?,
            Action::PickDirectory => c.with_selector(|s| s.select_current_directory())?,
            Action::Refresh => self.refresh_listing(),
            Action::Start => {
                c.start_import()?;
                driver::launch(&c, &self.events)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn progress(&mut self, action: Action) -> Result<(), ControllerError> {
        match action {
            Action::Cancel => self.controller.cancel_import(),
            Action::Quit => {
                self.controller.cancel_import();
                self.emit(ImportEvent::ReturnToMenu);
            }
            _ => {}
        }
        Ok(())
    }

    fn password_prompt(&mut self, action: Action) -> Result<(), ControllerError> {
        match action {
            Action::Input(c) => self.password.push(c),
            Action::DeleteChar => {
                self.password.pop();
            }
            Action::Submit => {
                self.controller.submit_password(self.password.as_str())?;
                self.password.clear();
            }
            Action::Skip => self.controller.skip_password_input()?,
            Action::Cancel => self.controller.cancel_password_input()?,
            Action::Quit => {
                self.controller.cancel_import();
                self.emit(ImportEvent::ReturnToMenu);
            }
            _ => {}
        }
        Ok(())
    }

    fn summary(&mut self, action: Action) -> Result<(), ControllerError> {
        let results = self.controller.results().unwrap_or_default();
        match action {
            Action::Up => self.result_cursor = self.result_cursor.saturating_sub(1),
            Action::Down => {
                if self.result_cursor + 1 < results.len() {
                    self.result_cursor += 1;
                }
            }
            Action::Retry(strategy) => {
                self.emit(ImportEvent::RetryRequest(RetryRequest::Strategy(strategy)));
            }
            Action::RetrySelected => {
                if let Some(result) = results.get(self.result_cursor) {
                    let request = RetryRequest::File(result.job.source.clone());
                    self.emit(ImportEvent::RetryRequest(request));
                }
            }
            Action::Back => self.emit(ImportEvent::ReturnToSelection),
            Action::Quit => self.emit(ImportEvent::ReturnToMenu),
            _ => {}
        }
        Ok(())
    }

    fn cancelled(&mut self, action: Action) -> Result<(), ControllerError> {
        match action {
            Action::Back => self.emit(ImportEvent::ReturnToSelection),
            Action::Quit => self.emit(ImportEvent::ReturnToMenu),
            _ => {}
        }
        Ok(())
    }
}
