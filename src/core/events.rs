use uuid::Uuid;

use super::handshake::PasswordRequest;
use super::models::ImportResult;
use super::progress::ImportProgress;
use super::retry::RetryRequest;

/// Lifecycle events a UI driver reacts to.
///
/// The first three come out of a running batch; the rest are raised by the
/// driver itself in response to user input and are routed through the same
/// queue so that every state change is applied in one place.
#[derive(Debug, Clone)]
pub enum ImportEvent {
    /// `run_id` identifies the batch, so late output from a cancelled or
    /// replaced run can be told apart from the current one.
    BatchComplete {
        run_id: Uuid,
        results: Vec<ImportResult>,
    },
    ProgressUpdate {
        run_id: Uuid,
        progress: ImportProgress,
    },
    PasswordRequest(PasswordRequest),
    ReturnToSelection,
    ReturnToMenu,
    RetryRequest(RetryRequest),
}

impl ImportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ImportEvent::BatchComplete { .. } => "batch_complete",
            ImportEvent::ProgressUpdate { .. } => "progress_update",
            ImportEvent::PasswordRequest(_) => "password_request",
            ImportEvent::ReturnToSelection => "return_to_selection",
            ImportEvent::ReturnToMenu => "return_to_menu",
            ImportEvent::RetryRequest(_) => "retry_request",
        }
    }
}
