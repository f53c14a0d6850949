//! Glue between the controller and a UI loop.
//!
//! A driver owns one event queue. [`launch`] spawns the batch task and the two
//! listeners, all of which only ever push [`ImportEvent`]s onto that queue. The
//! UI loop pops events (its own included) and hands them to [`apply`], so every
//! state change happens on the driver's side of the queue.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::controller::{ControllerError, ImportController};
use super::events::ImportEvent;
use super::phase::ImportPhase;

const EVENT_QUEUE_CAPACITY: usize = 64;

pub type EventSender = mpsc::Sender<ImportEvent>;
pub type EventReceiver = mpsc::Receiver<ImportEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_QUEUE_CAPACITY)
}

/// What the UI loop should do after an event was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Start the armed batch and its listeners. Returns the batch's run id.
pub fn launch(
    controller: &Arc<ImportController>,
    events: &EventSender,
) -> Result<Uuid, ControllerError> {
    let run_id = controller.run_id().ok_or(ControllerError::BatchNotReady)?;
    let batch = controller.process_import_batch()?;

    let tx = events.clone();
    tokio::spawn(async move {
        let event = batch.await;
        if tx.send(event).await.is_err() {
            debug!(%run_id, "Event queue closed before batch completion was delivered");
        }
    });

    let (c, tx) = (Arc::clone(controller), events.clone());
    tokio::spawn(async move {
        while let Some(event) = c.listen_for_progress(run_id).await {
            if tx.send(event).await.is_err() {
                break;
            }
        }
        debug!(%run_id, "Progress listener stopped");
    });

    let (c, tx) = (Arc::clone(controller), events.clone());
    tokio::spawn(async move {
        while let Some(event) = c.listen_for_password_request(run_id).await {
            if tx.send(event).await.is_err() {
                break;
            }
        }
        debug!(%run_id, "Password listener stopped");
    });

    Ok(run_id)
}

/// Apply one event to the controller.
///
/// Errors are returned for the UI to show; the controller is left unchanged
/// when an operation fails.
pub fn apply(
    controller: &Arc<ImportController>,
    event: ImportEvent,
    events: &EventSender,
) -> Result<Flow, ControllerError> {
    debug!(event = event.name(), phase = %controller.current_phase(), "Applying event");

    match event {
        ImportEvent::ProgressUpdate { run_id, progress } => {
            if controller.run_id() == Some(run_id) {
                controller.update_progress(progress);
            } else {
                debug!(%run_id, "Ignoring progress of a replaced batch");
            }
        }
        ImportEvent::PasswordRequest(request) => {
            if controller.current_phase() == ImportPhase::Cancelled {
                debug!(file = %request.file, "Ignoring password request after cancel");
            } else {
                controller.handle_password_request(request)?;
            }
        }
        ImportEvent::BatchComplete { run_id, results } => {
            if controller.run_id() != Some(run_id) {
                debug!(%run_id, "Ignoring results of a replaced batch");
            } else if controller.current_phase() == ImportPhase::Cancelled {
                debug!(%run_id, results = results.len(), "Ignoring results of a cancelled batch");
            } else {
                controller.complete_import(results)?;
            }
        }
        ImportEvent::ReturnToSelection => {
            controller.transition_to_phase(ImportPhase::FileSelection)?;
        }
        ImportEvent::RetryRequest(request) => {
            let count = controller.retry(request)?;
            let run_id = launch(controller, events)?;
            debug!(%run_id, jobs = count, "Retry batch launched");
        }
        ImportEvent::ReturnToMenu => return Ok(Flow::Exit),
    }

    Ok(Flow::Continue)
}

/// Apply an event and log a failure instead of returning it.
pub fn apply_logged(
    controller: &Arc<ImportController>,
    event: ImportEvent,
    events: &EventSender,
) -> Flow {
    let name = event.name();
    match apply(controller, event, events) {
        Ok(flow) => flow,
        Err(e) => {
            warn!(event = name, error = %e, "Event rejected");
            Flow::Continue
        }
    }
}
