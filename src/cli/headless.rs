//! Line-oriented driver for scripted and non-interactive imports.
//!
//! Progress goes to the output as one line per processed file. Password
//! prompts go to stderr and answers are read line by line from the input:
//! `!skip` skips the file, `!cancel` (or end of input) cancels the import.

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use crate::core::controller::{ImportController, StateInfo};
use crate::core::driver::{self, Flow};
use crate::core::events::ImportEvent;
use crate::core::handshake::PasswordRequest;
use crate::core::models::ImportSummary;
use crate::core::phase::ImportPhase;

pub const SKIP_COMMAND: &str = "!skip";
pub const CANCEL_COMMAND: &str = "!cancel";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub files: Vec<PathBuf>,
    pub directory: Option<PathBuf>,
    pub json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    summary: &'a ImportSummary,
    state: StateInfo,
}

/// Import the selected keystores. Returns `None` if the import was cancelled.
///
/// Ctrl-C cancels the import, also while waiting for a password.
pub async fn run<R, W>(
    controller: &Arc<ImportController>,
    options: &RunOptions,
    input: R,
    out: &mut W,
) -> Result<Option<ImportSummary>>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    run_until(controller, options, input, out, interrupt).await
}

/// [`run`] with the interrupt source supplied by the caller.
pub async fn run_until<R, W, I>(
    controller: &Arc<ImportController>,
    options: &RunOptions,
    input: R,
    out: &mut W,
    interrupt: I,
) -> Result<Option<ImportSummary>>
where
    R: AsyncBufRead + Unpin,
    W: Write,
    I: Future<Output = ()>,
{
    controller.with_selector(|selector| match &options.directory {
        Some(dir) => selector.select_directory(dir.clone()),
        None => selector.select_files(options.files.iter().cloned()),
    })?;
    let jobs = controller.start_import()?;

    let (tx, mut rx) = driver::event_channel();
    let run_id = driver::launch(controller, &tx)?;
    info!(%run_id, jobs, "Headless import started");

    // Pinned once for the run; a signal between polls stays pending.
    tokio::pin!(interrupt);
    let mut interrupted = false;

    let mut answers = input.lines();
    let mut last_processed = None;

    loop {
        let event = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                interrupt_import(controller);
                continue;
            }
        };

        let finished = matches!(event, ImportEvent::BatchComplete { .. });

        match event {
            ImportEvent::PasswordRequest(request) => {
                let event = ImportEvent::PasswordRequest(request.clone());
                driver::apply_logged(controller, event, &tx);
                if controller.current_phase() == ImportPhase::PasswordInput {
                    prompt(&request);
                    let answer = tokio::select! {
                        line = answers.next_line() => line.context("Failed to read password answer")?,
                        _ = &mut interrupt, if !interrupted => {
                            interrupted = true;
                            eprintln!();
                            interrupt_import(controller);
                            continue;
                        }
                    };
                    answer_request(controller, &request, answer)?;
                }
            }
            event => {
                if driver::apply_logged(controller, event, &tx) == Flow::Exit {
                    break;
                }
            }
        }

        if !options.json {
            if let Some(progress) = controller.current_progress() {
                let processed = progress.processed_files;
                if processed > 0 && last_processed != Some(processed) {
                    last_processed = Some(processed);
                    writeln!(
                        out,
                        "[{processed}/{}] {}",
                        progress.total_files, progress.current_file
                    )?;
                }
            }
        }

        if finished {
            break;
        }
    }

    if controller.current_phase() != ImportPhase::Complete {
        return Ok(None);
    }

    let summary = controller
        .summary()
        .context("Import finished without a summary")?;
    write_report(out, &summary, controller.state_info(), options.json)?;
    Ok(Some(summary))
}

fn interrupt_import(controller: &ImportController) {
    warn!("Interrupted, cancelling import");
    controller.cancel_import();
}

/// Show the prompt on stderr. Called before the answer is read.
fn prompt(request: &PasswordRequest) {
    eprint!("{}", prompt_text(request));
}

fn prompt_text(request: &PasswordRequest) -> String {
    match &request.previous_error {
        Some(error) if request.retry => format!(
            "Password for {} (attempt {}, {}): ",
            request.file, request.attempt, error
        ),
        _ => format!("Password for {}: ", request.file),
    }
}

fn answer_request(
    controller: &ImportController,
    request: &PasswordRequest,
    answer: Option<String>,
) -> Result<()> {
    let Some(answer) = answer else {
        eprintln!();
        warn!(file = %request.file, "Input closed, cancelling import");
        controller.cancel_password_input()?;
        return Ok(());
    };

    match answer.trim_end_matches('\r') {
        SKIP_COMMAND => controller.skip_password_input()?,
        CANCEL_COMMAND => controller.cancel_password_input()?,
        password => controller.submit_password(password)?,
    }
    Ok(())
}

fn write_report<W: Write>(
    out: &mut W,
    summary: &ImportSummary,
    state: StateInfo,
    json: bool,
) -> Result<()> {
    if json {
        let report = Report { summary, state };
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(
        out,
        "Imported {} of {} keystores ({} failed, {} skipped)",
        summary.success_count, summary.total_files, summary.failed_count, summary.skipped_count
    )?;
    for error in &summary.errors {
        let kind = if error.skipped { "skipped" } else { "failed" };
        writeln!(out, "  {kind}: {} ({})", error.file, error.error)?;
    }
    Ok(())
}

/// Turn a run outcome into an error for the process exit status.
pub fn check_outcome(outcome: Option<ImportSummary>) -> Result<ImportSummary> {
    match outcome {
        None => bail!("import cancelled"),
        Some(summary) if summary.has_failures() => bail!(
            "{} of {} keystores failed to import",
            summary.failed_count,
            summary.total_files
        ),
        Some(summary) => Ok(summary),
    }
}
