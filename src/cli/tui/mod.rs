//! Interactive TUI for ksimport.
//!
//! Browse for keystores, watch the import, answer password prompts and
//! retry what did not make it.

mod app;
mod input;
mod ui;

use std::io::{self, stdout};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event, execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing::info;

use crate::context::AppContext;

use app::TuiApp;

/// Redraw interval while waiting for input.
const TICK: Duration = Duration::from_millis(50);

/// Run the TUI until the user quits.
pub async fn run(ctx: &AppContext) -> Result<()> {
    // Setup terminal
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen).context("Failed to enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("Failed to create terminal")?;

    let mut app = TuiApp::new(ctx.controller(), Arc::clone(&ctx.config));
    let result = run_app(&mut terminal, &mut app).await;

    if app.phase().is_active() {
        info!("Leaving with an import in flight, cancelling");
        app.controller.cancel_import();
    }

    // Restore terminal
    disable_raw_mode().context("Failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("Failed to leave alternate screen")?;
    terminal.show_cursor().context("Failed to show cursor")?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut TuiApp,
) -> Result<()> {
    app.pump();

    while app.running {
        terminal.draw(|frame| ui::render(frame, app))?;

        if event::poll(TICK)? {
            let event = event::read()?;
            if let Some(action) = input::handle_event(event, app.input_mode()) {
                app.handle_action(action);
            }
        }

        app.pump();
        // Let the listener tasks run between frames.
        tokio::task::yield_now().await;
    }

    Ok(())
}
