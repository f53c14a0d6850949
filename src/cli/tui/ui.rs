//! UI rendering for the TUI.

use chrono::Utc;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Flex, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

use crate::core::phase::ImportPhase;

use super::app::{InputMode, TuiApp};

/// Main render function - dispatches to phase-specific renderers.
pub fn render(frame: &mut Frame, app: &TuiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Content
            Constraint::Length(3), // Footer/help
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);

    match app.phase() {
        ImportPhase::FileSelection => render_browser(frame, app, chunks[1]),
        ImportPhase::Importing => render_progress(frame, app, chunks[1]),
        ImportPhase::PasswordInput => {
            render_progress(frame, app, chunks[1]);
            render_password_popup(frame, app);
        }
        ImportPhase::Complete => render_summary(frame, app, chunks[1]),
        ImportPhase::Cancelled => render_cancelled(frame, chunks[1]),
    }

    render_footer(frame, app, chunks[2]);
}

fn render_header(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let mode = if app.config.simulation { " [SIM]" } else { "" };
    let run = app
        .controller
        .run_id()
        .map(|id| format!("  run {}", &id.simple().to_string()[..8]))
        .unwrap_or_default();
    let title = format!("ksimport  {}{}{}", app.phase(), run, mode);

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    frame.render_widget(block, area);
}

fn render_browser(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let selector = app.controller.selector();

    let selection = match (selector.selected_directory(), selector.selected_files().len()) {
        (Some(dir), _) => format!("directory {}", dir.display()),
        (None, 0) => "nothing selected".to_string(),
        (None, n) => format!("{n} file(s) selected"),
    };

    let block = Block::default()
        .title(format!("{}  ({})", selector.cwd().display(), selection))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    if selector.entries().is_empty() {
        let text = Paragraph::new("  No keystores or directories here")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(text, area);
        return;
    }

    let items: Vec<ListItem> = selector
        .entries()
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let is_cursor = i == selector.cursor();
            let style = if is_cursor {
                Style::default()
                    .bg(Color::DarkGray)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };

            let marker = if selector.is_selected(&entry.path) {
                Span::styled("[x]", Style::default().fg(Color::Green))
            } else {
                Span::raw("[ ]")
            };
            let name = if entry.is_dir {
                Span::styled(format!("{}/", entry.name), Style::default().fg(Color::Blue))
            } else {
                Span::raw(entry.name.clone())
            };

            let line = Line::from(vec![
                Span::raw(if is_cursor { "> " } else { "  " }),
                marker,
                Span::raw(" "),
                name,
            ]);
            ListItem::new(line).style(style)
        })
        .collect();

    frame.render_widget(List::new(items).block(block), area);
}

fn render_progress(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let block = Block::default()
        .title("Importing")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let display = app.controller.progress_display();
    let progress = app.controller.current_progress();
    let elapsed = app
        .controller
        .start_time()
        .map(|start| (Utc::now() - start).num_seconds().max(0) as u64)
        .unwrap_or(0);

    let percentage = (display.ratio() * 100.0).round() as u8;
    let mut lines = vec![
        Line::from(format!(
            "  {} {:>3}%  {}/{}",
            progress_bar(percentage, 30),
            percentage,
            display.current,
            display.total
        )),
        Line::from(format!("  Elapsed: {}", format_duration(elapsed))),
    ];

    if let Some(progress) = &progress {
        if let Some(file) = &progress.password_file {
            lines.push(Line::from(Span::styled(
                format!("  Waiting for password: {file}"),
                Style::default().fg(Color::Yellow),
            )));
        } else if !progress.current_file.is_empty() {
            lines.push(Line::from(format!("  Current: {}", progress.current_file)));
        }

        if !progress.errors.is_empty() {
            lines.push(Line::from(""));
            for error in &progress.errors {
                let color = if error.skipped { Color::Yellow } else { Color::Red };
                lines.push(Line::from(Span::styled(
                    format!("  {}: {}", error.file, error.error),
                    Style::default().fg(color),
                )));
            }
        }
    }

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_password_popup(frame: &mut Frame, app: &TuiApp) {
    let Some(popup) = app.controller.password_popup() else {
        return;
    };

    let area = centered(frame.area(), 60, 7);
    let block = Block::default()
        .title(format!("Password: {} (attempt {})", popup.file, popup.attempt))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let mut lines = Vec::new();
    if let Some(error) = &popup.error {
        lines.push(Line::from(Span::styled(
            format!(" {error}"),
            Style::default().fg(Color::Red),
        )));
    }
    lines.push(Line::from(format!(
        " > {}",
        "*".repeat(app.password.chars().count())
    )));
    lines.push(Line::from(Span::styled(
        " [Enter] Submit  [Tab] Skip  [Esc] Cancel import",
        Style::default().fg(Color::DarkGray),
    )));

    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(lines).block(block).wrap(Wrap { trim: false }),
        area,
    );
}

fn render_summary(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let summary = app.controller.summary().unwrap_or_default();
    let counts = Line::from(vec![
        Span::raw(format!("  {} files  ", summary.total_files)),
        Span::styled(
            format!("{} imported  ", summary.success_count),
            Style::default().fg(Color::Green),
        ),
        Span::styled(
            format!("{} failed  ", summary.failed_count),
            Style::default().fg(Color::Red),
        ),
        Span::styled(
            format!("{} skipped", summary.skipped_count),
            Style::default().fg(Color::Yellow),
        ),
    ]);
    let block = Block::default()
        .title("Import Complete")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    frame.render_widget(Paragraph::new(counts).block(block), chunks[0]);

    let results = app.controller.results().unwrap_or_default();
    let items: Vec<ListItem> = results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let is_selected = i == app.result_cursor;
            let style = if is_selected {
                Style::default()
                    .bg(Color::DarkGray)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };

            let icon = if result.success {
                Span::styled("✓", Style::default().fg(Color::Green))
            } else if result.skipped {
                Span::styled("•", Style::default().fg(Color::Yellow))
            } else {
                Span::styled("✗", Style::default().fg(Color::Red))
            };

            let mut spans = vec![
                Span::raw(if is_selected { "> " } else { "  " }),
                icon,
                Span::raw(format!("  {}", result.job.file_name())),
            ];
            if let Some(error) = &result.error {
                spans.push(Span::styled(
                    format!("  {error}"),
                    Style::default().fg(Color::DarkGray),
                ));
            }
            ListItem::new(Line::from(spans)).style(style)
        })
        .collect();

    let block = Block::default()
        .title("Results")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    frame.render_widget(List::new(items).block(block), chunks[1]);
}

fn render_cancelled(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title("Cancelled")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red));
    let text = Paragraph::new("  Import cancelled. Remaining keystores were not imported.")
        .block(block);
    frame.render_widget(text, area);
}

fn render_footer(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let help_text = match app.input_mode() {
        InputMode::Browse => {
            "[↑↓] Navigate  [Enter] Open/Toggle  [Space] Toggle  [d] Directory  [s] Start  [q] Quit"
        }
        InputMode::Progress => "[c] Cancel import  [q] Quit",
        InputMode::Password => "[Enter] Submit  [Tab] Skip file  [Esc] Cancel import",
        InputMode::Summary => {
            "[f] Failed  [s] Skipped  [a] All  [m] Manual passwords  [r] Selected  [Enter] Back  [q] Quit"
        }
        InputMode::Cancelled => "[Enter] Back  [q] Quit",
    };

    let mut spans = vec![Span::raw(format!("  {}", help_text))];

    if let Some(status) = &app.status {
        spans.push(Span::styled(
            format!("  Error: {}", status),
            Style::default().fg(Color::Red),
        ));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let paragraph = Paragraph::new(Line::from(spans)).block(block);
    frame.render_widget(paragraph, area);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let [area] = Layout::horizontal([Constraint::Length(width)])
        .flex(Flex::Center)
        .areas(area);
    let [area] = Layout::vertical([Constraint::Length(height)])
        .flex(Flex::Center)
        .areas(area);
    area
}

fn progress_bar(percentage: u8, width: usize) -> String {
    let percentage = percentage.min(100) as usize;
    let filled = (percentage * width) / 100;
    let empty = width - filled;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_fills_proportionally() {
        assert_eq!(progress_bar(50, 4), "[██░░]");
        assert_eq!(progress_bar(150, 2), "[██]");
    }

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3725), "1h 2m");
    }
}
