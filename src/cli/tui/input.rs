//! Input handling for the TUI.

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use super::app::{Action, InputMode};
use crate::core::retry::RetryStrategy;

/// Convert a crossterm key event to an Action for the current screen.
pub fn handle_key_event(key: KeyEvent, mode: InputMode) -> Option<Action> {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Some(Action::Quit);
    }

    match mode {
        InputMode::Browse => match key.code {
            KeyCode::Char('q') => Some(Action::Quit),
            KeyCode::Up | KeyCode::Char('k') => Some(Action::Up),
            KeyCode::Down | KeyCode::Char('j') => Some(Action::Down),
            KeyCode::Enter | KeyCode::Right | KeyCode::Char('l') => Some(Action::Open),
            KeyCode::Backspace | KeyCode::Left | KeyCode::Char('h') => Some(Action::Parent),
            KeyCode::Char(' ') => Some(Action::Toggle),
            KeyCode::Char('d') => Some(Action::PickDirectory),
            KeyCode::Char('s') => Some(Action::Start),
            KeyCode::F(5) | KeyCode::Char('r') => Some(Action::Refresh),
            _ => None,
        },
        InputMode::Progress => match key.code {
            KeyCode::Char('q') => Some(Action::Quit),
            KeyCode::Esc | KeyCode::Char('c') => Some(Action::Cancel),
            _ => None,
        },
        InputMode::Password => match key.code {
            KeyCode::Enter => Some(Action::Submit),
            KeyCode::Esc => Some(Action::Cancel),
            KeyCode::Tab => Some(Action::Skip),
            KeyCode::Backspace => Some(Action::DeleteChar),
            KeyCode::Char(c) => Some(Action::Input(c)),
            _ => None,
        },
        InputMode::Summary => match key.code {
            KeyCode::Char('q') => Some(Action::Quit),
            KeyCode::Up | KeyCode::Char('k') => Some(Action::Up),
            KeyCode::Down | KeyCode::Char('j') => Some(Action::Down),
            KeyCode::Char('f') => Some(Action::Retry(RetryStrategy::Failed)),
            KeyCode::Char('s') => Some(Action::Retry(RetryStrategy::Skipped)),
            KeyCode::Char('a') => Some(Action::Retry(RetryStrategy::AllNonSuccessful)),
            KeyCode::Char('m') => Some(Action::Retry(RetryStrategy::ManualPasswords)),
            KeyCode::Char('r') => Some(Action::RetrySelected),
            KeyCode::Enter | KeyCode::Esc => Some(Action::Back),
            _ => None,
        },
        InputMode::Cancelled => match key.code {
            KeyCode::Char('q') => Some(Action::Quit),
            KeyCode::Enter | KeyCode::Esc => Some(Action::Back),
            _ => None,
        },
    }
}

/// Convert a crossterm Event to an Action.
pub fn handle_event(event: Event, mode: InputMode) -> Option<Action> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => handle_key_event(key, mode),
        _ => None,
    }
}
