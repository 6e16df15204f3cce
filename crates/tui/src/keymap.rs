use askql_core::session::{Direction, UserAction};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

pub fn map_key_event(key: KeyEvent) -> Option<UserAction> {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('q')) => Some(UserAction::Quit),
        (KeyModifiers::CONTROL, KeyCode::Char('c')) => Some(UserAction::CopyGrid),
        (KeyModifiers::CONTROL, KeyCode::Char('r')) => Some(UserAction::OpenHistory),
        (KeyModifiers::CONTROL, KeyCode::Char('p')) => Some(UserAction::OpenInfo),
        (KeyModifiers::CONTROL, KeyCode::Char('d')) => Some(UserAction::ClearHistory),
        (KeyModifiers::CONTROL, KeyCode::Up) => Some(UserAction::RecallOlder),
        (KeyModifiers::CONTROL, KeyCode::Down) => Some(UserAction::RecallNewer),
        (_, KeyCode::Up) => Some(UserAction::Navigate(Direction::Up)),
        (_, KeyCode::Down) => Some(UserAction::Navigate(Direction::Down)),
        (_, KeyCode::Left) => Some(UserAction::Navigate(Direction::Left)),
        (_, KeyCode::Right) => Some(UserAction::Navigate(Direction::Right)),
        (_, KeyCode::PageUp) => Some(UserAction::PageUp),
        (_, KeyCode::PageDown) => Some(UserAction::PageDown),
        (_, KeyCode::Enter) => Some(UserAction::Submit),
        (_, KeyCode::Esc) => Some(UserAction::Escape),
        (_, KeyCode::Backspace) => Some(UserAction::Backspace),
        (modifiers, KeyCode::Char(ch))
            if !modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
        {
            Some(UserAction::Insert(ch))
        }
        _ => None,
    }
}
