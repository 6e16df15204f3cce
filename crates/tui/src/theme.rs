use askql_core::grid::CellRole;
use askql_core::session::StatusKind;
use ratatui::style::{Color, Modifier, Style};

pub const ACCENT: Color = Color::Rgb(0xFF, 0xB6, 0xC1);
pub const SEPARATOR: Color = Color::Rgb(0x66, 0x66, 0x66);
pub const CELL: Color = Color::Rgb(0xE0, 0xE0, 0xE0);
pub const ROW_SELECTED_BG: Color = Color::Rgb(0x1A, 0x1A, 0x1A);
pub const SUBTLE: Color = Color::Indexed(240);
pub const DANGER: Color = Color::Rgb(0xE8, 0x75, 0x80);
pub const ERROR: Color = Color::Rgb(0xE0, 0x6C, 0x75);
pub const SUCCESS: Color = Color::Rgb(0x98, 0xC3, 0x79);

pub const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

#[must_use]
pub fn cell_style(role: CellRole) -> Style {
    match role {
        CellRole::Border => Style::default().fg(SEPARATOR),
        CellRole::Header => Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        CellRole::HeaderSelected => Style::default()
            .fg(ACCENT)
            .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        CellRole::Cell => Style::default().fg(CELL),
        CellRole::RowSelected => Style::default().fg(CELL).bg(ROW_SELECTED_BG),
        CellRole::CellSelected => Style::default()
            .fg(Color::Black)
            .bg(ACCENT)
            .add_modifier(Modifier::BOLD),
        CellRole::Indicator => Style::default().fg(SUBTLE),
    }
}

#[must_use]
pub fn status_style(kind: StatusKind) -> Style {
    match kind {
        StatusKind::Info => Style::default().fg(SUBTLE),
        StatusKind::Success => Style::default().fg(SUCCESS),
        StatusKind::Warning => Style::default().fg(DANGER),
        StatusKind::Error => Style::default().fg(ERROR),
    }
}

#[must_use]
pub fn subtle() -> Style {
    Style::default().fg(SUBTLE)
}

#[must_use]
pub fn accent() -> Style {
    Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
}

#[must_use]
pub fn spinner_frame(tick: usize) -> &'static str {
    SPINNER_FRAMES[tick % SPINNER_FRAMES.len()]
}
