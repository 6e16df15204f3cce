//! Frame rendering for every session state.
//!
//! Views only read the session; all mutation goes through `Session::handle`.

use askql_core::grid::RenderedLine;
use askql_core::session::{
    Outcome, Session, SessionState, COMMAND_BAR_HEIGHT, TABLE_PADDING_HORIZONTAL,
    TABLE_PADDING_VERTICAL,
};
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Margin, Position, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Frame;

use crate::theme;

const LOGO: [&str; 8] = [
    " ░▒▓██████▓▒░ ░▒▓███████▓▒░░▒▓██████▓▒░░▒▓█▓▒░      ░▒▓█▓▒░",
    "░▒▓█▓▒░░▒▓█▓▒░▒▓█▓▒░      ░▒▓█▓▒░░▒▓█▓▒░▒▓█▓▒░      ░▒▓█▓▒░",
    "░▒▓█▓▒░░▒▓█▓▒░▒▓█▓▒░      ░▒▓█▓▒░░▒▓█▓▒░▒▓█▓▒░      ░▒▓█▓▒░",
    "░▒▓████████▓▒░░▒▓██████▓▒░░▒▓█▓▒░░▒▓█▓▒░▒▓█▓▒░      ░▒▓█▓▒░",
    "░▒▓█▓▒░░▒▓█▓▒░      ░▒▓█▓▒░▒▓█▓▒░░▒▓█▓▒░▒▓█▓▒░      ░▒▓█▓▒░",
    "░▒▓█▓▒░░▒▓█▓▒░      ░▒▓█▓▒░▒▓█▓▒░░▒▓█▓▒░▒▓█▓▒░      ░▒▓█▓▒░",
    "░▒▓█▓▒░░▒▓█▓▒░▒▓███████▓▒░ ░▒▓██████▓▒░░▒▓████████▓▒░▒▓█▓▒░",
    "                             ░▒▓█▓▒░                        ",
];
const TAGLINE: &str = "AI-POWERED SQL CLIENT";

const READY_HINT: &str = "Use # for raw SQL or ask me anything • Type 'exit' to quit";
const CONFIRM_PROMPT: &str = "⚠ DANGEROUS QUERY - Proceed? (y/n)";
const HELP_LINE: &str = "↑↓←→: table navigation • Ctrl+↑↓: history • Ctrl+r: history list • Ctrl+p: prompt info • Ctrl+c: copy as TSV • Esc: prompt clear • Ctrl+q: quit";
const HISTORY_HELP: &str = "↑↓ navigate • Enter select • Ctrl+d clear history • Esc back";
const INFO_HELP: &str = "Esc back";
const INPUT_PROMPT: &str = "> ";
const INPUT_PLACEHOLDER: &str = "Enter your query...";
const SQL_LABEL: &str = "SQL: ";

const EXAMPLES: [&str; 4] = [
    "show me all users from Italy",
    "count active subscriptions by plan",
    "list top 10 customers by revenue",
    "# SELECT * FROM users WHERE created_at > NOW() - INTERVAL '7 days'",
];

/// Frontend-owned details that the session does not track.
#[derive(Debug, Clone, Default)]
pub struct ViewContext {
    pub tick: usize,
    pub connection_label: String,
}

pub fn render(frame: &mut Frame<'_>, session: &Session, context: &ViewContext) {
    match session.state() {
        SessionState::Connecting | SessionState::LoadingSchema => {
            render_loading_screen(frame, session, context);
        }
        SessionState::HistoryBrowse => render_history(frame, session),
        SessionState::InfoView => render_info(frame, session),
        _ => render_main_screen(frame, session, context),
    }
}

fn render_loading_screen(frame: &mut Frame<'_>, session: &Session, context: &ViewContext) {
    let message = if session.state() == SessionState::Connecting {
        "Connecting to database..."
    } else {
        "Loading schema..."
    };

    let mut lines = logo_lines();
    lines.push(Line::from(""));
    lines.push(Line::styled(
        format!("{} {message}", theme::spinner_frame(context.tick)),
        theme::subtle(),
    ));

    let area = frame.area();
    let content = vertically_centered(area, lines.len());
    frame.render_widget(
        Paragraph::new(lines).alignment(Alignment::Center),
        content,
    );
}

fn render_main_screen(frame: &mut Frame<'_>, session: &Session, context: &ViewContext) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(COMMAND_BAR_HEIGHT)])
        .split(frame.area());

    render_results_area(frame, session, context, chunks[0]);
    render_command_bar(frame, session, context, chunks[1]);
}

fn render_results_area(frame: &mut Frame<'_>, session: &Session, context: &ViewContext, area: Rect) {
    let padded = area.inner(Margin::new(
        TABLE_PADDING_HORIZONTAL / 2,
        TABLE_PADDING_VERTICAL / 2,
    ));

    let paragraph = match session.outcome() {
        Outcome::ResultReady(grid) => {
            Paragraph::new(grid.render().into_iter().map(styled_grid_line).collect::<Vec<_>>())
        }
        Outcome::GenerationFailed(err) => wrapped(vec![Line::styled(
            format!("✗ AI Generation Error: {err}"),
            Style::default().fg(theme::ERROR).add_modifier(Modifier::BOLD),
        )]),
        Outcome::ExecutionFailed(err) => wrapped(vec![Line::styled(
            format!("✗ Query Execution Error: {err}"),
            Style::default().fg(theme::ERROR).add_modifier(Modifier::BOLD),
        )]),
        Outcome::Succeeded { rows_affected } => wrapped(vec![
            Line::styled(
                "✓ Query executed successfully",
                Style::default().fg(theme::SUCCESS).add_modifier(Modifier::BOLD),
            ),
            Line::styled(
                format!("({} rows affected)", rows_affected.unwrap_or(0)),
                theme::subtle(),
            ),
        ]),
        Outcome::Idle => {
            render_welcome(frame, session, context, area);
            return;
        }
    };

    frame.render_widget(paragraph, padded);
}

fn wrapped(lines: Vec<Line<'static>>) -> Paragraph<'static> {
    Paragraph::new(lines).wrap(Wrap { trim: false })
}

fn render_welcome(frame: &mut Frame<'_>, session: &Session, context: &ViewContext, area: Rect) {
    let text = Style::default().fg(theme::CELL);
    let example = Style::default().fg(theme::SUCCESS);

    let mut lines = logo_lines();
    lines.push(Line::from(""));
    if !context.connection_label.is_empty() {
        lines.push(Line::styled(context.connection_label.clone(), theme::subtle()));
        lines.push(Line::from(""));
    }
    lines.push(Line::styled(
        "Ask questions about your database in natural language",
        text,
    ));
    lines.push(Line::from(vec![
        Span::styled("or use ", theme::subtle()),
        Span::styled("#", example),
        Span::styled(" prefix for raw SQL queries", theme::subtle()),
    ]));
    lines.push(Line::from(""));
    lines.push(Line::styled("Examples:", theme::accent()));
    for sample in EXAMPLES {
        lines.push(Line::from(vec![
            Span::styled("• ", text),
            Span::styled(sample, example),
        ]));
    }
    if let Some(warning) = session.schema_warning() {
        lines.push(Line::from(""));
        lines.push(Line::styled(
            format!("Schema unavailable: {warning}"),
            Style::default().fg(theme::DANGER),
        ));
    }

    let content = vertically_centered(area, lines.len());
    frame.render_widget(
        Paragraph::new(lines).alignment(Alignment::Center),
        content,
    );
}

/// SQL, divider, status, input, divider, help.
fn render_command_bar(frame: &mut Frame<'_>, session: &Session, context: &ViewContext, area: Rect) {
    let width = usize::from(area.width);
    let divider = Line::styled("─".repeat(width), Style::default().fg(theme::ACCENT));

    let sql_line = if session.generated_sql().is_empty() {
        Line::from("")
    } else {
        Line::from(vec![
            Span::styled(SQL_LABEL, theme::accent()),
            Span::styled(
                single_line_sql(session.generated_sql(), width.saturating_sub(6)),
                Style::default().fg(theme::SUCCESS),
            ),
        ])
    };

    let (input_line, cursor_offset) = input_line(session.input(), width);
    let lines = vec![
        sql_line,
        divider.clone(),
        status_line(session, context),
        input_line,
        divider,
        Line::styled(HELP_LINE, theme::subtle()),
    ];
    frame.render_widget(Paragraph::new(lines), area);

    if session.state() == SessionState::Ready && area.height > 3 {
        let max_x = area.width.saturating_sub(1);
        let x = u16::try_from(cursor_offset).unwrap_or(max_x).min(max_x);
        frame.set_cursor_position(Position::new(area.x + x, area.y + 3));
    }
}

fn status_line(session: &Session, context: &ViewContext) -> Line<'static> {
    if let Some(status) = session.status() {
        return Line::styled(status.text.clone(), theme::status_style(status.kind));
    }

    let spinner = theme::spinner_frame(context.tick);
    match session.state() {
        SessionState::Connecting => busy_line(spinner, "Connecting"),
        SessionState::LoadingSchema => busy_line(spinner, "Loading schema"),
        SessionState::Thinking => busy_line(spinner, "Thinking"),
        SessionState::Executing => busy_line(spinner, "Executing query"),
        SessionState::Confirming => {
            let mut spans = vec![Span::styled(
                CONFIRM_PROMPT,
                Style::default().fg(theme::DANGER).add_modifier(Modifier::BOLD),
            )];
            let risks = session
                .pending_risks()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            if !risks.is_empty() {
                spans.push(Span::styled(
                    format!("  {}", risks.join(", ")),
                    theme::subtle(),
                ));
            }
            Line::from(spans)
        }
        SessionState::Ready => Line::styled(READY_HINT, theme::subtle()),
        _ => Line::from(""),
    }
}

fn busy_line(spinner: &str, label: &str) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{spinner} "), theme::accent()),
        Span::styled(label.to_string(), theme::subtle()),
    ])
}

/// Input line plus the column where the cursor sits.
fn input_line(input: &str, width: usize) -> (Line<'static>, usize) {
    let prompt = Span::styled(INPUT_PROMPT, theme::accent());
    if input.is_empty() {
        let line = Line::from(vec![
            prompt,
            Span::styled(INPUT_PLACEHOLDER, theme::subtle()),
        ]);
        return (line, INPUT_PROMPT.len());
    }

    let room = width.saturating_sub(INPUT_PROMPT.len() + 1).max(1);
    let count = input.chars().count();
    let visible = input.chars().skip(count.saturating_sub(room)).collect::<String>();
    let cursor = INPUT_PROMPT.len() + Line::from(visible.as_str()).width();
    let line = Line::from(vec![
        prompt,
        Span::styled(visible, Style::default().fg(theme::CELL)),
    ]);
    (line, cursor)
}

/// Collapses whitespace and truncates with `...` to `max_chars`.
fn single_line_sql(sql: &str, max_chars: usize) -> String {
    let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut out = collapsed
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect::<String>();
    out.push_str("...");
    out
}

fn render_history(frame: &mut Frame<'_>, session: &Session) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(frame.area());

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme::SEPARATOR))
        .title(Span::styled(" History ", theme::accent()));
    let visible = usize::from(block.inner(chunks[0]).height).max(1);

    let lines = match session.history_browser() {
        Some(browser) if !browser.entries().is_empty() => {
            let selected = browser.selected();
            let start = selected.saturating_sub(visible.saturating_sub(1));
            browser
                .entries()
                .iter()
                .enumerate()
                .skip(start)
                .take(visible)
                .map(|(index, entry)| {
                    if index == selected {
                        Line::styled(format!("> {entry}"), theme::accent())
                    } else {
                        Line::styled(format!("  {entry}"), Style::default().fg(theme::CELL))
                    }
                })
                .collect()
        }
        _ => vec![Line::styled("No history yet", theme::subtle())],
    };

    frame.render_widget(Paragraph::new(lines).block(block), chunks[0]);
    frame.render_widget(
        Paragraph::new(Line::styled(HISTORY_HELP, theme::subtle())),
        chunks[1],
    );
}

fn render_info(frame: &mut Frame<'_>, session: &Session) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(frame.area());

    let conversation = session.conversation();
    let mut lines = vec![Line::styled(
        format!(
            "Last {} of {} prompts sent as context",
            conversation.len(),
            conversation.total_entries_seen()
        ),
        theme::subtle(),
    )];

    for (index, entry) in conversation.iter().enumerate() {
        lines.push(Line::from(""));
        lines.push(Line::from(vec![
            Span::styled(format!("{}. ", index + 1), theme::accent()),
            Span::styled(entry.prompt.clone(), Style::default().fg(theme::CELL)),
        ]));
        lines.push(Line::from(vec![
            Span::styled("   SQL: ", theme::subtle()),
            Span::styled(entry.sql.clone(), Style::default().fg(theme::SUCCESS)),
        ]));
        let usage = match &entry.usage {
            Some(usage) => {
                let mut text = format!(
                    "   {} {} • prompt {} • response {} • total {}",
                    usage.provider,
                    usage.model,
                    usage.prompt_tokens,
                    usage.response_tokens,
                    usage.total_tokens
                );
                if usage.cached_tokens > 0 {
                    text.push_str(&format!(" • cached {}", usage.cached_tokens));
                }
                text
            }
            None => "   raw SQL, no tokens used".to_string(),
        };
        lines.push(Line::styled(usage, theme::subtle()));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme::SEPARATOR))
        .title(Span::styled(" Prompt info ", theme::accent()));
    frame.render_widget(
        Paragraph::new(lines).block(block).wrap(Wrap { trim: false }),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(Line::styled(INFO_HELP, theme::subtle())),
        chunks[1],
    );
}

fn styled_grid_line(line: RenderedLine) -> Line<'static> {
    Line::from(
        line.into_iter()
            .map(|segment| Span::styled(segment.text, theme::cell_style(segment.role)))
            .collect::<Vec<_>>(),
    )
}

fn logo_lines() -> Vec<Line<'static>> {
    let logo = Style::default().fg(theme::ACCENT);
    let mut lines = LOGO
        .iter()
        .map(|line| Line::styled(*line, logo))
        .collect::<Vec<_>>();
    lines.push(Line::from(vec![
        Span::styled("░▒▓██▓▒░ ", logo),
        Span::styled(TAGLINE, Style::default().fg(theme::CELL)),
    ]));
    lines
}

fn vertically_centered(area: Rect, content_height: usize) -> Rect {
    let height = u16::try_from(content_height)
        .unwrap_or(area.height)
        .min(area.height);
    let top = (area.height - height) / 2;
    Rect {
        x: area.x,
        y: area.y + top,
        width: area.width,
        height,
    }
}
