//! The interactive session: a synchronous state machine over user actions,
//! terminal resizes, and command completions.
//!
//! [`Session::handle`] never blocks. Slow work is requested by returning
//! [`Effect::Schedule`]; the driver hands it to the dispatcher and feeds the
//! completion back as [`SessionEvent::Completed`]. Only the completion of the
//! most recently scheduled command is accepted, so a cancelled or superseded
//! command can never change the session.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::UiConfig;
use crate::conversation::{ConversationEntry, ConversationWindow};
use crate::database::QueryResult;
use crate::dispatcher::{Backends, Command, CommandId, Completion, CompletionMessage, ScheduledCommand};
use crate::error::{CommandError, Operation};
use crate::generator::{GeneratedSql, GenerationRequest, SelectedCell, Usage};
use crate::grid::{ResultGrid, DEFAULT_MAX_COLUMN_WIDTH};
use crate::history::{PromptHistory, RecallDirection};
use crate::safe_mode::{assess_sql_safety, SqlRiskReason};

pub const MAX_INPUT_CHARS: usize = 500;
pub const RAW_SQL_PREFIX: char = '#';
/// Rows taken by the command bar below the results area.
pub const COMMAND_BAR_HEIGHT: u16 = 6;
pub const TABLE_PADDING_HORIZONTAL: u16 = 4;
pub const TABLE_PADDING_VERTICAL: u16 = 2;
pub const DEFAULT_CONVERSATION_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    LoadingSchema,
    Ready,
    Thinking,
    Executing,
    Confirming,
    HistoryBrowse,
    InfoView,
    Closed,
}

impl SessionState {
    /// States waiting on a dispatched command.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::LoadingSchema | Self::Thinking | Self::Executing
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Insert(char),
    Backspace,
    Submit,
    Escape,
    Navigate(Direction),
    PageUp,
    PageDown,
    RecallOlder,
    RecallNewer,
    OpenHistory,
    OpenInfo,
    ClearHistory,
    CopyGrid,
    Quit,
}

#[derive(Debug)]
pub enum SessionEvent {
    Action(UserAction),
    Resize { width: u16, height: u16 },
    Completed(CompletionMessage),
}

#[derive(Debug)]
pub enum ExitReason {
    Quit,
    Fatal(CommandError),
}

#[derive(Debug)]
pub enum Effect {
    Schedule(ScheduledCommand),
    Cancel(CommandId),
    CopyToClipboard(String),
    Exit(ExitReason),
}

/// What the results area shows for the last operation.
#[derive(Debug)]
pub enum Outcome {
    Idle,
    Succeeded { rows_affected: Option<u64> },
    GenerationFailed(CommandError),
    ExecutionFailed(CommandError),
    ResultReady(ResultGrid),
}

impl Outcome {
    #[must_use]
    pub fn grid(&self) -> Option<&ResultGrid> {
        match self {
            Self::ResultReady(grid) => Some(grid),
            _ => None,
        }
    }

    fn grid_mut(&mut self) -> Option<&mut ResultGrid> {
        match self {
            Self::ResultReady(grid) => Some(grid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Warning,
    Error,
}

/// One-shot message shown until the next key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub kind: StatusKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub max_column_width: usize,
    pub conversation_window: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_column_width: DEFAULT_MAX_COLUMN_WIDTH,
            conversation_window: DEFAULT_CONVERSATION_WINDOW,
        }
    }
}

impl From<&UiConfig> for SessionSettings {
    fn from(ui: &UiConfig) -> Self {
        Self {
            max_column_width: ui.max_column_width,
            conversation_window: ui.max_query_history,
        }
    }
}

/// Snapshot of prompt history, newest first, with a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryBrowser {
    entries: Vec<String>,
    selected: usize,
}

impl HistoryBrowser {
    fn new(entries: Vec<String>) -> Self {
        Self {
            entries,
            selected: 0,
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    #[must_use]
    pub fn selected(&self) -> usize {
        self.selected
    }

    #[must_use]
    pub fn selected_entry(&self) -> Option<&str> {
        self.entries.get(self.selected).map(String::as_str)
    }

    fn move_up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    fn move_down(&mut self) {
        if self.selected + 1 < self.entries.len() {
            self.selected += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub width: u16,
    pub height: u16,
}

impl Viewport {
    /// Area left for the grid once the command bar and padding are taken.
    #[must_use]
    pub fn table_area(self) -> (usize, usize) {
        let width = self.width.saturating_sub(TABLE_PADDING_HORIZONTAL);
        let height = self
            .height
            .saturating_sub(COMMAND_BAR_HEIGHT)
            .saturating_sub(TABLE_PADDING_VERTICAL);
        (usize::from(width), usize::from(height))
    }
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    backends: Option<Backends>,
    schema_text: String,
    schema_warning: Option<String>,
    input: String,
    current_prompt: String,
    generated_sql: String,
    last_usage: Option<Usage>,
    pending_risks: Vec<SqlRiskReason>,
    outcome: Outcome,
    status: Option<StatusMessage>,
    prompt_history: PromptHistory,
    history_cursor: Option<usize>,
    history_browser: Option<HistoryBrowser>,
    conversation: ConversationWindow,
    viewport: Viewport,
    settings: SessionSettings,
    next_command: u64,
    awaiting: Option<CommandId>,
}

impl Session {
    #[must_use]
    pub fn new(prompt_history: PromptHistory, settings: SessionSettings) -> Self {
        Self {
            state: SessionState::Connecting,
            backends: None,
            schema_text: String::new(),
            schema_warning: None,
            input: String::new(),
            current_prompt: String::new(),
            generated_sql: String::new(),
            last_usage: None,
            pending_risks: Vec::new(),
            outcome: Outcome::Idle,
            status: None,
            prompt_history,
            history_cursor: None,
            history_browser: None,
            conversation: ConversationWindow::new(settings.conversation_window),
            viewport: Viewport::default(),
            settings,
            next_command: 0,
            awaiting: None,
        }
    }

    /// Schedules the initial connection.
    pub fn start(&mut self) -> Vec<Effect> {
        if self.state != SessionState::Connecting || self.awaiting.is_some() {
            return Vec::new();
        }
        info!("connecting");
        vec![self.schedule(Command::Connect)]
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }

        match event {
            SessionEvent::Resize { width, height } => {
                self.resize(width, height);
                Vec::new()
            }
            SessionEvent::Action(action) => self.on_action(action),
            SessionEvent::Completed(message) => self.on_completion(message),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }

    #[must_use]
    pub fn current_prompt(&self) -> &str {
        &self.current_prompt
    }

    #[must_use]
    pub fn generated_sql(&self) -> &str {
        &self.generated_sql
    }

    #[must_use]
    pub fn schema_text(&self) -> &str {
        &self.schema_text
    }

    #[must_use]
    pub fn schema_warning(&self) -> Option<&str> {
        self.schema_warning.as_deref()
    }

    #[must_use]
    pub fn pending_risks(&self) -> &[SqlRiskReason] {
        &self.pending_risks
    }

    #[must_use]
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    #[must_use]
    pub fn grid(&self) -> Option<&ResultGrid> {
        self.outcome.grid()
    }

    #[must_use]
    pub fn status(&self) -> Option<&StatusMessage> {
        self.status.as_ref()
    }

    #[must_use]
    pub fn prompt_history(&self) -> &PromptHistory {
        &self.prompt_history
    }

    #[must_use]
    pub fn history_cursor(&self) -> Option<usize> {
        self.history_cursor
    }

    #[must_use]
    pub fn history_browser(&self) -> Option<&HistoryBrowser> {
        self.history_browser.as_ref()
    }

    #[must_use]
    pub fn conversation(&self) -> &ConversationWindow {
        &self.conversation
    }

    #[must_use]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_status(&mut self, kind: StatusKind, text: impl Into<String>) {
        self.status = Some(StatusMessage {
            kind,
            text: text.into(),
        });
    }

    /// Hands the backends to the caller for shutdown.
    pub fn take_backends(&mut self) -> Option<Backends> {
        self.backends.take()
    }

    fn on_action(&mut self, action: UserAction) -> Vec<Effect> {
        if action != UserAction::CopyGrid {
            self.status = None;
        }

        if action == UserAction::Quit {
            return self.quit();
        }

        match self.state {
            SessionState::Ready => self.on_ready_action(action),
            SessionState::Confirming => self.on_confirm_action(action),
            SessionState::HistoryBrowse => self.on_history_action(action),
            SessionState::InfoView => {
                if action == UserAction::Escape {
                    self.state = SessionState::Ready;
                }
                Vec::new()
            }
            SessionState::Thinking | SessionState::Executing => {
                if action == UserAction::Escape {
                    self.cancel_in_flight()
                } else {
                    Vec::new()
                }
            }
            SessionState::Connecting | SessionState::LoadingSchema | SessionState::Closed => {
                Vec::new()
            }
        }
    }

    fn on_ready_action(&mut self, action: UserAction) -> Vec<Effect> {
        match action {
            UserAction::Insert(ch) => {
                if !ch.is_control() && self.input.chars().count() < MAX_INPUT_CHARS {
                    self.input.push(ch);
                }
            }
            UserAction::Backspace => {
                self.input.pop();
            }
            UserAction::Escape => {
                self.input.clear();
                self.history_cursor = None;
            }
            UserAction::Submit => return self.submit(),
            UserAction::Navigate(direction) => {
                if let Some(grid) = self.outcome.grid_mut() {
                    match direction {
                        Direction::Up => grid.move_up(),
                        Direction::Down => grid.move_down(),
                        Direction::Left => grid.move_left(),
                        Direction::Right => grid.move_right(),
                    }
                }
            }
            UserAction::PageUp => {
                if let Some(grid) = self.outcome.grid_mut() {
                    grid.page_up();
                }
            }
            UserAction::PageDown => {
                if let Some(grid) = self.outcome.grid_mut() {
                    grid.page_down();
                }
            }
            UserAction::RecallOlder => self.recall(RecallDirection::Older),
            UserAction::RecallNewer => self.recall(RecallDirection::Newer),
            UserAction::OpenHistory => {
                self.history_browser = Some(HistoryBrowser::new(self.prompt_history.newest_first()));
                self.state = SessionState::HistoryBrowse;
            }
            UserAction::OpenInfo => {
                if !self.conversation.is_empty() {
                    self.state = SessionState::InfoView;
                }
            }
            UserAction::CopyGrid => return self.copy_grid(),
            UserAction::ClearHistory | UserAction::Quit => {}
        }
        Vec::new()
    }

    fn on_confirm_action(&mut self, action: UserAction) -> Vec<Effect> {
        match action {
            UserAction::Insert('y' | 'Y') => {
                info!(sql = %self.generated_sql, "dangerous query confirmed");
                self.pending_risks.clear();
                self.execute_generated()
            }
            UserAction::Insert('n' | 'N') | UserAction::Escape => {
                info!(sql = %self.generated_sql, "dangerous query discarded");
                self.pending_risks.clear();
                self.generated_sql.clear();
                self.current_prompt.clear();
                self.state = SessionState::Ready;
                self.set_status(StatusKind::Info, "Query discarded");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_history_action(&mut self, action: UserAction) -> Vec<Effect> {
        match action {
            UserAction::Navigate(Direction::Up) | UserAction::Insert('k') => {
                if let Some(browser) = self.history_browser.as_mut() {
                    browser.move_up();
                }
            }
            UserAction::Navigate(Direction::Down) | UserAction::Insert('j') => {
                if let Some(browser) = self.history_browser.as_mut() {
                    browser.move_down();
                }
            }
            UserAction::Submit => {
                if let Some(entry) = self
                    .history_browser
                    .as_ref()
                    .and_then(HistoryBrowser::selected_entry)
                {
                    self.input = entry.to_string();
                }
                self.close_history_browser();
            }
            UserAction::Escape => self.close_history_browser(),
            UserAction::ClearHistory => {
                self.prompt_history.clear();
                self.history_cursor = None;
                self.persist_history();
                self.close_history_browser();
                self.set_status(StatusKind::Info, "History cleared");
            }
            _ => {}
        }
        Vec::new()
    }

    fn close_history_browser(&mut self) {
        self.history_browser = None;
        self.state = SessionState::Ready;
    }

    fn submit(&mut self) -> Vec<Effect> {
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return Vec::new();
        }
        if text.eq_ignore_ascii_case("exit") || text.eq_ignore_ascii_case("quit") {
            return self.quit();
        }

        let Some(backends) = self.backends.clone() else {
            self.set_status(StatusKind::Error, "Not connected");
            return Vec::new();
        };

        if let Some(raw_sql) = text.strip_prefix(RAW_SQL_PREFIX) {
            let raw_sql = raw_sql.trim();
            if raw_sql.is_empty() {
                self.set_status(StatusKind::Warning, "Nothing to run after #");
                return Vec::new();
            }
            self.begin_operation(&text);
            self.generated_sql = raw_sql.to_string();
            return self.gate_sql();
        }

        let selected_cell = self.selected_cell();
        self.begin_operation(&text);
        self.state = SessionState::Thinking;
        let request = GenerationRequest {
            prompt: text,
            schema: self.schema_text.clone(),
            dialect: Some(backends.database.driver()),
            conversation: self.conversation.snapshot(),
            selected_cell,
        };
        vec![self.schedule(Command::Generate {
            generator: backends.generator,
            request,
        })]
    }

    /// Clears the previous outcome and remembers what was asked.
    fn begin_operation(&mut self, prompt: &str) {
        self.input.clear();
        self.history_cursor = None;
        self.current_prompt = prompt.to_string();
        self.generated_sql.clear();
        self.last_usage = None;
        self.pending_risks.clear();
        self.outcome = Outcome::Idle;
    }

    /// NULL cells carry no useful context and are left out.
    fn selected_cell(&self) -> Option<SelectedCell> {
        let grid = self.outcome.grid()?;
        let value = grid.selected_value().filter(|value| !value.is_null())?;
        Some(SelectedCell {
            column: grid.selected_column()?.to_string(),
            value: value.to_string(),
        })
    }

    fn gate_sql(&mut self) -> Vec<Effect> {
        let dangerous = match &self.backends {
            Some(backends) => backends.generator.is_dangerous(&self.generated_sql),
            None => true,
        };

        if dangerous {
            self.pending_risks = assess_sql_safety(&self.generated_sql).reasons;
            self.state = SessionState::Confirming;
            debug!(sql = %self.generated_sql, "awaiting confirmation");
            return Vec::new();
        }

        self.execute_generated()
    }

    fn execute_generated(&mut self) -> Vec<Effect> {
        let Some(connection) = self
            .backends
            .as_ref()
            .map(|backends| Arc::clone(&backends.database))
        else {
            self.state = SessionState::Ready;
            self.set_status(StatusKind::Error, "Not connected");
            return Vec::new();
        };

        self.state = SessionState::Executing;
        vec![self.schedule(Command::Execute {
            connection,
            sql: self.generated_sql.clone(),
        })]
    }

    fn cancel_in_flight(&mut self) -> Vec<Effect> {
        let Some(id) = self.awaiting.take() else {
            return Vec::new();
        };

        let operation = if self.state == SessionState::Thinking {
            Operation::Generate
        } else {
            Operation::Execute
        };
        info!(command = %id, %operation, "cancelled by user");

        self.input = std::mem::take(&mut self.current_prompt);
        self.generated_sql.clear();
        self.state = SessionState::Ready;
        self.set_status(StatusKind::Warning, format!("Cancelled {operation}"));
        vec![Effect::Cancel(id)]
    }

    fn recall(&mut self, direction: RecallDirection) {
        if self.prompt_history.is_empty() {
            return;
        }
        self.history_cursor = self.prompt_history.step_cursor(self.history_cursor, direction);
        self.input = self
            .history_cursor
            .and_then(|offset| self.prompt_history.recall(offset))
            .map(str::to_string)
            .unwrap_or_default();
    }

    fn copy_grid(&mut self) -> Vec<Effect> {
        match self.outcome.grid() {
            Some(grid) => vec![Effect::CopyToClipboard(grid.export_tsv())],
            None => {
                self.set_status(StatusKind::Warning, "No results to copy");
                Vec::new()
            }
        }
    }

    fn quit(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(id) = self.awaiting.take() {
            effects.push(Effect::Cancel(id));
        }
        self.persist_history();
        self.state = SessionState::Closed;
        info!("session closed");
        effects.push(Effect::Exit(ExitReason::Quit));
        effects
    }

    fn resize(&mut self, width: u16, height: u16) {
        self.viewport = Viewport { width, height };
        let (table_width, table_height) = self.viewport.table_area();
        if let Some(grid) = self.outcome.grid_mut() {
            grid.set_viewport(table_width, table_height);
        }
    }

    fn schedule(&mut self, command: Command) -> Effect {
        self.next_command += 1;
        let id = CommandId::new(self.next_command);
        self.awaiting = Some(id);
        debug!(command = %id, operation = %command.operation(), "scheduling command");
        Effect::Schedule(ScheduledCommand { id, command })
    }

    fn on_completion(&mut self, message: CompletionMessage) -> Vec<Effect> {
        if self.awaiting != Some(message.id) {
            debug!(command = %message.id, "ignoring stale completion");
            return Vec::new();
        }
        self.awaiting = None;

        match message.completion {
            Completion::Connected(result) => self.on_connected(result),
            Completion::SchemaLoaded(result) => {
                self.on_schema_loaded(result);
                Vec::new()
            }
            Completion::SqlGenerated(result) => self.on_sql_generated(result),
            Completion::QueryExecuted(result) => {
                self.on_query_executed(result);
                Vec::new()
            }
        }
    }

    fn on_connected(&mut self, result: Result<Backends, CommandError>) -> Vec<Effect> {
        match result {
            Ok(backends) => {
                info!(?backends, "connected");
                let connection = Arc::clone(&backends.database);
                self.backends = Some(backends);
                self.state = SessionState::LoadingSchema;
                vec![self.schedule(Command::FetchSchema { connection })]
            }
            Err(err) => {
                warn!(error = %err, "connection failed");
                self.state = SessionState::Closed;
                self.set_status(StatusKind::Error, err.to_string());
                vec![Effect::Exit(ExitReason::Fatal(err))]
            }
        }
    }

    fn on_schema_loaded(&mut self, result: Result<String, CommandError>) {
        match result {
            Ok(schema) => {
                debug!(bytes = schema.len(), "schema loaded");
                self.schema_text = schema;
                self.schema_warning = None;
            }
            Err(err) => {
                warn!(error = %err, "continuing without schema");
                self.schema_text.clear();
                self.set_status(
                    StatusKind::Warning,
                    format!("Schema unavailable, continuing without it: {err}"),
                );
                self.schema_warning = Some(err.to_string());
            }
        }
        self.state = SessionState::Ready;
    }

    fn on_sql_generated(&mut self, result: Result<GeneratedSql, CommandError>) -> Vec<Effect> {
        match result {
            Ok(generated) => {
                debug!(sql = %generated.sql, "sql generated");
                self.generated_sql = generated.sql;
                self.last_usage = Some(generated.usage);
                self.gate_sql()
            }
            Err(err) => {
                warn!(error = %err, "sql generation failed");
                self.set_status(StatusKind::Error, format!("✗ {err}"));
                self.outcome = Outcome::GenerationFailed(err);
                self.current_prompt.clear();
                self.state = SessionState::Ready;
                Vec::new()
            }
        }
    }

    fn on_query_executed(&mut self, result: Result<QueryResult, CommandError>) {
        if self.prompt_history.push(&self.current_prompt) {
            self.persist_history();
        }
        if !self.current_prompt.is_empty() && !self.generated_sql.is_empty() {
            self.conversation.push(ConversationEntry::new(
                self.current_prompt.clone(),
                self.generated_sql.clone(),
                self.last_usage.clone(),
            ));
        }

        match result {
            Ok(result) => {
                let row_count = result.row_count();
                let rows_affected = result.rows_affected;
                info!(rows = row_count, ?rows_affected, "query executed");
                let message = match (row_count, rows_affected) {
                    (0, Some(affected)) => {
                        format!("✓ Query executed successfully ({affected} rows affected)")
                    }
                    (rows, _) => format!("✓ Query executed successfully ({rows} rows)"),
                };
                self.set_status(StatusKind::Success, message);

                let (width, height) = self.viewport.table_area();
                self.outcome =
                    match ResultGrid::from_result(result, self.settings.max_column_width, width, height) {
                        Some(grid) => Outcome::ResultReady(grid),
                        None => Outcome::Succeeded { rows_affected },
                    };
            }
            Err(err) => {
                warn!(error = %err, "query execution failed");
                self.set_status(StatusKind::Error, format!("✗ {err}"));
                self.outcome = Outcome::ExecutionFailed(err);
            }
        }

        self.current_prompt.clear();
        self.history_cursor = None;
        self.state = SessionState::Ready;
    }

    fn persist_history(&self) {
        if let Err(err) = self.prompt_history.persist() {
            warn!(error = %err, "failed to save prompt history");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::{
        Direction, Effect, ExitReason, Outcome, Session, SessionEvent, SessionSettings,
        SessionState, StatusKind, UserAction,
    };
    use crate::database::{CellValue, DatabaseConnection, QueryResult, QueryRow};
    use crate::dispatcher::{Backends, Command, CommandId, Completion, CompletionMessage};
    use crate::error::{CommandError, Operation};
    use crate::generator::{GeneratedSql, SqlGenerator, Usage};
    use crate::history::PromptHistory;
    use crate::test_support::{user_rows, FakeConnection, FakeGenerator};

    fn backends() -> Backends {
        let database: Arc<dyn DatabaseConnection> = Arc::new(FakeConnection::default());
        let generator: Arc<dyn SqlGenerator> = Arc::new(FakeGenerator::default());
        Backends {
            database,
            generator,
        }
    }

    fn scheduled(effects: &[Effect]) -> (CommandId, &Command) {
        effects
            .iter()
            .find_map(|effect| match effect {
                Effect::Schedule(scheduled) => Some((scheduled.id, &scheduled.command)),
                _ => None,
            })
            .expect("a command should be scheduled")
    }

    fn complete(session: &mut Session, id: CommandId, completion: Completion) -> Vec<Effect> {
        session.handle(SessionEvent::Completed(CompletionMessage { id, completion }))
    }

    fn act(session: &mut Session, action: UserAction) -> Vec<Effect> {
        session.handle(SessionEvent::Action(action))
    }

    fn type_text(session: &mut Session, text: &str) {
        for ch in text.chars() {
            act(session, UserAction::Insert(ch));
        }
    }

    fn generated(sql: &str) -> GeneratedSql {
        GeneratedSql {
            sql: sql.to_string(),
            explanation: None,
            usage: Usage {
                provider: "fake".to_string(),
                model: "fake-1".to_string(),
                total_tokens: 10,
                ..Usage::default()
            },
        }
    }

    fn ready_session_with(history: PromptHistory) -> Session {
        let mut session = Session::new(history, SessionSettings::default());
        session.handle(SessionEvent::Resize {
            width: 100,
            height: 40,
        });
        let effects = session.start();
        let (connect_id, _) = scheduled(&effects);
        let effects = complete(&mut session, connect_id, Completion::Connected(Ok(backends())));
        assert_eq!(session.state(), SessionState::LoadingSchema);
        let (schema_id, command) = scheduled(&effects);
        assert!(matches!(command, Command::FetchSchema { .. }));
        complete(
            &mut session,
            schema_id,
            Completion::SchemaLoaded(Ok("DATABASE SCHEMA:\n\nTABLE: users\n".to_string())),
        );
        assert_eq!(session.state(), SessionState::Ready);
        session
    }

    fn ready_session() -> Session {
        ready_session_with(PromptHistory::in_memory())
    }

    /// Runs a raw SQL submission through to a successful execution.
    fn run_raw(session: &mut Session, sql: &str, result: QueryResult) {
        type_text(session, &format!("#{sql}"));
        let effects = act(session, UserAction::Submit);
        if session.state() == SessionState::Confirming {
            let effects = act(session, UserAction::Insert('y'));
            let (id, _) = scheduled(&effects);
            complete(session, id, Completion::QueryExecuted(Ok(result)));
        } else {
            let (id, _) = scheduled(&effects);
            complete(session, id, Completion::QueryExecuted(Ok(result)));
        }
        assert_eq!(session.state(), SessionState::Ready);
    }

    fn run_prompt(session: &mut Session, prompt: &str, sql: &str) {
        type_text(session, prompt);
        let effects = act(session, UserAction::Submit);
        let (id, _) = scheduled(&effects);
        let effects = complete(session, id, Completion::SqlGenerated(Ok(generated(sql))));
        let (id, _) = scheduled(&effects);
        complete(session, id, Completion::QueryExecuted(Ok(user_rows(2))));
    }

    #[test]
    fn natural_language_select_runs_without_confirmation() {
        let mut session = ready_session();
        type_text(&mut session, "show all users");
        let effects = act(&mut session, UserAction::Submit);

        assert_eq!(session.state(), SessionState::Thinking);
        assert_eq!(session.input(), "");
        let (id, command) = scheduled(&effects);
        let Command::Generate { request, .. } = command else {
            panic!("expected a generate command");
        };
        assert_eq!(request.prompt, "show all users");
        assert!(request.schema.contains("TABLE: users"));

        let effects = complete(
            &mut session,
            id,
            Completion::SqlGenerated(Ok(generated("SELECT * FROM users;"))),
        );
        assert_eq!(session.state(), SessionState::Executing);
        let (id, command) = scheduled(&effects);
        assert!(matches!(command, Command::Execute { sql, .. } if sql == "SELECT * FROM users;"));

        complete(&mut session, id, Completion::QueryExecuted(Ok(user_rows(2))));
        assert_eq!(session.state(), SessionState::Ready);
        let grid = session.grid().expect("grid should be shown");
        assert_eq!(grid.row_count(), 2);
        assert_eq!(session.generated_sql(), "SELECT * FROM users;");
        assert_eq!(session.current_prompt(), "");
        assert_eq!(
            session.status().map(|status| status.text.as_str()),
            Some("✓ Query executed successfully (2 rows)")
        );
    }

    #[test]
    fn dangerous_raw_sql_waits_for_confirmation_and_can_be_rejected() {
        let mut session = ready_session();
        type_text(&mut session, "#DELETE FROM users");
        let effects = act(&mut session, UserAction::Submit);

        assert!(effects.is_empty());
        assert_eq!(session.state(), SessionState::Confirming);
        assert_eq!(session.generated_sql(), "DELETE FROM users");
        assert_eq!(session.current_prompt(), "#DELETE FROM users");
        assert!(!session.pending_risks().is_empty());

        assert!(act(&mut session, UserAction::Insert('x')).is_empty());
        assert_eq!(session.state(), SessionState::Confirming);

        let effects = act(&mut session, UserAction::Insert('n'));
        assert!(effects.is_empty());
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.generated_sql(), "");
        assert!(session.prompt_history().is_empty());
    }

    #[test]
    fn cte_led_statements_skip_confirmation() {
        let mut session = ready_session();
        type_text(&mut session, "#WITH t AS (SELECT 1) UPDATE users SET a = 1");
        let effects = act(&mut session, UserAction::Submit);

        assert_eq!(session.state(), SessionState::Executing);
        let (_, command) = scheduled(&effects);
        assert!(matches!(command, Command::Execute { sql, .. } if sql.starts_with("WITH t AS")));
    }

    #[test]
    fn confirming_dangerous_sql_executes_it() {
        let mut session = ready_session();
        type_text(&mut session, "#  UPDATE users SET active = 1  ");
        act(&mut session, UserAction::Submit);
        assert_eq!(session.state(), SessionState::Confirming);

        let effects = act(&mut session, UserAction::Insert('Y'));
        assert_eq!(session.state(), SessionState::Executing);
        let (id, command) = scheduled(&effects);
        assert!(matches!(command, Command::Execute { sql, .. } if sql == "UPDATE users SET active = 1"));

        complete(&mut session, id, Completion::QueryExecuted(Ok(QueryResult::affected(3))));
        assert!(matches!(
            session.outcome(),
            Outcome::Succeeded {
                rows_affected: Some(3)
            }
        ));
        assert_eq!(
            session.status().map(|status| status.text.as_str()),
            Some("✓ Query executed successfully (3 rows affected)")
        );
    }

    #[test]
    fn schema_failure_degrades_to_ready_with_empty_schema() {
        let mut session = Session::new(PromptHistory::in_memory(), SessionSettings::default());
        let effects = session.start();
        let (id, _) = scheduled(&effects);
        let effects = complete(&mut session, id, Completion::Connected(Ok(backends())));
        let (id, _) = scheduled(&effects);

        complete(
            &mut session,
            id,
            Completion::SchemaLoaded(Err(CommandError::failed(
                Operation::FetchSchema,
                "permission denied",
            ))),
        );

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.schema_text(), "");
        assert!(session
            .schema_warning()
            .is_some_and(|warning| warning.contains("permission denied")));
        assert_eq!(
            session.status().map(|status| status.kind),
            Some(StatusKind::Warning)
        );
    }

    #[test]
    fn connection_failure_is_fatal() {
        let mut session = Session::new(PromptHistory::in_memory(), SessionSettings::default());
        let effects = session.start();
        let (id, _) = scheduled(&effects);

        let effects = complete(
            &mut session,
            id,
            Completion::Connected(Err(CommandError::failed(Operation::Connect, "refused"))),
        );

        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            effects.as_slice(),
            [Effect::Exit(ExitReason::Fatal(err))] if err.to_string().contains("refused")
        ));
        assert!(act(&mut session, UserAction::Insert('a')).is_empty());
    }

    #[test]
    fn generation_error_returns_to_ready_without_grid() {
        let mut session = ready_session();
        run_raw(&mut session, "SELECT 1", user_rows(1));
        assert!(session.grid().is_some());

        type_text(&mut session, "gibberish");
        let effects = act(&mut session, UserAction::Submit);
        let (id, _) = scheduled(&effects);
        complete(
            &mut session,
            id,
            Completion::SqlGenerated(Err(CommandError::failed(Operation::Generate, "rate limited"))),
        );

        assert_eq!(session.state(), SessionState::Ready);
        assert!(matches!(session.outcome(), Outcome::GenerationFailed(_)));
        assert!(session.grid().is_none());
        assert_eq!(session.prompt_history().entries(), ["#SELECT 1"]);
    }

    #[test]
    fn execution_error_still_records_history_and_conversation() {
        let mut session = ready_session();
        type_text(&mut session, "#SELECT * FROM nope");
        let effects = act(&mut session, UserAction::Submit);
        let (id, _) = scheduled(&effects);
        complete(
            &mut session,
            id,
            Completion::QueryExecuted(Err(CommandError::failed(
                Operation::Execute,
                "relation \"nope\" does not exist",
            ))),
        );

        assert!(matches!(session.outcome(), Outcome::ExecutionFailed(_)));
        assert_eq!(session.prompt_history().entries(), ["#SELECT * FROM nope"]);
        assert_eq!(session.conversation().len(), 1);
    }

    #[test]
    fn history_drops_only_consecutive_duplicates() {
        let mut session = ready_session();
        for sql in ["SELECT 1", "SELECT 1", "SELECT 2", "SELECT 1"] {
            run_raw(&mut session, sql, user_rows(1));
        }

        assert_eq!(
            session.prompt_history().entries(),
            ["#SELECT 1", "#SELECT 2", "#SELECT 1"]
        );
    }

    #[test]
    fn conversation_keeps_last_five_executions() {
        let mut session = ready_session();
        for n in 1..=7 {
            run_prompt(&mut session, &format!("prompt {n}"), &format!("SELECT {n}"));
        }

        let conversation = session.conversation();
        assert_eq!(conversation.len(), 5);
        assert_eq!(conversation.get(0).map(|e| e.prompt.as_str()), Some("prompt 3"));
        assert_eq!(conversation.last().map(|e| e.sql.as_str()), Some("SELECT 7"));
        assert!(conversation
            .last()
            .and_then(|entry| entry.usage.as_ref())
            .is_some_and(|usage| usage.total_tokens == 10));
    }

    #[test]
    fn generation_request_carries_selected_cell_and_conversation() {
        let mut session = ready_session();
        run_prompt(&mut session, "list users", "SELECT * FROM users");
        act(&mut session, UserAction::Navigate(Direction::Down));
        act(&mut session, UserAction::Navigate(Direction::Right));

        type_text(&mut session, "sessions for this one");
        let effects = act(&mut session, UserAction::Submit);
        let (_, command) = scheduled(&effects);
        let Command::Generate { request, .. } = command else {
            panic!("expected a generate command");
        };

        let cell = request.selected_cell.as_ref().expect("cell should be attached");
        assert_eq!(cell.column, "email");
        assert_eq!(cell.value, "user2@example.com");
        assert_eq!(request.conversation.len(), 1);
        assert_eq!(request.conversation[0].prompt, "list users");
        assert!(session.grid().is_none());
    }

    #[test]
    fn null_selected_cell_is_not_sent_as_context() {
        let mut session = ready_session();
        run_raw(
            &mut session,
            "SELECT name FROM t",
            QueryResult::new(
                vec!["name".to_string()],
                vec![QueryRow::new(vec![CellValue::Null])],
            ),
        );
        assert!(session.grid().is_some());

        type_text(&mut session, "filter by this");
        let effects = act(&mut session, UserAction::Submit);
        let (_, command) = scheduled(&effects);
        let Command::Generate { request, .. } = command else {
            panic!("expected a generate command");
        };
        assert_eq!(request.selected_cell, None);
    }

    #[test]
    fn stale_completion_after_cancel_is_ignored() {
        let mut session = ready_session();
        type_text(&mut session, "slow question");
        let effects = act(&mut session, UserAction::Submit);
        let (stale_id, _) = scheduled(&effects);

        let effects = act(&mut session, UserAction::Escape);
        assert!(matches!(effects.as_slice(), [Effect::Cancel(id)] if *id == stale_id));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.input(), "slow question");

        let effects = complete(
            &mut session,
            stale_id,
            Completion::SqlGenerated(Ok(generated("DELETE FROM users"))),
        );
        assert!(effects.is_empty());
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.generated_sql(), "");
    }

    #[test]
    fn resize_keeps_selection_visible() {
        let mut session = ready_session();
        run_raw(&mut session, "SELECT * FROM big", user_rows(100));
        for _ in 0..49 {
            act(&mut session, UserAction::Navigate(Direction::Down));
        }

        for (width, height) in [(60, 20), (200, 80), (20, 9), (100, 40)] {
            session.handle(SessionEvent::Resize { width, height });
            let grid = session.grid().expect("grid should remain");
            assert_eq!(grid.selected_row(), 49);
            assert!(grid.visible_rows().contains(&49));
            assert_eq!(grid.viewport(), session.viewport().table_area());
        }
    }

    #[test]
    fn grid_is_sized_to_the_table_area() {
        let mut session = ready_session();
        run_raw(&mut session, "SELECT 1", user_rows(3));

        let grid = session.grid().expect("grid should be shown");
        assert_eq!(grid.viewport(), (96, 32));
    }

    #[test]
    fn recall_walks_history_and_escape_clears() {
        let mut history = PromptHistory::in_memory();
        history.push("first");
        history.push("second");
        let mut session = ready_session_with(history);

        act(&mut session, UserAction::RecallOlder);
        assert_eq!(session.input(), "second");
        act(&mut session, UserAction::RecallOlder);
        act(&mut session, UserAction::RecallOlder);
        assert_eq!(session.input(), "first");
        act(&mut session, UserAction::RecallNewer);
        assert_eq!(session.input(), "second");
        act(&mut session, UserAction::RecallNewer);
        assert_eq!(session.input(), "");
        assert_eq!(session.history_cursor(), None);

        act(&mut session, UserAction::RecallOlder);
        act(&mut session, UserAction::Escape);
        assert_eq!(session.input(), "");
        assert_eq!(session.history_cursor(), None);
    }

    #[test]
    fn history_browser_selects_and_clears_entries() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("history");
        let mut history = PromptHistory::load_from_path(&path).expect("history should load");
        history.push("oldest");
        history.push("newest");
        let mut session = ready_session_with(history);

        act(&mut session, UserAction::OpenHistory);
        assert_eq!(session.state(), SessionState::HistoryBrowse);
        let browser = session.history_browser().expect("browser should be open");
        assert_eq!(browser.entries(), ["newest", "oldest"]);

        act(&mut session, UserAction::Insert('j'));
        act(&mut session, UserAction::Navigate(Direction::Down));
        act(&mut session, UserAction::Submit);
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.input(), "oldest");

        act(&mut session, UserAction::OpenHistory);
        act(&mut session, UserAction::ClearHistory);
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.prompt_history().is_empty());
        let reloaded = PromptHistory::load_from_path(&path).expect("history should reload");
        assert!(reloaded.is_empty());
    }

    #[test]
    fn info_view_needs_a_conversation() {
        let mut session = ready_session();
        act(&mut session, UserAction::OpenInfo);
        assert_eq!(session.state(), SessionState::Ready);

        run_raw(&mut session, "SELECT 1", user_rows(1));
        act(&mut session, UserAction::OpenInfo);
        assert_eq!(session.state(), SessionState::InfoView);
        act(&mut session, UserAction::Insert('a'));
        assert_eq!(session.state(), SessionState::InfoView);
        act(&mut session, UserAction::Escape);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn copy_exports_grid_as_tsv() {
        let mut session = ready_session();
        assert!(act(&mut session, UserAction::CopyGrid).is_empty());
        assert_eq!(
            session.status().map(|status| status.kind),
            Some(StatusKind::Warning)
        );

        run_raw(&mut session, "SELECT 1", user_rows(1));
        let effects = act(&mut session, UserAction::CopyGrid);
        assert!(matches!(
            effects.as_slice(),
            [Effect::CopyToClipboard(tsv)] if tsv == "id\temail\n1\tuser1@example.com\n"
        ));
    }

    #[test]
    fn input_is_capped_and_status_clears_on_key() {
        let mut session = ready_session();
        session.set_status(StatusKind::Info, "hello");
        type_text(&mut session, &"x".repeat(600));

        assert_eq!(session.input().chars().count(), 500);
        assert!(session.status().is_none());

        act(&mut session, UserAction::Backspace);
        assert_eq!(session.input().chars().count(), 499);
    }

    #[test]
    fn exit_input_and_quit_key_persist_history() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("history");
        let mut history = PromptHistory::load_from_path(&path).expect("history should load");
        history.push("kept across runs");
        let mut session = ready_session_with(history);

        type_text(&mut session, "exit");
        let effects = act(&mut session, UserAction::Submit);
        assert!(matches!(effects.as_slice(), [Effect::Exit(ExitReason::Quit)]));
        assert_eq!(session.state(), SessionState::Closed);

        let reloaded = PromptHistory::load_from_path(&path).expect("history should reload");
        assert_eq!(reloaded.entries(), ["kept across runs"]);
    }

    #[test]
    fn quit_while_busy_cancels_the_command() {
        let mut session = ready_session();
        type_text(&mut session, "anything");
        let effects = act(&mut session, UserAction::Submit);
        let (id, _) = scheduled(&effects);

        let effects = act(&mut session, UserAction::Quit);
        assert!(matches!(
            effects.as_slice(),
            [Effect::Cancel(cancelled), Effect::Exit(ExitReason::Quit)] if *cancelled == id
        ));
        assert!(session.take_backends().is_some());
    }

    #[test]
    fn empty_raw_sql_is_rejected() {
        let mut session = ready_session();
        type_text(&mut session, "#   ");
        let effects = act(&mut session, UserAction::Submit);

        assert!(effects.is_empty());
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(
            session.status().map(|status| status.kind),
            Some(StatusKind::Warning)
        );
    }
}
