pub mod keymap;
pub mod theme;
pub mod view;

use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};

use askql_core::config::AppConfig;
use askql_core::dispatcher::{Backends, CommandBudgets, CompletionMessage, Dispatcher};
use askql_core::error::CommandError;
use askql_core::history::PromptHistory;
use askql_core::registry::BackendRegistry;
use askql_core::session::{
    Effect, ExitReason, Session, SessionEvent, SessionSettings, SessionState, StatusKind,
};
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{info, warn};

use crate::keymap::map_key_event;
use crate::view::{render, ViewContext};

const TICK_RATE: Duration = Duration::from_millis(100);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("{0}")]
    Startup(#[source] CommandError),
}

/// Runs the interactive session until the user quits or the connection fails.
pub fn run(
    config: AppConfig,
    registry: BackendRegistry,
    history: PromptHistory,
) -> Result<(), TuiError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(TuiError::Runtime)?;
    let mut app = TuiApp::new(&runtime, config, registry, history);

    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, &mut app);
    let restore_result = restore_terminal(&mut terminal);
    app.shutdown(&runtime);

    restore_result?;
    run_result?;

    match app.exit {
        Some(ExitReason::Fatal(error)) => Err(TuiError::Startup(error)),
        _ => Ok(()),
    }
}

struct TuiApp {
    session: Session,
    dispatcher: Dispatcher,
    completions: UnboundedReceiver<CompletionMessage>,
    connection_label: String,
    tick: usize,
    exit: Option<ExitReason>,
}

impl TuiApp {
    fn new(
        runtime: &Runtime,
        config: AppConfig,
        registry: BackendRegistry,
        history: PromptHistory,
    ) -> Self {
        let (sender, completions) = mpsc::unbounded_channel();
        let connection_label = connection_label(&config);
        let settings = SessionSettings::from(&config.ui);
        let budgets = CommandBudgets::from(&config.timeouts);
        let dispatcher = Dispatcher::new(
            runtime.handle().clone(),
            Arc::new(registry),
            config.database,
            config.ai,
            budgets,
            sender,
        );

        Self {
            session: Session::new(history, settings),
            dispatcher,
            completions,
            connection_label,
            tick: 0,
            exit: None,
        }
    }

    fn start(&mut self) {
        let effects = self.session.start();
        self.apply(effects);
    }

    fn handle(&mut self, event: SessionEvent) {
        let effects = self.session.handle(event);
        self.apply(effects);
    }

    fn drain_completions(&mut self) {
        while let Ok(message) = self.completions.try_recv() {
            self.handle(SessionEvent::Completed(message));
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Schedule(scheduled) => self.dispatcher.dispatch(scheduled),
                Effect::Cancel(id) => {
                    self.dispatcher.cancel(id);
                }
                Effect::CopyToClipboard(text) => self.copy_to_clipboard(&text),
                Effect::Exit(reason) => self.exit = Some(reason),
            }
        }
    }

    fn copy_to_clipboard(&mut self, text: &str) {
        let rows = text.lines().count().saturating_sub(1);
        let result = arboard::Clipboard::new().and_then(|mut clipboard| clipboard.set_text(text));
        match result {
            Ok(()) => self.session.set_status(
                StatusKind::Success,
                format!("✓ Copied {rows} rows as TSV"),
            ),
            Err(error) => {
                warn!(%error, "clipboard copy failed");
                self.session
                    .set_status(StatusKind::Error, format!("✗ Clipboard unavailable: {error}"));
            }
        }
    }

    fn view_context(&self) -> ViewContext {
        ViewContext {
            tick: self.tick,
            connection_label: self.connection_label.clone(),
        }
    }

    fn should_exit(&self) -> bool {
        self.exit.is_some() || self.session.state() == SessionState::Closed
    }

    /// Stops outstanding work and closes both backends.
    fn shutdown(&mut self, runtime: &Runtime) {
        self.dispatcher.cancel_all();
        let Some(backends) = self.session.take_backends() else {
            return;
        };

        runtime.block_on(close_backends(backends, CLOSE_TIMEOUT));
        info!("backends closed");
    }
}

/// Each backend gets its own `limit` to close.
async fn close_backends(backends: Backends, limit: Duration) {
    match tokio::time::timeout(limit, backends.database.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!(%error, "failed to close database connection"),
        Err(_) => warn!("timed out closing database connection"),
    }
    match tokio::time::timeout(limit, backends.generator.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!(%error, "failed to close SQL generator"),
        Err(_) => warn!("timed out closing SQL generator"),
    }
}

fn connection_label(config: &AppConfig) -> String {
    let mut label = format!(
        "Connected to {} • AI: {}",
        config.database.driver, config.ai.provider
    );
    if let Some(model) = config.ai.model() {
        label.push_str(&format!(" ({model})"));
    }
    label
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut TuiApp,
) -> Result<(), TuiError> {
    let size = terminal.size()?;
    app.handle(SessionEvent::Resize {
        width: size.width,
        height: size.height,
    });
    app.start();
    let mut last_tick = Instant::now();

    loop {
        let context = app.view_context();
        terminal.draw(|frame| render(frame, &app.session, &context))?;

        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if let Some(action) = map_key_event(key) {
                        app.handle(SessionEvent::Action(action));
                    }
                }
                Event::Resize(width, height) => {
                    app.handle(SessionEvent::Resize { width, height });
                }
                _ => {}
            }
        }

        app.drain_completions();

        if last_tick.elapsed() >= TICK_RATE {
            app.tick = app.tick.wrapping_add(1);
            last_tick = Instant::now();
        }

        if app.should_exit() {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use askql_core::config::{AiConfig, AppConfig, DatabaseConfig, DriverKind, ProviderKind};
    use askql_core::database::{
        CellValue, Connector, DatabaseConnection, DatabaseError, QueryResult, QueryRow,
    };
    use askql_core::dispatcher::Backends;
    use askql_core::generator::{
        GeneratedSql, GenerationRequest, GeneratorError, GeneratorFactory, SqlGenerator, Usage,
    };
    use askql_core::history::PromptHistory;
    use askql_core::registry::BackendRegistry;
    use askql_core::session::{ExitReason, SessionEvent, SessionState, UserAction};
    use async_trait::async_trait;

    use super::{close_backends, connection_label, TuiApp};

    #[derive(Default)]
    struct StubConnection {
        closed: AtomicUsize,
    }

    #[async_trait]
    impl DatabaseConnection for StubConnection {
        fn driver(&self) -> DriverKind {
            DriverKind::Sqlite
        }

        async fn schema(&self) -> Result<String, DatabaseError> {
            Ok("DATABASE SCHEMA:\n\nTABLE: users\n".to_string())
        }

        async fn execute(&self, _sql: &str) -> Result<QueryResult, DatabaseError> {
            Ok(QueryResult::new(
                vec!["id".to_string()],
                vec![QueryRow::new(vec![CellValue::Int(7)])],
            ))
        }

        async fn close(&self) -> Result<(), DatabaseError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubConnector {
        connection: Arc<StubConnection>,
        fail: bool,
    }

    #[async_trait]
    impl Connector for StubConnector {
        async fn connect(
            &self,
            _config: &DatabaseConfig,
        ) -> Result<Arc<dyn DatabaseConnection>, DatabaseError> {
            if self.fail {
                return Err(DatabaseError::new("connection refused"));
            }
            Ok(self.connection.clone())
        }
    }

    struct StubGenerator;

    #[async_trait]
    impl SqlGenerator for StubGenerator {
        fn provider(&self) -> &str {
            "stub"
        }

        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GeneratedSql, GeneratorError> {
            Ok(GeneratedSql {
                sql: "SELECT id FROM users".to_string(),
                explanation: None,
                usage: Usage::default(),
            })
        }
    }

    struct StuckGenerator;

    #[async_trait]
    impl SqlGenerator for StuckGenerator {
        fn provider(&self) -> &str {
            "stuck"
        }

        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GeneratedSql, GeneratorError> {
            Err(GeneratorError::EmptyResponse {
                provider: "stuck".to_string(),
            })
        }

        async fn close(&self) -> Result<(), GeneratorError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    struct StubFactory;

    impl GeneratorFactory for StubFactory {
        fn create(&self, _config: &AiConfig) -> Result<Arc<dyn SqlGenerator>, GeneratorError> {
            Ok(Arc::new(StubGenerator))
        }
    }

    fn config() -> AppConfig {
        AppConfig {
            database: DatabaseConfig::new(DriverKind::Sqlite),
            ai: AiConfig::new(ProviderKind::Ollama),
            ..AppConfig::default()
        }
    }

    fn registry(connection: Arc<StubConnection>, fail: bool) -> BackendRegistry {
        BackendRegistry::new()
            .with_connector(
                DriverKind::Sqlite,
                Arc::new(StubConnector { connection, fail }),
            )
            .with_generator(ProviderKind::Ollama, Arc::new(StubFactory))
    }

    fn wait_for(app: &mut TuiApp, done: impl Fn(&TuiApp) -> bool) {
        for _ in 0..200 {
            app.drain_completions();
            if done(app) {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached, state is {:?}", app.session.state());
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("runtime should build")
    }

    #[test]
    fn app_connects_generates_and_shuts_down() {
        let runtime = runtime();
        let connection = Arc::new(StubConnection::default());
        let mut app = TuiApp::new(
            &runtime,
            config(),
            registry(connection.clone(), false),
            PromptHistory::in_memory(),
        );
        app.handle(SessionEvent::Resize {
            width: 80,
            height: 24,
        });
        app.start();
        wait_for(&mut app, |app| app.session.state() == SessionState::Ready);
        assert!(app.session.schema_text().contains("TABLE: users"));

        for ch in "show users".chars() {
            app.handle(SessionEvent::Action(UserAction::Insert(ch)));
        }
        app.handle(SessionEvent::Action(UserAction::Submit));
        wait_for(&mut app, |app| app.session.grid().is_some());
        assert_eq!(app.session.generated_sql(), "SELECT id FROM users");
        assert_eq!(app.session.prompt_history().entries(), ["show users"]);

        app.handle(SessionEvent::Action(UserAction::Quit));
        assert!(matches!(app.exit, Some(ExitReason::Quit)));
        assert!(app.should_exit());

        app.shutdown(&runtime);
        assert_eq!(connection.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stuck_generator_close_is_bounded() {
        let runtime = runtime();
        let connection = Arc::new(StubConnection::default());
        let backends = Backends {
            database: connection.clone(),
            generator: Arc::new(StuckGenerator),
        };

        let started = Instant::now();
        runtime.block_on(close_backends(backends, Duration::from_millis(50)));

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(connection.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connection_failure_is_fatal() {
        let runtime = runtime();
        let mut app = TuiApp::new(
            &runtime,
            config(),
            registry(Arc::new(StubConnection::default()), true),
            PromptHistory::in_memory(),
        );
        app.start();
        wait_for(&mut app, |app| app.exit.is_some());

        match &app.exit {
            Some(ExitReason::Fatal(error)) => {
                assert!(error.to_string().contains("connection refused"));
            }
            other => panic!("expected fatal exit, got {other:?}"),
        }
        assert_eq!(app.session.state(), SessionState::Closed);
    }

    #[test]
    fn label_names_driver_provider_and_model() {
        let mut config = config();
        assert_eq!(connection_label(&config), "Connected to sqlite • AI: ollama");

        config.ai.model = Some("llama3.2".to_string());
        assert_eq!(
            connection_label(&config),
            "Connected to sqlite • AI: ollama (llama3.2)"
        );
    }
}
