//! Runs slow session work on a tokio runtime and reports back over a channel.
//!
//! Every scheduled command carries a [`CommandId`]. Its completion is sent on
//! the completion channel tagged with the same id, unless the command was
//! cancelled first, in which case nothing is delivered.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::config::{AiConfig, DatabaseConfig, TimeoutConfig};
use crate::database::{DatabaseConnection, QueryResult};
use crate::error::{CommandError, Operation};
use crate::generator::{GeneratedSql, GenerationRequest, GeneratorError, SqlGenerator};
use crate::registry::BackendRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u64);

impl CommandId {
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The live database connection and SQL generator of a session.
#[derive(Clone)]
pub struct Backends {
    pub database: Arc<dyn DatabaseConnection>,
    pub generator: Arc<dyn SqlGenerator>,
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("driver", &self.database.driver())
            .field("provider", &self.generator.provider())
            .finish()
    }
}

pub enum Command {
    Connect,
    FetchSchema {
        connection: Arc<dyn DatabaseConnection>,
    },
    Generate {
        generator: Arc<dyn SqlGenerator>,
        request: GenerationRequest,
    },
    Execute {
        connection: Arc<dyn DatabaseConnection>,
        sql: String,
    },
}

impl Command {
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Self::Connect => Operation::Connect,
            Self::FetchSchema { .. } => Operation::FetchSchema,
            Self::Generate { .. } => Operation::Generate,
            Self::Execute { .. } => Operation::Execute,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("Connect"),
            Self::FetchSchema { .. } => f.write_str("FetchSchema"),
            Self::Generate { request, .. } => f
                .debug_struct("Generate")
                .field("prompt", &request.prompt)
                .finish_non_exhaustive(),
            Self::Execute { sql, .. } => f
                .debug_struct("Execute")
                .field("sql", sql)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug)]
pub struct ScheduledCommand {
    pub id: CommandId,
    pub command: Command,
}

#[derive(Debug)]
pub enum Completion {
    Connected(Result<Backends, CommandError>),
    SchemaLoaded(Result<String, CommandError>),
    SqlGenerated(Result<GeneratedSql, CommandError>),
    QueryExecuted(Result<QueryResult, CommandError>),
}

#[derive(Debug)]
pub struct CompletionMessage {
    pub id: CommandId,
    pub completion: Completion,
}

/// Per-operation time limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBudgets {
    pub connect: Duration,
    pub fetch_schema: Duration,
    pub generate: Duration,
    pub execute: Duration,
}

impl CommandBudgets {
    #[must_use]
    pub fn budget_for(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Connect => self.connect,
            Operation::FetchSchema => self.fetch_schema,
            Operation::Generate => self.generate,
            Operation::Execute => self.execute,
        }
    }
}

impl Default for CommandBudgets {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

impl From<&TimeoutConfig> for CommandBudgets {
    fn from(timeouts: &TimeoutConfig) -> Self {
        Self {
            connect: timeouts.connect(),
            fetch_schema: timeouts.schema(),
            generate: timeouts.ai(),
            execute: timeouts.query(),
        }
    }
}

#[derive(Clone)]
struct CommandContext {
    registry: Arc<BackendRegistry>,
    database_config: DatabaseConfig,
    ai_config: AiConfig,
}

pub struct Dispatcher {
    runtime: Handle,
    context: CommandContext,
    budgets: CommandBudgets,
    completions: UnboundedSender<CompletionMessage>,
    in_flight: HashMap<CommandId, AbortHandle>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        runtime: Handle,
        registry: Arc<BackendRegistry>,
        database_config: DatabaseConfig,
        ai_config: AiConfig,
        budgets: CommandBudgets,
        completions: UnboundedSender<CompletionMessage>,
    ) -> Self {
        Self {
            runtime,
            context: CommandContext {
                registry,
                database_config,
                ai_config,
            },
            budgets,
            completions,
            in_flight: HashMap::new(),
        }
    }

    /// Number of commands spawned and not yet finished or cancelled.
    #[must_use]
    pub fn in_flight(&mut self) -> usize {
        self.reap_finished();
        self.in_flight.len()
    }

    pub fn dispatch(&mut self, scheduled: ScheduledCommand) {
        self.reap_finished();

        let ScheduledCommand { id, command } = scheduled;
        let operation = command.operation();
        let budget = self.budgets.budget_for(operation);
        let context = self.context.clone();
        let completions = self.completions.clone();
        debug!(command = %id, %operation, "dispatching command");

        let handle = self.runtime.spawn(async move {
            let completion = run_command(command, context, budget).await;
            if completions
                .send(CompletionMessage { id, completion })
                .is_err()
            {
                debug!(command = %id, "completion dropped, receiver closed");
            }
        });
        self.in_flight.insert(id, handle.abort_handle());
    }

    /// Aborts a command. Its completion will never be delivered.
    pub fn cancel(&mut self, id: CommandId) -> bool {
        match self.in_flight.remove(&id) {
            Some(handle) => {
                handle.abort();
                debug!(command = %id, "cancelled command");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (id, handle) in self.in_flight.drain() {
            handle.abort();
            debug!(command = %id, "cancelled command on shutdown");
        }
    }

    fn reap_finished(&mut self) {
        self.in_flight.retain(|_, handle| !handle.is_finished());
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("budgets", &self.budgets)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

async fn run_command(command: Command, context: CommandContext, budget: Duration) -> Completion {
    let operation = command.operation();
    match command {
        Command::Connect => {
            Completion::Connected(bounded(operation, budget, connect_backends(context)).await)
        }
        Command::FetchSchema { connection } => {
            let fetch = async move { connection.schema().await.map_err(|err| err.to_string()) };
            Completion::SchemaLoaded(bounded(operation, budget, fetch).await)
        }
        Command::Generate { generator, request } => {
            let generate = async move {
                generate_sql(generator.as_ref(), &request)
                    .await
                    .map_err(|err| err.to_string())
            };
            Completion::SqlGenerated(bounded(operation, budget, generate).await)
        }
        Command::Execute { connection, sql } => {
            let execute = async move { connection.execute(&sql).await.map_err(|err| err.to_string()) };
            Completion::QueryExecuted(bounded(operation, budget, execute).await)
        }
    }
}

async fn bounded<T, F>(operation: Operation, budget: Duration, work: F) -> Result<T, CommandError>
where
    F: Future<Output = Result<T, String>>,
{
    match tokio::time::timeout(budget, work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => Err(CommandError::Failed { operation, message }),
        Err(_) => Err(CommandError::TimedOut {
            operation,
            after: budget,
        }),
    }
}

async fn connect_backends(context: CommandContext) -> Result<Backends, String> {
    let database = context
        .registry
        .connect(&context.database_config)
        .await
        .map_err(|err| err.to_string())?;

    match context.registry.create_generator(&context.ai_config) {
        Ok(generator) => Ok(Backends {
            database,
            generator,
        }),
        Err(err) => {
            if let Err(close_err) = database.close().await {
                warn!(error = %close_err, "failed to close database after provider setup failed");
            }
            Err(err.to_string())
        }
    }
}

async fn generate_sql(
    generator: &dyn SqlGenerator,
    request: &GenerationRequest,
) -> Result<GeneratedSql, GeneratorError> {
    if request.prompt.trim().is_empty() {
        return Err(GeneratorError::EmptyPrompt);
    }

    let generated = generator.generate(request).await?;
    generator.validate(&generated.sql)?;
    Ok(generated)
}
