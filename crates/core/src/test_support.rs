use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{AiConfig, DatabaseConfig, DriverKind};
use crate::database::{
    CellValue, Connector, DatabaseConnection, DatabaseError, QueryResult, QueryRow,
};
use crate::generator::{
    GeneratedSql, GenerationRequest, GeneratorError, GeneratorFactory, SqlGenerator, Usage,
};

pub(crate) fn user_rows(count: usize) -> QueryResult {
    let rows = (1..=count)
        .map(|id| {
            QueryRow::new(vec![
                CellValue::Int(i64::try_from(id).unwrap_or_default()),
                CellValue::Text(format!("user{id}@example.com")),
            ])
        })
        .collect();
    QueryResult::new(vec!["id".to_string(), "email".to_string()], rows)
}

pub(crate) struct FakeConnection {
    driver: DriverKind,
    schema: Result<String, DatabaseError>,
    result: Result<QueryResult, DatabaseError>,
    delay: Duration,
    executed: Mutex<Vec<String>>,
    close_calls: AtomicUsize,
}

impl Default for FakeConnection {
    fn default() -> Self {
        Self {
            driver: DriverKind::Sqlite,
            schema: Ok("DATABASE SCHEMA:\n\nTABLE: users\n".to_string()),
            result: Ok(user_rows(2)),
            delay: Duration::ZERO,
            executed: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeConnection {
    pub(crate) fn with_result(mut self, result: QueryResult) -> Self {
        self.result = Ok(result);
        self
    }

    pub(crate) fn with_execute_error(mut self, message: &str) -> Self {
        self.result = Err(DatabaseError::new(message));
        self
    }

    pub(crate) fn with_schema_error(mut self, message: &str) -> Self {
        self.schema = Err(DatabaseError::new(message));
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|executed| executed.clone())
            .unwrap_or_default()
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseConnection for FakeConnection {
    fn driver(&self) -> DriverKind {
        self.driver
    }

    async fn schema(&self) -> Result<String, DatabaseError> {
        self.schema.clone()
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult, DatabaseError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(sql.to_string());
        }
        self.result.clone()
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeConnector {
    connection: Arc<FakeConnection>,
    failure: Option<String>,
    connect_calls: AtomicUsize,
}

impl FakeConnector {
    pub(crate) fn new(connection: Arc<FakeConnection>) -> Self {
        Self {
            connection,
            failure: None,
            connect_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _config: &DatabaseConfig,
    ) -> Result<Arc<dyn DatabaseConnection>, DatabaseError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(DatabaseError::new(message.clone()));
        }
        Ok(self.connection.clone())
    }
}

pub(crate) struct FakeGenerator {
    response: Result<String, GeneratorError>,
    delay: Duration,
    requests: Mutex<Vec<GenerationRequest>>,
    close_calls: AtomicUsize,
}

impl Default for FakeGenerator {
    fn default() -> Self {
        Self::returning("SELECT * FROM users")
    }
}

impl FakeGenerator {
    pub(crate) fn returning(sql: &str) -> Self {
        Self {
            response: Ok(sql.to_string()),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(error: GeneratorError) -> Self {
        Self {
            response: Err(error),
            ..Self::default()
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlGenerator for FakeGenerator {
    fn provider(&self) -> &str {
        "fake"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedSql, GeneratorError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let sql = self.response.clone()?;
        Ok(GeneratedSql {
            sql,
            explanation: None,
            usage: Usage {
                provider: "fake".to_string(),
                model: "fake-1".to_string(),
                prompt_tokens: 12,
                response_tokens: 4,
                total_tokens: 16,
                cached_tokens: 0,
            },
        })
    }

    async fn close(&self) -> Result<(), GeneratorError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeGeneratorFactory {
    generator: Arc<FakeGenerator>,
    failure: Option<GeneratorError>,
}

impl FakeGeneratorFactory {
    pub(crate) fn new(generator: Arc<FakeGenerator>) -> Self {
        Self {
            generator,
            failure: None,
        }
    }

    pub(crate) fn failing(error: GeneratorError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }
}

impl GeneratorFactory for FakeGeneratorFactory {
    fn create(&self, _config: &AiConfig) -> Result<Arc<dyn SqlGenerator>, GeneratorError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(self.generator.clone())
    }
}
