pub mod ai;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

use askql_core::config::{DriverKind, ProviderKind};
use askql_core::registry::BackendRegistry;

/// Registry with every bundled database driver and AI provider.
#[must_use]
pub fn default_registry() -> BackendRegistry {
    let client = reqwest::Client::new();

    BackendRegistry::new()
        .with_connector(DriverKind::Postgres, Arc::new(postgres::PostgresConnector))
        .with_connector(DriverKind::Mysql, Arc::new(mysql::MysqlConnector))
        .with_connector(DriverKind::Sqlite, Arc::new(sqlite::SqliteConnector))
        .with_generator(
            ProviderKind::Openai,
            Arc::new(ai::openai::OpenAiFactory::new(client.clone())),
        )
        .with_generator(
            ProviderKind::Claude,
            Arc::new(ai::claude::ClaudeFactory::new(client.clone())),
        )
        .with_generator(
            ProviderKind::Gemini,
            Arc::new(ai::gemini::GeminiFactory::new(client.clone())),
        )
        .with_generator(
            ProviderKind::Ollama,
            Arc::new(ai::ollama::OllamaFactory::new(client)),
        )
}
