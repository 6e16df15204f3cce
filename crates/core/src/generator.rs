use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{AiConfig, DriverKind};
use crate::conversation::ConversationEntry;
use crate::safe_mode::{self, InvalidSql};

const BASE_SYSTEM_PROMPT: &str = "You are a helpful assistant that generates SQL queries based on natural language descriptions.

You'll receive database schema information that includes tables, their columns, data types, constraints,
and relationships between tables. Use this information to generate accurate SQL queries.

Respond ONLY with the SQL query without any explanation or markdown formatting. Do not include any comments
in the SQL or any additional text.";

/// Token accounting reported by a provider for one generation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Usage {
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub response_tokens: u64,
    pub total_tokens: u64,
    pub cached_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedCell {
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub schema: String,
    pub dialect: Option<DriverKind>,
    pub conversation: Vec<ConversationEntry>,
    pub selected_cell: Option<SelectedCell>,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            schema: String::new(),
            dialect: None,
            conversation: Vec::new(),
            selected_cell: None,
        }
    }

    /// Selected cell and recent exchanges, phrased for the model.
    #[must_use]
    pub fn context_text(&self) -> String {
        let mut out = String::new();

        if let Some(cell) = &self.selected_cell {
            out.push_str("Currently selected cell:\n");
            out.push_str(&format!("Column: {}\n", cell.column));
            out.push_str(&format!("Value: {}\n", cell.value));
            out.push_str(
                "\nIf the user refers to 'selected', 'this', or similar terms, they likely mean this value.\n",
            );
            out.push_str(
                "Use this information to filter or reference specific data in your query.\n\n",
            );
        }

        if !self.conversation.is_empty() {
            out.push_str("Recent conversation history:\n");
            out.push_str(
                "The user has previously asked the following questions and received these SQL queries:\n\n",
            );
            for (index, entry) in self.conversation.iter().enumerate() {
                out.push_str(&format!(
                    "{}. User asked: \"{}\"\n   Generated SQL: {}\n\n",
                    index + 1,
                    entry.prompt,
                    entry.sql
                ));
            }
            out.push_str("Use this conversation context to understand what the user is referring to.\n");
            out.push_str(
                "If the user's current request is a follow-up (e.g., \"show only the last 10\", \"filter by that user\", \"add a limit\"),\n",
            );
            out.push_str(
                "base your query on the most recent SQL but apply the requested modification.\n\n",
            );
        }

        out
    }

    /// Full system prompt: instructions, dialect, schema, then context.
    #[must_use]
    pub fn system_prompt(&self) -> String {
        let mut prompt = String::from(BASE_SYSTEM_PROMPT);

        if let Some(dialect) = self.dialect {
            prompt.push_str("\n\nTarget database: ");
            prompt.push_str(dialect.dialect_name());
        }

        if !self.schema.trim().is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&self.schema);
        }

        let context = self.context_text();
        if !context.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&context);
        }

        prompt
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSql {
    pub sql: String,
    pub explanation: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    #[error("no SQL generator registered for provider `{0}`")]
    UnsupportedProvider(String),
    #[error("{provider} is not configured: {message}")]
    NotConfigured { provider: String, message: String },
    #[error("prompt cannot be empty")]
    EmptyPrompt,
    #[error("invalid SQL query: {0}")]
    InvalidSql(#[from] InvalidSql),
    #[error("{provider} request failed: {message}")]
    Request { provider: String, message: String },
    #[error("{provider} returned an empty response")]
    EmptyResponse { provider: String },
}

impl GeneratorError {
    #[must_use]
    pub fn request(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Request {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// A natural-language to SQL backend.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    fn provider(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedSql, GeneratorError>;

    fn is_dangerous(&self, sql: &str) -> bool {
        safe_mode::is_dangerous(sql)
    }

    fn validate(&self, sql: &str) -> Result<(), GeneratorError> {
        safe_mode::validate_generated_sql(sql).map_err(GeneratorError::from)
    }

    async fn close(&self) -> Result<(), GeneratorError> {
        Ok(())
    }
}

pub trait GeneratorFactory: Send + Sync {
    fn create(&self, config: &AiConfig) -> Result<Arc<dyn SqlGenerator>, GeneratorError>;
}

/// Strips a surrounding markdown code fence from a model reply.
#[must_use]
pub fn clean_sql_response(response: &str) -> String {
    let mut query = response.trim();

    if query.starts_with("```") {
        if let Some((_, rest)) = query.split_once('\n') {
            query = rest;
        } else {
            query = query.trim_start_matches('`');
        }
    }

    query = query.trim_end();
    if let Some(stripped) = query.strip_suffix("```") {
        query = stripped;
    }

    query.trim().to_string()
}
