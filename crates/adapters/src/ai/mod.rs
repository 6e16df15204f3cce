//! HTTP backends for SQL generation.
//!
//! Every provider builds a JSON request from the shared system prompt, posts it
//! with one `reqwest::Client`, and runs the reply text through
//! [`clean_sql_response`] before handing it back.

pub mod claude;
pub mod gemini;
pub mod ollama;
pub mod openai;

use askql_core::config::AiConfig;
use askql_core::generator::{clean_sql_response, GeneratedSql, GeneratorError, Usage};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

const ERROR_EXCERPT_CHARS: usize = 300;

fn require_api_key(config: &AiConfig, provider: &str) -> Result<String, GeneratorError> {
    config
        .resolve_api_key()
        .ok_or_else(|| GeneratorError::NotConfigured {
            provider: provider.to_string(),
            message: match config
                .api_key_env
                .as_deref()
                .or_else(|| config.provider.default_api_key_env())
            {
                Some(var) => format!("API key not set; export {var} or set ai.api_key"),
                None => "API key not set".to_string(),
            },
        })
}

async fn send_json(
    provider: &str,
    request: RequestBuilder,
    body: &impl Serialize,
) -> Result<String, GeneratorError> {
    let response = request
        .header("Accept", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|error| GeneratorError::request(provider, error.to_string()))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|error| GeneratorError::request(provider, error.to_string()))?;
    debug!(provider, status = status.as_u16(), bytes = text.len(), "provider replied");

    if !status.is_success() {
        let detail = provider_error_message(&text).unwrap_or_else(|| excerpt(&text));
        return Err(GeneratorError::request(
            provider,
            format!("HTTP {}: {detail}", status.as_u16()),
        ));
    }
    Ok(text)
}

fn parse_body<T: DeserializeOwned>(provider: &str, body: &str) -> Result<T, GeneratorError> {
    if let Some(message) = provider_error_message(body) {
        return Err(GeneratorError::request(provider, message));
    }
    serde_json::from_str(body).map_err(|error| {
        GeneratorError::request(
            provider,
            format!("unexpected response ({error}): {}", excerpt(body)),
        )
    })
}

/// Pulls `error.message` (or a bare string `error`) out of a JSON error body.
fn provider_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("error")? {
        serde_json::Value::String(message) => Some(message.clone()),
        error => error
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string),
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= ERROR_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut out = trimmed.chars().take(ERROR_EXCERPT_CHARS).collect::<String>();
    out.push_str("...");
    out
}

fn finish(provider: &str, text: &str, usage: Usage) -> Result<GeneratedSql, GeneratorError> {
    let sql = clean_sql_response(text);
    if sql.is_empty() {
        return Err(GeneratorError::EmptyResponse {
            provider: provider.to_string(),
        });
    }
    Ok(GeneratedSql {
        sql,
        explanation: None,
        usage,
    })
}

fn trim_base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}
