use std::sync::Arc;

use askql_core::config::AiConfig;
use askql_core::generator::{
    GeneratedSql, GenerationRequest, GeneratorError, GeneratorFactory, SqlGenerator, Usage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{finish, parse_body, require_api_key, send_json, trim_base_url};

const PROVIDER: &str = "claude";
const API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone, Default)]
pub struct ClaudeFactory {
    client: reqwest::Client,
}

impl ClaudeFactory {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl GeneratorFactory for ClaudeFactory {
    fn create(&self, config: &AiConfig) -> Result<Arc<dyn SqlGenerator>, GeneratorError> {
        Ok(Arc::new(ClaudeGenerator {
            client: self.client.clone(),
            api_key: require_api_key(config, PROVIDER)?,
            model: config.model().unwrap_or(DEFAULT_MODEL).to_string(),
            base_url: trim_base_url(config.base_url().unwrap_or(DEFAULT_BASE_URL)).to_string(),
            max_tokens: config
                .max_tokens
                .filter(|tokens| *tokens > 0)
                .unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: config.temperature.unwrap_or(0.0),
        }))
    }
}

pub struct ClaudeGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: MessagesUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

fn parse_response(body: &str, model: &str) -> Result<GeneratedSql, GeneratorError> {
    let response: MessagesResponse = parse_body(PROVIDER, body)?;
    let text = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .find_map(|block| block.text)
        .ok_or_else(|| GeneratorError::EmptyResponse {
            provider: PROVIDER.to_string(),
        })?;

    let usage = response.usage;
    finish(
        PROVIDER,
        &text,
        Usage {
            provider: PROVIDER.to_string(),
            model: model.to_string(),
            prompt_tokens: usage.input_tokens,
            response_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
            cached_tokens: usage.cache_read_input_tokens,
        },
    )
}

#[async_trait]
impl SqlGenerator for ClaudeGenerator {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedSql, GeneratorError> {
        let system_prompt = request.system_prompt();
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: &system_prompt,
            messages: [UserMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        let http = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION);
        let text = send_json(PROVIDER, http, &body).await?;
        parse_response(&text, &self.model)
    }
}
