use std::env;
use std::sync::Arc;

use askql_core::config::AiConfig;
use askql_core::generator::{
    GeneratedSql, GenerationRequest, GeneratorError, GeneratorFactory, SqlGenerator, Usage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::info;

use super::{finish, parse_body, provider_error_message, send_json, trim_base_url};

const PROVIDER: &str = "ollama";
const HOST_ENV: &str = "OLLAMA_HOST";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, Default)]
pub struct OllamaFactory {
    client: reqwest::Client,
}

impl OllamaFactory {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl GeneratorFactory for OllamaFactory {
    fn create(&self, config: &AiConfig) -> Result<Arc<dyn SqlGenerator>, GeneratorError> {
        let base_url = match config.base_url() {
            Some(url) => normalize_host(url),
            None => env::var(HOST_ENV)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map_or_else(|| DEFAULT_BASE_URL.to_string(), |host| normalize_host(&host)),
        };

        Ok(Arc::new(OllamaGenerator {
            client: self.client.clone(),
            base_url,
            model: OnceCell::new_with(config.model().map(str::to_string)),
        }))
    }
}

/// Local models need no key; the model name is detected on first use when
/// none is configured.
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: OnceCell<String>,
}

impl OllamaGenerator {
    async fn model(&self) -> Result<&str, GeneratorError> {
        self.model
            .get_or_try_init(|| detect_model(&self.client, &self.base_url))
            .await
            .map(String::as_str)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    #[serde(default)]
    model: String,
    #[serde(default)]
    name: String,
}

impl ModelEntry {
    fn into_name(self) -> Option<String> {
        [self.model, self.name]
            .into_iter()
            .find(|name| !name.trim().is_empty())
    }
}

fn normalize_host(host: &str) -> String {
    let host = trim_base_url(host.trim());
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

/// Prefers a model that is already loaded, then any pulled model.
async fn detect_model(client: &reqwest::Client, base_url: &str) -> Result<String, GeneratorError> {
    if let Ok(Some(running)) = first_model(client, &format!("{base_url}/api/ps")).await {
        info!(model = %running, "using running ollama model");
        return Ok(running);
    }

    match first_model(client, &format!("{base_url}/api/tags")).await? {
        Some(model) => {
            info!(%model, "using first available ollama model");
            Ok(model)
        }
        None => Err(GeneratorError::NotConfigured {
            provider: PROVIDER.to_string(),
            message: "no models available locally; pull one or pass --model".to_string(),
        }),
    }
}

async fn first_model(client: &reqwest::Client, url: &str) -> Result<Option<String>, GeneratorError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|error| GeneratorError::request(PROVIDER, format!("cannot list models: {error}")))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|error| GeneratorError::request(PROVIDER, error.to_string()))?;
    if !status.is_success() {
        let detail = provider_error_message(&body).unwrap_or_else(|| status.to_string());
        return Err(GeneratorError::request(
            PROVIDER,
            format!("cannot list models: {detail}"),
        ));
    }
    parse_model_list(&body)
}

fn parse_model_list(body: &str) -> Result<Option<String>, GeneratorError> {
    let list: ModelList = parse_body(PROVIDER, body)?;
    Ok(list.models.into_iter().find_map(ModelEntry::into_name))
}

fn parse_response(body: &str, model: &str) -> Result<GeneratedSql, GeneratorError> {
    let response: ChatResponse = parse_body(PROVIDER, body)?;
    let content = response
        .message
        .map(|message| message.content)
        .unwrap_or_default();

    finish(
        PROVIDER,
        &content,
        Usage {
            provider: PROVIDER.to_string(),
            model: model.to_string(),
            prompt_tokens: response.prompt_eval_count,
            response_tokens: response.eval_count,
            total_tokens: response.prompt_eval_count + response.eval_count,
            cached_tokens: 0,
        },
    )
}

#[async_trait]
impl SqlGenerator for OllamaGenerator {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedSql, GeneratorError> {
        let model = self.model().await?;
        let system_prompt = request.system_prompt();
        let body = ChatRequest {
            model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            stream: false,
        };

        let http = self.client.post(format!("{}/api/chat", self.base_url));
        let text = send_json(PROVIDER, http, &body).await?;
        parse_response(&text, model)
    }
}
