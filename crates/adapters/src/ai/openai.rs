use std::sync::Arc;

use askql_core::config::AiConfig;
use askql_core::generator::{
    GeneratedSql, GenerationRequest, GeneratorError, GeneratorFactory, SqlGenerator, Usage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{finish, parse_body, require_api_key, send_json, trim_base_url};

const PROVIDER: &str = "openai";
pub const DEFAULT_MODEL: &str = "gpt-5-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Default)]
pub struct OpenAiFactory {
    client: reqwest::Client,
}

impl OpenAiFactory {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl GeneratorFactory for OpenAiFactory {
    fn create(&self, config: &AiConfig) -> Result<Arc<dyn SqlGenerator>, GeneratorError> {
        Ok(Arc::new(OpenAiGenerator {
            client: self.client.clone(),
            api_key: require_api_key(config, PROVIDER)?,
            model: config.model().unwrap_or(DEFAULT_MODEL).to_string(),
            base_url: trim_base_url(config.base_url().unwrap_or(DEFAULT_BASE_URL)).to_string(),
            max_tokens: config.max_tokens,
        }))
    }
}

pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

fn parse_response(body: &str, model: &str) -> Result<GeneratedSql, GeneratorError> {
    let response: ChatResponse = parse_body(PROVIDER, body)?;
    let content = response
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .ok_or_else(|| GeneratorError::EmptyResponse {
            provider: PROVIDER.to_string(),
        })?;

    let usage = response.usage.unwrap_or_default();
    finish(
        PROVIDER,
        &content,
        Usage {
            provider: PROVIDER.to_string(),
            model: model.to_string(),
            prompt_tokens: usage.prompt_tokens,
            response_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            cached_tokens: usage
                .prompt_tokens_details
                .map_or(0, |details| details.cached_tokens),
        },
    )
}

#[async_trait]
impl SqlGenerator for OpenAiGenerator {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedSql, GeneratorError> {
        let system_prompt = request.system_prompt();
        let body = ChatRequest {
            model: &self.model,
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
            max_completion_tokens: self.max_tokens.filter(|tokens| *tokens > 0),
        };

        let http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key);
        let text = send_json(PROVIDER, http, &body).await?;
        parse_response(&text, &self.model)
    }
}

#[cfg(test)]
mod tests {
    use askql_core::config::{AiConfig, ProviderKind};
    use askql_core::generator::{GeneratorError, GeneratorFactory, SqlGenerator};

    use super::{parse_response, OpenAiFactory};

    #[test]
    fn parses_content_and_usage() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "```sql\nSELECT id FROM users\n```"}}],
            "usage": {
                "prompt_tokens": 120,
                "completion_tokens": 9,
                "total_tokens": 129,
                "prompt_tokens_details": {"cached_tokens": 64}
            }
        }"#;

        let generated = parse_response(body, "gpt-5-mini").expect("response should parse");
        assert_eq!(generated.sql, "SELECT id FROM users");
        assert_eq!(generated.usage.provider, "openai");
        assert_eq!(generated.usage.model, "gpt-5-mini");
        assert_eq!(generated.usage.prompt_tokens, 120);
        assert_eq!(generated.usage.response_tokens, 9);
        assert_eq!(generated.usage.total_tokens, 129);
        assert_eq!(generated.usage.cached_tokens, 64);
    }

    #[test]
    fn no_choices_is_an_empty_response() {
        assert_eq!(
            parse_response(r#"{"choices": []}"#, "gpt-5-mini"),
            Err(GeneratorError::EmptyResponse {
                provider: "openai".to_string()
            })
        );
    }

    #[test]
    fn factory_requires_a_key() {
        let mut config = AiConfig::new(ProviderKind::Openai);
        config.api_key_env = Some("ASKQL_TEST_OPENAI_KEY_NEVER_SET".to_string());
        assert!(OpenAiFactory::default().create(&config).is_err());

        config.api_key = Some("sk-test".to_string());
        let generator = OpenAiFactory::default()
            .create(&config)
            .expect("generator should build with a key");
        assert_eq!(generator.provider(), "openai");
    }
}
