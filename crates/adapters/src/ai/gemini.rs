use std::sync::Arc;

use askql_core::config::AiConfig;
use askql_core::generator::{
    GeneratedSql, GenerationRequest, GeneratorError, GeneratorFactory, SqlGenerator, Usage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{finish, parse_body, require_api_key, send_json, trim_base_url};

const PROVIDER: &str = "gemini";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, Default)]
pub struct GeminiFactory {
    client: reqwest::Client,
}

impl GeminiFactory {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl GeneratorFactory for GeminiFactory {
    fn create(&self, config: &AiConfig) -> Result<Arc<dyn SqlGenerator>, GeneratorError> {
        Ok(Arc::new(GeminiGenerator {
            client: self.client.clone(),
            api_key: require_api_key(config, PROVIDER)?,
            model: config.model().unwrap_or(DEFAULT_MODEL).to_string(),
            base_url: trim_base_url(config.base_url().unwrap_or(DEFAULT_BASE_URL)).to_string(),
            max_tokens: config.max_tokens.filter(|tokens| *tokens > 0),
            temperature: config.temperature.filter(|value| *value != 0.0),
        }))
    }
}

pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: UsageMetadata,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
    #[serde(default)]
    cached_content_token_count: u64,
}

fn parse_response(body: &str, model: &str) -> Result<GeneratedSql, GeneratorError> {
    let response: GenerateResponse = parse_body(PROVIDER, body)?;
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    let usage = response.usage_metadata;
    finish(
        PROVIDER,
        &text,
        Usage {
            provider: PROVIDER.to_string(),
            model: model.to_string(),
            prompt_tokens: usage.prompt_token_count,
            response_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
            cached_tokens: usage.cached_content_token_count,
        },
    )
}

#[async_trait]
impl SqlGenerator for GeminiGenerator {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedSql, GeneratorError> {
        let system_prompt = request.system_prompt();
        let generation_config = (self.max_tokens.is_some() || self.temperature.is_some()).then(
            || GenerationConfig {
                max_output_tokens: self.max_tokens,
                temperature: self.temperature,
            },
        );
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: [Part {
                    text: &system_prompt,
                }],
            },
            contents: [Content {
                role: Some("user"),
                parts: [Part {
                    text: &request.prompt,
                }],
            }],
            generation_config,
        };

        let http = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key);
        let text = send_json(PROVIDER, http, &body).await?;
        parse_response(&text, &self.model)
    }
}

#[cfg(test)]
mod tests {
    use askql_core::generator::GeneratorError;

    use super::parse_response;

    #[test]
    fn joins_parts_of_the_first_candidate() {
        let body = r#"{
            "candidates": [
                {"content": {"role": "model", "parts": [{"text": "SELECT name "}, {"text": "FROM products"}]}},
                {"content": {"role": "model", "parts": [{"text": "SELECT 2"}]}}
            ],
            "usageMetadata": {
                "promptTokenCount": 80,
                "candidatesTokenCount": 6,
                "totalTokenCount": 86,
                "cachedContentTokenCount": 40
            }
        }"#;

        let generated = parse_response(body, "gemini-2.5-flash").expect("response should parse");
        assert_eq!(generated.sql, "SELECT name FROM products");
        assert_eq!(generated.usage.prompt_tokens, 80);
        assert_eq!(generated.usage.response_tokens, 6);
        assert_eq!(generated.usage.total_tokens, 86);
        assert_eq!(generated.usage.cached_tokens, 40);
    }

    #[test]
    fn blocked_prompts_have_no_candidates() {
        let body = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        assert!(matches!(
            parse_response(body, "gemini-2.5-flash"),
            Err(GeneratorError::EmptyResponse { .. })
        ));
    }
}
