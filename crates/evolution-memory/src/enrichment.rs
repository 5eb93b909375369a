//! LLM-backed enrichment of observations.
//!
//! The summarizer is an opaque text-in/text-out collaborator. Every failure
//! path degrades to an empty [`Enrichment`] so ingestion never depends on it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;

const SYSTEM_PROMPT: &str = "You summarize a single tool call made by a coding agent. \
Reply with a JSON object {\"title\": string, \"summary\": string}. \
The title is at most 8 words, the summary at most 2 sentences.";

/// Input is capped before it goes over the wire.
const MAX_PROMPT_BYTES: usize = 4_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
}

impl Enrichment {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.summary.is_empty()
    }
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> anyhow::Result<Enrichment>;
}

/// Used when no endpoint is configured.
#[derive(Debug, Default, Clone)]
pub struct NoopSummarizer;

#[async_trait]
impl Summarizer for NoopSummarizer {
    async fn summarize(&self, _text: &str) -> anyhow::Result<Enrichment> {
        Ok(Enrichment::default())
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

/// OpenAI-compatible chat completions client.
pub struct LlmSummarizer {
    endpoint: String,
    api_key: String,
    model: String,
    http_client: reqwest::Client,
}

impl LlmSummarizer {
    pub fn new(endpoint: &str, api_key: &str, model: &str, timeout: Duration) -> Self {
        let http_client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to build summarizer HTTP client ({}), falling back to defaults without a timeout", e);
                reqwest::Client::new()
            }
        };
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            http_client,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, text: &str) -> anyhow::Result<Enrichment> {
        let prompt = crate::utils::TextUtils::truncate_to_bytes(text, MAX_PROMPT_BYTES);
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system".into(), content: SYSTEM_PROMPT.into() },
                ChatMessage { role: "user".into(), content: prompt.into_owned() },
            ],
            temperature: 0.2,
        };

        let response = self.http_client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Summarizer request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Summarizer returned {}: {}", status, body));
        }

        let completion: ChatCompletionResponse = response.json().await
            .map_err(|e| anyhow::anyhow!("Failed to parse summarizer response: {}", e))?;

        let content = completion.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        parse_enrichment(content)
    }
}

/// Models sometimes wrap the object in a code fence or prose; take the
/// outermost `{...}` span.
fn parse_enrichment(content: &str) -> anyhow::Result<Enrichment> {
    let start = content.find('{');
    let end = content.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &content[s..=e],
        _ => return Err(anyhow::anyhow!("Summarizer reply contained no JSON object")),
    };
    serde_json::from_str(json)
        .map_err(|e| anyhow::anyhow!("Summarizer reply was not valid enrichment JSON: {}", e))
}

/// Pick the summarizer the configuration allows.
pub fn summarizer_from_config(config: &Config) -> Box<dyn Summarizer> {
    match (&config.llm_api_endpoint, &config.llm_api_key) {
        (Some(endpoint), Some(key)) => {
            debug!("Summarizer enabled: {} ({})", endpoint, config.llm_model);
            Box::new(LlmSummarizer::new(
                endpoint,
                key,
                &config.llm_model,
                Duration::from_secs(config.llm_timeout_seconds),
            ))
        }
        _ => Box::new(NoopSummarizer),
    }
}

/// Summarize, logging and swallowing any failure.
pub async fn summarize_or_default(summarizer: &dyn Summarizer, text: &str) -> Enrichment {
    match summarizer.summarize(text).await {
        Ok(enrichment) => enrichment,
        Err(e) => {
            warn!("Summarization failed, continuing without it: {}", e);
            Enrichment::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion_body(content: &str) -> String {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
        .to_string()
    }

    #[test]
    fn test_parse_enrichment_plain_and_fenced() {
        let plain = parse_enrichment(r#"{"title":"Read config","summary":"Loaded settings."}"#).unwrap();
        assert_eq!(plain.title, "Read config");

        let fenced = parse_enrichment("```json\n{\"title\":\"T\",\"summary\":\"S\"}\n```").unwrap();
        assert_eq!(fenced, Enrichment { title: "T".into(), summary: "S".into() });

        assert!(parse_enrichment("no json here").is_err());
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let partial = parse_enrichment(r#"{"title":"Only title"}"#).unwrap();
        assert_eq!(partial.summary, "");
        assert!(!partial.is_empty());
    }

    #[tokio::test]
    async fn test_llm_summarizer_parses_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body(r#"{"title":"Ran tests","summary":"All passed."}"#))
            .create_async()
            .await;

        let summarizer = LlmSummarizer::new(&server.url(), "secret", "test-model", Duration::from_secs(5));
        let enrichment = summarizer.summarize("cargo test").await.unwrap();

        mock.assert_async().await;
        assert_eq!(enrichment.title, "Ran tests");
        assert_eq!(enrichment.summary, "All passed.");
    }

    #[tokio::test]
    async fn test_server_error_degrades_to_default() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let summarizer = LlmSummarizer::new(&server.url(), "k", "m", Duration::from_secs(5));
        assert!(summarizer.summarize("x").await.is_err());

        let enrichment = summarize_or_default(&summarizer, "x").await;
        assert!(enrichment.is_empty());
    }

    #[tokio::test]
    async fn test_noop_summarizer_is_empty() {
        let enrichment = summarize_or_default(&NoopSummarizer, "anything").await;
        assert!(enrichment.is_empty());
    }

    #[test]
    fn test_summarizer_requires_endpoint_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_lookup(|k| match k {
            "LLM_API_ENDPOINT" => Some("http://localhost:1".to_string()),
            _ => None,
        }, dir.path()).unwrap();
        // no key configured: the no-op summarizer answers immediately
        let summarizer = summarizer_from_config(&config);
        let enrichment = tokio_test::block_on(summarizer.summarize("x")).unwrap();
        assert!(enrichment.is_empty());
    }
}
