//! Chat-completions summarizer (OpenAI-compatible endpoints such as GLM)

use super::Summarizer;
use crate::config::{Config, SummarizerConfig};
use crate::error::{Error, Result};
use crate::models::Item;
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, info};
use unicode_segmentation::UnicodeSegmentation;

const SYSTEM_PROMPT: &str =
    "You are a senior technology journalist who distills posts and interviews into their key insights.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

pub struct ChatSummarizer {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_input_chars: usize,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl ChatSummarizer {
    pub fn new(config: &SummarizerConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let per_minute =
            NonZeroU32::new(config.requests_per_minute).unwrap_or(nonzero!(1u32));

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_input_chars: config.max_input_chars,
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        })
    }

    /// Build from configuration, reading the API key from the configured
    /// environment variable
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.summarizer_api_key().ok_or_else(|| {
            Error::Config(format!(
                "Summarizer API key not set; export {}",
                config.summarizer.api_key_env
            ))
        })?;
        Self::new(&config.summarizer, api_key)
    }

    fn build_prompt(&self, item: &Item) -> String {
        let text = super::summary_source(item).unwrap_or_default();
        let text = truncate_graphemes(text, self.max_input_chars);

        format!(
            "Title: {}\nLink: {}\n\nContent:\n{}\n\n\
             Summarize the piece in Markdown: a one-line headline, three to five key \
             points each backed by a fact from the text, and one paragraph on what it \
             signals about the author's direction.",
            item.title, item.link, text
        )
    }
}

#[async_trait]
impl Summarizer for ChatSummarizer {
    async fn summarize(&self, item: &Item) -> Result<String> {
        self.limiter.until_ready().await;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: self.build_prompt(item),
                },
            ],
            temperature: self.temperature,
        };

        info!(item_id = %item.id, link = %item.link, "Requesting summary");

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Summarize(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Summarize(format!(
                "HTTP {}: {}",
                status,
                truncate_graphemes(body.trim(), 200)
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Summarize(format!("unreadable response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| Error::Summarize("response has no message content".to_string()))?;

        debug!(item_id = %item.id, chars = content.chars().count(), "Received summary");
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Cut text to at most `max` grapheme clusters
pub fn truncate_graphemes(text: &str, max: usize) -> &str {
    match text.grapheme_indices(true).nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn item() -> Item {
        Item {
            id: "item-1".to_string(),
            source_id: "minimax-blog".to_string(),
            run_id: "run-1".to_string(),
            updated_run_id: None,
            fingerprint: "fp".to_string(),
            title: "Scaling agents".to_string(),
            link: "https://www.minimax.io/news/agents".to_string(),
            published_at: None,
            content: "Long post about agents.".to_string(),
            first_seen_at: "2024-05-01T00:00:00.000000Z".to_string(),
            updated_at: "2024-05-01T00:00:00.000000Z".to_string(),
            status: "raw".to_string(),
            transcript: None,
            summary: None,
        }
    }

    fn summarizer(server: &MockServer) -> ChatSummarizer {
        let config = SummarizerConfig {
            api_url: format!("{}/v4/chat/completions", server.uri()),
            requests_per_minute: 600,
            ..SummarizerConfig::default()
        };
        ChatSummarizer::new(&config, "test-key".to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_summarize_reads_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v4/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({ "model": "glm-4-plus" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "  # Agents\n- point  " } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let summary = summarizer(&server).summarize(&item()).await.unwrap();
        assert_eq!(summary, "# Agents\n- point");
    }

    #[tokio::test]
    async fn test_unexpected_shape_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = summarizer(&server).summarize(&item()).await.unwrap_err();
        assert!(matches!(err, Error::Summarize(_)));
    }

    #[tokio::test]
    async fn test_http_error_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = summarizer(&server).summarize(&item()).await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_truncate_graphemes() {
        assert_eq!(truncate_graphemes("héllo", 2), "hé");
        assert_eq!(truncate_graphemes("访谈内容", 2), "访谈");
        assert_eq!(truncate_graphemes("short", 100), "short");
        // Flag emoji is one cluster of two scalars
        assert_eq!(truncate_graphemes("🇨🇳abc", 1), "🇨🇳");
    }
}
