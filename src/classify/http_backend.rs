//! OpenAI-compatible chat completion classifier

use super::retry::{is_transient_error, is_transient_status, Backoff};
use super::{Classification, Classifier, Sentiment};
use crate::config::ClassifierConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const CHAT_COMPLETIONS_PATH: &str = "v1/chat/completions";
const SENTIMENT_MAX_TOKENS: u32 = 200;
const SCORE_MAX_TOKENS: u32 = 10;
const SCORE_TEMPERATURE: f32 = 0.1;

const SENTIMENT_SYSTEM_PROMPT: &str =
    "You are a sentiment analysis assistant for customer comments. Reply with JSON only.";
const SCORE_SYSTEM_PROMPT: &str =
    "You rate how extreme a negative customer comment is. Reply with a single number only.";

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SentimentReply {
    #[serde(default)]
    sentiment: Option<String>,
    #[serde(default)]
    confidence: Option<serde_json::Value>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Classifier backed by a `/v1/chat/completions` endpoint
pub struct HttpClassifier {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    temperature: f32,
    max_retries: u32,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

impl HttpClassifier {
    pub fn new(config: &ClassifierConfig, api_key: String) -> Result<Self> {
        let endpoint = chat_endpoint(&config.base_url)?;
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(config.retry_max_delay_ms),
        })
    }

    fn request(&self, system: &str, user: String, temperature: f32, max_tokens: u32) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
            max_tokens,
        }
    }

    /// POST a chat request, retrying transient failures with backoff
    async fn send_with_retry(&self, body: &ChatRequest) -> Result<String> {
        let mut backoff = Backoff::new(self.max_retries, self.retry_base_delay, self.retry_max_delay);

        loop {
            let result = self
                .client
                .post(self.endpoint.clone())
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            let last_err = match result {
                Ok(response) if response.status().is_success() => {
                    let parsed: ChatResponse = response.json().await?;
                    return first_reply(parsed);
                }
                Ok(response) => {
                    let status = response.status();
                    let detail = response.text().await.unwrap_or_default();
                    let err = Error::Classifier(format!(
                        "HTTP {}: {}",
                        status,
                        truncate(&detail, 200)
                    ));
                    if !is_transient_status(status) {
                        return Err(err);
                    }
                    err
                }
                Err(e) if is_transient_error(&e) => Error::Http(e),
                Err(e) => return Err(Error::Http(e)),
            };

            match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        attempt = backoff.attempt(),
                        max_retries = self.max_retries,
                        backoff_ms = delay.as_millis() as u64,
                        error = %last_err,
                        "Classifier request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(last_err),
            }
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    fn is_available(&self) -> bool {
        true
    }

    async fn classify(&self, text: &str) -> Result<Classification> {
        let prompt = format!(
            "Classify the sentiment of the following comment.\n\n\
             Comment: {}\n\n\
             Answer with JSON in exactly this shape:\n\
             {{\"sentiment\": \"positive|negative|neutral\", \"confidence\": 0.0-1.0, \"reasoning\": \"short reason\"}}",
            text
        );
        let body = self.request(SENTIMENT_SYSTEM_PROMPT, prompt, self.temperature, SENTIMENT_MAX_TOKENS);
        let reply = self.send_with_retry(&body).await?;
        debug!(reply = %truncate(&reply, 120), "Sentiment reply");
        parse_sentiment_reply(&reply)
    }

    async fn extremeness_score(&self, text: &str) -> Result<f64> {
        let prompt = format!(
            "Rate how extreme this negative comment is, from 0 (mild) to 1 (abusive, \
             threatening or hostile).\n\nComment: {}\n\nReturn only a number between 0 and 1.",
            text
        );
        let body = self.request(SCORE_SYSTEM_PROMPT, prompt, SCORE_TEMPERATURE, SCORE_MAX_TOKENS);
        let reply = self.send_with_retry(&body).await?;
        parse_score_reply(&reply)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn chat_endpoint(base_url: &str) -> Result<Url> {
    let mut base = Url::parse(base_url)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(CHAT_COMPLETIONS_PATH)
        .map_err(|e| Error::Config(format!("Invalid classifier URL: {}", e)))
}

fn first_reply(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| Error::Classifier("Empty completion".to_string()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Remove a surrounding Markdown code fence, with or without a language tag
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub(crate) fn parse_sentiment_reply(reply: &str) -> Result<Classification> {
    let body = strip_code_fence(reply);
    let parsed: SentimentReply = serde_json::from_str(body)
        .map_err(|e| Error::Classifier(format!("Unparseable sentiment reply: {}", e)))?;

    let label = parsed
        .sentiment
        .as_deref()
        .map(Sentiment::from_label)
        .unwrap_or(Sentiment::Neutral);
    let confidence = match parsed.confidence {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };

    let mut classification = Classification::new(label, confidence);
    classification.reasoning = parsed.reasoning;
    Ok(classification)
}

pub(crate) fn parse_score_reply(reply: &str) -> Result<f64> {
    let body = strip_code_fence(reply);
    body.parse::<f64>()
        .ok()
        .filter(|score| score.is_finite())
        .map(|score| score.clamp(0.0, 1.0))
        .ok_or_else(|| Error::Classifier(format!("Unparseable score reply: {}", truncate(body, 40))))
}
