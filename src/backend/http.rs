//! OpenAI-compatible chat-completion captioning backend

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{keys, CaptionBackend, CaptionOutcome, CredentialProvider, ImageInput};
use crate::net::{AttemptError, RateLimiter, RetryPolicy};
use crate::{CapBenchError, Result};

pub const DEFAULT_PROMPT: &str = "Generate a short, descriptive caption for this image.";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TEMPERATURE: f64 = 0.2;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentItem<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentItem<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

struct Exchange {
    status: u16,
    body: ChatResponse,
    http_ms: f64,
}

/// Remote backend speaking the chat-completions wire format.
///
/// Each attempt takes a token from the backend's limiter, and transient
/// failures go through the retry policy.
pub struct HttpCaptionBackend {
    id: String,
    endpoint: String,
    model: String,
    prompt: String,
    request_timeout: Duration,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl HttpCaptionBackend {
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            id: id.into(),
            endpoint: endpoint.into(),
            model: model.into(),
            prompt: DEFAULT_PROMPT.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            client,
            credentials,
            limiter: Arc::new(RateLimiter::default()),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn attempt(
        &self,
        key: &str,
        request: &ChatRequest<'_>,
    ) -> std::result::Result<Exchange, AttemptError> {
        self.limiter.acquire().await;

        let started = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key)
            .timeout(self.request_timeout)
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let message = response.text().await.unwrap_or_default();
            return Err(AttemptError::from_status(
                status.as_u16(),
                retry_after,
                message,
            ));
        }

        let body: ChatResponse = response.json().await.map_err(classify_transport_error)?;
        Ok(Exchange {
            status: status.as_u16(),
            body,
            http_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

#[async_trait]
impl CaptionBackend for HttpCaptionBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, image: &ImageInput) -> Result<CaptionOutcome> {
        let key = self.credentials.api_key().ok_or_else(|| {
            CapBenchError::CredentialError(format!("No API key available for {}", self.id))
        })?;

        let t0 = Instant::now();
        let data_url = format!(
            "data:{};base64,{}",
            sniff_mime(&image.data),
            STANDARD.encode(&image.data)
        );
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentItem::Text { text: &self.prompt },
                    ContentItem::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            temperature: DEFAULT_TEMPERATURE,
        };
        let pre_ms = t0.elapsed().as_secs_f64() * 1000.0;

        let outcome = self
            .retry
            .execute(|| self.attempt(&key, &request))
            .await;
        let retry_count = outcome.retry_count;
        let exchange = outcome.result.map_err(|e| {
            CapBenchError::NetworkError(format!(
                "{} request failed after {} retries: {}",
                self.id, retry_count, e
            ))
        })?;

        let post_start = Instant::now();
        let text = exchange
            .body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_else(|| "(no content)".to_string());
        let post_ms = post_start.elapsed().as_secs_f64() * 1000.0;
        let e2e_ms = t0.elapsed().as_secs_f64() * 1000.0;

        debug!(
            backend = %self.id,
            status = exchange.status,
            http_ms = exchange.http_ms,
            retries = retry_count,
            "caption received"
        );

        let mut caption = CaptionOutcome::new(text)
            .with(keys::PRE_MS, pre_ms)
            .with(keys::HTTP_MS, exchange.http_ms)
            .with(keys::POST_MS, post_ms)
            .with(keys::E2E_MS, e2e_ms)
            .with(keys::HTTP_STATUS, exchange.status)
            .with(keys::MODEL, self.model.clone())
            .with(keys::RETRY_COUNT, retry_count);

        if let Some(usage) = exchange.body.usage {
            if let Some(v) = usage.prompt_tokens {
                caption = caption.with(keys::PROMPT_TOKENS, v);
            }
            if let Some(v) = usage.completion_tokens {
                caption = caption.with(keys::COMPLETION_TOKENS, v);
            }
            if let Some(v) = usage.total_tokens {
                caption = caption.with(keys::TOTAL_TOKENS, v);
            }
        }

        Ok(caption)
    }
}

fn classify_transport_error(error: reqwest::Error) -> AttemptError {
    if error.is_timeout() {
        AttemptError::Timeout(error.to_string())
    } else {
        AttemptError::Fatal(error.to_string())
    }
}

/// `Retry-After` given in whole seconds; HTTP-date values are ignored
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn sniff_mime(data: &[u8]) -> &'static str {
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if data.starts_with(b"RIFF") && data.len() >= 12 && &data[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}
