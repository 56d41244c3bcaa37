//! Telegram Bot API client used by polling, replies and broadcast delivery.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use herald_broadcast::{DeliveryChannel, DeliveryOutcome};
use herald_core::truncate_chars;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use super::{TelegramMessage, TelegramUpdate, TelegramUser};

const ERROR_BODY_PREVIEW_CHARS: usize = 320;
/// Backoff stops doubling after this many retries.
const MAX_BACKOFF_DOUBLINGS: u32 = 6;

/// 429 (flood control) and 5xx are worth another attempt.
fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// `Retry-After` header in whole seconds; Bot API bodies carry the same hint.
fn header_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
}

/// Attempt budget and backoff for calls outside broadcast delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    fn new(max_attempts: usize, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms.max(1)),
        }
    }

    fn allows_retry_after(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }

    /// A flood-control wait replaces the doubling schedule but never undercuts
    /// the base delay.
    fn delay_before_retry(&self, attempt: usize, retry_after_seconds: Option<u64>) -> Duration {
        match retry_after_seconds {
            Some(seconds) => Duration::from_secs(seconds).max(self.base_delay),
            None => {
                let doublings = (attempt.saturating_sub(1) as u32).min(MAX_BACKOFF_DOUBLINGS);
                self.base_delay.saturating_mul(1 << doublings)
            }
        }
    }
}

/// Failure of a single Bot API call.
#[derive(Debug, Error)]
pub enum TelegramApiError {
    #[error("telegram api {operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("telegram api {operation} failed with status {status}: {description}")]
    Status {
        operation: &'static str,
        status: u16,
        description: String,
        retry_after_seconds: Option<u64>,
    },
    #[error("telegram api {operation} returned ok=false: {description}")]
    Rejected {
        operation: &'static str,
        description: String,
    },
    #[error("failed to decode telegram {operation} response: {detail}")]
    Decode {
        operation: &'static str,
        detail: String,
    },
}

impl TelegramApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { source, .. } => {
                source.is_timeout()
                    || source.is_connect()
                    || source.is_request()
                    || source.is_body()
            }
            Self::Status { status, .. } => is_retryable_status(*status),
            Self::Rejected { .. } | Self::Decode { .. } => false,
        }
    }

    fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::Status {
                retry_after_seconds,
                ..
            } => *retry_after_seconds,
            _ => None,
        }
    }
}

/// Maps a failed `sendMessage` onto the broadcast outcome taxonomy.
pub(crate) fn classify_delivery_error(error: &TelegramApiError) -> DeliveryOutcome {
    let detail = error.to_string();
    match error {
        TelegramApiError::Transport { .. } => DeliveryOutcome::transient(detail),
        TelegramApiError::Status { status, .. } => match *status {
            400 | 403 => DeliveryOutcome::unreachable(detail),
            status if is_retryable_status(status) => DeliveryOutcome::transient(detail),
            _ => DeliveryOutcome::unknown(detail),
        },
        TelegramApiError::Rejected { .. } | TelegramApiError::Decode { .. } => {
            DeliveryOutcome::unknown(detail)
        }
    }
}

#[derive(Debug, Deserialize)]
struct TelegramEnvelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramErrorEnvelope {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<TelegramResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Clone)]
pub struct TelegramApiClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    retry: RetryPolicy,
}

impl TelegramApiClient {
    pub fn new(
        api_base: &str,
        bot_token: &str,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("herald-telegram-bot"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create telegram api client")?;
        let bot_token = bot_token.trim();
        if bot_token.is_empty() {
            anyhow::bail!("telegram bot token cannot be empty");
        }

        Ok(Self {
            http,
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            retry: RetryPolicy::new(retry_max_attempts, retry_base_delay_ms),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    pub async fn get_me(&self) -> Result<TelegramUser, TelegramApiError> {
        let url = self.endpoint("getMe");
        self.request_with_retry("getMe", || self.http.get(url.as_str()))
            .await
    }

    /// Long-polls for message updates starting at `offset`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        poll_timeout: Duration,
    ) -> Result<Vec<TelegramUpdate>, TelegramApiError> {
        let url = self.endpoint("getUpdates");
        let timeout_seconds = poll_timeout.as_secs().to_string();
        let offset = offset.map(|value| value.to_string());
        let allowed_updates = json!(["message"]).to_string();
        self.request_with_retry("getUpdates", || {
            let mut query = vec![
                ("timeout", timeout_seconds.as_str()),
                ("allowed_updates", allowed_updates.as_str()),
            ];
            if let Some(offset) = offset.as_deref() {
                query.push(("offset", offset));
            }
            // long poll outlives the client-wide request timeout
            self.http
                .get(url.as_str())
                .query(&query)
                .timeout(poll_timeout + Duration::from_secs(10))
        })
        .await
    }

    /// Sends plain text, retrying rate limits and server errors.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
    ) -> Result<TelegramMessage, TelegramApiError> {
        let url = self.endpoint("sendMessage");
        let payload = send_message_payload(chat_id, text);
        self.request_with_retry("sendMessage", || {
            self.http.post(url.as_str()).json(&payload)
        })
        .await
    }

    /// One `sendMessage` attempt without retries, used for broadcast delivery.
    pub async fn send_message_once(
        &self,
        chat_id: i64,
        text: &str,
    ) -> Result<TelegramMessage, TelegramApiError> {
        let url = self.endpoint("sendMessage");
        let payload = send_message_payload(chat_id, text);
        self.request_once("sendMessage", self.http.post(url.as_str()).json(&payload))
            .await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TelegramApiError> {
        let url = self.endpoint("editMessageText");
        let payload = edit_message_payload(chat_id, message_id, text);
        let _: Value = self
            .request_with_retry("editMessageText", || {
                self.http.post(url.as_str()).json(&payload)
            })
            .await?;
        Ok(())
    }

    /// One `editMessageText` attempt; a rate-limited edit is dropped, not waited out.
    pub async fn edit_message_text_once(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TelegramApiError> {
        let url = self.endpoint("editMessageText");
        let payload = edit_message_payload(chat_id, message_id, text);
        let _: Value = self
            .request_once(
                "editMessageText",
                self.http.post(url.as_str()).json(&payload),
            )
            .await?;
        Ok(())
    }

    async fn request_with_retry<T, F>(
        &self,
        operation: &'static str,
        mut builder: F,
    ) -> Result<T, TelegramApiError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            match self.request_once(operation, builder()).await {
                Ok(parsed) => return Ok(parsed),
                Err(error) if self.retry.allows_retry_after(attempt) && error.is_retryable() => {
                    let delay = self
                        .retry
                        .delay_before_retry(attempt, error.retry_after_seconds());
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying telegram api call: {error}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn request_once<T>(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TelegramApiError>
    where
        T: DeserializeOwned,
    {
        let response = request
            .send()
            .await
            .map_err(|source| TelegramApiError::Transport { operation, source })?;
        let status = response.status();
        let header_retry_after = header_retry_after(response.headers());
        let body = response
            .text()
            .await
            .map_err(|source| TelegramApiError::Transport { operation, source })?;

        if !status.is_success() {
            let envelope =
                serde_json::from_str::<TelegramErrorEnvelope>(&body).unwrap_or_default();
            let retry_after_seconds = envelope
                .parameters
                .and_then(|parameters| parameters.retry_after)
                .or(header_retry_after);
            return Err(TelegramApiError::Status {
                operation,
                status: status.as_u16(),
                description: envelope
                    .description
                    .unwrap_or_else(|| truncate_chars(&body, ERROR_BODY_PREVIEW_CHARS)),
                retry_after_seconds,
            });
        }

        let envelope = serde_json::from_str::<TelegramEnvelope<T>>(&body).map_err(|error| {
            TelegramApiError::Decode {
                operation,
                detail: error.to_string(),
            }
        })?;
        if !envelope.ok {
            return Err(TelegramApiError::Rejected {
                operation,
                description: envelope
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        envelope.result.ok_or_else(|| TelegramApiError::Decode {
            operation,
            detail: "response missing result".to_string(),
        })
    }
}

fn send_message_payload(chat_id: i64, text: &str) -> Value {
    json!({
        "chat_id": chat_id,
        "text": text,
        "disable_web_page_preview": true,
    })
}

fn edit_message_payload(chat_id: i64, message_id: i64, text: &str) -> Value {
    json!({
        "chat_id": chat_id,
        "message_id": message_id,
        "text": text,
        "disable_web_page_preview": true,
    })
}

#[async_trait]
impl DeliveryChannel for TelegramApiClient {
    async fn send(&self, recipient_id: i64, body: &str) -> DeliveryOutcome {
        match self.send_message_once(recipient_id, body).await {
            Ok(_) => DeliveryOutcome::Delivered,
            Err(error) => classify_delivery_error(&error),
        }
    }
}
