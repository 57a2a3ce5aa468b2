use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ReplyRequest<'a> {
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct ReplyResponse {
    text: String,
}

/// Client for the external reply-generation service: one request/response
/// endpoint taking `{message}` and returning `{text}`. Treated as an opaque,
/// possibly slow, possibly failing black box, so every call carries a
/// bounded timeout.
#[derive(Debug, Clone)]
pub struct ReplyClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ReplyClient {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::BotUpstreamFailed(e.to_string()))?;
        Ok(Self { http, endpoint })
    }

    /// Ask the service for a reply to the user's text. Transport failures,
    /// non-success statuses, undecodable payloads and blank replies all
    /// surface as `BotUpstreamFailed`; the caller abandons the turn.
    pub async fn generate(&self, message: &str) -> Result<String> {
        debug!("dispatching reply request to {}", self.endpoint);

        let response = self
            .http
            .post(&self.endpoint)
            .json(&ReplyRequest { message })
            .send()
            .await
            .map_err(|e| EngineError::BotUpstreamFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::BotUpstreamFailed(format!(
                "reply service returned {}",
                response.status()
            )));
        }

        let payload: ReplyResponse = response
            .json()
            .await
            .map_err(|e| EngineError::BotUpstreamFailed(format!("unusable reply payload: {e}")))?;

        if payload.text.trim().is_empty() {
            return Err(EngineError::BotUpstreamFailed(
                "reply service returned an empty text".to_string(),
            ));
        }

        Ok(payload.text)
    }
}
