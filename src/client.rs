//! Handle to the backend chat-completion service for one resolved model.
//!
//! The backend sits behind a gateway that authenticates with its own header,
//! so requests carry `cf-aig-authorization` and never an `Authorization` header.

use crate::error::{GatewayError, Result};
use crate::registry::Model;
use crate::translate::openai_types::ChatErrorResponse;

use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::pin::Pin;

pub const PROVIDER_AUTH_HEADER: &str = "cf-aig-authorization";

/// Raw `data:` payloads of the backend's SSE stream, `[DONE]` excluded.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    provider_key: String,
}

impl BackendClient {
    /// Build a handle for `model`: its endpoint is appended to `host`.
    pub fn for_model(
        http: reqwest::Client,
        host: &str,
        model: &Model,
        provider_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: format!("{}{}", host.trim_end_matches('/'), model.endpoint),
            provider_key: provider_key.into(),
        }
    }

    #[must_use]
    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Send a non-streaming chat completion and decode the JSON reply.
    ///
    /// # Errors
    /// Returns `GatewayError::Upstream` if the request fails, the backend answers
    /// with a non-2xx status, or the reply cannot be read or decoded as `R`.
    pub async fn complete<B, R>(&self, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send(body).await?;
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::upstream(format!("Failed to read backend response: {e}")))?;

        serde_json::from_str(&text).map_err(|e| {
            GatewayError::upstream(format!(
                "Failed to parse backend response: {}. Body: {}",
                e,
                truncate(&text, 300)
            ))
        })
    }

    /// Send a streaming chat completion and return its SSE data payloads.
    ///
    /// Dropping the returned stream drops the response body, which aborts the
    /// backend request.
    ///
    /// # Errors
    /// Returns `GatewayError::Upstream` if the request fails or the backend
    /// answers with a non-2xx status. Transport errors after the stream opens
    /// are yielded as stream items.
    pub async fn stream<B>(&self, body: &B) -> Result<ChunkStream>
    where
        B: Serialize + ?Sized,
    {
        let response = self.send(body).await?;

        let chunks = response
            .bytes_stream()
            .eventsource()
            .map(|event| match event {
                Ok(event) => Ok(event.data),
                Err(e) => Err(GatewayError::upstream(format!("Backend stream error: {e}"))),
            })
            .take_while(|data| {
                let done = matches!(data, Ok(d) if d.trim() == "[DONE]");
                futures::future::ready(!done)
            });

        Ok(Box::pin(chunks))
    }

    async fn send<B>(&self, body: &B) -> Result<reqwest::Response>
    where
        B: Serialize + ?Sized,
    {
        let url = self.chat_completions_url();
        tracing::debug!(%url, "POST chat completion");

        let response = self
            .http
            .post(&url)
            .header(PROVIDER_AUTH_HEADER, format!("Bearer {}", self.provider_key))
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::upstream(format!("Backend request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ChatErrorResponse>(&body) {
            Ok(err) => err.error.message,
            Err(_) => format!(
                "Backend returned status {}: {}",
                status.as_u16(),
                truncate(&body, 500)
            ),
        };
        Err(GatewayError::upstream(message))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
