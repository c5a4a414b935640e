use crate::client::{BackendClient, ChunkStream};
use crate::error::{GatewayError, Result};
use crate::logging::SharedLogger;
use crate::registry::Model;
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse, StreamEvent};
use crate::translate::openai_types::{ChatCompletionChunk, ChatCompletionResponse};
use crate::translate::request::anthropic_to_openai;
use crate::translate::response::openai_to_anthropic;
use crate::translate::streaming::StreamReframer;

use futures::stream::Stream;
use futures::StreamExt;
use serde_json::{Map, Value};
use std::pin::Pin;
use std::time::Instant;

/// Outcome of proxying a streaming request: SSE events ready to be written out.
/// An `Err` item means the stream broke and the response must be cut short.
pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseEvent>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Named event type; `None` for the unnamed `data:`-only events OpenAI clients expect.
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    fn named(event: &StreamEvent) -> Result<Self> {
        Ok(Self {
            event: Some(event.event_name().to_string()),
            data: serde_json::to_string(event)?,
        })
    }

    fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }
}

/// Lifetime of one streamed response. It lives inside the response stream, so a
/// client disconnect drops it together with the backend body it is reading.
struct RequestContext {
    route: &'static str,
    model: String,
    started: Instant,
    completed: bool,
    logger: SharedLogger,
}

impl RequestContext {
    fn new(route: &'static str, model: &str, logger: SharedLogger) -> Self {
        Self {
            route,
            model: model.to_string(),
            started: Instant::now(),
            completed: false,
            logger,
        }
    }

    fn complete(&mut self) {
        self.completed = true;
        self.logger.info(
            "stream",
            format!(
                "{} stream completed model={} in {}ms",
                self.route,
                self.model,
                self.started.elapsed().as_millis()
            ),
        );
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if !self.completed {
            tracing::warn!(route = self.route, model = %self.model, "stream ended early, backend call dropped");
            self.logger.warn(
                "stream",
                format!(
                    "{} stream for model={} ended early after {}ms",
                    self.route,
                    self.model,
                    self.started.elapsed().as_millis()
                ),
            );
        }
    }
}

/// Forward a non-streaming Anthropic request and translate the reply.
pub async fn proxy_messages(
    req: &MessagesRequest,
    model: &Model,
    backend: &BackendClient,
    logger: &SharedLogger,
) -> Result<MessagesResponse> {
    let openai_req = anthropic_to_openai(req, &model.id);

    logger.info(
        "proxy",
        format!("POST {} model={}", backend.chat_completions_url(), openai_req.model),
    );

    let openai_resp: ChatCompletionResponse = backend.complete(&openai_req).await?;
    let anthropic_resp = openai_to_anthropic(&openai_resp, &req.model)?;

    logger.info(
        "proxy",
        format!(
            "Completed: in={} out={} tokens",
            anthropic_resp.usage.input_tokens, anthropic_resp.usage.output_tokens
        ),
    );

    Ok(anthropic_resp)
}

/// Forward a streaming Anthropic request, returning Anthropic SSE events.
pub async fn proxy_messages_streaming(
    req: &MessagesRequest,
    model: &Model,
    backend: &BackendClient,
    logger: &SharedLogger,
) -> Result<SseStream> {
    let openai_req = anthropic_to_openai(req, &model.id);

    logger.info(
        "proxy",
        format!(
            "POST {} model={} (streaming)",
            backend.chat_completions_url(),
            openai_req.model
        ),
    );

    let chunks = backend.stream(&openai_req).await?;

    Ok(Box::pin(reframe_stream(chunks, req.model.clone(), logger.clone())))
}

/// Re-frame backend chunks into Anthropic events.
fn reframe_stream(
    mut chunks: ChunkStream,
    model: String,
    logger: SharedLogger,
) -> impl Stream<Item = Result<SseEvent>> + Send + 'static {
    async_stream::stream! {
        let mut ctx = RequestContext::new("messages", &model, logger.clone());
        let mut reframer = StreamReframer::new(&model);

        for event in reframer.start() {
            yield SseEvent::named(&event);
        }

        while let Some(item) = chunks.next().await {
            let data = match item {
                Ok(data) => data,
                Err(e) => {
                    logger.error("stream", format!("Backend stream failed: {e}"));
                    yield Err(e);
                    return;
                }
            };

            let chunk: ChatCompletionChunk = match serde_json::from_str(&data) {
                Ok(c) => c,
                Err(e) => {
                    logger.debug("stream", format!("Skipping unparseable chunk: {e}"));
                    continue;
                }
            };

            for event in reframer.process_chunk(&chunk) {
                yield SseEvent::named(&event);
            }
        }

        for event in reframer.finish() {
            yield SseEvent::named(&event);
        }

        ctx.complete();
    }
}

/// Forward an `OpenAI` chat completion body with the model swapped for the
/// backend id. The reply is returned untouched.
pub async fn proxy_chat_completion(
    mut body: Map<String, Value>,
    model: &Model,
    backend: &BackendClient,
    logger: &SharedLogger,
) -> Result<Value> {
    body.insert("model".to_string(), Value::String(model.id.clone()));

    logger.info(
        "proxy",
        format!("POST {} model={}", backend.chat_completions_url(), model.id),
    );

    backend.complete(&body).await
}

/// Streaming variant of [`proxy_chat_completion`]: backend chunks are relayed as
/// `data:` events and terminated with `[DONE]`.
pub async fn proxy_chat_completion_streaming(
    mut body: Map<String, Value>,
    model: &Model,
    backend: &BackendClient,
    logger: &SharedLogger,
) -> Result<SseStream> {
    body.insert("model".to_string(), Value::String(model.id.clone()));

    logger.info(
        "proxy",
        format!(
            "POST {} model={} (streaming)",
            backend.chat_completions_url(),
            model.id
        ),
    );

    let chunks = backend.stream(&body).await?;

    Ok(Box::pin(relay_stream(chunks, model.name.clone(), logger.clone())))
}

fn relay_stream(
    mut chunks: ChunkStream,
    model: String,
    logger: SharedLogger,
) -> impl Stream<Item = Result<SseEvent>> + Send + 'static {
    async_stream::stream! {
        let mut ctx = RequestContext::new("chat_completions", &model, logger.clone());

        while let Some(item) = chunks.next().await {
            match item {
                Ok(data) => yield Ok(SseEvent::data(data)),
                Err(e) => {
                    logger.error("stream", format!("Backend stream failed: {e}"));
                    yield Err(e);
                    return;
                }
            }
        }

        yield Ok(SseEvent::data("[DONE]"));
        ctx.complete();
    }
}

/// Pull the `model` field out of a raw `OpenAI` request body.
pub fn requested_model(body: &Map<String, Value>) -> Result<&str> {
    body.get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::invalid_request("Missing `model` field"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn model() -> Model {
        Model {
            id: "backend-m".to_string(),
            name: "m".to_string(),
            endpoint: "/compat".to_string(),
        }
    }

    async fn backend_with_sse(body: &str) -> (MockServer, BackendClient) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"model": "backend-m", "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = BackendClient::for_model(reqwest::Client::new(), &server.uri(), &model(), "k");
        (server, client)
    }

    fn streaming_request() -> MessagesRequest {
        serde_json::from_value(json!({
            "model": "m",
            "max_tokens": 64,
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_requested_model() {
        let body = json!({"model": "m", "messages": []});
        assert_eq!(requested_model(body.as_object().unwrap()).unwrap(), "m");

        let body = json!({"messages": []});
        assert!(requested_model(body.as_object().unwrap()).is_err());
    }

    #[tokio::test]
    async fn test_messages_stream_reframes_backend_chunks() {
        let sse = concat!(
            "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: not-json\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let (_server, backend) = backend_with_sse(sse).await;
        let logger = SharedLogger::in_memory();

        let events: Vec<SseEvent> =
            proxy_messages_streaming(&streaming_request(), &model(), &backend, &logger)
                .await
                .unwrap()
                .map(|e| e.unwrap())
                .collect()
                .await;

        let names: Vec<&str> = events.iter().filter_map(|e| e.event.as_deref()).collect();
        assert_eq!(
            names,
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let start: Value = serde_json::from_str(&events[0].data).unwrap();
        assert_eq!(start["message"]["model"], "m");

        let delta: Value = serde_json::from_str(&events[5].data).unwrap();
        assert_eq!(delta["delta"]["stop_reason"], "end_turn");

        assert!(logger
            .recent(10)
            .iter()
            .any(|e| e.message.starts_with("messages stream completed")));
    }

    #[tokio::test]
    async fn test_chat_completion_stream_relays_and_terminates() {
        let sse = concat!(
            "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"x\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let (_server, backend) = backend_with_sse(sse).await;
        let body = json!({"model": "m", "stream": true, "messages": [], "n": 1});

        let events: Vec<SseEvent> = proxy_chat_completion_streaming(
            body.as_object().unwrap().clone(),
            &model(),
            &backend,
            &SharedLogger::in_memory(),
        )
        .await
        .unwrap()
        .map(|e| e.unwrap())
        .collect()
        .await;

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.event.is_none()));
        assert!(events[0].data.contains("\"content\":\"x\""));
        assert_eq!(events[1].data, "[DONE]");
    }

    #[tokio::test]
    async fn test_abandoned_stream_is_logged() {
        let sse = "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"x\"}}]}\n\n";
        let (_server, backend) = backend_with_sse(sse).await;
        let logger = SharedLogger::in_memory();

        let mut stream = proxy_messages_streaming(&streaming_request(), &model(), &backend, &logger)
            .await
            .unwrap();
        // Take message_start only, then hang up.
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.event.as_deref(), Some("message_start"));
        drop(stream);

        assert!(logger
            .recent(10)
            .iter()
            .any(|e| e.message.contains("ended early")));
    }
}
