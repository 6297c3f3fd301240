//! Mock OpenAI-compatible server that streams chat completion chunks over SSE.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use super::config::{MockServerConfig, CHAT_COMPLETIONS_PATH};
use crate::models::openai::{ChatCompletionChunk, ChatCompletionChunkDelta, ChatCompletionRequest};

/// Mock chat completions server for standalone runs and tests
pub struct MockChatServer {
    config: MockServerConfig,
    shutdown_tx: Option<oneshot::Sender<()>>,
    port: u16,
}

impl MockChatServer {
    /// Create a new mock server with the given configuration
    pub fn new(config: MockServerConfig) -> Self {
        Self {
            config,
            shutdown_tx: None,
            port: 0,
        }
    }

    /// Start the mock server and return the actual port
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("127.0.0.1:{}", self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        self.port = port;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = router(self.config.clone());
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        info!(port = port, "Mock server listening");
        Ok(port)
    }

    /// Get the server's port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Full URL of the chat completions endpoint
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.port, CHAT_COMPLETIONS_PATH)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockChatServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Router serving the chat completions endpoint
pub fn router(config: MockServerConfig) -> Router {
    Router::new()
        .route(CHAT_COMPLETIONS_PATH, post(handle_chat_completions))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(config))
}

async fn handle_chat_completions(
    State(config): State<Arc<MockServerConfig>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    // Simulate random errors
    if config.error_rate > 0.0 {
        let mut rng = rand::thread_rng();
        if rng.gen::<f64>() < config.error_rate {
            return (StatusCode::INTERNAL_SERVER_ERROR, "Simulated error").into_response();
        }
    }

    let limit = request
        .max_tokens
        .map(|max| max as usize)
        .unwrap_or(config.chunk_count);
    let chunks = config.chunk_count.min(limit);
    debug!(model = %request.model, chunks = chunks, "Mock completion");

    let stream = generate_stream(config, request.model, chunks);
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Generate an SSE body: role delta, content deltas, finish chunk, `[DONE]`
fn generate_stream(
    config: Arc<MockServerConfig>,
    model: String,
    chunks: usize,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> {
    async_stream::stream! {
        let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());

        let role = ChatCompletionChunkDelta {
            role: Some("assistant".to_string()),
            content: None,
        };
        yield Ok(sse_event(&ChatCompletionChunk::with_delta(id.clone(), model.clone(), role, None)));

        tokio::time::sleep(Duration::from_millis(config.first_chunk_delay_ms)).await;

        for i in 0..chunks {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(config.chunk_latency_ms)).await;
                // Keep-alive blank line
                yield Ok(Bytes::from_static(b"\n"));
            }

            if config.malformed_after == Some(i) {
                yield Ok(Bytes::from_static(b"data: {\"choices\": [\n\n"));
            }

            let delta = ChatCompletionChunkDelta {
                role: None,
                content: Some(generate_content(config.words_per_chunk, i == 0)),
            };
            yield Ok(sse_event(&ChatCompletionChunk::with_delta(id.clone(), model.clone(), delta, None)));
        }

        let finish = ChatCompletionChunk::with_delta(
            id,
            model,
            ChatCompletionChunkDelta::default(),
            Some("stop".to_string()),
        );
        yield Ok(sse_event(&finish));
        yield Ok(Bytes::from_static(b"data: [DONE]\n\n"));
    }
}

fn sse_event(chunk: &ChatCompletionChunk) -> Bytes {
    let json = serde_json::to_string(chunk).unwrap_or_default();
    Bytes::from(format!("data: {}\n\n", json))
}

/// Random words for one content delta
fn generate_content(words: usize, first: bool) -> String {
    const WORDS: &[&str] = &[
        "the",
        "quick",
        "brown",
        "fox",
        "jumps",
        "over",
        "lazy",
        "dog",
        "hello",
        "world",
        "rust",
        "benchmark",
        "latency",
        "token",
        "stream",
        "response",
    ];

    let mut rng = rand::thread_rng();
    let mut result = String::new();
    for n in 0..words.max(1) {
        if !(first && n == 0) {
            result.push(' ');
        }
        result.push_str(WORDS[rng.gen_range(0..WORDS.len())]);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{parse_line, LineBuffer, SseLine};
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn fast_config() -> MockServerConfig {
        MockServerConfig {
            first_chunk_delay_ms: 0,
            chunk_latency_ms: 0,
            chunk_count: 5,
            ..Default::default()
        }
    }

    fn request(max_tokens: u32) -> Request<Body> {
        let body = ChatCompletionRequest::streaming("mock-model", "hello", max_tokens);
        Request::builder()
            .method("POST")
            .uri(CHAT_COMPLETIONS_PATH)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    async fn parse_body(response: Response) -> Vec<SseLine> {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let mut buffer = LineBuffer::new();
        let mut lines = buffer.feed(&bytes);
        lines.extend(buffer.finish());
        lines
            .iter()
            .map(|line| parse_line(line))
            .filter(|event| *event != SseLine::Ignored)
            .collect()
    }

    fn content_count(events: &[SseLine]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, SseLine::Content(_)))
            .count()
    }

    #[tokio::test]
    async fn test_stream_shape() {
        let response = router(fast_config()).oneshot(request(100)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let events = parse_body(response).await;
        assert_eq!(content_count(&events), 5);
        assert_eq!(events.last(), Some(&SseLine::Done));
        assert!(!events.iter().any(|e| matches!(e, SseLine::Malformed(_))));
    }

    #[tokio::test]
    async fn test_max_tokens_caps_chunks() {
        let response = router(fast_config()).oneshot(request(2)).await.unwrap();
        let events = parse_body(response).await;
        assert_eq!(content_count(&events), 2);
    }

    #[tokio::test]
    async fn test_zero_max_tokens_streams_no_content() {
        let response = router(fast_config()).oneshot(request(0)).await.unwrap();
        let events = parse_body(response).await;
        assert_eq!(content_count(&events), 0);
        assert_eq!(events.last(), Some(&SseLine::Done));
    }

    #[tokio::test]
    async fn test_malformed_injection() {
        let config = MockServerConfig {
            malformed_after: Some(2),
            ..fast_config()
        };
        let response = router(config).oneshot(request(100)).await.unwrap();
        let events = parse_body(response).await;

        let malformed = events
            .iter()
            .filter(|e| matches!(e, SseLine::Malformed(_)))
            .count();
        assert_eq!(malformed, 1);
        assert_eq!(content_count(&events), 5);
    }

    #[tokio::test]
    async fn test_error_rate() {
        let config = MockServerConfig {
            error_rate: 1.0,
            ..fast_config()
        };
        let response = router(config).oneshot(request(10)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_generate_content_words() {
        assert_eq!(generate_content(3, true).split(' ').count(), 3);
        assert!(generate_content(1, false).starts_with(' '));
    }

    #[tokio::test]
    async fn test_mock_server_starts() {
        let mut server = MockChatServer::new(fast_config());
        let port = server.start().await.unwrap();
        assert!(port > 0);
        assert!(server.url().ends_with(CHAT_COMPLETIONS_PATH));

        let client = reqwest::Client::new();
        let resp = client
            .post(server.url())
            .json(&ChatCompletionRequest::streaming("mock-model", "hi", 3))
            .send()
            .await
            .unwrap();

        assert!(resp.status().is_success());
        server.stop();
    }
}
