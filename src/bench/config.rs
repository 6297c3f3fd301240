//! Configuration structs for benchmarking.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8001/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "openai/gpt-oss-120b";

/// Path of the chat completions endpoint, shared with the mock server
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Configuration for the mock chat completions server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockServerConfig {
    /// Port to listen on (0 for random)
    pub port: u16,
    /// Delay before the first content chunk in milliseconds
    pub first_chunk_delay_ms: u64,
    /// Simulated latency per chunk in milliseconds
    pub chunk_latency_ms: u64,
    /// Number of content chunks to generate (capped by the request's max_tokens)
    pub chunk_count: usize,
    /// Words per content chunk
    pub words_per_chunk: usize,
    /// Error rate (0.0 to 1.0)
    pub error_rate: f64,
    /// Emit an undecodable event line after this many content chunks
    pub malformed_after: Option<usize>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            first_chunk_delay_ms: 20,
            chunk_latency_ms: 10,
            chunk_count: 20,
            words_per_chunk: 1,
            error_rate: 0.0,
            malformed_after: None,
        }
    }
}

/// Configuration for a benchmark run.
///
/// Built once before the first request and shared read-only by every
/// request task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Full URL of the chat completions endpoint
    pub url: String,
    /// Model identifier sent in every request
    pub model: String,
    /// Maximum number of requests in flight
    pub concurrency: usize,
    /// Requests issued per prompt category
    pub requests_per_category: usize,
    /// `max_tokens` sent in every request
    pub max_tokens: u32,
    /// Whole-request timeout in seconds
    pub timeout_secs: Option<u64>,
    /// Connection establishment timeout in seconds
    pub connect_timeout_secs: Option<u64>,
    /// Longest wait for the next content fragment in seconds
    pub idle_timeout_secs: Option<u64>,
    /// Bearer token for the target API
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Keep prompt responses on the records for the detailed report
    pub capture_responses: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            concurrency: 50,
            requests_per_category: 200,
            max_tokens: 150,
            timeout_secs: Some(300),
            connect_timeout_secs: Some(30),
            idle_timeout_secs: None,
            api_key: None,
            capture_responses: false,
        }
    }
}

impl RunConfig {
    /// Config pointed at a locally started mock server
    pub fn standalone(port: u16) -> Self {
        Self {
            url: format!("http://127.0.0.1:{}{}", port, CHAT_COMPLETIONS_PATH),
            model: "mock-model".to_string(),
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.url)
            .with_context(|| format!("Invalid target URL: {}", self.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("Target URL must use http or https: {}", self.url);
        }
        if self.model.trim().is_empty() {
            bail!("Model identifier must not be empty");
        }
        if self.concurrency == 0 {
            bail!("Concurrency must be greater than zero");
        }
        if self.requests_per_category == 0 {
            bail!("Requests per category must be greater than zero");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.filter(|&s| s > 0).map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs
            .filter(|&s| s > 0)
            .map(Duration::from_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs
            .filter(|&s| s > 0)
            .map(Duration::from_secs)
    }
}
