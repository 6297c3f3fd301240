//! Load testing for streaming chat completion APIs.
//!
//! - Prompt corpus loading
//! - Request runner and semaphore-bounded batch execution
//! - Per-category metrics aggregation (HdrHistogram percentiles)
//! - Report generation
//! - Mock OpenAI-compatible SSE server

pub mod config;
pub mod metrics;
pub mod mock_server;
pub mod prompts;
pub mod record;
pub mod report;
pub mod runner;

pub use config::{MockServerConfig, RunConfig};
pub use metrics::MetricsAggregator;
pub use mock_server::MockChatServer;
pub use prompts::{PromptCategory, PromptCorpus};
pub use record::{Outcome, RequestRecord, WorkItem};
pub use report::BenchmarkReport;
pub use runner::{BenchmarkRunner, RequestRunner};
