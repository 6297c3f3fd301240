//! Per-request result record.

use std::time::Duration;

use crate::error::{FailureKind, RequestError};
use crate::streaming::StreamStats;

/// One scheduled request: a prompt drawn from a category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub category: String,
    pub prompt: String,
    /// 1-based position within its category
    pub sequence: usize,
}

/// How a request ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        /// `None` when the server completed without any content
        time_to_first_token: Option<Duration>,
        completion_tokens: u64,
        tokens_per_second: f64,
        /// Generated text, when response capture is enabled
        response: Option<String>,
    },
    Failure {
        kind: FailureKind,
        detail: String,
    },
}

/// Result of one request/response exchange. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub category: String,
    pub prompt: String,
    pub sequence: usize,
    pub total_duration: Duration,
    pub outcome: Outcome,
}

impl RequestRecord {
    /// Record for a stream that was consumed to the end.
    pub fn success(item: WorkItem, stats: StreamStats, total_duration: Duration) -> Self {
        Self {
            category: item.category,
            prompt: item.prompt,
            sequence: item.sequence,
            total_duration,
            outcome: Outcome::Success {
                time_to_first_token: stats.first_fragment_at,
                completion_tokens: stats.fragment_count,
                tokens_per_second: tokens_per_second(stats.fragment_count, total_duration),
                response: stats.text,
            },
        }
    }

    pub fn failure(item: WorkItem, error: &RequestError, total_duration: Duration) -> Self {
        Self {
            category: item.category,
            prompt: item.prompt,
            sequence: item.sequence,
            total_duration,
            outcome: Outcome::Failure {
                kind: error.kind(),
                detail: error.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    /// Successful exchange that produced no content fragments
    pub fn is_empty_completion(&self) -> bool {
        matches!(
            self.outcome,
            Outcome::Success {
                time_to_first_token: None,
                ..
            }
        )
    }

    pub fn time_to_first_token(&self) -> Option<Duration> {
        match &self.outcome {
            Outcome::Success {
                time_to_first_token,
                ..
            } => *time_to_first_token,
            Outcome::Failure { .. } => None,
        }
    }
}

/// Fragments per second over the whole exchange.
///
/// Zero when nothing was generated or the duration did not register, so the
/// result is always finite.
pub fn tokens_per_second(fragments: u64, total_duration: Duration) -> f64 {
    let secs = total_duration.as_secs_f64();
    if fragments == 0 || secs <= 0.0 {
        return 0.0;
    }
    fragments as f64 / secs
}
