//! Benchmark runner with concurrency control.

use anyhow::Context;
use futures::StreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::config::RunConfig;
use super::metrics::MetricsAggregator;
use super::prompts::PromptCorpus;
use super::record::{RequestRecord, WorkItem};
use super::report::{BenchmarkReport, RunInfo};
use crate::error::{RequestError, MAX_ERROR_BODY_CHARS};
use crate::models::openai::ChatCompletionRequest;
use crate::streaming::{content_fragments, StreamStats};

// ==================================================================================================
// Request Runner
// ==================================================================================================

/// Longest wait for the diagnostic body of a non-success response
const ERROR_BODY_TIMEOUT: Duration = Duration::from_secs(2);

/// Executes single streaming exchanges against the target API.
///
/// `run` never fails: every outcome, including transport errors and
/// timeouts, comes back as a [`RequestRecord`].
pub struct RequestRunner {
    config: Arc<RunConfig>,
    client: reqwest::Client,
}

impl RequestRunner {
    /// Create a runner with a pooled HTTP client sized to the concurrency limit
    pub fn new(config: Arc<RunConfig>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().pool_max_idle_per_host(config.concurrency);
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = config.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    /// Run one request to completion and record the result
    pub async fn run(&self, item: WorkItem) -> RequestRecord {
        let start = Instant::now();
        let result = self.exchange(&item.prompt, start).await;
        let total_duration = start.elapsed();

        match result {
            Ok(stats) => {
                debug!(
                    category = %item.category,
                    sequence = item.sequence,
                    fragments = stats.fragment_count,
                    ttft = ?stats.first_fragment_at,
                    total = ?total_duration,
                    "Request completed"
                );
                RequestRecord::success(item, stats, total_duration)
            }
            Err(err) => {
                warn!(
                    category = %item.category,
                    sequence = item.sequence,
                    error = %err,
                    "Request failed"
                );
                RequestRecord::failure(item, &err, total_duration)
            }
        }
    }

    async fn exchange(&self, prompt: &str, start: Instant) -> Result<StreamStats, RequestError> {
        let body = ChatCompletionRequest::streaming(
            self.config.model.as_str(),
            prompt,
            self.config.max_tokens,
        );

        let mut request = self
            .client
            .post(self.config.url.as_str())
            .header("Accept", "text/event-stream")
            .json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;

        // Status errors are reported without touching the stream
        let status = response.status();
        if !status.is_success() {
            let text = read_error_body(response).await;
            return Err(RequestError::http_status(status.as_u16(), &text));
        }

        let fragments = content_fragments(response.bytes_stream(), start);
        futures::pin_mut!(fragments);

        let idle_timeout = self.config.idle_timeout();
        let mut stats = StreamStats::new(self.config.capture_responses);
        loop {
            let next = match idle_timeout {
                Some(limit) => tokio::time::timeout(limit, fragments.next())
                    .await
                    .map_err(|_| {
                        RequestError::Timeout(format!("no stream content for {:?}", limit))
                    })?,
                None => fragments.next().await,
            };

            match next {
                Some(fragment) => stats.observe(&fragment?),
                None => break,
            }
        }

        Ok(stats)
    }
}

/// Read the start of an error body for diagnostics.
///
/// Stops after `MAX_ERROR_BODY_CHARS` bytes or `ERROR_BODY_TIMEOUT`, whichever
/// comes first; the rest of the body is dropped with the response.
async fn read_error_body(mut response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let read = async {
        while body.len() < MAX_ERROR_BODY_CHARS {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) | Err(_) => break,
            }
        }
    };
    let finished = tokio::time::timeout(ERROR_BODY_TIMEOUT, read).await.is_ok();
    if !finished {
        debug!(bytes = body.len(), "Error body still streaming, keeping partial text");
    }
    String::from_utf8_lossy(&body).into_owned()
}

// ==================================================================================================
// Concurrency Controller
// ==================================================================================================

/// Expand a corpus into the batch of work items for one run.
///
/// Categories keep corpus order; each contributes `per_category` items,
/// cycling its prompt list when it has fewer prompts than that.
pub fn plan_batch(corpus: &PromptCorpus, per_category: usize) -> Vec<WorkItem> {
    corpus
        .categories()
        .iter()
        .flat_map(|category| {
            category
                .prompts
                .iter()
                .cycle()
                .take(per_category)
                .enumerate()
                .map(move |(index, prompt)| WorkItem {
                    category: category.name.clone(),
                    prompt: prompt.clone(),
                    sequence: index + 1,
                })
        })
        .collect()
}

/// Run every item with at most `concurrency` executions in flight.
///
/// All items are spawned up front and wait on a shared semaphore; the
/// permit is held for the whole execution and released when the task ends,
/// whether it returned or panicked. Returns exactly one record per item, in
/// submission order.
pub async fn run_batch<F, Fut>(
    items: Vec<WorkItem>,
    concurrency: usize,
    execute: F,
) -> Vec<RequestRecord>
where
    F: Fn(WorkItem) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RequestRecord> + Send + 'static,
{
    let total = items.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let execute = Arc::new(execute);
    let completed = Arc::new(AtomicUsize::new(0));
    let progress_step = (total / 10).max(1);

    let mut handles = Vec::with_capacity(total);
    for item in items {
        let fallback = item.clone();
        let semaphore = semaphore.clone();
        let execute = execute.clone();
        let completed = completed.clone();

        let handle = tokio::spawn(async move {
            let record = match semaphore.acquire_owned().await {
                Ok(permit) => {
                    let record = execute(item).await;
                    drop(permit);
                    record
                }
                Err(e) => RequestRecord::failure(
                    item,
                    &RequestError::Aborted(e.to_string()),
                    Duration::ZERO,
                ),
            };

            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            if done % progress_step == 0 || done == total {
                info!(completed = done, total = total, "Benchmark progress");
            }

            record
        });

        handles.push((fallback, handle));
    }

    // Wait for all in-flight requests to complete
    let mut records = Vec::with_capacity(total);
    for (fallback, handle) in handles {
        match handle.await {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(
                    category = %fallback.category,
                    sequence = fallback.sequence,
                    error = %e,
                    "Request task did not complete"
                );
                let err = RequestError::Aborted(e.to_string());
                records.push(RequestRecord::failure(fallback, &err, Duration::ZERO));
            }
        }
    }

    records
}

// ==================================================================================================
// Benchmark Runner
// ==================================================================================================

/// Benchmark runner that executes a prompt corpus against the target API
pub struct BenchmarkRunner {
    config: Arc<RunConfig>,
    runner: Arc<RequestRunner>,
}

impl BenchmarkRunner {
    /// Create a new benchmark runner
    pub fn new(config: RunConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let runner = Arc::new(RequestRunner::new(config.clone())?);

        Ok(Self { config, runner })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Issue the full batch and return one record per scheduled request
    pub async fn run(&self, corpus: &PromptCorpus) -> Vec<RequestRecord> {
        let items = plan_batch(corpus, self.config.requests_per_category);
        info!(
            url = %self.config.url,
            model = %self.config.model,
            total_requests = items.len(),
            concurrency = self.config.concurrency,
            "Starting benchmark"
        );

        let runner = self.runner.clone();
        run_batch(items, self.config.concurrency, move |item| {
            let runner = runner.clone();
            async move { runner.run(item).await }
        })
        .await
    }

    /// Run the batch, then aggregate it into a report
    pub async fn run_report(&self, corpus: &PromptCorpus) -> BenchmarkReport {
        let started_at = chrono::Local::now();
        let start = Instant::now();

        let records = self.run(corpus).await;
        let wall_time = start.elapsed();

        let mut aggregator = MetricsAggregator::new(corpus.labels());
        aggregator.record_all(records);

        let run = RunInfo::new(&self.config, started_at, wall_time);
        let report = BenchmarkReport::build(run, &aggregator, self.config.capture_responses);
        info!(
            successful = report.overall.successful_requests,
            failed = report.overall.failed_requests,
            wall_time_secs = wall_time.as_secs_f64(),
            "Benchmark finished"
        );
        report
    }
}
