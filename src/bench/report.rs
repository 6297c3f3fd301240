//! Report generation for benchmark results.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::config::RunConfig;
use super::metrics::{BucketStats, BucketSummary, MetricsAggregator};
use super::record::{Outcome, RequestRecord};

/// Settings and timing of the run a report describes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub started_at: String,
    pub url: String,
    pub model: String,
    pub concurrency: usize,
    pub requests_per_category: usize,
    pub max_tokens: u32,
    pub wall_time_secs: f64,
}

impl RunInfo {
    pub fn new(config: &RunConfig, started_at: DateTime<Local>, wall_time: Duration) -> Self {
        Self {
            started_at: started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            url: config.url.clone(),
            model: config.model.clone(),
            concurrency: config.concurrency,
            requests_per_category: config.requests_per_category,
            max_tokens: config.max_tokens,
            wall_time_secs: wall_time.as_secs_f64(),
        }
    }
}

/// One request as shown in the detailed section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDetail {
    pub category: String,
    pub sequence: usize,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_first_token_secs: Option<f64>,
    pub total_duration_secs: f64,
    pub completion_tokens: u64,
    pub tokens_per_second: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&RequestRecord> for RequestDetail {
    fn from(record: &RequestRecord) -> Self {
        let mut detail = Self {
            category: record.category.clone(),
            sequence: record.sequence,
            prompt: record.prompt.clone(),
            response: None,
            time_to_first_token_secs: None,
            total_duration_secs: record.total_duration.as_secs_f64(),
            completion_tokens: 0,
            tokens_per_second: 0.0,
            error: None,
        };

        match &record.outcome {
            Outcome::Success {
                time_to_first_token,
                completion_tokens,
                tokens_per_second,
                response,
            } => {
                detail.response = response.clone();
                detail.time_to_first_token_secs = time_to_first_token.map(|d| d.as_secs_f64());
                detail.completion_tokens = *completion_tokens;
                detail.tokens_per_second = *tokens_per_second;
            }
            Outcome::Failure { detail: cause, .. } => {
                detail.error = Some(cause.clone());
            }
        }

        detail
    }
}

/// Complete benchmark report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub run: RunInfo,
    /// One summary per category, in corpus order
    pub categories: Vec<BucketSummary>,
    pub overall: BucketSummary,
    /// Per-request details, only in detailed mode
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<RequestDetail>,
}

impl BenchmarkReport {
    /// Build a report from aggregated records
    pub fn build(run: RunInfo, aggregator: &MetricsAggregator, include_requests: bool) -> Self {
        let requests = if include_requests {
            aggregator.records().iter().map(RequestDetail::from).collect()
        } else {
            Vec::new()
        };

        Self {
            run,
            categories: aggregator.category_summaries(),
            overall: aggregator.overall_summary(),
            requests,
        }
    }

    /// Export the report as JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize report")
    }

    /// Write the text report into `dir`, creating it if needed.
    ///
    /// Without a file name the report goes to `llm_benchmark_<timestamp>.txt`.
    pub fn write_to_dir(&self, dir: &Path, file_name: Option<&str>) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        let name = match file_name {
            Some(name) => name.to_string(),
            None => default_file_name(Local::now()),
        };
        let path = dir.join(name);

        std::fs::write(&path, self.to_string())
            .with_context(|| format!("Failed to write report to {}", path.display()))?;

        Ok(path)
    }

    fn fmt_details(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut current: Option<&str> = None;
        for detail in &self.requests {
            if current != Some(detail.category.as_str()) {
                current = Some(detail.category.as_str());
                writeln!(
                    f,
                    "--- Running Benchmark for Category: {} ---\n",
                    title_case(&detail.category)
                )?;
            }

            let total = self
                .categories
                .iter()
                .find(|c| c.label == detail.category)
                .map(|c| c.total_requests)
                .unwrap_or_default();
            writeln!(
                f,
                "--- {} Request {}/{} ---",
                title_case(&detail.category),
                detail.sequence,
                total
            )?;
            writeln!(f, "Prompt: {}", detail.prompt)?;

            match (&detail.error, detail.time_to_first_token_secs) {
                (Some(error), _) => writeln!(f, "Error during request: {}", error)?,
                (None, None) => writeln!(
                    f,
                    "Status: Request succeeded but no tokens were generated (Empty Response)."
                )?,
                (None, Some(ttft)) => {
                    if let Some(response) = &detail.response {
                        writeln!(f, "Response: {}", response)?;
                    }
                    writeln!(f, "Time to First Token: {:.4} seconds", ttft)?;
                    writeln!(
                        f,
                        "Total Request Time: {:.4} seconds",
                        detail.total_duration_secs
                    )?;
                    writeln!(f, "Completion Tokens: {}", detail.completion_tokens)?;
                    writeln!(f, "Tokens per Second (TPS): {:.2}", detail.tokens_per_second)?;
                }
            }
            writeln!(f, "{}", "-".repeat(20))?;
        }
        Ok(())
    }
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Benchmark Results - {} ---\n", self.run.started_at)?;
        writeln!(f, "URL: {}", self.run.url)?;
        writeln!(f, "Model: {}", self.run.model)?;
        writeln!(f, "Concurrency: {}", self.run.concurrency)?;
        writeln!(f, "Requests per Category: {}", self.run.requests_per_category)?;
        writeln!(f, "Max Tokens: {}", self.run.max_tokens)?;
        writeln!(f, "Total Requests: {}", self.overall.total_requests)?;
        writeln!(f, "Wall Time: {:.2} seconds\n", self.run.wall_time_secs)?;

        if !self.requests.is_empty() {
            self.fmt_details(f)?;
        }

        for category in &self.categories {
            writeln!(
                f,
                "\n--- Summary Benchmark Results for {} ---",
                title_case(&category.label)
            )?;
            fmt_counts(f, category)?;
            match &category.stats {
                Some(stats) => fmt_stats(f, stats)?,
                None => writeln!(f, "No successful requests were made for this category.")?,
            }
        }

        match &self.overall.stats {
            Some(stats) => {
                writeln!(
                    f,
                    "\n--- Overall Benchmark Results (All Categories Combined) ---"
                )?;
                fmt_counts(f, &self.overall)?;
                fmt_stats(f, stats)?;
            }
            None => {
                writeln!(f, "\nNo successful requests were made.")?;
                fmt_counts(f, &self.overall)?;
            }
        }

        Ok(())
    }
}

fn fmt_counts(f: &mut fmt::Formatter<'_>, summary: &BucketSummary) -> fmt::Result {
    writeln!(
        f,
        "Successful Requests: {}/{} ({:.1}%)",
        summary.successful_requests,
        summary.total_requests,
        summary.success_rate()
    )?;

    let kinds: Vec<String> = summary
        .failures_by_kind
        .iter()
        .map(|(kind, count)| format!("{}: {}", kind, count))
        .collect();
    if kinds.is_empty() {
        writeln!(f, "Failed Requests: {}", summary.failed_requests)?;
    } else {
        writeln!(
            f,
            "Failed Requests: {} ({})",
            summary.failed_requests,
            kinds.join(", ")
        )?;
    }

    if summary.empty_completions > 0 {
        writeln!(f, "Empty Completions: {}", summary.empty_completions)?;
    }
    Ok(())
}

fn fmt_stats(f: &mut fmt::Formatter<'_>, stats: &BucketStats) -> fmt::Result {
    match &stats.time_to_first_token {
        Some(ttft) => {
            writeln!(f, "Average Time to First Token: {:.4} seconds", ttft.avg)?;
            writeln!(f, "Min Time to First Token: {:.4} seconds", ttft.min)?;
            writeln!(f, "Max Time to First Token: {:.4} seconds", ttft.max)?;
        }
        None => writeln!(f, "Time to First Token: n/a (no content received)")?,
    }

    let total = &stats.total_duration;
    writeln!(f, "Average Total Request Time: {:.4} seconds", total.avg)?;
    writeln!(f, "Min Total Request Time: {:.4} seconds", total.min)?;
    writeln!(f, "Max Total Request Time: {:.4} seconds", total.max)?;

    let tps = &stats.tokens_per_second;
    writeln!(f, "Average Tokens per Second (TPS): {:.2}", tps.avg)?;
    writeln!(f, "Min Tokens per Second (TPS): {:.2}", tps.min)?;
    writeln!(f, "Max Tokens per Second (TPS): {:.2}", tps.max)?;

    if let Some(p) = &stats.ttft_percentiles {
        writeln!(
            f,
            "Time to First Token p50/p95/p99: {:.4}s / {:.4}s / {:.4}s",
            p.p50, p.p95, p.p99
        )?;
    }
    if let Some(p) = &stats.duration_percentiles {
        writeln!(
            f,
            "Total Request Time p50/p95/p99: {:.4}s / {:.4}s / {:.4}s",
            p.p50, p.p95, p.p99
        )?;
    }
    writeln!(f)
}

/// `creative_text_generation` -> `Creative Text Generation`
pub fn title_case(label: &str) -> String {
    label
        .split(['_', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Timestamped report file name
pub fn default_file_name(now: DateTime<Local>) -> String {
    format!("llm_benchmark_{}.txt", now.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::record::WorkItem;
    use crate::error::RequestError;
    use crate::streaming::StreamStats;
    use chrono::TimeZone;

    fn item(category: &str, sequence: usize) -> WorkItem {
        WorkItem {
            category: category.to_string(),
            prompt: format!("prompt {}", sequence),
            sequence,
        }
    }

    fn success(category: &str, sequence: usize, ttft_ms: u64) -> RequestRecord {
        let stats = StreamStats {
            first_fragment_at: Some(Duration::from_millis(ttft_ms)),
            fragment_count: 10,
            text: Some("hello world".to_string()),
        };
        RequestRecord::success(item(category, sequence), stats, Duration::from_secs(2))
    }

    fn run_info() -> RunInfo {
        let started = Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        RunInfo::new(&RunConfig::default(), started, Duration::from_secs(3))
    }

    fn sample_report(include_requests: bool) -> BenchmarkReport {
        let mut aggregator = MetricsAggregator::new(["information_retrieval", "reasoning"]);
        aggregator.record(success("information_retrieval", 1, 100));
        aggregator.record(success("information_retrieval", 2, 300));
        aggregator.record(RequestRecord::failure(
            item("reasoning", 1),
            &RequestError::Transport("connection refused".to_string()),
            Duration::from_millis(1),
        ));
        BenchmarkReport::build(run_info(), &aggregator, include_requests)
    }

    #[test]
    fn test_title_case() {
        assert_eq!(
            title_case("creative_text_generation"),
            "Creative Text Generation"
        );
        assert_eq!(title_case("reasoning"), "Reasoning");
        assert_eq!(title_case("TASK_completion"), "Task Completion");
    }

    #[test]
    fn test_default_file_name() {
        let now = Local.with_ymd_and_hms(2024, 5, 1, 9, 5, 7).unwrap();
        assert_eq!(default_file_name(now), "llm_benchmark_20240501_090507.txt");
    }

    #[test]
    fn test_text_report_sections() {
        let text = sample_report(false).to_string();

        assert!(text.starts_with("--- Benchmark Results - 2024-05-01 12:30:00 ---"));
        assert!(text.contains("--- Summary Benchmark Results for Information Retrieval ---"));
        assert!(text.contains("Average Time to First Token: 0.2000 seconds"));
        assert!(text.contains("Min Time to First Token: 0.1000 seconds"));
        assert!(text.contains("Max Time to First Token: 0.3000 seconds"));
        assert!(text.contains("Average Tokens per Second (TPS): 5.00"));
        assert!(text.contains("--- Summary Benchmark Results for Reasoning ---"));
        assert!(text.contains("No successful requests were made for this category."));
        assert!(text.contains("Failed Requests: 1 (transport: 1)"));
        assert!(text.contains("--- Overall Benchmark Results (All Categories Combined) ---"));
        assert!(!text.contains("Running Benchmark for Category"));
    }

    #[test]
    fn test_text_report_category_order() {
        let text = sample_report(false).to_string();
        let first = text.find("Information Retrieval ---").unwrap();
        let second = text.find("Reasoning ---").unwrap();
        let overall = text.find("Overall Benchmark Results").unwrap();
        assert!(first < second && second < overall);
    }

    #[test]
    fn test_detailed_report() {
        let report = sample_report(true);
        assert_eq!(report.requests.len(), 3);

        let text = report.to_string();
        assert!(text.contains("--- Running Benchmark for Category: Information Retrieval ---"));
        assert!(text.contains("--- Information Retrieval Request 2/2 ---"));
        assert!(text.contains("Response: hello world"));
        assert!(text.contains("Error during request: Transport error: connection refused"));
    }

    #[test]
    fn test_no_successful_requests() {
        let mut aggregator = MetricsAggregator::new(["reasoning"]);
        aggregator.record(RequestRecord::failure(
            item("reasoning", 1),
            &RequestError::http_status(500, "boom"),
            Duration::from_millis(1),
        ));
        let report = BenchmarkReport::build(run_info(), &aggregator, false);

        let text = report.to_string();
        assert!(text.contains("No successful requests were made."));
        assert!(!text.contains("Overall Benchmark Results"));
    }

    #[test]
    fn test_json_export() {
        let json = sample_report(false).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["overall"]["total_requests"], 3);
        assert_eq!(value["categories"][1]["failures_by_kind"]["transport"], 1);
        assert!(value["categories"][1]["stats"].is_null());
        assert!(value.get("requests").is_none());
    }

    #[test]
    fn test_write_to_dir() {
        let dir = std::env::temp_dir().join(format!("bench-report-{}", uuid::Uuid::new_v4()));
        let report = sample_report(false);

        let path = report.write_to_dir(&dir, Some("result.txt")).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(path.file_name().unwrap(), "result.txt");
        assert_eq!(written, report.to_string());
    }
}
