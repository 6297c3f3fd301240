//! Metrics aggregation over completed request records.
//!
//! Records are grouped into one bucket per category plus an overall bucket.
//! Averages, minimums and maximums are exact; percentiles come from an
//! HdrHistogram.

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::record::{Outcome, RequestRecord};
use crate::error::FailureKind;

/// Label of the bucket holding every record
pub const OVERALL_LABEL: &str = "overall";

/// Highest value tracked by the percentile histograms (10 minutes, in microseconds)
const MAX_TRACKED_MICROS: u64 = 600_000_000;

// ==================================================================================================
// Reducers
// ==================================================================================================

/// Average, minimum and maximum of a set of values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    /// `None` for an empty slice.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let sum: f64 = values.iter().sum();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Some(Self {
            avg: sum / values.len() as f64,
            min,
            max,
        })
    }

    pub fn from_durations(values: &[Duration]) -> Option<Self> {
        let secs: Vec<f64> = values.iter().map(Duration::as_secs_f64).collect();
        Self::from_values(&secs)
    }
}

/// Latency percentiles in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Percentiles {
    pub fn from_durations(values: &[Duration]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let mut hist = Histogram::<u64>::new_with_bounds(1, MAX_TRACKED_MICROS, 3).ok()?;
        for value in values {
            let micros = u64::try_from(value.as_micros()).unwrap_or(u64::MAX);
            hist.saturating_record(micros.max(1));
        }

        let at = |quantile: f64| hist.value_at_quantile(quantile) as f64 / 1_000_000.0;
        Some(Self {
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
        })
    }
}

// ==================================================================================================
// Buckets
// ==================================================================================================

/// A named group of records, stored as indices into the aggregator's records
#[derive(Debug, Clone)]
pub struct MetricsBucket {
    label: String,
    members: Vec<usize>,
}

impl MetricsBucket {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            members: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Statistics over the successful records of a bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    /// `None` when every success was an empty completion
    pub time_to_first_token: Option<Summary>,
    pub total_duration: Summary,
    pub tokens_per_second: Summary,
    pub ttft_percentiles: Option<Percentiles>,
    pub duration_percentiles: Option<Percentiles>,
}

/// Final numbers for one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub label: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Successes that produced no content
    pub empty_completions: u64,
    pub completion_tokens: u64,
    pub failures_by_kind: BTreeMap<FailureKind, u64>,
    /// `None` when the bucket has no successful requests
    pub stats: Option<BucketStats>,
}

impl BucketSummary {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.successful_requests as f64 / self.total_requests as f64) * 100.0
    }
}

// ==================================================================================================
// Aggregator
// ==================================================================================================

/// Owns every record of a run and the buckets that group them
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    records: Vec<RequestRecord>,
    buckets: Vec<MetricsBucket>,
    overall: MetricsBucket,
}

impl MetricsAggregator {
    /// Seed buckets in report order, so categories without records still appear.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            records: Vec::new(),
            buckets: labels.into_iter().map(MetricsBucket::new).collect(),
            overall: MetricsBucket::new(OVERALL_LABEL),
        }
    }

    /// Add a record to its category bucket and the overall bucket.
    ///
    /// Unknown categories get a new bucket after the existing ones.
    pub fn record(&mut self, record: RequestRecord) {
        let index = self.records.len();
        let bucket = match self.buckets.iter().position(|b| b.label == record.category) {
            Some(position) => &mut self.buckets[position],
            None => {
                self.buckets.push(MetricsBucket::new(record.category.as_str()));
                let last = self.buckets.len() - 1;
                &mut self.buckets[last]
            }
        };
        bucket.members.push(index);
        self.overall.members.push(index);
        self.records.push(record);
    }

    pub fn record_all(&mut self, records: impl IntoIterator<Item = RequestRecord>) {
        for record in records {
            self.record(record);
        }
    }

    pub fn records(&self) -> &[RequestRecord] {
        &self.records
    }

    pub fn buckets(&self) -> &[MetricsBucket] {
        &self.buckets
    }

    pub fn overall(&self) -> &MetricsBucket {
        &self.overall
    }

    /// Summaries for every category bucket, in order
    pub fn category_summaries(&self) -> Vec<BucketSummary> {
        self.buckets.iter().map(|b| self.summarize(b)).collect()
    }

    pub fn overall_summary(&self) -> BucketSummary {
        self.summarize(&self.overall)
    }

    pub fn summarize(&self, bucket: &MetricsBucket) -> BucketSummary {
        let mut summary = BucketSummary {
            label: bucket.label.clone(),
            total_requests: bucket.members.len() as u64,
            successful_requests: 0,
            failed_requests: 0,
            empty_completions: 0,
            completion_tokens: 0,
            failures_by_kind: BTreeMap::new(),
            stats: None,
        };

        let mut ttfts = Vec::new();
        let mut durations = Vec::new();
        let mut rates = Vec::new();

        for record in bucket.members.iter().filter_map(|&i| self.records.get(i)) {
            match &record.outcome {
                Outcome::Success {
                    time_to_first_token,
                    completion_tokens,
                    tokens_per_second,
                    ..
                } => {
                    summary.successful_requests += 1;
                    summary.completion_tokens += completion_tokens;
                    match time_to_first_token {
                        Some(ttft) => ttfts.push(*ttft),
                        None => summary.empty_completions += 1,
                    }
                    durations.push(record.total_duration);
                    rates.push(*tokens_per_second);
                }
                Outcome::Failure { kind, .. } => {
                    summary.failed_requests += 1;
                    *summary.failures_by_kind.entry(*kind).or_insert(0) += 1;
                }
            }
        }

        summary.stats = match (
            Summary::from_durations(&durations),
            Summary::from_values(&rates),
        ) {
            (Some(total_duration), Some(tokens_per_second)) => Some(BucketStats {
                time_to_first_token: Summary::from_durations(&ttfts),
                total_duration,
                tokens_per_second,
                ttft_percentiles: Percentiles::from_durations(&ttfts),
                duration_percentiles: Percentiles::from_durations(&durations),
            }),
            _ => None,
        };

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::record::WorkItem;
    use crate::error::RequestError;
    use crate::streaming::StreamStats;
    use proptest::prelude::*;

    fn item(category: &str) -> WorkItem {
        WorkItem {
            category: category.to_string(),
            prompt: "p".to_string(),
            sequence: 1,
        }
    }

    fn success(category: &str, ttft_secs: f64, total_secs: f64, tokens: u64) -> RequestRecord {
        let stats = StreamStats {
            first_fragment_at: Some(Duration::from_secs_f64(ttft_secs)),
            fragment_count: tokens,
            text: None,
        };
        RequestRecord::success(item(category), stats, Duration::from_secs_f64(total_secs))
    }

    fn failure(category: &str) -> RequestRecord {
        let err = RequestError::http_status(500, "boom");
        RequestRecord::failure(item(category), &err, Duration::from_millis(3))
    }

    fn empty(category: &str, total_secs: f64) -> RequestRecord {
        RequestRecord::success(
            item(category),
            StreamStats::new(false),
            Duration::from_secs_f64(total_secs),
        )
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_summary_from_values() {
        let summary = Summary::from_values(&[3.0, 1.0, 2.0]).unwrap();
        assert!(close(summary.avg, 2.0));
        assert!(close(summary.min, 1.0));
        assert!(close(summary.max, 3.0));
    }

    #[test]
    fn test_summary_empty() {
        assert!(Summary::from_values(&[]).is_none());
        assert!(Summary::from_durations(&[]).is_none());
        assert!(Percentiles::from_durations(&[]).is_none());
    }

    #[test]
    fn test_ttft_aggregation() {
        let mut aggregator = MetricsAggregator::new(["reasoning"]);
        aggregator.record(success("reasoning", 0.1, 1.0, 10));
        aggregator.record(success("reasoning", 0.2, 1.0, 10));
        aggregator.record(success("reasoning", 0.3, 1.0, 10));

        let summaries = aggregator.category_summaries();
        let ttft = summaries[0]
            .stats
            .as_ref()
            .unwrap()
            .time_to_first_token
            .unwrap();
        assert!(close(ttft.avg, 0.2));
        assert!(close(ttft.min, 0.1));
        assert!(close(ttft.max, 0.3));
    }

    #[test]
    fn test_record_lands_in_category_and_overall() {
        let mut aggregator = MetricsAggregator::new(["a", "b"]);
        aggregator.record(success("a", 0.1, 1.0, 5));
        aggregator.record(success("b", 0.2, 2.0, 5));
        aggregator.record(failure("b"));

        assert_eq!(aggregator.buckets()[0].len(), 1);
        assert_eq!(aggregator.buckets()[1].len(), 2);
        assert_eq!(aggregator.overall().len(), 3);

        let overall = aggregator.overall_summary();
        assert_eq!(overall.label, OVERALL_LABEL);
        assert_eq!(overall.successful_requests, 2);
        assert_eq!(overall.failed_requests, 1);
        assert_eq!(overall.completion_tokens, 10);
        assert!(close(overall.success_rate(), 200.0 / 3.0));
    }

    #[test]
    fn test_failures_excluded_from_stats() {
        let mut aggregator = MetricsAggregator::new(["a"]);
        aggregator.record(success("a", 0.5, 2.0, 4));
        aggregator.record(failure("a"));
        aggregator.record(failure("a"));

        let summary = &aggregator.category_summaries()[0];
        let stats = summary.stats.as_ref().unwrap();
        assert!(close(stats.total_duration.avg, 2.0));
        assert!(close(stats.tokens_per_second.max, 2.0));
        assert_eq!(summary.failed_requests, 2);
        assert_eq!(summary.failures_by_kind.get(&FailureKind::HttpStatus), Some(&2));
    }

    #[test]
    fn test_bucket_without_successes() {
        let mut aggregator = MetricsAggregator::new(["quiet", "broken"]);
        aggregator.record(failure("broken"));

        let summaries = aggregator.category_summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].total_requests, 0);
        assert!(summaries[0].stats.is_none());
        assert_eq!(summaries[1].failed_requests, 1);
        assert!(summaries[1].stats.is_none());
    }

    #[test]
    fn test_empty_completion_policy() {
        let mut aggregator = MetricsAggregator::new(["a"]);
        aggregator.record(success("a", 0.2, 1.0, 5));
        aggregator.record(empty("a", 3.0));

        let summary = &aggregator.category_summaries()[0];
        assert_eq!(summary.successful_requests, 2);
        assert_eq!(summary.empty_completions, 1);

        let stats = summary.stats.as_ref().unwrap();
        let ttft = stats.time_to_first_token.unwrap();
        assert!(close(ttft.avg, 0.2));
        assert!(close(stats.total_duration.max, 3.0));
        assert!(close(stats.tokens_per_second.min, 0.0));
    }

    #[test]
    fn test_only_empty_completions() {
        let mut aggregator = MetricsAggregator::new(["a"]);
        aggregator.record(empty("a", 1.0));

        let stats = aggregator.category_summaries()[0].stats.clone().unwrap();
        assert!(stats.time_to_first_token.is_none());
        assert!(stats.ttft_percentiles.is_none());
        assert!(close(stats.total_duration.avg, 1.0));
    }

    #[test]
    fn test_unknown_category_appended() {
        let mut aggregator = MetricsAggregator::new(["a"]);
        aggregator.record(success("z", 0.1, 1.0, 1));
        aggregator.record(success("a", 0.1, 1.0, 1));

        let labels: Vec<&str> = aggregator.buckets().iter().map(|b| b.label()).collect();
        assert_eq!(labels, vec!["a", "z"]);
    }

    #[test]
    fn test_percentiles() {
        let values: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();
        let p = Percentiles::from_durations(&values).unwrap();
        assert!((p.p50 - 0.050).abs() < 0.001);
        assert!((p.p99 - 0.099).abs() < 0.001);
        assert!(p.p50 <= p.p95 && p.p95 <= p.p99);
    }

    proptest! {
        #[test]
        fn prop_summary_bounds(values in proptest::collection::vec(0.0f64..1000.0, 1..50)) {
            let summary = Summary::from_values(&values).unwrap();
            prop_assert!(summary.min <= summary.avg + 1e-9);
            prop_assert!(summary.avg <= summary.max + 1e-9);
            prop_assert!(values.iter().any(|v| *v == summary.min));
            prop_assert!(values.iter().any(|v| *v == summary.max));
        }

        #[test]
        fn prop_every_record_counted_once(outcomes in proptest::collection::vec((0usize..3, any::<bool>()), 0..40)) {
            let labels = ["x", "y", "z"];
            let mut aggregator = MetricsAggregator::new(labels);
            for (category, ok) in &outcomes {
                let label = labels[*category];
                aggregator.record(if *ok { success(label, 0.1, 1.0, 1) } else { failure(label) });
            }

            let per_category: u64 = aggregator
                .category_summaries()
                .iter()
                .map(|s| s.total_requests)
                .sum();
            let overall = aggregator.overall_summary();
            prop_assert_eq!(per_category, outcomes.len() as u64);
            prop_assert_eq!(overall.total_requests, outcomes.len() as u64);
            prop_assert_eq!(
                overall.successful_requests + overall.failed_requests,
                overall.total_requests
            );
        }
    }
}
