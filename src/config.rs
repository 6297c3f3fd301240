use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::bench::config::{MockServerConfig, RunConfig, DEFAULT_API_URL, DEFAULT_MODEL};
use crate::bench::prompts::PromptCorpus;

/// LLM load bench - concurrent load tester for streaming chat completion APIs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Benchmark a running chat completions endpoint
    Run(RunArgs),
    /// Benchmark a built-in mock server
    Standalone(StandaloneArgs),
}

/// Knobs shared by every benchmark mode
#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Maximum number of concurrent requests
    #[arg(short, long, env = "BENCH_CONCURRENCY", default_value = "50")]
    pub concurrency: usize,

    /// Number of requests to send per category
    #[arg(short, long, env = "BENCH_NUM_REQUESTS", default_value = "200")]
    pub num_requests: usize,

    /// Maximum number of tokens to generate per response
    #[arg(short = 't', long, env = "BENCH_MAX_TOKENS", default_value = "150")]
    pub max_tokens: u32,

    /// Whole-request timeout in seconds (0 disables)
    #[arg(long, env = "BENCH_TIMEOUT", default_value = "300")]
    pub timeout: u64,

    /// Connection timeout in seconds (0 disables)
    #[arg(long, env = "BENCH_CONNECT_TIMEOUT", default_value = "30")]
    pub connect_timeout: u64,

    /// Longest wait for the next streamed token in seconds
    #[arg(long, env = "BENCH_IDLE_TIMEOUT")]
    pub idle_timeout: Option<u64>,

    /// Prompt corpus file (toml, json or yaml); built-in prompts when omitted
    #[arg(short, long, env = "BENCH_PROMPTS")]
    pub prompts: Option<PathBuf>,

    /// Report file name (default: llm_benchmark_<timestamp>.txt)
    #[arg(short, long)]
    pub output_file: Option<String>,

    /// Directory the report is written to
    #[arg(long, env = "BENCH_OUTPUT_DIR", default_value = "benchmark_output")]
    pub output_dir: PathBuf,

    /// Include every prompt and response in the report
    #[arg(long)]
    pub detailed: bool,

    /// Also print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl LoadArgs {
    /// Prompt corpus from `--prompts`, or the built-in one
    pub fn corpus(&self) -> Result<PromptCorpus> {
        match &self.prompts {
            Some(path) => PromptCorpus::from_file(path),
            None => PromptCorpus::builtin(),
        }
    }

    /// Apply the shared knobs to a run configuration
    fn apply(&self, config: RunConfig) -> RunConfig {
        RunConfig {
            concurrency: self.concurrency,
            requests_per_category: self.num_requests,
            max_tokens: self.max_tokens,
            timeout_secs: Some(self.timeout),
            connect_timeout_secs: Some(self.connect_timeout),
            idle_timeout_secs: self.idle_timeout,
            capture_responses: self.detailed,
            ..config
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Full URL of the chat completions endpoint
    #[arg(long, env = "BENCH_API_URL", default_value = DEFAULT_API_URL)]
    pub url: String,

    /// Model identifier sent with every request
    #[arg(long, env = "BENCH_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Bearer token for the target API
    #[arg(long, env = "BENCH_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[command(flatten)]
    pub load: LoadArgs,
}

impl RunArgs {
    pub fn into_run_config(self) -> RunConfig {
        let config = RunConfig {
            url: self.url,
            model: self.model,
            api_key: self.api_key,
            ..Default::default()
        };
        self.load.apply(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct StandaloneArgs {
    /// Mock server port (0 picks a free port)
    #[arg(long, default_value = "0")]
    pub port: u16,

    /// Simulated latency per streamed chunk in milliseconds
    #[arg(long, default_value = "10")]
    pub chunk_latency: u64,

    /// Content chunks per response (capped by max tokens)
    #[arg(long, default_value = "20")]
    pub chunk_count: usize,

    /// Fraction of requests answered with HTTP 500 (0.0 to 1.0)
    #[arg(long, default_value = "0.0", value_parser = parse_error_rate)]
    pub error_rate: f64,

    #[command(flatten)]
    pub load: LoadArgs,
}

impl StandaloneArgs {
    pub fn mock_config(&self) -> MockServerConfig {
        MockServerConfig {
            port: self.port,
            chunk_latency_ms: self.chunk_latency,
            chunk_count: self.chunk_count,
            error_rate: self.error_rate,
            ..Default::default()
        }
    }

    /// Run configuration targeting a mock server on `port`
    pub fn run_config(&self, port: u16) -> RunConfig {
        self.load.apply(RunConfig::standalone(port))
    }
}

impl Cli {
    /// Parse arguments with priority: CLI > ENV (including `.env`) > defaults
    pub fn load() -> Self {
        // Load .env file if it exists
        dotenvy::dotenv().ok();
        Self::parse()
    }
}

fn parse_error_rate(s: &str) -> std::result::Result<f64, String> {
    let rate: f64 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(format!("error rate must be between 0.0 and 1.0, got {}", rate));
    }
    Ok(rate)
}
