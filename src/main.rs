use anyhow::{Context, Result};

use llm_loadbench::bench::{BenchmarkRunner, MockChatServer, PromptCorpus, RunConfig};
use llm_loadbench::config::{Cli, Commands, LoadArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration first (for log level)
    let cli = Cli::load();
    init_tracing(&cli.log_level.to_lowercase(), cli.log_json);

    match cli.command {
        Commands::Run(args) => {
            let load = args.load.clone();
            let corpus = load.corpus()?;
            execute(args.into_run_config(), &corpus, &load).await
        }
        Commands::Standalone(args) => {
            let corpus = args.load.corpus()?;

            let mut server = MockChatServer::new(args.mock_config());
            let port = server
                .start()
                .await
                .context("Failed to start mock server")?;

            let result = execute(args.run_config(port), &corpus, &args.load).await;
            server.stop();
            result
        }
    }
}

/// Initialize logging; `RUST_LOG` overrides the configured level
fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    // Logs go to stderr so stdout carries only the report
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Run one benchmark, then print and save its report
async fn execute(config: RunConfig, corpus: &PromptCorpus, load: &LoadArgs) -> Result<()> {
    let runner = BenchmarkRunner::new(config)?;
    print_startup_banner(runner.config(), corpus);

    let report = tokio::select! {
        report = runner.run_report(corpus) => report,
        _ = shutdown_signal() => {
            anyhow::bail!("Benchmark interrupted, no report written");
        }
    };

    println!("{}", report);
    if load.json {
        println!("{}", report.to_json()?);
    }

    let path = report.write_to_dir(&load.output_dir, load.output_file.as_deref())?;
    println!("Results saved to '{}'.", path.display());
    tracing::info!(path = %path.display(), "Report written");

    Ok(())
}

fn print_startup_banner(config: &RunConfig, corpus: &PromptCorpus) {
    let total = corpus.len() * config.requests_per_category;
    println!("--- Starting Benchmark ---");
    println!("  Version:      {}", env!("CARGO_PKG_VERSION"));
    println!("  Target:       {}", config.url);
    println!("  Model:        {}", config.model);
    println!("  Categories:   {}", corpus.len());
    println!("  Total Requests: {}", total);
    println!("  Concurrent Requests: {}", config.concurrency);
    println!();
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Received Ctrl+C signal, stopping benchmark...");
        },
        _ = terminate => {
            tracing::warn!("Received terminate signal, stopping benchmark...");
        },
    }
}
