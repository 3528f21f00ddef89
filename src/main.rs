use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use noteguard::clock::SystemClock;
use noteguard::config::{LoggingConfig, NoteguardConfig};
use noteguard::ratelimit::RateLimiter;
use noteguard::tokens::{TiktokenMeasurer, Truncator};

/// Rate limiting and token-bounded truncation for note-service traffic.
#[derive(Debug, Parser)]
#[command(name = "noteguard", version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Count the tokens in a file (or stdin)
    Count { file: Option<PathBuf> },

    /// Truncate a file (or stdin) to a token budget
    Truncate {
        file: Option<PathBuf>,

        /// Token budget; defaults to the configured max_tokens
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Read one key per line from stdin and print the rate limit decision
    Gate {
        /// Override the configured requests per window
        #[arg(long)]
        max_requests: Option<u64>,

        /// Override the configured window length in milliseconds
        #[arg(long)]
        window_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = NoteguardConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging);

    info!("Starting Noteguard");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let measurer = Arc::new(TiktokenMeasurer::new(config.truncation.model.clone()));
    // Released when main returns, including through `?`.
    let _release = measurer.release_on_drop();

    match cli.command {
        Command::Count { file } => {
            let text = read_input(file).await?;
            let truncator = Truncator::from_config(measurer.clone(), &config.truncation);
            println!("{}", truncator.count(&text)?);
        }
        Command::Truncate { file, limit } => {
            let text = read_input(file).await?;
            let truncator = Truncator::from_config(measurer.clone(), &config.truncation);
            let limit = limit.unwrap_or(truncator.limit());
            print!("{}", truncator.truncate_to(&text, limit)?);
        }
        Command::Gate {
            max_requests,
            window_ms,
        } => {
            if let Some(max_requests) = max_requests {
                config.rate_limiting.max_requests = max_requests;
            }
            if let Some(window_ms) = window_ms {
                config.rate_limiting.window_ms = window_ms;
            }
            let limiter_config = config.rate_limiting.to_limiter_config()?;
            let limiter = RateLimiter::new(limiter_config, Arc::new(SystemClock))?;
            info!(
                max_requests = limiter_config.max_requests(),
                window_ms = limiter_config.window().as_millis() as u64,
                "Rate limiter initialized"
            );

            let result = run_gate(&limiter).await;
            limiter.dispose();
            result?;
        }
    }

    info!("Noteguard stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // stdout carries command output, so logs go to stderr.
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.with_thread_ids(true).init();
    }
}

async fn read_input(file: Option<PathBuf>) -> anyhow::Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

/// Answer one decision per stdin line until EOF or a shutdown signal.
async fn run_gate(limiter: &RateLimiter) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let key = line.trim();

                let decision = match limiter.enforce(key) {
                    Ok(()) => serde_json::json!({
                        "key": key,
                        "allowed": true,
                        "info": limiter.info(key),
                    }),
                    Err(err) => serde_json::json!({
                        "key": key,
                        "allowed": false,
                        "info": limiter.info(key),
                        "error": err.to_api_error(),
                    }),
                };
                println!("{}", decision);
            }
        }
    }

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
