use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::{LogFormat, LoggingConfig, TollgateConfig};
use tollgate::ratelimit::{spawn_sweeper, Decision, RateLimiter, StoreKind};

/// Per-key admission control over newline-delimited keys on stdin.
///
/// Each input line is a key and produces `ALLOW <key>` or `DENY <key>`.
/// A line of the form `stats <key>` prints that key's current state.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Admissions allowed per key per window
    #[arg(long)]
    max_count: Option<u64>,

    /// Window and lockout length in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// State store: single or sharded
    #[arg(long)]
    store: Option<StoreKind>,

    /// Default log level (RUST_LOG takes precedence)
    #[arg(long)]
    log_level: Option<String>,

    /// Print decisions and stats as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct KeyedDecision<'a> {
    key: &'a str,
    #[serde(flatten)]
    decision: Decision,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = TollgateConfig::load(cli.config.as_deref())?;
    if let Some(max_count) = cli.max_count {
        config.limiter.max_count = max_count;
    }
    if let Some(interval_ms) = cli.interval_ms {
        config.limiter.interval_ms = interval_ms;
    }
    if let Some(store) = cli.store {
        config.limiter.store = store;
    }
    if let Some(level) = cli.log_level.clone() {
        config.logging.level = level;
    }
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        max_count = config.limiter.max_count,
        interval_ms = config.limiter.interval_ms,
        store = ?config.limiter.store,
        "Configuration loaded"
    );

    let limiter = Arc::new(RateLimiter::from_config(&config.limiter)?);

    let _sweeper = if config.eviction.enabled {
        Some(spawn_sweeper(
            limiter.clone(),
            config.eviction.retention(),
            config.eviction.sweep_interval(),
        )?)
    } else {
        None
    };

    tokio::select! {
        result = serve_stdin(&limiter, cli.json) => result?,
        _ = shutdown_signal() => {}
    }

    info!(keys = limiter.len(), "Tollgate stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Answer each stdin line until EOF.
async fn serve_stdin(limiter: &RateLimiter, json: bool) -> anyhow::Result<()> {
    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next().await {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let output = match line.strip_prefix("stats ") {
            Some(key) => render_stats(limiter, key.trim(), json)?,
            None => render_decision(line, limiter.check(line), json)?,
        };
        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}

fn render_decision(key: &str, decision: Decision, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string(&KeyedDecision { key, decision })?);
    }
    let verdict = if decision.allowed { "ALLOW" } else { "DENY" };
    Ok(format!("{} {}", verdict, key))
}

fn render_stats(limiter: &RateLimiter, key: &str, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(match limiter.snapshot(key) {
            Some(stats) => serde_json::to_string(&stats)?,
            None => serde_json::json!({ "key": key, "found": false }).to_string(),
        });
    }
    Ok(limiter.stats(key))
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
