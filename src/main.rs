#![forbid(unsafe_code)]

//! `hls-relay` — stream session supervisor binary.
//!
//! Bootstraps configuration, constructs the supervisor, starts the
//! reconciliation sweeper, and waits for ctrl-c. The HTTP layer that
//! fronts the supervisor is wired up separately; this binary owns the
//! core lifecycle only.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use hls_relay::config::GlobalConfig;
use hls_relay::{sweeper, AppError, Result, Supervisor};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "hls-relay", about = "Stream session supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured output root.
    #[arg(long)]
    output_root: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("hls-relay supervisor bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let raw = std::fs::read_to_string(&args.config)
        .map_err(|err| AppError::Config(format!("cannot read config: {err}")))?;
    let mut toml_value: toml::Value = raw
        .parse()
        .map_err(|err| AppError::Config(format!("invalid config: {err}")))?;
    if let Some(root) = args.output_root {
        if let Some(table) = toml_value.as_table_mut() {
            table.insert(
                "output_root".into(),
                toml::Value::String(root.to_string_lossy().into_owned()),
            );
        }
    }
    let config = GlobalConfig::from_toml_str(&toml_value.to_string())?;
    let config = Arc::new(config);
    info!(
        output_root = %config.output_root.display(),
        capacity = config.max_concurrent_sessions,
        engine = config.engine.binary,
        "configuration loaded"
    );

    // ── Build the supervisor ────────────────────────────
    let supervisor = Arc::new(Supervisor::new(Arc::clone(&config)));

    let health = supervisor.health_check();
    if health.engine_available {
        info!(engine = config.engine.binary, "engine binary resolved");
    } else {
        tracing::warn!(
            engine = config.engine.binary,
            "engine binary not resolvable; session starts will fail"
        );
    }

    // ── Start the reconciliation sweeper ────────────────
    let ct = CancellationToken::new();
    let sweeper_handle =
        sweeper::spawn_sweeper(supervisor.registry(), Arc::clone(&config), ct.clone());
    info!("reconciliation sweeper started");

    // ── Run until shutdown ──────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::Io(format!("ctrl-c handler failed: {err}")))?;
    info!("shutdown signal received");

    ct.cancel();
    supervisor.stop_all().await;
    let _ = sweeper_handle.await;
    info!("all sessions stopped, exiting");

    Ok(())
}

/// Initialize the global tracing subscriber.
fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match format {
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
    };

    result.map_err(|err| AppError::Config(format!("tracing init failed: {err}")))
}
