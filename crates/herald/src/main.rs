//! Herald broker binary.

use anyhow::Context;
use clap::Parser;
use herald::{Broker, BrokerConfig};
use herald_store::{MemoryStore, SharedStore, SqliteStore};
use observability::{LogConfig, LogFormat};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Herald pub/sub broker.
#[derive(Parser)]
#[command(name = "herald")]
#[command(about = "Publish/subscribe broker with acknowledged, at-least-once delivery")]
#[command(version)]
struct Cli {
    /// Address to listen on (overrides HERALD_LISTEN_ADDR)
    #[arg(short, long)]
    listen: Option<String>,

    /// SQLite database file (overrides HERALD_DATABASE)
    #[arg(short, long, conflicts_with = "memory")]
    database: Option<PathBuf>,

    /// Keep all data in memory
    #[arg(long)]
    memory: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "HERALD_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Terminal log format (compact, json)
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// Also append JSON log lines to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    observability::init_with_config(LogConfig {
        service_name: "herald".into(),
        default_level: cli.log_level.clone(),
        format: cli.log_format,
        log_path: cli.log_file.clone(),
        also_stderr: false,
    })
    .context("failed to initialize logging")?;

    let mut config = BrokerConfig::from_env()?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if cli.memory {
        config.database_path = None;
    } else if let Some(database) = cli.database {
        config.database_path = Some(database);
    }

    let store: SharedStore = match &config.database_path {
        Some(path) => {
            let store = SqliteStore::open(path)
                .await
                .with_context(|| format!("failed to open database {}", path.display()))?;
            info!(path = %path.display(), "using sqlite store");
            Arc::new(store)
        }
        None => {
            info!("using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let broker = Broker::new(config, store);
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                signal.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for interrupt"),
        }
    });

    broker.run(shutdown).await?;
    Ok(())
}
