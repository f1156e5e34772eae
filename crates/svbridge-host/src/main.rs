//! `svbridge-host32`: the helper process entry point.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use svbridge_core::{BridgeConfig, NativeLoader};
use svbridge_host::{Dispatcher, DispatcherOptions};
use svbridge_ipc::{AuthKey, connect_authenticated};
use tracing_appender::non_blocking::WorkerGuard;

const LOG_FILE: &str = "svbridge-host.log";
const DEFAULT_FILTER: &str = "info,svbridge_host=debug,svbridge_core=debug,svbridge_ipc=debug";

/// Serve the speech engine to the process that spawned us.
#[derive(Debug, Parser)]
#[command(name = "svbridge-host32", version)]
struct Args {
    /// Loopback address the caller is listening on.
    #[arg(long)]
    address: SocketAddr,

    /// One-time key to present after connecting (32 hex characters).
    #[arg(long)]
    authkey: String,

    /// Write logs to `svbridge-host.log` in this directory instead of stderr.
    #[arg(long, env = "SVBRIDGE_HOST_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

/// Log to a file when a directory is given, otherwise to stderr.
///
/// `RUST_LOG` overrides the default filter.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));

    if let Some(dir) = log_dir {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Failed to create log directory {}: {e}", dir.display());
        } else {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            return Some(guard);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_tracing(args.log_dir.as_deref());

    let key = AuthKey::from_hex(&args.authkey).context("Invalid --authkey")?;
    let mut config = BridgeConfig::default();
    config.apply_env().context("Invalid SVBRIDGE_* environment")?;

    tracing::info!(
        address = %args.address,
        pid = std::process::id(),
        "svbridge host starting"
    );

    let (sender, receiver) = connect_authenticated(args.address, &key)
        .await
        .with_context(|| format!("Failed to connect to caller at {}", args.address))?;

    let dispatcher = Dispatcher::new(
        Box::new(NativeLoader::new()),
        DispatcherOptions::from(&config),
    );
    dispatcher.serve(sender, receiver).await?;

    tracing::info!("svbridge host exiting");
    Ok(())
}
