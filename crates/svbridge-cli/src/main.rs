//! CLI entry point.

use anyhow::Context;
use clap::Parser;
use svbridge_cli::{Cli, CliError, Commands, bootstrap, handlers};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "debug"
    } else {
        "warn,svbridge_cli=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Params => {
            handlers::params::execute();
            Ok(())
        }
        Commands::Check { mode } => {
            let ctx = bootstrap(cli.config.as_deref(), cli.addon_dir.as_deref())?;
            handlers::check::execute(&ctx.addon_dir, mode.resolve())
        }
        Commands::Say {
            text,
            wav,
            mode,
            params,
        } => {
            let ctx = bootstrap(cli.config.as_deref(), cli.addon_dir.as_deref())?;
            handlers::say::execute(&ctx, &text, wav, mode.resolve(), &params).await
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Load environment variables before clap reads `env` defaults
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    if let Err(e) = runtime.block_on(run(cli)) {
        eprintln!("Error: {e}");
        drop(runtime);
        std::process::exit(e.exit_code());
    }
    Ok(())
}
