//! Root CLI structure and global options.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Speak text through the SoftVoice engine, in-process or through the
/// 32-bit helper.
#[derive(Debug, Parser)]
#[command(name = "svbridge")]
#[command(about = "Speak through the SoftVoice engine")]
#[command(version)]
pub struct Cli {
    /// Directory holding the wrapper and engine libraries
    #[arg(long = "addon-dir", env = "SVBRIDGE_ADDON_DIR", global = true)]
    pub addon_dir: Option<PathBuf>,

    /// JSON configuration file (overrides --addon-dir)
    #[arg(long, env = "SVBRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}
