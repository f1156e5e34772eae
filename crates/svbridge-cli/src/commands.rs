//! Subcommands and their argument types.

use std::path::PathBuf;

use clap::{Subcommand, ValueEnum};
use svbridge_core::{BridgeMode, EngineParam};

/// How to reach the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ModeArg {
    /// Direct when this build matches the engine's bitness, remote otherwise
    #[default]
    Auto,
    Direct,
    Remote,
}

impl ModeArg {
    pub const fn resolve(self) -> BridgeMode {
        match self {
            Self::Auto => BridgeMode::for_current_process(),
            Self::Direct => BridgeMode::Direct,
            Self::Remote => BridgeMode::Remote,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Speak TEXT and wait for playback to finish
    Say {
        /// Text to speak
        text: String,

        /// Write the audio to this WAV file instead of playing it
        #[arg(long)]
        wav: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
        mode: ModeArg,

        /// Engine setting as NAME=VALUE (e.g. rate=200); repeatable
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(EngineParam, i32)>,
    },

    /// Check that the add-on directory holds everything a mode needs
    Check {
        #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
        mode: ModeArg,
    },

    /// List the engine settings accepted by --param
    Params,
}

/// Parse `NAME=VALUE`, where NAME is a setter symbol or its short name.
pub fn parse_param(arg: &str) -> Result<(EngineParam, i32), String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{arg}`"))?;
    let param = name.trim().parse::<EngineParam>().map_err(|e| e.to_string())?;
    let value = value
        .trim()
        .parse::<i32>()
        .map_err(|e| format!("invalid value for {name}: {e}"))?;
    Ok((param, value))
}
