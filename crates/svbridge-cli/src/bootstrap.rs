//! Configuration resolution for one invocation.

use std::path::{Path, PathBuf};

use svbridge_core::BridgeConfig;

use crate::error::CliError;

/// The configuration every command runs with.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub config: BridgeConfig,
    /// Where the libraries (and the helper) are looked up.
    pub addon_dir: PathBuf,
}

/// Resolve the configuration: a JSON file if given, otherwise defaults
/// rooted at the add-on directory; `SVBRIDGE_*` variables apply on top.
pub fn bootstrap(
    config_file: Option<&Path>,
    addon_dir: Option<&Path>,
) -> Result<CliContext, CliError> {
    let addon_dir = addon_dir.map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let mut config = match config_file {
        Some(path) => BridgeConfig::from_json_file(path)?,
        None => BridgeConfig::from_addon_dir(&addon_dir)?,
    };
    config.apply_env()?;
    config.validate()?;
    tracing::debug!(addon_dir = %addon_dir.display(), ?config, "Configuration resolved");
    Ok(CliContext { config, addon_dir })
}
