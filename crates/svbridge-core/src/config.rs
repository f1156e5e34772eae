//! Bridge configuration.
//!
//! [`BridgeConfig`] is plain serde data with defaults for every field, so a
//! partial JSON file or an empty one both produce a working configuration.
//! Paths are resolved relative to the add-on directory that ships the
//! wrapper and engine libraries.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::error::ConfigError;
use crate::stream::{Backoff, StreamOptions};

/// File name of the wrapper library.
pub const WRAPPER_LIBRARY: &str = "softvoice_wrapper.dll";

/// File names tried, in order, for the synthesis library.
pub const ENGINE_LIBRARY_NAMES: [&str; 2] = ["tibase32.dll", "TIBASE32.DLL"];

/// File name of the 32-bit helper executable.
pub const HOST_EXECUTABLE: &str = if cfg!(windows) {
    "svbridge-host32.exe"
} else {
    "svbridge-host32"
};

/// Pointer width of a process or library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitness {
    Bits32,
    Bits64,
}

impl Bitness {
    /// The synthesis library only exists as a 32-bit build.
    pub const ENGINE: Self = Self::Bits32;

    /// Bitness of the running process.
    pub const fn current() -> Self {
        if cfg!(target_pointer_width = "32") {
            Self::Bits32
        } else {
            Self::Bits64
        }
    }
}

/// Whether the engine is driven in-process or through the helper process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BridgeMode {
    Direct,
    Remote,
}

impl BridgeMode {
    /// Direct when caller and engine share a bitness, remote otherwise.
    pub const fn select(caller: Bitness, engine: Bitness) -> Self {
        match (caller, engine) {
            (Bitness::Bits32, Bitness::Bits32) | (Bitness::Bits64, Bitness::Bits64) => {
                Self::Direct
            }
            _ => Self::Remote,
        }
    }

    /// The mode for this process talking to the 32-bit engine.
    pub const fn for_current_process() -> Self {
        Self::select(Bitness::current(), Bitness::ENGINE)
    }
}

/// Read-loop backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1,
            max_ms: 1,
            factor: 1.0,
        }
    }
}

impl BackoffConfig {
    /// Largest growth factor accepted from configuration.
    pub const MAX_FACTOR: f64 = 16.0;

    pub fn to_backoff(&self) -> Backoff {
        Backoff::exponential(
            Duration::from_millis(self.initial_ms),
            Duration::from_millis(self.max_ms),
            self.factor,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Path to `softvoice_wrapper.dll`.
    pub wrapper_path: PathBuf,
    /// Path to the synthesis library passed to the wrapper's init call.
    pub engine_path: PathBuf,
    /// 1 = English, 2 = Spanish.
    pub initial_voice: i32,
    pub command_timeout_ms: u64,
    pub speak_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub read_backoff: BackoffConfig,
    pub consumer_poll_ms: u64,
    pub max_utterance_chars: usize,
    pub read_buffer_bytes: usize,
    /// How long a new `speak` waits for the previous one in the helper.
    pub speak_join_timeout_ms: u64,
    /// Command line used instead of the bundled helper executable.
    pub host_command: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            wrapper_path: PathBuf::from(WRAPPER_LIBRARY),
            engine_path: PathBuf::from(ENGINE_LIBRARY_NAMES[0]),
            initial_voice: 1,
            command_timeout_ms: 10_000,
            speak_timeout_ms: 30_000,
            shutdown_timeout_ms: 3_000,
            read_backoff: BackoffConfig::default(),
            consumer_poll_ms: 100,
            max_utterance_chars: 1200,
            read_buffer_bytes: 65_536,
            speak_join_timeout_ms: 30_000,
            host_command: None,
        }
    }
}

impl BridgeConfig {
    /// Defaults with library paths resolved inside `dir`.
    pub fn from_addon_dir(dir: &Path) -> Result<Self, ConfigError> {
        if !dir.is_dir() {
            return Err(ConfigError::MissingDirectory(dir.to_path_buf()));
        }
        Ok(Self {
            wrapper_path: dir.join(WRAPPER_LIBRARY),
            engine_path: find_engine_library(dir)
                .unwrap_or_else(|| dir.join(ENGINE_LIBRARY_NAMES[0])),
            ..Self::default()
        })
    }

    /// Load a JSON configuration file; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply `SVBRIDGE_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(command) = lookup("SVBRIDGE_HOST_COMMAND").filter(|v| !v.trim().is_empty()) {
            self.host_command = Some(command);
        }
        if let Some(path) = lookup("SVBRIDGE_WRAPPER_PATH").filter(|v| !v.is_empty()) {
            self.wrapper_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("SVBRIDGE_ENGINE_PATH").filter(|v| !v.is_empty()) {
            self.engine_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("SVBRIDGE_COMMAND_TIMEOUT_MS") {
            self.command_timeout_ms =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    key: "SVBRIDGE_COMMAND_TIMEOUT_MS",
                    value,
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("commandTimeoutMs", self.command_timeout_ms),
            ("speakTimeoutMs", self.speak_timeout_ms),
            ("shutdownTimeoutMs", self.shutdown_timeout_ms),
            ("consumerPollMs", self.consumer_poll_ms),
            ("speakJoinTimeoutMs", self.speak_join_timeout_ms),
        ];
        if let Some(&(field, _)) = durations.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ZeroValue { field });
        }
        if self.max_utterance_chars == 0 {
            return Err(ConfigError::ZeroValue {
                field: "maxUtteranceChars",
            });
        }
        if self.read_buffer_bytes == 0 {
            return Err(ConfigError::ZeroValue {
                field: "readBufferBytes",
            });
        }
        let factor = self.read_backoff.factor;
        if !(1.0..=BackoffConfig::MAX_FACTOR).contains(&factor) {
            return Err(ConfigError::OutOfRange {
                field: "readBackoff.factor",
                expected: "between 1 and 16",
                value: factor.to_string(),
            });
        }
        if self.wrapper_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath {
                field: "wrapperPath",
            });
        }
        if self.engine_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath {
                field: "enginePath",
            });
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            wrapper_path: self.wrapper_path.clone(),
            engine_path: self.engine_path.clone(),
            initial_voice: self.initial_voice,
        }
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            max_utterance_chars: self.max_utterance_chars,
            read_buffer_bytes: self.read_buffer_bytes,
            backoff: self.read_backoff.to_backoff(),
        }
    }

    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub const fn speak_timeout(&self) -> Duration {
        Duration::from_millis(self.speak_timeout_ms)
    }

    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub const fn consumer_poll(&self) -> Duration {
        Duration::from_millis(self.consumer_poll_ms)
    }

    pub const fn speak_join_timeout(&self) -> Duration {
        Duration::from_millis(self.speak_join_timeout_ms)
    }
}

/// The synthesis library inside `dir`, trying each accepted spelling.
pub fn find_engine_library(dir: &Path) -> Option<PathBuf> {
    ENGINE_LIBRARY_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

// ── Installation check ─────────────────────────────────────────────

/// Which of the required files were found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationReport {
    pub mode: BridgeMode,
    pub wrapper: Option<PathBuf>,
    pub engine: Option<PathBuf>,
    /// Only looked for in remote mode.
    pub host: Option<PathBuf>,
}

impl InstallationReport {
    pub fn is_complete(&self) -> bool {
        let libraries = self.wrapper.is_some() && self.engine.is_some();
        match self.mode {
            BridgeMode::Direct => libraries,
            BridgeMode::Remote => libraries && self.host.is_some(),
        }
    }

    /// Human-readable names of what is missing.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.wrapper.is_none() {
            missing.push(WRAPPER_LIBRARY);
        }
        if self.engine.is_none() {
            missing.push(ENGINE_LIBRARY_NAMES[0]);
        }
        if self.mode == BridgeMode::Remote && self.host.is_none() {
            missing.push(HOST_EXECUTABLE);
        }
        missing
    }
}

/// Check that `dir` holds everything `mode` needs.
pub fn check_installation(dir: &Path, mode: BridgeMode) -> InstallationReport {
    let wrapper = Some(dir.join(WRAPPER_LIBRARY)).filter(|p| p.is_file());
    let engine = find_engine_library(dir);
    let host = match mode {
        BridgeMode::Direct => None,
        BridgeMode::Remote => Some(dir.join(HOST_EXECUTABLE)).filter(|p| p.exists()),
    };
    InstallationReport {
        mode,
        wrapper,
        engine,
        host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn defaults_are_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.command_timeout(), Duration::from_secs(10));
        assert_eq!(config.speak_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_utterance_chars, 1200);
    }

    #[test]
    fn mode_follows_bitness() {
        assert_eq!(
            BridgeMode::select(Bitness::Bits32, Bitness::Bits32),
            BridgeMode::Direct
        );
        assert_eq!(
            BridgeMode::select(Bitness::Bits64, Bitness::Bits32),
            BridgeMode::Remote
        );
        assert_eq!(
            BridgeMode::select(Bitness::Bits32, Bitness::Bits64),
            BridgeMode::Remote
        );
        if cfg!(target_pointer_width = "64") {
            assert_eq!(BridgeMode::for_current_process(), BridgeMode::Remote);
        }
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = BridgeConfig {
            command_timeout_ms: 0,
            ..BridgeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroValue {
                field: "commandTimeoutMs"
            })
        ));
    }

    #[test]
    fn empty_path_is_rejected() {
        let config = BridgeConfig {
            engine_path: PathBuf::new(),
            ..BridgeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyPath { field: "enginePath" })
        ));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"commandTimeoutMs": 500, "readBackoff": {"factor": 2.0}}"#)
                .unwrap();
        assert_eq!(config.command_timeout_ms, 500);
        assert_eq!(config.speak_timeout_ms, 30_000);
        assert!((config.read_backoff.factor - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.read_backoff.initial_ms, 1);
    }

    #[test]
    fn runaway_backoff_factor_is_rejected() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"readBackoff": {"factor": 1e300}}"#).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "readBackoff.factor",
                ..
            })
        ));

        let mut config = BridgeConfig::default();
        config.read_backoff.factor = f64::NAN;
        assert!(config.validate().is_err());
        config.read_backoff.factor = 2.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn addon_dir_resolves_uppercase_engine() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "TIBASE32.DLL");
        let config = BridgeConfig::from_addon_dir(dir.path()).unwrap();
        assert_eq!(config.wrapper_path, dir.path().join(WRAPPER_LIBRARY));
        assert!(config.engine_path.is_file());
    }

    #[test]
    fn missing_addon_dir_is_an_error() {
        let err = BridgeConfig::from_addon_dir(Path::new("/nonexistent/svbridge")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDirectory(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("SVBRIDGE_HOST_COMMAND", "wine svbridge-host32.exe"),
            ("SVBRIDGE_COMMAND_TIMEOUT_MS", "2500"),
        ]
        .into_iter()
        .collect();
        let mut config = BridgeConfig::default();
        config
            .apply_env_from(|key| vars.get(key).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.host_command.as_deref(), Some("wine svbridge-host32.exe"));
        assert_eq!(config.command_timeout_ms, 2500);
    }

    #[test]
    fn bad_env_timeout_is_reported() {
        let mut config = BridgeConfig::default();
        let err = config
            .apply_env_from(|key| (key == "SVBRIDGE_COMMAND_TIMEOUT_MS").then(|| "soon".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn installation_check_depends_on_mode() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), WRAPPER_LIBRARY);
        touch(dir.path(), "tibase32.dll");

        assert!(check_installation(dir.path(), BridgeMode::Direct).is_complete());

        let remote = check_installation(dir.path(), BridgeMode::Remote);
        assert!(!remote.is_complete());
        assert_eq!(remote.missing(), vec![HOST_EXECUTABLE]);

        touch(dir.path(), HOST_EXECUTABLE);
        assert!(check_installation(dir.path(), BridgeMode::Remote).is_complete());
    }
}
