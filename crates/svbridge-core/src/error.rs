//! Core error types.
//!
//! These cover the native-call and configuration halves of the error
//! taxonomy. Transport and correlation errors live in `svbridge-ipc` and
//! `svbridge-client` respectively.

use std::path::PathBuf;

use thiserror::Error;

use crate::params::EngineParam;

/// Errors raised by the native engine binding.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The wrapper library could not be loaded.
    #[error("Failed to load engine library {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    /// A required export is missing from the wrapper library.
    #[error("Engine library is missing required symbol `{0}`")]
    MissingSymbol(&'static str),

    /// The engine's initialize call returned a null handle.
    #[error("Engine initialization failed: {0}")]
    InitFailed(String),

    /// `startSpeak` returned a non-zero status code.
    #[error("Engine refused to start speaking (status {status})")]
    SpeakFailed { status: i32 },

    /// The read call itself failed (the binding raised instead of returning an item).
    #[error("Engine read failed: {0}")]
    ReadFailed(String),

    /// The engine reported an item kind outside the documented set.
    #[error("Engine returned unknown item kind {0}")]
    UnknownItem(i32),

    /// The loaded library does not export the setter for this parameter.
    #[error("Engine does not support parameter {0}")]
    Unsupported(EngineParam),

    /// No engine handle is currently held.
    #[error("Engine is not initialized")]
    NotInitialized,
}

/// A parameter name arrived that is not on the allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    /// The name does not match any permitted setter.
    #[error("Disallowed parameter setter: {0}")]
    Disallowed(String),
}

/// Configuration validation and resolution errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A timeout or interval was configured as zero.
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    /// A numeric field is outside the range it accepts.
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: String,
    },

    /// A path field was empty.
    #[error("{field} cannot be empty")]
    EmptyPath { field: &'static str },

    /// An environment override could not be parsed.
    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    /// A configuration file could not be read or parsed.
    #[error("Failed to read config {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    /// The add-on directory does not exist.
    #[error("Add-on directory {0} does not exist")]
    MissingDirectory(PathBuf),
}
