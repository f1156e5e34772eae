//! The `svbridge` command-line tool.

pub mod bootstrap;
pub mod commands;
pub mod error;
pub mod handlers;
pub mod parser;

pub use bootstrap::{CliContext, bootstrap};
pub use commands::{Commands, ModeArg};
pub use error::CliError;
pub use parser::Cli;
