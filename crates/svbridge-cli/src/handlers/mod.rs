//! One module per subcommand.

pub mod check;
pub mod params;
pub mod say;
