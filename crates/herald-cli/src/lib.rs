//! Command-line flags and startup validation for the Herald bot binary.

pub mod cli_args;
pub mod cli_types;
pub mod validation;

pub use cli_args::Cli;
pub use cli_types::CliUserStore;
pub use validation::{directory_backend_from_cli, runtime_config_from_cli};
