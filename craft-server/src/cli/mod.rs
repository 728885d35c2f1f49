pub mod commands;
pub mod config;
pub mod error;
pub mod logging;

// Re-export command structures
pub use commands::{AddCommand, EngineArgs, ServeCommand, SplitCommand};

// Re-export error types
pub use error::{CliError, CliResult};
