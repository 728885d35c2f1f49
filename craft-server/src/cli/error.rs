use colored::*;
use thiserror::Error;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration key: {0}")]
    InvalidConfigKey(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Service(#[from] infini_craft::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Print a user-friendly error message
    pub fn print_error(&self) {
        eprintln!("{} {}", "Error:".red().bold(), self);

        match self {
            CliError::Config(msg) if msg.contains("not found") => {
                eprintln!(
                    "\n{} Run {} to create a default configuration file",
                    "Hint:".yellow(),
                    "craft config init".cyan()
                );
            }
            CliError::InvalidArgument(_) => {
                eprintln!(
                    "\n{} Use {} for more information",
                    "Hint:".yellow(),
                    "craft --help".cyan()
                );
            }
            CliError::Server(_) => {
                eprintln!(
                    "\n{} Check that the port is not already in use",
                    "Hint:".yellow()
                );
            }
            CliError::Service(infini_craft::Error::Adapter(_)) => {
                eprintln!(
                    "\n{} Pass --add-adapter and --split-adapter; each directory needs adapter_config.json and adapter_model.safetensors",
                    "Hint:".yellow()
                );
            }
            _ => {}
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(err: serde_yaml::Error) -> Self {
        CliError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(err.to_string())
    }
}
