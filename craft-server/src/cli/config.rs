use crate::cli::error::{CliError, CliResult};
use directories::ProjectDirs;
use infini_craft::{CraftConfig, RemoteEngineConfig};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub craft: CraftConfig,
    pub server: ServerConfig,
    pub engine: RemoteEngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_enabled: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

enum Format {
    Yaml,
    Toml,
    Json,
}

fn format_of(path: &Path) -> Format {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => Format::Yaml,
        Some("toml") => Format::Toml,
        _ => Format::Json,
    }
}

fn resolve_path(config_path: Option<&Path>) -> CliResult<PathBuf> {
    match config_path {
        Some(path) => Ok(path.to_path_buf()),
        None => get_default_config_path(),
    }
}

// Configuration loading and management functions
pub fn load_config(config_path: Option<&Path>) -> CliResult<Config> {
    let config_file = resolve_path(config_path)?;

    if !config_file.exists() {
        if config_path.is_some() {
            return Err(CliError::Config(format!(
                "Config file not found: {}",
                config_file.display()
            )));
        }
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&config_file)
        .map_err(|e| CliError::Config(format!("Failed to read config file: {}", e)))?;

    let config: Config = match format_of(&config_file) {
        Format::Yaml => serde_yaml::from_str(&content)?,
        Format::Toml => toml::from_str(&content)?,
        Format::Json => serde_json::from_str(&content)?,
    };

    Ok(config)
}

pub fn save_config(config: &Config, config_path: Option<&Path>) -> CliResult<()> {
    let config_file = resolve_path(config_path)?;

    if let Some(parent) = config_file.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = match format_of(&config_file) {
        Format::Yaml => serde_yaml::to_string(config)?,
        Format::Toml => toml::to_string(config)
            .map_err(|e| CliError::Config(format!("TOML serialization error: {}", e)))?,
        Format::Json => serde_json::to_string_pretty(config)?,
    };

    fs::write(&config_file, content)
        .map_err(|e| CliError::Config(format!("Failed to write config file: {}", e)))?;

    Ok(())
}

pub fn get_default_config_path() -> CliResult<PathBuf> {
    let proj_dirs = ProjectDirs::from("dev", "infini-craft", "craft")
        .ok_or_else(|| CliError::Config("Failed to determine config directory".to_string()))?;

    Ok(proj_dirs.config_dir().join("config.yaml"))
}

pub fn show_config(config: &Config) -> CliResult<()> {
    println!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

pub fn init_config(config_path: Option<&Path>, force: bool) -> CliResult<()> {
    let config_file = resolve_path(config_path)?;

    if config_file.exists() && !force {
        return Err(CliError::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_file.display()
        )));
    }

    save_config(&Config::default(), Some(&config_file))?;

    crate::cli::logging::success(&format!(
        "Configuration file created: {}",
        config_file.display()
    ));
    Ok(())
}

pub fn get_config_value(config: &Config, key: &str) -> CliResult<()> {
    println!("{}", get_nested_value(config, key)?);
    Ok(())
}

pub fn set_config_value(config_path: Option<&Path>, key: &str, value: &str) -> CliResult<()> {
    let config_file = resolve_path(config_path)?;
    let mut config = if config_file.exists() {
        load_config(Some(&config_file))?
    } else {
        Config::default()
    };

    set_nested_value(&mut config, key, value)?;
    save_config(&config, Some(&config_file))?;

    println!("Configuration updated: {} = {}", key, value);
    Ok(())
}

fn get_nested_value(config: &Config, key: &str) -> CliResult<String> {
    let mut current = serde_json::to_value(config)?;

    for k in key.split('.') {
        current = current
            .get_mut(k)
            .map(serde_json::Value::take)
            .ok_or_else(|| CliError::InvalidConfigKey(key.to_string()))?;
    }

    Ok(match current {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> CliResult<T> {
    value
        .parse()
        .map_err(|_| CliError::InvalidArgument(format!("Invalid value for {}: {}", key, value)))
}

fn optional_path(value: &str) -> Option<PathBuf> {
    match value {
        "" | "none" | "null" => None,
        path => Some(PathBuf::from(path)),
    }
}

fn set_nested_value(config: &mut Config, key: &str, value: &str) -> CliResult<()> {
    match key {
        "server.host" => config.server.host = value.to_string(),
        "server.port" => config.server.port = parse_value(key, value)?,
        "server.cors_enabled" => config.server.cors_enabled = parse_value(key, value)?,
        "engine.endpoint" => config.engine.endpoint = value.to_string(),
        "engine.timeout_seconds" => config.engine.timeout_seconds = parse_value(key, value)?,
        "engine.adapter_source" => config.engine.adapter_source = value.to_string(),
        "craft.generation.max_new_tokens" => {
            config.craft.generation.max_new_tokens = parse_value(key, value)?
        }
        "craft.adapters.base_model" => config.craft.adapters.base_model = value.to_string(),
        "craft.adapters.add" => config.craft.adapters.add = optional_path(value),
        "craft.adapters.split" => config.craft.adapters.split = optional_path(value),
        "craft.template.tokenizer_config" => {
            config.craft.template.tokenizer_config = optional_path(value)
        }
        "logging.level" => config.logging.level = value.to_string(),
        "logging.json_format" => config.logging.json_format = parse_value(key, value)?,
        _ => {
            return Err(CliError::InvalidConfigKey(format!(
                "Setting '{}' is not supported. Edit the config file directly.",
                key
            )));
        }
    }

    Ok(())
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> CliResult<()> {
        self.craft.validate()?;

        if self.server.port == 0 {
            return Err(CliError::ValidationError(
                "Server port must be non-zero".to_string(),
            ));
        }

        if self.engine.endpoint.trim().is_empty() {
            return Err(CliError::ValidationError(
                "Engine endpoint must not be empty".to_string(),
            ));
        }

        if self.engine.timeout_seconds == 0 {
            return Err(CliError::ValidationError(
                "Engine timeout must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
