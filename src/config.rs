//! Configuration structures for the symbol service

use serde::{Deserialize, Serialize};

use crate::adapter::AdapterConfig;
use crate::engine::GenerationSettings;
use crate::error::{Error, Result};
use crate::prompt::TemplateConfig;
use crate::reply::ReplyConfig;

/// Main configuration for the cached inference service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CraftConfig {
    /// Decoding settings shared by combine and split
    pub generation: GenerationSettings,
    /// Delimiters of the reply grammar
    pub reply: ReplyConfig,
    /// Chat template selection
    pub template: TemplateConfig,
    /// Adapter directories
    pub adapters: AdapterConfig,
}

impl CraftConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.generation.max_new_tokens == 0 {
            return Err(Error::config("max_new_tokens must be > 0"));
        }

        // Memoizing forever is only sound for greedy decoding.
        if self.generation.temperature != 0.0 {
            return Err(Error::config(format!(
                "temperature must be 0 for cached generations, got {}",
                self.generation.temperature
            )));
        }

        if self.reply.marker.is_empty() {
            return Err(Error::config("reply marker must not be empty"));
        }

        Ok(())
    }
}
