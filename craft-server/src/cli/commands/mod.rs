pub mod query;
pub mod serve;

pub use query::{AddCommand, SplitCommand};
pub use serve::ServeCommand;

use crate::cli::{config::Config, error::CliResult};
use clap::Args;
use infini_craft::{CraftService, RemoteEngine};
use std::{path::PathBuf, sync::Arc};
use tracing::info;

/// Engine and adapter options shared by every command that runs inference
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// Base URL of the text-generation server
    #[arg(long, env = "CRAFT_ENGINE_URL")]
    pub engine_url: Option<String>,

    /// Base model the adapters were trained against
    #[arg(long, env = "CRAFT_BASE_MODEL")]
    pub base_model: Option<String>,

    /// PEFT adapter directory used by combine requests
    #[arg(long, env = "CRAFT_ADD_ADAPTER")]
    pub add_adapter: Option<PathBuf>,

    /// PEFT adapter directory used by split requests
    #[arg(long, env = "CRAFT_SPLIT_ADAPTER")]
    pub split_adapter: Option<PathBuf>,

    /// tokenizer_config.json providing the chat template
    #[arg(long, env = "CRAFT_TOKENIZER_CONFIG")]
    pub tokenizer_config: Option<PathBuf>,
}

impl EngineArgs {
    /// Flags override file values
    pub fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.engine_url {
            config.engine.endpoint = url.clone();
        }
        if let Some(base_model) = &self.base_model {
            config.craft.adapters.base_model = base_model.clone();
        }
        if let Some(dir) = &self.add_adapter {
            config.craft.adapters.add = Some(dir.clone());
        }
        if let Some(dir) = &self.split_adapter {
            config.craft.adapters.split = Some(dir.clone());
        }
        if let Some(path) = &self.tokenizer_config {
            config.craft.template.tokenizer_config = Some(path.clone());
        }
    }
}

/// Build the memoized service from a validated configuration
pub fn build_service(config: &Config) -> CliResult<Arc<CraftService>> {
    config.validate()?;

    let engine = RemoteEngine::new(&config.engine)?;
    info!("Using generation server at {}", engine.url());

    let service = CraftService::from_config(&config.craft, Arc::new(engine))?;
    Ok(Arc::new(service))
}
