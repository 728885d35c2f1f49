//! Infini-Craft - memoized symbol combine/split over LoRA-specialised models
//!
//! Two operations are served from one base model with per-operation
//! adapters:
//! - `combine`: two symbols ("Water", "Fire") into one ("Steam" 💨)
//! - `split`: one symbol into an ordered pair
//!
//! Every successful answer is cached for the lifetime of the service, with
//! concurrent requests for the same input sharing a single inference call.

#![warn(rustdoc::broken_intra_doc_links)]

pub mod adapter;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod prompt;
pub mod reply;
pub mod service;
pub mod symbol;

// Re-exports
pub use adapter::{load_adapter, AdapterConfig, AdapterHandle, AdapterSet};
pub use cache::{CacheStats, CoalescingCache};
pub use config::CraftConfig;
pub use engine::{
    GenerationRequest, GenerationSettings, InferenceEngine, RemoteEngine, RemoteEngineConfig,
};
pub use error::{Error, Result};
pub use prompt::{ChatMessage, ChatTemplate, JinjaTemplate, PromptBuilder, TemplateConfig};
pub use reply::{ReplyConfig, ReplyError, ReplyParser};
pub use service::{CraftService, ServiceStats};
pub use symbol::{Operation, Symbol, SymbolPair, SymbolResult};

use std::sync::Arc;
use tracing::{debug, info, instrument};

impl CraftService {
    /// Assemble a service from configuration and an engine.
    ///
    /// Loads the chat template and the adapter of each operation once; both are
    /// shared read-only for the lifetime of the service.
    #[instrument(skip_all)]
    pub fn from_config(config: &CraftConfig, engine: Arc<dyn InferenceEngine>) -> Result<Self> {
        config.validate()?;
        info!("Initializing symbol service");

        let template = JinjaTemplate::from_config(&config.template)?;
        debug!("Chat template ready");

        let adapters = AdapterSet::load(&config.adapters)?;
        debug!("Adapters loaded");

        Ok(Self::new(
            engine,
            PromptBuilder::new(Arc::new(template)),
            ReplyParser::new(config.reply.clone()),
            adapters,
            config.generation.clone(),
        ))
    }
}
