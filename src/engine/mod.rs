//! Inference engine interface
//!
//! The model, its quantization and the adapter application all live behind
//! [`InferenceEngine`]. The service only needs generated text back for a
//! prompt, an adapter selection and fixed decoding settings.

pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::adapter::AdapterHandle;
use crate::error::Result;

pub use remote::{RemoteEngine, RemoteEngineConfig};

/// Decoding settings shared by both operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Generation budget in tokens
    pub max_new_tokens: usize,
    /// Sampling temperature; 0 selects greedy decoding
    pub temperature: f32,
    /// Encode special tokens that appear in the prompt text
    pub encode_special_tokens: bool,
    /// Render special tokens in the generated text
    pub decode_special_tokens: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_new_tokens: 30,
            temperature: 0.0,
            encode_special_tokens: true,
            decode_special_tokens: false,
        }
    }
}

/// One generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Adapter applied on top of the base model, if any
    pub adapter: Option<Arc<AdapterHandle>>,
    pub settings: GenerationSettings,
}

/// Text generation backend.
///
/// Implementations return the prompt echo followed by the model's reply,
/// e.g. `"<s>[INST] Mouse+Cat [/INST] Steam Engine 🚂</s>"`.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String>;
}
