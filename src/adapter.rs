//! LoRA adapter loading
//!
//! Adapters are PEFT directories produced by the training scripts:
//! `adapter_config.json` next to `adapter_model.safetensors` (or the legacy
//! `adapter_model.bin`). Loading validates the directory once at startup;
//! the weights themselves are applied by the inference engine.

use memmap2::Mmap;
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::symbol::Operation;

const CONFIG_FILE: &str = "adapter_config.json";
const SAFETENSORS_FILE: &str = "adapter_model.safetensors";
const PYTORCH_FILE: &str = "adapter_model.bin";

/// Subset of the PEFT `adapter_config.json` the service relies on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeftAdapterConfig {
    pub peft_type: String,
    #[serde(default)]
    pub task_type: Option<String>,
    pub r: usize,
    pub lora_alpha: f32,
    #[serde(default)]
    pub target_modules: Vec<String>,
    #[serde(default)]
    pub base_model_name_or_path: Option<String>,
}

/// Adapter directories per operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Base model the adapters were trained against
    pub base_model: String,
    /// Adapter used by combine requests
    pub add: Option<PathBuf>,
    /// Adapter used by split requests
    pub split: Option<PathBuf>,
}

/// A validated adapter, ready to be selected per request
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterHandle {
    /// Adapter name ("add" or "split")
    pub name: String,
    /// Directory the adapter was loaded from
    pub path: PathBuf,
    pub rank: usize,
    pub alpha: f32,
    pub target_modules: Vec<String>,
    /// Number of tensors in the safetensors file, when that format is used
    pub tensor_count: Option<usize>,
}

impl AdapterHandle {
    /// Identifier passed to the engine when this adapter is selected
    pub fn adapter_id(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// LoRA scaling factor `alpha / r`
    pub fn scaling(&self) -> f32 {
        self.alpha / self.rank as f32
    }
}

/// Load and validate one PEFT adapter directory
pub fn load_adapter(base_model: &str, name: &str, dir: &Path) -> Result<AdapterHandle> {
    if !dir.is_dir() {
        return Err(Error::adapter(format!(
            "adapter directory not found: {}",
            dir.display()
        )));
    }

    let config_path = dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        Error::adapter(format!("failed to read {}: {}", config_path.display(), e))
    })?;
    let config: PeftAdapterConfig = serde_json::from_str(&content)?;

    if !config.peft_type.eq_ignore_ascii_case("LORA") {
        return Err(Error::adapter(format!(
            "unsupported peft_type {:?} in {}",
            config.peft_type,
            config_path.display()
        )));
    }
    if config.r == 0 {
        return Err(Error::adapter(format!(
            "adapter rank must be positive in {}",
            config_path.display()
        )));
    }

    match config.base_model_name_or_path.as_deref() {
        Some(trained_on) if !base_model.is_empty() && !same_model(trained_on, base_model) => {
            warn!(
                "Adapter '{}' was trained on '{}' but the base model is '{}'",
                name, trained_on, base_model
            );
        }
        _ => {}
    }

    let tensor_count = count_weights(dir)?;

    info!(
        "Loaded adapter '{}' from {} (r={}, alpha={})",
        name,
        dir.display(),
        config.r,
        config.lora_alpha
    );

    Ok(AdapterHandle {
        name: name.to_string(),
        path: dir.to_path_buf(),
        rank: config.r,
        alpha: config.lora_alpha,
        target_modules: config.target_modules,
        tensor_count,
    })
}

/// Compare model references by their final path component
fn same_model(a: &str, b: &str) -> bool {
    let tail = |s: &str| {
        s.trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(s)
            .to_ascii_lowercase()
    };
    tail(a) == tail(b)
}

fn count_weights(dir: &Path) -> Result<Option<usize>> {
    let safetensors_path = dir.join(SAFETENSORS_FILE);
    if safetensors_path.is_file() {
        let file = File::open(&safetensors_path)?;
        // SAFETY: the file is opened read-only and not modified while mapped.
        let mmap = unsafe { Mmap::map(&file)? };
        let tensors = SafeTensors::deserialize(&mmap).map_err(|e| {
            Error::adapter(format!(
                "invalid safetensors file {}: {}",
                safetensors_path.display(),
                e
            ))
        })?;
        let count = tensors.names().len();
        debug!("{} holds {} tensors", safetensors_path.display(), count);
        return Ok(Some(count));
    }

    if dir.join(PYTORCH_FILE).is_file() {
        return Ok(None);
    }

    Err(Error::adapter(format!(
        "no adapter weights ({} or {}) in {}",
        SAFETENSORS_FILE,
        PYTORCH_FILE,
        dir.display()
    )))
}

/// Adapters selected per operation
#[derive(Debug, Clone, Default)]
pub struct AdapterSet {
    add: Option<Arc<AdapterHandle>>,
    split: Option<Arc<AdapterHandle>>,
}

impl AdapterSet {
    pub fn new(add: Option<AdapterHandle>, split: Option<AdapterHandle>) -> Self {
        Self {
            add: add.map(Arc::new),
            split: split.map(Arc::new),
        }
    }

    /// Load the adapter of every operation. Each operation needs one; the
    /// base model alone does not follow the reply format.
    pub fn load(config: &AdapterConfig) -> Result<Self> {
        let load = |op: Operation, dir: &Option<PathBuf>| match dir.as_deref() {
            Some(dir) => load_adapter(&config.base_model, op.adapter_name(), dir),
            None => Err(Error::adapter(format!(
                "no adapter configured for {} requests (set adapters.{})",
                op,
                op.adapter_name()
            ))),
        };

        let add = load(Operation::Combine, &config.add)?;
        let split = load(Operation::Split, &config.split)?;

        Ok(Self::new(Some(add), Some(split)))
    }

    /// Adapter for an operation, if one was loaded
    pub fn for_operation(&self, operation: Operation) -> Option<Arc<AdapterHandle>> {
        match operation {
            Operation::Combine => self.add.clone(),
            Operation::Split => self.split.clone(),
        }
    }
}
