//! Prompt building over Jinja chat templates
//!
//! A domain input becomes a single user turn, which the chat template renders
//! into the model's prompt format (control tokens, role markers).

use minijinja::{context, Environment, ErrorKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::symbol::{combine_text, Symbol};

/// Llama-2 chat format: `<s>[INST] {user} [/INST]`
pub const LLAMA2_CHAT_TEMPLATE: &str = "{% for message in messages %}\
{% if message.role == 'user' %}{{ bos_token }}[INST] {{ message.content | trim }} [/INST]\
{% elif message.role == 'assistant' %} {{ message.content | trim }} {{ eos_token }}\
{% elif message.role == 'system' %}<<SYS>>\n{{ message.content | trim }}\n<</SYS>>\n\n\
{% endif %}{% endfor %}";

/// One conversational turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Renders a structured conversation into a single prompt string
pub trait ChatTemplate: Send + Sync {
    fn render(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Chat template settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// `tokenizer_config.json` holding the model's `chat_template`
    pub tokenizer_config: Option<PathBuf>,
    /// BOS token used when the tokenizer config does not name one
    pub bos_token: String,
    /// EOS token used when the tokenizer config does not name one
    pub eos_token: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            tokenizer_config: None,
            bos_token: "<s>".to_string(),
            eos_token: "</s>".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenizerConfigFile {
    chat_template: Option<String>,
    #[serde(default)]
    bos_token: Option<serde_json::Value>,
    #[serde(default)]
    eos_token: Option<serde_json::Value>,
}

/// Special tokens appear either as plain strings or as `{"content": ...}` objects
fn token_value(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(obj) => obj
            .get("content")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => None,
    }
}

/// Jinja chat template rendered with `minijinja`
#[derive(Debug, Clone)]
pub struct JinjaTemplate {
    source: String,
    bos_token: String,
    eos_token: String,
}

impl JinjaTemplate {
    /// Compile-check and wrap a template source
    pub fn new(
        source: impl Into<String>,
        bos_token: impl Into<String>,
        eos_token: impl Into<String>,
    ) -> Result<Self> {
        let template = Self {
            source: source.into(),
            bos_token: bos_token.into(),
            eos_token: eos_token.into(),
        };
        template.environment().template_from_str(&template.source)?;
        Ok(template)
    }

    /// Built-in Llama-2 chat template
    pub fn llama2() -> Result<Self> {
        Self::new(LLAMA2_CHAT_TEMPLATE, "<s>", "</s>")
    }

    /// Load `chat_template` and special tokens from a `tokenizer_config.json`
    pub fn from_tokenizer_config(path: &Path, defaults: &TemplateConfig) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TokenizerConfigFile = serde_json::from_str(&content)?;
        let source = config.chat_template.ok_or_else(|| {
            Error::template(format!("no chat_template field in {}", path.display()))
        })?;

        // HF templates call Python string methods; minijinja exposes them as tests.
        let source = source
            .replace(".startswith(", " is startingwith(")
            .replace(".endswith(", " is endingwith(");

        Self::new(
            source,
            token_value(config.bos_token.as_ref()).unwrap_or_else(|| defaults.bos_token.clone()),
            token_value(config.eos_token.as_ref()).unwrap_or_else(|| defaults.eos_token.clone()),
        )
    }

    /// Resolve the template named by the config, falling back to Llama-2
    pub fn from_config(config: &TemplateConfig) -> Result<Self> {
        match &config.tokenizer_config {
            Some(path) => {
                debug!("Loading chat template from {}", path.display());
                Self::from_tokenizer_config(path, config)
            }
            None => Self::new(LLAMA2_CHAT_TEMPLATE, &config.bos_token, &config.eos_token),
        }
    }

    fn environment(&self) -> Environment<'static> {
        let mut env = Environment::new();
        env.add_function("raise_exception", |msg: String| -> std::result::Result<String, minijinja::Error> {
            Err(minijinja::Error::new(ErrorKind::InvalidOperation, msg))
        });
        env.add_test("startingwith", |value: &str, prefix: &str| value.starts_with(prefix));
        env.add_test("endingwith", |value: &str, suffix: &str| value.ends_with(suffix));
        env
    }
}

impl ChatTemplate for JinjaTemplate {
    fn render(&self, messages: &[ChatMessage]) -> Result<String> {
        let env = self.environment();
        let template = env.template_from_str(&self.source)?;
        let rendered = template.render(context! {
            messages => messages,
            bos_token => &self.bos_token,
            eos_token => &self.eos_token,
            add_generation_prompt => false,
        })?;
        Ok(rendered)
    }
}

/// Turns domain inputs into chat-formatted prompts
#[derive(Clone)]
pub struct PromptBuilder {
    template: Arc<dyn ChatTemplate>,
}

impl PromptBuilder {
    pub fn new(template: Arc<dyn ChatTemplate>) -> Self {
        Self { template }
    }

    /// Wrap `text` as a single user turn and render it
    pub fn build(&self, text: &str) -> Result<String> {
        self.template.render(&[ChatMessage::user(text)])
    }

    /// Prompt for combining two symbols, joined in order with `+`
    pub fn combine(&self, first: &Symbol, second: &Symbol) -> Result<String> {
        self.build(&combine_text(first, second))
    }

    /// Prompt for splitting one symbol
    pub fn split(&self, symbol: &Symbol) -> Result<String> {
        self.build(symbol.as_str())
    }
}

impl std::fmt::Debug for PromptBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptBuilder").finish_non_exhaustive()
    }
}
