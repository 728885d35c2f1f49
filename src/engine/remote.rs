//! Engine backed by a text-generation server's `/generate` endpoint
//!
//! Speaks the TGI/LoRAX request shape, where per-request adapters are
//! selected with `adapter_id`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use super::{GenerationRequest, GenerationSettings, InferenceEngine};
use crate::error::{Error, Result};

/// Connection settings for a remote generation server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteEngineConfig {
    /// Base URL of the generation server
    pub endpoint: String,
    /// Per-request timeout
    pub timeout_seconds: u64,
    /// Where the server resolves `adapter_id` from ("local", "hub", ...)
    pub adapter_source: String,
}

impl Default for RemoteEngineConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8081".to_string(),
            timeout_seconds: 60,
            adapter_source: "local".to_string(),
        }
    }
}

/// `/generate` has no special-token switches. The server always parses
/// special tokens in the prompt and skips them in the generated text.
fn server_honours(settings: &GenerationSettings) -> bool {
    settings.encode_special_tokens && !settings.decode_special_tokens
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    inputs: &'a str,
    parameters: GenerateParameters<'a>,
}

#[derive(Debug, Serialize)]
struct GenerateParameters<'a> {
    max_new_tokens: usize,
    do_sample: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    return_full_text: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    adapter_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    adapter_source: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Generation {
    generated_text: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GenerateResponse {
    Single(Generation),
    Batch(Vec<Generation>),
}

/// HTTP client for a remote generation server
#[derive(Debug, Clone)]
pub struct RemoteEngine {
    client: reqwest::Client,
    url: String,
    adapter_source: String,
}

impl RemoteEngine {
    pub fn new(config: &RemoteEngineConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(Error::config("engine endpoint must not be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/generate", config.endpoint.trim_end_matches('/')),
            adapter_source: config.adapter_source.clone(),
        })
    }

    /// Full URL of the generate endpoint
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl InferenceEngine for RemoteEngine {
    #[instrument(skip(self, request), fields(url = %self.url))]
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        if !server_honours(&request.settings) {
            debug!(
                encode_special_tokens = request.settings.encode_special_tokens,
                decode_special_tokens = request.settings.decode_special_tokens,
                "Special-token settings are not sent; the server applies its own tokenization"
            );
        }

        let greedy = request.settings.temperature <= 0.0;
        let body = GenerateBody {
            inputs: &request.prompt,
            parameters: GenerateParameters {
                max_new_tokens: request.settings.max_new_tokens,
                do_sample: !greedy,
                temperature: (!greedy).then_some(request.settings.temperature),
                return_full_text: false,
                adapter_id: request.adapter.as_ref().map(|a| a.adapter_id()),
                adapter_source: request
                    .adapter
                    .as_ref()
                    .map(|_| self.adapter_source.as_str()),
            },
        };

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::inference(format!(
                "{} returned {}: {}",
                self.url, status, detail
            )));
        }

        let generation = match response.json::<GenerateResponse>().await? {
            GenerateResponse::Single(generation) => generation,
            GenerateResponse::Batch(mut generations) => {
                if generations.is_empty() {
                    return Err(Error::inference("server returned no generations"));
                }
                generations.swap_remove(0)
            }
        };
        debug!("Generated {} bytes", generation.generated_text.len());

        // Re-attach the prompt so the reply sits after the template's marker.
        Ok(format!(
            "{} {}",
            request.prompt,
            generation.generated_text.trim_start()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_normalisation() {
        let engine = RemoteEngine::new(&RemoteEngineConfig {
            endpoint: "http://localhost:3000/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(engine.url(), "http://localhost:3000/generate");
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        let err = RemoteEngine::new(&RemoteEngineConfig {
            endpoint: " ".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_greedy_body_omits_temperature() {
        let body = GenerateBody {
            inputs: "<s>[INST] Fire [/INST]",
            parameters: GenerateParameters {
                max_new_tokens: 30,
                do_sample: false,
                temperature: None,
                return_full_text: false,
                adapter_id: Some("/loras/split".to_string()),
                adapter_source: Some("local"),
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["parameters"]["max_new_tokens"], 30);
        assert_eq!(json["parameters"]["do_sample"], false);
        assert!(json["parameters"].get("temperature").is_none());
        assert_eq!(json["parameters"]["adapter_id"], "/loras/split");
        assert!(json["parameters"].get("encode_special_tokens").is_none());
    }

    #[test]
    fn test_special_token_settings_against_server_tokenization() {
        assert!(server_honours(&GenerationSettings::default()));
        assert!(!server_honours(&GenerationSettings {
            decode_special_tokens: true,
            ..Default::default()
        }));
        assert!(!server_honours(&GenerationSettings {
            encode_special_tokens: false,
            ..Default::default()
        }));
    }
}
