//! OpenAI-compatible HTTP embedding provider.
//!
//! Talks to any `/embeddings` endpoint speaking the OpenAI wire format.
//! One blocking request per batch with a per-call timeout; retry policy
//! lives in the cache layer, so this module only classifies failures as
//! transient or not.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::provider::{EmbeddingProvider, ProviderError};
use crate::config::EmbeddingConfig;

/// Remote embedding backend over HTTP.
pub struct OpenAiProvider {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiProvider {
    /// Build a provider from config. The API key is read from the
    /// environment variable named in the config, never from the config file.
    pub fn from_config(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Embedding API key not found: set the {} environment variable",
                config.api_key_env
            )
        })?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.api_base.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            dimension: config.remote_dimension,
        })
    }
}

impl EmbeddingProvider for OpenAiProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        debug!(batch = texts.len(), model = %self.model, "Requesting embeddings");

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(classify_transport)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ProviderError::Transport(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ProviderError::InvalidInput(format!("HTTP {status}: {body}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| ProviderError::Api(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(ProviderError::Api(format!(
                "expected {} vectors, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        // Responses are index-tagged; never trust the wire order.
        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);

        for item in &items {
            if item.embedding.len() != self.dimension {
                return Err(ProviderError::Api(format!(
                    "model returned dimension {}, configured {}",
                    item.embedding.len(),
                    self.dimension
                )));
            }
        }

        Ok(items.into_iter().map(|item| item.embedding).collect())
    }
}

fn classify_transport(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(error.to_string())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}
