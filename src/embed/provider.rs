//! Embedding provider abstraction.
//!
//! The indexer treats embedding generation as an opaque remote function:
//! batches of text go in, fixed-length float vectors come out. Providers are
//! swappable behind [`EmbeddingProvider`]; the cache and index both key on
//! `model_id` so vectors from different models can never mix in one index.

use crate::config::EmbeddingConfig;
use crate::error::Result;

/// A backend capable of turning text into fixed-length vectors.
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier for the model; cache entries and index snapshots
    /// are scoped to it.
    fn model_id(&self) -> &str;

    /// Length of every vector this provider produces.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts. Returns one vector per input, in order.
    fn embed_batch(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;
}

/// Typed failures from an embedding provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider asked us to slow down. Transient.
    #[error("rate limited by embedding provider")]
    RateLimited,

    /// The request exceeded its deadline. Transient.
    #[error("embedding request timed out")]
    Timeout,

    /// Connection-level failure. Transient.
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider rejected the input itself. Not retryable.
    #[error("provider rejected input: {0}")]
    InvalidInput(String),

    /// Malformed or unexpected provider response. Not retryable.
    #[error("unexpected provider response: {0}")]
    Api(String),
}

impl ProviderError {
    /// Whether this failure is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited | ProviderError::Timeout | ProviderError::Transport(_)
        )
    }
}

/// Construct the configured provider backend.
pub fn from_config(config: &EmbeddingConfig) -> anyhow::Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hashed" => Ok(Box::new(super::hashed::HashedProvider::new(
            config.hashed_dimension,
        ))),
        "openai" => Ok(Box::new(super::openai::OpenAiProvider::from_config(
            config,
        )?)),
        other => anyhow::bail!(
            "Unknown embedding provider '{other}' (expected 'hashed' or 'openai')"
        ),
    }
}

/// Convenience re-export used across the crate.
pub type DynProvider = Box<dyn EmbeddingProvider>;
