//! Embedding generation: provider backends and the content-addressed cache.

pub mod cache;
pub mod hashed;
pub mod openai;
pub mod provider;

pub use cache::EmbeddingCache;
pub use hashed::HashedProvider;
pub use openai::OpenAiProvider;
pub use provider::{DynProvider, EmbeddingProvider, ProviderError};
