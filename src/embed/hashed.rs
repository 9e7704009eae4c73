//! Deterministic offline embedding provider.
//!
//! Projects token and token-prefix features into a fixed-dimension space via
//! signed feature hashing. No network, no model files, stable across runs,
//! which makes it the default for API-less operation and the test vehicle
//! for everything above it. Prefix features give partial credit for shared
//! word stems ("return" vs "returning") without a stemmer.

use sha2::{Digest, Sha256};

use super::provider::{EmbeddingProvider, ProviderError};

const MIN_PREFIX_LEN: usize = 3;

/// Signed feature-hashing embedder.
pub struct HashedProvider {
    dimension: usize,
    model_id: String,
}

impl HashedProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
            model_id: format!("hashed-v1-{}", dimension.max(8)),
        }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            for feature in features_of(&token) {
                let (bucket, sign) = self.project(&feature);
                vector[bucket] += sign;
            }
        }

        // Unit-normalize so cosine similarity reduces to a dot product.
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }

    /// Hash a feature to a (bucket, sign) pair.
    fn project(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
            % self.dimension;
        let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }
}

impl EmbeddingProvider for HashedProvider {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }
}

/// Lowercased alphanumeric tokens.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// A token plus its prefixes of length >= MIN_PREFIX_LEN.
fn features_of(token: &str) -> Vec<String> {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= MIN_PREFIX_LEN {
        return vec![token.to_string()];
    }
    (MIN_PREFIX_LEN..=chars.len())
        .map(|len| chars[..len].iter().collect())
        .collect()
}
