//! Embedding service trait and the default offline implementation.
//!
//! The EmbeddingService trait abstracts text-to-vector conversion so the
//! index can be backed by a real model without touching the store. The
//! built-in HashEmbedding derives deterministic unit-length vectors from
//! token hashes: identical inputs always produce identical outputs, and
//! texts sharing vocabulary land near each other under cosine similarity.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::error::RetrievalError;

/// Dimension of the built-in embedder.
pub const HASH_EMBEDDING_DIM: usize = 384;

/// Model identifier recorded with the index; a mismatch on open forces a
/// full reingest.
pub const HASH_EMBEDDING_MODEL_ID: &str = "hash-embed-384-v1";

/// Service for generating text embeddings.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Stable identifier of the embedding model.
    fn model_id(&self) -> &str;

    /// Dimension of the vectors this service produces.
    fn dimensions(&self) -> usize;

    /// Generate an embedding vector for the given text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

/// Deterministic token-hash embedder.
#[derive(Debug, Clone, Default)]
pub struct HashEmbedding;

impl HashEmbedding {
    pub fn new() -> Self {
        Self
    }

    fn vectorize(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; HASH_EMBEDDING_DIM];
        for token in text.split_whitespace() {
            let token = token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % HASH_EMBEDDING_DIM as u64) as usize;
            // A second hash decides the sign so unrelated tokens cancel
            // rather than accumulate.
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let magnitude: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for v in &mut vector {
                *v /= magnitude;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingService for HashEmbedding {
    fn model_id(&self) -> &str {
        HASH_EMBEDDING_MODEL_ID
    }

    fn dimensions(&self) -> usize {
        HASH_EMBEDDING_DIM
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        if text.trim().is_empty() {
            return Err(RetrievalError::Embedding(
                "cannot embed empty text".to_string(),
            ));
        }
        Ok(Self::vectorize(text))
    }
}
