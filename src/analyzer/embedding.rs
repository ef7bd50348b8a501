//! Text embedding for query analysis.
//!
//! The routing core consumes embeddings through the [`Embedder`] trait; a
//! production deployment plugs in a real embedding model behind it. The
//! built-in [`HashEmbedder`] is a deterministic hash-based fallback: word and
//! character-trigram features hashed onto a fixed-dimensional unit vector.

use async_trait::async_trait;
use ndarray::Array1;
use sha2::{Digest, Sha256};

use crate::error::AnalysisError;

/// Default embedding dimension.
pub const DEFAULT_DIMENSION: usize = 384;

/// Black-box text-to-vector function.
///
/// Implementations must be pure: the same text always maps to the same
/// vector for a fixed model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed the text into a fixed-dimensional vector.
    async fn embed(&self, text: &str) -> Result<Vec<f64>, AnalysisError>;

    /// Dimension of produced vectors.
    fn dimension(&self) -> usize;
}

/// Deterministic hash-based embedder.
///
/// Splits the dimension into word features, character-trigram features and a
/// small block of text statistics, then normalizes to unit length. Not a
/// semantic model, but stable, dependency-free and good enough for the
/// contextual policies to learn lexical structure.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashEmbedder {
    /// Create an embedder with the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Compute the embedding synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f64> {
        let mut embedding = Array1::<f64>::zeros(self.dimension);
        let text_lower = text.to_lowercase();

        // Word-level features in the first half.
        let words: Vec<&str> = text_lower.split_whitespace().collect();
        let word_dim = self.dimension / 2;
        if word_dim > 0 {
            for word in &words {
                let pos = hash_to_index(word, word_dim);
                embedding[pos] += 1.0 / words.len().max(1) as f64;
            }
        }

        // Character trigrams in the next quarter.
        let offset = word_dim;
        let trigram_dim = self.dimension / 4;
        if trigram_dim > 0 {
            let chars: Vec<char> = text_lower.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                let pos = offset + hash_to_index(&trigram, trigram_dim);
                embedding[pos] += 1.0;
            }
        }

        // Text statistics in the remainder.
        let stats_offset = offset + trigram_dim;
        let remaining = self.dimension - stats_offset;
        if remaining > 0 {
            embedding[stats_offset] = (text.len() as f64 / 1000.0).min(1.0);
        }
        if remaining > 1 {
            embedding[stats_offset + 1] = (words.len() as f64 / 200.0).min(1.0);
        }
        if remaining > 2 {
            let avg_word_len = if words.is_empty() {
                0.0
            } else {
                words.iter().map(|w| w.len()).sum::<usize>() as f64 / words.len() as f64
            };
            embedding[stats_offset + 2] = (avg_word_len / 15.0).min(1.0);
        }

        normalize(&mut embedding);
        embedding.to_vec()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, AnalysisError> {
        Ok(self.embed_text(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Hash a token to an index within `dim` using SHA-256.
///
/// SHA-256 keeps positions stable across processes and platforms, unlike the
/// standard library hasher.
fn hash_to_index(token: &str, dim: usize) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(bytes) % dim as u64) as usize
}

/// Normalize a vector to unit length in place. Zero vectors stay zero.
fn normalize(v: &mut Array1<f64>) {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        v.mapv_inplace(|x| x / norm);
    }
}
