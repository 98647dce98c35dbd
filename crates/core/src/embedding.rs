//! Text-to-vector embedding.
//!
//! [`EmbeddingProvider`] is the seam used by [`Collection::query_text`] and the
//! RAG pipeline. [`HashEmbedder`] is a deterministic, model-free provider based
//! on feature hashing of word tokens. It is good enough for tests, demos and
//! keyword-flavoured similarity; real deployments plug in a model-backed provider.
//!
//! [`Collection::query_text`]: crate::storage::Collection::query_text

use crate::config::MAX_DIMENSION;
use crate::error::{Error, Result};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

/// Turns text into a fixed-length vector.
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier for logs.
    fn model_name(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embeds several texts. The default calls [`embed`](Self::embed) in order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is",
        "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there",
        "these", "they", "this", "to", "was", "will", "with", "what", "which", "who", "how",
        "about", "me", "my", "you", "your", "can", "do", "does", "some", "any",
    ]
    .into_iter()
    .collect()
});

/// Lowercases, splits on non-alphanumeric characters and drops stop words and
/// single-character tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1 && !STOP_WORDS.contains(t))
        .map(str::to_owned)
        .collect()
}

/// Deterministic signed feature-hashing embedder.
///
/// Each token (and each adjacent token pair, at half weight) is hashed to a
/// bucket and a sign. The result is L2-normalized, so cosine similarity between
/// two embeddings tracks their shared vocabulary.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    bigrams: bool,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 || dimension > MAX_DIMENSION {
            return Err(Error::InvalidConfig(format!(
                "embedding dimension must be in 1..={MAX_DIMENSION}, got {dimension}"
            )));
        }
        Ok(Self {
            dimension,
            bigrams: true,
        })
    }

    /// Disables the token-pair features.
    pub fn unigrams_only(mut self) -> Self {
        self.bigrams = false;
        self
    }

    fn add_feature(&self, out: &mut [f32], feature: &str, weight: f32) {
        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        let h = hasher.finish();
        let bucket = (h % self.dimension as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        out[bucket] += sign * weight;
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "feature-hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Err(Error::Embedding(format!(
                "no indexable tokens in {:?}",
                text.chars().take(64).collect::<String>()
            )));
        }
        let mut out = vec![0.0f32; self.dimension];
        for t in &tokens {
            self.add_feature(&mut out, t, 1.0);
        }
        if self.bigrams {
            for pair in tokens.windows(2) {
                self.add_feature(&mut out, &format!("{} {}", pair[0], pair[1]), 0.5);
            }
        }
        let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            // Every feature cancelled out; fall back to the first token's bucket
            self.add_feature(&mut out, &tokens[0], 1.0);
            let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
            out.iter_mut().for_each(|x| *x /= norm);
            return Ok(out);
        }
        out.iter_mut().for_each(|x| *x /= norm);
        Ok(out)
    }
}
