//! Query analysis: text in, routing features out.
//!
//! The analyzer turns free-form query text into [`QueryFeatures`]:
//! a semantic embedding, an approximate token count, a complexity score and a
//! coarse domain classification. Results are optionally cached by content
//! hash with a TTL.

pub mod cache;
pub mod embedding;

pub use cache::{AnalysisCache, CacheStats, ContentHash};
pub use embedding::{Embedder, HashEmbedder, DEFAULT_DIMENSION};

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::error::AnalysisError;
use crate::models::QueryFeatures;

/// Timeout for a single embedding computation.
const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(5);

/// Keyword tables for coarse domain classification.
const DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "code",
        &[
            "code", "function", "bug", "debug", "compile", "python", "rust", "javascript",
            "sql", "api", "class", "implement", "refactor", "algorithm", "regex", "script",
        ],
    ),
    (
        "math",
        &[
            "calculate", "equation", "integral", "derivative", "prime", "probability",
            "matrix", "theorem", "solve", "sum", "geometry", "algebra",
        ],
    ),
    (
        "creative",
        &[
            "story", "poem", "write a", "imagine", "fiction", "character", "lyrics",
            "creative", "essay", "narrative",
        ],
    ),
    (
        "analysis",
        &[
            "analyze", "compare", "evaluate", "summarize", "pros and cons", "tradeoff",
            "review", "assess", "explain why", "interpret",
        ],
    ),
];

/// Query analyzer: embedding, token estimate, complexity and domain.
pub struct QueryAnalyzer {
    embedder: Arc<dyn Embedder>,
    cache: Option<AnalysisCache>,
    code_cues: Regex,
    reasoning_cues: Regex,
}

impl QueryAnalyzer {
    /// Create an analyzer with the default hash embedder and no cache.
    pub fn new(embedding_dim: usize) -> Self {
        Self::with_embedder(Arc::new(HashEmbedder::new(embedding_dim)))
    }

    /// Create an analyzer around a custom embedder.
    pub fn with_embedder(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            cache: None,
            code_cues: Regex::new(r"```|\bfn\b|\bdef\b|\bclass\b|\bSELECT\b|\bimport\b|=>|::")
                .expect("static regex"),
            reasoning_cues: Regex::new(
                r"(?i)\b(explain|analyze|compare|derive|prove|optimi[sz]e|design|evaluate|step[ -]by[ -]step|in detail)\b",
            )
            .expect("static regex"),
        }
    }

    /// Enable feature caching with the given capacity and TTL.
    pub fn with_cache(mut self, max_entries: usize, ttl: Duration) -> Self {
        self.cache = Some(AnalysisCache::new(max_entries, ttl));
        self
    }

    /// Embedding dimension of the underlying embedder.
    pub fn embedding_dim(&self) -> usize {
        self.embedder.dimension()
    }

    /// Analyze query text into routing features.
    ///
    /// # Errors
    ///
    /// `AnalysisError` is non-retryable: empty text, embedding failure,
    /// embedding timeout or a dimension mismatch from the embedder.
    pub async fn analyze(&self, text: &str) -> Result<QueryFeatures, AnalysisError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(AnalysisError::EmptyQuery);
        }

        if let Some(cache) = &self.cache {
            if let Some(features) = cache.get(trimmed) {
                tracing::debug!(hash = %ContentHash::from_text(trimmed).as_str(), "analysis cache hit");
                return Ok(features);
            }
        }

        let embedding = tokio::time::timeout(EMBEDDING_TIMEOUT, self.embedder.embed(trimmed))
            .await
            .map_err(|_| AnalysisError::EmbeddingTimeout {
                seconds: EMBEDDING_TIMEOUT.as_secs(),
            })??;

        if embedding.len() != self.embedder.dimension() {
            return Err(AnalysisError::DimensionMismatch {
                expected: self.embedder.dimension(),
                actual: embedding.len(),
            });
        }

        let token_count = estimate_tokens(trimmed);
        let complexity_score = self.complexity_score(trimmed);
        let (domain, domain_confidence) = classify_domain(trimmed);

        let features = QueryFeatures {
            embedding,
            token_count,
            complexity_score,
            domain,
            domain_confidence,
        };

        if let Some(cache) = &self.cache {
            cache.insert(trimmed, features.clone());
        }

        Ok(features)
    }

    /// Cache statistics, if caching is enabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    /// Complexity in [0, 1] from length, sentence structure and vocabulary.
    fn complexity_score(&self, text: &str) -> f64 {
        let length_score = (text.len() as f64 / 1500.0).min(1.0);

        let sentences = text
            .split(['.', '!', '?'])
            .filter(|s| !s.trim().is_empty())
            .count()
            .max(1);
        let words = text.split_whitespace().count();
        let words_per_sentence = words as f64 / sentences as f64;
        let structure_score = (words_per_sentence / 30.0).min(1.0);

        let mut cue_score: f64 = 0.0;
        if self.code_cues.is_match(text) {
            cue_score += 0.5;
        }
        let reasoning_hits = self.reasoning_cues.find_iter(text).count();
        cue_score += (reasoning_hits as f64 * 0.25).min(0.5);

        (0.35 * length_score + 0.25 * structure_score + 0.4 * cue_score).clamp(0.0, 1.0)
    }
}

/// Approximate token count: ~4 characters per token for English text.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as f64 / 4.0).ceil() as u32
}

/// Classify the query into a coarse domain with a confidence score.
///
/// Keyword hits are counted per domain; no hits at all falls back to
/// ("general", 0.5).
fn classify_domain(text: &str) -> (String, f64) {
    let lower = text.to_lowercase();
    let mut best: Option<(&str, usize)> = None;
    let mut total_hits = 0usize;

    for (domain, keywords) in DOMAIN_KEYWORDS {
        let hits = keywords.iter().filter(|kw| lower.contains(*kw)).count();
        total_hits += hits;
        if hits > 0 && best.map_or(true, |(_, b)| hits > b) {
            best = Some((domain, hits));
        }
    }

    match best {
        Some((domain, hits)) => {
            let confidence = (0.5 + hits as f64 / (total_hits as f64 * 2.0)).min(0.95);
            (domain.to_string(), confidence)
        }
        None => ("general".to_string(), 0.5),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_analyze_produces_features() {
        let analyzer = QueryAnalyzer::new(32);
        let features = analyzer
            .analyze("Write a Python function to sort a list")
            .await
            .expect("analysis should succeed");

        assert_eq!(features.embedding.len(), 32);
        assert!(features.token_count > 0);
        assert!((0.0..=1.0).contains(&features.complexity_score));
        assert_eq!(features.domain, "code");
        assert!(features.domain_confidence > 0.5);
    }

    #[tokio::test]
    async fn test_analyze_rejects_empty() {
        let analyzer = QueryAnalyzer::new(32);
        assert!(matches!(
            analyzer.analyze("   ").await,
            Err(AnalysisError::EmptyQuery)
        ));
    }

    #[tokio::test]
    async fn test_analyze_is_deterministic() {
        let analyzer = QueryAnalyzer::new(32);
        let a = analyzer.analyze("What is 2+2?").await.expect("analysis");
        let b = analyzer.analyze("What is 2+2?").await.expect("analysis");
        assert_eq!(a.embedding, b.embedding);
        assert_eq!(a.complexity_score, b.complexity_score);
        assert_eq!(a.domain, b.domain);
    }

    #[tokio::test]
    async fn test_cache_round_trip() {
        let analyzer = QueryAnalyzer::new(32).with_cache(16, Duration::from_secs(60));

        analyzer.analyze("hello world").await.expect("analysis");
        analyzer.analyze("hello world").await.expect("analysis");

        let stats = analyzer.cache_stats().expect("cache enabled");
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_complexity_ordering() {
        let analyzer = QueryAnalyzer::new(32);
        let simple = analyzer.analyze("What is 2+2?").await.expect("analysis");
        let complex = analyzer
            .analyze(
                "Explain quantum entanglement and its implications for quantum \
                 computing in detail, then compare the leading hardware approaches \
                 and analyze their error-correction tradeoffs step by step.",
            )
            .await
            .expect("analysis");

        assert!(complex.complexity_score > simple.complexity_score);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("Hello, world! Test."), 5);
        assert_eq!(estimate_tokens(""), 0);
        let long_text = "a".repeat(1000);
        assert_eq!(estimate_tokens(&long_text), 250);
    }

    #[test]
    fn test_domain_classification() {
        let (domain, confidence) = classify_domain("Debug this Python function");
        assert_eq!(domain, "code");
        assert!(confidence > 0.5);

        let (domain, _) = classify_domain("Write a poem about the sea");
        assert_eq!(domain, "creative");

        let (domain, confidence) = classify_domain("What is the capital of France?");
        assert_eq!(domain, "general");
        assert_eq!(confidence, 0.5);
    }
}
