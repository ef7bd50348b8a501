//! Core data types for the routing pipeline.
//!
//! Queries, extracted features, routing decisions, responses and feedback.
//! All types are write-once records: they are created in-flight, validated at
//! construction and never mutated afterwards.

use chrono::{DateTime, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Constraints a caller can attach to a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryConstraints {
    /// Maximum cost in dollars for the whole request.
    pub max_cost: Option<f64>,
    /// Maximum acceptable latency in seconds.
    pub max_latency: Option<f64>,
    /// Minimum expected quality (0.0 - 1.0).
    pub min_quality: Option<f64>,
    /// Preferred provider (e.g. "openai", "anthropic", "google", "groq").
    pub preferred_provider: Option<String>,
}

impl QueryConstraints {
    /// Create empty constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum cost.
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    /// Set the maximum latency.
    pub fn with_max_latency(mut self, max_latency: f64) -> Self {
        self.max_latency = Some(max_latency);
        self
    }

    /// Set the minimum quality.
    pub fn with_min_quality(mut self, min_quality: f64) -> Self {
        self.min_quality = Some(min_quality);
        self
    }

    /// Set the preferred provider.
    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    /// Validate constraint ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(c) = self.max_cost {
            if c < 0.0 {
                return Err(ValidationError::OutOfRange {
                    field: "max_cost".to_string(),
                    reason: format!("must be non-negative, got {c}"),
                });
            }
        }
        if let Some(l) = self.max_latency {
            if l < 0.0 {
                return Err(ValidationError::OutOfRange {
                    field: "max_latency".to_string(),
                    reason: format!("must be non-negative, got {l}"),
                });
            }
        }
        if let Some(q) = self.min_quality {
            if !(0.0..=1.0).contains(&q) {
                return Err(ValidationError::OutOfRange {
                    field: "min_quality".to_string(),
                    reason: format!("must be in [0, 1], got {q}"),
                });
            }
        }
        Ok(())
    }

    /// True when no constraint is set.
    pub fn is_empty(&self) -> bool {
        self.max_cost.is_none()
            && self.max_latency.is_none()
            && self.min_quality.is_none()
            && self.preferred_provider.is_none()
    }
}

/// A user query to be routed to an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Unique query ID.
    pub id: String,
    /// Query text, trimmed and non-empty.
    pub text: String,
    /// Optional user identifier.
    pub user_id: Option<String>,
    /// Optional routing constraints.
    pub constraints: Option<QueryConstraints>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Query {
    /// Create a new query with a generated ID.
    ///
    /// The text is trimmed; empty or whitespace-only text is rejected.
    pub fn new(text: impl Into<String>) -> Result<Self, ValidationError> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyQueryText);
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            text: trimmed.to_string(),
            user_id: None,
            constraints: None,
            created_at: Utc::now(),
        })
    }

    /// Attach a user identifier.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach routing constraints (validated).
    pub fn with_constraints(
        mut self,
        constraints: QueryConstraints,
    ) -> Result<Self, ValidationError> {
        constraints.validate()?;
        self.constraints = Some(constraints);
        Ok(self)
    }
}

/// Features extracted from a query for routing decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryFeatures {
    /// Semantic embedding of the query text.
    pub embedding: Vec<f64>,
    /// Approximate token count.
    pub token_count: u32,
    /// Complexity score (0.0 - 1.0).
    pub complexity_score: f64,
    /// Coarse domain classification.
    pub domain: String,
    /// Domain classification confidence (0.0 - 1.0).
    pub domain_confidence: f64,
}

impl QueryFeatures {
    /// Dimension of the full context vector fed to contextual policies.
    pub fn context_dim(&self) -> usize {
        self.embedding.len() + 3
    }

    /// Full context vector: embedding concatenated with normalized token
    /// count, complexity score and domain confidence.
    pub fn context_vector(&self) -> Array1<f64> {
        let mut v = Array1::zeros(self.context_dim());
        for (i, x) in self.embedding.iter().enumerate() {
            v[i] = *x;
        }
        let base = self.embedding.len();
        v[base] = (self.token_count as f64 / 1000.0).min(1.0);
        v[base + 1] = self.complexity_score;
        v[base + 2] = self.domain_confidence;
        v
    }
}

/// Phase of the hybrid router that produced a decision.
///
/// Decisions carry this tag so late-arriving feedback is attributed to the
/// policy that actually made the selection, even if a phase transition
/// happened in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterPhase {
    /// Non-contextual exploration (UCB1).
    Explore,
    /// Contextual routing (LinUCB).
    Contextual,
}

impl std::fmt::Display for RouterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterPhase::Explore => write!(f, "phase-1"),
            RouterPhase::Contextual => write!(f, "phase-2"),
        }
    }
}

/// ML-powered routing decision for a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Decision ID.
    pub id: String,
    /// Associated query ID.
    pub query_id: String,
    /// Selected model id (`provider:model_name`).
    pub selected_model: String,
    /// Ordered fallback chain; never contains `selected_model`.
    pub fallback_chain: Vec<String>,
    /// Selection confidence (0.0 - 1.0).
    pub confidence: f64,
    /// Snapshot of the features the decision was based on.
    pub features: QueryFeatures,
    /// Human-readable explanation of the decision.
    pub reasoning: String,
    /// Phase of the hybrid router that made the selection, if any.
    pub phase: Option<RouterPhase>,
    /// Decision timestamp.
    pub created_at: DateTime<Utc>,
}

/// LLM response to a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Unique response ID.
    pub id: String,
    /// Associated query ID.
    pub query_id: String,
    /// Model that actually generated the response.
    pub model: String,
    /// Response text (JSON for structured outputs).
    pub text: String,
    /// Cost in dollars.
    pub cost: f64,
    /// Latency in seconds.
    pub latency: f64,
    /// Total tokens used.
    pub tokens: u32,
    /// Response timestamp.
    pub created_at: DateTime<Utc>,
}

impl Response {
    /// Create a new response with a generated ID.
    pub fn new(
        query_id: impl Into<String>,
        model: impl Into<String>,
        text: impl Into<String>,
        cost: f64,
        latency: f64,
        tokens: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query_id: query_id.into(),
            model: model.into(),
            text: text.into(),
            cost,
            latency,
            tokens,
            created_at: Utc::now(),
        }
    }
}

/// User feedback on response quality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    /// Unique feedback ID.
    pub id: String,
    /// Associated response ID.
    pub response_id: String,
    /// Quality score (0.0 - 1.0).
    pub quality_score: f64,
    /// Optional user rating (1 - 5 stars).
    pub user_rating: Option<u8>,
    /// Whether the response met user expectations.
    pub met_expectations: bool,
    /// Optional free-form comments.
    pub comments: Option<String>,
    /// Feedback timestamp.
    pub created_at: DateTime<Utc>,
}

impl Feedback {
    /// Create feedback with a generated ID.
    pub fn new(
        response_id: impl Into<String>,
        quality_score: f64,
        met_expectations: bool,
    ) -> Result<Self, ValidationError> {
        if !(0.0..=1.0).contains(&quality_score) {
            return Err(ValidationError::OutOfRange {
                field: "quality_score".to_string(),
                reason: format!("must be in [0, 1], got {quality_score}"),
            });
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            response_id: response_id.into(),
            quality_score,
            user_rating: None,
            met_expectations,
            comments: None,
            created_at: Utc::now(),
        })
    }

    /// Attach a 1-5 star rating.
    pub fn with_user_rating(mut self, rating: u8) -> Result<Self, ValidationError> {
        if !(1..=5).contains(&rating) {
            return Err(ValidationError::OutOfRange {
                field: "user_rating".to_string(),
                reason: format!("must be 1-5, got {rating}"),
            });
        }
        self.user_rating = Some(rating);
        Ok(self)
    }

    /// Attach free-form comments.
    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }
}

/// Complete routing result returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingResult {
    /// Response ID.
    pub id: String,
    /// Query ID.
    pub query_id: String,
    /// Model that served the request.
    pub model: String,
    /// Structured response data.
    pub data: serde_json::Value,
    /// Cost in dollars.
    pub cost: f64,
    /// Latency in seconds.
    pub latency: f64,
    /// Total tokens used.
    pub tokens: u32,
    /// Routing confidence from the decision.
    pub routing_confidence: f64,
    /// Routing reasoning from the decision.
    pub reasoning: String,
}

impl RoutingResult {
    /// Build a result from a response and the decision that produced it.
    ///
    /// The response text is parsed as JSON when possible; plain text is
    /// wrapped as `{"content": ...}`.
    pub fn from_response(response: &Response, decision: &RoutingDecision) -> Self {
        let data = serde_json::from_str(&response.text)
            .unwrap_or_else(|_| serde_json::json!({ "content": response.text }));
        Self {
            id: response.id.clone(),
            query_id: response.query_id.clone(),
            model: response.model.clone(),
            data,
            cost: response.cost,
            latency: response.latency,
            tokens: response.tokens,
            routing_confidence: decision.confidence,
            reasoning: decision.reasoning.clone(),
        }
    }
}
