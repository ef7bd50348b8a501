//! Error types for the Conduit routing pipeline.
//!
//! Defines error types for all major subsystems:
//! - Query analysis (embedding, complexity, domain classification)
//! - Model selection (bandit policies, constraint satisfaction)
//! - Execution (provider calls, timeouts, fallback exhaustion)
//! - Persistence (database, optimistic locking)
//! - Configuration and input validation

use thiserror::Error;

/// Errors that can occur during query analysis.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Embedding timed out after {seconds} seconds")]
    EmbeddingTimeout { seconds: u64 },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Query text is empty")]
    EmptyQuery,
}

/// Errors that can occur during model selection.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("No eligible models for query after relaxing all constraints")]
    NoEligibleModels,

    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    #[error("Feature dimension mismatch: policy expects {expected}, got {actual}")]
    FeatureDimension { expected: usize, actual: usize },

    #[error("Contextual policy requires query features")]
    ContextRequired,

    #[error("Posterior update rejected for '{model_id}': {reason}")]
    UpdateRejected { model_id: String, reason: String },

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),
}

/// Classified failure from the external LLM call interface.
///
/// All four variants are retryable across arms; only `SchemaParse` would be
/// retryable on the same arm, and the executor does not retry same-arm.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Call timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Failed to parse structured output: {0}")]
    SchemaParse(String),
}

/// Errors that can occur during execution with fallback.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("All models failed ({} attempted). Last error: {}", .errors.len(),
        .errors.last().map(|(_, e)| e.to_string()).unwrap_or_else(|| "none tried".to_string()))]
    AllModelsFailed {
        /// Per-arm errors in attempt order.
        errors: Vec<(String, CallError)>,
    },

    #[error("Model '{0}' is not present in the routing decision")]
    ModelNotInDecision(String),
}

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] crate::storage::MigrationError),
}

/// Errors that can occur in the versioned state store.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("Version conflict persisted after {retries} retries for ({router_id}, {key})")]
    VersionConflict {
        router_id: String,
        key: String,
        retries: u32,
    },

    #[error("Corrupt state payload for ({router_id}, {key}): {reason}")]
    CorruptPayload {
        router_id: String,
        key: String,
        reason: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors raised by input validation on core data types.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Query text cannot be empty")]
    EmptyQueryText,

    #[error("Field '{field}' out of range: {reason}")]
    OutOfRange { field: String, reason: String },
}

/// Errors in configuration or registry construction. These are fatal:
/// a router is never built from an invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Reward weights must sum to 1.0, got {0}")]
    RewardWeightSum(f64),

    #[error("Invalid registry entry '{model_id}': {reason}")]
    InvalidRegistryEntry { model_id: String, reason: String },

    #[error("Duplicate model id '{0}' in registry")]
    DuplicateModelId(String),

    #[error("Invalid setting '{setting}': {reason}")]
    InvalidSetting { setting: String, reason: String },

    #[error("Malformed pricing catalog: {0}")]
    MalformedCatalog(#[from] serde_json::Error),
}

/// Top-level error for the public façade.
///
/// Every variant maps to a stable surface code via [`ConduitError::code`],
/// which callers can correlate with logs and metrics.
#[derive(Debug, Error)]
pub enum ConduitError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    StateStore(#[from] StateStoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Circuit breaker open for '{0}'")]
    CircuitBreakerOpen(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
}

impl ConduitError {
    /// Stable surface code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            ConduitError::Analysis(_) => "ANALYSIS_FAILED",
            ConduitError::Routing(RoutingError::Analysis(_)) => "ANALYSIS_FAILED",
            ConduitError::Routing(_) => "ROUTING_FAILED",
            ConduitError::Execution(ExecutionError::AllModelsFailed { .. }) => "ALL_MODELS_FAILED",
            ConduitError::Execution(_) => "EXECUTION_FAILED",
            ConduitError::Database(_) => "DATABASE_ERROR",
            ConduitError::StateStore(StateStoreError::VersionConflict { .. }) => {
                "STATE_VERSION_CONFLICT"
            }
            ConduitError::StateStore(_) => "DATABASE_ERROR",
            ConduitError::Validation(_) => "VALIDATION_ERROR",
            ConduitError::Config(_) => "CONFIGURATION_ERROR",
            ConduitError::CircuitBreakerOpen(_) => "CIRCUIT_BREAKER_OPEN",
            ConduitError::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
        }
    }
}
