//! Database schema constants.
//!
//! All SQL schema definitions for the PostgreSQL backend: versioned bandit
//! state, hybrid router state, and the append-only audit tables for queries,
//! decisions, responses and feedback.

/// Versioned per-policy bandit state, written under optimistic locking.
pub const CREATE_BANDIT_STATES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS bandit_states (
    router_id VARCHAR(255) NOT NULL,
    key VARCHAR(255) NOT NULL,
    version INTEGER NOT NULL,
    payload BYTEA NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (router_id, key)
)
"#;

/// Versioned hybrid router state (both phases plus transfer bookkeeping).
pub const CREATE_HYBRID_ROUTER_STATES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS hybrid_router_states (
    router_id VARCHAR(255) PRIMARY KEY,
    version INTEGER NOT NULL,
    payload BYTEA NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Append-only query audit.
pub const CREATE_QUERIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS queries (
    id VARCHAR(64) PRIMARY KEY,
    text TEXT NOT NULL,
    user_id VARCHAR(255),
    constraints JSONB,
    created_at TIMESTAMPTZ NOT NULL
)
"#;

/// Append-only routing decision audit.
pub const CREATE_ROUTING_DECISIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS routing_decisions (
    id VARCHAR(64) PRIMARY KEY,
    query_id VARCHAR(64) NOT NULL,
    selected_model VARCHAR(255) NOT NULL,
    fallback_chain JSONB NOT NULL,
    confidence DOUBLE PRECISION NOT NULL,
    features JSONB NOT NULL,
    reasoning TEXT NOT NULL,
    phase VARCHAR(32),
    created_at TIMESTAMPTZ NOT NULL
)
"#;

/// Append-only response audit.
pub const CREATE_RESPONSES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS responses (
    id VARCHAR(64) PRIMARY KEY,
    query_id VARCHAR(64) NOT NULL,
    model VARCHAR(255) NOT NULL,
    text TEXT NOT NULL,
    cost DOUBLE PRECISION NOT NULL,
    latency DOUBLE PRECISION NOT NULL,
    tokens INTEGER NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
)
"#;

/// Append-only feedback audit.
pub const CREATE_FEEDBACK_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS feedback (
    id VARCHAR(64) PRIMARY KEY,
    response_id VARCHAR(64) NOT NULL,
    quality_score DOUBLE PRECISION NOT NULL,
    user_rating INTEGER,
    met_expectations BOOLEAN NOT NULL,
    comments TEXT,
    created_at TIMESTAMPTZ NOT NULL
)
"#;

/// All required indexes.
pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_routing_decisions_query_id ON routing_decisions(query_id);
CREATE INDEX IF NOT EXISTS idx_responses_query_id ON responses(query_id);
CREATE INDEX IF NOT EXISTS idx_responses_model ON responses(model);
CREATE INDEX IF NOT EXISTS idx_feedback_response_id ON feedback(response_id);
CREATE INDEX IF NOT EXISTS idx_queries_created_at ON queries(created_at);
CREATE INDEX IF NOT EXISTS idx_bandit_states_updated_at ON bandit_states(updated_at)
"#;

/// Returns all schema creation statements in dependency order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_BANDIT_STATES_TABLE,
        CREATE_HYBRID_ROUTER_STATES_TABLE,
        CREATE_QUERIES_TABLE,
        CREATE_ROUTING_DECISIONS_TABLE,
        CREATE_RESPONSES_TABLE,
        CREATE_FEEDBACK_TABLE,
        CREATE_INDEXES,
    ]
}

/// Table names in the schema.
pub mod tables {
    /// Versioned bandit state table name.
    pub const BANDIT_STATES: &str = "bandit_states";
    /// Versioned hybrid router state table name.
    pub const HYBRID_ROUTER_STATES: &str = "hybrid_router_states";
    /// Query audit table name.
    pub const QUERIES: &str = "queries";
    /// Decision audit table name.
    pub const ROUTING_DECISIONS: &str = "routing_decisions";
    /// Response audit table name.
    pub const RESPONSES: &str = "responses";
    /// Feedback audit table name.
    pub const FEEDBACK: &str = "feedback";
}
