//! Conduit: an ML-powered LLM request router.
//!
//! For each incoming query, Conduit selects which of N model backends should
//! answer it, balancing quality, cost and latency — and learns from every
//! outcome. The core pieces:
//!
//! - Contextual bandit policies (Thompson sampling, UCB1, LinUCB, contextual
//!   Thompson sampling) in [`bandit`]
//! - A two-phase hybrid router with knowledge transfer in [`hybrid`]
//! - The routing pipeline (analysis, constraints, fallback chains) in
//!   [`analyzer`] and [`engine`]
//! - Execution with automatic failover in [`executor`]
//! - Durable state with optimistic concurrency in [`storage`]
//! - The one-call façade in [`router`]

pub mod analyzer;
pub mod bandit;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod hybrid;
pub mod models;
pub mod registry;
pub mod router;
pub mod storage;

pub use config::{Algorithm, RouterConfig};
pub use error::{
    AnalysisError, CallError, ConduitError, ConfigError, DatabaseError, ExecutionError,
    RoutingError, StateStoreError, ValidationError,
};
pub use models::{
    Feedback, Query, QueryConstraints, QueryFeatures, Response, RouterPhase, RoutingDecision,
    RoutingResult,
};
pub use router::Router;
