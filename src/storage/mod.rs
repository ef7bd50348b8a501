//! Persistence: the audit database and the versioned state store.
//!
//! - [`Database`] writes the append-only audit trail (queries, decisions,
//!   responses, feedback) with explicit transaction boundaries.
//! - [`PostgresStateStore`] persists bandit posteriors under optimistic
//!   locking so multiple router processes can write safely.
//! - [`MigrationRunner`] applies the schema idempotently at startup.

pub mod database;
pub mod migrations;
pub mod schema;
pub mod state_store;

pub use database::Database;
pub use migrations::{MigrationError, MigrationRunner};
pub use state_store::{PostgresStateStore, BASE_DELAY_MS, MAX_DELAY_MS, MAX_RETRIES};
