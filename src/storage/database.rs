//! PostgreSQL client for the routing audit trail.
//!
//! Transaction boundaries:
//! - Single-row inserts (queries): auto-commit.
//! - The interaction triple (decision, response, optional feedback): one
//!   transaction; any failure rolls back all three.
//! - Bandit state: versioned CAS in [`super::PostgresStateStore`], not here.
//!
//! Isolation level: READ COMMITTED (the PostgreSQL default).

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::error::DatabaseError;
use crate::models::{Feedback, Query, Response, RoutingDecision};

use super::migrations::MigrationRunner;

/// Pool sizing and timeouts.
const POOL_MIN_CONNECTIONS: u32 = 5;
const POOL_MAX_CONNECTIONS: u32 = 20;
const ACQUIRE_TIMEOUT_SECS: u64 = 60;

/// PostgreSQL database client.
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect with the standard pool configuration.
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .min_connections(POOL_MIN_CONNECTIONS)
            .max_connections(POOL_MAX_CONNECTIONS)
            .acquire_timeout(std::time::Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .connect(database_url)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        tracing::info!(
            min = POOL_MIN_CONNECTIONS,
            max = POOL_MAX_CONNECTIONS,
            "database connection pool created"
        );
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the routing schema.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        MigrationRunner::new(self.pool.clone()).run_migrations().await?;
        Ok(())
    }

    /// Save a query. Single INSERT, auto-commit.
    pub async fn save_query(&self, query: &Query) -> Result<(), DatabaseError> {
        let constraints_json = query
            .constraints
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO queries (id, text, user_id, constraints, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&query.id)
        .bind(&query.text)
        .bind(&query.user_id)
        .bind(constraints_json)
        .bind(query.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Save the decision, response and optional feedback atomically.
    ///
    /// Rollback of any part rolls back all three.
    pub async fn save_complete_interaction(
        &self,
        decision: &RoutingDecision,
        response: &Response,
        feedback: Option<&Feedback>,
    ) -> Result<(), DatabaseError> {
        let features_json = serde_json::to_value(&decision.features)?;
        let fallback_json = serde_json::to_value(&decision.fallback_chain)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO routing_decisions (
                id, query_id, selected_model, fallback_chain, confidence,
                features, reasoning, phase, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&decision.id)
        .bind(&decision.query_id)
        .bind(&decision.selected_model)
        .bind(&fallback_json)
        .bind(decision.confidence)
        .bind(&features_json)
        .bind(&decision.reasoning)
        .bind(decision.phase.map(|p| p.to_string()))
        .bind(decision.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO responses (id, query_id, model, text, cost, latency, tokens, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&response.id)
        .bind(&response.query_id)
        .bind(&response.model)
        .bind(&response.text)
        .bind(response.cost)
        .bind(response.latency)
        .bind(response.tokens as i32)
        .bind(response.created_at)
        .execute(&mut *tx)
        .await?;

        if let Some(feedback) = feedback {
            sqlx::query(
                r#"
                INSERT INTO feedback (
                    id, response_id, quality_score, user_rating,
                    met_expectations, comments, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&feedback.id)
            .bind(&feedback.response_id)
            .bind(feedback.quality_score)
            .bind(feedback.user_rating.map(|r| r as i32))
            .bind(feedback.met_expectations)
            .bind(&feedback.comments)
            .bind(feedback.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            decision = %decision.id,
            response = %response.id,
            with_feedback = feedback.is_some(),
            "saved complete interaction"
        );
        Ok(())
    }

    /// Save late-arriving feedback on its own. Single INSERT, auto-commit.
    pub async fn save_feedback(&self, feedback: &Feedback) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO feedback (
                id, response_id, quality_score, user_rating,
                met_expectations, comments, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&feedback.id)
        .bind(&feedback.response_id)
        .bind(feedback.quality_score)
        .bind(feedback.user_rating.map(|r| r as i32))
        .bind(feedback.met_expectations)
        .bind(&feedback.comments)
        .bind(feedback.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a response by id.
    pub async fn get_response_by_id(
        &self,
        response_id: &str,
    ) -> Result<Option<Response>, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT id, query_id, model, text, cost, latency, tokens, created_at
            FROM responses
            WHERE id = $1
            "#,
        )
        .bind(response_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let tokens: i32 = row.get("tokens");
        let created_at: DateTime<Utc> = row.get("created_at");
        Ok(Some(Response {
            id: row.get("id"),
            query_id: row.get("query_id"),
            model: row.get("model"),
            text: row.get("text"),
            cost: row.get("cost"),
            latency: row.get("latency"),
            tokens: tokens as u32,
            created_at,
        }))
    }
}
