//! Versioned bandit-state persistence with optimistic locking.
//!
//! Multiple router processes may write the same `(router_id, key)` row. The
//! store never takes row locks; instead every save is a compare-and-swap on
//! the row's `version` column, retried under bounded exponential backoff with
//! jitter. A conflict means the caller's read was stale; the loop re-reads
//! the current version and tries again, so the last read-modify-write wins
//! without ever holding a database resource across the merge.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::RngExt;
use sqlx::{PgPool, Row};

use crate::bandit::BanditSnapshot;
use crate::error::StateStoreError;
use crate::hybrid::HybridSnapshot;

/// Base backoff delay in milliseconds.
pub const BASE_DELAY_MS: u64 = 50;
/// Backoff delay cap in milliseconds.
pub const MAX_DELAY_MS: u64 = 500;
/// Retries after the initial attempt before giving up.
pub const MAX_RETRIES: u32 = 5;

/// Backoff before retry `attempt`: `min(MAX, BASE * 2^attempt)` with +/- 50%
/// jitter so colliding writers desynchronize.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let base = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(16)).min(MAX_DELAY_MS);
    let jitter: f64 = rand::rng().random_range(0.5..=1.5);
    Duration::from_micros((base as f64 * jitter * 1000.0) as u64)
}

/// Drives one CAS attempt function through the bounded-backoff retry loop.
///
/// Every conflict increments `conflict_count`; after `MAX_RETRIES` retries
/// beyond the initial attempt, the conflict is surfaced to the caller.
async fn cas_with_retry<F, Fut>(
    router_id: &str,
    key: Option<&str>,
    conflict_count: &AtomicU64,
    mut attempt_fn: F,
) -> Result<i32, StateStoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<i32>, StateStoreError>>,
{
    for attempt in 0..=MAX_RETRIES {
        match attempt_fn().await? {
            Some(version) => return Ok(version),
            None => {
                conflict_count.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    router_id = router_id,
                    key = key.unwrap_or("hybrid"),
                    attempt = attempt,
                    "optimistic lock conflict"
                );
                if attempt == MAX_RETRIES {
                    break;
                }
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }
    }

    Err(StateStoreError::VersionConflict {
        router_id: router_id.to_string(),
        key: key.unwrap_or("hybrid").to_string(),
        retries: MAX_RETRIES,
    })
}

/// PostgreSQL-backed state store with optimistic concurrency.
pub struct PostgresStateStore {
    pool: PgPool,
    conflict_count: AtomicU64,
}

impl PostgresStateStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            conflict_count: AtomicU64::new(0),
        }
    }

    /// Total version conflicts observed since construction. Readable
    /// lock-free; useful as a contention signal.
    pub fn conflict_count(&self) -> u64 {
        self.conflict_count.load(Ordering::Relaxed)
    }

    /// Load a policy snapshot and its version. `None` when never saved.
    pub async fn load_bandit_state(
        &self,
        router_id: &str,
        key: &str,
    ) -> Result<Option<(BanditSnapshot, i32)>, StateStoreError> {
        let row = sqlx::query(
            "SELECT payload, version FROM bandit_states WHERE router_id = $1 AND key = $2",
        )
        .bind(router_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let payload: Vec<u8> = row.get("payload");
        let version: i32 = row.get("version");
        let snapshot = BanditSnapshot::from_bytes(&payload).map_err(|e| {
            StateStoreError::CorruptPayload {
                router_id: router_id.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Some((snapshot, version)))
    }

    /// Save a policy snapshot under optimistic locking; returns the new
    /// version.
    pub async fn save_bandit_state(
        &self,
        router_id: &str,
        key: &str,
        snapshot: &BanditSnapshot,
    ) -> Result<i32, StateStoreError> {
        self.save_versioned(router_id, Some(key), snapshot.to_bytes())
            .await
    }

    /// Load the hybrid router snapshot and its version.
    pub async fn load_hybrid_state(
        &self,
        router_id: &str,
    ) -> Result<Option<(HybridSnapshot, i32)>, StateStoreError> {
        let row = sqlx::query(
            "SELECT payload, version FROM hybrid_router_states WHERE router_id = $1",
        )
        .bind(router_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let payload: Vec<u8> = row.get("payload");
        let version: i32 = row.get("version");
        let snapshot = HybridSnapshot::from_bytes(&payload).map_err(|e| {
            StateStoreError::CorruptPayload {
                router_id: router_id.to_string(),
                key: "hybrid".to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Some((snapshot, version)))
    }

    /// Save the hybrid router snapshot under optimistic locking; returns the
    /// new version.
    pub async fn save_hybrid_state(
        &self,
        router_id: &str,
        snapshot: &HybridSnapshot,
    ) -> Result<i32, StateStoreError> {
        self.save_versioned(router_id, None, snapshot.to_bytes()).await
    }

    /// The CAS write protocol.
    ///
    /// 1. Read the current version.
    /// 2. Absent: INSERT at version 1; a unique-violation race counts as a
    ///    conflict and retries as an update.
    /// 3. Present at `v`: UPDATE ... WHERE version = v; zero rows affected is
    ///    a conflict.
    /// 4. On conflict: count it, back off with jitter, retry; after
    ///    `MAX_RETRIES` retries, surface `VersionConflict`.
    async fn save_versioned(
        &self,
        router_id: &str,
        key: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<i32, StateStoreError> {
        cas_with_retry(router_id, key, &self.conflict_count, || {
            self.try_save(router_id, key, &payload)
        })
        .await
    }

    /// One CAS attempt. `Ok(Some(v))` on success, `Ok(None)` on conflict.
    async fn try_save(
        &self,
        router_id: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<Option<i32>, StateStoreError> {
        let current = self.current_version(router_id, key).await?;

        match current {
            None => {
                let inserted = match key {
                    Some(key) => {
                        sqlx::query(
                            r#"
                            INSERT INTO bandit_states (router_id, key, version, payload, updated_at)
                            VALUES ($1, $2, 1, $3, NOW())
                            ON CONFLICT (router_id, key) DO NOTHING
                            "#,
                        )
                        .bind(router_id)
                        .bind(key)
                        .bind(payload)
                        .execute(&self.pool)
                        .await?
                    }
                    None => {
                        sqlx::query(
                            r#"
                            INSERT INTO hybrid_router_states (router_id, version, payload, updated_at)
                            VALUES ($1, 1, $2, NOW())
                            ON CONFLICT (router_id) DO NOTHING
                            "#,
                        )
                        .bind(router_id)
                        .bind(payload)
                        .execute(&self.pool)
                        .await?
                    }
                };
                // Zero rows: another writer inserted first.
                Ok((inserted.rows_affected() == 1).then_some(1))
            }
            Some(version) => {
                let updated = match key {
                    Some(key) => {
                        sqlx::query(
                            r#"
                            UPDATE bandit_states
                            SET payload = $1, version = version + 1, updated_at = NOW()
                            WHERE router_id = $2 AND key = $3 AND version = $4
                            "#,
                        )
                        .bind(payload)
                        .bind(router_id)
                        .bind(key)
                        .bind(version)
                        .execute(&self.pool)
                        .await?
                    }
                    None => {
                        sqlx::query(
                            r#"
                            UPDATE hybrid_router_states
                            SET payload = $1, version = version + 1, updated_at = NOW()
                            WHERE router_id = $2 AND version = $3
                            "#,
                        )
                        .bind(payload)
                        .bind(router_id)
                        .bind(version)
                        .execute(&self.pool)
                        .await?
                    }
                };
                Ok((updated.rows_affected() == 1).then_some(version + 1))
            }
        }
    }

    async fn current_version(
        &self,
        router_id: &str,
        key: Option<&str>,
    ) -> Result<Option<i32>, StateStoreError> {
        let row = match key {
            Some(key) => {
                sqlx::query("SELECT version FROM bandit_states WHERE router_id = $1 AND key = $2")
                    .bind(router_id)
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT version FROM hybrid_router_states WHERE router_id = $1")
                    .bind(router_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        Ok(row.map(|r| r.get("version")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_increases_up_to_cap() {
        // Compare midpoints (jitter is +/- 50%): 50, 100, 200, 400, 500, 500.
        let expected_base = [50u64, 100, 200, 400, 500, 500];
        for (attempt, base) in expected_base.iter().enumerate() {
            let d = backoff_delay(attempt as u32);
            let ms = d.as_secs_f64() * 1000.0;
            assert!(
                ms >= *base as f64 * 0.5 - 1e-6 && ms <= *base as f64 * 1.5 + 1e-6,
                "attempt {attempt}: {ms}ms outside [{}, {}]",
                *base as f64 * 0.5,
                *base as f64 * 1.5
            );
        }
    }

    #[test]
    fn test_backoff_respects_max_delay() {
        for _ in 0..20 {
            let d = backoff_delay(12);
            assert!(d.as_secs_f64() * 1000.0 <= MAX_DELAY_MS as f64 * 1.5 + 1e-6);
        }
    }

    #[test]
    fn test_backoff_has_jitter() {
        let delays: std::collections::HashSet<u128> =
            (0..10).map(|_| backoff_delay(0).as_micros()).collect();
        assert!(delays.len() > 1, "jitter should vary delays");
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let d = backoff_delay(u32::MAX);
        assert!(d.as_millis() as u64 <= MAX_DELAY_MS * 2);
    }

    /// Stale-writer interleave: the first CAS attempt hits a conflict (zero
    /// rows updated), the re-read sees the new version and the second
    /// attempt lands. One conflict counted.
    #[tokio::test]
    async fn test_retry_succeeds_after_single_conflict() {
        let conflicts = AtomicU64::new(0);
        let mut outcomes = vec![Ok(None), Ok(Some(7))].into_iter();

        let version = cas_with_retry("router-1", Some("linucb"), &conflicts, || {
            let outcome = outcomes.next().expect("scripted outcome");
            async move { outcome }
        })
        .await
        .expect("second attempt lands");

        assert_eq!(version, 7);
        assert_eq!(conflicts.load(Ordering::Relaxed), 1);
    }

    /// Retry exhaustion: consecutive conflicts surface `VersionConflict`
    /// after MAX_RETRIES retries, counting every conflict including the
    /// initial attempt's.
    #[tokio::test]
    async fn test_exhausted_retries_surface_conflict() {
        let conflicts = AtomicU64::new(0);

        let err = cas_with_retry("router-1", Some("linucb"), &conflicts, || async {
            Ok(None)
        })
        .await
        .expect_err("never succeeds");

        assert!(matches!(
            err,
            StateStoreError::VersionConflict { retries: MAX_RETRIES, .. }
        ));
        assert_eq!(
            conflicts.load(Ordering::Relaxed),
            (MAX_RETRIES + 1) as u64
        );
    }

    #[tokio::test]
    async fn test_database_errors_abort_retry_loop() {
        let conflicts = AtomicU64::new(0);
        let err = cas_with_retry("router-1", None, &conflicts, || async {
            Err(StateStoreError::VersionConflict {
                router_id: "other".to_string(),
                key: "k".to_string(),
                retries: 0,
            })
        })
        .await
        .expect_err("errors propagate");
        // Propagated immediately, not treated as a retryable conflict.
        assert_eq!(conflicts.load(Ordering::Relaxed), 0);
        assert!(matches!(err, StateStoreError::VersionConflict { retries: 0, .. }));
    }
}
