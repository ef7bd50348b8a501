//! The public façade: one call from prompt to routed, attributed result.
//!
//! [`Router::complete`] runs the whole pipeline — analyze, route, execute
//! with failover, compute rewards, attribute feedback to every attempted arm,
//! persist the interaction and the updated posteriors — and returns a typed
//! [`RoutingResult`]. Persistence is optional: a router built without a
//! database or state store runs fully in memory, learning within the process.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ndarray::Array1;

use crate::analyzer::QueryAnalyzer;
use crate::bandit::{BanditFeedback, RewardCalculator};
use crate::config::{Algorithm, RouterConfig};
use crate::engine::{RoutingEngine, SelectorSnapshot};
use crate::error::ConduitError;
use crate::executor::{CompletionClient, ExecutionResult, ModelExecutor};
use crate::models::{Feedback, Query, QueryConstraints, RouterPhase, RoutingResult};
use crate::registry::ModelRegistry;
use crate::storage::{Database, PostgresStateStore};

/// Cap on remembered decision contexts for delayed feedback attribution.
const PENDING_ATTRIBUTION_CAP: usize = 1024;

/// Context needed to attribute late-arriving feedback to the right policy.
struct PendingAttribution {
    model_id: String,
    phase: Option<RouterPhase>,
    context: Array1<f64>,
    cost: f64,
    latency: f64,
}

/// Bounded FIFO map from response id to attribution context.
struct PendingAttributions {
    entries: HashMap<String, PendingAttribution>,
    order: VecDeque<String>,
}

impl PendingAttributions {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, response_id: String, pending: PendingAttribution) {
        if self.order.len() >= PENDING_ATTRIBUTION_CAP {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
        self.order.push_back(response_id.clone());
        self.entries.insert(response_id, pending);
    }

    fn take(&mut self, response_id: &str) -> Option<PendingAttribution> {
        self.entries.remove(response_id)
    }
}

/// The ML-powered request router.
pub struct Router {
    config: RouterConfig,
    engine: RoutingEngine,
    executor: ModelExecutor,
    client: Arc<dyn CompletionClient>,
    reward: tokio::sync::Mutex<RewardCalculator>,
    pending: tokio::sync::Mutex<PendingAttributions>,
    database: Option<Arc<Database>>,
    state_store: Option<Arc<PostgresStateStore>>,
    router_id: String,
    updates_since_persist: AtomicU64,
}

impl Router {
    /// Build a router over the built-in pricing catalog.
    pub fn new(
        client: Arc<dyn CompletionClient>,
        config: RouterConfig,
    ) -> Result<Self, ConduitError> {
        let registry = Arc::new(ModelRegistry::from_default_catalog()?);
        Self::with_registry(client, config, registry)
    }

    /// Build a router over a caller-provided registry.
    pub fn with_registry(
        client: Arc<dyn CompletionClient>,
        config: RouterConfig,
        registry: Arc<ModelRegistry>,
    ) -> Result<Self, ConduitError> {
        config.validate()?;
        let analyzer = Arc::new(QueryAnalyzer::new(config.embedding_dim));
        Self::assemble(client, config, registry, analyzer)
    }

    /// Build a router with a custom analyzer (custom embedder or cache).
    pub fn with_analyzer(
        client: Arc<dyn CompletionClient>,
        config: RouterConfig,
        registry: Arc<ModelRegistry>,
        analyzer: Arc<QueryAnalyzer>,
    ) -> Result<Self, ConduitError> {
        config.validate()?;
        if analyzer.embedding_dim() != config.embedding_dim {
            return Err(ConduitError::Config(
                crate::error::ConfigError::InvalidSetting {
                    setting: "embedding_dim".to_string(),
                    reason: format!(
                        "analyzer produces {} dims, config expects {}",
                        analyzer.embedding_dim(),
                        config.embedding_dim
                    ),
                },
            ));
        }
        Self::assemble(client, config, registry, analyzer)
    }

    fn assemble(
        client: Arc<dyn CompletionClient>,
        config: RouterConfig,
        registry: Arc<ModelRegistry>,
        analyzer: Arc<QueryAnalyzer>,
    ) -> Result<Self, ConduitError> {
        let engine = RoutingEngine::new(registry, analyzer, &config)?;
        let executor = ModelExecutor::new(config.call_timeout);
        let reward = RewardCalculator::new(config.reward_weights, config.latency_ceiling);
        Ok(Self {
            engine,
            executor,
            client,
            reward: tokio::sync::Mutex::new(reward),
            pending: tokio::sync::Mutex::new(PendingAttributions::new()),
            database: None,
            state_store: None,
            router_id: "conduit-default".to_string(),
            updates_since_persist: AtomicU64::new(0),
            config,
        })
    }

    /// Attach the audit database.
    pub fn with_database(mut self, database: Arc<Database>) -> Self {
        self.database = Some(database);
        self
    }

    /// Attach the versioned state store.
    pub fn with_state_store(mut self, state_store: Arc<PostgresStateStore>) -> Self {
        self.state_store = Some(state_store);
        self
    }

    /// Set the router id used as the persistence namespace.
    pub fn with_router_id(mut self, router_id: impl Into<String>) -> Self {
        self.router_id = router_id.into();
        self
    }

    /// The configuration this router was built with.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The routing engine (primarily for diagnostics).
    pub fn engine(&self) -> &RoutingEngine {
        &self.engine
    }

    /// Restore persisted posterior state, if a state store is attached and a
    /// snapshot exists. Call once at startup, before serving.
    pub async fn load_persisted_state(&self) -> Result<bool, ConduitError> {
        let Some(store) = &self.state_store else {
            return Ok(false);
        };

        let snapshot = match self.config.algorithm {
            Algorithm::Hybrid => store
                .load_hybrid_state(&self.router_id)
                .await?
                .map(|(s, _)| SelectorSnapshot::Hybrid(s)),
            other => {
                let key = algorithm_key(other);
                store
                    .load_bandit_state(&self.router_id, key)
                    .await?
                    .map(|(s, _)| SelectorSnapshot::Single(s))
            }
        };

        match snapshot {
            Some(snapshot) => {
                self.engine.restore_selector(&snapshot).await?;
                tracing::info!(router_id = %self.router_id, "restored persisted bandit state");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Route and execute one prompt.
    ///
    /// Pipeline: validate, analyze, route, execute with failover, compute
    /// rewards, attribute to every attempted arm, persist.
    pub async fn complete(
        &self,
        prompt: &str,
        user_id: Option<&str>,
        constraints: Option<QueryConstraints>,
    ) -> Result<RoutingResult, ConduitError> {
        let mut query = Query::new(prompt)?;
        if let Some(user_id) = user_id {
            query = query.with_user_id(user_id);
        }
        if let Some(constraints) = constraints {
            query = query.with_constraints(constraints)?;
        }

        if let Some(db) = &self.database {
            db.save_query(&query).await?;
        }

        let decision = self.engine.route(&query).await?;
        let context = decision.features.context_vector();

        let execution = match self
            .executor
            .execute_with_fallback(self.client.as_ref(), &decision, &query.text, None)
            .await
        {
            Ok(execution) => execution,
            Err(err) => {
                // Every arm failed; penalize them all so flaky arms stop
                // being selected, then surface the error.
                if let crate::error::ExecutionError::AllModelsFailed { errors } = &err {
                    let failed: Vec<String> = errors.iter().map(|(m, _)| m.clone()).collect();
                    self.attribute_failures(&failed, &context, decision.phase)
                        .await;
                    if let Err(persist_err) = self.maybe_persist_state(failed.len() as u64).await {
                        // The execution failure is the caller's error; a
                        // persistence hiccup on top of it is only logged.
                        tracing::warn!(error = %persist_err, "state persistence failed after exhaustion");
                    }
                }
                return Err(err.into());
            }
        };

        let updates = self
            .attribute_execution(&decision.phase, &context, &execution)
            .await?;

        if let Some(db) = &self.database {
            db.save_complete_interaction(&decision, &execution.response, None)
                .await?;
        }
        self.maybe_persist_state(updates).await?;

        self.pending.lock().await.insert(
            execution.response.id.clone(),
            PendingAttribution {
                model_id: execution.model_used.clone(),
                phase: decision.phase,
                context,
                cost: execution.response.cost,
                latency: execution.response.latency,
            },
        );

        Ok(RoutingResult::from_response(&execution.response, &decision))
    }

    /// Apply delayed user feedback to the arm that served the response.
    ///
    /// The router remembers recent decisions (bounded); feedback for a
    /// response it no longer remembers is persisted but cannot update
    /// posteriors, which is logged.
    pub async fn record_feedback(&self, feedback: &Feedback) -> Result<(), ConduitError> {
        let pending = self.pending.lock().await.take(&feedback.response_id);

        match pending {
            Some(pending) => {
                let bandit_feedback = BanditFeedback {
                    model_id: pending.model_id.clone(),
                    cost: pending.cost,
                    quality_score: feedback.quality_score,
                    latency: pending.latency,
                };
                let reward = self.reward.lock().await.reward(&bandit_feedback);
                self.engine
                    .apply_update(&bandit_feedback, reward, Some(&pending.context), pending.phase)
                    .await?;
                self.maybe_persist_state(1).await?;
            }
            None => {
                tracing::warn!(
                    response_id = %feedback.response_id,
                    "feedback for unknown response; posteriors not updated"
                );
            }
        }

        if let Some(db) = &self.database {
            db.save_feedback(feedback).await?;
        }
        Ok(())
    }

    /// Diagnostic statistics: selector state plus persistence counters.
    pub async fn stats(&self) -> serde_json::Value {
        let mut stats = self.engine.stats().await;
        if let Some(obj) = stats.as_object_mut() {
            obj.insert(
                "registry_models".to_string(),
                self.engine.registry().len().into(),
            );
            if let Some(store) = &self.state_store {
                obj.insert("state_conflicts".to_string(), store.conflict_count().into());
            }
        }
        stats
    }

    /// Attribute a successful execution: penalize the arms that failed, then
    /// reward the one that served. Exactly `failed + 1` updates.
    async fn attribute_execution(
        &self,
        phase: &Option<RouterPhase>,
        context: &Array1<f64>,
        execution: &ExecutionResult,
    ) -> Result<u64, ConduitError> {
        self.attribute_failures(&execution.failed_models, context, *phase)
            .await;

        let quality = execution.quality.unwrap_or_else(|| {
            self.engine
                .registry()
                .by_id(&execution.model_used)
                .map(|arm| arm.expected_quality)
                .unwrap_or(0.5)
        });
        let bandit_feedback = BanditFeedback {
            model_id: execution.model_used.clone(),
            cost: execution.response.cost,
            quality_score: quality,
            latency: execution.response.latency,
        };
        let reward = self.reward.lock().await.reward(&bandit_feedback);
        self.engine
            .apply_update(&bandit_feedback, reward, Some(context), *phase)
            .await?;

        Ok(execution.failed_models.len() as u64 + 1)
    }

    /// Penalize failed arms: quality 0, cost 0, latency = the per-arm
    /// timeout they burned.
    async fn attribute_failures(
        &self,
        failed_models: &[String],
        context: &Array1<f64>,
        phase: Option<RouterPhase>,
    ) {
        let timeout_secs = self.executor.timeout().as_secs_f64();
        for model_id in failed_models {
            let bandit_feedback = BanditFeedback {
                model_id: model_id.clone(),
                cost: 0.0,
                quality_score: 0.0,
                latency: timeout_secs,
            };
            let reward = self.reward.lock().await.reward(&bandit_feedback);
            if let Err(err) = self
                .engine
                .apply_update(&bandit_feedback, reward, Some(context), phase)
                .await
            {
                tracing::warn!(model_id = %model_id, error = %err, "failure attribution skipped");
            }
        }
    }

    /// Persist selector state after `n` more updates, batched by
    /// `persist_every_k`.
    async fn maybe_persist_state(&self, n: u64) -> Result<(), ConduitError> {
        let Some(store) = &self.state_store else {
            return Ok(());
        };
        let total = self.updates_since_persist.fetch_add(n, Ordering::SeqCst) + n;
        if total < self.config.persist_every_k {
            return Ok(());
        }
        self.updates_since_persist.store(0, Ordering::SeqCst);

        let snapshot = self.engine.selector_snapshot().await;
        let version = match &snapshot {
            SelectorSnapshot::Single(s) => {
                store
                    .save_bandit_state(&self.router_id, snapshot.key(), s)
                    .await?
            }
            SelectorSnapshot::Hybrid(s) => store.save_hybrid_state(&self.router_id, s).await?,
        };
        tracing::debug!(
            router_id = %self.router_id,
            key = snapshot.key(),
            version = version,
            "persisted bandit state"
        );
        Ok(())
    }
}

fn algorithm_key(algorithm: Algorithm) -> &'static str {
    match algorithm {
        Algorithm::BetaTs => "beta_ts",
        Algorithm::Ucb1 => "ucb1",
        Algorithm::Linucb => "linucb",
        Algorithm::CtxTs => "ctx_ts",
        Algorithm::Hybrid => "hybrid",
    }
}
