//! Routing engine: query in, routing decision out.
//!
//! One operation, [`RoutingEngine::route`]: analyze the query, compute the
//! eligible arm set under the query's constraints (relaxing them in a fixed
//! order if nothing qualifies), ask the active policy for a primary, rank the
//! remaining arms into a fallback chain, and explain the whole thing in a
//! reasoning string. The engine persists nothing.

use std::sync::Arc;

use ndarray::Array1;
use uuid::Uuid;

use crate::analyzer::QueryAnalyzer;
use crate::bandit::{BanditFeedback, BanditSnapshot, Policy, Selection};
use crate::config::{Algorithm, RouterConfig};
use crate::error::{ConfigError, RoutingError};
use crate::hybrid::{HybridRouter, HybridSnapshot};
use crate::models::{Query, QueryConstraints, RouterPhase, RoutingDecision};
use crate::registry::{ModelArm, ModelRegistry};

/// Assumed completion length when estimating request cost for filtering.
const EST_OUTPUT_TOKENS: u32 = 500;

/// The active selection machinery: one policy, or the two-phase hybrid.
#[derive(Debug)]
pub enum Selector {
    Single(Policy),
    Hybrid(HybridRouter),
}

impl Selector {
    fn select(
        &mut self,
        eligible: &[String],
        context: Option<&Array1<f64>>,
    ) -> Result<(Selection, Option<RouterPhase>), RoutingError> {
        match self {
            Selector::Single(policy) => Ok((policy.select(eligible, context)?, None)),
            Selector::Hybrid(router) => {
                let (selection, phase) = router.select(eligible, context)?;
                Ok((selection, Some(phase)))
            }
        }
    }

    fn update(
        &mut self,
        feedback: &BanditFeedback,
        reward: f64,
        context: Option<&Array1<f64>>,
        phase: Option<RouterPhase>,
    ) -> Result<(), RoutingError> {
        match self {
            Selector::Single(policy) => policy.update(feedback, reward, context),
            Selector::Hybrid(router) => {
                // A missing tag on a hybrid decision falls back to the
                // current phase.
                let phase = phase.unwrap_or(router.phase());
                router.update(feedback, reward, context, phase)
            }
        }
    }

    fn stats(&self) -> serde_json::Value {
        match self {
            Selector::Single(policy) => policy.stats(),
            Selector::Hybrid(router) => router.stats(),
        }
    }
}

/// Serialized selector state for persistence.
#[derive(Debug, Clone)]
pub enum SelectorSnapshot {
    Single(BanditSnapshot),
    Hybrid(HybridSnapshot),
}

impl SelectorSnapshot {
    /// Encode to the self-describing wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            SelectorSnapshot::Single(s) => s.to_bytes(),
            SelectorSnapshot::Hybrid(s) => s.to_bytes(),
        }
    }

    /// Persistence key: the algorithm name.
    pub fn key(&self) -> &'static str {
        match self {
            SelectorSnapshot::Single(s) => s.algorithm_name(),
            SelectorSnapshot::Hybrid(_) => "hybrid",
        }
    }
}

/// Outcome of constraint filtering.
struct Eligibility {
    arms: Vec<ModelArm>,
    relaxed: Vec<&'static str>,
}

/// The routing engine.
pub struct RoutingEngine {
    registry: Arc<ModelRegistry>,
    analyzer: Arc<QueryAnalyzer>,
    selector: tokio::sync::Mutex<Selector>,
    max_fallbacks: usize,
}

impl RoutingEngine {
    /// Build an engine for the configured algorithm over the registry's arms.
    pub fn new(
        registry: Arc<ModelRegistry>,
        analyzer: Arc<QueryAnalyzer>,
        config: &RouterConfig,
    ) -> Result<Self, ConfigError> {
        if registry.is_empty() {
            return Err(ConfigError::InvalidSetting {
                setting: "registry".to_string(),
                reason: "cannot route over an empty registry".to_string(),
            });
        }
        let arm_ids: Vec<String> = registry
            .all()
            .iter()
            .map(|arm| arm.model_id.clone())
            .collect();
        let selector = match config.algorithm {
            Algorithm::Hybrid => Selector::Hybrid(HybridRouter::new(&arm_ids, config)),
            other => Selector::Single(Policy::from_config(other, &arm_ids, config)?),
        };
        Ok(Self {
            registry,
            analyzer,
            selector: tokio::sync::Mutex::new(selector),
            max_fallbacks: config.max_fallbacks,
        })
    }

    /// The registry this engine routes over.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Route one query to a primary arm plus fallback chain.
    pub async fn route(&self, query: &Query) -> Result<RoutingDecision, RoutingError> {
        let features = self.analyzer.analyze(&query.text).await?;
        let context = features.context_vector();

        let constraints = query.constraints.clone().unwrap_or_default();
        let Eligibility { arms, relaxed } =
            self.eligible_arms(&constraints, features.token_count)?;
        let eligible_ids: Vec<String> = arms.iter().map(|a| a.model_id.clone()).collect();

        let (selection, phase) = {
            let mut selector = self.selector.lock().await;
            selector.select(&eligible_ids, Some(&context))?
        };

        let fallback_chain = self.build_fallback_chain(&arms, &selection.model_id);
        let reasoning = self.build_reasoning(
            &selection,
            phase,
            &arms,
            &fallback_chain,
            &constraints,
            &relaxed,
        );

        tracing::debug!(
            query_id = %query.id,
            selected = %selection.model_id,
            eligible = arms.len(),
            fallbacks = fallback_chain.len(),
            "routed query"
        );

        Ok(RoutingDecision {
            id: Uuid::new_v4().to_string(),
            query_id: query.id.clone(),
            selected_model: selection.model_id,
            fallback_chain,
            confidence: selection.confidence,
            features,
            reasoning,
            phase,
            created_at: chrono::Utc::now(),
        })
    }

    /// Apply feedback through the active selector.
    pub async fn apply_update(
        &self,
        feedback: &BanditFeedback,
        reward: f64,
        context: Option<&Array1<f64>>,
        phase: Option<RouterPhase>,
    ) -> Result<(), RoutingError> {
        let mut selector = self.selector.lock().await;
        selector.update(feedback, reward, context, phase)
    }

    /// Snapshot the selector state for persistence.
    pub async fn selector_snapshot(&self) -> SelectorSnapshot {
        let selector = self.selector.lock().await;
        match &*selector {
            Selector::Single(policy) => SelectorSnapshot::Single(policy.snapshot()),
            Selector::Hybrid(router) => SelectorSnapshot::Hybrid(router.snapshot()),
        }
    }

    /// Restore selector state from a persisted snapshot.
    pub async fn restore_selector(&self, snapshot: &SelectorSnapshot) -> Result<(), RoutingError> {
        let mut selector = self.selector.lock().await;
        match (&mut *selector, snapshot) {
            (Selector::Single(policy), SelectorSnapshot::Single(s)) => policy.restore(s),
            (Selector::Hybrid(router), SelectorSnapshot::Hybrid(s)) => router.restore(s),
            _ => Err(RoutingError::UpdateRejected {
                model_id: "*".to_string(),
                reason: "snapshot does not match the configured algorithm".to_string(),
            }),
        }
    }

    /// Diagnostic statistics from the active selector.
    pub async fn stats(&self) -> serde_json::Value {
        self.selector.lock().await.stats()
    }

    /// Compute the eligible set, relaxing constraints in a fixed order when
    /// filtering empties it: preferred provider first, then minimum quality,
    /// then maximum cost.
    fn eligible_arms(
        &self,
        constraints: &QueryConstraints,
        token_count: u32,
    ) -> Result<Eligibility, RoutingError> {
        let filter = |provider: bool, quality: bool, cost: bool| -> Vec<ModelArm> {
            self.registry
                .all()
                .iter()
                .filter(|arm| {
                    if provider {
                        if let Some(ref p) = constraints.preferred_provider {
                            if &arm.provider != p {
                                return false;
                            }
                        }
                    }
                    if quality {
                        if let Some(q) = constraints.min_quality {
                            if arm.expected_quality < q {
                                return false;
                            }
                        }
                    }
                    if cost {
                        if let Some(c) = constraints.max_cost {
                            if arm.estimate_cost(token_count, EST_OUTPUT_TOKENS) > c {
                                return false;
                            }
                        }
                    }
                    true
                })
                .cloned()
                .collect()
        };

        let mut relaxed: Vec<&'static str> = Vec::new();
        let mut arms = filter(true, true, true);

        if arms.is_empty() && constraints.preferred_provider.is_some() {
            relaxed.push("preferred_provider");
            tracing::warn!(
                provider = constraints.preferred_provider.as_deref(),
                "no eligible arms, relaxing preferred_provider"
            );
            arms = filter(false, true, true);
        }
        if arms.is_empty() && constraints.min_quality.is_some() {
            relaxed.push("min_quality");
            tracing::warn!(
                min_quality = constraints.min_quality,
                "no eligible arms, relaxing min_quality"
            );
            arms = filter(false, false, true);
        }
        if arms.is_empty() && constraints.max_cost.is_some() {
            relaxed.push("max_cost");
            tracing::warn!(
                max_cost = constraints.max_cost,
                "no eligible arms, relaxing max_cost"
            );
            arms = filter(false, false, false);
        }

        if arms.is_empty() {
            return Err(RoutingError::NoEligibleModels);
        }
        Ok(Eligibility { arms, relaxed })
    }

    /// Rank the non-primary eligible arms by a blend of quality, cost and
    /// provider diversity, and take the top `max_fallbacks`.
    ///
    /// Score: `0.6 * quality - 0.3 * cost_norm - 0.1 * same_provider`, where
    /// cost is normalized by the most expensive candidate so the weights act
    /// on comparable magnitudes. Penalizing the primary's provider buys
    /// failure diversity: a provider-wide outage should not take out the
    /// whole chain.
    fn build_fallback_chain(&self, eligible: &[ModelArm], primary_id: &str) -> Vec<String> {
        let primary_provider = eligible
            .iter()
            .find(|arm| arm.model_id == primary_id)
            .map(|arm| arm.provider.clone());

        let max_avg_cost = eligible
            .iter()
            .map(ModelArm::average_cost)
            .fold(0.0_f64, f64::max);

        let mut scored: Vec<(&ModelArm, f64)> = eligible
            .iter()
            .filter(|arm| arm.model_id != primary_id)
            .map(|arm| {
                let cost_norm = if max_avg_cost > 0.0 {
                    arm.average_cost() / max_avg_cost
                } else {
                    0.0
                };
                let provider_penalty = match &primary_provider {
                    Some(p) if p == &arm.provider => 1.0,
                    _ => 0.0,
                };
                let score =
                    0.6 * arm.expected_quality - 0.3 * cost_norm - 0.1 * provider_penalty;
                (arm, score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.model_id.cmp(&b.0.model_id))
        });

        scored
            .into_iter()
            .take(self.max_fallbacks)
            .map(|(arm, _)| arm.model_id.clone())
            .collect()
    }

    /// Human-readable explanation: winner, contenders, constraints and any
    /// relaxations that were applied.
    fn build_reasoning(
        &self,
        selection: &Selection,
        phase: Option<RouterPhase>,
        eligible: &[ModelArm],
        fallback_chain: &[String],
        constraints: &QueryConstraints,
        relaxed: &[&'static str],
    ) -> String {
        let mut parts = Vec::new();

        let phase_note = phase.map(|p| format!(", {p}")).unwrap_or_default();
        parts.push(format!(
            "Selected {} (confidence {:.2}{phase_note}) from {} eligible arms",
            selection.model_id,
            selection.confidence,
            eligible.len()
        ));

        if !fallback_chain.is_empty() {
            parts.push(format!("fallbacks: {}", fallback_chain.join(", ")));
        }

        let mut active = Vec::new();
        if let Some(c) = constraints.max_cost {
            active.push(format!("max_cost={c}"));
        }
        if let Some(l) = constraints.max_latency {
            active.push(format!("max_latency={l}"));
        }
        if let Some(q) = constraints.min_quality {
            active.push(format!("min_quality={q}"));
        }
        if let Some(ref p) = constraints.preferred_provider {
            active.push(format!("preferred_provider={p}"));
        }
        if active.is_empty() {
            parts.push("no active constraints".to_string());
        } else {
            parts.push(format!("constraints: {}", active.join(", ")));
        }

        if !relaxed.is_empty() {
            let notes: Vec<String> = relaxed.iter().map(|r| format!("{r} relaxed")).collect();
            parts.push(notes.join(", "));
        }

        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_registry() -> Arc<ModelRegistry> {
        Arc::new(
            ModelRegistry::new(vec![
                ModelArm::new("openai", "gpt-4o", 2.5e-6, 1.0e-5, 0.95),
                ModelArm::new("openai", "gpt-4o-mini", 1.5e-7, 6.0e-7, 0.85),
                ModelArm::new("anthropic", "claude-3-5-sonnet", 3.0e-6, 1.5e-5, 0.96),
                ModelArm::new("anthropic", "claude-3-haiku", 2.5e-7, 1.25e-6, 0.82),
                ModelArm::new("google", "gemini-1.5-flash", 7.5e-8, 3.0e-7, 0.80),
            ])
            .expect("valid registry"),
        )
    }

    fn engine(config: RouterConfig) -> RoutingEngine {
        let registry = small_registry();
        let analyzer = Arc::new(QueryAnalyzer::new(config.embedding_dim));
        RoutingEngine::new(registry, analyzer, &config).expect("valid engine")
    }

    fn config() -> RouterConfig {
        RouterConfig::new()
            .with_embedding_dim(8)
            .with_random_seed(42)
    }

    #[tokio::test]
    async fn test_route_produces_valid_decision() {
        let engine = engine(config());
        let query = Query::new("What is the capital of France?").expect("valid query");

        let decision = engine.route(&query).await.expect("routes");

        assert!(engine.registry().contains(&decision.selected_model));
        assert!(!decision.fallback_chain.contains(&decision.selected_model));
        for model in &decision.fallback_chain {
            assert!(engine.registry().contains(model));
        }
        assert!(decision.fallback_chain.len() <= 3);
        assert!((0.0..=1.0).contains(&decision.confidence));
        assert_eq!(decision.query_id, query.id);
        assert!(!decision.reasoning.is_empty());
        // Hybrid default starts in phase 1.
        assert_eq!(decision.phase, Some(RouterPhase::Explore));
    }

    #[tokio::test]
    async fn test_preferred_provider_filters_eligible() {
        let engine = engine(config());
        let query = Query::new("hello")
            .expect("valid query")
            .with_constraints(QueryConstraints::new().with_preferred_provider("anthropic"))
            .expect("valid constraints");

        // With only anthropic eligible, every route must pick an anthropic arm.
        for _ in 0..5 {
            let decision = engine.route(&query).await.expect("routes");
            assert!(decision.selected_model.starts_with("anthropic:"));
        }
    }

    #[tokio::test]
    async fn test_min_quality_filters_eligible() {
        let engine = engine(config());
        let query = Query::new("hello")
            .expect("valid query")
            .with_constraints(QueryConstraints::new().with_min_quality(0.9))
            .expect("valid constraints");

        for _ in 0..5 {
            let decision = engine.route(&query).await.expect("routes");
            let arm = engine
                .registry()
                .by_id(&decision.selected_model)
                .expect("in registry");
            assert!(arm.expected_quality >= 0.9);
        }
    }

    /// Constraint relaxation: a provider nobody serves is dropped first, the
    /// reasoning names it, and routing still succeeds.
    #[tokio::test]
    async fn test_unknown_provider_relaxed_and_named_in_reasoning() {
        let engine = engine(config());
        let query = Query::new("hello")
            .expect("valid query")
            .with_constraints(QueryConstraints::new().with_preferred_provider("groq"))
            .expect("valid constraints");

        let decision = engine.route(&query).await.expect("routes after relaxation");
        assert!(decision.reasoning.contains("preferred_provider relaxed"));
        assert!(engine.registry().contains(&decision.selected_model));
    }

    #[tokio::test]
    async fn test_relaxation_order_provider_then_quality() {
        let engine = engine(config());
        // Impossible combination: groq provider and impossible quality.
        let query = Query::new("hello")
            .expect("valid query")
            .with_constraints(
                QueryConstraints::new()
                    .with_preferred_provider("groq")
                    .with_min_quality(0.999),
            )
            .expect("valid constraints");

        let decision = engine.route(&query).await.expect("routes");
        assert!(decision.reasoning.contains("preferred_provider relaxed"));
        assert!(decision.reasoning.contains("min_quality relaxed"));
    }

    #[tokio::test]
    async fn test_fallback_chain_prefers_provider_diversity() {
        let engine = engine(config());

        // Rank fallbacks for a primary from openai; with comparable quality
        // and cost, the same-provider arm is penalized below a diverse one.
        let eligible: Vec<ModelArm> = engine.registry().all().to_vec();
        let chain = engine.build_fallback_chain(&eligible, "openai:gpt-4o");

        assert!(!chain.contains(&"openai:gpt-4o".to_string()));
        assert_eq!(chain.len(), 3);
        // haiku (quality 0.82, anthropic) must rank above gpt-4o-mini
        // (quality 0.85, same provider as the primary).
        let haiku_pos = chain
            .iter()
            .position(|m| m == "anthropic:claude-3-haiku")
            .expect("haiku in chain");
        let mini_pos = chain
            .iter()
            .position(|m| m == "openai:gpt-4o-mini")
            .expect("mini in chain");
        assert!(haiku_pos < mini_pos, "same-provider arm not penalized");
    }

    #[tokio::test]
    async fn test_max_fallbacks_respected() {
        let engine = engine(config().with_max_fallbacks(1));
        let query = Query::new("hello").expect("valid query");
        let decision = engine.route(&query).await.expect("routes");
        assert!(decision.fallback_chain.len() <= 1);
    }

    #[tokio::test]
    async fn test_update_flows_to_selector() {
        let engine = engine(config());
        let query = Query::new("hello").expect("valid query");
        let decision = engine.route(&query).await.expect("routes");

        let feedback = BanditFeedback {
            model_id: decision.selected_model.clone(),
            cost: 0.001,
            quality_score: 0.9,
            latency: 0.5,
        };
        engine
            .apply_update(
                &feedback,
                0.9,
                Some(&decision.features.context_vector()),
                decision.phase,
            )
            .await
            .expect("update applies");

        let stats = engine.stats().await;
        assert_eq!(stats["query_count"], 1);
    }

    #[tokio::test]
    async fn test_snapshot_restore_selector() {
        let engine = engine(config().with_algorithm(Algorithm::Ucb1));
        let query = Query::new("hello").expect("valid query");
        let decision = engine.route(&query).await.expect("routes");
        engine
            .apply_update(
                &BanditFeedback {
                    model_id: decision.selected_model.clone(),
                    cost: 0.001,
                    quality_score: 0.9,
                    latency: 0.5,
                },
                0.9,
                None,
                None,
            )
            .await
            .expect("update applies");

        let snapshot = engine.selector_snapshot().await;
        assert_eq!(snapshot.key(), "ucb1");

        let fresh = engine_with_algorithm(Algorithm::Ucb1);
        fresh.restore_selector(&snapshot).await.expect("restores");
        let stats = fresh.stats().await;
        assert_eq!(stats["total_pulls"], 1);
    }

    fn engine_with_algorithm(algorithm: Algorithm) -> RoutingEngine {
        engine(config().with_algorithm(algorithm))
    }

    #[tokio::test]
    async fn test_restore_rejects_algorithm_mismatch() {
        let ucb = engine_with_algorithm(Algorithm::Ucb1);
        let beta = engine_with_algorithm(Algorithm::BetaTs);
        let snapshot = beta.selector_snapshot().await;
        assert!(ucb.restore_selector(&snapshot).await.is_err());
    }
}
