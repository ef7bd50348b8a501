//! Contextual bandit policy suite.
//!
//! Four algorithms share one contract: select an arm from an eligible set,
//! ingest a scalar reward, serialize and restore posterior state, and report
//! diagnostics. The variants carry different numeric state shapes, so they
//! are composed as a tagged enum ([`Policy`]) rather than trait objects.
//!
//! - [`BetaThompsonBandit`] — Beta-Bernoulli Thompson sampling
//! - [`Ucb1Bandit`] — UCB1 with forced exploration
//! - [`LinUcbBandit`] — LinUCB (contextual, deterministic)
//! - [`ContextualThompsonBandit`] — Bayesian linear regression sampling

pub mod contextual_thompson;
pub mod linalg;
pub mod linucb;
pub mod reward;
pub mod snapshot;
pub mod thompson;
pub mod ucb1;

pub use contextual_thompson::ContextualThompsonBandit;
pub use linucb::LinUcbBandit;
pub use reward::{RewardCalculator, RewardWeights};
pub use snapshot::{BanditSnapshot, SnapshotError};
pub use thompson::BetaThompsonBandit;
pub use ucb1::Ucb1Bandit;

use ndarray::Array1;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::config::{Algorithm, RouterConfig};
use crate::error::{ConfigError, RoutingError};

/// Observed outcome for one arm, the input to reward computation and
/// posterior updates.
#[derive(Debug, Clone)]
pub struct BanditFeedback {
    /// Arm that served the request.
    pub model_id: String,
    /// Observed cost in dollars (0.0 for failed executions).
    pub cost: f64,
    /// Observed quality score in [0, 1] (0.0 for failed executions).
    pub quality_score: f64,
    /// Observed latency in seconds.
    pub latency: f64,
}

/// Result of a policy selection.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Selected arm.
    pub model_id: String,
    /// Diagnostic confidence in [0, 1].
    pub confidence: f64,
}

/// Build a ChaCha8 RNG, seeded for reproducibility when a seed is given.
pub(crate) fn seeded_rng(seed: Option<u64>) -> ChaCha8Rng {
    let seed = seed.unwrap_or_else(|| rand::rng().random());
    ChaCha8Rng::seed_from_u64(seed)
}

/// Diagnostic confidence from the score margin between the winner and the
/// runner-up. A single eligible arm is certainty; an infinite score (forced
/// exploration) is pure exploration and reports the uniform baseline.
pub(crate) fn margin_confidence(best: f64, second: f64, eligible: usize) -> f64 {
    if eligible <= 1 {
        return 1.0;
    }
    let base = 1.0 / eligible as f64;
    if !best.is_finite() || !second.is_finite() {
        return base;
    }
    let margin = (best - second).max(0.0);
    let scaled = margin / (margin + 1.0);
    (base + (1.0 - base) * scaled).clamp(0.0, 1.0)
}

/// A single bandit policy, dispatched by algorithm tag.
#[derive(Debug)]
pub enum Policy {
    BetaThompson(BetaThompsonBandit),
    Ucb1(Ucb1Bandit),
    LinUcb(LinUcbBandit),
    CtxThompson(ContextualThompsonBandit),
}

impl Policy {
    /// Build a policy for the configured algorithm.
    ///
    /// `Algorithm::Hybrid` is not a single policy; the hybrid router composes
    /// two of these and is constructed separately.
    pub fn from_config(
        algorithm: Algorithm,
        arm_ids: &[String],
        config: &RouterConfig,
    ) -> Result<Self, ConfigError> {
        let dim = config.context_dim();
        match algorithm {
            Algorithm::BetaTs => Ok(Policy::BetaThompson(BetaThompsonBandit::new(
                arm_ids,
                config.success_threshold,
                config.random_seed,
            ))),
            Algorithm::Ucb1 => Ok(Policy::Ucb1(Ucb1Bandit::new(arm_ids, config.ucb1_c))),
            Algorithm::Linucb => Ok(Policy::LinUcb(LinUcbBandit::new(
                arm_ids,
                dim,
                config.linucb_alpha,
                config.lambda_reg,
            ))),
            Algorithm::CtxTs => Ok(Policy::CtxThompson(ContextualThompsonBandit::new(
                arm_ids,
                dim,
                config.ctx_ts_sigma,
                config.lambda_reg,
                config.window_size,
                config.random_seed,
            ))),
            Algorithm::Hybrid => Err(ConfigError::InvalidSetting {
                setting: "algorithm".to_string(),
                reason: "hybrid is composed of two policies, not one".to_string(),
            }),
        }
    }

    /// Select an arm from the eligible set.
    ///
    /// Contextual policies require `context`; non-contextual ones ignore it.
    pub fn select(
        &mut self,
        eligible: &[String],
        context: Option<&Array1<f64>>,
    ) -> Result<Selection, RoutingError> {
        match self {
            Policy::BetaThompson(p) => p.select(eligible),
            Policy::Ucb1(p) => p.select(eligible),
            Policy::LinUcb(p) => {
                let context = context.ok_or(RoutingError::ContextRequired)?;
                p.select(eligible, context)
            }
            Policy::CtxThompson(p) => {
                let context = context.ok_or(RoutingError::ContextRequired)?;
                p.select(eligible, context)
            }
        }
    }

    /// Ingest one observation with its precomputed scalar reward.
    pub fn update(
        &mut self,
        feedback: &BanditFeedback,
        reward: f64,
        context: Option<&Array1<f64>>,
    ) -> Result<(), RoutingError> {
        match self {
            Policy::BetaThompson(p) => p.update(feedback, reward),
            Policy::Ucb1(p) => p.update(feedback, reward),
            Policy::LinUcb(p) => {
                let context = context.ok_or(RoutingError::ContextRequired)?;
                p.update(feedback, reward, context)
            }
            Policy::CtxThompson(p) => {
                let context = context.ok_or(RoutingError::ContextRequired)?;
                p.update(feedback, reward, context)
            }
        }
    }

    /// Serialize posterior state.
    pub fn snapshot(&self) -> BanditSnapshot {
        match self {
            Policy::BetaThompson(p) => p.snapshot(),
            Policy::Ucb1(p) => p.snapshot(),
            Policy::LinUcb(p) => p.snapshot(),
            Policy::CtxThompson(p) => p.snapshot(),
        }
    }

    /// Restore posterior state from a snapshot of the same algorithm.
    pub fn restore(&mut self, snapshot: &BanditSnapshot) -> Result<(), RoutingError> {
        match self {
            Policy::BetaThompson(p) => p.restore(snapshot),
            Policy::Ucb1(p) => p.restore(snapshot),
            Policy::LinUcb(p) => p.restore(snapshot),
            Policy::CtxThompson(p) => p.restore(snapshot),
        }
    }

    /// Diagnostic statistics.
    pub fn stats(&self) -> serde_json::Value {
        match self {
            Policy::BetaThompson(p) => p.stats(),
            Policy::Ucb1(p) => p.stats(),
            Policy::LinUcb(p) => p.stats(),
            Policy::CtxThompson(p) => p.stats(),
        }
    }

    /// Algorithm name used as the persistence key.
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            Policy::BetaThompson(_) => "beta_ts",
            Policy::Ucb1(_) => "ucb1",
            Policy::LinUcb(_) => "linucb",
            Policy::CtxThompson(_) => "ctx_ts",
        }
    }
}
