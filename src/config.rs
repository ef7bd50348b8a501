//! Router configuration.
//!
//! Configuration is passed explicitly into the composition root; there is no
//! ambient settings object. Validation failures here are fatal: a router is
//! never constructed from an invalid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bandit::RewardWeights;
use crate::error::ConfigError;

/// Bandit algorithm driving model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Beta-Bernoulli Thompson sampling (non-contextual).
    BetaTs,
    /// UCB1 (non-contextual).
    Ucb1,
    /// LinUCB (contextual, deterministic).
    Linucb,
    /// Contextual Thompson sampling (Bayesian linear regression).
    CtxTs,
    /// UCB1 phase followed by LinUCB with knowledge transfer.
    #[default]
    Hybrid,
}

/// Configuration for a [`crate::Router`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Selection algorithm.
    pub algorithm: Algorithm,
    /// Queries served before the hybrid router enters its contextual phase.
    pub switch_threshold: u64,
    /// UCB1 exploration constant.
    pub ucb1_c: f64,
    /// LinUCB exploration multiplier.
    pub linucb_alpha: f64,
    /// Posterior noise scale for contextual Thompson sampling.
    pub ctx_ts_sigma: f64,
    /// Ridge regularization for contextual policies.
    pub lambda_reg: f64,
    /// Weights blending quality, cost and latency into a scalar reward.
    pub reward_weights: RewardWeights,
    /// Reward cutoff counting as a Bernoulli success for Beta-TS.
    pub success_threshold: f64,
    /// Sliding window for contextual Thompson sampling (`None` = unbounded).
    pub window_size: Option<usize>,
    /// Cap on fallback chain length.
    pub max_fallbacks: usize,
    /// Persist bandit state every K updates.
    pub persist_every_k: u64,
    /// Seed for reproducible sampling; `None` draws from OS entropy.
    pub random_seed: Option<u64>,
    /// Embedding dimension produced by the analyzer.
    pub embedding_dim: usize,
    /// Per-arm timeout for an external LLM call.
    pub call_timeout: Duration,
    /// Latency ceiling used to normalize latency into reward (seconds).
    pub latency_ceiling: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Hybrid,
            switch_threshold: 2000,
            ucb1_c: std::f64::consts::SQRT_2,
            linucb_alpha: 1.0,
            ctx_ts_sigma: 1.0,
            lambda_reg: 1.0,
            reward_weights: RewardWeights::default(),
            success_threshold: 0.7,
            window_size: Some(1000),
            max_fallbacks: 3,
            persist_every_k: 1,
            random_seed: None,
            embedding_dim: 384,
            call_timeout: Duration::from_secs(30),
            latency_ceiling: 10.0,
        }
    }
}

impl RouterConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the selection algorithm.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the hybrid switch threshold.
    pub fn with_switch_threshold(mut self, threshold: u64) -> Self {
        self.switch_threshold = threshold;
        self
    }

    /// Set reward weights.
    pub fn with_reward_weights(mut self, weights: RewardWeights) -> Self {
        self.reward_weights = weights;
        self
    }

    /// Set the Beta-TS success threshold.
    pub fn with_success_threshold(mut self, threshold: f64) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the fallback chain cap.
    pub fn with_max_fallbacks(mut self, max_fallbacks: usize) -> Self {
        self.max_fallbacks = max_fallbacks;
        self
    }

    /// Set the persistence batch size.
    pub fn with_persist_every_k(mut self, k: u64) -> Self {
        self.persist_every_k = k;
        self
    }

    /// Set the random seed for deterministic sampling.
    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    /// Set the embedding dimension.
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    /// Set the per-arm call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Full context dimension fed to contextual policies.
    pub fn context_dim(&self) -> usize {
        self.embedding_dim + 3
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for any out-of-range setting; these are fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reward_weights.validate()?;

        if self.embedding_dim == 0 {
            return Err(ConfigError::InvalidSetting {
                setting: "embedding_dim".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.success_threshold) {
            return Err(ConfigError::InvalidSetting {
                setting: "success_threshold".to_string(),
                reason: format!("must be in [0, 1], got {}", self.success_threshold),
            });
        }
        if self.lambda_reg <= 0.0 {
            return Err(ConfigError::InvalidSetting {
                setting: "lambda_reg".to_string(),
                reason: format!("must be positive, got {}", self.lambda_reg),
            });
        }
        if self.ctx_ts_sigma <= 0.0 {
            return Err(ConfigError::InvalidSetting {
                setting: "ctx_ts_sigma".to_string(),
                reason: format!("must be positive, got {}", self.ctx_ts_sigma),
            });
        }
        if self.ucb1_c < 0.0 {
            return Err(ConfigError::InvalidSetting {
                setting: "ucb1_c".to_string(),
                reason: format!("must be non-negative, got {}", self.ucb1_c),
            });
        }
        if self.linucb_alpha < 0.0 {
            return Err(ConfigError::InvalidSetting {
                setting: "linucb_alpha".to_string(),
                reason: format!("must be non-negative, got {}", self.linucb_alpha),
            });
        }
        if self.persist_every_k == 0 {
            return Err(ConfigError::InvalidSetting {
                setting: "persist_every_k".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.latency_ceiling <= 0.0 {
            return Err(ConfigError::InvalidSetting {
                setting: "latency_ceiling".to_string(),
                reason: format!("must be positive, got {}", self.latency_ceiling),
            });
        }
        if let Some(w) = self.window_size {
            if w == 0 {
                return Err(ConfigError::InvalidSetting {
                    setting: "window_size".to_string(),
                    reason: "must be at least 1 when set".to_string(),
                });
            }
        }
        Ok(())
    }
}
