//! Reward computation: feedback in, scalar reward in [0, 1] out.
//!
//! The reward blends quality, cost and latency:
//!
//! `r = w_q * quality + w_c * (1 - cost_norm) + w_l * (1 - latency_norm)`
//!
//! Cost is normalized by a rolling per-arm maximum; latency by a fixed
//! ceiling. A failed execution contributes quality 0 and cost 0.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::BanditFeedback;

/// Tolerance for the weights-sum-to-one invariant.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Weights blending quality, cost and latency into a scalar reward.
///
/// The three weights must sum to exactly 1.0 (within 1e-9); construction via
/// [`RewardWeights::new`] and [`RewardWeights::validate`] enforce this.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    /// Weight on the quality score.
    pub quality: f64,
    /// Weight on (1 - normalized cost).
    pub cost: f64,
    /// Weight on (1 - normalized latency).
    pub latency: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            quality: 0.5,
            cost: 0.3,
            latency: 0.2,
        }
    }
}

impl RewardWeights {
    /// Create validated weights.
    pub fn new(quality: f64, cost: f64, latency: f64) -> Result<Self, ConfigError> {
        let weights = Self {
            quality,
            cost,
            latency,
        };
        weights.validate()?;
        Ok(weights)
    }

    /// Check the sum-to-one invariant and individual ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sum = self.quality + self.cost + self.latency;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::RewardWeightSum(sum));
        }
        for (name, w) in [
            ("quality", self.quality),
            ("cost", self.cost),
            ("latency", self.latency),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(ConfigError::InvalidSetting {
                    setting: format!("reward_weights.{name}"),
                    reason: format!("must be in [0, 1], got {w}"),
                });
            }
        }
        Ok(())
    }
}

/// Turns execution feedback into scalar rewards.
///
/// Keeps a rolling per-arm maximum cost so the cost term compares an
/// observation against the most expensive call that arm has served.
#[derive(Debug)]
pub struct RewardCalculator {
    weights: RewardWeights,
    latency_ceiling: f64,
    max_cost_by_arm: HashMap<String, f64>,
}

impl RewardCalculator {
    /// Create a calculator. `latency_ceiling` is in seconds.
    pub fn new(weights: RewardWeights, latency_ceiling: f64) -> Self {
        Self {
            weights,
            latency_ceiling,
            max_cost_by_arm: HashMap::new(),
        }
    }

    /// Compute the reward for one observation, updating the rolling cost
    /// maximum for the arm.
    pub fn reward(&mut self, feedback: &BanditFeedback) -> f64 {
        let max_cost = self
            .max_cost_by_arm
            .entry(feedback.model_id.clone())
            .or_insert(0.0);
        if feedback.cost > *max_cost {
            *max_cost = feedback.cost;
        }

        let cost_norm = if *max_cost > 0.0 {
            (feedback.cost / *max_cost).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let latency_norm = (feedback.latency / self.latency_ceiling).clamp(0.0, 1.0);

        let r = self.weights.quality * feedback.quality_score
            + self.weights.cost * (1.0 - cost_norm)
            + self.weights.latency * (1.0 - latency_norm);
        r.clamp(0.0, 1.0)
    }

    /// The configured weights.
    pub fn weights(&self) -> RewardWeights {
        self.weights
    }
}
