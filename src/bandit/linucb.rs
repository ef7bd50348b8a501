//! LinUCB (contextual, deterministic).
//!
//! Per arm: Gram matrix `A = lambda * I + sum(x x^T)` and reward vector
//! `b = sum(r x)`. Selection scores `theta^T x + alpha * sqrt(x^T A^{-1} x)`
//! with `theta = A^{-1} b` from a Cholesky solve. `A` must remain symmetric
//! positive-definite after every update; updates that would break that are
//! rejected, never silently corrected.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use serde_json::json;

use crate::error::RoutingError;

use super::linalg;
use super::snapshot::{BanditSnapshot, LinearArmState};
use super::{BanditFeedback, Selection};

/// Per-arm linear model state.
#[derive(Debug, Clone)]
pub struct LinearArm {
    /// Gram matrix, `dim x dim`, symmetric positive-definite.
    pub a: Array2<f64>,
    /// Reward-weighted context sum.
    pub b: Array1<f64>,
    /// Number of updates applied.
    pub pulls: u64,
}

impl LinearArm {
    fn new(dim: usize, lambda: f64) -> Self {
        Self {
            a: linalg::scaled_identity(dim, lambda),
            b: Array1::zeros(dim),
            pulls: 0,
        }
    }

    /// Posterior mean `theta = A^{-1} b`.
    pub fn theta(&self) -> Option<Array1<f64>> {
        linalg::spd_solve(&self.a, &self.b)
    }
}

/// LinUCB policy.
#[derive(Debug)]
pub struct LinUcbBandit {
    arms: BTreeMap<String, LinearArm>,
    dim: usize,
    alpha: f64,
    lambda: f64,
}

impl LinUcbBandit {
    /// Create a policy over the given arms for `dim`-dimensional contexts.
    pub fn new(arm_ids: &[String], dim: usize, alpha: f64, lambda: f64) -> Self {
        let arms = arm_ids
            .iter()
            .map(|id| (id.clone(), LinearArm::new(dim, lambda)))
            .collect();
        Self {
            arms,
            dim,
            alpha,
            lambda,
        }
    }

    /// Context dimension this policy expects.
    pub fn dim(&self) -> usize {
        self.dim
    }

    fn check_context(&self, context: &Array1<f64>) -> Result<(), RoutingError> {
        if context.len() != self.dim {
            return Err(RoutingError::FeatureDimension {
                expected: self.dim,
                actual: context.len(),
            });
        }
        Ok(())
    }

    /// UCB score for one arm.
    fn score(&self, arm: &LinearArm, context: &Array1<f64>) -> Option<f64> {
        let theta = arm.theta()?;
        let uncertainty = linalg::inverse_quadratic_form(&arm.a, context)?;
        Some(theta.dot(context) + self.alpha * uncertainty.sqrt())
    }

    /// Argmax over UCB scores; ties go to the lexicographically smallest id.
    pub fn select(
        &mut self,
        eligible: &[String],
        context: &Array1<f64>,
    ) -> Result<Selection, RoutingError> {
        if eligible.is_empty() {
            return Err(RoutingError::NoEligibleModels);
        }
        self.check_context(context)?;

        let mut ordered: Vec<&String> = eligible.iter().collect();
        ordered.sort();

        let mut best: Option<(&String, f64)> = None;
        let mut second_score = f64::NEG_INFINITY;
        for id in ordered {
            let arm = self
                .arms
                .get(id.as_str())
                .ok_or_else(|| RoutingError::UnknownModel(id.clone()))?;
            let score = self.score(arm, context).ok_or_else(|| {
                RoutingError::UpdateRejected {
                    model_id: id.clone(),
                    reason: "Gram matrix is not positive-definite".to_string(),
                }
            })?;
            match best {
                Some((_, b)) if score > b => {
                    second_score = b;
                    best = Some((id, score));
                }
                Some(_) => second_score = second_score.max(score),
                None => best = Some((id, score)),
            }
        }

        let (model_id, best_score) = best.expect("eligible is non-empty");
        Ok(Selection {
            model_id: model_id.clone(),
            confidence: super::margin_confidence(best_score, second_score, eligible.len()),
        })
    }

    /// Apply one observation: `A += x x^T`, `b += r x`.
    ///
    /// Rejects non-finite rewards or contexts and any update after which `A`
    /// fails to factor, logging a diagnostic and leaving state untouched.
    pub fn update(
        &mut self,
        feedback: &BanditFeedback,
        reward: f64,
        context: &Array1<f64>,
    ) -> Result<(), RoutingError> {
        self.check_context(context)?;
        if !reward.is_finite() || context.iter().any(|x| !x.is_finite()) {
            tracing::warn!(
                model_id = %feedback.model_id,
                reward = reward,
                "rejecting bandit update with non-finite inputs"
            );
            return Err(RoutingError::UpdateRejected {
                model_id: feedback.model_id.clone(),
                reason: "non-finite reward or context".to_string(),
            });
        }

        let arm = self
            .arms
            .get_mut(&feedback.model_id)
            .ok_or_else(|| RoutingError::UnknownModel(feedback.model_id.clone()))?;

        let mut a = arm.a.clone();
        linalg::rank_one_update(&mut a, context);
        if linalg::cholesky_jittered(&a).is_none() {
            tracing::warn!(
                model_id = %feedback.model_id,
                "rejecting bandit update: Gram matrix would lose positive-definiteness"
            );
            return Err(RoutingError::UpdateRejected {
                model_id: feedback.model_id.clone(),
                reason: "update would break positive-definiteness".to_string(),
            });
        }

        arm.a = a;
        arm.b = &arm.b + &(context * reward);
        arm.pulls += 1;
        Ok(())
    }

    /// Current state for an arm.
    pub fn arm(&self, model_id: &str) -> Option<&LinearArm> {
        self.arms.get(model_id)
    }

    /// Serialize state (lower-triangular `A` plus `b`, f64).
    pub fn snapshot(&self) -> BanditSnapshot {
        BanditSnapshot::LinUcb {
            dim: self.dim as u32,
            arms: self
                .arms
                .iter()
                .map(|(id, arm)| (id.clone(), LinearArmState::from_arm(&arm.a, &arm.b, arm.pulls)))
                .collect(),
        }
    }

    /// Restore state; arms absent from the snapshot keep their priors.
    pub fn restore(&mut self, snapshot: &BanditSnapshot) -> Result<(), RoutingError> {
        let BanditSnapshot::LinUcb { dim, arms } = snapshot else {
            return Err(RoutingError::UpdateRejected {
                model_id: "*".to_string(),
                reason: format!("snapshot algorithm mismatch: {}", snapshot.algorithm_name()),
            });
        };
        if *dim as usize != self.dim {
            return Err(RoutingError::FeatureDimension {
                expected: self.dim,
                actual: *dim as usize,
            });
        }
        for (id, state) in arms {
            if let Some(arm) = self.arms.get_mut(id) {
                let (a, b) = state.to_matrices(self.dim);
                arm.a = a;
                arm.b = b;
                arm.pulls = state.pulls;
            }
        }
        Ok(())
    }

    /// Diagnostic statistics.
    pub fn stats(&self) -> serde_json::Value {
        json!({
            "algorithm": "linucb",
            "dim": self.dim,
            "alpha": self.alpha,
            "lambda": self.lambda,
            "arm_pulls": self.arms.iter()
                .map(|(id, a)| (id.clone(), a.pulls))
                .collect::<BTreeMap<_, _>>(),
            "arm_theta_norms": self.arms.iter()
                .map(|(id, a)| {
                    let norm = a
                        .theta()
                        .map(|t| t.dot(&t).sqrt())
                        .unwrap_or(f64::NAN);
                    (id.clone(), norm)
                })
                .collect::<BTreeMap<_, _>>(),
        })
    }
}
