//! Contextual Thompson sampling over Bayesian linear regression.
//!
//! Shares LinUCB's per-arm `(A, b)` state but selects by sampling from the
//! posterior `theta ~ N(mu, sigma^2 * A^{-1})` instead of adding a
//! deterministic confidence bound. An optional sliding window bounds memory
//! and adapts to drift: only the last W observations back the posterior.

use std::collections::{BTreeMap, VecDeque};

use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde_json::json;

use crate::error::RoutingError;

use super::linalg;
use super::snapshot::{BanditSnapshot, LinearArmState, WindowEntry};
use super::{seeded_rng, BanditFeedback, Selection};

/// Per-arm posterior state with an optional observation window.
#[derive(Debug, Clone)]
pub struct WindowedLinearArm {
    /// Gram matrix, `dim x dim`, symmetric positive-definite.
    pub a: Array2<f64>,
    /// Reward-weighted context sum.
    pub b: Array1<f64>,
    /// Number of updates applied (lifetime, not window-bounded).
    pub pulls: u64,
    /// Recent observations backing the posterior, oldest first.
    pub window: VecDeque<(Array1<f64>, f64)>,
}

impl WindowedLinearArm {
    fn new(dim: usize, lambda: f64) -> Self {
        Self {
            a: linalg::scaled_identity(dim, lambda),
            b: Array1::zeros(dim),
            pulls: 0,
            window: VecDeque::new(),
        }
    }
}

/// Contextual Thompson sampling policy.
#[derive(Debug)]
pub struct ContextualThompsonBandit {
    arms: BTreeMap<String, WindowedLinearArm>,
    dim: usize,
    sigma: f64,
    lambda: f64,
    window_size: Option<usize>,
    rng: ChaCha8Rng,
}

impl ContextualThompsonBandit {
    /// Create a policy over the given arms for `dim`-dimensional contexts.
    pub fn new(
        arm_ids: &[String],
        dim: usize,
        sigma: f64,
        lambda: f64,
        window_size: Option<usize>,
        seed: Option<u64>,
    ) -> Self {
        let arms = arm_ids
            .iter()
            .map(|id| (id.clone(), WindowedLinearArm::new(dim, lambda)))
            .collect();
        Self {
            arms,
            dim,
            sigma,
            lambda,
            window_size,
            rng: seeded_rng(seed),
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

    /// Sample `theta ~ N(mu, sigma^2 A^{-1})` and score `theta . x`.
    ///
    /// With `A = L L^T`: `mu` comes from two triangular solves, and the
    /// posterior draw is `mu + sigma * L^{-T} z` for standard normal `z`.
    fn sample_score(
        &mut self,
        model_id: &str,
        context: &Array1<f64>,
    ) -> Result<f64, RoutingError> {
        let arm = self
            .arms
            .get(model_id)
            .ok_or_else(|| RoutingError::UnknownModel(model_id.to_string()))?;

        let l = linalg::cholesky_jittered(&arm.a).ok_or_else(|| {
            RoutingError::UpdateRejected {
                model_id: model_id.to_string(),
                reason: "Gram matrix is not positive-definite".to_string(),
            }
        })?;

        let y = linalg::solve_lower(&l, &arm.b);
        let mu = linalg::solve_lower_transpose(&l, &y);

        let z: Array1<f64> =
            Array1::from_iter((0..self.dim).map(|_| self.rng.sample::<f64, _>(StandardNormal)));
        let shift = linalg::solve_lower_transpose(&l, &z);

        let theta = &mu + &(shift * self.sigma);
        Ok(theta.dot(context))
    }

    /// Argmax over sampled scores; ties go to the lexicographically
    /// smallest id.
    pub fn select(
        &mut self,
        eligible: &[String],
        context: &Array1<f64>,
    ) -> Result<Selection, RoutingError> {
        if eligible.is_empty() {
            return Err(RoutingError::NoEligibleModels);
        }
        self.check_context(context)?;

        let mut ordered: Vec<String> = eligible.to_vec();
        ordered.sort();

        let mut best: Option<(String, f64)> = None;
        let mut second_score = f64::NEG_INFINITY;
        for id in ordered {
            let score = self.sample_score(&id, context)?;
            match &best {
                Some((_, b)) if score > *b => {
                    second_score = *b;
                    best = Some((id, score));
                }
                Some(_) => second_score = second_score.max(score),
                None => best = Some((id, score)),
            }
        }

        let (model_id, best_score) = best.expect("eligible is non-empty");
        let confidence = super::margin_confidence(best_score, second_score, eligible.len());
        Ok(Selection {
            model_id,
            confidence,
        })
    }

    /// Apply one observation, sliding the window if it is full.
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

        let lambda = self.lambda;
        let dim = self.dim;
        let window_size = self.window_size;
        let arm = self
            .arms
            .get_mut(&feedback.model_id)
            .ok_or_else(|| RoutingError::UnknownModel(feedback.model_id.clone()))?;

        arm.window.push_back((context.clone(), reward));
        let popped = match window_size {
            Some(w) if arm.window.len() > w => arm.window.pop_front(),
            _ => None,
        };

        let (a, b) = if popped.is_some() {
            // The window slid: rebuild the posterior from the survivors.
            let mut a = linalg::scaled_identity(dim, lambda);
            let mut b = Array1::<f64>::zeros(dim);
            for (x, r) in &arm.window {
                linalg::rank_one_update(&mut a, x);
                b = &b + &(x * *r);
            }
            (a, b)
        } else {
            let mut a = arm.a.clone();
            linalg::rank_one_update(&mut a, context);
            (a, &arm.b + &(context * reward))
        };

        if linalg::cholesky_jittered(&a).is_none() {
            // Roll the window back so rejection leaves state untouched.
            arm.window.pop_back();
            if let Some(front) = popped {
                arm.window.push_front(front);
            }
            tracing::warn!(
                model_id = %feedback.model_id,
                "rejecting bandit update: posterior Gram matrix would fail to factor"
            );
            return Err(RoutingError::UpdateRejected {
                model_id: feedback.model_id.clone(),
                reason: "update would break positive-definiteness".to_string(),
            });
        }

        arm.a = a;
        arm.b = b;
        arm.pulls += 1;
        Ok(())
    }

    /// Current state for an arm.
    pub fn arm(&self, model_id: &str) -> Option<&WindowedLinearArm> {
        self.arms.get(model_id)
    }

    /// Serialize state including window contents.
    pub fn snapshot(&self) -> BanditSnapshot {
        BanditSnapshot::CtxThompson {
            dim: self.dim as u32,
            arms: self
                .arms
                .iter()
                .map(|(id, arm)| {
                    let window = arm
                        .window
                        .iter()
                        .map(|(x, r)| WindowEntry {
                            context: x.to_vec(),
                            reward: *r,
                        })
                        .collect();
                    (
                        id.clone(),
                        LinearArmState::from_arm(&arm.a, &arm.b, arm.pulls),
                        window,
                    )
                })
                .collect(),
        }
    }

    /// Restore state; arms absent from the snapshot keep their priors.
    pub fn restore(&mut self, snapshot: &BanditSnapshot) -> Result<(), RoutingError> {
        let BanditSnapshot::CtxThompson { dim, arms } = snapshot else {
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
        for (id, state, window) in arms {
            if let Some(arm) = self.arms.get_mut(id) {
                let (a, b) = state.to_matrices(self.dim);
                arm.a = a;
                arm.b = b;
                arm.pulls = state.pulls;
                arm.window = window
                    .iter()
                    .map(|e| (Array1::from_vec(e.context.clone()), e.reward))
                    .collect();
            }
        }
        Ok(())
    }

    /// Diagnostic statistics.
    pub fn stats(&self) -> serde_json::Value {
        json!({
            "algorithm": "ctx_ts",
            "dim": self.dim,
            "sigma": self.sigma,
            "lambda": self.lambda,
            "window_size": self.window_size,
            "arm_pulls": self.arms.iter()
                .map(|(id, a)| (id.clone(), a.pulls))
                .collect::<BTreeMap<_, _>>(),
            "arm_window_len": self.arms.iter()
                .map(|(id, a)| (id.clone(), a.window.len()))
                .collect::<BTreeMap<_, _>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIM: usize = 5;

    fn arm_ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn feedback(model_id: &str) -> BanditFeedback {
        BanditFeedback {
            model_id: model_id.to_string(),
            cost: 0.001,
            quality_score: 0.8,
            latency: 1.0,
        }
    }

    fn unit_context(axis: usize) -> Array1<f64> {
        let mut v = Array1::zeros(DIM);
        v[axis] = 1.0;
        v
    }

    fn new_bandit(ids: &[&str], window: Option<usize>, seed: u64) -> ContextualThompsonBandit {
        ContextualThompsonBandit::new(&arm_ids(ids), DIM, 1.0, 1.0, window, Some(seed))
    }

    #[test]
    fn test_select_empty_eligible_errors() {
        let mut bandit = new_bandit(&["a"], None, 42);
        assert!(matches!(
            bandit.select(&[], &unit_context(0)),
            Err(RoutingError::NoEligibleModels)
        ));
    }

    #[test]
    fn test_select_returns_eligible_arm() {
        let mut bandit = new_bandit(&["a", "b", "c"], None, 42);
        let eligible = arm_ids(&["a", "c"]);
        for _ in 0..20 {
            let s = bandit.select(&eligible, &unit_context(1)).expect("arm");
            assert!(eligible.contains(&s.model_id));
        }
    }

    #[test]
    fn test_learns_context_dependent_preference() {
        let mut bandit = new_bandit(&["x-arm", "y-arm"], None, 42);

        for _ in 0..50 {
            bandit
                .update(&feedback("x-arm"), 0.95, &unit_context(0))
                .expect("update");
            bandit
                .update(&feedback("x-arm"), 0.05, &unit_context(1))
                .expect("update");
            bandit
                .update(&feedback("y-arm"), 0.05, &unit_context(0))
                .expect("update");
            bandit
                .update(&feedback("y-arm"), 0.95, &unit_context(1))
                .expect("update");
        }

        let eligible = arm_ids(&["x-arm", "y-arm"]);
        let x_wins = (0..50)
            .filter(|_| {
                bandit
                    .select(&eligible, &unit_context(0))
                    .expect("arm")
                    .model_id
                    == "x-arm"
            })
            .count();
        assert!(x_wins > 40, "x-arm won only {x_wins}/50 on its axis");
    }

    #[test]
    fn test_window_slides_and_bounds_memory() {
        let mut bandit = new_bandit(&["a"], Some(5), 42);
        for i in 0..12 {
            bandit
                .update(&feedback("a"), 0.5, &unit_context(i % DIM))
                .expect("update");
        }
        let arm = bandit.arm("a").expect("arm");
        assert_eq!(arm.window.len(), 5);
        assert_eq!(arm.pulls, 12);
        // The rebuilt Gram matrix reflects only the window: lambda * I plus
        // five rank-one unit updates has trace DIM + 5.
        let trace: f64 = (0..DIM).map(|i| arm.a[[i, i]]).sum();
        assert!((trace - (DIM as f64 + 5.0)).abs() < 1e-9);
    }

    #[test]
    fn test_windowed_posterior_forgets_old_regime() {
        let mut bandit = new_bandit(&["a", "b"], Some(10), 42);
        let eligible = arm_ids(&["a", "b"]);

        // Old regime: arm a good on axis 0.
        for _ in 0..10 {
            bandit.update(&feedback("a"), 0.9, &unit_context(0)).expect("update");
            bandit.update(&feedback("b"), 0.1, &unit_context(0)).expect("update");
        }
        // Drift: arm a turns bad, b turns good; window slides the past out.
        for _ in 0..10 {
            bandit.update(&feedback("a"), 0.1, &unit_context(0)).expect("update");
            bandit.update(&feedback("b"), 0.9, &unit_context(0)).expect("update");
        }

        let b_wins = (0..50)
            .filter(|_| {
                bandit
                    .select(&eligible, &unit_context(0))
                    .expect("arm")
                    .model_id
                    == "b"
            })
            .count();
        assert!(b_wins > 35, "b won only {b_wins}/50 after drift");
    }

    #[test]
    fn test_seeded_determinism() {
        let build = |seed| {
            let mut b = new_bandit(&["a", "b", "c"], Some(100), seed);
            b.update(&feedback("a"), 0.9, &unit_context(0)).expect("update");
            b.update(&feedback("b"), 0.3, &unit_context(1)).expect("update");
            b
        };
        let mut b1 = build(7);
        let mut b2 = build(7);
        let eligible = arm_ids(&["a", "b", "c"]);
        for axis in 0..DIM {
            assert_eq!(
                b1.select(&eligible, &unit_context(axis)).expect("arm").model_id,
                b2.select(&eligible, &unit_context(axis)).expect("arm").model_id
            );
        }
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let ids = arm_ids(&["a", "b"]);
        let mut bandit = new_bandit(&["a", "b"], Some(8), 11);
        for i in 0..10 {
            let id = if i % 2 == 0 { "a" } else { "b" };
            bandit
                .update(&feedback(id), 0.1 * i as f64 % 1.0, &unit_context(i % DIM))
                .expect("update");
        }

        let mut restored = new_bandit(&["a", "b"], Some(8), 11);
        restored.restore(&bandit.snapshot()).expect("same algorithm");

        let orig_arm = bandit.arm("a").expect("arm");
        let rest_arm = restored.arm("a").expect("arm");
        assert_eq!(orig_arm.a, rest_arm.a);
        assert_eq!(orig_arm.b, rest_arm.b);
        assert_eq!(orig_arm.window.len(), rest_arm.window.len());

        // Fresh RNGs with the same seed: selections must agree.
        for axis in 0..DIM {
            assert_eq!(
                bandit.select(&ids, &unit_context(axis)).expect("arm").model_id,
                restored.select(&ids, &unit_context(axis)).expect("arm").model_id
            );
        }
    }

    #[test]
    fn test_update_rejects_non_finite() {
        let mut bandit = new_bandit(&["a"], None, 42);
        assert!(bandit
            .update(&feedback("a"), f64::INFINITY, &unit_context(0))
            .is_err());
    }
}
