//! Beta-Bernoulli Thompson sampling (non-contextual).
//!
//! Each arm keeps a `Beta(alpha, beta)` posterior over its success
//! probability, with uniform `Beta(1, 1)` priors. Selection draws one sample
//! per eligible arm and takes the argmax; updates count a reward at or above
//! the success threshold as a Bernoulli success.

use std::collections::BTreeMap;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::Beta;
use serde_json::json;

use crate::error::RoutingError;

use super::snapshot::{BanditSnapshot, BetaArmState};
use super::{seeded_rng, BanditFeedback, Selection};

/// Per-arm Beta posterior and running statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct BetaPosterior {
    /// Successes + 1.
    pub alpha: f64,
    /// Failures + 1.
    pub beta: f64,
    /// Total updates applied to this arm.
    pub pulls: u64,
    /// Total observed cost.
    pub total_cost: f64,
    /// Running mean of observed quality scores.
    pub avg_quality: f64,
}

impl Default for BetaPosterior {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            pulls: 0,
            total_cost: 0.0,
            avg_quality: 0.0,
        }
    }
}

impl BetaPosterior {
    /// Mean of the Beta distribution.
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Variance of the Beta distribution.
    pub fn variance(&self) -> f64 {
        let ab = self.alpha + self.beta;
        (self.alpha * self.beta) / (ab * ab * (ab + 1.0))
    }
}

/// Beta-Bernoulli Thompson sampling policy.
#[derive(Debug)]
pub struct BetaThompsonBandit {
    arms: BTreeMap<String, BetaPosterior>,
    success_threshold: f64,
    rng: ChaCha8Rng,
}

impl BetaThompsonBandit {
    /// Create a policy over the given arms with uniform priors.
    pub fn new(arm_ids: &[String], success_threshold: f64, seed: Option<u64>) -> Self {
        let arms = arm_ids
            .iter()
            .map(|id| (id.clone(), BetaPosterior::default()))
            .collect();
        Self {
            arms,
            success_threshold,
            rng: seeded_rng(seed),
        }
    }

    /// Sample one Beta draw per eligible arm; argmax wins, ties go to the
    /// lexicographically smallest id.
    pub fn select(&mut self, eligible: &[String]) -> Result<Selection, RoutingError> {
        if eligible.is_empty() {
            return Err(RoutingError::NoEligibleModels);
        }

        let mut ordered: Vec<&String> = eligible.iter().collect();
        ordered.sort();

        let mut best: Option<(&String, f64)> = None;
        for id in ordered {
            let posterior = self
                .arms
                .get(id.as_str())
                .ok_or_else(|| RoutingError::UnknownModel(id.clone()))?;
            let dist = Beta::new(posterior.alpha, posterior.beta)
                .expect("alpha and beta stay positive");
            let theta = self.rng.sample(dist);
            if best.map_or(true, |(_, b)| theta > b) {
                best = Some((id, theta));
            }
        }

        let (model_id, _) = best.expect("eligible is non-empty");
        Ok(Selection {
            model_id: model_id.clone(),
            confidence: self.confidence(model_id),
        })
    }

    /// Apply one observation.
    pub fn update(&mut self, feedback: &BanditFeedback, reward: f64) -> Result<(), RoutingError> {
        if !reward.is_finite() {
            return Err(RoutingError::UpdateRejected {
                model_id: feedback.model_id.clone(),
                reason: format!("non-finite reward {reward}"),
            });
        }
        let posterior = self
            .arms
            .get_mut(&feedback.model_id)
            .ok_or_else(|| RoutingError::UnknownModel(feedback.model_id.clone()))?;

        if reward >= self.success_threshold {
            posterior.alpha += 1.0;
        } else {
            posterior.beta += 1.0;
        }
        posterior.pulls += 1;
        posterior.total_cost += feedback.cost;
        // Running mean over all observations for this arm.
        posterior.avg_quality += (feedback.quality_score - posterior.avg_quality)
            / posterior.pulls as f64;
        Ok(())
    }

    /// Posterior confidence: `1 - Var / max_var` across arms.
    ///
    /// Unknown arms report 0.0.
    pub fn confidence(&self, model_id: &str) -> f64 {
        let Some(posterior) = self.arms.get(model_id) else {
            return 0.0;
        };
        let max_var = self
            .arms
            .values()
            .map(BetaPosterior::variance)
            .fold(f64::MIN, f64::max);
        if max_var <= 0.0 {
            return 1.0;
        }
        1.0 - posterior.variance() / max_var
    }

    /// Current posterior for an arm.
    pub fn posterior(&self, model_id: &str) -> Option<&BetaPosterior> {
        self.arms.get(model_id)
    }

    /// Serialize posterior state.
    pub fn snapshot(&self) -> BanditSnapshot {
        BanditSnapshot::BetaThompson {
            arms: self
                .arms
                .iter()
                .map(|(id, p)| {
                    (
                        id.clone(),
                        BetaArmState {
                            alpha: p.alpha,
                            beta: p.beta,
                            pulls: p.pulls,
                            total_cost: p.total_cost,
                            avg_quality: p.avg_quality,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Restore posterior state; arms absent from the snapshot keep priors.
    pub fn restore(&mut self, snapshot: &BanditSnapshot) -> Result<(), RoutingError> {
        let BanditSnapshot::BetaThompson { arms } = snapshot else {
            return Err(RoutingError::UpdateRejected {
                model_id: "*".to_string(),
                reason: format!("snapshot algorithm mismatch: {}", snapshot.algorithm_name()),
            });
        };
        for (id, state) in arms {
            if let Some(posterior) = self.arms.get_mut(id) {
                posterior.alpha = state.alpha;
                posterior.beta = state.beta;
                posterior.pulls = state.pulls;
                posterior.total_cost = state.total_cost;
                posterior.avg_quality = state.avg_quality;
            }
        }
        Ok(())
    }

    /// Diagnostic statistics.
    pub fn stats(&self) -> serde_json::Value {
        json!({
            "algorithm": "beta_ts",
            "success_threshold": self.success_threshold,
            "arm_pulls": self.arms.iter()
                .map(|(id, p)| (id.clone(), p.pulls))
                .collect::<BTreeMap<_, _>>(),
            "arm_mean_success": self.arms.iter()
                .map(|(id, p)| (id.clone(), p.mean()))
                .collect::<BTreeMap<_, _>>(),
            "arm_avg_quality": self.arms.iter()
                .map(|(id, p)| (id.clone(), p.avg_quality))
                .collect::<BTreeMap<_, _>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm_ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn feedback(model_id: &str, quality: f64) -> BanditFeedback {
        BanditFeedback {
            model_id: model_id.to_string(),
            cost: 0.001,
            quality_score: quality,
            latency: 1.0,
        }
    }

    #[test]
    fn test_initializes_with_uniform_priors() {
        let bandit = BetaThompsonBandit::new(&arm_ids(&["a", "b", "c"]), 0.7, Some(42));
        for id in ["a", "b", "c"] {
            let p = bandit.posterior(id).expect("arm exists");
            assert_eq!(p.alpha, 1.0);
            assert_eq!(p.beta, 1.0);
            assert_eq!(p.pulls, 0);
        }
    }

    #[test]
    fn test_select_returns_eligible_arm() {
        let mut bandit = BetaThompsonBandit::new(&arm_ids(&["a", "b", "c"]), 0.7, Some(42));
        let eligible = arm_ids(&["a", "b"]);
        for _ in 0..20 {
            let selection = bandit.select(&eligible).expect("non-empty");
            assert!(eligible.contains(&selection.model_id));
        }
    }

    #[test]
    fn test_select_empty_eligible_errors() {
        let mut bandit = BetaThompsonBandit::new(&arm_ids(&["a"]), 0.7, Some(42));
        assert!(matches!(
            bandit.select(&[]),
            Err(RoutingError::NoEligibleModels)
        ));
    }

    #[test]
    fn test_select_single_arm_always_that_arm() {
        let mut bandit = BetaThompsonBandit::new(&arm_ids(&["a", "b"]), 0.7, Some(1));
        for _ in 0..10 {
            let s = bandit.select(&arm_ids(&["b"])).expect("non-empty");
            assert_eq!(s.model_id, "b");
        }
    }

    #[test]
    fn test_update_success_increments_alpha() {
        let mut bandit = BetaThompsonBandit::new(&arm_ids(&["a"]), 0.7, Some(42));
        bandit.update(&feedback("a", 0.9), 0.85).expect("known arm");
        let p = bandit.posterior("a").expect("arm exists");
        assert_eq!(p.alpha, 2.0);
        assert_eq!(p.beta, 1.0);
        assert_eq!(p.pulls, 1);
    }

    #[test]
    fn test_update_failure_increments_beta() {
        let mut bandit = BetaThompsonBandit::new(&arm_ids(&["a"]), 0.7, Some(42));
        bandit.update(&feedback("a", 0.2), 0.3).expect("known arm");
        let p = bandit.posterior("a").expect("arm exists");
        assert_eq!(p.alpha, 1.0);
        assert_eq!(p.beta, 2.0);
    }

    #[test]
    fn test_update_threshold_boundary_is_success() {
        let mut bandit = BetaThompsonBandit::new(&arm_ids(&["a"]), 0.7, Some(42));
        bandit.update(&feedback("a", 0.7), 0.7).expect("known arm");
        assert_eq!(bandit.posterior("a").expect("arm").alpha, 2.0);
    }

    #[test]
    fn test_update_unknown_arm_errors() {
        let mut bandit = BetaThompsonBandit::new(&arm_ids(&["a"]), 0.7, Some(42));
        assert!(matches!(
            bandit.update(&feedback("zzz", 0.9), 0.9),
            Err(RoutingError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_parameters_stay_positive() {
        let mut bandit = BetaThompsonBandit::new(&arm_ids(&["a"]), 0.7, Some(42));
        for i in 0..200 {
            let reward = if i % 3 == 0 { 0.9 } else { 0.1 };
            bandit.update(&feedback("a", reward), reward).expect("known arm");
            let p = bandit.posterior("a").expect("arm");
            assert!(p.alpha > 0.0);
            assert!(p.beta > 0.0);
        }
    }

    #[test]
    fn test_avg_quality_is_running_mean() {
        let mut bandit = BetaThompsonBandit::new(&arm_ids(&["a"]), 0.7, Some(42));
        bandit.update(&feedback("a", 1.0), 0.9).expect("known arm");
        bandit.update(&feedback("a", 0.0), 0.1).expect("known arm");
        let p = bandit.posterior("a").expect("arm");
        assert!((p.avg_quality - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_grows_with_data() {
        let mut bandit = BetaThompsonBandit::new(&arm_ids(&["a", "b"]), 0.7, Some(42));
        let initial = bandit.confidence("a");
        for _ in 0..100 {
            bandit.update(&feedback("a", 0.9), 0.9).expect("known arm");
        }
        assert!(bandit.confidence("a") > initial);
        assert_eq!(bandit.confidence("unknown"), 0.0);
    }

    #[test]
    fn test_converges_to_better_arm() {
        let mut bandit = BetaThompsonBandit::new(&arm_ids(&["good", "bad"]), 0.7, Some(42));
        for _ in 0..100 {
            bandit.update(&feedback("good", 0.95), 0.95).expect("arm");
            bandit.update(&feedback("bad", 0.1), 0.1).expect("arm");
        }
        let eligible = arm_ids(&["bad", "good"]);
        let good_picks = (0..100)
            .filter(|_| bandit.select(&eligible).expect("arm").model_id == "good")
            .count();
        assert!(good_picks > 90, "good arm picked only {good_picks}/100");
    }

    #[test]
    fn test_seeded_determinism() {
        let make = || {
            let mut b = BetaThompsonBandit::new(&arm_ids(&["a", "b", "c"]), 0.7, Some(7));
            b.update(&feedback("a", 0.9), 0.9).expect("arm");
            b.update(&feedback("b", 0.4), 0.4).expect("arm");
            b
        };
        let mut b1 = make();
        let mut b2 = make();
        let eligible = arm_ids(&["a", "b", "c"]);
        for _ in 0..20 {
            assert_eq!(
                b1.select(&eligible).expect("arm").model_id,
                b2.select(&eligible).expect("arm").model_id
            );
        }
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut bandit = BetaThompsonBandit::new(&arm_ids(&["a", "b"]), 0.7, Some(9));
        bandit.update(&feedback("a", 0.9), 0.9).expect("arm");
        bandit.update(&feedback("b", 0.2), 0.2).expect("arm");
        let snapshot = bandit.snapshot();

        let mut restored = BetaThompsonBandit::new(&arm_ids(&["a", "b"]), 0.7, Some(9));
        restored.restore(&snapshot).expect("matching algorithm");

        assert_eq!(
            bandit.posterior("a").expect("arm"),
            restored.posterior("a").expect("arm")
        );
        let eligible = arm_ids(&["a", "b"]);
        assert_eq!(
            bandit.select(&eligible).expect("arm").model_id,
            restored.select(&eligible).expect("arm").model_id
        );
    }
}
