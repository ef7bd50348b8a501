//! UCB1 (non-contextual).
//!
//! Score: `mean + c * sqrt(ln(N) / n)`. An arm that has never been pulled
//! scores infinity, which forces one exploration of every arm before any
//! exploitation.

use std::collections::BTreeMap;

use serde_json::json;

use crate::error::RoutingError;

use super::snapshot::{BanditSnapshot, Ucb1ArmState};
use super::{BanditFeedback, Selection};

/// Per-arm pull count and reward sum.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ucb1Arm {
    /// Number of pulls.
    pub pulls: u64,
    /// Sum of observed rewards.
    pub total_reward: f64,
}

impl Ucb1Arm {
    /// Mean observed reward; 0.0 before the first pull.
    pub fn mean_reward(&self) -> f64 {
        if self.pulls == 0 {
            0.0
        } else {
            self.total_reward / self.pulls as f64
        }
    }
}

/// UCB1 policy.
#[derive(Debug)]
pub struct Ucb1Bandit {
    arms: BTreeMap<String, Ucb1Arm>,
    c: f64,
}

impl Ucb1Bandit {
    /// Create a policy over the given arms.
    pub fn new(arm_ids: &[String], c: f64) -> Self {
        let arms = arm_ids
            .iter()
            .map(|id| (id.clone(), Ucb1Arm::default()))
            .collect();
        Self { arms, c }
    }

    /// UCB score for one arm given the total pull count.
    fn score(&self, arm: &Ucb1Arm, total_pulls: u64) -> f64 {
        if arm.pulls == 0 {
            return f64::INFINITY;
        }
        let exploration = (total_pulls.max(1) as f64).ln() / arm.pulls as f64;
        arm.mean_reward() + self.c * exploration.sqrt()
    }

    /// Argmax over UCB scores; ties go to the lexicographically smallest id.
    pub fn select(&mut self, eligible: &[String]) -> Result<Selection, RoutingError> {
        if eligible.is_empty() {
            return Err(RoutingError::NoEligibleModels);
        }

        let total_pulls: u64 = self.arms.values().map(|a| a.pulls).sum();

        let mut ordered: Vec<&String> = eligible.iter().collect();
        ordered.sort();

        let mut best: Option<(&String, f64)> = None;
        let mut second_score = f64::NEG_INFINITY;
        for id in ordered {
            let arm = self
                .arms
                .get(id.as_str())
                .ok_or_else(|| RoutingError::UnknownModel(id.clone()))?;
            let score = self.score(arm, total_pulls);
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

    /// Apply one observation.
    pub fn update(&mut self, feedback: &BanditFeedback, reward: f64) -> Result<(), RoutingError> {
        if !reward.is_finite() {
            return Err(RoutingError::UpdateRejected {
                model_id: feedback.model_id.clone(),
                reason: format!("non-finite reward {reward}"),
            });
        }
        let arm = self
            .arms
            .get_mut(&feedback.model_id)
            .ok_or_else(|| RoutingError::UnknownModel(feedback.model_id.clone()))?;
        arm.pulls += 1;
        arm.total_reward += reward;
        Ok(())
    }

    /// Current state for an arm.
    pub fn arm(&self, model_id: &str) -> Option<&Ucb1Arm> {
        self.arms.get(model_id)
    }

    /// All arm ids in lexicographic order.
    pub fn arm_ids(&self) -> Vec<String> {
        self.arms.keys().cloned().collect()
    }

    /// Serialize state.
    pub fn snapshot(&self) -> BanditSnapshot {
        BanditSnapshot::Ucb1 {
            arms: self
                .arms
                .iter()
                .map(|(id, a)| {
                    (
                        id.clone(),
                        Ucb1ArmState {
                            pulls: a.pulls,
                            total_reward: a.total_reward,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Restore state; arms absent from the snapshot stay fresh.
    pub fn restore(&mut self, snapshot: &BanditSnapshot) -> Result<(), RoutingError> {
        let BanditSnapshot::Ucb1 { arms } = snapshot else {
            return Err(RoutingError::UpdateRejected {
                model_id: "*".to_string(),
                reason: format!("snapshot algorithm mismatch: {}", snapshot.algorithm_name()),
            });
        };
        for (id, state) in arms {
            if let Some(arm) = self.arms.get_mut(id) {
                arm.pulls = state.pulls;
                arm.total_reward = state.total_reward;
            }
        }
        Ok(())
    }

    /// Diagnostic statistics.
    pub fn stats(&self) -> serde_json::Value {
        json!({
            "algorithm": "ucb1",
            "exploration_c": self.c,
            "total_pulls": self.arms.values().map(|a| a.pulls).sum::<u64>(),
            "arm_pulls": self.arms.iter()
                .map(|(id, a)| (id.clone(), a.pulls))
                .collect::<BTreeMap<_, _>>(),
            "arm_mean_reward": self.arms.iter()
                .map(|(id, a)| (id.clone(), a.mean_reward()))
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

    fn feedback(model_id: &str) -> BanditFeedback {
        BanditFeedback {
            model_id: model_id.to_string(),
            cost: 0.001,
            quality_score: 0.8,
            latency: 1.0,
        }
    }

    /// Cold start: with all pulls at zero, the first selects walk the arms
    /// in lexicographic order, then the best observed arm wins.
    #[test]
    fn test_cold_start_explores_in_lexicographic_order() {
        let ids = arm_ids(&["b-model", "a-model", "c-model"]);
        let mut bandit = Ucb1Bandit::new(&ids, std::f64::consts::SQRT_2);

        let rewards = [("a-model", 0.3), ("b-model", 0.9), ("c-model", 0.5)];
        let mut seen = Vec::new();
        for _ in 0..3 {
            let s = bandit.select(&ids).expect("non-empty");
            seen.push(s.model_id.clone());
            let reward = rewards
                .iter()
                .find(|(id, _)| *id == s.model_id)
                .expect("known arm")
                .1;
            bandit.update(&feedback(&s.model_id), reward).expect("arm");
        }
        assert_eq!(seen, vec!["a-model", "b-model", "c-model"]);

        // Fourth select exploits the best observed arm.
        let s = bandit.select(&ids).expect("non-empty");
        assert_eq!(s.model_id, "b-model");
    }

    #[test]
    fn test_score_decreases_with_pulls() {
        // Monotone exploration: for a fixed reward sum, more pulls means a
        // strictly lower score.
        let bandit = Ucb1Bandit::new(&arm_ids(&["a"]), 1.5);
        let mut prev = f64::INFINITY;
        for pulls in 1..20u64 {
            let arm = Ucb1Arm {
                pulls,
                total_reward: 3.0,
            };
            let score = bandit.score(&arm, 100);
            assert!(score < prev, "score not decreasing at pulls={pulls}");
            prev = score;
        }
    }

    #[test]
    fn test_unpulled_arm_has_infinite_score() {
        let bandit = Ucb1Bandit::new(&arm_ids(&["a"]), 1.5);
        let arm = Ucb1Arm::default();
        assert_eq!(bandit.score(&arm, 50), f64::INFINITY);
    }

    #[test]
    fn test_select_empty_eligible_errors() {
        let mut bandit = Ucb1Bandit::new(&arm_ids(&["a"]), 1.5);
        assert!(matches!(
            bandit.select(&[]),
            Err(RoutingError::NoEligibleModels)
        ));
    }

    #[test]
    fn test_select_unknown_arm_errors() {
        let mut bandit = Ucb1Bandit::new(&arm_ids(&["a"]), 1.5);
        assert!(matches!(
            bandit.select(&arm_ids(&["zzz"])),
            Err(RoutingError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_single_arm_always_selected() {
        let mut bandit = Ucb1Bandit::new(&arm_ids(&["a", "b"]), 1.5);
        for _ in 0..5 {
            let s = bandit.select(&arm_ids(&["b"])).expect("non-empty");
            assert_eq!(s.model_id, "b");
        }
    }

    #[test]
    fn test_update_accumulates() {
        let mut bandit = Ucb1Bandit::new(&arm_ids(&["a"]), 1.5);
        bandit.update(&feedback("a"), 0.5).expect("arm");
        bandit.update(&feedback("a"), 0.7).expect("arm");
        let arm = bandit.arm("a").expect("arm");
        assert_eq!(arm.pulls, 2);
        assert!((arm.total_reward - 1.2).abs() < 1e-12);
        assert!((arm.mean_reward() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let ids = arm_ids(&["a", "b"]);
        let mut bandit = Ucb1Bandit::new(&ids, 1.5);
        bandit.update(&feedback("a"), 0.9).expect("arm");
        bandit.update(&feedback("b"), 0.1).expect("arm");

        let mut restored = Ucb1Bandit::new(&ids, 1.5);
        restored.restore(&bandit.snapshot()).expect("same algorithm");

        assert_eq!(bandit.arm("a").expect("arm"), restored.arm("a").expect("arm"));
        assert_eq!(
            bandit.select(&ids).expect("arm").model_id,
            restored.select(&ids).expect("arm").model_id
        );
    }

    #[test]
    fn test_restore_rejects_other_algorithm() {
        let mut bandit = Ucb1Bandit::new(&arm_ids(&["a"]), 1.5);
        let other = BanditSnapshot::BetaThompson { arms: vec![] };
        assert!(bandit.restore(&other).is_err());
    }
}
