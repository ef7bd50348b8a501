//! Hybrid router: UCB1 cold start, LinUCB steady state.
//!
//! Phase 1 explores with UCB1, which needs no features and converges fast.
//! Once `switch_threshold` queries have been served, the first subsequent
//! select performs knowledge transfer — phase-1 reward statistics are
//! replayed into LinUCB as pseudo-observations of the mean context — and the
//! router runs contextually from then on.
//!
//! Selects and updates are phase-tagged: a decision made in phase 1 whose
//! feedback arrives after the transition still updates the phase-1 policy.

use chrono::{DateTime, Utc};
use ndarray::Array1;
use serde_json::json;

use crate::bandit::snapshot::{Reader, SnapshotError, Writer, TAG_HYBRID};
use crate::bandit::{BanditFeedback, BanditSnapshot, LinUcbBandit, Selection, Ucb1Bandit};
use crate::config::RouterConfig;
use crate::error::RoutingError;
use crate::models::RouterPhase;

/// Cap on pseudo-observations replayed per arm during knowledge transfer.
const TRANSFER_K_MAX: u64 = 100;

/// Hybrid payload format version.
const HYBRID_FORMAT_VERSION: u8 = 1;

/// Two-phase router composing UCB1 and LinUCB by value.
#[derive(Debug)]
pub struct HybridRouter {
    phase1: Ucb1Bandit,
    phase2: LinUcbBandit,
    phase: RouterPhase,
    query_count: u64,
    switch_threshold: u64,
    transition_time: Option<DateTime<Utc>>,
    /// Running sum of context vectors observed during phase 1.
    context_sum: Array1<f64>,
    context_count: u64,
}

impl HybridRouter {
    /// Build a hybrid router over the given arms.
    pub fn new(arm_ids: &[String], config: &RouterConfig) -> Self {
        let dim = config.context_dim();
        Self {
            phase1: Ucb1Bandit::new(arm_ids, config.ucb1_c),
            phase2: LinUcbBandit::new(arm_ids, dim, config.linucb_alpha, config.lambda_reg),
            phase: RouterPhase::Explore,
            query_count: 0,
            switch_threshold: config.switch_threshold,
            transition_time: None,
            context_sum: Array1::zeros(dim),
            context_count: 0,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> RouterPhase {
        self.phase
    }

    /// Queries served so far.
    pub fn query_count(&self) -> u64 {
        self.query_count
    }

    /// Configured switch threshold.
    pub fn switch_threshold(&self) -> u64 {
        self.switch_threshold
    }

    /// When the phase transition happened, if it has.
    pub fn transition_time(&self) -> Option<DateTime<Utc>> {
        self.transition_time
    }

    /// Direct access to the phase-2 policy (diagnostics and tests).
    pub fn phase2(&self) -> &LinUcbBandit {
        &self.phase2
    }

    /// Select an arm, transitioning to phase 2 when the threshold is reached.
    ///
    /// Returns the selection and the phase that produced it; the phase tag
    /// must be carried on the decision for later attribution.
    pub fn select(
        &mut self,
        eligible: &[String],
        context: Option<&Array1<f64>>,
    ) -> Result<(Selection, RouterPhase), RoutingError> {
        if self.phase == RouterPhase::Explore && self.query_count >= self.switch_threshold {
            self.transition();
        }

        let selection = match self.phase {
            RouterPhase::Explore => self.phase1.select(eligible)?,
            RouterPhase::Contextual => {
                let context = context.ok_or(RoutingError::ContextRequired)?;
                self.phase2.select(eligible, context)?
            }
        };
        self.query_count += 1;
        Ok((selection, self.phase))
    }

    /// Apply feedback to the policy that made the decision.
    ///
    /// While still in phase 1, contexts are accumulated into the rolling mean
    /// used for knowledge transfer.
    pub fn update(
        &mut self,
        feedback: &BanditFeedback,
        reward: f64,
        context: Option<&Array1<f64>>,
        decision_phase: RouterPhase,
    ) -> Result<(), RoutingError> {
        if self.phase == RouterPhase::Explore {
            if let Some(context) = context {
                if context.len() == self.context_sum.len() {
                    self.context_sum = &self.context_sum + context;
                    self.context_count += 1;
                }
            }
        }

        match decision_phase {
            RouterPhase::Explore => self.phase1.update(feedback, reward),
            RouterPhase::Contextual => {
                let context = context.ok_or(RoutingError::ContextRequired)?;
                self.phase2.update(feedback, reward, context)
            }
        }
    }

    /// Knowledge transfer: replay each arm's phase-1 statistics into LinUCB.
    ///
    /// For each arm with `n` pulls and mean reward `r`, apply
    /// `min(n, TRANSFER_K_MAX)` pseudo-observations `(mean_context, r)`
    /// through the phase-2 update rule. Without any observed contexts there
    /// is nothing to replay and LinUCB starts from its priors.
    fn transition(&mut self) {
        if self.context_count > 0 {
            let mean_context = &self.context_sum / self.context_count as f64;
            for id in self.phase1.arm_ids() {
                let arm = self.phase1.arm(&id).expect("ids come from phase1");
                if arm.pulls == 0 {
                    continue;
                }
                let k = arm.pulls.min(TRANSFER_K_MAX);
                let mean_reward = arm.mean_reward();
                let synthetic = BanditFeedback {
                    model_id: id.clone(),
                    cost: 0.0,
                    quality_score: mean_reward,
                    latency: 0.0,
                };
                for _ in 0..k {
                    if let Err(err) = self.phase2.update(&synthetic, mean_reward, &mean_context) {
                        tracing::warn!(model_id = %id, error = %err, "knowledge transfer update failed");
                        break;
                    }
                }
            }
        }

        self.phase = RouterPhase::Contextual;
        self.transition_time = Some(Utc::now());
        tracing::info!(
            query_count = self.query_count,
            switch_threshold = self.switch_threshold,
            transferred_contexts = self.context_count,
            "hybrid router transitioned to contextual phase"
        );
    }

    /// Serialize the full two-phase state.
    pub fn snapshot(&self) -> HybridSnapshot {
        HybridSnapshot {
            query_count: self.query_count,
            phase: self.phase,
            transitioned_at_ms: self.transition_time.map(|t| t.timestamp_millis()),
            context_sum: self.context_sum.to_vec(),
            context_count: self.context_count,
            phase1: self.phase1.snapshot(),
            phase2: self.phase2.snapshot(),
        }
    }

    /// Restore the full two-phase state.
    pub fn restore(&mut self, snapshot: &HybridSnapshot) -> Result<(), RoutingError> {
        if snapshot.context_sum.len() != self.context_sum.len() {
            return Err(RoutingError::FeatureDimension {
                expected: self.context_sum.len(),
                actual: snapshot.context_sum.len(),
            });
        }
        self.phase1.restore(&snapshot.phase1)?;
        self.phase2.restore(&snapshot.phase2)?;
        self.query_count = snapshot.query_count;
        self.phase = snapshot.phase;
        self.transition_time = snapshot
            .transitioned_at_ms
            .and_then(DateTime::<Utc>::from_timestamp_millis);
        self.context_sum = Array1::from_vec(snapshot.context_sum.clone());
        self.context_count = snapshot.context_count;
        Ok(())
    }

    /// Diagnostic statistics across both phases.
    pub fn stats(&self) -> serde_json::Value {
        json!({
            "algorithm": "hybrid",
            "phase": self.phase.to_string(),
            "query_count": self.query_count,
            "switch_threshold": self.switch_threshold,
            "queries_since_transition": self.transition_time.map(|_| {
                self.query_count.saturating_sub(self.switch_threshold)
            }),
            "phase1": self.phase1.stats(),
            "phase2": self.phase2.stats(),
        })
    }
}

/// Serialized hybrid router state: both phase payloads plus transfer
/// bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridSnapshot {
    pub query_count: u64,
    pub phase: RouterPhase,
    pub transitioned_at_ms: Option<i64>,
    pub context_sum: Vec<f64>,
    pub context_count: u64,
    pub phase1: BanditSnapshot,
    pub phase2: BanditSnapshot,
}

impl HybridSnapshot {
    /// Encode to the wire format (tag, version, bookkeeping, then the two
    /// embedded policy payloads, each length-prefixed).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u8(TAG_HYBRID);
        w.u8(HYBRID_FORMAT_VERSION);
        w.u64(self.query_count);
        w.u8(match self.phase {
            RouterPhase::Explore => 1,
            RouterPhase::Contextual => 2,
        });
        match self.transitioned_at_ms {
            Some(ms) => {
                w.u8(1);
                w.i64(ms);
            }
            None => w.u8(0),
        }
        w.f64_slice(&self.context_sum);
        w.u64(self.context_count);

        let phase1 = self.phase1.to_bytes();
        w.u32(phase1.len() as u32);
        let mut buf = w.finish();
        buf.extend_from_slice(&phase1);

        let phase2 = self.phase2.to_bytes();
        buf.extend_from_slice(&(phase2.len() as u32).to_le_bytes());
        buf.extend_from_slice(&phase2);
        buf
    }

    /// Decode from the wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let mut r = Reader::new(bytes);
        let tag = r.u8()?;
        if tag != TAG_HYBRID {
            return Err(SnapshotError::UnknownAlgorithm(tag));
        }
        let version = r.u8()?;
        if version != HYBRID_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        let query_count = r.u64()?;
        let phase = match r.u8()? {
            1 => RouterPhase::Explore,
            2 => RouterPhase::Contextual,
            other => {
                return Err(SnapshotError::Inconsistent(format!(
                    "unknown phase tag {other}"
                )))
            }
        };
        let transitioned_at_ms = match r.u8()? {
            0 => None,
            _ => Some(r.i64()?),
        };
        let context_sum = r.f64_slice()?;
        let context_count = r.u64()?;

        let phase1_len = r.u32()? as usize;
        let phase1 = BanditSnapshot::from_bytes(r.bytes_exact(phase1_len)?)?;
        let phase2_len = r.u32()? as usize;
        let phase2 = BanditSnapshot::from_bytes(r.bytes_exact(phase2_len)?)?;

        Ok(Self {
            query_count,
            phase,
            transitioned_at_ms,
            context_sum,
            context_count,
            phase1,
            phase2,
        })
    }
}
