//! Self-describing binary payloads for persisted posteriors.
//!
//! Wire format: one algorithm tag byte, one format version byte, then
//! length-prefixed arrays (u32 counts, little-endian scalars). Gram matrices
//! are stored as their lower triangle in f64; together with `b` that keeps a
//! 387-dimensional arm around 600 KB and makes restore bit-exact, so a
//! restored policy selects identically to the one that was saved.

use thiserror::Error;

use ndarray::{Array1, Array2};

/// Current payload format version.
const FORMAT_VERSION: u8 = 1;

/// Algorithm tags.
const TAG_BETA_TS: u8 = 1;
const TAG_UCB1: u8 = 2;
const TAG_LINUCB: u8 = 3;
const TAG_CTX_TS: u8 = 4;
pub(crate) const TAG_HYBRID: u8 = 5;

/// Errors decoding a persisted payload.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Payload truncated at byte {0}")]
    Truncated(usize),

    #[error("Unknown algorithm tag {0}")]
    UnknownAlgorithm(u8),

    #[error("Unsupported payload format version {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid UTF-8 in payload string")]
    InvalidUtf8,

    #[error("Inconsistent payload: {0}")]
    Inconsistent(String),
}

/// Beta-Bernoulli arm state.
#[derive(Debug, Clone, PartialEq)]
pub struct BetaArmState {
    pub alpha: f64,
    pub beta: f64,
    pub pulls: u64,
    pub total_cost: f64,
    pub avg_quality: f64,
}

/// UCB1 arm state.
#[derive(Debug, Clone, PartialEq)]
pub struct Ucb1ArmState {
    pub pulls: u64,
    pub total_reward: f64,
}

/// Linear-model arm state: `A` as a lower triangle plus `b`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearArmState {
    pub pulls: u64,
    /// Row-major lower triangle of `A`, `dim * (dim + 1) / 2` values.
    pub a_lower: Vec<f64>,
    /// Reward-weighted context sum, `dim` values.
    pub b: Vec<f64>,
}

impl LinearArmState {
    /// Extract the lower triangle of a symmetric `A`.
    pub fn from_arm(a: &Array2<f64>, b: &Array1<f64>, pulls: u64) -> Self {
        let dim = a.nrows();
        let mut a_lower = Vec::with_capacity(dim * (dim + 1) / 2);
        for i in 0..dim {
            for j in 0..=i {
                a_lower.push(a[[i, j]]);
            }
        }
        Self {
            pulls,
            a_lower,
            b: b.to_vec(),
        }
    }

    /// Rebuild the full symmetric `A` and `b`.
    pub fn to_matrices(&self, dim: usize) -> (Array2<f64>, Array1<f64>) {
        let mut a = Array2::<f64>::zeros((dim, dim));
        let mut idx = 0;
        for i in 0..dim {
            for j in 0..=i {
                a[[i, j]] = self.a_lower[idx];
                a[[j, i]] = self.a_lower[idx];
                idx += 1;
            }
        }
        (a, Array1::from_vec(self.b.clone()))
    }
}

/// One sliding-window observation.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEntry {
    pub context: Vec<f64>,
    pub reward: f64,
}

/// Serialized posterior state for any single policy.
#[derive(Debug, Clone, PartialEq)]
pub enum BanditSnapshot {
    BetaThompson {
        arms: Vec<(String, BetaArmState)>,
    },
    Ucb1 {
        arms: Vec<(String, Ucb1ArmState)>,
    },
    LinUcb {
        dim: u32,
        arms: Vec<(String, LinearArmState)>,
    },
    CtxThompson {
        dim: u32,
        arms: Vec<(String, LinearArmState, Vec<WindowEntry>)>,
    },
}

impl BanditSnapshot {
    /// Algorithm tag byte.
    pub fn algorithm_tag(&self) -> u8 {
        match self {
            BanditSnapshot::BetaThompson { .. } => TAG_BETA_TS,
            BanditSnapshot::Ucb1 { .. } => TAG_UCB1,
            BanditSnapshot::LinUcb { .. } => TAG_LINUCB,
            BanditSnapshot::CtxThompson { .. } => TAG_CTX_TS,
        }
    }

    /// Human-readable algorithm name.
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            BanditSnapshot::BetaThompson { .. } => "beta_ts",
            BanditSnapshot::Ucb1 { .. } => "ucb1",
            BanditSnapshot::LinUcb { .. } => "linucb",
            BanditSnapshot::CtxThompson { .. } => "ctx_ts",
        }
    }

    /// Encode to the wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u8(self.algorithm_tag());
        w.u8(FORMAT_VERSION);
        match self {
            BanditSnapshot::BetaThompson { arms } => {
                w.u32(arms.len() as u32);
                for (id, s) in arms {
                    w.str(id);
                    w.f64(s.alpha);
                    w.f64(s.beta);
                    w.u64(s.pulls);
                    w.f64(s.total_cost);
                    w.f64(s.avg_quality);
                }
            }
            BanditSnapshot::Ucb1 { arms } => {
                w.u32(arms.len() as u32);
                for (id, s) in arms {
                    w.str(id);
                    w.u64(s.pulls);
                    w.f64(s.total_reward);
                }
            }
            BanditSnapshot::LinUcb { dim, arms } => {
                w.u32(*dim);
                w.u32(arms.len() as u32);
                for (id, s) in arms {
                    w.str(id);
                    w.u64(s.pulls);
                    w.f64_slice(&s.a_lower);
                    w.f64_slice(&s.b);
                }
            }
            BanditSnapshot::CtxThompson { dim, arms } => {
                w.u32(*dim);
                w.u32(arms.len() as u32);
                for (id, s, window) in arms {
                    w.str(id);
                    w.u64(s.pulls);
                    w.f64_slice(&s.a_lower);
                    w.f64_slice(&s.b);
                    w.u32(window.len() as u32);
                    for entry in window {
                        w.f64_slice(&entry.context);
                        w.f64(entry.reward);
                    }
                }
            }
        }
        w.finish()
    }

    /// Decode from the wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let mut r = Reader::new(bytes);
        let tag = r.u8()?;
        let version = r.u8()?;
        if version != FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        match tag {
            TAG_BETA_TS => {
                let n = r.u32()? as usize;
                let mut arms = Vec::with_capacity(n);
                for _ in 0..n {
                    let id = r.str()?;
                    arms.push((
                        id,
                        BetaArmState {
                            alpha: r.f64()?,
                            beta: r.f64()?,
                            pulls: r.u64()?,
                            total_cost: r.f64()?,
                            avg_quality: r.f64()?,
                        },
                    ));
                }
                Ok(BanditSnapshot::BetaThompson { arms })
            }
            TAG_UCB1 => {
                let n = r.u32()? as usize;
                let mut arms = Vec::with_capacity(n);
                for _ in 0..n {
                    let id = r.str()?;
                    arms.push((
                        id,
                        Ucb1ArmState {
                            pulls: r.u64()?,
                            total_reward: r.f64()?,
                        },
                    ));
                }
                Ok(BanditSnapshot::Ucb1 { arms })
            }
            TAG_LINUCB => {
                let dim = r.u32()?;
                let n = r.u32()? as usize;
                let mut arms = Vec::with_capacity(n);
                for _ in 0..n {
                    let id = r.str()?;
                    let pulls = r.u64()?;
                    let a_lower = r.f64_slice()?;
                    let b = r.f64_slice()?;
                    check_linear_lengths(dim, &a_lower, &b)?;
                    arms.push((id, LinearArmState { pulls, a_lower, b }));
                }
                Ok(BanditSnapshot::LinUcb { dim, arms })
            }
            TAG_CTX_TS => {
                let dim = r.u32()?;
                let n = r.u32()? as usize;
                let mut arms = Vec::with_capacity(n);
                for _ in 0..n {
                    let id = r.str()?;
                    let pulls = r.u64()?;
                    let a_lower = r.f64_slice()?;
                    let b = r.f64_slice()?;
                    check_linear_lengths(dim, &a_lower, &b)?;
                    let w = r.u32()? as usize;
                    let mut window = Vec::with_capacity(w);
                    for _ in 0..w {
                        window.push(WindowEntry {
                            context: r.f64_slice()?,
                            reward: r.f64()?,
                        });
                    }
                    arms.push((id, LinearArmState { pulls, a_lower, b }, window));
                }
                Ok(BanditSnapshot::CtxThompson { dim, arms })
            }
            other => Err(SnapshotError::UnknownAlgorithm(other)),
        }
    }
}

fn check_linear_lengths(dim: u32, a_lower: &[f64], b: &[f64]) -> Result<(), SnapshotError> {
    let dim = dim as usize;
    let expected = dim * (dim + 1) / 2;
    if a_lower.len() != expected || b.len() != dim {
        return Err(SnapshotError::Inconsistent(format!(
            "expected lower triangle {expected} / vector {dim}, got {} / {}",
            a_lower.len(),
            b.len()
        )));
    }
    Ok(())
}

/// Little-endian byte writer.
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub(crate) fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn str(&mut self, s: &str) {
        self.u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub(crate) fn f64_slice(&mut self, values: &[f64]) {
        self.u32(values.len() as u32);
        for v in values {
            self.f64(*v);
        }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Little-endian byte reader with bounds checking.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SnapshotError> {
        if self.pos + n > self.bytes.len() {
            return Err(SnapshotError::Truncated(self.pos));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32, SnapshotError> {
        let b: [u8; 4] = self.take(4)?.try_into().expect("length checked");
        Ok(u32::from_le_bytes(b))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, SnapshotError> {
        let b: [u8; 8] = self.take(8)?.try_into().expect("length checked");
        Ok(u64::from_le_bytes(b))
    }

    pub(crate) fn i64(&mut self) -> Result<i64, SnapshotError> {
        let b: [u8; 8] = self.take(8)?.try_into().expect("length checked");
        Ok(i64::from_le_bytes(b))
    }

    pub(crate) fn f64(&mut self) -> Result<f64, SnapshotError> {
        let b: [u8; 8] = self.take(8)?.try_into().expect("length checked");
        Ok(f64::from_le_bytes(b))
    }

    pub(crate) fn str(&mut self) -> Result<String, SnapshotError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SnapshotError::InvalidUtf8)
    }

    pub(crate) fn bytes_exact(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        self.take(len)
    }

    pub(crate) fn f64_slice(&mut self) -> Result<Vec<f64>, SnapshotError> {
        let len = self.u32()? as usize;
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            values.push(self.f64()?);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_beta_ts_codec_round_trip() {
        let snapshot = BanditSnapshot::BetaThompson {
            arms: vec![
                (
                    "openai:gpt-4o".to_string(),
                    BetaArmState {
                        alpha: 12.0,
                        beta: 3.0,
                        pulls: 13,
                        total_cost: 0.42,
                        avg_quality: 0.87,
                    },
                ),
                (
                    "groq:llama-3.1-8b-instant".to_string(),
                    BetaArmState {
                        alpha: 1.0,
                        beta: 1.0,
                        pulls: 0,
                        total_cost: 0.0,
                        avg_quality: 0.0,
                    },
                ),
            ],
        };

        let bytes = snapshot.to_bytes();
        let decoded = BanditSnapshot::from_bytes(&bytes).expect("valid payload");
        assert_eq!(snapshot, decoded);
        assert_eq!(bytes[0], 1); // algorithm tag
        assert_eq!(bytes[1], 1); // format version
    }

    #[test]
    fn test_ucb1_codec_round_trip() {
        let snapshot = BanditSnapshot::Ucb1 {
            arms: vec![(
                "a".to_string(),
                Ucb1ArmState {
                    pulls: 9,
                    total_reward: 5.5,
                },
            )],
        };
        let decoded = BanditSnapshot::from_bytes(&snapshot.to_bytes()).expect("valid payload");
        assert_eq!(snapshot, decoded);
    }

    #[test]
    fn test_linear_state_matrix_round_trip() {
        let a = array![[2.0, 0.5, 0.1], [0.5, 3.0, 0.2], [0.1, 0.2, 4.0]];
        let b = array![1.0, -1.0, 0.5];
        let state = LinearArmState::from_arm(&a, &b, 7);
        assert_eq!(state.a_lower.len(), 6);

        let (a2, b2) = state.to_matrices(3);
        assert_eq!(a, a2);
        assert_eq!(b, b2);
    }

    #[test]
    fn test_linucb_codec_round_trip() {
        let a = array![[2.0, 0.5], [0.5, 3.0]];
        let b = array![1.0, -1.0];
        let snapshot = BanditSnapshot::LinUcb {
            dim: 2,
            arms: vec![("m".to_string(), LinearArmState::from_arm(&a, &b, 4))],
        };
        let decoded = BanditSnapshot::from_bytes(&snapshot.to_bytes()).expect("valid payload");
        assert_eq!(snapshot, decoded);
    }

    #[test]
    fn test_ctx_ts_codec_round_trip_with_window() {
        let a = array![[2.0, 0.0], [0.0, 2.0]];
        let b = array![0.5, 0.5];
        let snapshot = BanditSnapshot::CtxThompson {
            dim: 2,
            arms: vec![(
                "m".to_string(),
                LinearArmState::from_arm(&a, &b, 2),
                vec![
                    WindowEntry {
                        context: vec![1.0, 0.0],
                        reward: 0.9,
                    },
                    WindowEntry {
                        context: vec![0.0, 1.0],
                        reward: 0.1,
                    },
                ],
            )],
        };
        let decoded = BanditSnapshot::from_bytes(&snapshot.to_bytes()).expect("valid payload");
        assert_eq!(snapshot, decoded);
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        assert!(matches!(
            BanditSnapshot::from_bytes(&[99, 1]),
            Err(SnapshotError::UnknownAlgorithm(99))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_version() {
        assert!(matches!(
            BanditSnapshot::from_bytes(&[1, 9]),
            Err(SnapshotError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let snapshot = BanditSnapshot::Ucb1 {
            arms: vec![(
                "a".to_string(),
                Ucb1ArmState {
                    pulls: 1,
                    total_reward: 0.5,
                },
            )],
        };
        let mut bytes = snapshot.to_bytes();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            BanditSnapshot::from_bytes(&bytes),
            Err(SnapshotError::Truncated(_))
        ));
    }

    #[test]
    fn test_decode_rejects_inconsistent_lengths() {
        let mut w = Writer::new();
        w.u8(TAG_LINUCB);
        w.u8(FORMAT_VERSION);
        w.u32(3); // dim 3 => lower triangle should be 6
        w.u32(1);
        w.str("m");
        w.u64(0);
        w.f64_slice(&[1.0, 2.0]); // wrong length
        w.f64_slice(&[1.0, 2.0, 3.0]);
        assert!(matches!(
            BanditSnapshot::from_bytes(&w.finish()),
            Err(SnapshotError::Inconsistent(_))
        ));
    }
}
