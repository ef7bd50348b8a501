//! Dense linear algebra for the contextual policies.
//!
//! Contextual bandits maintain a per-arm Gram matrix `A` that must stay
//! symmetric positive-definite. Everything here works on that assumption:
//! Cholesky factorization with escalating `eps * I` jitter for
//! ill-conditioned inputs, triangular solves, and an SPD solve built on both.

use ndarray::{Array1, Array2};

/// Initial jitter added to the diagonal when a factorization fails.
pub const JITTER_EPS: f64 = 1e-6;

/// Attempts before giving up on jittered factorization.
const MAX_JITTER_ATTEMPTS: u32 = 4;

/// Cholesky factorization `A = L * L^T` for symmetric positive-definite `A`.
///
/// Returns the lower-triangular factor, or `None` when a non-positive pivot
/// shows the matrix is not (numerically) positive-definite.
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return None;
    }
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Cholesky with escalating diagonal jitter.
///
/// Starts at [`JITTER_EPS`] and multiplies by 10 per attempt. Returns `None`
/// only when the matrix is unsalvageable.
pub fn cholesky_jittered(a: &Array2<f64>) -> Option<Array2<f64>> {
    if let Some(l) = cholesky(a) {
        return Some(l);
    }

    let mut eps = JITTER_EPS;
    for attempt in 0..MAX_JITTER_ATTEMPTS {
        let mut jittered = a.clone();
        for i in 0..a.nrows() {
            jittered[[i, i]] += eps;
        }
        if let Some(l) = cholesky(&jittered) {
            tracing::warn!(
                eps = eps,
                attempt = attempt,
                "ill-conditioned Gram matrix, factored with diagonal jitter"
            );
            return Some(l);
        }
        eps *= 10.0;
    }
    None
}

/// Solve `L * y = rhs` for lower-triangular `L` (forward substitution).
pub fn solve_lower(l: &Array2<f64>, rhs: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = rhs[i];
        for k in 0..i {
            sum -= l[[i, k]] * y[k];
        }
        y[i] = sum / l[[i, i]];
    }
    y
}

/// Solve `L^T * x = rhs` for lower-triangular `L` (back substitution).
pub fn solve_lower_transpose(l: &Array2<f64>, rhs: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = rhs[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solve `A * x = rhs` for SPD `A` via a jittered Cholesky factorization.
pub fn spd_solve(a: &Array2<f64>, rhs: &Array1<f64>) -> Option<Array1<f64>> {
    let l = cholesky_jittered(a)?;
    let y = solve_lower(&l, rhs);
    Some(solve_lower_transpose(&l, &y))
}

/// Quadratic form `x^T A^{-1} x`, non-negative for SPD `A`.
pub fn inverse_quadratic_form(a: &Array2<f64>, x: &Array1<f64>) -> Option<f64> {
    let inv_x = spd_solve(a, x)?;
    Some(x.dot(&inv_x).max(0.0))
}

/// Identity scaled by `lambda`.
pub fn scaled_identity(dim: usize, lambda: f64) -> Array2<f64> {
    let mut a = Array2::<f64>::zeros((dim, dim));
    for i in 0..dim {
        a[[i, i]] = lambda;
    }
    a
}

/// Rank-one update `A += x * x^T`, preserving exact symmetry.
pub fn rank_one_update(a: &mut Array2<f64>, x: &Array1<f64>) {
    let n = x.len();
    for i in 0..n {
        for j in 0..=i {
            let v = x[i] * x[j];
            a[[i, j]] += v;
            if i != j {
                a[[j, i]] += v;
            }
        }
    }
}
