//! Transition-matrix estimation from observed data and the error metrics
//! used to score estimates against ground truth.

use ndarray::{Array2, Axis, Zip};

use crate::error::ChainError;
use crate::markov::square_dim;
use crate::types::{ObservationGrid, TransitionMatrix};

/// Floor applied to the reference distribution inside the KL sum.
pub const KL_EPSILON: f64 = 1e-10;

/// Count transitions between adjacent observed cells. A pair with either side
/// missing contributes nothing.
pub fn transition_counts(grid: &ObservationGrid, states: usize) -> Result<Array2<f64>, ChainError> {
    if states == 0 {
        return Err(ChainError::EmptyStateSpace);
    }
    if let Some(label) = grid.max_label() {
        if label as usize >= states {
            return Err(ChainError::StateOutOfRange {
                state: label,
                states,
            });
        }
    }

    let mut counts = Array2::zeros((states, states));
    for agent in 0..grid.agents() {
        let row: Vec<_> = grid.row(agent).collect();
        for pair in row.windows(2) {
            if let (Some(from), Some(to)) = (pair[0], pair[1]) {
                counts[[from as usize, to as usize]] += 1.0;
            }
        }
    }
    Ok(counts)
}

/// Normalize count rows into probabilities. A row with no mass becomes
/// uniform.
pub(crate) fn normalize_rows(mut counts: Array2<f64>) -> TransitionMatrix {
    let states = counts.ncols();
    for mut row in counts.axis_iter_mut(Axis(0)) {
        let total = row.sum();
        if total > 0.0 {
            row /= total;
        } else {
            row.fill(1.0 / states as f64);
        }
    }
    counts
}

/// Empirical (maximum-likelihood) transition matrix from a possibly
/// incomplete grid.
pub fn extract_transition_matrix(
    grid: &ObservationGrid,
    states: usize,
) -> Result<TransitionMatrix, ChainError> {
    transition_counts(grid, states).map(normalize_rows)
}

fn check_pair(p: &TransitionMatrix, q: &TransitionMatrix, states: usize) -> Result<(), ChainError> {
    for m in [p, q] {
        let dim = square_dim(m)?;
        if dim != states {
            return Err(ChainError::DimensionMismatch {
                what: "matrix size",
                expected: states,
                found: dim,
            });
        }
    }
    Ok(())
}

/// KL divergence `D(P || Q)` between two row-stochastic matrices, averaged
/// over rows. Terms with `p = 0` contribute nothing; `q` is floored at
/// [`KL_EPSILON`].
pub fn kl_divergence(
    p: &TransitionMatrix,
    q: &TransitionMatrix,
    states: usize,
) -> Result<f64, ChainError> {
    check_pair(p, q, states)?;
    let mut total = 0.0;
    Zip::from(p).and(q).for_each(|&pi, &qi| {
        if pi > 0.0 {
            total += pi * (pi / qi.max(KL_EPSILON)).ln();
        }
    });
    Ok(total / states as f64)
}

/// Frobenius norm of a matrix.
pub fn frobenius_norm(m: &Array2<f64>) -> f64 {
    m.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// `‖estimate − truth‖_F / (√(2·states) · ‖truth‖_F)`.
///
/// The same formula scores baseline, imputed and optimized estimates. An
/// exact estimate scores 0; a zero `truth` with a non-zero difference scores
/// infinity.
pub fn normalized_error(estimate: &TransitionMatrix, truth: &TransitionMatrix) -> Result<f64, ChainError> {
    let states = square_dim(truth)?;
    check_pair(estimate, truth, states)?;

    let diff = frobenius_norm(&(estimate - truth));
    if diff == 0.0 {
        return Ok(0.0);
    }
    let scale = (2.0 * states as f64).sqrt() * frobenius_norm(truth);
    if scale == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(diff / scale)
}
