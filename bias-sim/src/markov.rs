//! Synthetic ground truth: transition matrices, prevalence weighting and
//! simulated agent trajectories.

use ndarray::{Array2, Axis};
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::Rng;

use crate::error::ChainError;
use crate::types::{ChainTable, ObservationGrid, State, TransitionMatrix};

/// Lower bound for generated prevalence ratios.
pub const PREVALENCE_MIN: f64 = 0.1;
/// Upper bound (exclusive) for generated prevalence ratios.
pub const PREVALENCE_MAX: f64 = 1.0;

const DISTRIBUTION_TOLERANCE: f64 = 1e-6;

/// Side length of a square matrix, or an error if it isn't square/non-empty.
pub(crate) fn square_dim(matrix: &TransitionMatrix) -> Result<usize, ChainError> {
    let (rows, cols) = matrix.dim();
    if rows == 0 {
        return Err(ChainError::EmptyStateSpace);
    }
    if rows != cols {
        return Err(ChainError::DimensionMismatch {
            what: "transition matrix columns",
            expected: rows,
            found: cols,
        });
    }
    Ok(rows)
}

/// Draw an index from unnormalized non-negative weights. Weights that can't
/// form a distribution (all zero, or any negative) fall back to uniform.
pub(crate) fn sample_categorical<R: Rng>(rng: &mut R, weights: &[f64]) -> usize {
    match WeightedIndex::new(weights) {
        Ok(dist) => dist.sample(rng),
        Err(_) => rng.random_range(0..weights.len().max(1)),
    }
}

/// Random row-stochastic `states × states` matrix. Each row is a vector of
/// uniform draws normalized to sum to 1.
pub fn generate_standard_transition_matrix<R: Rng>(
    rng: &mut R,
    states: usize,
) -> Result<TransitionMatrix, ChainError> {
    if states == 0 {
        return Err(ChainError::EmptyStateSpace);
    }
    let mut matrix = Array2::from_shape_fn((states, states), |_| rng.random::<f64>());
    for mut row in matrix.axis_iter_mut(Axis(0)) {
        let sum = row.sum();
        if sum > 0.0 {
            row /= sum;
        } else {
            row.fill(1.0 / states as f64);
        }
    }
    Ok(matrix)
}

/// `k` positive prevalence ratios per state, drawn uniformly from
/// `[PREVALENCE_MIN, PREVALENCE_MAX)`. Shape is `states × k`.
pub fn generate_random_prevalence_ratios<R: Rng>(
    rng: &mut R,
    states: usize,
    k: usize,
) -> Result<Array2<f64>, ChainError> {
    if states == 0 {
        return Err(ChainError::EmptyStateSpace);
    }
    if k == 0 {
        return Err(ChainError::InvalidDistribution(
            "need at least one prevalence ratio per state".to_string(),
        ));
    }
    Ok(Array2::from_shape_fn((states, k), |_| {
        rng.random_range(PREVALENCE_MIN..PREVALENCE_MAX)
    }))
}

/// Mean prevalence per state.
fn prevalence_weights(ratios: &Array2<f64>, states: usize) -> Result<Vec<f64>, ChainError> {
    if ratios.nrows() != states {
        return Err(ChainError::DimensionMismatch {
            what: "prevalence ratio rows",
            expected: states,
            found: ratios.nrows(),
        });
    }
    if ratios.ncols() == 0 {
        return Err(ChainError::InvalidDistribution(
            "prevalence ratios have no columns".to_string(),
        ));
    }
    if ratios.iter().any(|r| !r.is_finite() || *r <= 0.0) {
        return Err(ChainError::InvalidDistribution(
            "prevalence ratios must be finite and positive".to_string(),
        ));
    }
    Ok(ratios
        .rows()
        .into_iter()
        .map(|row| row.sum() / row.len() as f64)
        .collect())
}

/// Re-weight each destination column by its state's mean prevalence ratio,
/// then renormalize rows. Popular destinations attract more transitions.
pub fn construct_weighted_transition_matrix(
    matrix: &TransitionMatrix,
    ratios: &Array2<f64>,
) -> Result<TransitionMatrix, ChainError> {
    let states = square_dim(matrix)?;
    let weights = prevalence_weights(ratios, states)?;

    let mut weighted = matrix.clone();
    for mut row in weighted.axis_iter_mut(Axis(0)) {
        for (p, w) in row.iter_mut().zip(&weights) {
            *p *= w;
        }
        let sum = row.sum();
        if sum > 0.0 {
            row /= sum;
        } else {
            row.fill(1.0 / states as f64);
        }
    }
    Ok(weighted)
}

/// Initial-state distribution proportional to mean prevalence.
pub fn generate_custom_initial_distribution(
    states: usize,
    ratios: &Array2<f64>,
) -> Result<Vec<f64>, ChainError> {
    if states == 0 {
        return Err(ChainError::EmptyStateSpace);
    }
    let weights = prevalence_weights(ratios, states)?;
    let total: f64 = weights.iter().sum();
    Ok(weights.into_iter().map(|w| w / total).collect())
}

fn check_distribution(distribution: &[f64], states: usize) -> Result<(), ChainError> {
    if distribution.len() != states {
        return Err(ChainError::DimensionMismatch {
            what: "initial distribution",
            expected: states,
            found: distribution.len(),
        });
    }
    if distribution.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(ChainError::InvalidDistribution(
            "probabilities must be finite and non-negative".to_string(),
        ));
    }
    let total: f64 = distribution.iter().sum();
    if (total - 1.0).abs() > DISTRIBUTION_TOLERANCE {
        return Err(ChainError::InvalidDistribution(format!(
            "probabilities sum to {}, expected 1",
            total
        )));
    }
    Ok(())
}

/// Draw a starting state for each of `n` agents.
pub fn generate_initial_states<R: Rng>(
    rng: &mut R,
    matrix: &TransitionMatrix,
    n: usize,
    distribution: &[f64],
) -> Result<Vec<State>, ChainError> {
    let states = square_dim(matrix)?;
    check_distribution(distribution, states)?;
    Ok((0..n)
        .map(|_| sample_categorical(rng, distribution) as State)
        .collect())
}

/// Simulate `n` trajectories of length `t`. Column 0 holds each agent's
/// initial state; every later column is one transition drawn from `matrix`.
pub fn generate_markov_chains<R: Rng>(
    rng: &mut R,
    matrix: &TransitionMatrix,
    initial_states: &[State],
    t: usize,
    n: usize,
) -> Result<ChainTable, ChainError> {
    let states = square_dim(matrix)?;
    if initial_states.len() != n {
        return Err(ChainError::DimensionMismatch {
            what: "initial states",
            expected: n,
            found: initial_states.len(),
        });
    }
    if let Some(&bad) = initial_states.iter().find(|s| **s as usize >= states) {
        return Err(ChainError::StateOutOfRange { state: bad, states });
    }

    let mut cells = Array2::from_elem((n, t), None);
    for (agent, &start) in initial_states.iter().enumerate() {
        let mut current = start;
        for step in 0..t {
            if step > 0 {
                let weights = matrix.row(current as usize).to_vec();
                current = sample_categorical(rng, &weights) as State;
            }
            cells[[agent, step]] = Some(current);
        }
    }

    Ok(ChainTable::with_sequential_ids(ObservationGrid::new(cells)))
}
