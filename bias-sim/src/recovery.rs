//! Recovery strategies for incomplete trajectories: forward imputation and
//! expectation-maximization.
//!
//! Both treat a missing cell as a latent state of the same chain. Observed
//! cells are certain; nothing else is modeled (no emission noise).

use ndarray::Array2;

use crate::error::ChainError;
use crate::estimate::{normalize_rows, transition_counts};
use crate::markov::square_dim;
use crate::types::{ObservationGrid, State, TransitionMatrix};

/// Mass added to every expected count in the M-step. Keeps every transition
/// possible so the forward pass never collapses to zero.
pub const EM_PSEUDOCOUNT: f64 = 1e-9;

fn check_grid(grid: &ObservationGrid, agents: Option<usize>, t: usize, states: usize) -> Result<(), ChainError> {
    if states == 0 {
        return Err(ChainError::EmptyStateSpace);
    }
    if let Some(n) = agents {
        if grid.agents() != n {
            return Err(ChainError::DimensionMismatch {
                what: "agents",
                expected: n,
                found: grid.agents(),
            });
        }
    }
    if grid.steps() != t {
        return Err(ChainError::DimensionMismatch {
            what: "time steps",
            expected: t,
            found: grid.steps(),
        });
    }
    if let Some(label) = grid.max_label() {
        if label as usize >= states {
            return Err(ChainError::StateOutOfRange {
                state: label,
                states,
            });
        }
    }
    Ok(())
}

fn check_matrix(matrix: &TransitionMatrix, states: usize) -> Result<(), ChainError> {
    let dim = square_dim(matrix)?;
    if dim != states {
        return Err(ChainError::DimensionMismatch {
            what: "transition matrix size",
            expected: states,
            found: dim,
        });
    }
    Ok(())
}

/// Observed label frequencies, uniform if nothing is observed.
fn observed_marginal(grid: &ObservationGrid, states: usize) -> Vec<f64> {
    let mut freq = vec![0.0; states];
    for label in grid.cells().iter().flatten() {
        freq[*label as usize] += 1.0;
    }
    let total: f64 = freq.iter().sum();
    if total > 0.0 {
        freq.iter_mut().for_each(|f| *f /= total);
    } else {
        freq.fill(1.0 / states as f64);
    }
    freq
}

/// `belief · matrix`
fn propagate(belief: &[f64], matrix: &TransitionMatrix) -> Vec<f64> {
    let states = belief.len();
    (0..states)
        .map(|s| (0..states).map(|r| belief[r] * matrix[[r, s]]).sum())
        .collect()
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_v), (i, &v)| {
            if v > best_v { (i, v) } else { (best, best_v) }
        })
        .0
}

/// Fill every missing cell by forward propagation through `estimate`.
///
/// Each agent carries a belief over states: observed cells pin it to their
/// label, missing cells advance it one step and take its arg-max (ties go
/// to the lower label). A leading gap starts from the observed marginal.
pub fn forward_algorithm(
    grid: &ObservationGrid,
    estimate: &TransitionMatrix,
    t: usize,
    states: usize,
) -> Result<ObservationGrid, ChainError> {
    check_grid(grid, None, t, states)?;
    check_matrix(estimate, states)?;

    let prior = observed_marginal(grid, states);
    let mut cells = grid.cells().clone();

    for agent in 0..grid.agents() {
        let mut belief = prior.clone();
        for step in 0..t {
            if step > 0 {
                belief = propagate(&belief, estimate);
            }
            match grid.get(agent, step) {
                Some(label) => {
                    belief.fill(0.0);
                    belief[label as usize] = 1.0;
                }
                None => cells[[agent, step]] = Some(argmax(&belief) as State),
            }
        }
    }

    Ok(ObservationGrid::new(cells))
}

/// Indicator emission: a missing cell is compatible with every state.
fn emission(obs: Option<State>, state: usize) -> f64 {
    match obs {
        None => 1.0,
        Some(label) if label as usize == state => 1.0,
        Some(_) => 0.0,
    }
}

fn normalize(values: &mut [f64]) -> f64 {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter_mut().for_each(|v| *v /= total);
    }
    total
}

/// Expected transition counts and initial-state posterior for one agent.
fn accumulate_agent(
    row: &[Option<State>],
    matrix: &TransitionMatrix,
    initial: &[f64],
    counts: &mut Array2<f64>,
    first: &mut [f64],
) {
    let states = initial.len();
    let t = row.len();
    if t == 0 {
        return;
    }

    // Forward pass, normalized per step
    let mut alpha = vec![vec![0.0; states]; t];
    for s in 0..states {
        alpha[0][s] = initial[s] * emission(row[0], s);
    }
    if normalize(&mut alpha[0]) == 0.0 {
        for s in 0..states {
            alpha[0][s] = emission(row[0], s);
        }
        normalize(&mut alpha[0]);
    }
    for k in 1..t {
        let prev = propagate(&alpha[k - 1], matrix);
        for s in 0..states {
            alpha[k][s] = prev[s] * emission(row[k], s);
        }
        if normalize(&mut alpha[k]) == 0.0 {
            for s in 0..states {
                alpha[k][s] = emission(row[k], s);
            }
            normalize(&mut alpha[k]);
        }
    }

    // Backward pass, normalized per step
    let mut beta = vec![vec![1.0; states]; t];
    for k in (0..t - 1).rev() {
        for r in 0..states {
            beta[k][r] = (0..states)
                .map(|s| matrix[[r, s]] * emission(row[k + 1], s) * beta[k + 1][s])
                .sum();
        }
        if normalize(&mut beta[k]) == 0.0 {
            beta[k].fill(1.0);
        }
    }

    let mut gamma0: Vec<f64> = (0..states).map(|s| alpha[0][s] * beta[0][s]).collect();
    if normalize(&mut gamma0) > 0.0 {
        for (f, g) in first.iter_mut().zip(&gamma0) {
            *f += g;
        }
    }

    let mut xi = Array2::zeros((states, states));
    for k in 0..t - 1 {
        for r in 0..states {
            for s in 0..states {
                xi[[r, s]] =
                    alpha[k][r] * matrix[[r, s]] * emission(row[k + 1], s) * beta[k + 1][s];
            }
        }
        let total = xi.sum();
        if total > 0.0 {
            *counts += &(&xi / total);
        }
    }
}

/// Refine a transition-matrix estimate from incomplete data by EM.
///
/// Starts from Laplace-smoothed counts over fully observed pairs, then
/// alternates expected transition counts (forward-backward with missing
/// cells latent) and row normalization. Stops after `iterations` rounds or
/// once no entry moves by `tol` or more.
pub fn em_algorithm(
    grid: &ObservationGrid,
    n: usize,
    t: usize,
    states: usize,
    iterations: usize,
    tol: f64,
) -> Result<TransitionMatrix, ChainError> {
    check_grid(grid, Some(n), t, states)?;

    let mut matrix = normalize_rows(transition_counts(grid, states)? + 1.0);
    let mut initial = observed_marginal(grid, states);

    for _ in 0..iterations {
        let mut counts = Array2::zeros((states, states));
        let mut first = vec![0.0; states];
        for agent in 0..n {
            let row: Vec<_> = grid.row(agent).collect();
            accumulate_agent(&row, &matrix, &initial, &mut counts, &mut first);
        }

        let next = normalize_rows(counts + EM_PSEUDOCOUNT);
        let delta = (&next - &matrix)
            .iter()
            .fold(0.0f64, |acc, d| acc.max(d.abs()));
        matrix = next;
        if normalize(&mut first) > 0.0 {
            initial = first;
        }
        if delta < tol {
            break;
        }
    }

    Ok(matrix)
}
