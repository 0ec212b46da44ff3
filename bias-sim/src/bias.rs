//! Popularity-correlated missingness.
//!
//! Observations are removed category by category in popularity order until a
//! global budget is spent. Each category gives up at most [`REMOVAL_CAP`] of
//! its cells so no state is ever erased from the data entirely.

use rand::Rng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

use crate::error::{BiasError, InjectionFault};
use crate::types::{ChainTable, ObservationGrid, State};

/// Largest fraction of one category's cells that may be removed.
pub const REMOVAL_CAP: f64 = 0.9;

// ============================================================================
// PopularityTable
// ============================================================================

/// Empirical frequency of each category, indexed by label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularityTable {
    probabilities: Vec<f64>,
}

impl PopularityTable {
    pub fn new(probabilities: Vec<f64>) -> Self {
        Self { probabilities }
    }

    /// `count(state) / (N*T)` for every state in `[0, states)`.
    pub fn from_grid(grid: &ObservationGrid, states: usize) -> Self {
        let (n, t) = grid.dim();
        let size = (n * t) as f64;
        let probabilities = (0..states)
            .map(|s| {
                if size > 0.0 {
                    grid.count(s as State) as f64 / size
                } else {
                    0.0
                }
            })
            .collect();
        Self { probabilities }
    }

    pub fn states(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    pub fn probability(&self, state: State) -> Option<f64> {
        self.probabilities.get(state as usize).copied()
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    /// Labels ordered by frequency. Ties keep label order in both directions.
    pub fn ranked(&self, ascending: bool) -> Vec<State> {
        let mut order: Vec<State> = (0..self.probabilities.len() as State).collect();
        order.sort_by(|&a, &b| {
            let (pa, pb) = (self.probabilities[a as usize], self.probabilities[b as usize]);
            if ascending {
                pa.total_cmp(&pb)
            } else {
                pb.total_cmp(&pa)
            }
        });
        order
    }
}

// ============================================================================
// InjectParams
// ============================================================================

/// Scalar inputs to [`introduce_popularity_bias`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InjectParams {
    /// Target fraction of the N×T grid to remove, in [0, 1].
    pub desired_missing_pct: f64,
    /// Agents (grid rows).
    pub n: usize,
    /// Time steps (grid columns).
    pub t: usize,
    /// `true` removes from the least popular categories first, `false` from
    /// the most popular.
    pub ascending: bool,
}

impl InjectParams {
    /// Parse from loosely typed JSON. Type errors (fractional `n`, a string
    /// where a boolean belongs) and range errors are both invalid arguments.
    pub fn from_json(value: serde_json::Value) -> Result<Self, BiasError> {
        let params: Self = serde_json::from_value(value)
            .map_err(|e| BiasError::InvalidArgument(e.to_string()))?;
        params.check_scalars()?;
        Ok(params)
    }

    /// Total cells to remove: `round(pct * N * T)`, ties to even.
    pub fn budget(&self) -> usize {
        (self.desired_missing_pct * self.n as f64 * self.t as f64).round_ties_even() as usize
    }

    fn check_scalars(&self) -> Result<(), BiasError> {
        if !self.desired_missing_pct.is_finite() || !(0.0..=1.0).contains(&self.desired_missing_pct) {
            return Err(BiasError::InvalidArgument(format!(
                "desired_missing_pct must be between 0 and 1, got {}",
                self.desired_missing_pct
            )));
        }
        if self.n == 0 || self.t == 0 {
            return Err(BiasError::InvalidArgument(format!(
                "N and T must be positive, got N={} T={}",
                self.n, self.t
            )));
        }
        Ok(())
    }

    fn check_against(&self, data: &ChainTable, popularity: &PopularityTable) -> Result<(), BiasError> {
        self.check_scalars()?;
        let (rows, cols) = data.grid.dim();
        if rows != self.n || data.agents() != self.n {
            return Err(BiasError::InvalidArgument(format!(
                "data has {} rows ({} ids), expected N={}",
                rows,
                data.agents(),
                self.n
            )));
        }
        if cols != self.t {
            return Err(BiasError::InvalidArgument(format!(
                "data has {} observation columns, expected T={}",
                cols, self.t
            )));
        }
        if popularity.is_empty() {
            return Err(BiasError::InvalidArgument(
                "popularity table has no states".to_string(),
            ));
        }
        if let Some(p) = popularity
            .probabilities()
            .iter()
            .find(|p| !p.is_finite() || !(0.0..=1.0).contains(*p))
        {
            return Err(BiasError::InvalidArgument(format!(
                "popularity probabilities must lie in [0, 1], got {}",
                p
            )));
        }
        Ok(())
    }
}

/// Removal quota for a category with `occurrences` cells.
pub fn removal_quota(occurrences: usize) -> usize {
    (occurrences as f64 * REMOVAL_CAP).floor() as usize
}

// ============================================================================
// Injection
// ============================================================================

/// Remove observations from `data` in popularity order.
///
/// Categories are visited once each, in the order given by
/// `params.ascending`. A visited category loses a uniform random sample of
/// up to `removal_quota(occurrences)` cells, one at a time, until the budget
/// runs out. If every quota together is smaller than the budget the result
/// has less missingness than requested.
///
/// Returns the corrupted N×T grid; the identifier column and `data` itself
/// are untouched.
pub fn introduce_popularity_bias<R: Rng>(
    rng: &mut R,
    data: &ChainTable,
    popularity: &PopularityTable,
    params: &InjectParams,
) -> Result<ObservationGrid, BiasError> {
    params.check_against(data, popularity)?;
    remove_by_popularity(rng, &data.grid, popularity, params).map_err(BiasError::from)
}

fn remove_by_popularity<R: Rng>(
    rng: &mut R,
    grid: &ObservationGrid,
    popularity: &PopularityTable,
    params: &InjectParams,
) -> Result<ObservationGrid, InjectionFault> {
    if let Some(label) = grid.max_label() {
        if label as usize >= popularity.states() {
            return Err(InjectionFault::UnrankedLabel {
                label,
                states: popularity.states(),
            });
        }
    }

    let mut working = grid.clone();
    let mut remaining = params.budget();

    for (rank, state) in popularity.ranked(params.ascending).into_iter().enumerate() {
        if remaining == 0 {
            break;
        }
        let positions = working.positions_of(state);
        let quota = removal_quota(positions.len());
        let mut removed = 0usize;

        if quota > 0 {
            // quota <= positions.len(), so the draw always fits
            for idx in index::sample(rng, positions.len(), quota) {
                let (agent, step) = positions[idx];
                working.clear(agent, step);
                removed += 1;
                remaining -= 1;
                if remaining == 0 {
                    break;
                }
            }
        }

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "injection",
            state = state as u64,
            rank = rank as u64,
            occurrences = positions.len() as u64,
            quota = quota as u64,
            removed = removed as u64,
            remaining = remaining as u64,
            ascending = params.ascending,
        );
        let _ = (rank, removed); // Only read by instrumentation
    }

    Ok(working)
}
