//! The popularity sweep: one synthetic ground truth, then every
//! (direction, missing fraction) cell injects bias, re-estimates, optionally
//! corrects, and records its metrics.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::accumulator::{CellRecord, Correction, CorrectionMode, Corrections, ResultAccumulator};
use crate::bias::{InjectParams, PopularityTable, introduce_popularity_bias};
use crate::clock::Stopwatch;
use crate::error::SweepError;
use crate::estimate::normalized_error;
use crate::toolkit::{ChainToolkit, StandardToolkit};
use crate::types::{ChainTable, TransitionMatrix};

// === CONSTANTS ===

/// Missing fractions per direction.
pub const SWEEP_POINTS: usize = 50;
/// Prevalence ratios drawn per state when weighting the ground truth.
pub const PREVALENCE_RATIOS_PER_STATE: usize = 2;
/// Removal directions, least-popular-first then most-popular-first.
pub const DIRECTIONS: [bool; 2] = [true, false];

// === CONFIG ===

/// Parameters of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(from_wasm_abi)]
#[serde(default)]
pub struct SweepConfig {
    /// Number of states in the chain.
    pub states: usize,
    /// Agents (rows).
    pub n: usize,
    /// Time steps per agent (columns).
    pub t: usize,
    /// Inclusive range of missing fractions swept.
    pub pct_range: (f64, f64),
    /// Run forward imputation on each corrupted grid.
    pub imputation: bool,
    /// Run EM on each corrupted grid.
    pub optimization: bool,
    pub em_iterations: usize,
    pub tol: f64,
    /// Fractions per direction.
    pub points: usize,
    /// Seed for the experiment RNG; drawn from the thread RNG when unset.
    pub seed: Option<u64>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            states: 3,
            n: 50,
            t: 20,
            pct_range: (0.0, 0.5),
            imputation: false,
            optimization: false,
            em_iterations: 100,
            tol: 1e-6,
            points: SWEEP_POINTS,
            seed: None,
        }
    }
}

impl SweepConfig {
    pub fn from_json(json: &str) -> Result<Self, SweepError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SweepError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn mode(&self) -> CorrectionMode {
        CorrectionMode::from_flags(self.imputation, self.optimization)
    }

    /// Grid cells the sweep will produce.
    pub fn cell_count(&self) -> usize {
        DIRECTIONS.len() * self.points
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        let invalid = |msg: String| Err(SweepError::InvalidConfig(msg));
        if self.states == 0 || self.n == 0 || self.t == 0 {
            return invalid(format!(
                "states, n and t must be positive (states={}, n={}, t={})",
                self.states, self.n, self.t
            ));
        }
        if self.points == 0 {
            return invalid("points must be positive".to_string());
        }
        let (lo, hi) = self.pct_range;
        for pct in [lo, hi] {
            if !pct.is_finite() || !(0.0..=1.0).contains(&pct) {
                return invalid(format!("pct_range endpoints must lie in [0, 1], got {}", pct));
            }
        }
        if !self.tol.is_finite() || self.tol <= 0.0 {
            return invalid(format!("tol must be positive, got {}", self.tol));
        }
        Ok(())
    }
}

/// `num` evenly spaced values from `start` to `end`, both included.
pub fn linspace(start: f64, end: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (num - 1) as f64;
            let mut values: Vec<f64> = (0..num).map(|i| start + i as f64 * step).collect();
            values[num - 1] = end;
            values
        }
    }
}

// === DRIVER ===

/// Shared, read-only state for every cell of one sweep.
struct GroundTruth {
    /// Matrix every estimate is scored against.
    truth: TransitionMatrix,
    chain: ChainTable,
    popularity: PopularityTable,
}

fn build_ground_truth<K: ChainToolkit, R: Rng>(
    toolkit: &K,
    rng: &mut R,
    config: &SweepConfig,
) -> Result<GroundTruth, SweepError> {
    let states = config.states;
    let truth = toolkit.generate_standard_transition_matrix(rng, states)?;
    let ratios = toolkit.generate_random_prevalence_ratios(rng, states, PREVALENCE_RATIOS_PER_STATE)?;
    let weighted = toolkit.construct_weighted_transition_matrix(&truth, &ratios)?;
    let distribution = toolkit.generate_custom_initial_distribution(states, &ratios)?;
    let initial_states = toolkit.generate_initial_states(rng, &weighted, config.n, &distribution)?;
    let chain = toolkit.generate_markov_chains(rng, &weighted, &initial_states, config.t, config.n)?;
    let popularity = PopularityTable::from_grid(&chain.grid, states);

    #[cfg(feature = "instrument")]
    tracing::info!(
        target: "sweep_setup",
        states = states as u64,
        n = config.n as u64,
        t = config.t as u64,
        popularity = ?popularity.probabilities(),
        least_popular = popularity.ranked(true).first().copied().unwrap_or(0) as u64,
        most_popular = popularity.ranked(false).first().copied().unwrap_or(0) as u64,
    );

    Ok(GroundTruth {
        truth,
        chain,
        popularity,
    })
}

fn run_cell<K: ChainToolkit, R: Rng>(
    toolkit: &K,
    rng: &mut R,
    config: &SweepConfig,
    ground: &GroundTruth,
    ascending: bool,
    pct: f64,
) -> Result<CellRecord, SweepError> {
    let (states, n, t) = (config.states, config.n, config.t);
    let params = InjectParams {
        desired_missing_pct: pct,
        n,
        t,
        ascending,
    };
    let corrupted = introduce_popularity_bias(rng, &ground.chain, &ground.popularity, &params)?;

    let watch = Stopwatch::start();
    let estimated = toolkit.extract_transition_matrix(&corrupted, states)?;
    let elapsed = watch.elapsed_secs();

    // Imputation builds on the baseline estimate
    let imputed = if config.imputation {
        let filled = toolkit.forward_algorithm(&corrupted, &estimated, t, states)?;
        let estimate = toolkit.extract_transition_matrix(&filled, states)?;
        Some((estimate, watch.elapsed_secs()))
    } else {
        None
    };

    // EM starts from the raw corrupted grid; its clock still runs from the
    // baseline start, so it includes baseline and imputation time.
    let optimized = if config.optimization {
        let estimate = toolkit.em_algorithm(&corrupted, n, t, states, config.em_iterations, config.tol)?;
        Some((estimate, watch.elapsed_secs()))
    } else {
        None
    };

    let score = |(estimate, elapsed): (TransitionMatrix, f64)| -> Result<Correction, SweepError> {
        Ok(Correction {
            error: normalized_error(&estimate, &ground.truth)?,
            elapsed,
        })
    };

    Ok(CellRecord {
        states,
        missing_pct: pct,
        elapsed,
        kl_divergence: toolkit.kl_divergence(&estimated, &ground.truth, states)?,
        normalized_error: normalized_error(&estimated, &ground.truth)?,
        ascending,
        agents: n,
        observations: t,
        corrections: Corrections::from_parts(
            imputed.map(score).transpose()?,
            optimized.map(score).transpose()?,
        ),
    })
}

/// Run a full sweep with the given collaborators and RNG.
///
/// Cells run directions-major: every fraction least-popular-first, then every
/// fraction most-popular-first. The first failing step aborts the sweep and
/// its error is returned; no partial accumulator escapes.
pub fn run_popularity_sweep<K: ChainToolkit, R: Rng>(
    toolkit: &K,
    rng: &mut R,
    config: &SweepConfig,
) -> Result<ResultAccumulator, SweepError> {
    config.validate()?;
    let ground = build_ground_truth(toolkit, rng, config)?;
    let fractions = linspace(config.pct_range.0, config.pct_range.1, config.points);

    let mut results = ResultAccumulator::new(config.mode());
    for ascending in DIRECTIONS {
        for &pct in &fractions {
            let record = run_cell(toolkit, rng, config, &ground, ascending, pct)?;

            #[cfg(feature = "instrument")]
            {
                let imputed = record.corrections.imputed();
                let optimized = record.corrections.optimized();
                tracing::info!(
                    target: "cell",
                    ascending = ascending,
                    missing_pct = pct,
                    elapsed = record.elapsed,
                    kl_divergence = record.kl_divergence,
                    normalized_error = record.normalized_error,
                    imputed_error = imputed.map(|c| c.error).unwrap_or(f64::NAN),
                    optimized_error = optimized.map(|c| c.error).unwrap_or(f64::NAN),
                );
            }

            results.append_row(&record)?;
        }
    }

    Ok(results)
}

/// Run a sweep with [`StandardToolkit`], seeding from `config.seed` when set.
pub fn process_popularity(config: &SweepConfig) -> Result<ResultAccumulator, SweepError> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };
    run_popularity_sweep(&StandardToolkit, &mut rng, config)
}
