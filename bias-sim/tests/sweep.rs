//! End-to-end sweep behaviour: output shape, cell order, collaborator wiring,
//! error propagation and timing.

use std::cell::{Cell, RefCell};
use std::time::Duration;

use bias_sim::estimate::kl_divergence;
use bias_sim::{
    COLUMN_NAMES, ChainError, ChainToolkit, CorrectionMode, ObservationGrid, ResultAccumulator,
    StandardToolkit, SweepConfig, SweepError, TransitionMatrix, linspace, process_popularity,
    run_popularity_sweep,
};
use ndarray::array;
use rand::SeedableRng;
use rand::rngs::StdRng;

// === FIXTURES ===

fn small_config() -> SweepConfig {
    SweepConfig {
        n: 12,
        t: 8,
        points: 4,
        seed: Some(5),
        ..SweepConfig::default()
    }
}

fn fixed_truth() -> TransitionMatrix {
    array![[0.6, 0.3, 0.1], [0.2, 0.5, 0.3], [0.25, 0.25, 0.5]]
}

/// Hands back the same matrix for ground truth and every estimate.
struct PerfectEstimator;

impl ChainToolkit for PerfectEstimator {
    fn generate_standard_transition_matrix<R: rand::Rng>(
        &self,
        _rng: &mut R,
        _states: usize,
    ) -> Result<TransitionMatrix, ChainError> {
        Ok(fixed_truth())
    }

    fn extract_transition_matrix(
        &self,
        _grid: &ObservationGrid,
        _states: usize,
    ) -> Result<TransitionMatrix, ChainError> {
        Ok(fixed_truth())
    }

    fn em_algorithm(
        &self,
        _grid: &ObservationGrid,
        _n: usize,
        _t: usize,
        _states: usize,
        _iterations: usize,
        _tol: f64,
    ) -> Result<TransitionMatrix, ChainError> {
        Ok(fixed_truth())
    }
}

/// Fails the n-th baseline extraction (0-based).
struct FailingExtraction {
    fail_at: usize,
    calls: Cell<usize>,
}

impl ChainToolkit for FailingExtraction {
    fn extract_transition_matrix(
        &self,
        grid: &ObservationGrid,
        states: usize,
    ) -> Result<TransitionMatrix, ChainError> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        if call == self.fail_at {
            return Err(ChainError::InvalidDistribution("estimator diverged".to_string()));
        }
        StandardToolkit.extract_transition_matrix(grid, states)
    }
}

/// Adds a pause to each correction so the timing relations are strict.
struct SlowCorrections;

impl ChainToolkit for SlowCorrections {
    fn forward_algorithm(
        &self,
        grid: &ObservationGrid,
        estimate: &TransitionMatrix,
        t: usize,
        states: usize,
    ) -> Result<ObservationGrid, ChainError> {
        std::thread::sleep(Duration::from_millis(2));
        StandardToolkit.forward_algorithm(grid, estimate, t, states)
    }

    fn em_algorithm(
        &self,
        grid: &ObservationGrid,
        n: usize,
        t: usize,
        states: usize,
        iterations: usize,
        tol: f64,
    ) -> Result<TransitionMatrix, ChainError> {
        std::thread::sleep(Duration::from_millis(2));
        StandardToolkit.em_algorithm(grid, n, t, states, iterations, tol)
    }
}

fn assert_active_lengths(results: &ResultAccumulator, rows: usize) {
    for (idx, (name, len)) in COLUMN_NAMES
        .iter()
        .zip(results.column_lengths())
        .enumerate()
    {
        let expected = if results.is_active(idx) { rows } else { 0 };
        assert_eq!(len, expected, "column {} has the wrong length", name);
    }
}

// === SHAPE ===

#[test]
fn default_sweep_has_one_hundred_rows_and_empty_corrections() {
    let config = SweepConfig {
        seed: Some(42),
        ..SweepConfig::default()
    };
    let results = process_popularity(&config).unwrap();

    assert_eq!(results.len(), 100);
    assert_eq!(results.mode(), CorrectionMode::BaselineOnly);
    assert_active_lengths(&results, 100);
    assert!(results.imputed_error().is_empty());
    assert!(results.optimized_error().is_empty());
    assert!(results.optimized_elapsed().is_empty());
    assert!(results.imputed_elapsed().is_empty());

    assert!(results.states().iter().all(|&s| s == 3));
    assert!(results.agents().iter().all(|&n| n == 50));
    assert!(results.observations().iter().all(|&t| t == 20));
}

#[test]
fn both_corrections_fill_all_twelve_columns() {
    let config = SweepConfig {
        imputation: true,
        optimization: true,
        em_iterations: 20,
        ..small_config()
    };
    let results = process_popularity(&config).unwrap();

    assert_eq!(results.mode(), CorrectionMode::Both);
    assert_eq!(results.column_lengths(), [8; 12]);
    assert!(results.imputed_error().iter().all(|e| e.is_finite() && *e >= 0.0));
    assert!(results.optimized_error().iter().all(|e| e.is_finite() && *e >= 0.0));
}

#[test]
fn single_correction_leaves_the_other_pair_empty() {
    let imputed = process_popularity(&SweepConfig {
        imputation: true,
        ..small_config()
    })
    .unwrap();
    assert_active_lengths(&imputed, 8);
    assert_eq!(imputed.imputed_elapsed().len(), 8);
    assert!(imputed.optimized_error().is_empty());

    let optimized = process_popularity(&SweepConfig {
        optimization: true,
        em_iterations: 10,
        ..small_config()
    })
    .unwrap();
    assert_active_lengths(&optimized, 8);
    assert_eq!(optimized.optimized_elapsed().len(), 8);
    assert!(optimized.imputed_error().is_empty());
}

// === CELL ORDER ===

#[test]
fn cells_run_least_popular_first_then_most_popular_first() {
    let config = SweepConfig {
        seed: Some(3),
        ..SweepConfig::default()
    };
    let results = process_popularity(&config).unwrap();

    let (first, second) = results.ascending().split_at(50);
    assert!(first.iter().all(|&a| a));
    assert!(second.iter().all(|&a| !a));

    let fractions = linspace(0.0, 0.5, 50);
    assert_eq!(&results.missing_pct()[..50], fractions.as_slice());
    assert_eq!(&results.missing_pct()[50..], fractions.as_slice());
}

#[test]
fn single_point_sweeps_the_range_start() {
    let config = SweepConfig {
        points: 1,
        pct_range: (0.2, 0.4),
        ..small_config()
    };
    let results = process_popularity(&config).unwrap();
    assert_eq!(results.missing_pct(), &[0.2, 0.2]);
    assert_eq!(results.ascending(), &[true, false]);
}

// === METRICS ===

#[test]
fn errors_are_measured_against_the_ground_truth_matrix() {
    let mut rng = StdRng::seed_from_u64(11);
    let config = SweepConfig {
        optimization: true,
        ..small_config()
    };
    let results = run_popularity_sweep(&PerfectEstimator, &mut rng, &config).unwrap();

    assert!(results.kl_divergence().iter().all(|&kl| kl.abs() < 1e-9));
    assert!(results.normalized_error().iter().all(|&e| e == 0.0));
    assert!(results.optimized_error().iter().all(|&e| e == 0.0));
}

#[test]
fn zero_missing_fraction_reproduces_the_sampled_chain() {
    // With nothing removed, every estimate sees the complete chain, so both
    // directions must score identically at pct 0.
    let config = SweepConfig {
        points: 3,
        ..small_config()
    };
    let results = process_popularity(&config).unwrap();
    let rows: Vec<_> = results.rows().collect();

    assert_eq!(rows[0].missing_pct, 0.0);
    assert_eq!(rows[3].missing_pct, 0.0);
    assert_eq!(rows[0].kl_divergence, rows[3].kl_divergence);
    assert_eq!(rows[0].normalized_error, rows[3].normalized_error);
}

#[test]
fn optimized_clock_includes_baseline_and_imputation() {
    let mut rng = StdRng::seed_from_u64(8);
    let config = SweepConfig {
        imputation: true,
        optimization: true,
        em_iterations: 5,
        points: 2,
        ..small_config()
    };
    let results = run_popularity_sweep(&SlowCorrections, &mut rng, &config).unwrap();

    for row in results.rows() {
        let imputed = row.corrections.imputed().unwrap();
        let optimized = row.corrections.optimized().unwrap();
        assert!(imputed.elapsed >= row.elapsed + 0.002);
        assert!(optimized.elapsed >= imputed.elapsed + 0.002);
    }
}

// === WIRING ===

/// A distinct row-stochastic matrix for every extraction call.
fn numbered_estimate(call: usize) -> TransitionMatrix {
    let base = array![[0.5, 0.3, 0.2], [0.2, 0.5, 0.3], [0.3, 0.2, 0.5]];
    let w = call as f64 / (call as f64 + 10.0);
    base.mapv(|p| (1.0 - w) * p + w / 3.0)
}

/// Records what each collaborator is handed. Ground truth is
/// [`fixed_truth`]; every extraction returns a fresh [`numbered_estimate`].
#[derive(Default)]
struct RecordingToolkit {
    extracted: RefCell<Vec<TransitionMatrix>>,
    imputed_from: RefCell<Vec<TransitionMatrix>>,
    imputation_grids: RefCell<Vec<ObservationGrid>>,
    em_grids: RefCell<Vec<ObservationGrid>>,
}

impl ChainToolkit for RecordingToolkit {
    fn generate_standard_transition_matrix<R: rand::Rng>(
        &self,
        _rng: &mut R,
        _states: usize,
    ) -> Result<TransitionMatrix, ChainError> {
        Ok(fixed_truth())
    }

    fn extract_transition_matrix(
        &self,
        _grid: &ObservationGrid,
        _states: usize,
    ) -> Result<TransitionMatrix, ChainError> {
        let mut extracted = self.extracted.borrow_mut();
        let estimate = numbered_estimate(extracted.len());
        extracted.push(estimate.clone());
        Ok(estimate)
    }

    fn forward_algorithm(
        &self,
        grid: &ObservationGrid,
        estimate: &TransitionMatrix,
        t: usize,
        states: usize,
    ) -> Result<ObservationGrid, ChainError> {
        self.imputed_from.borrow_mut().push(estimate.clone());
        self.imputation_grids.borrow_mut().push(grid.clone());
        StandardToolkit.forward_algorithm(grid, estimate, t, states)
    }

    fn em_algorithm(
        &self,
        grid: &ObservationGrid,
        _n: usize,
        _t: usize,
        _states: usize,
        _iterations: usize,
        _tol: f64,
    ) -> Result<TransitionMatrix, ChainError> {
        self.em_grids.borrow_mut().push(grid.clone());
        Ok(fixed_truth())
    }
}

fn recorded_sweep() -> (RecordingToolkit, ResultAccumulator) {
    let toolkit = RecordingToolkit::default();
    let mut rng = StdRng::seed_from_u64(13);
    let config = SweepConfig {
        imputation: true,
        optimization: true,
        points: 3,
        pct_range: (0.2, 0.4),
        ..small_config()
    };
    let results = run_popularity_sweep(&toolkit, &mut rng, &config).unwrap();
    (toolkit, results)
}

#[test]
fn imputation_starts_from_the_baseline_estimate() {
    let (toolkit, results) = recorded_sweep();
    let extracted = toolkit.extracted.borrow();
    let imputed_from = toolkit.imputed_from.borrow();

    // Each cell extracts twice: the baseline, then the imputed grid.
    assert_eq!(extracted.len(), 2 * results.len());
    assert_eq!(imputed_from.len(), results.len());
    for (cell, estimate) in imputed_from.iter().enumerate() {
        assert_eq!(estimate, &extracted[2 * cell], "cell {}", cell);
    }
}

#[test]
fn em_starts_from_the_corrupted_grid() {
    let (toolkit, results) = recorded_sweep();
    let em_grids = toolkit.em_grids.borrow();
    let imputation_grids = toolkit.imputation_grids.borrow();

    assert_eq!(em_grids.len(), results.len());
    for (cell, grid) in em_grids.iter().enumerate() {
        assert!(grid.missing_count() > 0, "cell {} handed EM a complete grid", cell);
        assert_eq!(grid, &imputation_grids[cell]);
    }
}

#[test]
fn kl_divergence_scores_estimate_against_truth() {
    let (toolkit, results) = recorded_sweep();
    let extracted = toolkit.extracted.borrow();
    let truth = fixed_truth();

    for (cell, &kl) in results.kl_divergence().iter().enumerate() {
        let estimate = &extracted[2 * cell];
        let forward = kl_divergence(estimate, &truth, 3).unwrap();
        let reverse = kl_divergence(&truth, estimate, 3).unwrap();
        assert_ne!(forward, reverse);
        assert_eq!(kl, forward, "cell {}", cell);
    }
}

#[test]
fn recorded_rows_match_the_column_view() {
    let (_, results) = recorded_sweep();
    let columns = results.columns();
    for (i, row) in results.rows().enumerate() {
        assert_eq!(columns.kl_divergence[i], row.kl_divergence);
        assert_eq!(columns.imputed_error[i], row.corrections.imputed().unwrap().error);
        assert_eq!(columns.optimized_elapsed[i], row.corrections.optimized().unwrap().elapsed);
    }
    assert_eq!(results.clone().into_columns(), *columns);
}

// === FAILURES ===

#[test]
fn collaborator_failure_aborts_the_sweep() {
    let toolkit = FailingExtraction {
        fail_at: 2,
        calls: Cell::new(0),
    };
    let mut rng = StdRng::seed_from_u64(1);
    let result = run_popularity_sweep(&toolkit, &mut rng, &small_config());

    assert_eq!(
        result,
        Err(SweepError::Collaborator(ChainError::InvalidDistribution(
            "estimator diverged".to_string()
        )))
    );
    // Nothing ran past the failing cell.
    assert_eq!(toolkit.calls.get(), 3);
}

#[test]
fn invalid_config_fails_before_any_work() {
    let toolkit = FailingExtraction {
        fail_at: 0,
        calls: Cell::new(0),
    };
    let mut rng = StdRng::seed_from_u64(1);
    let config = SweepConfig {
        pct_range: (-0.1, 0.5),
        ..small_config()
    };

    let result = run_popularity_sweep(&toolkit, &mut rng, &config);
    assert!(matches!(result, Err(SweepError::InvalidConfig(_))));
    assert_eq!(toolkit.calls.get(), 0);
}

// === DATAFRAME ===

#[cfg(feature = "instrument")]
#[test]
fn dataframe_holds_only_active_columns() {
    let baseline = process_popularity(&small_config()).unwrap();
    let df = baseline.to_dataframe().unwrap();
    assert_eq!(df.height(), 8);
    assert_eq!(df.width(), 8);
    let names: Vec<&str> = df.get_column_names().iter().map(|n| n.as_str()).collect();
    assert_eq!(names, COLUMN_NAMES[..8].to_vec());

    let full = process_popularity(&SweepConfig {
        imputation: true,
        optimization: true,
        em_iterations: 10,
        ..small_config()
    })
    .unwrap();
    let df = full.to_dataframe().unwrap();
    assert_eq!(df.width(), 12);
    assert_eq!(df.height(), 8);
}

#[cfg(feature = "instrument")]
#[test]
fn dataframe_groups_cells_by_direction() {
    use polars::prelude::*;

    let results = process_popularity(&small_config()).unwrap();
    let df = results.to_dataframe().unwrap();

    let by_direction = df
        .clone()
        .lazy()
        .group_by([col("ascending")])
        .agg([
            col("missing_pct").count().alias("cells"),
            col("missing_pct").max().alias("max_pct"),
        ])
        .sort(["ascending"], Default::default())
        .collect()
        .unwrap();
    assert_eq!(by_direction.height(), 2);
    let max_pct = by_direction.column("max_pct").unwrap().f64().unwrap();
    assert_eq!(max_pct.get(0), Some(0.5));
    assert_eq!(max_pct.get(1), Some(0.5));

    let least_popular_first = df
        .lazy()
        .filter(col("ascending").eq(lit(true)))
        .collect()
        .unwrap();
    assert_eq!(least_popular_first.height(), 4);
}
