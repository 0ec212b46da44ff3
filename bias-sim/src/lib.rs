//! Popularity-biased missingness experiments for Markov transition-matrix
//! estimation.
//!
//! A synthetic ground-truth chain is generated, observations are removed with
//! a bias toward the least (or most) frequent states, and the transition
//! matrix is re-estimated from what is left, optionally after imputation or
//! EM. [`process_popularity`] sweeps the missing fraction in both directions
//! and returns one metrics row per cell.

use wasm_bindgen::prelude::*;

pub mod accumulator;
pub mod bias;
pub mod clock;
pub mod error;
pub mod estimate;
pub mod markov;
pub mod recovery;
pub mod sweep;
pub mod toolkit;
pub mod types;

#[cfg(feature = "instrument")]
pub use instrument;

pub use accumulator::{
    COLUMN_NAMES, CellRecord, Correction, CorrectionMode, Corrections, ResultAccumulator,
    SweepColumns,
};
pub use bias::{InjectParams, PopularityTable, introduce_popularity_bias};
pub use error::{BiasError, ChainError, InjectionFault, SweepError};
pub use sweep::{SweepConfig, linspace, process_popularity, run_popularity_sweep};
pub use toolkit::{ChainToolkit, StandardToolkit};
pub use types::{ChainTable, ObservationGrid, State, TransitionMatrix};

// ============================================================================
// WASM API
// ============================================================================

/// Run a full popularity sweep and hand back its columns.
///
/// Missing config fields take their defaults.
#[wasm_bindgen(js_name = runPopularitySweep)]
pub fn run_popularity_sweep_js(config: SweepConfig) -> Result<SweepColumns, JsError> {
    console_error_panic_hook::set_once();
    let results = process_popularity(&config)?;
    Ok(results.into_columns())
}

/// The default sweep config, for UIs that start from it.
#[wasm_bindgen(js_name = defaultSweepConfig)]
pub fn default_sweep_config_js() -> Result<JsValue, JsError> {
    serde_wasm_bindgen::to_value(&SweepConfig::default()).map_err(|e| JsError::new(&e.to_string()))
}
