//! Column-oriented sweep results.
//!
//! One column per metric, one row per grid cell. Columns only grow through
//! [`ResultAccumulator::append_row`], which writes a whole row or nothing.

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::error::SweepError;

/// Column names in output order.
pub const COLUMN_NAMES: [&str; 12] = [
    "states",
    "missing_pct",
    "elapsed",
    "kl_divergence",
    "normalized_error",
    "ascending",
    "agents",
    "observations",
    "imputed_error",
    "optimized_error",
    "optimized_elapsed",
    "imputed_elapsed",
];

/// Which correction strategies a sweep runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionMode {
    BaselineOnly,
    WithImputation,
    WithOptimization,
    Both,
}

impl CorrectionMode {
    pub fn from_flags(imputation: bool, optimization: bool) -> Self {
        match (imputation, optimization) {
            (false, false) => CorrectionMode::BaselineOnly,
            (true, false) => CorrectionMode::WithImputation,
            (false, true) => CorrectionMode::WithOptimization,
            (true, true) => CorrectionMode::Both,
        }
    }

    pub fn imputation(self) -> bool {
        matches!(self, CorrectionMode::WithImputation | CorrectionMode::Both)
    }

    pub fn optimization(self) -> bool {
        matches!(self, CorrectionMode::WithOptimization | CorrectionMode::Both)
    }

    pub fn name(self) -> &'static str {
        match self {
            CorrectionMode::BaselineOnly => "BaselineOnly",
            CorrectionMode::WithImputation => "WithImputation",
            CorrectionMode::WithOptimization => "WithOptimization",
            CorrectionMode::Both => "Both",
        }
    }
}

/// Error and elapsed time of one correction strategy in one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub error: f64,
    pub elapsed: f64,
}

/// Correction results for one cell, shaped by what ran.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Corrections {
    BaselineOnly,
    WithImputation { imputed: Correction },
    WithOptimization { optimized: Correction },
    Both { imputed: Correction, optimized: Correction },
}

impl Corrections {
    pub fn from_parts(imputed: Option<Correction>, optimized: Option<Correction>) -> Self {
        match (imputed, optimized) {
            (None, None) => Corrections::BaselineOnly,
            (Some(imputed), None) => Corrections::WithImputation { imputed },
            (None, Some(optimized)) => Corrections::WithOptimization { optimized },
            (Some(imputed), Some(optimized)) => Corrections::Both { imputed, optimized },
        }
    }

    pub fn mode(&self) -> CorrectionMode {
        match self {
            Corrections::BaselineOnly => CorrectionMode::BaselineOnly,
            Corrections::WithImputation { .. } => CorrectionMode::WithImputation,
            Corrections::WithOptimization { .. } => CorrectionMode::WithOptimization,
            Corrections::Both { .. } => CorrectionMode::Both,
        }
    }

    pub fn imputed(&self) -> Option<Correction> {
        match self {
            Corrections::WithImputation { imputed } | Corrections::Both { imputed, .. } => Some(*imputed),
            _ => None,
        }
    }

    pub fn optimized(&self) -> Option<Correction> {
        match self {
            Corrections::WithOptimization { optimized } | Corrections::Both { optimized, .. } => {
                Some(*optimized)
            }
            _ => None,
        }
    }
}

/// Everything measured in one grid cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellRecord {
    pub states: usize,
    pub missing_pct: f64,
    /// Seconds spent estimating from the corrupted grid.
    pub elapsed: f64,
    pub kl_divergence: f64,
    pub normalized_error: f64,
    /// Removal direction: `true` = least popular first.
    pub ascending: bool,
    pub agents: usize,
    pub observations: usize,
    pub corrections: Corrections,
}

/// Plain serializable copy of every column, in output order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct SweepColumns {
    pub states: Vec<u64>,
    pub missing_pct: Vec<f64>,
    pub elapsed: Vec<f64>,
    pub kl_divergence: Vec<f64>,
    pub normalized_error: Vec<f64>,
    pub ascending: Vec<bool>,
    pub agents: Vec<u64>,
    pub observations: Vec<u64>,
    pub imputed_error: Vec<f64>,
    pub optimized_error: Vec<f64>,
    pub optimized_elapsed: Vec<f64>,
    pub imputed_elapsed: Vec<f64>,
}

/// Sweep output. Every column active under `mode` has `len()` entries;
/// inactive correction columns stay empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultAccumulator {
    mode: CorrectionMode,
    columns: SweepColumns,
}

impl ResultAccumulator {
    pub fn new(mode: CorrectionMode) -> Self {
        Self {
            mode,
            columns: SweepColumns::default(),
        }
    }

    pub fn mode(&self) -> CorrectionMode {
        self.mode
    }

    /// Number of rows (grid cells) recorded.
    pub fn len(&self) -> usize {
        self.columns.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one cell's values to every active column. A record whose
    /// corrections don't match the accumulator's mode is rejected and nothing
    /// is written.
    pub fn append_row(&mut self, record: &CellRecord) -> Result<(), SweepError> {
        let found = record.corrections.mode();
        if found != self.mode {
            return Err(SweepError::RowShape {
                expected: self.mode.name(),
                found: found.name(),
            });
        }

        let c = &mut self.columns;
        c.states.push(record.states as u64);
        c.missing_pct.push(record.missing_pct);
        c.elapsed.push(record.elapsed);
        c.kl_divergence.push(record.kl_divergence);
        c.normalized_error.push(record.normalized_error);
        c.ascending.push(record.ascending);
        c.agents.push(record.agents as u64);
        c.observations.push(record.observations as u64);
        if let Some(imputed) = record.corrections.imputed() {
            c.imputed_error.push(imputed.error);
            c.imputed_elapsed.push(imputed.elapsed);
        }
        if let Some(optimized) = record.corrections.optimized() {
            c.optimized_error.push(optimized.error);
            c.optimized_elapsed.push(optimized.elapsed);
        }
        Ok(())
    }

    pub fn states(&self) -> &[u64] {
        &self.columns.states
    }

    pub fn missing_pct(&self) -> &[f64] {
        &self.columns.missing_pct
    }

    pub fn elapsed(&self) -> &[f64] {
        &self.columns.elapsed
    }

    pub fn kl_divergence(&self) -> &[f64] {
        &self.columns.kl_divergence
    }

    pub fn normalized_error(&self) -> &[f64] {
        &self.columns.normalized_error
    }

    pub fn ascending(&self) -> &[bool] {
        &self.columns.ascending
    }

    pub fn agents(&self) -> &[u64] {
        &self.columns.agents
    }

    pub fn observations(&self) -> &[u64] {
        &self.columns.observations
    }

    pub fn imputed_error(&self) -> &[f64] {
        &self.columns.imputed_error
    }

    pub fn optimized_error(&self) -> &[f64] {
        &self.columns.optimized_error
    }

    pub fn optimized_elapsed(&self) -> &[f64] {
        &self.columns.optimized_elapsed
    }

    pub fn imputed_elapsed(&self) -> &[f64] {
        &self.columns.imputed_elapsed
    }

    /// Whether column `idx` (in [`COLUMN_NAMES`] order) is filled under this
    /// accumulator's mode.
    pub fn is_active(&self, idx: usize) -> bool {
        match idx {
            0..=7 => true,
            8 | 11 => self.mode.imputation(),
            9 | 10 => self.mode.optimization(),
            _ => false,
        }
    }

    /// Lengths of all twelve columns, in output order.
    pub fn column_lengths(&self) -> [usize; 12] {
        let c = &self.columns;
        [
            c.states.len(),
            c.missing_pct.len(),
            c.elapsed.len(),
            c.kl_divergence.len(),
            c.normalized_error.len(),
            c.ascending.len(),
            c.agents.len(),
            c.observations.len(),
            c.imputed_error.len(),
            c.optimized_error.len(),
            c.optimized_elapsed.len(),
            c.imputed_elapsed.len(),
        ]
    }

    /// Reassemble row `i`.
    pub fn row(&self, i: usize) -> Option<CellRecord> {
        let c = &self.columns;
        if i >= self.len() {
            return None;
        }
        let imputed = self.mode.imputation().then(|| Correction {
            error: c.imputed_error[i],
            elapsed: c.imputed_elapsed[i],
        });
        let optimized = self.mode.optimization().then(|| Correction {
            error: c.optimized_error[i],
            elapsed: c.optimized_elapsed[i],
        });
        Some(CellRecord {
            states: c.states[i] as usize,
            missing_pct: c.missing_pct[i],
            elapsed: c.elapsed[i],
            kl_divergence: c.kl_divergence[i],
            normalized_error: c.normalized_error[i],
            ascending: c.ascending[i],
            agents: c.agents[i] as usize,
            observations: c.observations[i] as usize,
            corrections: Corrections::from_parts(imputed, optimized),
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = CellRecord> + '_ {
        (0..self.len()).filter_map(|i| self.row(i))
    }

    pub fn columns(&self) -> &SweepColumns {
        &self.columns
    }

    pub fn into_columns(self) -> SweepColumns {
        self.columns
    }
}

#[cfg(feature = "instrument")]
impl ResultAccumulator {
    /// Active columns as an [`instrument::ColumnTable`], in output order.
    pub fn to_table(&self) -> instrument::PolarsResult<instrument::ColumnTable> {
        use instrument::Column;

        let c = &self.columns;
        let all = [
            Column::U64(c.states.clone()),
            Column::F64(c.missing_pct.clone()),
            Column::F64(c.elapsed.clone()),
            Column::F64(c.kl_divergence.clone()),
            Column::F64(c.normalized_error.clone()),
            Column::Bool(c.ascending.clone()),
            Column::U64(c.agents.clone()),
            Column::U64(c.observations.clone()),
            Column::F64(c.imputed_error.clone()),
            Column::F64(c.optimized_error.clone()),
            Column::F64(c.optimized_elapsed.clone()),
            Column::F64(c.imputed_elapsed.clone()),
        ];
        let columns = COLUMN_NAMES
            .iter()
            .zip(all)
            .enumerate()
            .filter(|(i, _)| self.is_active(*i))
            .map(|(_, (name, col))| (name.to_string(), col))
            .collect();

        instrument::ColumnTable::from_columns(columns)
    }

    /// Active columns as a polars DataFrame.
    pub fn to_dataframe(&self) -> instrument::PolarsResult<instrument::DataFrame> {
        self.to_table()?.to_dataframe()
    }
}
