use ndarray::Array2;

/// A category label. Valid labels lie in `[0, states)`.
pub type State = u32;

/// Row-stochastic `states × states` transition matrix.
pub type TransitionMatrix = Array2<f64>;

// ============================================================================
// ObservationGrid - N agents × T time steps, `None` marks a missing cell
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationGrid {
    cells: Array2<Option<State>>,
}

impl ObservationGrid {
    pub fn new(cells: Array2<Option<State>>) -> Self {
        Self { cells }
    }

    /// Fully observed grid from per-agent rows. Rows must share a length.
    pub fn from_rows(rows: &[Vec<State>]) -> Option<Self> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != width) {
            return None;
        }
        let cells = Array2::from_shape_fn((rows.len(), width), |(i, j)| Some(rows[i][j]));
        Some(Self { cells })
    }

    /// (agents, steps)
    pub fn dim(&self) -> (usize, usize) {
        self.cells.dim()
    }

    pub fn agents(&self) -> usize {
        self.cells.nrows()
    }

    pub fn steps(&self) -> usize {
        self.cells.ncols()
    }

    pub fn cells(&self) -> &Array2<Option<State>> {
        &self.cells
    }

    pub fn get(&self, agent: usize, step: usize) -> Option<State> {
        self.cells.get((agent, step)).copied().flatten()
    }

    pub(crate) fn clear(&mut self, agent: usize, step: usize) {
        if let Some(cell) = self.cells.get_mut((agent, step)) {
            *cell = None;
        }
    }

    /// Number of cells holding `state`.
    pub fn count(&self, state: State) -> usize {
        self.cells.iter().filter(|c| **c == Some(state)).count()
    }

    pub fn missing_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_none()).count()
    }

    /// Row-major positions of every cell holding `state`.
    pub fn positions_of(&self, state: State) -> Vec<(usize, usize)> {
        self.cells
            .indexed_iter()
            .filter(|(_, c)| **c == Some(state))
            .map(|(pos, _)| pos)
            .collect()
    }

    /// Highest label present, if any cell is observed.
    pub fn max_label(&self) -> Option<State> {
        self.cells.iter().flatten().copied().max()
    }

    pub fn row(&self, agent: usize) -> impl Iterator<Item = Option<State>> + '_ {
        self.cells.row(agent).into_iter().copied()
    }
}

// ============================================================================
// ChainTable - simulated trajectories plus their identifier column
// ============================================================================

/// Simulated agent trajectories. `agent_ids` is the identifier column; only
/// `grid` is ever subject to corruption.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTable {
    pub agent_ids: Vec<u64>,
    pub grid: ObservationGrid,
}

impl ChainTable {
    /// Table with ids `0..N` for a grid of N agents.
    pub fn with_sequential_ids(grid: ObservationGrid) -> Self {
        let agent_ids = (0..grid.agents() as u64).collect();
        Self { agent_ids, grid }
    }

    pub fn agents(&self) -> usize {
        self.agent_ids.len()
    }
}
