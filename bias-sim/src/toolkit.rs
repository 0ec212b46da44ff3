//! The seam between the sweep driver and the chain collaborators.
//!
//! Every method has a default that calls this crate's implementation, so
//! [`StandardToolkit`] is an empty impl and a test double only overrides the
//! step it cares about.

use ndarray::Array2;
use rand::Rng;

use crate::error::ChainError;
use crate::types::{ChainTable, ObservationGrid, State, TransitionMatrix};
use crate::{estimate, markov, recovery};

pub trait ChainToolkit {
    fn generate_standard_transition_matrix<R: Rng>(
        &self,
        rng: &mut R,
        states: usize,
    ) -> Result<TransitionMatrix, ChainError> {
        markov::generate_standard_transition_matrix(rng, states)
    }

    fn generate_random_prevalence_ratios<R: Rng>(
        &self,
        rng: &mut R,
        states: usize,
        k: usize,
    ) -> Result<Array2<f64>, ChainError> {
        markov::generate_random_prevalence_ratios(rng, states, k)
    }

    fn construct_weighted_transition_matrix(
        &self,
        matrix: &TransitionMatrix,
        ratios: &Array2<f64>,
    ) -> Result<TransitionMatrix, ChainError> {
        markov::construct_weighted_transition_matrix(matrix, ratios)
    }

    fn generate_custom_initial_distribution(
        &self,
        states: usize,
        ratios: &Array2<f64>,
    ) -> Result<Vec<f64>, ChainError> {
        markov::generate_custom_initial_distribution(states, ratios)
    }

    fn generate_initial_states<R: Rng>(
        &self,
        rng: &mut R,
        matrix: &TransitionMatrix,
        n: usize,
        distribution: &[f64],
    ) -> Result<Vec<State>, ChainError> {
        markov::generate_initial_states(rng, matrix, n, distribution)
    }

    fn generate_markov_chains<R: Rng>(
        &self,
        rng: &mut R,
        matrix: &TransitionMatrix,
        initial_states: &[State],
        t: usize,
        n: usize,
    ) -> Result<ChainTable, ChainError> {
        markov::generate_markov_chains(rng, matrix, initial_states, t, n)
    }

    fn extract_transition_matrix(
        &self,
        grid: &ObservationGrid,
        states: usize,
    ) -> Result<TransitionMatrix, ChainError> {
        estimate::extract_transition_matrix(grid, states)
    }

    fn kl_divergence(
        &self,
        p: &TransitionMatrix,
        q: &TransitionMatrix,
        states: usize,
    ) -> Result<f64, ChainError> {
        estimate::kl_divergence(p, q, states)
    }

    fn forward_algorithm(
        &self,
        grid: &ObservationGrid,
        estimate: &TransitionMatrix,
        t: usize,
        states: usize,
    ) -> Result<ObservationGrid, ChainError> {
        recovery::forward_algorithm(grid, estimate, t, states)
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
        recovery::em_algorithm(grid, n, t, states, iterations, tol)
    }
}

/// The crate's own collaborators, unmodified.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardToolkit;

impl ChainToolkit for StandardToolkit {}
