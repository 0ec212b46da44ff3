use crate::types::State;

/// Failures raised by the chain toolkit (generation, estimation, recovery).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChainError {
    #[error("state space must have at least one state")]
    EmptyStateSpace,

    #[error("dimension mismatch in {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("state {state} outside state space of size {states}")]
    StateOutOfRange { state: State, states: usize },

    #[error("invalid distribution: {0}")]
    InvalidDistribution(String),
}

/// Faults inside the injection algorithm body.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InjectionFault {
    #[error("grid holds label {label} but popularity table covers only {states} states")]
    UnrankedLabel { label: State, states: usize },
}

/// Errors from popularity bias injection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BiasError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("an error occurred during popularity bias introduction: {cause}")]
    Injection {
        #[source]
        cause: InjectionFault,
    },
}

impl From<InjectionFault> for BiasError {
    fn from(cause: InjectionFault) -> Self {
        BiasError::Injection { cause }
    }
}

/// Errors that abort a sweep.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SweepError {
    #[error("invalid sweep config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Bias(#[from] BiasError),

    #[error(transparent)]
    Collaborator(#[from] ChainError),

    #[error("row shape {found} does not match accumulator mode {expected}")]
    RowShape {
        expected: &'static str,
        found: &'static str,
    },
}
