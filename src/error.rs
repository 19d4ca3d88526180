use thiserror::Error;

use crate::circuit::ElementId;

/// Failures of a single linear solve.
///
/// [`crate::mna::solve`] never returns these; it logs them and falls back to
/// an all-zero solution. [`crate::mna::try_solve`] surfaces them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("system is singular: zero pivot in the triangular factor")]
    Singular,

    #[error("solution contains non-finite values")]
    NonFinite,

    #[error("decomposition failed: {0}")]
    Decomposition(String),

    #[error("dimension mismatch: matrix is {rows}x{cols}, rhs has {rhs} entries")]
    DimensionMismatch { rows: usize, cols: usize, rhs: usize },
}

/// Invalid integrator configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegratorError {
    #[error("min_dt must be positive and finite, got {0}")]
    InvalidMinDt(f64),

    #[error("error_threshold must be positive and finite, got {0}")]
    InvalidErrorThreshold(f64),
}

/// Problems found by [`crate::circuit::Circuit::validate`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CircuitError {
    #[error("duplicate element id {0}")]
    DuplicateElement(ElementId),

    #[error("element {0} not found")]
    UnknownElement(ElementId),

    #[error("element {id} has invalid {parameter}: {value}")]
    InvalidParameter {
        id: ElementId,
        parameter: &'static str,
        value: f64,
    },
}
