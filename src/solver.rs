use std::time::Instant;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::SolverError;

/// Solver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub method: SolverMethod,
    /// Pivots of R smaller than this fraction of the largest pivot count as zero
    pub pivot_tolerance: f64,
    /// Singular values below this are discarded by the SVD method
    pub svd_epsilon: f64,
    /// Residual norm above which a solve is flagged as unsuccessful
    pub residual_tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            method: SolverMethod::Qr,
            pivot_tolerance: 1e-14,
            svd_epsilon: 1e-12,
            residual_tolerance: 1e-6,
        }
    }
}

/// Available solver methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverMethod {
    /// Householder QR least squares
    Qr,
    /// SVD least squares, tolerant of rank deficiency
    Svd,
}

/// Solver statistics
#[derive(Debug, Clone)]
pub struct SolverStats {
    pub method_used: SolverMethod,
    pub residual_norm: f64,
    pub solve_time: f64,
    pub success: bool,
}

/// Least-squares solver for the (possibly over-determined) MNA system
#[derive(Debug, Clone, Default)]
pub struct LinearSolver {
    config: SolverConfig,
}

impl LinearSolver {
    /// Create a new solver with default configuration
    pub fn new() -> Self {
        LinearSolver {
            config: SolverConfig::default(),
        }
    }

    /// Create a new solver with custom configuration
    pub fn with_config(config: SolverConfig) -> Self {
        LinearSolver { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solve `matrix * x = rhs` in the least-squares sense.
    ///
    /// The matrix may have more rows than columns; the MNA system carries one
    /// redundant KCL row per connected component.
    pub fn solve(&self, matrix: &DMatrix<f64>, rhs: &DVector<f64>) -> Result<(DVector<f64>, SolverStats), SolverError> {
        let start_time = Instant::now();

        if matrix.nrows() != rhs.len() || matrix.nrows() < matrix.ncols() {
            return Err(SolverError::DimensionMismatch {
                rows: matrix.nrows(),
                cols: matrix.ncols(),
                rhs: rhs.len(),
            });
        }

        if matrix.ncols() == 0 {
            let stats = SolverStats {
                method_used: self.config.method,
                residual_norm: 0.0,
                solve_time: 0.0,
                success: true,
            };
            return Ok((DVector::zeros(0), stats));
        }

        let (scaled, scaled_rhs) = equilibrate_rows(matrix, rhs);
        let solution = match self.config.method {
            SolverMethod::Qr => self.solve_qr(scaled, &scaled_rhs)?,
            SolverMethod::Svd => self.solve_svd(scaled, &scaled_rhs)?,
        };

        if solution.iter().any(|x| !x.is_finite()) {
            return Err(SolverError::NonFinite);
        }

        let residual_norm = (matrix * &solution - rhs).norm();
        let stats = SolverStats {
            method_used: self.config.method,
            residual_norm,
            solve_time: start_time.elapsed().as_secs_f64(),
            success: residual_norm < self.config.residual_tolerance,
        };

        Ok((solution, stats))
    }

    /// x = R^-1 Q^T b
    fn solve_qr(&self, matrix: DMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
        let qr = matrix.qr();
        let r = qr.r();

        let largest_pivot = r.diagonal().iter().fold(0.0f64, |acc, x| acc.max(x.abs()));
        let threshold = largest_pivot * self.config.pivot_tolerance;
        if r.diagonal().iter().any(|x| x.abs() <= threshold) {
            return Err(SolverError::Singular);
        }

        let qtb = qr.q().transpose() * rhs;
        r.solve_upper_triangular(&qtb).ok_or(SolverError::Singular)
    }

    fn solve_svd(&self, matrix: DMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
        matrix
            .svd(true, true)
            .solve(rhs, self.config.svd_epsilon)
            .map_err(|e| SolverError::Decomposition(e.to_string()))
    }
}

/// Scale every row to a largest entry of 1 so each equation weighs the same
/// in the least-squares residual. The solution of a consistent system is
/// unchanged.
fn equilibrate_rows(matrix: &DMatrix<f64>, rhs: &DVector<f64>) -> (DMatrix<f64>, DVector<f64>) {
    let mut matrix = matrix.clone();
    let mut rhs = rhs.clone();
    for i in 0..matrix.nrows() {
        let scale = matrix.row(i).amax();
        if scale > 0.0 {
            for x in matrix.row_mut(i).iter_mut() {
                *x /= scale;
            }
            rhs[i] /= scale;
        }
    }
    (matrix, rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_square_qr_solver() {
        let solver = LinearSolver::new();

        // [2 1; 1 2] * [x; y] = [3; 3]
        let matrix = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]);
        let rhs = DVector::from_vec(vec![3.0, 3.0]);

        let (solution, stats) = solver.solve(&matrix, &rhs).unwrap();

        assert_relative_eq!(solution[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(solution[1], 1.0, epsilon = 1e-10);
        assert!(stats.success);
        assert_eq!(stats.method_used, SolverMethod::Qr);
    }

    #[test]
    fn test_overdetermined_consistent_system() {
        let solver = LinearSolver::new();

        // x = 0 plus two KCL rows that only fix y - x
        let matrix = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, -1.0, -1.0, 1.0]);
        let rhs = DVector::from_vec(vec![0.0, -2.0, 2.0]);

        let (solution, stats) = solver.solve(&matrix, &rhs).unwrap();

        assert_relative_eq!(solution[0], 0.0, epsilon = 1e-10);
        assert_relative_eq!(solution[1], 2.0, epsilon = 1e-10);
        assert!(stats.residual_norm < 1e-10);
    }

    #[test]
    fn test_rows_equilibrated() {
        let matrix = DMatrix::from_row_slice(2, 2, &[1e4, -2e4, 0.0, 0.0]);
        let rhs = DVector::from_vec(vec![4e4, 0.0]);

        let (scaled, scaled_rhs) = equilibrate_rows(&matrix, &rhs);

        assert_eq!(scaled.row(0).iter().copied().collect::<Vec<_>>(), vec![0.5, -1.0]);
        assert_eq!(scaled_rhs[0], 2.0);
        assert_eq!(scaled_rhs[1], 0.0);
    }

    #[test]
    fn test_singular_system_reported() {
        let solver = LinearSolver::new();
        let matrix = DMatrix::from_row_slice(2, 2, &[1.0, -1.0, -1.0, 1.0]);
        let rhs = DVector::from_vec(vec![1.0, -1.0]);

        assert_eq!(solver.solve(&matrix, &rhs).unwrap_err(), SolverError::Singular);
    }

    #[test]
    fn test_svd_solver() {
        let solver = LinearSolver::with_config(SolverConfig {
            method: SolverMethod::Svd,
            ..SolverConfig::default()
        });
        let matrix = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 2.0]);
        let rhs = DVector::from_vec(vec![8.0, 1.0]);

        let (solution, stats) = solver.solve(&matrix, &rhs).unwrap();

        assert_relative_eq!(solution[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(solution[1], 0.5, epsilon = 1e-10);
        assert_eq!(stats.method_used, SolverMethod::Svd);
    }

    #[test]
    fn test_dimension_mismatch() {
        let solver = LinearSolver::new();
        let matrix = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        let rhs = DVector::from_vec(vec![1.0]);

        assert!(matches!(
            solver.solve(&matrix, &rhs),
            Err(SolverError::DimensionMismatch { rows: 1, cols: 2, rhs: 1 })
        ));
    }
}
