use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe, catch_unwind};

use faer::Col;
use faer::prelude::Solve;
use faer::sparse::linalg::solvers::Lu;
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::{DMatrix, DVector, Dyn, LU};
use nalgebra_sparse::CsrMatrix;

use crate::error::SolveError;
use crate::numerics::sparse::krylov;
use crate::numerics::timing::{record_factorization, record_linear_solve};
use crate::numerics::{Backend, SolverConfig};

#[derive(Debug)]
pub struct SolverResult {
    pub solution: DVector<f64>,
    pub iterations: usize,
    /// `||A x - b||` of the returned solution.
    pub residual: f64,
    /// Whether a new factorization was computed for this solve.
    pub refactorized: bool,
}

/// Running counters of a model's assembly and solve work.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SolveStats {
    pub matrix_assemblies: usize,
    pub rhs_assemblies: usize,
    pub factorizations: usize,
    pub solves: usize,
    pub last_residual: Option<f64>,
    pub last_iterations: usize,
}

#[derive(Debug)]
enum Factorization {
    Sparse(Lu<usize, f64>),
    Dense(LU<f64, Dyn, Dyn>),
}

impl Factorization {
    fn compute(backend: Backend, matrix: &CsrMatrix<f64>) -> Result<Self, SolveError> {
        let failed = |reason: String| SolveError::FactorizationFailed {
            backend: backend.name(),
            reason,
        };

        match backend {
            Backend::DenseLu => {
                let lu = DMatrix::from(matrix).lu();
                if !lu.is_invertible() {
                    return Err(failed("matrix is singular".into()));
                }
                Ok(Factorization::Dense(lu))
            }
            _ => {
                let triplets: Vec<Triplet<usize, usize, f64>> = matrix
                    .triplet_iter()
                    .filter(|(_, _, v)| **v != 0.0)
                    .map(|(i, j, &v)| Triplet::new(i, j, v))
                    .collect();
                let csc = SparseColMat::<usize, f64>::try_new_from_triplets(
                    matrix.nrows(),
                    matrix.ncols(),
                    &triplets,
                )
                .map_err(|e| failed(e.to_string()))?;
                // faer panics on an exactly zero numeric pivot
                let lu = quietly(|| csc.sp_lu())
                    .map_err(|_| failed("zero pivot".into()))?
                    .map_err(|e| failed(e.to_string()))?;
                Ok(Factorization::Sparse(lu))
            }
        }
    }

    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>, SolveError> {
        match self {
            Factorization::Dense(lu) => lu.solve(rhs).ok_or(SolveError::FactorizationFailed {
                backend: Backend::DenseLu.name(),
                reason: "matrix is singular".into(),
            }),
            Factorization::Sparse(lu) => {
                let n = rhs.len();
                let mut x = Col::<f64>::from_fn(n, |i| rhs[i]);
                lu.solve_in_place(&mut x);
                Ok(DVector::from_iterator(n, x.iter().copied()))
            }
        }
    }
}

/// Runs `f`, turning a panic into `Err` without the default hook's report.
fn quietly<R>(f: impl FnOnce() -> R) -> std::thread::Result<R> {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let result = catch_unwind(AssertUnwindSafe(f));
    panic::set_hook(previous);
    result
}

/// Finds a row or column without a single nonzero, which makes the matrix
/// singular whatever the backend.
fn empty_line(matrix: &CsrMatrix<f64>) -> Option<String> {
    let mut column_used = vec![false; matrix.ncols()];
    for (i, row) in matrix.row_iter().enumerate() {
        let mut any = false;
        for (&j, &v) in row.col_indices().iter().zip(row.values()) {
            if v != 0.0 {
                column_used[j] = true;
                any = true;
            }
        }
        if !any {
            return Some(format!("row {i} is empty"));
        }
    }
    column_used
        .iter()
        .position(|used| !used)
        .map(|j| format!("column {j} is empty"))
}

/// Backend dispatch plus the cached factorization of the last matrix.
#[derive(Debug, Default)]
pub(crate) struct LinearSolver {
    factorization: Option<(Backend, Factorization)>,
}

impl LinearSolver {
    /// Drops the cached factorization; called whenever the matrix changes.
    pub fn invalidate(&mut self) {
        self.factorization = None;
    }

    pub fn solve(
        &mut self,
        config: &SolverConfig,
        matrix: &CsrMatrix<f64>,
        rhs: &DVector<f64>,
    ) -> Result<SolverResult, SolveError> {
        let backend = config.backend;
        if let Some(reason) = empty_line(matrix) {
            self.invalidate();
            return Err(SolveError::SingularMatrix {
                backend: backend.name(),
                reason,
            });
        }

        let mut result = if backend.is_direct() {
            self.solve_direct(config, matrix, rhs)?
        } else {
            krylov(backend, matrix, rhs, config.logging)?
        };

        if !result.solution.iter().all(|v| v.is_finite()) {
            eprintln!("Error: {} produced NaN/Inf", backend.name());
            self.invalidate();
            return Err(SolveError::NonFiniteSolution {
                backend: backend.name(),
            });
        }

        let residual = (matrix * &result.solution - rhs).norm();
        result.residual = residual;
        if let Some(tolerance) = config.residual_tolerance {
            if !tolerance.is_met(residual, rhs.norm()) {
                return Err(SolveError::ResidualTooLarge {
                    backend: backend.name(),
                    residual,
                });
            }
        }
        Ok(result)
    }

    fn solve_direct(
        &mut self,
        config: &SolverConfig,
        matrix: &CsrMatrix<f64>,
        rhs: &DVector<f64>,
    ) -> Result<SolverResult, SolveError> {
        let cached = self
            .factorization
            .take()
            .filter(|(backend, _)| config.reuse_factorization && *backend == config.backend);
        let refactorized = cached.is_none();

        let (backend, factorization) = match cached {
            Some(entry) => entry,
            None => (
                config.backend,
                record_factorization(|| Factorization::compute(config.backend, matrix))?,
            ),
        };

        let solution = record_linear_solve(|| factorization.solve(rhs))?;
        self.factorization = Some((backend, factorization));

        Ok(SolverResult {
            solution,
            iterations: 1,
            residual: 0.0,
            refactorized,
        })
    }
}

/// Progress line for iterative backends. Rewrites the previous line after the first.
pub(crate) fn log_iteration(i: usize, max_iter: usize, res_norm: f64, fraction: f64, logging: bool) {
    if !logging {
        return;
    }
    if i == 0 {
        println!("    Iter   | Residual |  Fraction");
        println!("{i:>4} | {res_norm:>8.3e} | {fraction:>8.3e}");
    } else {
        print!("\x1B[1F\x1B[2K");
        println!("{i:>4}/{max_iter} | {res_norm:>8.3e} | {fraction:>9.3e}");
    }
    io::stdout().flush().ok();
}
