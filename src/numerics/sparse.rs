use kryst::context::ksp_context::Workspace;
use kryst::error::KError;
use kryst::matrix::op::CsrOp;
use kryst::matrix::sparse::CsrMatrix as KrystCsr;
use kryst::parallel::{NoComm, UniverseComm};
use kryst::preconditioner::PcSide;
use kryst::solver::LinearSolver;
use kryst::solver::bicgstab::BiCgStabSolver;
use kryst::solver::cgnr::CgnrSolver;
use kryst::solver::gmres::GmresSolver;
use kryst::utils::convergence::ConvergedReason;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use std::sync::Arc;

use crate::error::SolveError;
use crate::numerics::Backend;
use crate::numerics::solver::{SolverResult, log_iteration};
use crate::numerics::timing::record_linear_solve;

type Monitor = Box<dyn Fn(usize, f64) + Send + Sync>;

/// Copies the matrix into kryst's CSR and divides every row (and its right-hand
/// side entry) by the row's diagonal. Rows with a missing or tiny diagonal are
/// left as they are.
pub(crate) fn jacobi_scale(matrix: &CsrMatrix<f64>, rhs: &DVector<f64>) -> (KrystCsr<f64>, DVector<f64>) {
    let (nrows, ncols) = (matrix.nrows(), matrix.ncols());
    let (row_ptr, col_idx, values) = matrix.clone().disassemble();
    let mut scaled = KrystCsr::from_csr(nrows, ncols, row_ptr, col_idx, values);

    let d: Vec<f64> = (0..nrows)
        .map(|row_idx| {
            let row_start = scaled.row_ptr()[row_idx];
            let row_end = scaled.row_ptr()[row_idx + 1];
            let diag = (row_start..row_end)
                .find(|&idx| scaled.col_idx()[idx] == row_idx)
                .map(|idx| scaled.values()[idx])
                .unwrap_or(1.0);
            if diag.abs() < 1e-12 { 1.0 } else { diag }
        })
        .collect();

    for (row_idx, di) in d.iter().enumerate() {
        let scale = 1.0 / di;
        for val in scaled.row_values_mut(row_idx).iter_mut() {
            *val *= scale;
        }
    }
    let b = DVector::from_iterator(nrows, rhs.iter().zip(&d).map(|(b, di)| b / di));
    (scaled, b)
}

/// Runs one of the Krylov backends on the Jacobi-scaled system.
///
/// Tolerances are relative to the scaled right-hand side norm. Only converged
/// runs come back as `Ok`; breakdowns and iteration caps are `NonConvergence`.
pub fn krylov(
    backend: Backend,
    matrix: &CsrMatrix<f64>,
    rhs: &DVector<f64>,
    logging: bool,
) -> Result<SolverResult, SolveError> {
    let name = backend.name();
    let (mut solver, max_iterations): (Box<dyn LinearSolver<Error = KError>>, usize) = match backend {
        Backend::BiCgStab {
            tolerance,
            max_iterations,
        } => (Box::new(BiCgStabSolver::new(tolerance, max_iterations)), max_iterations),
        Backend::Gmres {
            restart,
            tolerance,
            max_iterations,
        } => (
            Box::new(GmresSolver::new(restart, tolerance, max_iterations)),
            max_iterations,
        ),
        Backend::Cgnr {
            tolerance,
            max_iterations,
        } => (Box::new(CgnrSolver::new(tolerance, max_iterations)), max_iterations),
        Backend::SparseLu | Backend::DenseLu => {
            return Err(SolveError::IterationFailed {
                backend: name,
                reason: "not a Krylov backend".into(),
            });
        }
    };

    let n = rhs.len();
    let (scaled, b) = jacobi_scale(matrix, rhs);
    let b_norm = b.norm();
    if logging {
        println!("{n} unknowns, {} nonzeros ({name})\n", matrix.nnz());
        println!("Scaled RHS norm: {:.3e}", b_norm);
    }

    let op = CsrOp::new(Arc::new(scaled));
    let mut workspace = Workspace::new(n);
    solver.setup_workspace(&mut workspace);

    let monitors: Vec<Monitor> = if logging {
        let reference = if b_norm > 0.0 { b_norm } else { 1.0 };
        vec![Box::new(move |i, res_norm| {
            log_iteration(i, max_iterations, res_norm, res_norm / reference, true)
        })]
    } else {
        Vec::new()
    };

    let mut x = DVector::zeros(n);
    let stats = record_linear_solve(|| {
        solver.solve(
            &op,
            None,
            b.as_slice(),
            x.as_mut_slice(),
            PcSide::Left,
            &UniverseComm::NoComm(NoComm {}),
            Some(monitors.as_slice()),
            Some(&mut workspace),
        )
    })
    .map_err(|e| {
        eprintln!("Linear solve failed: {e}");
        SolveError::IterationFailed {
            backend: name,
            reason: e.to_string(),
        }
    })?;

    let converged = matches!(
        stats.reason,
        ConvergedReason::ConvergedRtol
            | ConvergedReason::ConvergedAtol
            | ConvergedReason::ConvergedHappyBreakdown
            | ConvergedReason::ConvergedTrustRegion
    );
    if !converged {
        eprintln!("{name} stopped after {} iterations: {:?}", stats.iterations, stats.reason);
        return Err(SolveError::NonConvergence {
            backend: name,
            iterations: stats.iterations,
            residual: stats.final_residual,
        });
    }

    Ok(SolverResult {
        solution: x,
        iterations: stats.iterations,
        residual: 0.0,
        refactorized: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use nalgebra_sparse::CooMatrix;

    fn system() -> (CsrMatrix<f64>, DVector<f64>) {
        let dense = DMatrix::from_row_slice(
            3,
            3,
            &[
                4.0, -1.0, 0.0, //
                -1.0, 4.0, -1.0, //
                0.0, -2.0, 8.0,
            ],
        );
        (CsrMatrix::from(&dense), DVector::from_vec(vec![2.0, 4.0, 10.0]))
    }

    #[test]
    fn scaling_divides_rows_by_their_diagonal() {
        let (a, b) = system();
        let (scaled, b_scaled) = jacobi_scale(&a, &b);
        assert_eq!(scaled.row_ptr(), &[0, 2, 5, 7]);
        assert_eq!(scaled.values(), &[1.0, -0.25, -0.25, 1.0, -0.25, -0.25, 1.0]);
        assert_relative_eq!(b_scaled[2], 1.25);
    }

    #[test]
    fn zero_diagonal_rows_are_left_alone() {
        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 1, 3.0);
        coo.push(1, 0, 2.0);
        let a = CsrMatrix::from(&coo);
        let (scaled, b) = jacobi_scale(&a, &DVector::from_vec(vec![3.0, 4.0]));
        assert_eq!(scaled.values(), &[3.0, 2.0]);
        assert_eq!(b[1], 4.0);
    }

    #[test]
    fn krylov_backends_match_dense_solution() {
        let (a, b) = system();
        let exact = DMatrix::from(&a).lu().solve(&b).unwrap();
        for backend in [Backend::bicgstab(), Backend::gmres(), Backend::cgnr()] {
            let result = krylov(backend, &a, &b, false).unwrap();
            assert_relative_eq!(result.solution, exact, epsilon = 1e-8);
        }
    }

    #[test]
    fn iteration_cap_reports_non_convergence() {
        let (a, b) = system();
        let capped = Backend::BiCgStab {
            tolerance: 1e-14,
            max_iterations: 0,
        };
        let err = krylov(capped, &a, &b, false).unwrap_err();
        assert!(matches!(err, SolveError::NonConvergence { iterations: 0, .. }));
    }

    #[test]
    fn zero_rhs_gives_zero_solution() {
        let (a, _) = system();
        let result = krylov(Backend::bicgstab(), &a, &DVector::zeros(3), false).unwrap();
        assert_eq!(result.solution, DVector::zeros(3));
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn direct_backends_are_rejected() {
        let (a, b) = system();
        let err = krylov(Backend::SparseLu, &a, &b, false).unwrap_err();
        assert!(matches!(err, SolveError::IterationFailed { .. }));
    }
}
