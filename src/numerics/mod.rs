pub mod assembly;
pub mod solver;
pub mod sparse;
pub mod timing;
pub mod transient;

/// Stopping or acceptance threshold on a residual norm.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Tolerance {
    Absolute(f64),
    /// Relative to a reference norm, usually the right-hand side.
    Relative(f64),
    /// Met when either the absolute or the relative bound holds.
    Combined(f64, f64),
}

impl Tolerance {
    pub fn is_met(&self, norm: f64, reference: f64) -> bool {
        match *self {
            Tolerance::Absolute(tol) => norm <= tol,
            Tolerance::Relative(tol) => norm <= tol * reference,
            Tolerance::Combined(abs_tol, rel_tol) => norm <= abs_tol || norm <= rel_tol * reference,
        }
    }
}

/// Linear-system backend.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Backend {
    /// Sparse LU with partial pivoting (faer).
    #[default]
    SparseLu,
    /// Dense LU (nalgebra). Only sensible for small systems.
    DenseLu,
    /// Jacobi row-scaled BiCGStab (kryst); `tolerance` is relative to the scaled
    /// right-hand side.
    BiCgStab { tolerance: f64, max_iterations: usize },
    /// Restarted GMRES (kryst) on the Jacobi-scaled system.
    Gmres {
        restart: usize,
        tolerance: f64,
        max_iterations: usize,
    },
    /// CG on the normal equations (kryst). Slow but robust for nonsymmetric
    /// systems where BiCGStab breaks down.
    Cgnr { tolerance: f64, max_iterations: usize },
}

impl Backend {
    pub fn bicgstab() -> Self {
        Backend::BiCgStab {
            tolerance: 1e-10,
            max_iterations: 5_000,
        }
    }

    pub fn gmres() -> Self {
        Backend::Gmres {
            restart: 50,
            tolerance: 1e-10,
            max_iterations: 5_000,
        }
    }

    pub fn cgnr() -> Self {
        Backend::Cgnr {
            tolerance: 1e-10,
            max_iterations: 20_000,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::SparseLu => "sparse-lu",
            Backend::DenseLu => "dense-lu",
            Backend::BiCgStab { .. } => "bicgstab",
            Backend::Gmres { .. } => "gmres",
            Backend::Cgnr { .. } => "cgnr",
        }
    }

    /// Direct backends keep a factorization that can be reused across right-hand sides.
    /// They also report numerically singular matrices; the Krylov backends only see
    /// structurally empty rows or columns and otherwise may converge to one of many
    /// solutions of a consistent singular system.
    pub fn is_direct(&self) -> bool {
        matches!(self, Backend::SparseLu | Backend::DenseLu)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolverConfig {
    pub backend: Backend,
    /// Acceptance test on `||A x - b||` against `||b||`; `None` skips it.
    pub residual_tolerance: Option<Tolerance>,
    pub reuse_factorization: bool,
    pub logging: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            residual_tolerance: Some(Tolerance::Combined(1e-10, 1e-6)),
            reuse_factorization: true,
            logging: false,
        }
    }
}

impl SolverConfig {
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_residual_tolerance(mut self, tolerance: Option<Tolerance>) -> Self {
        self.residual_tolerance = tolerance;
        self
    }

    pub fn with_factorization_reuse(mut self, reuse: bool) -> Self {
        self.reuse_factorization = reuse;
        self
    }

    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }
}
