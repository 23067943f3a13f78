//! Sparse finite-difference models on tensor-product grids.
//!
//! Fields live on named uniform axes and hand out derivative operators built
//! from cached stencils. Equations and boundary rows are registered under
//! labels and updated in partial batches; a [`Model`] assembles them into one
//! square sparse system and solves it, reusing the matrix and its
//! factorization when only right-hand sides changed.

pub mod discretization;
pub mod error;
pub mod models;
pub mod numerics;
pub mod physics;
pub mod processing;

pub use discretization::axis::Axis;
pub use discretization::field::{Edge, Field};
pub use discretization::stencil::{Stencil, StencilCache, StencilKey, StencilKind};
pub use discretization::time::{HistoryStencil, TimeSide, TimeTerm};
pub use error::{ConfigError, FdError, Result, SolveError, StructuralError};
pub use models::fd_model::Model;
pub use models::solution::Solution;
pub use numerics::transient::{History, TransientSolver};
pub use numerics::{Backend, SolverConfig, Tolerance};
pub use physics::bc::{BoundaryUpdate, RowMask};
pub use physics::equations::EquationUpdate;
pub use physics::operator::Operator;
pub use physics::{Rhs, Update};
