use thiserror::Error;

pub type Result<T, E = FdError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FdError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),
    #[error("solve error: {0}")]
    Solve(#[from] SolveError),
}

impl FdError {
    pub fn is_config(&self) -> bool {
        matches!(self, FdError::Config(_))
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, FdError::Structural(_))
    }

    pub fn is_solve(&self) -> bool {
        matches!(self, FdError::Solve(_))
    }
}

/// Invalid setup or update input. Raised before any table is touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("axis '{name}': {reason}")]
    InvalidAxis { name: String, reason: String },
    #[error("field '{name}': {reason}")]
    InvalidField { name: String, reason: String },
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },
    #[error("field '{field}' has no axis named '{axis}'")]
    UnknownAxis { field: String, axis: String },
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("derivative order {derivative} with accuracy {accuracy} is not achievable: {reason}")]
    UnachievableAccuracy {
        derivative: usize,
        accuracy: usize,
        reason: String,
    },
    #[error("stencil needs {required} points along axis '{axis}' but it has {available}")]
    StencilTooWide {
        axis: String,
        required: usize,
        available: usize,
    },
    #[error("field '{0}' has no timestep, time derivatives are unavailable")]
    MissingTimestep(String),
    #[error("{table} '{label}' is new but its {slot} was not provided")]
    UninitializedTerm {
        table: &'static str,
        label: String,
        slot: &'static str,
    },
    #[error("boundary '{0}' cannot change its mask after registration")]
    MaskChanged(String),
    #[error("{table} '{label}' was registered with {expected} rows, got {found}")]
    RowCountChanged {
        table: &'static str,
        label: String,
        expected: usize,
        found: usize,
    },
    #[error("{context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        found: usize,
    },
    #[error("invalid mask on field '{field}': {reason}")]
    InvalidMask { field: String, reason: String },
    #[error("invalid time schedule: {0}")]
    InvalidSchedule(String),
}

/// The tables do not describe a square, fully covered system.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StructuralError {
    #[error("system is overdetermined: {equations} equation rows for {unknowns} unknowns")]
    Overdetermined { equations: usize, unknowns: usize },
    #[error("system is underdetermined: row {row} has no equation or boundary ({uncovered} of {unknowns} rows uncovered)")]
    UncoveredRows {
        row: usize,
        uncovered: usize,
        unknowns: usize,
    },
    #[error("equations '{first}' and '{second}' both govern the rows starting at {row}")]
    ConflictingEquations {
        row: usize,
        first: String,
        second: String,
    },
    #[error("row {row} is written by boundaries '{first}' and '{second}'")]
    ConflictingBoundaries {
        row: usize,
        first: String,
        second: String,
    },
}

/// The backend could not produce a usable solution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("{backend} factorization failed: {reason}")]
    FactorizationFailed {
        backend: &'static str,
        reason: String,
    },
    #[error("{backend}: matrix is singular ({reason})")]
    SingularMatrix {
        backend: &'static str,
        reason: String,
    },
    #[error("{backend} failed: {reason}")]
    IterationFailed {
        backend: &'static str,
        reason: String,
    },
    #[error("{backend} produced a non-finite solution")]
    NonFiniteSolution { backend: &'static str },
    #[error("{backend} did not converge after {iterations} iterations (residual {residual:.3e})")]
    NonConvergence {
        backend: &'static str,
        iterations: usize,
        residual: f64,
    },
    #[error("{backend} residual {residual:.3e} exceeds tolerance")]
    ResidualTooLarge { backend: &'static str, residual: f64 },
}
