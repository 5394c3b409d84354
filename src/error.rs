use thiserror::Error;

/// Custom error type for glmsol
///
/// This error type is used to wrap all possible errors that can occur when setting up or running an integration
#[derive(Error, Debug)]
pub enum GlmError {
    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),
    #[error("Shape mismatch: {0}")]
    ShapeError(#[from] ShapeError),
    #[error("Linear solver error: {0}")]
    LinearSolverError(#[from] LinearSolverError),
    #[error("Non-linear solver error: {0}")]
    NonLinearSolverError(#[from] NonLinearSolverError),
    #[error("External optimizer error: {0}")]
    OptimizerError(#[from] OptimizerError),
    #[error("Error: {0}")]
    Other(String),
}

/// Errors raised while setting up a scheme, a system declaration or an integrator.
/// These are raised before any solve is attempted and are never retried.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Scheme matrix {name} has shape {found:?}, expected {expected:?}")]
    SchemeMatrixShape {
        name: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("Abscissa has length {found}, expected {expected}")]
    AbscissaLength { expected: usize, found: usize },
    #[error("Starting coefficients must be a rank-3 tensor, but its rank is {0}")]
    StartingCoefficientsRank(usize),
    #[error("Starting coefficients have {found} values, shape requires {expected}")]
    StartingCoefficientsLength { expected: usize, found: usize },
    #[error(
        "Starting coefficients must have shape (? x {expected_points} x {expected_step_vars}), found (? x {found_points} x {found_step_vars})"
    )]
    StartingCoefficientsShape {
        expected_points: usize,
        expected_step_vars: usize,
        found_points: usize,
        found_step_vars: usize,
    },
    #[error("Starting coefficients produce {found} step variables, scheme has {expected}")]
    StartingValuesCount { expected: usize, found: usize },
    #[error("Starting method of {0} must integrate at least one step")]
    EmptyStartingMethod(String),
    #[error("Starting scheme {0} itself requires a starting method")]
    NestedStartingMethod(String),
    #[error("Unknown scheme: {0}")]
    UnknownScheme(String),
    #[error("{0} has already been declared")]
    DuplicateName(String),
    #[error("Unknown state: {0}")]
    UnknownState(String),
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("Invalid shape for {0}: every dimension must be non-zero")]
    InvalidShape(String),
    #[error("At least one state must be declared")]
    NoStates,
    #[error("Missing value for parameter {0}")]
    MissingParameter(String),
    #[error("Invalid time grid: {0}")]
    TimeGrid(String),
    #[error("Time grid has {found} points, scheme needs at least {expected}")]
    TooFewTimePoints { expected: usize, found: usize },
    #[error("The exposed formulation needs an external optimizer")]
    MissingOptimizer,
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// A runtime tensor does not match the shape declared at setup.
#[derive(Error, Debug)]
pub enum ShapeError {
    #[error("{name} has wrong length: expected {expected}, got {found}")]
    WrongLength {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Sparsity pattern has {expected} entries but {found} values were given")]
    PatternValues { expected: usize, found: usize },
    #[error("Index ({row}, {col}) out of bounds for a {nrows}x{ncols} pattern")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        nrows: usize,
        ncols: usize,
    },
    #[error("Scheme has a starting method but no starting trajectory was given")]
    MissingStartingTrajectory,
    #[error("Scheme has no starting method but a starting trajectory was given")]
    UnexpectedStartingTrajectory,
}

/// Possible errors that can occur when factorising or solving a linear problem
#[derive(Error, Debug)]
pub enum LinearSolverError {
    #[error("Factorisation failed: {0}")]
    FactorizationFailed(String),
    #[error("LU solve failed")]
    LuSolveFailed,
    #[error("Linear solver matrix not square")]
    MatrixNotSquare,
    #[error("No structure has been built for state {0}")]
    StructureNotBuilt(String),
}

/// Possible errors that can occur when solving a non-linear problem
#[derive(Error, Debug)]
pub enum NonLinearSolverError {
    #[error("Newton iterations did not converge after {niter} iterations, residual norm = {residual_norm:e}")]
    NewtonDidNotConverge { niter: usize, residual_norm: f64 },
    #[error("Newton iterations diverged at iteration {niter}, residual norm = {residual_norm:e}")]
    NewtonDiverged { niter: usize, residual_norm: f64 },
}

/// The stage values returned by an [crate::ExternalOptimizer] do not satisfy the constraints.
#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Optimizer returned an infeasible point: constraint norm = {constraint_norm:e}, tolerance = {tolerance:e}")]
    InfeasiblePoint { constraint_norm: f64, tolerance: f64 },
}

#[macro_export]
macro_rules! configuration_error {
    ($variant:ident) => {
        GlmError::from(ConfigurationError::$variant)
    };
    ($variant:ident, $($arg:tt)*) => {
        GlmError::from(ConfigurationError::$variant($($arg)*))
    };
}

#[macro_export]
macro_rules! linear_solver_error {
    ($variant:ident) => {
        GlmError::from(LinearSolverError::$variant)
    };
    ($variant:ident, $($arg:tt)*) => {
        GlmError::from(LinearSolverError::$variant($($arg)*))
    };
}

#[macro_export]
macro_rules! other_error {
    ($msg:expr) => {
        GlmError::Other($msg.to_string())
    };
}

/// Returns a [ShapeError::WrongLength] if `found != expected`.
pub(crate) fn check_length(name: &str, expected: usize, found: usize) -> Result<(), GlmError> {
    if expected != found {
        return Err(GlmError::from(ShapeError::WrongLength {
            name: name.to_string(),
            expected,
            found,
        }));
    }
    Ok(())
}
