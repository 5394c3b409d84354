//! # glmsol
//!
//! Integrates initial-value ODE systems with General Linear Methods (GLMs), a family that covers
//! both Runge-Kutta and linear multistep schemes, and computes exact derivatives of the resulting
//! trajectory with respect to the initial conditions, the parameters and the step sizes.
//!
//! Every step of the integration is solved at once: the step recurrence of a state over the whole
//! time grid is a block lower-bidiagonal sparse system that is factorized a single time and then
//! reused for the trajectory solve and for all tangent and adjoint solves.
//!
//! ## Overview
//!
//! - Declare the states and parameters of a system with [OdeSystemBuilder] and implement
//!   [OdeFunction] to evaluate its rates.
//! - Pick a [Scheme] (see [SchemeName]) and a [TimeGrid].
//! - Build an [Integrator], optionally from an [IntegratorConfig], and call [Integrator::solve].
//! - Call [Integrator::sensitivities] for tangent and adjoint derivatives of the [Solution].
//!
//! The stage equations of the integration are either solved by an embedded Newton iteration
//! ([Formulation::Embedded]) or handed to an [ExternalOptimizer] as equality constraints
//! ([Formulation::Exposed]).

pub mod error;
pub mod linear_solver;
pub mod matrix;
pub mod nonlinear_solver;
pub mod ode_equations;
pub mod ode_solver;
pub mod scheme;

pub use error::GlmError;
pub use linear_solver::{DenseLu, LinearSolveMode, LinearSolver, SparseLu};
pub use matrix::{SparseJacobian, SparsityPattern, StepLayout};
pub use nonlinear_solver::{NewtonProblem, NewtonSolver};
pub use ode_equations::{
    OdeFunction, OdeSystem, OdeSystemBuilder, ParameterKind, RateInputs, RatePartials, Wrt,
};
pub use ode_solver::{
    config::{IntegratorConfig, NewtonConfig},
    coupling::{ExposedProblem, ExternalOptimizer, Formulation},
    integrator::{Integrator, IntegratorInputs},
    phase::PhaseInput,
    sensitivities::{Gradients, SensitivityInput, Sensitivities, TangentSeeds},
    solution::{PhaseRecord, Solution},
    time_grid::TimeGrid,
    time_marching::TimeMarchingIntegrator,
    vectorized_step::{EngineStatistics, StepInputs, VectorizedStepEngine},
};
pub use scheme::{Scheme, SchemeName, StartingCoefficients, StartingMethod};
