//! Continuous smoothing of planned trajectories
//!
//! The combinatorial planner returns a coarse trajectory on the solver grid.
//! `TrajectorySmoother` refines it on a finer grid by optimizing jerk and
//! curvature rate inputs of a kinematic vehicle model, subject to bounds on
//! acceleration, curvature and velocity.

pub mod bounds;
pub mod motion_model;
pub mod optimizer;
pub mod sensitivity;
pub mod smoother;

pub use bounds::{BoundPolicy, Quantity};
pub use motion_model::KinematicStepModel;
pub use optimizer::{
    Algorithm, OptimizationOutcome, OptimizerError, OptimizerStatus, ProjectedGradientOptimizer,
    SolverParameters, StatusClass,
};
pub use sensitivity::{Integration, SensitivityIntegrator};
pub use smoother::{ProblemParameters, SmoothingProblem, TrajectorySmoother};
