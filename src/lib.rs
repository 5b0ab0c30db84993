//! miqp_planning - Rust implementation of a two-stage vehicle trajectory planner
//!
//! A combinatorial stage plans a coarse trajectory around obstacles, and a
//! continuous stage smooths it under the kinematic limits of the vehicle.

// Core modules
pub mod common;
pub mod config;
pub mod geometry;
pub mod logger;

// Algorithm modules
pub mod miqp;
pub mod smoothing;

// Re-export common types for convenience
pub use common::{DiscretizedTrajectory, KinematicState, MapOffset, Point2D, TrajectoryPoint};
pub use common::{CombinatorialSolver, NonlinearOptimizer, NonlinearProblem};
pub use common::{PlanningError, PlanningResult, SmoothingError};
pub use config::{load_config, MiqpPlannerConfig};
