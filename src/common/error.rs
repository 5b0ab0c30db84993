//! Error types for miqp_planning

use thiserror::Error;

use crate::smoothing::optimizer::{OptimizerError, OptimizerStatus};

/// Main error type for a planning cycle
///
/// Every variant aborts only the current cycle. The caller decides what to
/// do with the previous trajectory (hold it, trigger a fallback, ...).
#[derive(Debug, Error)]
pub enum PlanningError {
    /// The engine returned the failure sentinel while registering an obstacle
    #[error("Obstacle {id} could not be registered with the engine")]
    ObstacleRegistration { id: String },

    /// Obstacle geometry could not be turned into a horizon quadrilateral
    #[error("Invalid geometry for obstacle {id}: {reason}")]
    InvalidObstacleGeometry { id: String, reason: String },

    /// The engine rejected adding or updating the ego agent
    #[error("Agent registration failed: {0}")]
    AgentRegistration(String),

    /// The combinatorial engine found no solution within its budget
    #[error("Combinatorial solver failed to find a trajectory")]
    SolveFailed,

    /// Too many samples were discarded by the low speed check
    #[error("Trajectory has too many invalid points: {valid} valid, {required} required")]
    TrajectoryTooShort { valid: usize, required: usize },

    /// The continuous smoothing pass failed
    #[error("Smoothing failed: {0}")]
    SmoothingFailed(#[from] SmoothingError),

    /// Malformed cycle input (empty reference line, bad buffer, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Errors raised by the trajectory smoother
#[derive(Debug, Error)]
pub enum SmoothingError {
    #[error("Optimization problem was not initialized")]
    NotInitialized,

    #[error("Input trajectory has {0} points, at least 2 are required")]
    TooFewPoints(usize),

    #[error("Non positive time step {0} between trajectory points")]
    InvalidTimeStep(f64),

    #[error("Optimizer raised an error: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("Optimizer terminated with status {0:?}")]
    Status(OptimizerStatus),
}

/// Errors while loading the planner configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot load the configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse the configuration file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type alias for planning operations
pub type PlanningResult<T> = Result<T, PlanningError>;
