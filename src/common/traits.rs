//! Common traits defining the solver boundaries of the planner
//!
//! Both solvers are capability interfaces: any engine implementing the
//! operation set can be plugged into `MiqpPlanner`.

use std::time::Duration;

use crate::common::types::Point2D;
use crate::miqp::obstacles::HorizonObstacle;
use crate::smoothing::optimizer::{OptimizationOutcome, OptimizerError, SolverParameters};

/// Persistent index of an agent inside a combinatorial engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentHandle(pub usize);

/// Index of a registered obstacle, only valid until the next removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObstacleIndex(pub usize);

/// Second order cartesian state [x, xd, xdd, y, yd, ydd]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SecondOrderState {
    pub x: f64,
    pub xd: f64,
    pub xdd: f64,
    pub y: f64,
    pub yd: f64,
    pub ydd: f64,
}

impl SecondOrderState {
    pub fn to_array(&self) -> [f64; 6] {
        [self.x, self.xd, self.xdd, self.y, self.yd, self.ydd]
    }

    pub fn speed(&self) -> f64 {
        self.xd.hypot(self.yd)
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }
}

/// Agent data sent to the engine on every cycle
#[derive(Debug, Clone, Copy)]
pub struct AgentUpdate<'a> {
    pub initial_state: SecondOrderState,
    /// Reference line in origin-shifted coordinates
    pub reference: &'a [Point2D],
    pub timestamp: f64,
    pub track_reference_position: bool,
}

/// Which raw trajectory to fetch from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawTrajectoryKind {
    /// Reference following trajectory computed at the last agent update
    LastReference,
    /// Result of the last successful solve
    Optimized,
}

/// Combinatorial (mixed integer) trajectory engine
///
/// The engine is created by its constructor and destroyed when dropped.
pub trait CombinatorialSolver {
    /// Number of horizon steps
    fn nr_steps(&self) -> usize;

    /// Internal sample period [s]
    fn sample_time(&self) -> f64;

    /// Radius used to inflate obstacles [m]
    fn collision_radius(&self) -> f64;

    /// Add an agent, returns `None` on failure
    fn add_agent(
        &mut self,
        agent: &AgentUpdate<'_>,
        desired_speed: f64,
        desired_offset: f64,
    ) -> Option<AgentHandle>;

    /// Update state and reference of an existing agent
    fn update_agent(&mut self, handle: AgentHandle, agent: &AgentUpdate<'_>) -> bool;

    /// Update target speed and target offset of an existing agent
    fn update_desired_velocity(
        &mut self,
        handle: AgentHandle,
        desired_speed: f64,
        desired_offset: f64,
    ) -> bool;

    /// Replace the drivable environment polygon (origin-shifted)
    fn update_environment(&mut self, polygon: &[Point2D]);

    /// Register an obstacle, returns `None` as failure sentinel
    fn add_obstacle(&mut self, obstacle: &HorizonObstacle) -> Option<ObstacleIndex>;

    /// Remove every registered obstacle
    fn remove_all_obstacles(&mut self);

    /// Solve within the given budget, returns whether a solution was found
    fn solve(&mut self, timestamp: f64, budget: Duration) -> bool;

    /// Fixed stride raw trajectory buffer of an agent, times start at `start_time`
    fn raw_trajectory(
        &self,
        handle: AgentHandle,
        kind: RawTrajectoryKind,
        start_time: f64,
    ) -> Option<Vec<f64>>;
}

/// Nonlinear program over a flat decision vector
pub trait NonlinearProblem {
    /// Length of the decision vector
    fn dimension(&self) -> usize;

    fn lower_bounds(&self) -> &[f64];

    fn upper_bounds(&self) -> &[f64];

    /// Objective value, fills `grad` when given
    fn objective(&mut self, u: &[f64], grad: Option<&mut [f64]>) -> f64;

    fn num_inequality_constraints(&self) -> usize {
        0
    }

    /// One tolerance per inequality constraint
    fn inequality_tolerances(&self) -> &[f64] {
        &[]
    }

    /// Constraint values `c(u) <= 0`, row-major `m x n` Jacobian when given
    fn inequality_constraints(
        &mut self,
        _u: &[f64],
        _result: &mut [f64],
        _jacobian: Option<&mut [f64]>,
    ) {
    }
}

/// Gradient based nonlinear optimizer
pub trait NonlinearOptimizer {
    /// Minimize `problem` starting from `u`, which holds the result afterwards
    ///
    /// `OptimizerError::RoundoffLimited` leaves a usable result in `u`.
    fn optimize(
        &self,
        problem: &mut dyn NonlinearProblem,
        u: &mut [f64],
        params: &SolverParameters,
    ) -> Result<OptimizationOutcome, OptimizerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_order_state() {
        let state = SecondOrderState { x: 1.0, xd: 3.0, xdd: 0.0, y: 2.0, yd: 4.0, ydd: 0.0 };
        assert!((state.speed() - 5.0).abs() < 1e-12);
        assert_eq!(state.to_array(), [1.0, 3.0, 0.0, 2.0, 4.0, 0.0]);
        assert_eq!(state.position(), Point2D::new(1.0, 2.0));
    }
}
