//! Combinatorial (MIQP) planning stage
//!
//! A planning cycle classifies the situation, hands the ego agent, the
//! reference line and the inflated obstacles to a `CombinatorialSolver`, and
//! decodes the raw trajectory it returns. `ReferenceTrackingEngine` is a
//! deterministic engine for closed-loop simulation and tests.

pub mod adapters;
pub mod collision;
pub mod obstacles;
pub mod planner;
pub mod reference_engine;
pub mod state_classifier;
pub mod trajectory_codec;

pub use adapters::{discretize_reference_line, to_second_order_state, RoadBoundaries};
pub use collision::{ego_box, environment_collision, in_collision, CollisionReport};
pub use obstacles::{HorizonObstacle, Obstacle, ObstacleAggregator};
pub use planner::{MiqpPlanner, PlanningInput, PlanningOutcome};
pub use reference_engine::{MiqpEngineSettings, ReferenceTrackingEngine};
pub use state_classifier::{
    create_standstill_trajectory, determine_planner_state, select_motion_target, MotionTarget, PlannerState,
};
pub use trajectory_codec::{TrajectoryCodec, TRAJECTORY_SIZE};
