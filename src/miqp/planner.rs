//! MIQP planning cycle
//!
//! `MiqpPlanner` owns the combinatorial engine and the smoother for the
//! lifetime of the planner. The ego agent is added to the engine on the
//! first cycle that reaches the engine and updated in place afterwards;
//! obstacles are cleared and registered again on every cycle.
//!
//! Collision verification of the planned trajectory is non-enforcing: a
//! collision is logged at error level and reported in the outcome, but the
//! cycle still succeeds.

use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::common::error::{PlanningError, PlanningResult};
use crate::common::traits::{AgentHandle, AgentUpdate, CombinatorialSolver, NonlinearOptimizer, RawTrajectoryKind};
use crate::common::types::{DiscretizedTrajectory, MapOffset, Point2D, TrajectoryPoint};
use crate::config::MiqpPlannerConfig;
use crate::miqp::adapters::{discretize_reference_line, to_second_order_state, RoadBoundaries};
use crate::miqp::collision::{environment_collision, in_collision, CollisionReport};
use crate::miqp::obstacles::{Obstacle, ObstacleAggregator};
use crate::miqp::state_classifier::{
    create_standstill_trajectory, determine_planner_state, select_motion_target, PlannerState,
};
use crate::miqp::trajectory_codec::TrajectoryCodec;
use crate::smoothing::smoother::TrajectorySmoother;

/// Inputs of one planning cycle, positions in the map frame
#[derive(Debug, Clone, Copy)]
pub struct PlanningInput<'a> {
    pub init_point: TrajectoryPoint,
    /// Wall clock time of the cycle [s]
    pub timestamp: f64,
    pub reference_line: &'a [Point2D],
    /// Arc length to the stop point along the reference line
    pub stop_distance: f64,
    pub road_boundaries: Option<&'a RoadBoundaries>,
    pub obstacles: &'a [Obstacle],
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanningOutcome {
    pub state: PlannerState,
    pub trajectory: DiscretizedTrajectory,
    pub collisions: CollisionReport,
    pub smoothed: bool,
}

pub struct MiqpPlanner<E, O> {
    config: MiqpPlannerConfig,
    offset: MapOffset,
    engine: E,
    smoother: TrajectorySmoother<O>,
    codec: TrajectoryCodec,
    aggregator: ObstacleAggregator,
    ego_handle: Option<AgentHandle>,
}

impl<E: CombinatorialSolver, O: NonlinearOptimizer> MiqpPlanner<E, O> {
    pub fn new(config: MiqpPlannerConfig, engine: E, optimizer: O) -> Self {
        let offset = config.map_offset();
        let smoother = TrajectorySmoother::new(
            optimizer,
            config.smoother.clone(),
            config.smoother_solver.clone(),
            offset,
        );
        Self {
            codec: TrajectoryCodec::new(offset, config.minimum_valid_speed_vx_vy),
            aggregator: ObstacleAggregator::from_config(&config),
            offset,
            engine,
            smoother,
            config,
            ego_handle: None,
        }
    }

    pub fn config(&self) -> &MiqpPlannerConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn smoother(&self) -> &TrajectorySmoother<O> {
        &self.smoother
    }

    pub fn ego_handle(&self) -> Option<AgentHandle> {
        self.ego_handle
    }

    /// Run one planning cycle
    pub fn plan(&mut self, input: &PlanningInput<'_>) -> PlanningResult<PlanningOutcome> {
        let start_time = Instant::now();
        let mut stage_time = Instant::now();
        info!("############## MIQP Planner called at t = {:.3}", input.timestamp);
        let init = &input.init_point;

        let state = determine_planner_state(
            init.v,
            input.stop_distance,
            self.config.destination_distance_stop_threshold,
            self.config.standstill_velocity_threshold,
            self.config.minimum_valid_speed_planning,
        );
        if state == PlannerState::Standstill {
            info!("Standstill at the destination, holding the current pose");
            return Ok(PlanningOutcome {
                state,
                trajectory: create_standstill_trajectory(init, self.engine.nr_steps(), self.engine.sample_time()),
                collisions: CollisionReport::default(),
                smoothed: false,
            });
        }

        let reference = discretize_reference_line(
            input.reference_line,
            input.stop_distance,
            self.config.cutoff_distance_reference_after_stop,
            &self.offset,
        );
        if reference.len() < 2 {
            return Err(PlanningError::InvalidInput(format!(
                "reference line has {} points, at least 2 are required",
                reference.len()
            )));
        }
        info!("Reference line has {} points, took {:?}", reference.len(), stage_time.elapsed());

        let road_polygon = match (self.config.use_environment_polygon, input.road_boundaries) {
            (true, Some(bounds)) => {
                stage_time = Instant::now();
                self.engine.update_environment(&bounds.shifted_polygon(&self.offset));
                info!("Map processing took {:?}", stage_time.elapsed());
                Some(bounds.polygon())
            }
            (true, None) => {
                warn!("Environment polygon enabled but no road boundaries given");
                None
            }
            (false, _) => None,
        };

        let target = select_motion_target(
            state,
            input.stop_distance,
            self.config.distance_stop_before,
            self.config.distance_start_slowdown,
            self.config.default_cruise_speed,
            self.config.delta_s_desired,
        );
        let agent = AgentUpdate {
            initial_state: to_second_order_state(init, &self.offset),
            reference: &reference,
            timestamp: input.timestamp,
            track_reference_position: target.track_reference_position,
        };

        stage_time = Instant::now();
        let handle = match self.ego_handle {
            None => {
                let handle = self
                    .engine
                    .add_agent(&agent, target.desired_speed, target.desired_offset)
                    .ok_or_else(|| PlanningError::AgentRegistration("engine rejected the ego agent".to_string()))?;
                self.ego_handle = Some(handle);
                info!("Added ego agent with handle {}, took {:?}", handle.0, stage_time.elapsed());
                handle
            }
            Some(handle) => {
                if !self.engine.update_agent(handle, &agent) {
                    return Err(PlanningError::AgentRegistration(format!("update of agent {} failed", handle.0)));
                }
                if !self.engine.update_desired_velocity(handle, target.desired_speed, target.desired_offset) {
                    return Err(PlanningError::AgentRegistration(format!(
                        "desired velocity update of agent {} failed",
                        handle.0
                    )));
                }
                info!("Updated ego agent, took {:?}", stage_time.elapsed());
                handle
            }
        };

        if self.config.consider_obstacles {
            if let Err(e) = self.aggregator.register(&mut self.engine, input.obstacles, init.relative_time) {
                error!("Processing of obstacles failed: {}", e);
                return Err(e);
            }
        }

        let trajectory = match state {
            PlannerState::Start | PlannerState::Stop => {
                error!("Start/Stop trajectory, using reference instead of the optimized solution");
                let raw = self
                    .engine
                    .raw_trajectory(handle, RawTrajectoryKind::LastReference, init.relative_time)
                    .ok_or(PlanningError::SolveFailed)?;
                self.codec.decode(&raw, false)?
            }
            _ => {
                stage_time = Instant::now();
                let budget = Duration::from_secs_f64(self.config.max_solution_time.max(0.0));
                let success = self.engine.solve(input.timestamp, budget);
                info!("Miqp planning took {:?}", stage_time.elapsed());
                if !success {
                    info!("Planning failed");
                    return Err(PlanningError::SolveFailed);
                }
                info!("Planning Success!");
                // trajectories start at the relative time of the initial point
                let raw = self
                    .engine
                    .raw_trajectory(handle, RawTrajectoryKind::Optimized, init.relative_time)
                    .ok_or(PlanningError::SolveFailed)?;
                self.codec.decode(&raw, true)?
            }
        };

        let required = self.config.minimum_valid_points();
        if trajectory.len() < required {
            error!("Trajectory has too many invalid points, setting error state");
            return Err(PlanningError::TrajectoryTooShort { valid: trajectory.len(), required });
        }

        let mut collisions = CollisionReport::default();
        if self.config.consider_obstacles {
            collisions.obstacle_collision = in_collision(input.obstacles, &trajectory, &self.config.vehicle);
            if collisions.obstacle_collision {
                error!("Planning success but collision with obstacle!");
            }
        }
        if let Some(polygon) = &road_polygon {
            collisions.environment_collision = environment_collision(polygon, &trajectory);
            if collisions.environment_collision {
                error!("Planning success but collision with environment!");
            }
        }

        let (trajectory, smoothed) = if self.config.use_smoothing {
            stage_time = Instant::now();
            let smoothed = self.smoother.smooth(self.config.smoothing_subsampling, &trajectory)?;
            info!("Smoothing took {:?}", stage_time.elapsed());
            (smoothed, true)
        } else {
            (trajectory, false)
        };

        info!("MiqpPlanner::plan() took {:?}", start_time.elapsed());
        Ok(PlanningOutcome { state, trajectory, collisions, smoothed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::traits::ObstacleIndex;
    use crate::geometry::OrientedBox2d;
    use crate::miqp::obstacles::HorizonObstacle;
    use crate::miqp::reference_engine::{MiqpEngineSettings, ReferenceTrackingEngine};
    use crate::miqp::trajectory_codec::TRAJECTORY_SIZE;
    use crate::smoothing::optimizer::{ProjectedGradientOptimizer, SolverParameters};
    use itertools::Itertools;

    /// Engine stub replaying a fixed buffer and recording every call
    #[derive(Default)]
    struct ScriptedEngine {
        optimized: Vec<f64>,
        reference: Vec<f64>,
        solve_result: bool,
        reject_obstacles: bool,
        added: Vec<(f64, f64, bool)>,
        updates: usize,
        desired: Vec<(f64, f64)>,
        solves: usize,
        obstacles: usize,
    }

    impl ScriptedEngine {
        fn new(optimized: Vec<f64>) -> Self {
            Self { reference: optimized.clone(), optimized, solve_result: true, ..Default::default() }
        }
    }

    impl CombinatorialSolver for ScriptedEngine {
        fn nr_steps(&self) -> usize {
            20
        }
        fn sample_time(&self) -> f64 {
            0.25
        }
        fn collision_radius(&self) -> f64 {
            1.0
        }
        fn add_agent(&mut self, agent: &AgentUpdate<'_>, speed: f64, offset: f64) -> Option<AgentHandle> {
            self.added.push((speed, offset, agent.track_reference_position));
            Some(AgentHandle(0))
        }
        fn update_agent(&mut self, _: AgentHandle, _: &AgentUpdate<'_>) -> bool {
            self.updates += 1;
            true
        }
        fn update_desired_velocity(&mut self, _: AgentHandle, speed: f64, offset: f64) -> bool {
            self.desired.push((speed, offset));
            true
        }
        fn update_environment(&mut self, _: &[Point2D]) {}
        fn add_obstacle(&mut self, _: &HorizonObstacle) -> Option<ObstacleIndex> {
            if self.reject_obstacles {
                return None;
            }
            self.obstacles += 1;
            Some(ObstacleIndex(self.obstacles - 1))
        }
        fn remove_all_obstacles(&mut self) {
            self.obstacles = 0;
        }
        fn solve(&mut self, _: f64, _: Duration) -> bool {
            self.solves += 1;
            self.solve_result
        }
        fn raw_trajectory(&self, _: AgentHandle, kind: RawTrajectoryKind, start_time: f64) -> Option<Vec<f64>> {
            let buffer = match kind {
                RawTrajectoryKind::Optimized => &self.optimized,
                RawTrajectoryKind::LastReference => &self.reference,
            };
            let mut shifted = buffer.clone();
            for sample in shifted.chunks_mut(TRAJECTORY_SIZE) {
                sample[0] += start_time;
            }
            Some(shifted)
        }
    }

    fn buffer(speeds: &[f64]) -> Vec<f64> {
        let mut x = 0.0;
        let mut raw = Vec::new();
        for (i, &v) in speeds.iter().enumerate() {
            raw.extend_from_slice(&[0.25 * i as f64, x, 0.0, v, 0.0, 0.0, 0.0]);
            x += 0.25 * v;
        }
        raw
    }

    fn straight_reference() -> Vec<Point2D> {
        (0..=50).map(|i| Point2D::new(i as f64, 0.0)).collect()
    }

    fn input<'a>(reference: &'a [Point2D], v: f64, stop_distance: f64, obstacles: &'a [Obstacle]) -> PlanningInput<'a> {
        PlanningInput {
            init_point: TrajectoryPoint { v, ..Default::default() },
            timestamp: 100.0,
            reference_line: reference,
            stop_distance,
            road_boundaries: None,
            obstacles,
        }
    }

    fn scripted_planner(engine: ScriptedEngine) -> MiqpPlanner<ScriptedEngine, ProjectedGradientOptimizer> {
        MiqpPlanner::new(MiqpPlannerConfig::default(), engine, ProjectedGradientOptimizer::new())
    }

    fn reference_planner(config: MiqpPlannerConfig) -> MiqpPlanner<ReferenceTrackingEngine, ProjectedGradientOptimizer> {
        let engine = ReferenceTrackingEngine::new(MiqpEngineSettings::from_config(&config));
        MiqpPlanner::new(config, engine, ProjectedGradientOptimizer::new())
    }

    #[test]
    fn test_driving_scenario() {
        let reference = straight_reference();
        let mut planner = reference_planner(MiqpPlannerConfig::default());
        let outcome = planner.plan(&input(&reference, 5.0, 1000.0, &[])).unwrap();

        assert_eq!(outcome.state, PlannerState::Driving);
        assert!(!outcome.smoothed);
        assert!(!outcome.collisions.any());
        assert_eq!(outcome.trajectory.len(), 20);
        assert_eq!(planner.ego_handle(), Some(AgentHandle(0)));
        for (a, b) in outcome.trajectory.iter().tuple_windows() {
            assert!(b.relative_time > a.relative_time);
            assert!(b.s > a.s);
        }
        assert!(outcome.trajectory.iter().all(|p| (p.v - 5.0).abs() < 1e-9));
    }

    #[test]
    fn test_driving_target_tracks_reference() {
        let reference = straight_reference();
        let mut planner = scripted_planner(ScriptedEngine::new(buffer(&[5.0; 20])));
        let outcome = planner.plan(&input(&reference, 5.0, 1000.0, &[])).unwrap();
        assert_eq!(outcome.state, PlannerState::Driving);
        assert_eq!(planner.engine().added, vec![(5.0, 0.0, true)]);
        assert_eq!(planner.engine().solves, 1);
    }

    #[test]
    fn test_stop_scenario_targets_zero() {
        let reference = straight_reference();
        let mut planner = scripted_planner(ScriptedEngine::new(buffer(&[5.0; 20])));
        planner.plan(&input(&reference, 5.0, 2.0, &[])).unwrap();
        assert_eq!(planner.engine().added, vec![(0.0, 0.0, false)]);
    }

    #[test]
    fn test_second_cycle_updates_agent() {
        let reference = straight_reference();
        let mut planner = scripted_planner(ScriptedEngine::new(buffer(&[5.0; 20])));
        planner.plan(&input(&reference, 5.0, 1000.0, &[])).unwrap();
        planner.plan(&input(&reference, 5.0, 20.0, &[])).unwrap();
        let engine = planner.engine();
        assert_eq!(engine.added.len(), 1);
        assert_eq!(engine.updates, 1);
        assert_eq!(engine.desired, vec![(0.0, 17.0)]);
    }

    #[test]
    fn test_stop_state_reuses_reference_without_truncation() {
        let reference = straight_reference();
        let mut speeds = vec![0.5; 20];
        speeds[0] = 0.8;
        let mut planner = scripted_planner(ScriptedEngine::new(buffer(&speeds)));
        let outcome = planner.plan(&input(&reference, 0.5, 2.0, &[])).unwrap();
        assert_eq!(outcome.state, PlannerState::Stop);
        assert_eq!(planner.engine().solves, 0);
        assert_eq!(outcome.trajectory.len(), 20);
    }

    #[test]
    fn test_start_state_reuses_reference() {
        let reference = straight_reference();
        let mut planner = scripted_planner(ScriptedEngine::new(buffer(&[0.2; 20])));
        let outcome = planner.plan(&input(&reference, 0.0, 100.0, &[])).unwrap();
        assert_eq!(outcome.state, PlannerState::Start);
        assert_eq!(planner.engine().solves, 0);
        assert_eq!(planner.engine().added, vec![(5.0, 0.0, true)]);
    }

    #[test]
    fn test_standstill_skips_engine() {
        let reference = straight_reference();
        let mut planner = scripted_planner(ScriptedEngine::new(buffer(&[5.0; 20])));
        let outcome = planner.plan(&input(&reference, 0.05, 1.0, &[])).unwrap();
        assert_eq!(outcome.state, PlannerState::Standstill);
        assert_eq!(outcome.trajectory.len(), 20);
        assert!(outcome.trajectory.iter().all(|p| p.v == 0.0));
        assert!(planner.engine().added.is_empty());
        assert_eq!(planner.ego_handle(), None);
    }

    #[test]
    fn test_too_short_trajectory_rejected() {
        let reference = straight_reference();
        let mut speeds = vec![5.0; 20];
        for v in speeds.iter_mut().skip(3) {
            *v = 0.1;
        }
        let mut planner = scripted_planner(ScriptedEngine::new(buffer(&speeds)));
        match planner.plan(&input(&reference, 5.0, 1000.0, &[])) {
            Err(PlanningError::TrajectoryTooShort { valid, required }) => {
                assert_eq!(valid, 3);
                assert_eq!(required, 10);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_solve_failure() {
        let reference = straight_reference();
        let mut engine = ScriptedEngine::new(buffer(&[5.0; 20]));
        engine.solve_result = false;
        let mut planner = scripted_planner(engine);
        let result = planner.plan(&input(&reference, 5.0, 1000.0, &[]));
        assert!(matches!(result, Err(PlanningError::SolveFailed)));
    }

    #[test]
    fn test_obstacle_registration_failure() {
        let reference = straight_reference();
        let obstacles = vec![Obstacle::new_static("parked", OrientedBox2d::new(Point2D::new(20.0, 5.0), 0.0, 4.0, 2.0))];
        let mut engine = ScriptedEngine::new(buffer(&[5.0; 20]));
        engine.reject_obstacles = true;
        let mut planner = scripted_planner(engine);
        let result = planner.plan(&input(&reference, 5.0, 1000.0, &obstacles));
        assert!(matches!(result, Err(PlanningError::ObstacleRegistration { .. })));
        assert_eq!(planner.engine().solves, 0);
    }

    #[test]
    fn test_empty_reference_rejected() {
        let mut planner = scripted_planner(ScriptedEngine::new(buffer(&[5.0; 20])));
        let result = planner.plan(&input(&[], 5.0, 1000.0, &[]));
        assert!(matches!(result, Err(PlanningError::InvalidInput(_))));
    }

    #[test]
    fn test_collision_is_reported_not_enforced() {
        let reference = straight_reference();
        // a safety margin makes the static obstacle soft, so the engine drives through it
        let config = MiqpPlannerConfig { extension_width_static: 0.5, ..Default::default() };
        let obstacles = vec![Obstacle::new_static("on_path", OrientedBox2d::new(Point2D::new(10.0, 0.0), 0.0, 2.0, 2.0))];
        let mut planner = reference_planner(config);
        let outcome = planner.plan(&input(&reference, 5.0, 1000.0, &obstacles)).unwrap();
        assert!(outcome.collisions.obstacle_collision);
        assert_eq!(planner.engine().num_obstacles(), 1);
    }

    #[test]
    fn test_hard_obstacle_fails_cycle() {
        let reference = straight_reference();
        let obstacles = vec![Obstacle::new_static("on_path", OrientedBox2d::new(Point2D::new(10.0, 0.0), 0.0, 2.0, 2.0))];
        let mut planner = reference_planner(MiqpPlannerConfig::default());
        let result = planner.plan(&input(&reference, 5.0, 1000.0, &obstacles));
        assert!(matches!(result, Err(PlanningError::SolveFailed)));
    }

    #[test]
    fn test_environment_polygon() {
        let reference = straight_reference();
        let config = MiqpPlannerConfig { use_environment_polygon: true, ..Default::default() };
        let wide = RoadBoundaries {
            left: vec![Point2D::new(-5.0, 3.0), Point2D::new(60.0, 3.0)],
            right: vec![Point2D::new(-5.0, -3.0), Point2D::new(60.0, -3.0)],
        };
        let narrow = RoadBoundaries {
            left: vec![Point2D::new(-5.0, 3.0), Point2D::new(10.0, 3.0)],
            right: vec![Point2D::new(-5.0, -3.0), Point2D::new(10.0, -3.0)],
        };
        let mut planner = reference_planner(config);

        let mut cycle = input(&reference, 5.0, 1000.0, &[]);
        cycle.road_boundaries = Some(&wide);
        let outcome = planner.plan(&cycle).unwrap();
        assert!(!outcome.collisions.environment_collision);
        assert_eq!(planner.engine().environment().len(), 4);

        cycle.road_boundaries = Some(&narrow);
        let outcome = planner.plan(&cycle).unwrap();
        assert!(outcome.collisions.environment_collision);
    }

    #[test]
    fn test_smoothing_enabled() {
        let reference = straight_reference();
        let config = MiqpPlannerConfig {
            use_smoothing: true,
            smoothing_subsampling: 1,
            smoother_solver: SolverParameters { max_time: 2.0, ..Default::default() },
            ..Default::default()
        };
        let mut planner = reference_planner(config);
        let outcome = planner.plan(&input(&reference, 5.0, 1000.0, &[])).unwrap();
        assert!(outcome.smoothed);
        assert_eq!(outcome.trajectory.len(), 39);
        let last = outcome.trajectory.last().unwrap();
        assert!((last.x - 23.75).abs() < 1e-3);
        assert!((last.relative_time - 4.75).abs() < 1e-9);
    }
}
