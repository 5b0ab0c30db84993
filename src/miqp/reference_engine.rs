//! Reference tracking engine
//!
//! A conforming `CombinatorialSolver` without integer decisions: every agent
//! follows its reference polyline with a jerk and acceleration limited
//! longitudinal profile. It keeps the registered obstacles and rejects a
//! solve whose plan runs through a hard obstacle, so the planner pipeline
//! can run end to end without a mixed-integer backend.

use std::time::{Duration, Instant};

use itertools::Itertools;
use log::{debug, info, warn};

use crate::common::traits::{
    AgentHandle, AgentUpdate, CombinatorialSolver, ObstacleIndex, RawTrajectoryKind,
    SecondOrderState,
};
use crate::common::types::Point2D;
use crate::config::{MiqpPlannerConfig, WarmstartType};
use crate::geometry::point_in_polygon;
use crate::miqp::obstacles::HorizonObstacle;
use crate::miqp::trajectory_codec::TRAJECTORY_SIZE;

/// Settings handed to a combinatorial engine at creation
#[derive(Debug, Clone, PartialEq)]
pub struct MiqpEngineSettings {
    pub nr_regions: usize,
    pub max_velocity_fitting: f64,
    pub nr_steps: usize,
    pub nr_neighbouring_possible_regions: usize,
    pub ts: f64,
    pub max_solution_time: f64,
    pub relative_mip_gap_tolerance: f64,
    pub mipemphasis: i32,
    pub relobjdif: f64,
    pub minimum_region_change_speed: f64,
    pub additional_steps_for_reference_longer_horizon: usize,
    pub use_sos: bool,
    pub use_branching_priorities: bool,
    pub warmstart_type: WarmstartType,
    pub wheel_base: f64,
    pub collision_radius: f64,
    pub jerk_weight: f64,
    pub position_weight: f64,
    pub velocity_weight: f64,
    pub acceleration_weight: f64,
    pub slack_weight: f64,
    pub slack_weight_obstacle: f64,
    pub obstacle_roi_filter: bool,
    pub obstacle_roi_behind_distance: f64,
    pub obstacle_roi_front_distance: f64,
    pub obstacle_roi_side_distance: f64,
    pub acc_lon_max_limit: f64,
    pub acc_lon_min_limit: f64,
    pub jerk_lon_max_limit: f64,
    pub acc_lat_min_max_limit: f64,
    pub jerk_lat_min_max_limit: f64,
    pub simplification_distance_map: f64,
    pub simplification_distance_reference_line: f64,
    pub buffer_reference: f64,
    pub buffer_for_merging_tolerance: f64,
    pub ref_line_interp_inc: f64,
    pub precision: u32,
    pub constant_agent_safety_distance_slack: f64,
    pub lambda: f64,
}

impl MiqpEngineSettings {
    pub fn from_config(config: &MiqpPlannerConfig) -> Self {
        Self {
            nr_regions: config.nr_regions,
            max_velocity_fitting: config.max_velocity_fitting,
            nr_steps: config.nr_steps,
            nr_neighbouring_possible_regions: config.nr_neighbouring_possible_regions,
            ts: config.ts,
            max_solution_time: config.max_solution_time,
            relative_mip_gap_tolerance: config.relative_mip_gap_tolerance,
            mipemphasis: config.mipemphasis,
            relobjdif: config.relobjdif,
            minimum_region_change_speed: config.minimum_region_change_speed,
            additional_steps_for_reference_longer_horizon: config
                .additional_steps_for_reference_longer_horizon,
            use_sos: config.use_sos,
            use_branching_priorities: config.use_branching_priorities,
            warmstart_type: config.warmstart_type,
            wheel_base: config.vehicle.wheel_base + config.wheelbase_add,
            collision_radius: config.vehicle.width / 2.0 + config.collision_radius_add,
            jerk_weight: config.jerk_weight,
            position_weight: config.position_weight,
            velocity_weight: config.velocity_weight,
            acceleration_weight: 0.0,
            slack_weight: 30.0,
            slack_weight_obstacle: 2000.0,
            obstacle_roi_filter: config.obstacle_roi_filter,
            obstacle_roi_behind_distance: config.obstacle_roi_behind_distance,
            obstacle_roi_front_distance: config.obstacle_roi_front_distance,
            obstacle_roi_side_distance: config.obstacle_roi_side_distance,
            acc_lon_max_limit: config.acc_lon_max_limit,
            acc_lon_min_limit: config.acc_lon_min_limit,
            jerk_lon_max_limit: config.jerk_lon_max_limit,
            acc_lat_min_max_limit: config.acc_lat_min_max_limit,
            jerk_lat_min_max_limit: config.jerk_lat_min_max_limit,
            simplification_distance_map: 0.2,
            simplification_distance_reference_line: 0.05,
            buffer_reference: 1.0,
            buffer_for_merging_tolerance: 1.0,
            ref_line_interp_inc: 0.2,
            precision: 12,
            constant_agent_safety_distance_slack: 3.0,
            lambda: 0.5,
        }
    }
}

impl Default for MiqpEngineSettings {
    fn default() -> Self {
        Self::from_config(&MiqpPlannerConfig::default())
    }
}

/// Reference polyline with cumulative arc length
#[derive(Debug, Clone, PartialEq)]
struct Polyline {
    points: Vec<Point2D>,
    s: Vec<f64>,
}

impl Polyline {
    fn new(points: &[Point2D]) -> Self {
        let mut s = Vec::with_capacity(points.len());
        s.push(0.0);
        for (a, b) in points.iter().tuple_windows() {
            let last = s[s.len() - 1];
            s.push(last + a.distance(b));
        }
        Self { points: points.to_vec(), s }
    }

    fn segment_heading(&self, i: usize) -> f64 {
        let (a, b) = (&self.points[i], &self.points[i + 1]);
        (b.y - a.y).atan2(b.x - a.x)
    }

    /// Arc length of the closest point on the polyline
    fn project(&self, p: &Point2D) -> f64 {
        let mut best = (f64::INFINITY, 0.0);
        for (i, (a, b)) in self.points.iter().tuple_windows().enumerate() {
            let (dx, dy) = (b.x - a.x, b.y - a.y);
            let len_sq = dx * dx + dy * dy;
            let t = if len_sq > 0.0 {
                (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let q = Point2D::new(a.x + t * dx, a.y + t * dy);
            let d = p.distance(&q);
            if d < best.0 {
                best = (d, self.s[i] + t * (self.s[i + 1] - self.s[i]));
            }
        }
        best.1
    }

    /// Position and heading at arc length `s`, extrapolated past both ends
    fn pose_at(&self, s: f64) -> (Point2D, f64) {
        let last_segment = self.points.len() - 2;
        let i = self.s.iter().skip(1).position(|&si| si >= s).unwrap_or(last_segment).min(last_segment);
        let heading = self.segment_heading(i);
        let a = &self.points[i];
        let ds = s - self.s[i];
        (Point2D::new(a.x + ds * heading.cos(), a.y + ds * heading.sin()), heading)
    }
}

#[derive(Debug, Clone)]
struct Agent {
    state: SecondOrderState,
    reference: Polyline,
    desired_speed: f64,
    desired_offset: f64,
    track_reference_position: bool,
    /// Samples (t, x, y, vx, vy, ax, ay) relative to the update time
    last_reference: Vec<[f64; TRAJECTORY_SIZE]>,
    solution: Option<Vec<[f64; TRAJECTORY_SIZE]>>,
}

/// In-crate combinatorial engine following the reference line
#[derive(Debug, Clone)]
pub struct ReferenceTrackingEngine {
    settings: MiqpEngineSettings,
    agents: Vec<Agent>,
    obstacles: Vec<HorizonObstacle>,
    environment: Vec<Point2D>,
}

impl ReferenceTrackingEngine {
    pub fn new(settings: MiqpEngineSettings) -> Self {
        info!("Creating reference tracking engine with N = {}, ts = {}", settings.nr_steps, settings.ts);
        Self { settings, agents: Vec::new(), obstacles: Vec::new(), environment: Vec::new() }
    }

    pub fn settings(&self) -> &MiqpEngineSettings {
        &self.settings
    }

    pub fn num_obstacles(&self) -> usize {
        self.obstacles.len()
    }

    pub fn environment(&self) -> &[Point2D] {
        &self.environment
    }

    /// Longitudinal profile along the reference
    fn plan(&self, agent: &Agent) -> Vec<[f64; TRAJECTORY_SIZE]> {
        let st = &self.settings;
        let ts = st.ts;
        let mut s = agent.reference.project(&agent.state.position());
        let stop_s = s + agent.desired_offset;
        let mut v = agent.state.speed();
        let (_, heading0) = agent.reference.pose_at(s);
        let mut a = agent.state.xdd * heading0.cos() + agent.state.ydd * heading0.sin();
        // comfortable braking uses half of the deceleration limit
        let comfort_decel = -0.5 * st.acc_lon_min_limit;

        let mut samples = Vec::with_capacity(st.nr_steps);
        for i in 0..st.nr_steps {
            let (position, heading) = agent.reference.pose_at(s);
            let (sin_h, cos_h) = heading.sin_cos();
            samples.push([
                i as f64 * ts,
                position.x,
                position.y,
                v * cos_h,
                v * sin_h,
                a * cos_h,
                a * sin_h,
            ]);

            let target = if agent.track_reference_position {
                agent.desired_speed
            } else {
                let remaining = (stop_s - s).max(0.0);
                agent.desired_speed.min((2.0 * comfort_decel * remaining).sqrt())
            };
            let a_wanted = ((target - v) / ts).max(st.acc_lon_min_limit).min(st.acc_lon_max_limit);
            let max_da = st.jerk_lon_max_limit * ts;
            a = a_wanted.max(a - max_da).min(a + max_da);
            let v_next = (v + a * ts).max(0.0);
            s += 0.5 * (v + v_next) * ts;
            if v_next == 0.0 {
                a = 0.0;
            }
            v = v_next;
        }
        samples
    }

    /// Whether a sample lies inside a hard obstacle at its step
    fn blocked(&self, samples: &[[f64; TRAJECTORY_SIZE]]) -> Option<String> {
        self.obstacles.iter().filter(|o| !o.is_soft).find_map(|o| {
            samples
                .iter()
                .zip(&o.corners)
                .any(|(sample, corners)| point_in_polygon(&Point2D::new(sample[1], sample[2]), corners))
                .then(|| o.id.clone())
        })
    }

    fn agent_mut(&mut self, handle: AgentHandle) -> Option<&mut Agent> {
        self.agents.get_mut(handle.0)
    }

    fn replan_reference(&mut self, handle: AgentHandle) {
        if let Some(agent) = self.agents.get(handle.0) {
            let samples = self.plan(agent);
            if let Some(agent) = self.agent_mut(handle) {
                agent.last_reference = samples;
            }
        }
    }
}

impl CombinatorialSolver for ReferenceTrackingEngine {
    fn nr_steps(&self) -> usize {
        self.settings.nr_steps
    }

    fn sample_time(&self) -> f64 {
        self.settings.ts
    }

    fn collision_radius(&self) -> f64 {
        self.settings.collision_radius
    }

    fn add_agent(&mut self, agent: &AgentUpdate<'_>, desired_speed: f64, desired_offset: f64) -> Option<AgentHandle> {
        if agent.reference.len() < 2 {
            warn!("Rejecting agent with a reference of {} points", agent.reference.len());
            return None;
        }
        self.agents.push(Agent {
            state: agent.initial_state,
            reference: Polyline::new(agent.reference),
            desired_speed,
            desired_offset,
            track_reference_position: agent.track_reference_position,
            last_reference: Vec::new(),
            solution: None,
        });
        let handle = AgentHandle(self.agents.len() - 1);
        self.replan_reference(handle);
        Some(handle)
    }

    fn update_agent(&mut self, handle: AgentHandle, update: &AgentUpdate<'_>) -> bool {
        if update.reference.len() < 2 {
            return false;
        }
        match self.agent_mut(handle) {
            Some(agent) => {
                agent.state = update.initial_state;
                agent.reference = Polyline::new(update.reference);
                agent.track_reference_position = update.track_reference_position;
                agent.solution = None;
            }
            None => return false,
        }
        self.replan_reference(handle);
        true
    }

    fn update_desired_velocity(&mut self, handle: AgentHandle, desired_speed: f64, desired_offset: f64) -> bool {
        match self.agent_mut(handle) {
            Some(agent) => {
                agent.desired_speed = desired_speed;
                agent.desired_offset = desired_offset;
            }
            None => return false,
        }
        self.replan_reference(handle);
        true
    }

    fn update_environment(&mut self, polygon: &[Point2D]) {
        self.environment = polygon.to_vec();
    }

    fn add_obstacle(&mut self, obstacle: &HorizonObstacle) -> Option<ObstacleIndex> {
        if obstacle.nr_steps() != self.settings.nr_steps {
            warn!(
                "Obstacle {} has {} steps, engine horizon is {}",
                obstacle.id,
                obstacle.nr_steps(),
                self.settings.nr_steps
            );
            return None;
        }
        self.obstacles.push(obstacle.clone());
        Some(ObstacleIndex(self.obstacles.len() - 1))
    }

    fn remove_all_obstacles(&mut self) {
        self.obstacles.clear();
    }

    fn solve(&mut self, timestamp: f64, budget: Duration) -> bool {
        let start = Instant::now();
        let mut solutions = Vec::with_capacity(self.agents.len());
        for (idx, agent) in self.agents.iter().enumerate() {
            let samples = self.plan(agent);
            if let Some(id) = self.blocked(&samples) {
                info!("Agent {} at t = {}: plan runs through hard obstacle {}", idx, timestamp, id);
                return false;
            }
            if start.elapsed() > budget {
                warn!("Solve exceeded its budget of {:?}", budget);
                return false;
            }
            solutions.push(samples);
        }
        for (agent, samples) in self.agents.iter_mut().zip(solutions) {
            agent.solution = Some(samples);
        }
        debug!("Solved {} agents in {:?}", self.agents.len(), start.elapsed());
        true
    }

    fn raw_trajectory(&self, handle: AgentHandle, kind: RawTrajectoryKind, start_time: f64) -> Option<Vec<f64>> {
        let agent = self.agents.get(handle.0)?;
        let samples = match kind {
            RawTrajectoryKind::LastReference => &agent.last_reference,
            RawTrajectoryKind::Optimized => agent.solution.as_ref()?,
        };
        Some(
            samples
                .iter()
                .flat_map(|sample| {
                    let mut shifted = *sample;
                    shifted[0] += start_time;
                    shifted
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miqp::trajectory_codec::{TRAJECTORY_TIME_IDX, TRAJECTORY_VX_IDX, TRAJECTORY_X_IDX};

    fn straight_reference() -> Vec<Point2D> {
        (0..=50).map(|i| Point2D::new(i as f64, 0.0)).collect()
    }

    fn state(v: f64) -> SecondOrderState {
        SecondOrderState { x: 0.0, xd: v, xdd: 0.0, y: 0.0, yd: 0.0, ydd: 0.0 }
    }

    fn update<'a>(reference: &'a [Point2D], v: f64, track: bool) -> AgentUpdate<'a> {
        AgentUpdate { initial_state: state(v), reference, timestamp: 0.0, track_reference_position: track }
    }

    fn obstacle(id: &str, x: f64, is_soft: bool) -> HorizonObstacle {
        let corners = [
            Point2D::new(x - 1.0, -1.0),
            Point2D::new(x + 1.0, -1.0),
            Point2D::new(x + 1.0, 1.0),
            Point2D::new(x - 1.0, 1.0),
        ];
        HorizonObstacle { id: id.to_string(), corners: vec![corners; 20], is_static: true, is_soft }
    }

    #[test]
    fn test_settings_defaults() {
        let settings = MiqpEngineSettings::default();
        assert_eq!(settings.nr_regions, 16);
        assert_eq!(settings.nr_steps, 20);
        assert!((settings.collision_radius - 2.11 / 2.0).abs() < 1e-12);
        assert!((settings.wheel_base - 2.8448).abs() < 1e-12);
        assert_eq!(settings.warmstart_type, WarmstartType::NoWarmstart);
        assert_eq!(settings.precision, 12);
    }

    #[test]
    fn test_constant_speed_plan() {
        let reference = straight_reference();
        let mut engine = ReferenceTrackingEngine::new(MiqpEngineSettings::default());
        let handle = engine.add_agent(&update(&reference, 5.0, true), 5.0, 0.0).unwrap();
        assert!(engine.solve(0.0, Duration::from_secs(1)));
        let raw = engine.raw_trajectory(handle, RawTrajectoryKind::Optimized, 2.0).unwrap();
        assert_eq!(raw.len(), 20 * TRAJECTORY_SIZE);
        for (i, sample) in raw.chunks(TRAJECTORY_SIZE).enumerate() {
            assert!((sample[TRAJECTORY_TIME_IDX] - (2.0 + 0.25 * i as f64)).abs() < 1e-12);
            assert!((sample[TRAJECTORY_X_IDX] - 1.25 * i as f64).abs() < 1e-9);
            assert!((sample[TRAJECTORY_VX_IDX] - 5.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_speed_respects_limits() {
        let reference = straight_reference();
        let mut engine = ReferenceTrackingEngine::new(MiqpEngineSettings::default());
        let handle = engine.add_agent(&update(&reference, 0.1, true), 10.0, 0.0).unwrap();
        assert!(engine.solve(0.0, Duration::from_secs(1)));
        let raw = engine.raw_trajectory(handle, RawTrajectoryKind::Optimized, 0.0).unwrap();
        let speeds: Vec<f64> = raw.chunks(TRAJECTORY_SIZE).map(|s| s[TRAJECTORY_VX_IDX]).collect();
        for (v0, v1) in speeds.iter().tuple_windows() {
            assert!(v1 >= v0);
            assert!((v1 - v0) / 0.25 <= 2.0 + 1e-9);
        }
    }

    #[test]
    fn test_stop_profile_reaches_standstill() {
        let reference = straight_reference();
        let mut engine = ReferenceTrackingEngine::new(MiqpEngineSettings::default());
        let handle = engine.add_agent(&update(&reference, 3.0, false), 0.0, 4.0).unwrap();
        let raw = engine.raw_trajectory(handle, RawTrajectoryKind::LastReference, 0.0).unwrap();
        let last = &raw[raw.len() - TRAJECTORY_SIZE..];
        assert!(last[TRAJECTORY_VX_IDX].abs() < 1e-9);
        assert!(raw.chunks(TRAJECTORY_SIZE).all(|s| s[TRAJECTORY_X_IDX] <= 4.0 + 1e-9));
    }

    #[test]
    fn test_optimized_requires_solve() {
        let reference = straight_reference();
        let mut engine = ReferenceTrackingEngine::new(MiqpEngineSettings::default());
        let handle = engine.add_agent(&update(&reference, 5.0, true), 5.0, 0.0).unwrap();
        assert!(engine.raw_trajectory(handle, RawTrajectoryKind::Optimized, 0.0).is_none());
        assert!(engine.raw_trajectory(handle, RawTrajectoryKind::LastReference, 0.0).is_some());
        assert!(engine.raw_trajectory(AgentHandle(7), RawTrajectoryKind::LastReference, 0.0).is_none());
    }

    #[test]
    fn test_hard_obstacle_blocks_solve() {
        let reference = straight_reference();
        let mut engine = ReferenceTrackingEngine::new(MiqpEngineSettings::default());
        engine.add_agent(&update(&reference, 5.0, true), 5.0, 0.0).unwrap();
        assert!(engine.add_obstacle(&obstacle("soft", 10.0, true)).is_some());
        assert!(engine.solve(0.0, Duration::from_secs(1)));
        assert!(engine.add_obstacle(&obstacle("hard", 10.0, false)).is_some());
        assert!(!engine.solve(0.0, Duration::from_secs(1)));
        engine.remove_all_obstacles();
        assert_eq!(engine.num_obstacles(), 0);
        assert!(engine.solve(0.0, Duration::from_secs(1)));
    }

    #[test]
    fn test_rejects_wrong_horizon_and_short_reference() {
        let mut engine = ReferenceTrackingEngine::new(MiqpEngineSettings::default());
        let mut short = obstacle("a", 0.0, true);
        short.corners.truncate(3);
        assert!(engine.add_obstacle(&short).is_none());
        let reference = vec![Point2D::origin()];
        assert!(engine.add_agent(&update(&reference, 5.0, true), 5.0, 0.0).is_none());
        assert!(!engine.update_desired_velocity(AgentHandle(0), 1.0, 0.0));
    }

    #[test]
    fn test_update_agent_replans() {
        let reference = straight_reference();
        let mut engine = ReferenceTrackingEngine::new(MiqpEngineSettings::default());
        let handle = engine.add_agent(&update(&reference, 5.0, true), 5.0, 0.0).unwrap();
        let mut moved = update(&reference, 5.0, true);
        moved.initial_state.x = 10.0;
        assert!(engine.update_agent(handle, &moved));
        let raw = engine.raw_trajectory(handle, RawTrajectoryKind::LastReference, 0.0).unwrap();
        assert!((raw[TRAJECTORY_X_IDX] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_polyline_pose() {
        let line = Polyline::new(&[Point2D::new(0.0, 0.0), Point2D::new(10.0, 0.0), Point2D::new(10.0, 10.0)]);
        assert!((line.project(&Point2D::new(10.5, 4.0)) - 14.0).abs() < 1e-12);
        let (p, heading) = line.pose_at(15.0);
        assert!((p.x - 10.0).abs() < 1e-12 && (p.y - 5.0).abs() < 1e-12);
        assert!((heading - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        let (beyond, _) = line.pose_at(22.0);
        assert!((beyond.y - 12.0).abs() < 1e-12);
    }
}
