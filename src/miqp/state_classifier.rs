//! Per-cycle driving mode and motion target

use crate::common::types::{DiscretizedTrajectory, TrajectoryPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerState {
    /// Regular optimized planning
    Driving,
    /// Slow, away from the destination: ramp up toward cruise speed
    Start,
    /// Slow, close to the destination: decelerate toward the stop point
    Stop,
    /// Stopped at the destination: hold the current pose
    Standstill,
}

/// Classify the current cycle from speed and distance to the stop point
pub fn determine_planner_state(
    v: f64,
    stop_dist: f64,
    destination_stop_threshold: f64,
    standstill_velocity_threshold: f64,
    minimum_valid_speed_planning: f64,
) -> PlannerState {
    if v >= minimum_valid_speed_planning {
        PlannerState::Driving
    } else if stop_dist < destination_stop_threshold {
        if v < standstill_velocity_threshold {
            PlannerState::Standstill
        } else {
            PlannerState::Stop
        }
    } else {
        PlannerState::Start
    }
}

/// Target handed to the combinatorial engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionTarget {
    pub track_reference_position: bool,
    pub desired_speed: f64,
    pub desired_offset: f64,
}

/// Select speed and offset targets
///
/// Approaching the stop point means the remaining distance in front of the
/// stop margin is below `start_slowdown`.
pub fn select_motion_target(
    state: PlannerState,
    stop_dist: f64,
    stop_before: f64,
    start_slowdown: f64,
    cruise_speed: f64,
    desired_offset: f64,
) -> MotionTarget {
    let remaining = stop_dist - stop_before;
    if remaining < start_slowdown {
        let desired_speed = if state == PlannerState::Start { cruise_speed } else { 0.0 };
        MotionTarget {
            track_reference_position: false,
            desired_speed,
            desired_offset: remaining.max(0.0),
        }
    } else {
        MotionTarget { track_reference_position: true, desired_speed: cruise_speed, desired_offset }
    }
}

/// Trajectory holding the current pose over `nr_steps` samples
pub fn create_standstill_trajectory(
    init: &TrajectoryPoint,
    nr_steps: usize,
    ts: f64,
) -> DiscretizedTrajectory {
    let points = (0..nr_steps)
        .map(|i| TrajectoryPoint {
            s: 0.0,
            v: 0.0,
            a: 0.0,
            da: 0.0,
            dkappa: 0.0,
            relative_time: init.relative_time + i as f64 * ts,
            ..*init
        })
        .collect();
    DiscretizedTrajectory::from_points(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(v: f64, stop_dist: f64) -> PlannerState {
        determine_planner_state(v, stop_dist, 3.0, 0.1, 1.0)
    }

    #[test]
    fn test_fast_is_driving() {
        assert_eq!(classify(5.0, 1.0), PlannerState::Driving);
        assert_eq!(classify(1.0, 100.0), PlannerState::Driving);
    }

    #[test]
    fn test_slow_near_destination() {
        assert_eq!(classify(0.05, 2.0), PlannerState::Standstill);
        assert_eq!(classify(0.5, 2.0), PlannerState::Stop);
    }

    #[test]
    fn test_slow_far_from_destination() {
        assert_eq!(classify(0.0, 50.0), PlannerState::Start);
        assert_eq!(classify(0.5, 3.0), PlannerState::Start);
    }

    #[test]
    fn test_target_far_from_stop() {
        let target = select_motion_target(PlannerState::Driving, 100.0, 3.0, 30.0, 5.0, 1.5);
        assert_eq!(
            target,
            MotionTarget { track_reference_position: true, desired_speed: 5.0, desired_offset: 1.5 }
        );
    }

    #[test]
    fn test_target_approaching_stop() {
        let target = select_motion_target(PlannerState::Driving, 20.0, 3.0, 30.0, 5.0, 1.5);
        assert!(!target.track_reference_position);
        assert_eq!(target.desired_speed, 0.0);
        assert!((target.desired_offset - 17.0).abs() < 1e-12);
    }

    #[test]
    fn test_target_start_near_stop_keeps_cruise_speed() {
        let target = select_motion_target(PlannerState::Start, 20.0, 3.0, 30.0, 5.0, 1.5);
        assert!(!target.track_reference_position);
        assert_eq!(target.desired_speed, 5.0);
        assert!((target.desired_offset - 17.0).abs() < 1e-12);
    }

    #[test]
    fn test_target_offset_floored_at_zero() {
        let target = select_motion_target(PlannerState::Stop, 2.0, 3.0, 30.0, 5.0, 1.5);
        assert_eq!(target.desired_speed, 0.0);
        assert_eq!(target.desired_offset, 0.0);
    }

    #[test]
    fn test_standstill_trajectory() {
        let init = TrajectoryPoint {
            x: 3.0,
            y: 4.0,
            theta: 0.5,
            kappa: 0.01,
            v: 0.05,
            a: -0.2,
            relative_time: 1.0,
            ..Default::default()
        };
        let traj = create_standstill_trajectory(&init, 20, 0.25);
        assert_eq!(traj.len(), 20);
        for (i, p) in traj.iter().enumerate() {
            assert_eq!(p.position(), init.position());
            assert_eq!(p.theta, 0.5);
            assert_eq!(p.kappa, 0.01);
            assert_eq!(p.v, 0.0);
            assert_eq!(p.a, 0.0);
            assert!((p.relative_time - (1.0 + 0.25 * i as f64)).abs() < 1e-12);
        }
    }
}
