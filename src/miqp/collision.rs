//! Post-hoc collision verification of planned trajectories
//!
//! Findings are reported, never enforced: the planner logs a collision and
//! still publishes the trajectory.

use crate::common::types::{DiscretizedTrajectory, Point2D, TrajectoryPoint};
use crate::config::VehicleParams;
use crate::geometry::{point_in_polygon, OrientedBox2d};
use crate::miqp::obstacles::Obstacle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollisionReport {
    pub obstacle_collision: bool,
    pub environment_collision: bool,
}

impl CollisionReport {
    pub fn any(&self) -> bool {
        self.obstacle_collision || self.environment_collision
    }
}

/// Ego footprint at a trajectory point
///
/// The reference point sits `back_edge_to_center` in front of the rear edge.
pub fn ego_box(point: &TrajectoryPoint, vehicle: &VehicleParams) -> OrientedBox2d {
    let shift = vehicle.length / 2.0 - vehicle.back_edge_to_center;
    let (sin_th, cos_th) = point.theta.sin_cos();
    let center = Point2D::new(point.x + shift * cos_th, point.y + shift * sin_th);
    OrientedBox2d::new(center, point.theta, vehicle.length, vehicle.width)
}

/// Whether the ego footprint overlaps a non-virtual obstacle at any point
pub fn in_collision(obstacles: &[Obstacle], trajectory: &DiscretizedTrajectory, vehicle: &VehicleParams) -> bool {
    trajectory.iter().any(|point| {
        let ego = ego_box(point, vehicle);
        obstacles
            .iter()
            .filter(|o| !o.is_virtual)
            .any(|o| ego.has_overlap(&o.box_at_time(point.relative_time)))
    })
}

/// Whether any trajectory point leaves the road polygon
pub fn environment_collision(road_polygon: &[Point2D], trajectory: &DiscretizedTrajectory) -> bool {
    trajectory.iter().any(|p| !point_in_polygon(&p.position(), road_polygon))
}
