//! Conversion of cycle inputs into the engine frame

use itertools::Itertools;
use log::debug;

use crate::common::traits::SecondOrderState;
use crate::common::types::{MapOffset, Point2D, TrajectoryPoint};

/// Cut the reference line at arc length `stop_dist + cutoff` and shift it
pub fn discretize_reference_line(
    reference: &[Point2D],
    stop_dist: f64,
    cutoff: f64,
    offset: &MapOffset,
) -> Vec<Point2D> {
    let max_s = stop_dist + cutoff;
    let mut s = 0.0;
    let mut points = Vec::with_capacity(reference.len());
    if let Some(first) = reference.first() {
        points.push(first.shifted(offset));
    }
    for (a, b) in reference.iter().tuple_windows() {
        s += a.distance(b);
        if s > max_s {
            break;
        }
        points.push(b.shifted(offset));
    }
    debug!("Reference line has {} of {} points", points.len(), reference.len());
    points
}

/// Left and right lane boundaries, both ordered along the driving direction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoadBoundaries {
    pub left: Vec<Point2D>,
    pub right: Vec<Point2D>,
}

impl RoadBoundaries {
    /// Closed road polygon: left boundary followed by the reversed right boundary
    pub fn polygon(&self) -> Vec<Point2D> {
        self.left.iter().chain(self.right.iter().rev()).copied().collect()
    }

    pub fn shifted_polygon(&self, offset: &MapOffset) -> Vec<Point2D> {
        self.polygon().iter().map(|p| p.shifted(offset)).collect()
    }
}

/// Initial state in the engine layout `[x, xd, xdd, y, yd, ydd]`
///
/// The speed is floored so the engine never receives a resting vehicle.
pub fn to_second_order_state(init: &TrajectoryPoint, offset: &MapOffset) -> SecondOrderState {
    let v = init.kinematic_state().floored_speed();
    let (sin_th, cos_th) = init.theta.sin_cos();
    let lateral = v * v * init.kappa;
    let position = init.position().shifted(offset);
    let state = SecondOrderState {
        x: position.x,
        xd: v * cos_th,
        xdd: init.a * cos_th - lateral * sin_th,
        y: position.y,
        yd: v * sin_th,
        ydd: init.a * sin_th + lateral * cos_th,
    };
    debug!("initial state in engine frame: {:?}", state);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_reference_line_cutoff() {
        let reference: Vec<Point2D> = (0..50).map(|i| Point2D::new(i as f64, 0.0)).collect();
        let offset = MapOffset::new(1.0, 1.0);
        let points = discretize_reference_line(&reference, 10.0, 5.0, &offset);
        assert_eq!(points.len(), 16);
        assert_eq!(points[0], Point2D::new(-1.0, -1.0));
        assert_eq!(points[15], Point2D::new(14.0, -1.0));
    }

    #[test]
    fn test_reference_line_shorter_than_cutoff() {
        let reference: Vec<Point2D> = (0..5).map(|i| Point2D::new(i as f64, 0.0)).collect();
        let points = discretize_reference_line(&reference, f64::INFINITY, 5.0, &MapOffset::default());
        assert_eq!(points, reference);
        assert!(discretize_reference_line(&[], 1.0, 1.0, &MapOffset::default()).is_empty());
    }

    #[test]
    fn test_road_polygon_order() {
        let bounds = RoadBoundaries {
            left: vec![Point2D::new(0.0, 2.0), Point2D::new(10.0, 2.0)],
            right: vec![Point2D::new(0.0, -2.0), Point2D::new(10.0, -2.0)],
        };
        assert_eq!(
            bounds.polygon(),
            vec![
                Point2D::new(0.0, 2.0),
                Point2D::new(10.0, 2.0),
                Point2D::new(10.0, -2.0),
                Point2D::new(0.0, -2.0)
            ]
        );
        let shifted = bounds.shifted_polygon(&MapOffset::new(5.0, 0.0));
        assert_eq!(shifted[0], Point2D::new(-5.0, 2.0));
    }

    #[test]
    fn test_second_order_state_straight() {
        let init = TrajectoryPoint { x: 10.0, y: 5.0, v: 5.0, a: 1.0, ..Default::default() };
        let state = to_second_order_state(&init, &MapOffset::new(10.0, 0.0));
        assert_eq!(state.to_array(), [0.0, 5.0, 1.0, 5.0, 0.0, 0.0]);
    }

    #[test]
    fn test_second_order_state_curved_heading_north() {
        let init = TrajectoryPoint { theta: FRAC_PI_2, v: 2.0, a: 0.5, kappa: 0.1, ..Default::default() };
        let state = to_second_order_state(&init, &MapOffset::default());
        assert!(state.xd.abs() < 1e-12);
        assert!((state.yd - 2.0).abs() < 1e-12);
        // centripetal 0.4 m/s^2 points to the left of the heading
        assert!((state.xdd + 0.4).abs() < 1e-12);
        assert!((state.ydd - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_second_order_state_floors_speed() {
        let init = TrajectoryPoint::default();
        let state = to_second_order_state(&init, &MapOffset::default());
        assert!((state.xd - 0.1).abs() < 1e-12);
        assert!((state.speed() - 0.1).abs() < 1e-12);
    }
}
