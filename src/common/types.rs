//! Common types used throughout miqp_planning

use itertools::Itertools;
use nalgebra::{Vector2, Vector6};

/// 2D point representation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn origin() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn distance(&self, other: &Point2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn to_vector(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    /// Shift the point into the origin-corrected frame
    pub fn shifted(&self, offset: &MapOffset) -> Self {
        Self::new(self.x - offset.x, self.y - offset.y)
    }

    /// Shift the point back from the origin-corrected frame
    pub fn unshifted(&self, offset: &MapOffset) -> Self {
        Self::new(self.x + offset.x, self.y + offset.y)
    }
}

impl From<(f64, f64)> for Point2D {
    fn from(tuple: (f64, f64)) -> Self {
        Self { x: tuple.0, y: tuple.1 }
    }
}

impl From<Vector2<f64>> for Point2D {
    fn from(v: Vector2<f64>) -> Self {
        Self { x: v[0], y: v[1] }
    }
}

/// Offset subtracted from map coordinates before they reach a solver
///
/// Map coordinates are large (UTM), the solvers work on small numbers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MapOffset {
    pub x: f64,
    pub y: f64,
}

impl MapOffset {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Vehicle kinematic state (x, y, theta, v, a, kappa)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KinematicState {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub v: f64,
    pub a: f64,
    pub kappa: f64,
}

impl KinematicState {
    /// Lower bound applied to the speed before it is used as a divisor
    pub const MIN_SPEED: f64 = 0.1;

    pub fn new(x: f64, y: f64, theta: f64, v: f64, a: f64, kappa: f64) -> Self {
        Self { x, y, theta, v, a, kappa }
    }

    pub fn to_vector(&self) -> Vector6<f64> {
        Vector6::new(self.x, self.y, self.theta, self.v, self.a, self.kappa)
    }

    pub fn from_vector(v: &Vector6<f64>) -> Self {
        Self::new(v[0], v[1], v[2], v[3], v[4], v[5])
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    /// Speed floored to a small positive value
    pub fn floored_speed(&self) -> f64 {
        self.v.max(Self::MIN_SPEED)
    }
}

/// One point of a time parameterized trajectory
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrajectoryPoint {
    /// Arc length from the first point [m]
    pub s: f64,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub kappa: f64,
    /// Curvature rate [1/(m s)]
    pub dkappa: f64,
    pub v: f64,
    pub a: f64,
    /// Jerk [m/s^3]
    pub da: f64,
    pub relative_time: f64,
}

impl TrajectoryPoint {
    pub fn from_state(state: &KinematicState, s: f64, relative_time: f64) -> Self {
        Self {
            s,
            x: state.x,
            y: state.y,
            theta: state.theta,
            kappa: state.kappa,
            dkappa: 0.0,
            v: state.v,
            a: state.a,
            da: 0.0,
            relative_time,
        }
    }

    pub fn kinematic_state(&self) -> KinematicState {
        KinematicState::new(self.x, self.y, self.theta, self.v, self.a, self.kappa)
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }
}

/// Ordered sequence of trajectory points
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscretizedTrajectory {
    pub points: Vec<TrajectoryPoint>,
}

impl DiscretizedTrajectory {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    pub fn from_points(points: Vec<TrajectoryPoint>) -> Self {
        Self { points }
    }

    pub fn push(&mut self, point: TrajectoryPoint) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&TrajectoryPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&TrajectoryPoint> {
        self.points.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrajectoryPoint> {
        self.points.iter()
    }

    pub fn total_length(&self) -> f64 {
        self.points
            .iter()
            .tuple_windows()
            .map(|(a, b)| a.position().distance(&b.position()))
            .sum()
    }

    /// Backfill jerk and curvature rate from a and kappa
    ///
    /// Forward differences over relative time, the last point repeats the
    /// previous rate. Zero time steps yield zero rates.
    pub fn fill_time_derivatives(&mut self) {
        let n = self.points.len();
        if n < 2 {
            for p in &mut self.points {
                p.da = 0.0;
                p.dkappa = 0.0;
            }
            return;
        }

        for i in 0..n - 1 {
            let (p0, p1) = (self.points[i], self.points[i + 1]);
            let dt = p1.relative_time - p0.relative_time;
            let (da, dkappa) = if dt > f64::EPSILON {
                ((p1.a - p0.a) / dt, (p1.kappa - p0.kappa) / dt)
            } else {
                (0.0, 0.0)
            };
            self.points[i].da = da;
            self.points[i].dkappa = dkappa;
        }
        self.points[n - 1].da = self.points[n - 2].da;
        self.points[n - 1].dkappa = self.points[n - 2].dkappa;
    }

    /// Convert to CSV string
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("t,s,x,y,theta,kappa,dkappa,v,a,da\n");
        for p in &self.points {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{}\n",
                p.relative_time, p.s, p.x, p.y, p.theta, p.kappa, p.dkappa, p.v, p.a, p.da
            ));
        }
        csv
    }
}

impl std::ops::Index<usize> for DiscretizedTrajectory {
    type Output = TrajectoryPoint;

    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}

impl<'a> IntoIterator for &'a DiscretizedTrajectory {
    type Item = &'a TrajectoryPoint;
    type IntoIter = std::slice::Iter<'a, TrajectoryPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(t: f64, x: f64, a: f64, kappa: f64) -> TrajectoryPoint {
        TrajectoryPoint { x, a, kappa, relative_time: t, ..Default::default() }
    }

    #[test]
    fn test_point2d_distance() {
        let p1 = Point2D::new(0.0, 0.0);
        let p2 = Point2D::new(3.0, 4.0);
        assert!((p1.distance(&p2) - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_point2d_offset_roundtrip() {
        let offset = MapOffset::new(100.0, -50.0);
        let p = Point2D::new(101.5, -48.0);
        let shifted = p.shifted(&offset);
        assert!((shifted.x - 1.5).abs() < 1e-12);
        assert!((shifted.y - 2.0).abs() < 1e-12);
        assert_eq!(shifted.unshifted(&offset), p);
    }

    #[test]
    fn test_floored_speed() {
        let state = KinematicState::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert!((state.floored_speed() - KinematicState::MIN_SPEED).abs() < 1e-12);
        let state = KinematicState::new(0.0, 0.0, 0.0, 3.0, 0.0, 0.0);
        assert!((state.floored_speed() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_fill_time_derivatives() {
        let mut traj = DiscretizedTrajectory::from_points(vec![
            point(0.0, 0.0, 0.0, 0.0),
            point(0.5, 1.0, 1.0, 0.1),
            point(1.0, 2.0, 1.5, 0.1),
        ]);
        traj.fill_time_derivatives();
        assert!((traj[0].da - 2.0).abs() < 1e-10);
        assert!((traj[0].dkappa - 0.2).abs() < 1e-10);
        assert!((traj[1].da - 1.0).abs() < 1e-10);
        assert!(traj[1].dkappa.abs() < 1e-10);
        assert!((traj[2].da - traj[1].da).abs() < 1e-10);
    }

    #[test]
    fn test_fill_time_derivatives_single_point() {
        let mut traj = DiscretizedTrajectory::from_points(vec![point(0.0, 0.0, 2.0, 0.1)]);
        traj.fill_time_derivatives();
        assert_eq!(traj[0].da, 0.0);
        assert_eq!(traj[0].dkappa, 0.0);
    }

    #[test]
    fn test_trajectory_total_length() {
        let traj = DiscretizedTrajectory::from_points(vec![
            point(0.0, 0.0, 0.0, 0.0),
            point(0.1, 1.0, 0.0, 0.0),
            point(0.2, 3.0, 0.0, 0.0),
        ]);
        assert!((traj.total_length() - 3.0).abs() < 1e-10);
        assert!(traj.to_csv().starts_with("t,s,x,y"));
    }
}
