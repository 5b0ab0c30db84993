//! Obstacle abstraction for the combinatorial engine
//!
//! Every obstacle handed to the engine is a `HorizonObstacle`: one
//! quadrilateral per horizon step, already inflated by the collision radius
//! and shifted into the engine frame.
//!
//! Static obstacles (no prediction) are optionally merged. The merge is a
//! greedy single pass in input order: a new polygon is fused into the first
//! accepted polygon closer than the merge distance and never compared
//! against polygons accepted later.

use log::{debug, info};

use crate::common::error::{PlanningError, PlanningResult};
use crate::common::traits::CombinatorialSolver;
use crate::common::types::{MapOffset, Point2D, TrajectoryPoint};
use crate::config::MiqpPlannerConfig;
use crate::geometry::{OrientedBox2d, Polygon2d};

/// Perceived obstacle with an optional predicted trajectory
#[derive(Debug, Clone, PartialEq)]
pub struct Obstacle {
    pub id: String,
    /// Virtual obstacles (stop lines, ...) are not physical
    pub is_virtual: bool,
    pub perception_box: OrientedBox2d,
    /// Predicted poses ordered by relative time
    pub trajectory: Option<Vec<TrajectoryPoint>>,
}

impl Obstacle {
    pub fn new_static(id: &str, perception_box: OrientedBox2d) -> Self {
        Self { id: id.to_string(), is_virtual: false, perception_box, trajectory: None }
    }

    pub fn new_dynamic(id: &str, perception_box: OrientedBox2d, trajectory: Vec<TrajectoryPoint>) -> Self {
        Self { id: id.to_string(), is_virtual: false, perception_box, trajectory: Some(trajectory) }
    }

    pub fn has_trajectory(&self) -> bool {
        self.trajectory.as_ref().map_or(false, |t| !t.is_empty())
    }

    /// Predicted pose at `t`, linearly interpolated and clamped to the prediction
    ///
    /// Obstacles without prediction stay at their perceived pose.
    pub fn point_at_time(&self, t: f64) -> TrajectoryPoint {
        let points = match &self.trajectory {
            Some(points) if !points.is_empty() => points,
            _ => {
                return TrajectoryPoint {
                    x: self.perception_box.center.x,
                    y: self.perception_box.center.y,
                    theta: self.perception_box.heading,
                    relative_time: t,
                    ..Default::default()
                }
            }
        };
        let first = &points[0];
        let last = &points[points.len() - 1];
        if t <= first.relative_time {
            return *first;
        }
        if t >= last.relative_time {
            return *last;
        }
        let upper = points.iter().position(|p| p.relative_time > t).unwrap_or(points.len() - 1);
        let (p0, p1) = (&points[upper - 1], &points[upper]);
        let dt = p1.relative_time - p0.relative_time;
        let r = if dt > 0.0 { (t - p0.relative_time) / dt } else { 0.0 };
        let lerp = |a: f64, b: f64| a + r * (b - a);
        TrajectoryPoint {
            s: lerp(p0.s, p1.s),
            x: lerp(p0.x, p1.x),
            y: lerp(p0.y, p1.y),
            theta: p0.theta + r * normalize_angle(p1.theta - p0.theta),
            kappa: lerp(p0.kappa, p1.kappa),
            dkappa: lerp(p0.dkappa, p1.dkappa),
            v: lerp(p0.v, p1.v),
            a: lerp(p0.a, p1.a),
            da: lerp(p0.da, p1.da),
            relative_time: t,
        }
    }

    /// Footprint at a predicted pose
    pub fn bounding_box_at(&self, point: &TrajectoryPoint) -> OrientedBox2d {
        OrientedBox2d::new(
            point.position(),
            point.theta,
            self.perception_box.length,
            self.perception_box.width,
        )
    }

    /// Footprint at time `t`
    pub fn box_at_time(&self, t: f64) -> OrientedBox2d {
        if self.has_trajectory() {
            self.bounding_box_at(&self.point_at_time(t))
        } else {
            self.perception_box
        }
    }
}

fn normalize_angle(angle: f64) -> f64 {
    let a = (angle + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI);
    a - std::f64::consts::PI
}

/// Obstacle as registered with the engine
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonObstacle {
    /// Source obstacle ids, more than one for merged static obstacles
    pub id: String,
    /// Four corners per horizon step in the engine frame
    pub corners: Vec<[Point2D; 4]>,
    pub is_static: bool,
    pub is_soft: bool,
}

impl HorizonObstacle {
    pub fn nr_steps(&self) -> usize {
        self.corners.len()
    }
}

/// Builds and registers the obstacle set of one planning cycle
#[derive(Debug, Clone)]
pub struct ObstacleAggregator {
    pub extension_length_static: f64,
    pub extension_width_static: f64,
    pub merge_static_obstacles: bool,
    pub merge_distance: f64,
    pub extension_length_dynamic: f64,
    pub offset: MapOffset,
}

impl ObstacleAggregator {
    pub fn from_config(config: &MiqpPlannerConfig) -> Self {
        Self {
            extension_length_static: config.extension_length_static,
            extension_width_static: config.extension_width_static,
            merge_static_obstacles: config.merge_static_obstacles,
            merge_distance: config.static_obstacle_distance_criteria,
            extension_length_dynamic: config.extension_length_dynamic,
            offset: config.map_offset(),
        }
    }

    /// Static obstacles are soft as soon as a safety margin is configured
    pub fn static_is_soft(&self) -> bool {
        self.extension_length_static > 0.0 || self.extension_width_static > 0.0
    }

    /// Extended and merged polygons of all static obstacles, with their ids
    pub fn static_polygons(&self, obstacles: &[Obstacle]) -> PlanningResult<Vec<(String, Polygon2d)>> {
        let mut polygons: Vec<(String, Polygon2d)> = Vec::new();
        for obstacle in obstacles.iter().filter(|o| !o.is_virtual && !o.has_trajectory()) {
            let mut obst_box = obstacle.perception_box;
            obst_box.longitudinal_extend(self.extension_length_static);
            obst_box.lateral_extend(self.extension_width_static);
            let poly = obst_box.to_polygon();

            let target = if self.merge_static_obstacles {
                polygons.iter_mut().find(|(_, p)| poly.distance_to(p) < self.merge_distance)
            } else {
                None
            };

            match target {
                Some((ids, existing)) => {
                    let vertices: Vec<Point2D> =
                        poly.vertices().iter().chain(existing.vertices()).copied().collect();
                    *existing = Polygon2d::convex_hull(&vertices).ok_or_else(|| {
                        PlanningError::InvalidObstacleGeometry {
                            id: obstacle.id.clone(),
                            reason: "merged hull is degenerate".to_string(),
                        }
                    })?;
                    info!("Not adding polygon from obstacle id {} explicitly, but merging with {}", obstacle.id, ids);
                    ids.push('+');
                    ids.push_str(&obstacle.id);
                }
                None => {
                    info!("Adding polygon from obstacle id {}", obstacle.id);
                    polygons.push((obstacle.id.clone(), poly));
                }
            }
        }
        Ok(polygons)
    }

    /// Buffer by `radius`, take the minimal bounding box and shift into the engine frame
    pub fn inflate(&self, id: &str, polygon: &Polygon2d, radius: f64) -> PlanningResult<[Point2D; 4]> {
        let invalid = |reason: &str| PlanningError::InvalidObstacleGeometry {
            id: id.to_string(),
            reason: reason.to_string(),
        };
        let buffered = polygon.expand_by_distance(radius).ok_or_else(|| invalid("buffer is degenerate"))?;
        let bbox = buffered.min_area_bounding_box().ok_or_else(|| invalid("no bounding box"))?;
        let corners = bbox.corners();
        Ok([
            corners[0].shifted(&self.offset),
            corners[1].shifted(&self.offset),
            corners[2].shifted(&self.offset),
            corners[3].shifted(&self.offset),
        ])
    }

    /// One horizon obstacle per static polygon, same shape at every step
    pub fn static_obstacles(
        &self,
        obstacles: &[Obstacle],
        nr_steps: usize,
        radius: f64,
    ) -> PlanningResult<Vec<HorizonObstacle>> {
        let is_soft = self.static_is_soft();
        self.static_polygons(obstacles)?
            .into_iter()
            .map(|(id, polygon)| {
                let corners = self.inflate(&id, &polygon, radius)?;
                Ok(HorizonObstacle { id, corners: vec![corners; nr_steps], is_static: true, is_soft })
            })
            .collect()
    }

    /// One horizon obstacle per predicted obstacle, sampled at `t0 + i * ts`
    pub fn dynamic_obstacles(
        &self,
        obstacles: &[Obstacle],
        t0: f64,
        nr_steps: usize,
        ts: f64,
        radius: f64,
    ) -> PlanningResult<Vec<HorizonObstacle>> {
        obstacles
            .iter()
            .filter(|o| !o.is_virtual && o.has_trajectory())
            .map(|obstacle| {
                debug!("Dynamic obstacle {}", obstacle.id);
                let corners = (0..nr_steps)
                    .map(|i| {
                        let point = obstacle.point_at_time(t0 + i as f64 * ts);
                        let mut step_box = obstacle.bounding_box_at(&point);
                        step_box.longitudinal_extend(self.extension_length_dynamic);
                        self.inflate(&obstacle.id, &step_box.to_polygon(), radius)
                    })
                    .collect::<PlanningResult<Vec<_>>>()?;
                Ok(HorizonObstacle { id: obstacle.id.clone(), corners, is_static: false, is_soft: true })
            })
            .collect()
    }

    /// Clear the engine's obstacles and register the current set
    ///
    /// Returns the number of registered obstacles.
    pub fn register<E: CombinatorialSolver>(
        &self,
        engine: &mut E,
        obstacles: &[Obstacle],
        t0: f64,
    ) -> PlanningResult<usize> {
        engine.remove_all_obstacles();
        let (nr_steps, ts, radius) = (engine.nr_steps(), engine.sample_time(), engine.collision_radius());

        let mut horizon = self.static_obstacles(obstacles, nr_steps, radius)?;
        horizon.extend(self.dynamic_obstacles(obstacles, t0, nr_steps, ts, radius)?);

        for obstacle in &horizon {
            let idx = engine
                .add_obstacle(obstacle)
                .ok_or_else(|| PlanningError::ObstacleRegistration { id: obstacle.id.clone() })?;
            info!(
                "Added obstacle {} with engine idx = {} is_static = {} is_soft = {}",
                obstacle.id, idx.0, obstacle.is_static, obstacle.is_soft
            );
        }
        Ok(horizon.len())
    }
}
