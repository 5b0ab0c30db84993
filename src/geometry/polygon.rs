//! Convex polygon
//!
//! Vertices are stored counter-clockwise without repeating the first
//! vertex. Construction always goes through the convex hull so every
//! `Polygon2d` is convex.

use std::f64::consts::PI;

use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::common::types::Point2D;
use crate::geometry::oriented_box::OrientedBox2d;

const EPS: f64 = 1e-10;

/// Maximum angular step when approximating the rounded corners of a buffer
const BUFFER_ARC_STEP: f64 = PI / 8.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon2d {
    vertices: Vec<Point2D>,
}

fn cross(o: &Point2D, a: &Point2D, b: &Point2D) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Distance from `p` to the segment `a`-`b`
pub fn point_segment_distance(p: &Point2D, a: &Point2D, b: &Point2D) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    if len_sq < EPS {
        return p.distance(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    p.distance(&Point2D::new(a.x + t * dx, a.y + t * dy))
}

/// Ray casting containment test, works for non-convex polygons
pub fn point_in_polygon(p: &Point2D, polygon: &[Point2D]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (&polygon[i], &polygon[j]);
        if (pi.y > p.y) != (pj.y > p.y) {
            let x_cross = pj.x + (p.y - pj.y) * (pi.x - pj.x) / (pi.y - pj.y);
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

impl Polygon2d {
    /// Convex hull of a point set (monotone chain)
    ///
    /// Returns `None` if the points do not span an area.
    pub fn convex_hull(points: &[Point2D]) -> Option<Self> {
        let mut pts: Vec<Point2D> = points.to_vec();
        pts.sort_by(|a, b| {
            (OrderedFloat(a.x), OrderedFloat(a.y)).cmp(&(OrderedFloat(b.x), OrderedFloat(b.y)))
        });
        pts.dedup_by(|a, b| (a.x - b.x).abs() < EPS && (a.y - b.y).abs() < EPS);
        if pts.len() < 3 {
            return None;
        }

        let mut lower: Vec<Point2D> = Vec::with_capacity(pts.len());
        for p in &pts {
            while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= EPS {
                lower.pop();
            }
            lower.push(*p);
        }
        let mut upper: Vec<Point2D> = Vec::with_capacity(pts.len());
        for p in pts.iter().rev() {
            while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= EPS {
                upper.pop();
            }
            upper.push(*p);
        }
        lower.pop();
        upper.pop();
        lower.extend(upper);

        if lower.len() < 3 {
            return None;
        }
        Some(Self { vertices: lower })
    }

    pub fn from_box(b: &OrientedBox2d) -> Self {
        Self { vertices: b.corners().to_vec() }
    }

    pub fn vertices(&self) -> &[Point2D] {
        &self.vertices
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    fn edges(&self) -> impl Iterator<Item = (&Point2D, &Point2D)> + '_ {
        self.vertices.iter().circular_tuple_windows()
    }

    pub fn area(&self) -> f64 {
        self.edges().map(|(a, b)| a.x * b.y - b.x * a.y).sum::<f64>() / 2.0
    }

    pub fn contains_point(&self, p: &Point2D) -> bool {
        self.edges().all(|(a, b)| cross(a, b, p) >= -EPS)
    }

    /// Distance between two convex polygons, zero if they overlap
    pub fn distance_to(&self, other: &Polygon2d) -> f64 {
        if self.overlaps(other) {
            return 0.0;
        }
        let d1 = self
            .vertices
            .iter()
            .flat_map(|p| other.edges().map(move |(a, b)| point_segment_distance(p, a, b)));
        let d2 = other
            .vertices
            .iter()
            .flat_map(|p| self.edges().map(move |(a, b)| point_segment_distance(p, a, b)));
        d1.chain(d2).fold(f64::INFINITY, f64::min)
    }

    /// Separating axis test for convex polygons
    pub fn overlaps(&self, other: &Polygon2d) -> bool {
        let separated_by = |poly: &Polygon2d| {
            poly.edges().any(|(a, b)| {
                let (nx, ny) = (b.y - a.y, a.x - b.x);
                let project = |q: &Polygon2d| {
                    q.vertices.iter().map(|p| p.x * nx + p.y * ny).fold(
                        (f64::INFINITY, f64::NEG_INFINITY),
                        |(lo, hi), v| (lo.min(v), hi.max(v)),
                    )
                };
                let (min1, max1) = project(self);
                let (min2, max2) = project(other);
                max1 < min2 - EPS || max2 < min1 - EPS
            })
        };
        !separated_by(self) && !separated_by(other)
    }

    /// Buffer the polygon by `distance`
    ///
    /// Corners are rounded with arcs sampled at most `BUFFER_ARC_STEP` apart.
    pub fn expand_by_distance(&self, distance: f64) -> Option<Polygon2d> {
        if distance <= 0.0 {
            return Some(self.clone());
        }
        let n = self.vertices.len();
        let normal_angle = |i: usize| {
            let (a, b) = (&self.vertices[i % n], &self.vertices[(i + 1) % n]);
            (a.x - b.x).atan2(b.y - a.y)
        };

        let mut points = Vec::new();
        for i in 0..n {
            let start = normal_angle(i + n - 1);
            let mut sweep = normal_angle(i) - start;
            while sweep < 0.0 {
                sweep += 2.0 * PI;
            }
            let steps = (sweep / BUFFER_ARC_STEP).ceil().max(1.0) as usize;
            let v = &self.vertices[i];
            for k in 0..=steps {
                let angle = start + sweep * k as f64 / steps as f64;
                points.push(Point2D::new(v.x + distance * angle.cos(), v.y + distance * angle.sin()));
            }
        }
        Polygon2d::convex_hull(&points)
    }

    /// Bounding box of minimal area, one side aligned with a polygon edge
    pub fn min_area_bounding_box(&self) -> Option<OrientedBox2d> {
        self.edges()
            .filter(|(a, b)| a.distance(b) > EPS)
            .map(|(a, b)| {
                let heading = (b.y - a.y).atan2(b.x - a.x);
                let (c, s) = (heading.cos(), heading.sin());
                let (mut min_l, mut max_l) = (f64::INFINITY, f64::NEG_INFINITY);
                let (mut min_w, mut max_w) = (f64::INFINITY, f64::NEG_INFINITY);
                for p in &self.vertices {
                    let l = p.x * c + p.y * s;
                    let w = -p.x * s + p.y * c;
                    min_l = min_l.min(l);
                    max_l = max_l.max(l);
                    min_w = min_w.min(w);
                    max_w = max_w.max(w);
                }
                let (cl, cw) = ((min_l + max_l) / 2.0, (min_w + max_w) / 2.0);
                let center = Point2D::new(cl * c - cw * s, cl * s + cw * c);
                OrientedBox2d::new(center, heading, max_l - min_l, max_w - min_w)
            })
            .min_by_key(|b| OrderedFloat(b.area()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(cx: f64, cy: f64, size: f64) -> Polygon2d {
        OrientedBox2d::new(Point2D::new(cx, cy), 0.0, size, size).to_polygon()
    }

    #[test]
    fn test_convex_hull_drops_interior_points() {
        let pts = vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(2.0, 0.0),
            Point2D::new(1.0, 1.0),
            Point2D::new(2.0, 2.0),
            Point2D::new(0.0, 2.0),
            Point2D::new(1.0, 0.0),
        ];
        let hull = Polygon2d::convex_hull(&pts).unwrap();
        assert_eq!(hull.num_vertices(), 4);
        assert!((hull.area() - 4.0).abs() < 1e-10);
    }

    #[test]
    fn test_convex_hull_degenerate() {
        let pts = vec![Point2D::new(0.0, 0.0), Point2D::new(1.0, 1.0), Point2D::new(2.0, 2.0)];
        assert!(Polygon2d::convex_hull(&pts).is_none());
    }

    #[test]
    fn test_distance() {
        let a = square(0.0, 0.0, 2.0);
        let b = square(5.0, 0.0, 2.0);
        let c = square(1.5, 0.0, 2.0);
        assert!((a.distance_to(&b) - 3.0).abs() < 1e-10);
        assert_eq!(a.distance_to(&c), 0.0);
    }

    #[test]
    fn test_expand_by_distance() {
        let a = square(0.0, 0.0, 2.0);
        let expanded = a.expand_by_distance(0.5).unwrap();
        for v in a.vertices() {
            assert!(expanded.contains_point(v));
        }
        // edge midpoints move out by the full distance
        assert!(expanded.contains_point(&Point2D::new(1.49, 0.0)));
        assert!(!expanded.contains_point(&Point2D::new(1.51, 0.0)));
    }

    #[test]
    fn test_min_area_bounding_box_of_rotated_box() {
        let b = OrientedBox2d::new(Point2D::new(3.0, -1.0), 0.4, 4.0, 2.0);
        let bb = b.to_polygon().min_area_bounding_box().unwrap();
        assert!((bb.area() - 8.0).abs() < 1e-8);
        assert!(bb.center.distance(&b.center) < 1e-8);
    }

    #[test]
    fn test_point_in_polygon_non_convex() {
        // U shape
        let poly = vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(3.0, 0.0),
            Point2D::new(3.0, 3.0),
            Point2D::new(2.0, 3.0),
            Point2D::new(2.0, 1.0),
            Point2D::new(1.0, 1.0),
            Point2D::new(1.0, 3.0),
            Point2D::new(0.0, 3.0),
        ];
        assert!(point_in_polygon(&Point2D::new(0.5, 2.0), &poly));
        assert!(!point_in_polygon(&Point2D::new(1.5, 2.0), &poly));
    }
}
