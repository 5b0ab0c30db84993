//! Oriented bounding box
//!
//! A rectangle given by its center, heading, length (along the heading)
//! and width. Used for obstacle footprints and the ego vehicle footprint.

use crate::common::types::Point2D;
use crate::geometry::polygon::Polygon2d;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedBox2d {
    pub center: Point2D,
    pub heading: f64,
    pub length: f64,
    pub width: f64,
}

impl OrientedBox2d {
    pub fn new(center: Point2D, heading: f64, length: f64, width: f64) -> Self {
        Self { center, heading, length, width }
    }

    pub fn half_length(&self) -> f64 {
        self.length / 2.0
    }

    pub fn half_width(&self) -> f64 {
        self.width / 2.0
    }

    /// Unit vector along the heading
    pub fn axis(&self) -> (f64, f64) {
        (self.heading.cos(), self.heading.sin())
    }

    /// Corners in counter-clockwise order starting at the rear right corner
    pub fn corners(&self) -> [Point2D; 4] {
        let (c, s) = self.axis();
        let (dx1, dy1) = (c * self.half_length(), s * self.half_length());
        let (dx2, dy2) = (-s * self.half_width(), c * self.half_width());
        let (x, y) = (self.center.x, self.center.y);
        [
            Point2D::new(x - dx1 - dx2, y - dy1 - dy2),
            Point2D::new(x + dx1 - dx2, y + dy1 - dy2),
            Point2D::new(x + dx1 + dx2, y + dy1 + dy2),
            Point2D::new(x - dx1 + dx2, y - dy1 + dy2),
        ]
    }

    /// Extend the length symmetrically by `extension`
    pub fn longitudinal_extend(&mut self, extension: f64) {
        self.length += extension;
    }

    /// Extend the width symmetrically by `extension`
    pub fn lateral_extend(&mut self, extension: f64) {
        self.width += extension;
    }

    pub fn to_polygon(&self) -> Polygon2d {
        Polygon2d::from_box(self)
    }

    pub fn area(&self) -> f64 {
        self.length * self.width
    }

    /// Separating axis test between two boxes
    pub fn has_overlap(&self, other: &OrientedBox2d) -> bool {
        let dx = other.center.x - self.center.x;
        let dy = other.center.y - self.center.y;
        let (c1, s1) = self.axis();
        let (c2, s2) = other.axis();

        // axes: both boxes' longitudinal and lateral directions
        let axes = [(c1, s1), (-s1, c1), (c2, s2), (-s2, c2)];
        axes.iter().all(|&(ax, ay)| {
            let dist = (dx * ax + dy * ay).abs();
            let r1 = self.half_length() * (c1 * ax + s1 * ay).abs()
                + self.half_width() * (-s1 * ax + c1 * ay).abs();
            let r2 = other.half_length() * (c2 * ax + s2 * ay).abs()
                + other.half_width() * (-s2 * ax + c2 * ay).abs();
            dist <= r1 + r2
        })
    }
}
