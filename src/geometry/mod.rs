//! Planar geometry used for obstacle abstraction and collision checks

pub mod oriented_box;
pub mod polygon;

pub use oriented_box::OrientedBox2d;
pub use polygon::{point_in_polygon, point_segment_distance, Polygon2d};
