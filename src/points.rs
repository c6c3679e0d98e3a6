//! Control point management for the warp effect

use serde::Serialize;

use crate::transform::{frame_corners, Quad};

/// Default pick radius for grabbing a control point, in pixels
pub const DEFAULT_HIT_RADIUS: f64 = 15.0;

/// Corner names, indexed like the points
pub const CORNER_LABELS: [&str; 4] = ["Top Left", "Top Right", "Bottom Right", "Bottom Left"];

/// A 2D point in pixel coordinates
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }

    /// Rounded integer position for drawing
    pub fn to_pixel(self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }
}

/// The four draggable corners, ordered top-left, top-right, bottom-right, bottom-left
///
/// Positions are never validated: coincident or collinear points are
/// allowed and simply produce no transform.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ControlPoints {
    points: [Point; 4],
}

impl ControlPoints {
    /// Points on the corners of a `width x height` frame
    pub fn frame_corners(width: u32, height: u32) -> Self {
        Self::from_quad(frame_corners(width, height))
    }

    pub fn from_quad(quad: Quad) -> Self {
        Self {
            points: quad.map(|(x, y)| Point::new(x, y)),
        }
    }

    pub fn as_quad(&self) -> Quad {
        self.points.map(|p| (p.x, p.y))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }

    /// Index of the first point within `radius` of `(x, y)`
    ///
    /// Points are scanned in index order so the lowest index wins ties.
    pub fn hit_test(&self, x: f64, y: f64, radius: f64) -> Option<usize> {
        self.points
            .iter()
            .position(|p| p.distance_to(x, y) < radius)
    }

    /// Move point `index` to `(x, y)`, clamped to a `width x height` frame
    ///
    /// Returns the clamped position, or `None` for an invalid index.
    pub fn move_clamped(
        &mut self,
        index: usize,
        x: f64,
        y: f64,
        width: u32,
        height: u32,
    ) -> Option<Point> {
        let max_x = width.saturating_sub(1) as f64;
        let max_y = height.saturating_sub(1) as f64;
        let clamped = Point::new(x.clamp(0.0, max_x), y.clamp(0.0, max_y));

        let slot = self.points.get_mut(index)?;
        *slot = clamped;
        Some(clamped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl ControlPoints {
        pub(crate) fn get(&self, index: usize) -> Option<Point> {
            self.points.get(index).copied()
        }
    }

    fn square() -> ControlPoints {
        ControlPoints::from_quad([(10.0, 10.0), (90.0, 10.0), (90.0, 90.0), (10.0, 90.0)])
    }

    #[test]
    fn test_hit_near_first_point() {
        // distance 2.83 is inside the 15px radius
        assert_eq!(square().hit_test(12.0, 12.0, DEFAULT_HIT_RADIUS), Some(0));
    }

    #[test]
    fn test_hit_misses_center() {
        assert_eq!(square().hit_test(50.0, 50.0, DEFAULT_HIT_RADIUS), None);
    }

    #[test]
    fn test_hit_lowest_index_wins() {
        let points = ControlPoints::from_quad([(0.0, 0.0), (4.0, 0.0), (50.0, 50.0), (0.0, 50.0)]);
        // Closer to index 1, but index 0 is also in range
        assert_eq!(points.hit_test(3.0, 0.0, DEFAULT_HIT_RADIUS), Some(0));
    }

    #[test]
    fn test_hit_radius_is_exclusive() {
        let points = square();
        assert_eq!(points.hit_test(25.0, 10.0, DEFAULT_HIT_RADIUS), None);
        assert_eq!(points.hit_test(24.9, 10.0, DEFAULT_HIT_RADIUS), Some(0));
    }

    #[test]
    fn test_move_clamps_to_frame() {
        let mut points = ControlPoints::frame_corners(640, 480);
        let moved = points.move_clamped(2, 900.0, -20.0, 640, 480).unwrap();
        assert_eq!(moved, Point::new(639.0, 0.0));
        assert_eq!(points.get(2), Some(Point::new(639.0, 0.0)));
    }

    #[test]
    fn test_move_invalid_index() {
        let mut points = square();
        assert!(points.move_clamped(4, 1.0, 1.0, 100, 100).is_none());
        assert_eq!(points, square());
    }

    #[test]
    fn test_frame_corner_order() {
        let points = ControlPoints::frame_corners(640, 480);
        assert_eq!(points.get(0), Some(Point::new(0.0, 0.0)));
        assert_eq!(points.get(1), Some(Point::new(639.0, 0.0)));
        assert_eq!(points.get(2), Some(Point::new(639.0, 479.0)));
        assert_eq!(points.get(3), Some(Point::new(0.0, 479.0)));
        assert_eq!(CORNER_LABELS[2], "Bottom Right");
    }
}
