//! Perspective transformation for the warp effect
//!
//! This module implements the perspective (homography) transformation
//! between two ordered quadrilaterals (top-left, top-right, bottom-right,
//! bottom-left) and the resampling of RGB frames through it.

use image::RgbImage;
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use rayon::prelude::*;

use crate::error::WarpError;

/// A quadrilateral in pixel coordinates, ordered TL, TR, BR, BL
pub type Quad = [(f64, f64); 4];

/// Twice the triangle area below which three points count as collinear
const COLLINEAR_EPSILON: f64 = 1e-6;

/// Homogeneous weights this close to zero map to infinity
const W_EPSILON: f64 = 1e-10;

/// Source positions may overshoot the frame edge by this much and still sample it
const EDGE_TOLERANCE: f64 = 1e-6;

/// Perspective transformation matrix (3x3 homography)
#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveTransform {
    /// Maps source coordinates to destination coordinates
    matrix: Matrix3<f64>,
    /// Inverse matrix for reverse mapping (used for warping)
    inverse: Matrix3<f64>,
    /// Destination image dimensions
    dst_width: u32,
    dst_height: u32,
}

impl PerspectiveTransform {
    /// Compute the perspective transform mapping `src[i]` onto `dst[i]`
    ///
    /// Fails with [`WarpError::DegenerateGeometry`] when either quad has
    /// three collinear (or coincident) points, or when the resulting
    /// system cannot be solved or inverted.
    pub fn compute(
        src: Quad,
        dst: Quad,
        dst_width: u32,
        dst_height: u32,
    ) -> Result<Self, WarpError> {
        if has_collinear_triple(&src) {
            return Err(WarpError::DegenerateGeometry("source quad has collinear points"));
        }
        if has_collinear_triple(&dst) {
            return Err(WarpError::DegenerateGeometry(
                "destination quad has collinear points",
            ));
        }

        let matrix = compute_homography(&src, &dst)?;
        let inverse = matrix
            .try_inverse()
            .ok_or(WarpError::DegenerateGeometry("homography is not invertible"))?;

        Ok(Self {
            matrix,
            inverse,
            dst_width,
            dst_height,
        })
    }

    /// The 3x3 matrix, normalized so that `m[(2, 2)] == 1`
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Transform a point from destination to source coordinates (inverse)
    ///
    /// Returns `None` for points mapped to infinity.
    #[inline]
    pub fn inverse_transform_point(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        apply_homography(&self.inverse, x, y)
    }

    /// Resample `src` through the transform into a `dst_width x dst_height` frame
    ///
    /// Uses bilinear interpolation. Destination pixels whose preimage lies
    /// outside the source frame stay black.
    pub fn warp_rgb(&self, src: &RgbImage) -> RgbImage {
        let dst_w = self.dst_width as usize;
        let mut dst = RgbImage::new(self.dst_width, self.dst_height);
        if dst_w == 0 || src.width() == 0 || src.height() == 0 {
            return dst;
        }

        let src_w = src.width() as usize;
        let src_h = src.height() as usize;
        let src_raw: &[u8] = src.as_raw();
        let dst_stride = dst_w * 3;

        dst.par_chunks_mut(dst_stride)
            .enumerate()
            .for_each(|(dst_y, row)| {
                for dst_x in 0..dst_w {
                    let Some((sx, sy)) = self.inverse_transform_point(dst_x as f64, dst_y as f64)
                    else {
                        continue;
                    };
                    if let Some(pixel) = bilinear_sample(src_raw, src_w, src_h, sx, sy) {
                        row[dst_x * 3..dst_x * 3 + 3].copy_from_slice(&pixel);
                    }
                }
            });

        dst
    }
}

/// The four corners of a `width x height` frame, ordered TL, TR, BR, BL
pub fn frame_corners(width: u32, height: u32) -> Quad {
    let right = width.saturating_sub(1) as f64;
    let bottom = height.saturating_sub(1) as f64;
    [(0.0, 0.0), (right, 0.0), (right, bottom), (0.0, bottom)]
}

/// True when any three of the four points are collinear
fn has_collinear_triple(quad: &Quad) -> bool {
    const TRIPLES: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];

    TRIPLES.iter().any(|&(a, b, c)| {
        let (ax, ay) = quad[a];
        let (bx, by) = quad[b];
        let (cx, cy) = quad[c];
        let cross = (bx - ax) * (cy - ay) - (by - ay) * (cx - ax);
        cross.abs() < COLLINEAR_EPSILON
    })
}

/// Compute a 3x3 homography matrix from 4 point correspondences
/// using the Direct Linear Transform (DLT) with h9 fixed to 1
fn compute_homography(src: &Quad, dst: &Quad) -> Result<Matrix3<f64>, WarpError> {
    // For each correspondence (x,y) -> (x',y'):
    // x*h1 + y*h2 + h3 - x'*x*h7 - x'*y*h8 = x'
    // x*h4 + y*h5 + h6 - y'*x*h7 - y'*y*h8 = y'
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for i in 0..4 {
        let (x, y) = src[i];
        let (xp, yp) = dst[i];
        let row1 = i * 2;
        let row2 = row1 + 1;

        a[(row1, 0)] = x;
        a[(row1, 1)] = y;
        a[(row1, 2)] = 1.0;
        a[(row1, 6)] = -xp * x;
        a[(row1, 7)] = -xp * y;
        b[row1] = xp;

        a[(row2, 3)] = x;
        a[(row2, 4)] = y;
        a[(row2, 5)] = 1.0;
        a[(row2, 6)] = -yp * x;
        a[(row2, 7)] = -yp * y;
        b[row2] = yp;
    }

    let h = a
        .lu()
        .solve(&b)
        .ok_or(WarpError::DegenerateGeometry("singular correspondence system"))?;

    if h.iter().any(|v| !v.is_finite()) {
        return Err(WarpError::DegenerateGeometry("non-finite homography"));
    }

    Ok(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
}

/// Apply a homography matrix to a point
#[inline]
fn apply_homography(h: &Matrix3<f64>, x: f64, y: f64) -> Option<(f64, f64)> {
    let v = h * Vector3::new(x, y, 1.0);
    let w = v[2];
    if w.abs() < W_EPSILON {
        return None;
    }
    Some((v[0] / w, v[1] / w))
}

/// Bilinear interpolation sampling of a packed RGB buffer
///
/// Returns `None` when the position is outside the frame.
#[inline]
fn bilinear_sample(src: &[u8], width: usize, height: usize, x: f64, y: f64) -> Option<[u8; 3]> {
    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    if !(-EDGE_TOLERANCE..=max_x + EDGE_TOLERANCE).contains(&x)
        || !(-EDGE_TOLERANCE..=max_y + EDGE_TOLERANCE).contains(&y)
    {
        return None;
    }

    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f64;
    let fy = y - y0 as f64;
    let stride = width * 3;

    let mut result = [0u8; 3];
    for (c, out) in result.iter_mut().enumerate() {
        let p00 = src[y0 * stride + x0 * 3 + c] as f64;
        let p10 = src[y0 * stride + x1 * 3 + c] as f64;
        let p01 = src[y1 * stride + x0 * 3 + c] as f64;
        let p11 = src[y1 * stride + x1 * 3 + c] as f64;

        let value = p00 * (1.0 - fx) * (1.0 - fy)
            + p10 * fx * (1.0 - fy)
            + p01 * (1.0 - fx) * fy
            + p11 * fx * fy;

        *out = value.round().clamp(0.0, 255.0) as u8;
    }

    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    impl PerspectiveTransform {
        /// Forward mapping, source to destination coordinates
        pub(crate) fn transform_point(&self, x: f64, y: f64) -> Option<(f64, f64)> {
            apply_homography(&self.matrix, x, y)
        }
    }

    fn assert_close(actual: (f64, f64), expected: (f64, f64)) {
        assert!(
            (actual.0 - expected.0).abs() < 1e-6 && (actual.1 - expected.1).abs() < 1e-6,
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn test_identity_transform() {
        let src = frame_corners(100, 100);
        let transform = PerspectiveTransform::compute(src, src, 100, 100).unwrap();

        let (x, y) = transform.transform_point(50.0, 50.0).unwrap();
        assert!((x - 50.0).abs() < 0.01);
        assert!((y - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_corners_round_trip_keystone() {
        let src = frame_corners(640, 480);
        // Non-parallelogram destination (true keystone)
        let dst = [(40.0, 30.0), (600.0, 5.0), (520.0, 470.0), (90.0, 400.0)];

        let transform = PerspectiveTransform::compute(src, dst, 640, 480).unwrap();

        for (s, d) in src.iter().zip(dst.iter()) {
            assert_close(transform.transform_point(s.0, s.1).unwrap(), *d);
            assert_close(transform.inverse_transform_point(d.0, d.1).unwrap(), *s);
        }
    }

    #[test]
    fn test_keystone_is_not_affine() {
        let src = frame_corners(100, 100);
        let dst = [(20.0, 0.0), (79.0, 0.0), (99.0, 99.0), (0.0, 99.0)];
        let transform = PerspectiveTransform::compute(src, dst, 100, 100).unwrap();

        let m = transform.matrix();
        assert!(m[(2, 0)].abs() > 1e-9 || m[(2, 1)].abs() > 1e-9);
    }

    #[test]
    fn test_collinear_destination_is_degenerate() {
        let src = frame_corners(100, 100);
        let dst = [(0.0, 0.0), (50.0, 50.0), (99.0, 99.0), (0.0, 99.0)];

        let err = PerspectiveTransform::compute(src, dst, 100, 100).unwrap_err();
        assert!(matches!(err, WarpError::DegenerateGeometry(_)));
    }

    #[test]
    fn test_duplicate_destination_is_degenerate() {
        let src = frame_corners(100, 100);
        let dst = [(10.0, 10.0), (10.0, 10.0), (99.0, 99.0), (0.0, 99.0)];

        let result = PerspectiveTransform::compute(src, dst, 100, 100);
        assert!(matches!(result, Err(WarpError::DegenerateGeometry(_))));
    }

    #[test]
    fn test_single_pixel_frame_is_degenerate() {
        let corners = frame_corners(1, 480);
        let result = PerspectiveTransform::compute(corners, corners, 1, 480);
        assert!(result.is_err());
    }

    #[test]
    fn test_warp_identity_preserves_frame() {
        let mut src = RgbImage::new(16, 12);
        for (x, y, p) in src.enumerate_pixels_mut() {
            *p = Rgb([(x * 10) as u8, (y * 20) as u8, 7]);
        }
        let corners = frame_corners(16, 12);
        let transform = PerspectiveTransform::compute(corners, corners, 16, 12).unwrap();

        let out = transform.warp_rgb(&src);
        assert_eq!(out, src);
    }

    #[test]
    fn test_warp_leaves_unmapped_pixels_black() {
        let src = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));
        let corners = frame_corners(100, 100);
        let dst = [(0.0, 0.0), (49.0, 0.0), (49.0, 49.0), (0.0, 49.0)];
        let transform = PerspectiveTransform::compute(corners, dst, 100, 100).unwrap();

        let out = transform.warp_rgb(&src);
        assert_eq!(out.get_pixel(20, 20), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(80, 80), &Rgb([0, 0, 0]));
        assert_eq!(out.dimensions(), (100, 100));
    }

    #[test]
    fn test_frame_corners() {
        assert_eq!(
            frame_corners(640, 480),
            [(0.0, 0.0), (639.0, 0.0), (639.0, 479.0), (0.0, 479.0)]
        );
    }
}
