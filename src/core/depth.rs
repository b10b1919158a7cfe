// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Depth sources providing per-pixel 3D positions to the odometry engine.
//!
//! The engine only consumes depth through the [`DepthSource`] capability
//! set; a depth-image backend and a stereo-disparity backend are provided.
//! Queries take pixel coordinates in the requested pyramid level, which the
//! backend rescales to its own full-resolution data.

use crate::core::camera::Intrinsics;
use crate::misc::type_aliases::{Float, Point2, Point3};

/// Capability set of a per-pixel depth provider.
///
/// Pixel coordinates `(u, v)` are expressed at the given pyramid level.
/// The interpolation policy for floating point coordinates is the
/// backend's own choice.
pub trait DepthSource {
    /// Can a 3D position be produced at this integer pixel?
    fn has_valid_3d(&self, level: usize, u: usize, v: usize) -> bool;

    /// 3D position of a pixel in the camera frame, or `None` if the
    /// depth data there is missing.
    fn xyz_at(&self, level: usize, u: Float, v: Float) -> Option<Point3>;

    /// Recompute a 3D position at a subpixel-refined position, given the
    /// position obtained before refinement. Returns `None` when the
    /// refined pixel falls on missing depth data.
    fn refine_xyz(&self, level: usize, u: Float, v: Float, ref_xyz: &Point3) -> Option<Point3>;

    /// 1-sigma range uncertainty hint in meters, used by the matcher to
    /// widen its search window.
    fn get_sigma_range(&self) -> Float;
}

/// Rescale level coordinates to level 0 coordinates.
fn base_coords(level: usize, u: Float, v: Float) -> (Float, Float) {
    let scale = (1usize << level) as Float;
    (u * scale, v * scale)
}

/// Bilinear interpolation over the valid samples of a full-resolution map.
///
/// Invalid neighbors are excluded and the weights renormalized; `None` when
/// every neighbor is invalid or coordinates are out of the map.
fn interpolate_valid(map: &[Float], width: usize, height: usize, u: Float, v: Float) -> Option<Float> {
    let u0f = u.floor();
    let v0f = v.floor();
    if u0f < 0.0 || v0f < 0.0 || u0f >= (width - 1) as Float || v0f >= (height - 1) as Float {
        // Fall back to the nearest pixel on the border.
        let un = u.round();
        let vn = v.round();
        if un < 0.0 || vn < 0.0 || un >= width as Float || vn >= height as Float {
            return None;
        }
        let value = map[vn as usize * width + un as usize];
        return if valid(value) { Some(value) } else { None };
    }
    let u0 = u0f as usize;
    let v0 = v0f as usize;
    let a = u - u0f;
    let b = v - v0f;
    let samples = [
        (map[v0 * width + u0], (1.0 - a) * (1.0 - b)),
        (map[v0 * width + u0 + 1], a * (1.0 - b)),
        (map[(v0 + 1) * width + u0], (1.0 - a) * b),
        (map[(v0 + 1) * width + u0 + 1], a * b),
    ];
    let mut sum = 0.0;
    let mut weight_sum = 0.0;
    for &(value, weight) in samples.iter() {
        if valid(value) {
            sum += weight * value;
            weight_sum += weight;
        }
    }
    if weight_sum > 0.0 {
        Some(sum / weight_sum)
    } else {
        None
    }
}

fn valid(value: Float) -> bool {
    value.is_finite() && value > 0.0
}

// Depth image backend #########################################################

/// Depth source backed by a full-resolution depth image, in meters.
///
/// Missing measurements are encoded as non-positive or non-finite values.
pub struct DepthImageSource {
    intrinsics: Intrinsics,
    depth: Vec<Float>,
    sigma_range: Float,
}

impl DepthImageSource {
    /// Create a depth source from a depth map in row-major order,
    /// sized like the camera image.
    pub fn new(intrinsics: Intrinsics, depth: Vec<Float>, sigma_range: Float) -> Self {
        assert_eq!(depth.len(), intrinsics.width * intrinsics.height);
        DepthImageSource {
            intrinsics,
            depth,
            sigma_range,
        }
    }

    /// Replace the depth map for a new frame. The buffer is reused.
    pub fn set_depth_image(&mut self, depth: &[Float]) {
        assert_eq!(depth.len(), self.depth.len());
        self.depth.copy_from_slice(depth);
    }

    fn depth_at(&self, u0: Float, v0: Float) -> Option<Float> {
        interpolate_valid(
            &self.depth,
            self.intrinsics.width,
            self.intrinsics.height,
            u0,
            v0,
        )
    }
}

impl DepthSource for DepthImageSource {
    fn has_valid_3d(&self, level: usize, u: usize, v: usize) -> bool {
        let (u0, v0) = base_coords(level, u as Float, v as Float);
        let (u0, v0) = (u0.round() as usize, v0.round() as usize);
        u0 < self.intrinsics.width
            && v0 < self.intrinsics.height
            && valid(self.depth[v0 * self.intrinsics.width + u0])
    }

    fn xyz_at(&self, level: usize, u: Float, v: Float) -> Option<Point3> {
        let (u0, v0) = base_coords(level, u, v);
        let z = self.depth_at(u0, v0)?;
        Some(self.intrinsics.back_project(Point2::new(u0, v0), z))
    }

    fn refine_xyz(&self, level: usize, u: Float, v: Float, _ref_xyz: &Point3) -> Option<Point3> {
        self.xyz_at(level, u, v)
    }

    fn get_sigma_range(&self) -> Float {
        self.sigma_range
    }
}

// Stereo disparity backend ####################################################

/// Depth source backed by a precomputed stereo disparity map of the
/// rectified left camera, in pixels.
///
/// Depth is recovered as `fx * baseline / disparity`. Disparities that are
/// non-positive, non-finite or above the configured maximum are invalid.
/// Computing the correspondences themselves is outside the scope of the
/// engine.
pub struct StereoDisparitySource {
    intrinsics: Intrinsics,
    baseline: Float,
    disparity: Vec<Float>,
    max_disparity: Float,
    sigma_disparity: Float,
}

impl StereoDisparitySource {
    /// Create a stereo depth source from a disparity map in row-major
    /// order, sized like the left camera image.
    pub fn new(
        intrinsics: Intrinsics,
        baseline: Float,
        disparity: Vec<Float>,
        max_disparity: Float,
    ) -> Self {
        assert_eq!(disparity.len(), intrinsics.width * intrinsics.height);
        StereoDisparitySource {
            intrinsics,
            baseline,
            disparity,
            max_disparity,
            sigma_disparity: 0.5,
        }
    }

    /// Replace the disparity map for a new frame. The buffer is reused.
    pub fn set_disparity_map(&mut self, disparity: &[Float]) {
        assert_eq!(disparity.len(), self.disparity.len());
        self.disparity.copy_from_slice(disparity);
    }

    fn disparity_valid(&self, d: Float) -> bool {
        d.is_finite() && d > 0.0 && d <= self.max_disparity
    }

    fn depth_from_disparity(&self, d: Float) -> Float {
        self.intrinsics.fx * self.baseline / d
    }
}

impl DepthSource for StereoDisparitySource {
    fn has_valid_3d(&self, level: usize, u: usize, v: usize) -> bool {
        let (u0, v0) = base_coords(level, u as Float, v as Float);
        let (u0, v0) = (u0.round() as usize, v0.round() as usize);
        u0 < self.intrinsics.width
            && v0 < self.intrinsics.height
            && self.disparity_valid(self.disparity[v0 * self.intrinsics.width + u0])
    }

    fn xyz_at(&self, level: usize, u: Float, v: Float) -> Option<Point3> {
        let (u0, v0) = base_coords(level, u, v);
        let d = interpolate_valid(
            &self.disparity,
            self.intrinsics.width,
            self.intrinsics.height,
            u0,
            v0,
        )?;
        if !self.disparity_valid(d) {
            return None;
        }
        let z = self.depth_from_disparity(d);
        Some(self.intrinsics.back_project(Point2::new(u0, v0), z))
    }

    fn refine_xyz(&self, level: usize, u: Float, v: Float, _ref_xyz: &Point3) -> Option<Point3> {
        self.xyz_at(level, u, v)
    }

    fn get_sigma_range(&self) -> Float {
        // Range uncertainty of one disparity step at the median depth of
        // the map would be data dependent; report the conservative
        // uncertainty at 1 meter instead.
        let d_at_1m = self.intrinsics.fx * self.baseline;
        if d_at_1m > 0.0 {
            (self.depth_from_disparity(d_at_1m - self.sigma_disparity) - 1.0).abs()
        } else {
            0.0
        }
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    fn intrinsics() -> Intrinsics {
        Intrinsics {
            width: 64,
            height: 48,
            fx: 50.0,
            fy: 50.0,
            cx: 32.0,
            cy: 24.0,
        }
    }

    #[test]
    fn depth_image_lookup() {
        let cam = intrinsics();
        let depth = vec![2.0; 64 * 48];
        let source = DepthImageSource::new(cam, depth, 0.02);
        assert!(source.has_valid_3d(0, 32, 24));
        let xyz = source.xyz_at(0, 32.0, 24.0).unwrap();
        assert_eq!(xyz, Point3::new(0.0, 0.0, 2.0));
        // Level 1 coordinates are rescaled by 2.
        let xyz = source.xyz_at(1, 16.0, 12.0).unwrap();
        assert_eq!(xyz, Point3::new(0.0, 0.0, 2.0));
    }

    #[test]
    fn missing_depth_is_invalid() {
        let cam = intrinsics();
        let mut depth = vec![2.0; 64 * 48];
        depth[24 * 64 + 32] = 0.0;
        depth[24 * 64 + 33] = Float::NAN;
        let source = DepthImageSource::new(cam, depth, 0.02);
        assert!(!source.has_valid_3d(0, 32, 24));
        assert!(!source.has_valid_3d(0, 33, 24));
        assert!(source.has_valid_3d(0, 34, 24));
        // Interpolation skips the invalid neighbors but still resolves.
        assert!(source.xyz_at(0, 32.3, 24.3).is_some());
    }

    #[test]
    fn out_of_bounds_is_invalid() {
        let cam = intrinsics();
        let source = DepthImageSource::new(cam, vec![2.0; 64 * 48], 0.02);
        assert!(!source.has_valid_3d(0, 64, 0));
        assert!(source.xyz_at(0, -1.0, 0.0).is_none());
        assert!(source.xyz_at(2, 40.0, 0.0).is_none());
    }

    #[test]
    fn stereo_disparity_to_depth() {
        let cam = intrinsics();
        // disparity 5 px with fx 50 and baseline 0.1 m -> depth 1 m.
        let source = StereoDisparitySource::new(cam, 0.1, vec![5.0; 64 * 48], 128.0);
        let xyz = source.xyz_at(0, 32.0, 24.0).unwrap();
        assert!((xyz.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn stereo_rejects_out_of_range_disparity() {
        let cam = intrinsics();
        let mut disparity = vec![5.0; 64 * 48];
        disparity[0] = 200.0;
        disparity[1] = -1.0;
        let source = StereoDisparitySource::new(cam, 0.1, disparity, 128.0);
        assert!(!source.has_valid_3d(0, 0, 0));
        assert!(!source.has_valid_3d(0, 1, 0));
        assert!(source.has_valid_3d(0, 2, 0));
    }
}
