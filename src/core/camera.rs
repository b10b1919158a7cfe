// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Camera intrinsic parameters of a rectified pinhole camera.

use crate::misc::type_aliases::{Float, Point2, Point3, Vec3};
use nalgebra::Matrix3;

/// Intrinsic parameters of a rectified (distortion-free) pinhole camera.
#[derive(PartialEq, Debug, Clone)]
pub struct Intrinsics {
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels.
    pub height: usize,
    /// Focal length along the image x axis, in pixels.
    pub fx: Float,
    /// Focal length along the image y axis, in pixels.
    pub fy: Float,
    /// Principal point x coordinate, in pixels.
    pub cx: Float,
    /// Principal point y coordinate, in pixels.
    pub cy: Float,
}

impl Intrinsics {
    /// 3x3 calibration matrix K.
    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<Float> {
        Matrix3::new(
            self.fx, 0.0,     self.cx,
            0.0,     self.fy, self.cy,
            0.0,     0.0,     1.0,
        )
    }

    /// Project a 3D point in the camera frame into homogeneous pixel
    /// coordinates `(u*z, v*z, z)`.
    pub fn project(&self, point: Point3) -> Vec3 {
        Vec3::new(
            self.fx * point.x + self.cx * point.z,
            self.fy * point.y + self.cy * point.z,
            point.z,
        )
    }

    /// Project a 3D point in the camera frame into pixel coordinates.
    /// Return `None` for points at or behind the camera plane.
    pub fn project_pixel(&self, point: Point3) -> Option<Point2> {
        if point.z > 0.0 {
            let uvz = self.project(point);
            Some(Point2::new(uvz.x / uvz.z, uvz.y / uvz.z))
        } else {
            None
        }
    }

    /// Back-project pixel coordinates with a known depth into
    /// a 3D point in the camera frame.
    pub fn back_project(&self, point: Point2, depth: Float) -> Point3 {
        let x = (point.x - self.cx) * depth / self.fx;
        let y = (point.y - self.cy) * depth / self.fy;
        Point3::new(x, y, depth)
    }
}

// TESTS #######################################################################
