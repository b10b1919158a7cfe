// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Keypoint records attached to pyramid levels.

use crate::misc::type_aliases::{Float, Point2, Point3};

/// A raw detected corner: pixel position and detector response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    /// Pixel column, in the coordinates of the level it was detected at.
    pub u: Float,
    /// Pixel row, in the coordinates of the level it was detected at.
    pub v: Float,
    /// Detector response. Higher is stronger.
    pub score: Float,
}

/// A keypoint retained by a pyramid level, enriched with its 3D position.
#[derive(Debug, Clone)]
pub struct KeypointData {
    /// The detected corner, in level coordinates.
    pub kp: KeyPoint,
    /// Pixel position rescaled to level 0 coordinates.
    pub base_uv: Point2,
    /// 3D position in the camera frame, in meters.
    /// Only meaningful when `has_depth` is true.
    pub xyz: Point3,
    /// Whether the depth source provided a valid 3D position.
    pub has_depth: bool,
    /// Pyramid level this keypoint belongs to.
    pub pyramid_level: usize,
    /// Index of this keypoint in its level keypoint array.
    pub keypoint_index: usize,
}

impl KeypointData {
    /// A keypoint with no depth assigned yet.
    pub fn without_depth(kp: KeyPoint, pyramid_level: usize, keypoint_index: usize) -> Self {
        let scale = (1 << pyramid_level) as Float;
        KeypointData {
            kp,
            base_uv: Point2::new(kp.u * scale, kp.v * scale),
            xyz: Point3::origin(),
            has_depth: false,
            pyramid_level,
            keypoint_index,
        }
    }
}
