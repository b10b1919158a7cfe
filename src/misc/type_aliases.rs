// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Type aliases for common types used all over the code base.

use nalgebra as na;

/// Scalar type used for geometry throughout the library.
pub type Float = f32;

/// 2D point.
pub type Point2 = na::Point2<Float>;
/// 3D point.
pub type Point3 = na::Point3<Float>;

/// 2D vector.
pub type Vec2 = na::Vector2<Float>;
/// 3D vector.
pub type Vec3 = na::Vector3<Float>;
/// 6D vector.
pub type Vec6 = na::Vector6<Float>;
/// 8D vector.
pub type Vec8 = na::SVector<Float, 8>;

/// 3x3 matrix.
pub type Mat3 = na::Matrix3<Float>;
/// 6x6 matrix.
pub type Mat6 = na::Matrix6<Float>;
/// 8x8 matrix.
pub type Mat8 = na::SMatrix<Float, 8, 8>;

/// Rigid body motion (rotation and translation).
pub type Iso3 = na::Isometry3<Float>;
/// Unit quaternion representing a 3D rotation.
pub type Quat = na::UnitQuaternion<Float>;
