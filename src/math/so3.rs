// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Lie algebra/group functions for 3D rotations.
//!
//! The motion refinement parameterizes the rotation update by a rotation
//! vector (element of so3), applied through the exponential map.
//!
//! Interesting reads:
//! - Sophus c++ library: <https://github.com/strasdat/Sophus>
//! - Ethan Eade course on Lie Groups for 2D and 3D transformations:
//!     - details: <http://ethaneade.com/lie.pdf>
//!     - summary: <http://ethaneade.com/lie_groups.pdf>

use nalgebra::{Quaternion, UnitQuaternion};
use std::f32::consts::PI;

use crate::misc::type_aliases::{Float, Quat, Vec3};

/// Threshold for using Taylor series in computations.
const EPSILON_TAYLOR_SERIES: Float = 1e-2;
const EPSILON_TAYLOR_SERIES_2: Float = EPSILON_TAYLOR_SERIES * EPSILON_TAYLOR_SERIES;
const _1_8: Float = 0.125;
const _1_48: Float = 1.0 / 48.0;

/// Compute the exponential map from Lie algebra so3 to Lie group SO3.
/// Goes from so3 parameterization (rotation vector) to SO3 element (rotation).
pub fn exp(w: Vec3) -> Quat {
    let theta_2 = w.norm_squared();
    let (real_factor, imag_factor) = if theta_2 < EPSILON_TAYLOR_SERIES_2 {
        (1.0 - _1_8 * theta_2, 0.5 - _1_48 * theta_2)
    } else {
        let theta = theta_2.sqrt();
        let half_theta = 0.5 * theta;
        (half_theta.cos(), half_theta.sin() / theta)
    };
    UnitQuaternion::from_quaternion(Quaternion::from_parts(real_factor, imag_factor * w))
}

/// Compute the logarithm map from the Lie group SO3 to the Lie algebra so3.
/// Inverse of the exponential map.
pub fn log(rotation: Quat) -> Vec3 {
    let imag_vector = rotation.vector().into_owned();
    let imag_norm_2 = imag_vector.norm_squared();
    let real_factor = rotation.scalar();
    if imag_norm_2 < EPSILON_TAYLOR_SERIES_2 {
        let theta_by_imag_norm = 2.0 / real_factor; // TAYLOR
        theta_by_imag_norm * imag_vector
    } else if real_factor.abs() < EPSILON_TAYLOR_SERIES {
        let imag_norm = imag_norm_2.sqrt();
        let alpha = real_factor.abs() / imag_norm;
        let theta = real_factor.signum() * (PI - 2.0 * alpha); // TAYLOR
        (theta / imag_norm) * imag_vector
    } else {
        let imag_norm = imag_norm_2.sqrt();
        let theta = 2.0 * (imag_norm / real_factor).atan();
        (theta / imag_norm) * imag_vector
    }
}

/// Rotation angle of a unit quaternion, in radians, in `[0, pi]`.
pub fn angle(rotation: Quat) -> Float {
    log(rotation).norm()
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {

    use super::*;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    // The best precision obtained for round trips with random inputs
    // and exact trigonometric computations ("else" branches) is around 1e-6.
    const EPSILON_ROUNDTRIP_APPROX: Float = 1e-6;

    #[test]
    fn exp_log_round_trip_at_zero() {
        let w = Vec3::zeros();
        assert_eq!(w, log(exp(w)));
    }

    #[test]
    fn angle_of_axis_rotation() {
        let w = Vec3::new(0.0, 0.3, 0.0);
        assert!((angle(exp(w)) - 0.3).abs() < 1e-6);
    }

    // PROPERTY TESTS ##########################################################

    #[quickcheck]
    fn log_exp_round_trip(roll: Float, pitch: Float, yaw: Float) -> TestResult {
        if ![roll, pitch, yaw].iter().all(|a| a.is_finite()) {
            return TestResult::discard();
        }
        let rotation = gen_rotation(roll, pitch, yaw);
        TestResult::from_bool(approx::relative_eq!(
            rotation,
            exp(log(rotation)),
            epsilon = EPSILON_ROUNDTRIP_APPROX
        ))
    }

    // GENERATORS ##############################################################

    fn gen_rotation(roll: Float, pitch: Float, yaw: Float) -> Quat {
        Quat::from_euler_angles(roll % 1.0, pitch % 1.0, yaw % 1.0)
    }
}
