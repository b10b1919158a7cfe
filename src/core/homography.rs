// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Coarse rotation prior from an ESM homography tracker.
//!
//! The previous and current images of a coarse pyramid level are aligned
//! with a homography estimated by Efficient Second-order Minimization:
//! the Jacobian of each pixel uses the mean of the template gradient and
//! the warped-image gradient, which gives second-order convergence without
//! computing Hessians.
//!
//! The estimated homography maps template (previous) pixels to current
//! pixels. Rescaled to full resolution, small-angle Euler angles are read
//! off the homography and converted to a quaternion, which the controller
//! uses as the rotation part of the initial motion estimate.

use crate::core::camera::Intrinsics;
use crate::core::image::ImageBuf;
use crate::misc::type_aliases::{Float, Mat3, Mat8, Quat, Vec8};

/// Maximum ESM iterations of the tracker.
pub const MAX_ESM_ITERATIONS: usize = 8;

/// Iterations stop early when the RMS intensity residual changes by less
/// than this many gray levels.
const RMS_CONVERGENCE_EPS: Float = 1e-2;

/// Track the homography aligning `template` to `test`, starting from
/// identity. Returns the homography in level pixel coordinates and the
/// final RMS intensity residual, or `None` when the linear system is
/// degenerate (e.g. on textureless images).
pub fn track(template: &ImageBuf, test: &ImageBuf, max_iterations: usize) -> Option<(Mat3, Float)> {
    let mut h = Mat3::identity();
    let mut rms = residual_rms(template, test, &h)?;
    for _ in 0..max_iterations {
        let h_new = esm_step(template, test, &h)?;
        let rms_new = residual_rms(template, test, &h_new)?;
        if rms_new >= rms {
            // Diverging, keep the previous estimate.
            break;
        }
        let delta = rms - rms_new;
        h = h_new;
        rms = rms_new;
        if delta < RMS_CONVERGENCE_EPS {
            break;
        }
    }
    Some((h, rms))
}

/// Rescale a homography estimated on pyramid level `level` to full
/// resolution coordinates: `H_full = S * H * S^-1` with `S = diag(s, s, 1)`.
pub fn scale_to_full_resolution(h: &Mat3, level: usize) -> Mat3 {
    let s = (1usize << level) as Float;
    let mut scaled = *h;
    scaled[(0, 2)] *= s;
    scaled[(1, 2)] *= s;
    scaled[(2, 0)] /= s;
    scaled[(2, 1)] /= s;
    scaled
}

/// Extract a small-angle rotation prior from a full-resolution homography.
///
/// `fx` stands in for both focal lengths; with strongly different fx and
/// fy the vertical angle is off by their ratio, which the matcher search
/// window absorbs.
pub fn rotation_prior(h: &Mat3, intrinsics: &Intrinsics) -> Quat {
    let roll = clamp_asin(h[(1, 2)] / intrinsics.fx);
    let pitch = -clamp_asin(h[(0, 2)] / intrinsics.fx);
    let yaw = -Float::atan2(h[(1, 0)], h[(0, 0)]);
    Quat::from_euler_angles(roll, pitch, yaw)
}

fn clamp_asin(x: Float) -> Float {
    x.max(-1.0).min(1.0).asin()
}

// ESM internals ###############################################################

/// RMS of the intensity residual of the warp, or `None` when the overlap
/// of the warped images is empty.
fn residual_rms(template: &ImageBuf, test: &ImageBuf, h: &Mat3) -> Option<Float> {
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for_each_overlap_pixel(template, test, h, |_, _, _, _, residual| {
        sum_sq += residual * residual;
        count += 1;
    });
    if count == 0 {
        None
    } else {
        Some((sum_sq / count as Float).sqrt())
    }
}

/// One Gauss-Newton step on the 8 free homography entries with the ESM
/// (averaged) gradient. Returns the updated homography.
fn esm_step(template: &ImageBuf, test: &ImageBuf, h: &Mat3) -> Option<Mat3> {
    let mut hessian = Mat8::zeros();
    let mut gradient = Vec8::zeros();
    for_each_overlap_pixel(template, test, h, |x, y, uvw, grad, residual| {
        let (u, v, w) = uvw;
        let (gx, gy) = grad;
        // d(u)/d(h_k) and d(v)/d(h_k) for the first 8 entries of H
        // (h22 stays fixed at its current value): with (a, b, c) = H (x, y, 1),
        // u = a/c and v = b/c.
        let w_inv = 1.0 / w;
        let du = [
            x * w_inv,
            y * w_inv,
            w_inv,
            0.0,
            0.0,
            0.0,
            -u * x * w_inv,
            -u * y * w_inv,
        ];
        let dv = [
            0.0,
            0.0,
            0.0,
            x * w_inv,
            y * w_inv,
            w_inv,
            -v * x * w_inv,
            -v * y * w_inv,
        ];
        let mut jac = Vec8::zeros();
        for k in 0..8 {
            jac[k] = gx * du[k] + gy * dv[k];
        }
        hessian += jac * jac.transpose();
        gradient += jac * residual;
    });
    let delta = hessian.cholesky()?.solve(&gradient);
    #[rustfmt::skip]
    let update = Mat3::new(
        delta[0], delta[1], delta[2],
        delta[3], delta[4], delta[5],
        delta[6], delta[7], 0.0,
    );
    let mut h_new = *h - update;
    if h_new[(2, 2)].abs() < 1e-12 {
        return None;
    }
    h_new /= h_new[(2, 2)];
    Some(h_new)
}

/// Visit every template pixel whose warp lands inside the test image,
/// handing the callback the template coordinates, the warped homogeneous
/// coordinates, the ESM-averaged gradient and the intensity residual.
fn for_each_overlap_pixel<F>(template: &ImageBuf, test: &ImageBuf, h: &Mat3, mut f: F)
where
    F: FnMut(Float, Float, (Float, Float, Float), (Float, Float), Float),
{
    let width = template.width();
    let height = template.height();
    for yi in 1..height - 1 {
        for xi in 1..width - 1 {
            let x = xi as Float;
            let y = yi as Float;
            let w = h[(2, 0)] * x + h[(2, 1)] * y + h[(2, 2)];
            if w.abs() < 1e-6 {
                continue;
            }
            let u = (h[(0, 0)] * x + h[(0, 1)] * y + h[(0, 2)]) / w;
            let v = (h[(1, 0)] * x + h[(1, 1)] * y + h[(1, 2)]) / w;
            // A margin of one pixel keeps the warped gradient samples valid.
            if u < 1.0 || v < 1.0 || u >= (test.width() - 2) as Float || v >= (test.height() - 2) as Float
            {
                continue;
            }
            let warped = match test.interpolate(u, v) {
                Some(value) => value,
                None => continue,
            };
            let residual = warped - Float::from(template.get(xi, yi));

            // Template gradient by central differences.
            let tgx = 0.5
                * (Float::from(template.get(xi + 1, yi)) - Float::from(template.get(xi - 1, yi)));
            let tgy = 0.5
                * (Float::from(template.get(xi, yi + 1)) - Float::from(template.get(xi, yi - 1)));
            // Warped image gradient, sampled bilinearly around the warp.
            let igx = match (test.interpolate(u + 1.0, v), test.interpolate(u - 1.0, v)) {
                (Some(p), Some(m)) => 0.5 * (p - m),
                _ => continue,
            };
            let igy = match (test.interpolate(u, v + 1.0), test.interpolate(u, v - 1.0)) {
                (Some(p), Some(m)) => 0.5 * (p - m),
                _ => continue,
            };
            let grad = (0.5 * (tgx + igx), 0.5 * (tgy + igy));
            f(x, y, (u, v, w), grad, residual);
        }
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    fn textured_image(width: usize, height: usize, shift: f32) -> ImageBuf {
        let mut img = ImageBuf::zeroed(width, height).unwrap();
        for v in 0..height {
            for u in 0..width {
                let x = u as f32 + shift;
                let value = 128.0
                    + 60.0 * (x * 0.35).sin() * (v as f32 * 0.28).cos()
                    + 30.0 * (x * 0.11).cos();
                img.set(u, v, value.max(0.0).min(255.0) as u8);
            }
        }
        img
    }

    #[test]
    fn identical_images_give_identity() {
        let img = textured_image(80, 60, 0.0);
        let img_bis = textured_image(80, 60, 0.0);
        let (h, rms) = track(&img, &img_bis, MAX_ESM_ITERATIONS).unwrap();
        assert!(rms < 1.0);
        assert!((h - Mat3::identity()).abs().max() < 1e-3);
    }

    #[test]
    fn pure_shift_is_recovered_in_translation_entries() {
        // Test image content is the template shifted 2 pixels left,
        // so the aligning homography has u_test = u_template - 2.
        let template = textured_image(80, 60, 0.0);
        let test = textured_image(80, 60, 2.0);
        let (h, _rms) = track(&template, &test, MAX_ESM_ITERATIONS).unwrap();
        assert!((h[(0, 2)] - (-2.0)).abs() < 0.5, "h02 = {}", h[(0, 2)]);
        assert!(h[(1, 2)].abs() < 0.5, "h12 = {}", h[(1, 2)]);
    }

    #[test]
    fn textureless_images_are_degenerate() {
        let img = ImageBuf::zeroed(40, 30).unwrap();
        let img_bis = ImageBuf::zeroed(40, 30).unwrap();
        assert!(track(&img, &img_bis, MAX_ESM_ITERATIONS).is_none());
    }

    #[test]
    fn full_resolution_rescale() {
        let mut h = Mat3::identity();
        h[(0, 2)] = -3.0;
        h[(2, 0)] = 0.01;
        let scaled = scale_to_full_resolution(&h, 3);
        assert_eq!(scaled[(0, 2)], -24.0);
        assert!((scaled[(2, 0)] - 0.00125).abs() < 1e-9);
        assert_eq!(scaled[(0, 0)], 1.0);
    }

    #[test]
    fn shift_maps_to_pitch_prior() {
        let cam = Intrinsics {
            width: 640,
            height: 480,
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        };
        let mut h = Mat3::identity();
        h[(0, 2)] = -25.0;
        let q = rotation_prior(&h, &cam);
        let (roll, pitch, yaw) = q.euler_angles();
        assert!(roll.abs() < 1e-6);
        assert!((pitch - 0.05f32.asin()).abs() < 1e-4);
        assert!(yaw.abs() < 1e-6);
    }
}
