// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! FAST-9 corner detector (Features from Accelerated Segment Test).
//!
//! Reference: Rosten & Drummond, "Machine learning for high-speed corner
//! detection" (ECCV 2006).
//!
//! A pixel is a corner when at least 9 contiguous pixels of the 16-pixel
//! Bresenham circle of radius 3 around it are all brighter, or all darker,
//! than the center by more than the threshold. The contiguity check wraps
//! around the circle.

use crate::core::image::ImageBuf;
use crate::core::keypoint::KeyPoint;
use crate::misc::type_aliases::Float;

/// Bresenham circle of radius 3: 16 `(du, dv)` offsets,
/// clockwise starting from 12 o'clock.
#[rustfmt::skip]
const CIRCLE_OFFSETS: [(isize, isize); 16] = [
    ( 0, -3), ( 1, -3), ( 2, -2), ( 3, -1),
    ( 3,  0), ( 3,  1), ( 2,  2), ( 1,  3),
    ( 0,  3), (-1,  3), (-2,  2), (-3,  1),
    (-3,  0), (-3, -1), (-2, -2), (-1, -3),
];

/// Minimum number of contiguous qualifying circle pixels.
const ARC_LENGTH: u32 = 9;

/// Does the 16-bit classification mask contain a contiguous
/// (circularly wrapping) run of at least [`ARC_LENGTH`] set bits?
fn has_arc(mask: u16) -> bool {
    if mask == 0 {
        return false;
    }
    let doubled = u32::from(mask) | (u32::from(mask) << 16);
    let mut run = 0;
    for i in 0..32 {
        if doubled & (1 << i) != 0 {
            run += 1;
            if run >= ARC_LENGTH {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Detect FAST-9 corners with the given intensity threshold.
///
/// Results are appended to `keypoints` (which is cleared first) in row-major
/// scan order, with the score being the sum of the absolute center
/// differences over the threshold, across all qualifying circle pixels.
pub fn detect(img: &ImageBuf, threshold: i32, keypoints: &mut Vec<KeyPoint>) {
    keypoints.clear();
    let width = img.width();
    let height = img.height();
    if width <= 6 || height <= 6 {
        return;
    }

    let stride = img.stride() as isize;
    let data = img.data();
    // Precomputed byte offsets of the circle pixels in the raw buffer.
    let mut circle = [0isize; 16];
    for (offset, &(du, dv)) in circle.iter_mut().zip(CIRCLE_OFFSETS.iter()) {
        *offset = dv * stride + du;
    }

    for v in 3..height - 3 {
        let row_base = (v as isize * stride) as usize;
        for u in 3..width - 3 {
            let idx = row_base + u;
            let center = i32::from(data[idx]);

            let mut brighter: u16 = 0;
            let mut darker: u16 = 0;
            let mut diffs = [0i32; 16];
            for (i, &offset) in circle.iter().enumerate() {
                let p = i32::from(data[(idx as isize + offset) as usize]);
                let diff = p - center;
                diffs[i] = diff;
                if diff > threshold {
                    brighter |= 1 << i;
                } else if diff < -threshold {
                    darker |= 1 << i;
                }
            }

            let (mask, is_corner) = if has_arc(brighter) {
                (brighter, true)
            } else if has_arc(darker) {
                (darker, true)
            } else {
                (0, false)
            };
            if is_corner {
                let mut score = 0i32;
                for (i, &diff) in diffs.iter().enumerate() {
                    if mask & (1 << i) != 0 {
                        score += diff.abs() - threshold;
                    }
                }
                keypoints.push(KeyPoint {
                    u: u as Float,
                    v: v as Float,
                    score: score as Float,
                });
            }
        }
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(width: usize, height: usize, value: u8) -> ImageBuf {
        let mut img = ImageBuf::zeroed(width, height).unwrap();
        for v in 0..height {
            img.row_mut(v).iter_mut().for_each(|p| *p = value);
        }
        img
    }

    #[test]
    fn blank_image_has_no_corner() {
        let img = blank(32, 32, 128);
        let mut kps = Vec::new();
        detect(&img, 20, &mut kps);
        assert!(kps.is_empty());
    }

    #[test]
    fn isolated_bright_pixel_is_a_corner() {
        let mut img = blank(32, 32, 20);
        img.set(16, 16, 250);
        let mut kps = Vec::new();
        detect(&img, 20, &mut kps);
        assert_eq!(kps.len(), 1);
        assert_eq!((kps[0].u, kps[0].v), (16.0, 16.0));
        assert!(kps[0].score > 0.0);
    }

    #[test]
    fn threshold_gates_detection() {
        let mut img = blank(32, 32, 100);
        img.set(16, 16, 130);
        let mut kps = Vec::new();
        detect(&img, 20, &mut kps);
        assert_eq!(kps.len(), 1);
        detect(&img, 40, &mut kps);
        assert!(kps.is_empty());
    }

    #[test]
    fn no_corner_touches_the_three_pixel_border() {
        let mut img = blank(16, 16, 20);
        // Bright pixels in the corner region cannot be tested and must not crash.
        img.set(0, 0, 255);
        img.set(15, 15, 255);
        img.set(8, 8, 255);
        let mut kps = Vec::new();
        detect(&img, 20, &mut kps);
        assert!(kps.iter().all(|kp| {
            kp.u >= 3.0 && kp.u < 13.0 && kp.v >= 3.0 && kp.v < 13.0
        }));
        assert_eq!(kps.len(), 1);
    }

    #[test]
    fn has_arc_wraps_around() {
        // Run of 9 split across the wrap boundary: bits 12..16 and 0..4.
        let mask: u16 = 0b1111_0000_0000_1111 | (1 << 4);
        assert!(has_arc(mask));
        // 8 contiguous bits only.
        assert!(!has_arc(0b0000_0000_1111_1111));
        assert!(has_arc(0b0000_0001_1111_1111));
    }
}
