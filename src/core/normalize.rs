// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Normalize image intensities in place to approximately have
//! mean 128 and standard deviation 74.
//!
//! Useful in front of the FAST detector when exposure varies a lot
//! across the sequence. Disabled by default.

use crate::core::image::ImageBuf;

/// Target mean intensity after normalization.
const TARGET_MEAN: f32 = 128.0;
/// Target standard deviation after normalization.
const TARGET_SD: f32 = 74.0;

/// Remap intensities so the image has mean about 128 and sd about 74.
///
/// `out = clamp(128 + 74 * (p - mean) / sd, 0, 255)`, computed through a
/// 256-entry lookup table. A perfectly flat image is left untouched.
pub fn normalize_image(img: &mut ImageBuf) {
    let (width, height) = (img.width(), img.height());
    let nb_pixels = (width * height) as u64;

    let mut sum: u64 = 0;
    let mut sum_sq: u64 = 0;
    for v in 0..height {
        for &p in img.row(v) {
            sum += u64::from(p);
            sum_sq += u64::from(p) * u64::from(p);
        }
    }
    let mean = (sum / nb_pixels) as i64;
    let variance = (sum_sq / nb_pixels) as i64 - mean * mean;
    if variance <= 0 {
        return;
    }
    let sd = (variance as f32).sqrt();

    let mut table = [0u8; 256];
    for (p, entry) in table.iter_mut().enumerate() {
        let remapped = TARGET_MEAN + TARGET_SD * (p as i64 - mean) as f32 / sd;
        *entry = remapped.round().max(0.0).min(255.0) as u8;
    }

    for v in 0..height {
        for p in img.row_mut(v) {
            *p = table[*p as usize];
        }
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(img: &ImageBuf) -> (f32, f32) {
        let n = (img.width() * img.height()) as f32;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for v in 0..img.height() {
            for &p in img.row(v) {
                sum += f32::from(p);
                sum_sq += f32::from(p) * f32::from(p);
            }
        }
        let mean = sum / n;
        (mean, (sum_sq / n - mean * mean).sqrt())
    }

    #[test]
    fn flat_image_is_untouched() {
        let mut img = ImageBuf::zeroed(32, 32).unwrap();
        for v in 0..32 {
            img.row_mut(v).iter_mut().for_each(|p| *p = 77);
        }
        normalize_image(&mut img);
        assert!(img.row(10).iter().all(|&p| p == 77));
    }

    #[test]
    fn statistics_reach_targets() {
        // Two-valued image with known statistics.
        let mut img = ImageBuf::zeroed(64, 64).unwrap();
        for v in 0..64 {
            for u in 0..64 {
                img.set(u, v, if (u + v) % 2 == 0 { 40 } else { 90 });
            }
        }
        normalize_image(&mut img);
        let (mean, sd) = stats(&img);
        assert!((mean - 128.0).abs() < 2.0, "mean = {}", mean);
        assert!((sd - 74.0).abs() < 2.0, "sd = {}", sd);
    }
}
