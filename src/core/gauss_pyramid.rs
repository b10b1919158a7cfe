// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Gaussian pyramid downsampling.
//!
//! One pyramid level is computed from the previous one by convolving with
//! the 5-tap binomial kernel `1/16 * [1, 4, 6, 4, 1]` in each axis
//! (equivalent 2D kernel `1/256 * [1,4,6,4,1] ⊗ [1,4,6,4,1]`) and
//! subsampling by two. Boundaries are handled by mirror reflection.
//!
//! The convolution is separable: rows are first filtered horizontally into
//! a ring of five `u16` rows (the scratch buffer), then combined vertically
//! at even columns.

use crate::core::image::ImageBuf;

/// The 5-tap binomial kernel, summing to 16.
const KERNEL: [u32; 5] = [1, 4, 6, 4, 1];

/// Number of `u16` elements of the scratch buffer required to downsample
/// an image of the given size.
pub fn gauss_pyr_down_buf_size(src_width: usize, _src_height: usize) -> usize {
    5 * src_width
}

/// Mirror-reflect an index into `[0, len)`.
fn reflect(i: isize, len: usize) -> usize {
    let len = len as isize;
    let mut i = i;
    if i < 0 {
        i = -i;
    }
    if i >= len {
        i = 2 * len - 2 - i;
    }
    i.max(0).min(len - 1) as usize
}

/// Horizontally filter source row `v` into `out` (one `u16` per column).
fn hfilter_row(src: &ImageBuf, v: usize, out: &mut [u16]) {
    let row = src.row(v);
    let width = src.width();
    for (x, out_x) in out.iter_mut().enumerate().take(width) {
        let mut acc: u32 = 0;
        for (k, &coef) in KERNEL.iter().enumerate() {
            let xs = reflect(x as isize + k as isize - 2, width);
            acc += coef * u32::from(row[xs]);
        }
        *out_x = acc as u16;
    }
}

/// Downsample `src` into `dst` (of size `floor(w/2) x floor(h/2)`),
/// using `buf` as scratch space of at least
/// [`gauss_pyr_down_buf_size`] elements.
pub fn gauss_pyr_down(src: &ImageBuf, dst: &mut ImageBuf, buf: &mut [u16]) {
    let src_width = src.width();
    let src_height = src.height();
    let dst_width = dst.width();
    let dst_height = dst.height();
    debug_assert_eq!(dst_width, src_width / 2);
    debug_assert_eq!(dst_height, src_height / 2);
    debug_assert!(buf.len() >= gauss_pyr_down_buf_size(src_width, src_height));

    // Ring of 5 horizontally filtered rows, indexed by source row modulo 5.
    let mut filtered_until: isize = -1;
    for yd in 0..dst_height {
        let center = 2 * yd as isize;
        // Make sure source rows center-2 ..= center+2 are filtered.
        while filtered_until < center + 2 {
            filtered_until += 1;
            let vs = reflect(filtered_until, src_height);
            let slot = (filtered_until % 5) as usize;
            hfilter_row(src, vs, &mut buf[slot * src_width..slot * src_width + src_width]);
        }
        for xd in 0..dst_width {
            let xs = 2 * xd;
            let mut acc: u32 = 0;
            for (k, &coef) in KERNEL.iter().enumerate() {
                let row_idx = reflect(center + k as isize - 2, src_height) as isize;
                // Rows below 0 reflect onto already filtered rows, whose ring
                // slot is indexed by the reflected value.
                let slot = if center + k as isize - 2 < 0 {
                    (row_idx % 5) as usize
                } else {
                    ((center + k as isize - 2) % 5) as usize
                };
                acc += coef * u32::from(buf[slot * src_width + xs]);
            }
            dst.set(xd, yd, ((acc + 128) >> 8) as u8);
        }
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_image(width: usize, height: usize, value: u8) -> ImageBuf {
        let mut img = ImageBuf::zeroed(width, height).unwrap();
        for v in 0..height {
            img.row_mut(v).iter_mut().for_each(|p| *p = value);
        }
        img
    }

    fn downsampled(src: &ImageBuf) -> ImageBuf {
        let mut dst = ImageBuf::zeroed(src.width() / 2, src.height() / 2).unwrap();
        let mut buf = vec![0u16; gauss_pyr_down_buf_size(src.width(), src.height())];
        gauss_pyr_down(src, &mut dst, &mut buf);
        dst
    }

    #[test]
    fn constant_image_stays_constant() {
        let src = constant_image(64, 48, 137);
        let dst = downsampled(&src);
        assert_eq!(dst.width(), 32);
        assert_eq!(dst.height(), 24);
        for v in 0..dst.height() {
            assert!(dst.row(v).iter().all(|&p| p == 137));
        }
    }

    #[test]
    fn odd_sizes_floor() {
        let src = constant_image(65, 49, 10);
        let dst = downsampled(&src);
        assert_eq!(dst.width(), 32);
        assert_eq!(dst.height(), 24);
    }

    #[test]
    fn impulse_spreads_binomially() {
        let mut src = constant_image(32, 32, 0);
        src.set(16, 16, 255);
        let dst = downsampled(&src);
        // Center tap weight of the separable kernel is 36/256.
        assert_eq!(dst.get(8, 8), ((255 * 36 + 128) / 256) as u8);
        // One-off taps take the weight 6*1/256 = 6/256.
        assert_eq!(dst.get(7, 8), ((255 * 6 + 128) / 256) as u8);
        assert_eq!(dst.get(8, 7), ((255 * 6 + 128) / 256) as u8);
    }

    #[test]
    fn buf_size_is_five_rows() {
        assert_eq!(gauss_pyr_down_buf_size(640, 480), 5 * 640);
    }
}
