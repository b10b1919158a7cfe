// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Intensity patch descriptor extraction.
//!
//! A descriptor is the concatenated intensity values of the pixels around a
//! keypoint: the integer lattice `(du, dv)` with `|du| <= r`, `|dv| <= r`,
//! excluding the center, flattened in row-major order. With the default
//! feature window of 9 the radius is 4 and the descriptor holds 80 samples.
//! The published descriptor stride is the sample count rounded up to a
//! multiple of 16; padding bytes stay zero.
//!
//! Descriptors are compared with the sum of absolute differences.

use crate::core::image::{ImageBuf, ALIGNMENT};
use crate::core::keypoint::KeypointData;
use crate::misc::helper::round_up_to_multiple;
use crate::misc::type_aliases::Float;

/// Extracts intensity patch descriptors from a raw grayscale buffer.
#[derive(Debug, Clone)]
pub struct IntensityDescriptorExtractor {
    raw_gray_stride: usize,
    patch_radius: usize,
    descriptor_len: usize,
    descriptor_stride: usize,
    /// Byte offsets of the descriptor samples relative to the keypoint pixel.
    offsets: Vec<isize>,
}

impl IntensityDescriptorExtractor {
    /// Create an extractor for images with the given row stride.
    ///
    /// The patch radius is half the feature window size.
    pub fn new(raw_gray_stride: usize, feature_window_size: usize) -> Self {
        let patch_radius = feature_window_size / 2;
        let side = 2 * patch_radius + 1;
        let descriptor_len = side * side - 1;
        let descriptor_stride = round_up_to_multiple(descriptor_len, ALIGNMENT);
        let mut offsets = Vec::with_capacity(descriptor_len);
        for dv in -(patch_radius as isize)..=(patch_radius as isize) {
            for du in -(patch_radius as isize)..=(patch_radius as isize) {
                if du == 0 && dv == 0 {
                    continue;
                }
                offsets.push(dv * raw_gray_stride as isize + du);
            }
        }
        IntensityDescriptorExtractor {
            raw_gray_stride,
            patch_radius,
            descriptor_len,
            descriptor_stride,
            offsets,
        }
    }

    /// Number of meaningful bytes in a descriptor.
    pub fn descriptor_len(&self) -> usize {
        self.descriptor_len
    }

    /// Byte stride between consecutive descriptors in a batch buffer.
    /// A multiple of 16.
    pub fn descriptor_stride(&self) -> usize {
        self.descriptor_stride
    }

    /// Patch radius around the keypoint, in pixels.
    pub fn patch_radius(&self) -> usize {
        self.patch_radius
    }

    /// Extract the descriptor of a keypoint at integer coordinates.
    ///
    /// The keypoint must lie inside the descriptor-safe window of the image.
    pub fn populate_descriptor_aligned(
        &self,
        img: &ImageBuf,
        x: usize,
        y: usize,
        descriptor: &mut [u8],
    ) {
        debug_assert_eq!(img.stride(), self.raw_gray_stride);
        let data = img.data();
        let center = (y * self.raw_gray_stride + x) as isize;
        for (dst, &offset) in descriptor.iter_mut().zip(self.offsets.iter()) {
            *dst = data[(center + offset) as usize];
        }
    }

    /// Extract the descriptor of a keypoint at floating point coordinates,
    /// sampling each patch pixel by bilinear interpolation rounded to 0..255.
    pub fn populate_descriptor_interp(
        &self,
        img: &ImageBuf,
        x: Float,
        y: Float,
        descriptor: &mut [u8],
    ) {
        debug_assert_eq!(img.stride(), self.raw_gray_stride);
        let data = img.data();
        let x0 = x.floor();
        let y0 = y.floor();
        let a = x - x0;
        let b = y - y0;
        let w00 = (1.0 - a) * (1.0 - b);
        let w01 = a * (1.0 - b);
        let w10 = (1.0 - a) * b;
        let w11 = a * b;
        let stride = self.raw_gray_stride;
        let center = (y0 as usize * stride + x0 as usize) as isize;
        for (dst, &offset) in descriptor.iter_mut().zip(self.offsets.iter()) {
            let base = (center + offset) as usize;
            let value = w00 * Float::from(data[base])
                + w01 * Float::from(data[base + 1])
                + w10 * Float::from(data[base + stride])
                + w11 * Float::from(data[base + stride + 1]);
            *dst = (value + 0.5) as u8;
        }
    }

    /// Extract descriptors for a batch of keypoints at integer coordinates
    /// into a buffer of `descriptor_stride` bytes per keypoint.
    ///
    /// Produces byte-identical output to the scalar variant.
    pub fn populate_descriptors_aligned(
        &self,
        img: &ImageBuf,
        keypoints: &[KeypointData],
        descriptors: &mut [u8],
    ) {
        for (i, kp) in keypoints.iter().enumerate() {
            let start = i * self.descriptor_stride;
            self.populate_descriptor_aligned(
                img,
                kp.kp.u as usize,
                kp.kp.v as usize,
                &mut descriptors[start..start + self.descriptor_len],
            );
        }
    }

    /// Extract descriptors for a batch of keypoints at floating point
    /// coordinates. Produces byte-identical output to the scalar variant.
    pub fn populate_descriptors_interp(
        &self,
        img: &ImageBuf,
        keypoints: &[KeypointData],
        descriptors: &mut [u8],
    ) {
        for (i, kp) in keypoints.iter().enumerate() {
            let start = i * self.descriptor_stride;
            self.populate_descriptor_interp(
                img,
                kp.kp.u,
                kp.kp.v,
                &mut descriptors[start..start + self.descriptor_len],
            );
        }
    }
}

/// Sum of absolute differences between two descriptors.
pub fn descriptor_sad(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (i32::from(x) - i32::from(y)).abs() as u32)
        .sum()
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keypoint::{KeyPoint, KeypointData};

    fn textured_image(width: usize, height: usize) -> ImageBuf {
        let mut img = ImageBuf::zeroed(width, height).unwrap();
        for v in 0..height {
            for u in 0..width {
                img.set(u, v, ((u * 31 + v * 17) % 251) as u8);
            }
        }
        img
    }

    fn keypoint_at(u: f32, v: f32, index: usize) -> KeypointData {
        KeypointData::without_depth(KeyPoint { u, v, score: 1.0 }, 0, index)
    }

    #[test]
    fn stride_is_multiple_of_16() {
        let extractor = IntensityDescriptorExtractor::new(64, 9);
        assert_eq!(extractor.descriptor_len(), 80);
        assert_eq!(extractor.descriptor_stride(), 80);
        assert_eq!(extractor.descriptor_stride() % 16, 0);
        let extractor = IntensityDescriptorExtractor::new(64, 7);
        assert_eq!(extractor.descriptor_len(), 48);
        assert_eq!(extractor.descriptor_stride(), 48);
    }

    #[test]
    fn aligned_descriptor_reads_exact_pixels() {
        let img = textured_image(32, 32);
        let extractor = IntensityDescriptorExtractor::new(img.stride(), 9);
        let mut desc = vec![0u8; extractor.descriptor_len()];
        extractor.populate_descriptor_aligned(&img, 16, 16, &mut desc);
        // First sample is the top-left patch corner, last is the bottom-right.
        assert_eq!(desc[0], img.get(12, 12));
        assert_eq!(desc[extractor.descriptor_len() - 1], img.get(20, 20));
        // The center pixel is excluded: sample 39 is (15, 16), 40 is (17, 16).
        assert_eq!(desc[39], img.get(15, 16));
        assert_eq!(desc[40], img.get(17, 16));
    }

    #[test]
    fn interp_at_integer_coords_matches_aligned() {
        let img = textured_image(32, 32);
        let extractor = IntensityDescriptorExtractor::new(img.stride(), 9);
        let mut aligned = vec![0u8; extractor.descriptor_len()];
        let mut interp = vec![0u8; extractor.descriptor_len()];
        extractor.populate_descriptor_aligned(&img, 14, 13, &mut aligned);
        extractor.populate_descriptor_interp(&img, 14.0, 13.0, &mut interp);
        assert_eq!(aligned, interp);
    }

    #[test]
    fn batch_output_is_byte_identical_to_scalar() {
        let img = textured_image(48, 48);
        let extractor = IntensityDescriptorExtractor::new(img.stride(), 9);
        let keypoints: Vec<KeypointData> = (0..8)
            .map(|i| keypoint_at(12.0 + i as f32 * 3.0, 11.0 + i as f32 * 2.0, i))
            .collect();
        let stride = extractor.descriptor_stride();
        let mut batch = vec![0u8; keypoints.len() * stride];
        extractor.populate_descriptors_aligned(&img, &keypoints, &mut batch);
        let mut scalar = vec![0u8; extractor.descriptor_len()];
        for (i, kp) in keypoints.iter().enumerate() {
            extractor.populate_descriptor_aligned(
                &img,
                kp.kp.u as usize,
                kp.kp.v as usize,
                &mut scalar,
            );
            assert_eq!(&batch[i * stride..i * stride + scalar.len()], &scalar[..]);
        }

        let mut batch_interp = vec![0u8; keypoints.len() * stride];
        extractor.populate_descriptors_interp(&img, &keypoints, &mut batch_interp);
        for (i, kp) in keypoints.iter().enumerate() {
            extractor.populate_descriptor_interp(&img, kp.kp.u, kp.kp.v, &mut scalar);
            assert_eq!(
                &batch_interp[i * stride..i * stride + scalar.len()],
                &scalar[..]
            );
        }
    }

    #[test]
    fn sad_is_zero_on_identical_patches() {
        let img = textured_image(32, 32);
        let extractor = IntensityDescriptorExtractor::new(img.stride(), 9);
        let mut a = vec![0u8; extractor.descriptor_len()];
        let mut b = vec![0u8; extractor.descriptor_len()];
        extractor.populate_descriptor_aligned(&img, 16, 16, &mut a);
        extractor.populate_descriptor_aligned(&img, 16, 16, &mut b);
        assert_eq!(descriptor_sad(&a, &b), 0);
        extractor.populate_descriptor_aligned(&img, 17, 16, &mut b);
        assert!(descriptor_sad(&a, &b) > 0);
    }
}
