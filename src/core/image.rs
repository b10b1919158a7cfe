// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Aligned grayscale image buffer.
//!
//! Pyramid levels and descriptor extraction sample pixels through raw
//! per-row offsets, so the buffer guarantees that every row starts 16-byte
//! aligned: the row stride is the width rounded up to a multiple of 16 and
//! the allocation itself is 16-byte aligned.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::core::error::{OdometryError, OdometryResult};
use crate::misc::helper::round_up_to_multiple;
use crate::misc::type_aliases::Float;

/// Alignment of image and descriptor allocations, in bytes.
pub const ALIGNMENT: usize = 16;

// Aligned byte buffer #########################################################

/// Heap allocation of bytes with 16-byte alignment, zero-initialized.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
}

impl AlignedBuf {
    /// Allocate `len` zeroed bytes aligned to [`ALIGNMENT`].
    pub fn zeroed(len: usize) -> OdometryResult<Self> {
        let layout = Layout::from_size_align(len.max(1), ALIGNMENT)
            .map_err(|_| OdometryError::Allocation { bytes: len })?;
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(OdometryError::Allocation { bytes: len })?;
        Ok(AlignedBuf {
            ptr,
            len: len.max(1),
        })
    }

    /// Number of bytes in the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // Layout was validated at allocation time.
        let layout = Layout::from_size_align(self.len, ALIGNMENT).unwrap();
        unsafe { dealloc(self.ptr.as_ptr(), layout) };
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

// Image buffer ################################################################

/// Single-plane 8-bit grayscale image with an aligned row stride.
pub struct ImageBuf {
    buf: AlignedBuf,
    width: usize,
    height: usize,
    stride: usize,
}

impl ImageBuf {
    /// Allocate a zeroed image of the given dimensions.
    pub fn zeroed(width: usize, height: usize) -> OdometryResult<Self> {
        if width == 0 || height == 0 {
            return Err(OdometryError::InvalidImageSize { width, height });
        }
        let stride = round_up_to_multiple(width, ALIGNMENT);
        let buf = AlignedBuf::zeroed(stride * height)?;
        Ok(ImageBuf {
            buf,
            width,
            height,
            stride,
        })
    }

    /// Image width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Image height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Row stride in bytes. Always a multiple of 16 and `>= width`.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Raw backing bytes, `height * stride` of them.
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable raw backing bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// One row of pixels, without the stride padding.
    pub fn row(&self, v: usize) -> &[u8] {
        let start = v * self.stride;
        &self.buf[start..start + self.width]
    }

    /// Mutable access to one row of pixels.
    pub fn row_mut(&mut self, v: usize) -> &mut [u8] {
        let start = v * self.stride;
        &mut self.buf[start..start + self.width]
    }

    /// Pixel value at integer coordinates.
    pub fn get(&self, u: usize, v: usize) -> u8 {
        self.buf[v * self.stride + u]
    }

    /// Set the pixel value at integer coordinates.
    pub fn set(&mut self, u: usize, v: usize, value: u8) {
        self.buf[v * self.stride + u] = value;
    }

    /// Copy pixel rows from an external buffer with its own stride.
    pub fn copy_from(&mut self, src: &[u8], src_stride: usize) -> OdometryResult<()> {
        let needed = (self.height - 1) * src_stride + self.width;
        if src_stride < self.width || src.len() < needed {
            return Err(OdometryError::InputTooSmall {
                expected: needed,
                actual: src.len(),
            });
        }
        for v in 0..self.height {
            let src_start = v * src_stride;
            let dst_start = v * self.stride;
            self.buf[dst_start..dst_start + self.width]
                .copy_from_slice(&src[src_start..src_start + self.width]);
        }
        Ok(())
    }

    /// Simple bilinear interpolation of a pixel with floating point coordinates.
    /// Return `None` if the point is outside of the image boundaries.
    pub fn interpolate(&self, x: Float, y: Float) -> Option<Float> {
        let u = x.floor();
        let v = y.floor();
        if u >= 0.0 && u < (self.width - 1) as Float && v >= 0.0 && v < (self.height - 1) as Float {
            let u_0 = u as usize;
            let v_0 = v as usize;
            let base = v_0 * self.stride + u_0;
            let vu_00 = Float::from(self.buf[base]);
            let vu_01 = Float::from(self.buf[base + 1]);
            let vu_10 = Float::from(self.buf[base + self.stride]);
            let vu_11 = Float::from(self.buf[base + self.stride + 1]);
            let a = x - u;
            let b = y - v;
            Some(
                (1.0 - b) * (1.0 - a) * vu_00
                    + b * (1.0 - a) * vu_10
                    + (1.0 - b) * a * vu_01
                    + b * a * vu_11,
            )
        } else {
            None
        }
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_is_aligned() {
        for width in &[1, 15, 16, 17, 300, 641] {
            let img = ImageBuf::zeroed(*width, 4).unwrap();
            assert!(img.stride() % ALIGNMENT == 0);
            assert!(img.stride() >= *width);
            assert_eq!(img.data().as_ptr() as usize % ALIGNMENT, 0);
        }
    }

    #[test]
    fn zero_sized_image_is_refused() {
        assert!(ImageBuf::zeroed(0, 10).is_err());
        assert!(ImageBuf::zeroed(10, 0).is_err());
    }

    #[test]
    fn copy_from_tight_stride() {
        let src: Vec<u8> = (0..20u8).collect();
        let mut img = ImageBuf::zeroed(5, 4).unwrap();
        img.copy_from(&src, 5).unwrap();
        assert_eq!(img.get(0, 0), 0);
        assert_eq!(img.get(4, 3), 19);
        assert_eq!(img.row(2), &[10, 11, 12, 13, 14]);
    }

    #[test]
    fn interpolate_matches_pixels_at_integer_coords() {
        let mut img = ImageBuf::zeroed(4, 4).unwrap();
        img.set(1, 2, 200);
        assert_eq!(img.interpolate(1.0, 2.0), Some(200.0));
        assert_eq!(img.interpolate(-1.0, 0.0), None);
        assert_eq!(img.interpolate(3.5, 0.0), None);
    }

    #[test]
    fn interpolate_blends_neighbors() {
        let mut img = ImageBuf::zeroed(4, 4).unwrap();
        img.set(0, 0, 100);
        img.set(1, 0, 200);
        assert_eq!(img.interpolate(0.5, 0.0), Some(150.0));
    }
}
