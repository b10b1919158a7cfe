// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Interoperability conversions between the `image` crate types
//! and the aligned image buffers used by the odometry engine.

use image::{GrayImage, Luma};

use crate::core::error::OdometryResult;
use crate::core::image::ImageBuf;

/// Convert a `GrayImage` into an aligned [`ImageBuf`].
/// Inverse operation of `image_from_buf`.
pub fn buf_from_image(img: &GrayImage) -> OdometryResult<ImageBuf> {
    let (width, height) = img.dimensions();
    let mut buf = ImageBuf::zeroed(width as usize, height as usize)?;
    buf.copy_from(img.as_raw(), width as usize)?;
    Ok(buf)
}

/// Convert an aligned [`ImageBuf`] into a `GrayImage`.
/// Inverse operation of `buf_from_image`.
///
/// The stride padding is dropped in the conversion.
pub fn image_from_buf(buf: &ImageBuf) -> GrayImage {
    let mut img = GrayImage::new(buf.width() as u32, buf.height() as u32);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        *pixel = Luma([buf.get(x as usize, y as usize)]);
    }
    img
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut img = GrayImage::new(5, 3);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Luma([(x * 10 + y) as u8]);
        }
        let buf = buf_from_image(&img).unwrap();
        assert_eq!(buf.get(4, 2), 42);
        let back = image_from_buf(&buf);
        assert_eq!(img, back);
    }
}
