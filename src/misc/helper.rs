// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Small helper functions shared across the code base.

use byteorder::{BigEndian, ReadBytesExt};
use std::{fs::File, io::Cursor, path::Path};

/// Round `value` up to the next multiple of `multiple`.
pub fn round_up_to_multiple(value: usize, multiple: usize) -> usize {
    let rem = value % multiple;
    if rem == 0 {
        value
    } else {
        value + multiple - rem
    }
}

/// Read a 16 bits PNG image (such as a TUM RGB-D depth map).
///
/// Returns `(width, height, pixels)` with pixels in row major order.
pub fn read_png_16bits<P: AsRef<Path>>(
    file_path: P,
) -> Result<(usize, usize, Vec<u16>), png::DecodingError> {
    let img_file = File::open(file_path)?;
    let mut decoder = png::Decoder::new(img_file);
    // Use the IDENTITY transformation because by default
    // it will use STRIP_16 which only keeps 8 bits.
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info()?;
    let mut buffer = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buffer)?;

    // Transform the byte buffer into a 16 bits buffer.
    let mut buffer_u16 = vec![0; (info.width * info.height) as usize];
    let mut buffer_cursor = Cursor::new(buffer);
    buffer_cursor.read_u16_into::<BigEndian>(&mut buffer_u16)?;

    Ok((info.width as usize, info.height as usize, buffer_u16))
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up() {
        assert_eq!(round_up_to_multiple(0, 16), 0);
        assert_eq!(round_up_to_multiple(1, 16), 16);
        assert_eq!(round_up_to_multiple(16, 16), 16);
        assert_eq!(round_up_to_multiple(17, 16), 32);
        assert_eq!(round_up_to_multiple(640, 16), 640);
        assert_eq!(round_up_to_multiple(641, 16), 656);
    }
}
