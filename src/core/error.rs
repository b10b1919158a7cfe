// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for fatal failures of the odometry engine.
//!
//! Only resource errors (aligned allocations, invalid buffer geometry) are
//! reported through this type. Numeric failures such as "too few matches" or
//! a non-converging refinement never raise errors; they surface as an invalid
//! motion estimate on the controller.

use std::error::Error;
use std::fmt;

/// Fatal error raised while constructing or growing engine buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OdometryError {
    /// An aligned allocation was refused by the system allocator.
    Allocation {
        /// Requested size in bytes.
        bytes: usize,
    },
    /// An image buffer was requested with a zero or inconsistent shape.
    InvalidImageSize {
        /// Requested width in pixels.
        width: usize,
        /// Requested height in pixels.
        height: usize,
    },
    /// An input image slice does not contain `height` rows of `stride` bytes.
    InputTooSmall {
        /// Bytes expected from the declared shape.
        expected: usize,
        /// Bytes actually provided.
        actual: usize,
    },
}

impl fmt::Display for OdometryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OdometryError::Allocation { bytes } => {
                write!(f, "aligned allocation of {} bytes failed", bytes)
            }
            OdometryError::InvalidImageSize { width, height } => {
                write!(f, "invalid image dimensions: {}x{}", width, height)
            }
            OdometryError::InputTooSmall { expected, actual } => write!(
                f,
                "input image too small: expected {} bytes, got {}",
                expected, actual
            ),
        }
    }
}

impl Error for OdometryError {}

/// Convenient alias for results of fallible engine operations.
pub type OdometryResult<T> = Result<T, OdometryError>;
