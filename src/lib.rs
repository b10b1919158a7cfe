// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sparse Odometry Rust is a sparse, feature-based visual odometry library.
//!
//! Given a stream of 8-bit grayscale images together with a per-pixel depth
//! source (a depth image or a stereo disparity map), it estimates the 6-DoF
//! rigid motion of the camera between consecutive frames and maintains an
//! integrated pose. Everything runs single-threaded on CPU.

pub mod core;
pub mod dataset;
pub mod math;
pub mod misc;
