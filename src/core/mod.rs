// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Core functionalities of Sparse Odometry Rust.

pub mod camera;
pub mod config;
pub mod depth;
pub mod descriptor;
pub mod error;
pub mod fast;
pub mod frame;
pub mod gauss_pyramid;
pub mod grid_filter;
pub mod homography;
pub mod image;
pub mod keypoint;
pub mod matcher;
pub mod motion;
pub mod normalize;
pub mod odometry;
pub mod pyramid;
