// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! One resolution level of an odometry frame.
//!
//! A level owns its grayscale image, the keypoints retained at that scale,
//! and their descriptors. Keypoint and descriptor storage is allocated at
//! construction and only grows through [`PyramidLevel::increase_capacity`],
//! so steady-state frames trigger no allocation.

use crate::core::depth::DepthSource;
use crate::core::descriptor::IntensityDescriptorExtractor;
use crate::core::error::OdometryResult;
use crate::core::gauss_pyramid::{gauss_pyr_down, gauss_pyr_down_buf_size};
use crate::core::grid_filter::GridKeyPointFilter;
use crate::core::image::{AlignedBuf, ImageBuf};
use crate::core::keypoint::{KeyPoint, KeypointData};

/// Initial keypoint capacity of every level.
const INITIAL_KEYPOINTS_CAPACITY: usize = 1500;

/// One pyramid level: image at scale `1 / 2^level`, keypoints, descriptors.
pub struct PyramidLevel {
    raw_gray: ImageBuf,
    level_num: usize,
    descriptor_extractor: IntensityDescriptorExtractor,
    keypoint_min_x: usize,
    keypoint_max_x: usize,
    keypoint_min_y: usize,
    keypoint_max_y: usize,
    keypoints: Vec<KeypointData>,
    keypoints_capacity: usize,
    initial_keypoints: Vec<KeyPoint>,
    num_detected_keypoints: usize,
    descriptors: AlignedBuf,
    pyrbuf: Vec<u16>,
    grid_filter: GridKeyPointFilter,
}

impl PyramidLevel {
    /// Allocate a pyramid level of the given size.
    pub fn new(
        width: usize,
        height: usize,
        level_num: usize,
        feature_window_size: usize,
        grid_filter: GridKeyPointFilter,
    ) -> OdometryResult<Self> {
        let raw_gray = ImageBuf::zeroed(width, height)?;
        let descriptor_extractor =
            IntensityDescriptorExtractor::new(raw_gray.stride(), feature_window_size);
        let descriptors =
            AlignedBuf::zeroed(INITIAL_KEYPOINTS_CAPACITY * descriptor_extractor.descriptor_stride())?;
        let pyrbuf = vec![0u16; gauss_pyr_down_buf_size(width, height)];
        Ok(PyramidLevel {
            raw_gray,
            level_num,
            descriptor_extractor,
            keypoint_min_x: feature_window_size,
            keypoint_max_x: (width.max(feature_window_size + 2)) - feature_window_size - 2,
            keypoint_min_y: feature_window_size,
            keypoint_max_y: (height.max(feature_window_size + 2)) - feature_window_size - 2,
            keypoints: Vec::with_capacity(INITIAL_KEYPOINTS_CAPACITY),
            keypoints_capacity: INITIAL_KEYPOINTS_CAPACITY,
            initial_keypoints: Vec::with_capacity(2000),
            num_detected_keypoints: 0,
            descriptors,
            pyrbuf,
            grid_filter,
        })
    }

    /// Level index, 0 being the finest.
    pub fn level_num(&self) -> usize {
        self.level_num
    }

    /// Image width of the level.
    pub fn width(&self) -> usize {
        self.raw_gray.width()
    }

    /// Image height of the level.
    pub fn height(&self) -> usize {
        self.raw_gray.height()
    }

    /// Grayscale image of the level.
    pub fn raw_gray(&self) -> &ImageBuf {
        &self.raw_gray
    }

    /// Mutable grayscale image of the level.
    pub fn raw_gray_mut(&mut self) -> &mut ImageBuf {
        &mut self.raw_gray
    }

    /// Descriptor extractor bound to this level's image stride.
    pub fn descriptor_extractor(&self) -> &IntensityDescriptorExtractor {
        &self.descriptor_extractor
    }

    /// Byte stride between descriptors of this level.
    pub fn descriptor_stride(&self) -> usize {
        self.descriptor_extractor.descriptor_stride()
    }

    /// Keypoints retained by this level.
    pub fn keypoints(&self) -> &[KeypointData] {
        &self.keypoints
    }

    /// Mutable keypoints retained by this level.
    pub fn keypoints_mut(&mut self) -> &mut [KeypointData] {
        &mut self.keypoints
    }

    /// Number of keypoints retained by this level.
    pub fn num_keypoints(&self) -> usize {
        self.keypoints.len()
    }

    /// Number of raw FAST detections of the last [`PyramidLevel::detect_features`]
    /// call, before any filtering.
    pub fn num_detected_keypoints(&self) -> usize {
        self.num_detected_keypoints
    }

    /// Current keypoint capacity.
    pub fn capacity(&self) -> usize {
        self.keypoints_capacity
    }

    /// Descriptor of keypoint `index`.
    pub fn descriptor(&self, index: usize) -> &[u8] {
        let stride = self.descriptor_extractor.descriptor_stride();
        let len = self.descriptor_extractor.descriptor_len();
        let start = index * stride;
        &self.descriptors[start..start + len]
    }

    /// Grow keypoint and descriptor storage to at least `new_capacity`.
    /// Old keypoint and descriptor data is dropped.
    pub fn increase_capacity(&mut self, new_capacity: usize) -> OdometryResult<()> {
        if new_capacity <= self.keypoints_capacity {
            return Ok(());
        }
        self.keypoints_capacity = new_capacity;
        self.keypoints = Vec::with_capacity(new_capacity);
        self.descriptors =
            AlignedBuf::zeroed(new_capacity * self.descriptor_extractor.descriptor_stride())?;
        Ok(())
    }

    /// Is `(u, v)` inside the descriptor-safe window
    /// `[W, width - W - 2) x [W, height - W - 2)`?
    pub fn is_legal_keypoint_coordinate(&self, u: f32, v: f32) -> bool {
        u >= self.keypoint_min_x as f32
            && u < self.keypoint_max_x as f32
            && v >= self.keypoint_min_y as f32
            && v < self.keypoint_max_y as f32
    }

    /// Downsample this level's image into the image of the next coarser
    /// level, reusing this level's scratch buffer.
    pub fn downsample_into(&mut self, dst: &mut ImageBuf) {
        gauss_pyr_down(&self.raw_gray, dst, &mut self.pyrbuf);
    }

    /// Run FAST detection, bucketing and boundary rejection, then keep the
    /// survivors as this level's keypoints (without depth assignment).
    ///
    /// Returns the number of raw detections, for adaptive thresholding.
    pub fn detect_features(
        &mut self,
        fast_threshold: i32,
        use_bucketing: bool,
    ) -> OdometryResult<usize> {
        crate::core::fast::detect(&self.raw_gray, fast_threshold, &mut self.initial_keypoints);
        self.num_detected_keypoints = self.initial_keypoints.len();
        if use_bucketing {
            self.grid_filter.filter(&mut self.initial_keypoints);
        }

        let min_x = self.keypoint_min_x as f32;
        let max_x = self.keypoint_max_x as f32;
        let min_y = self.keypoint_min_y as f32;
        let max_y = self.keypoint_max_y as f32;
        self.initial_keypoints
            .retain(|kp| kp.u >= min_x && kp.u < max_x && kp.v >= min_y && kp.v < max_y);

        if self.initial_keypoints.len() > self.keypoints_capacity {
            let wanted = self.initial_keypoints.len();
            self.increase_capacity(wanted.max(2 * self.keypoints_capacity))?;
        }
        self.keypoints.clear();
        let level = self.level_num;
        for (index, &kp) in self.initial_keypoints.iter().enumerate() {
            self.keypoints.push(KeypointData::without_depth(kp, level, index));
        }
        Ok(self.num_detected_keypoints)
    }

    /// Drop all retained keypoints and detection counts.
    pub fn clear_keypoints(&mut self) {
        self.keypoints.clear();
        self.initial_keypoints.clear();
        self.num_detected_keypoints = 0;
    }

    /// Assign 3D positions to the retained keypoints from the depth source.
    /// Keypoints the depth source cannot resolve are dropped, and the
    /// survivors are reindexed.
    pub fn assign_depth(&mut self, depth_source: &dyn DepthSource) {
        let level = self.level_num;
        self.keypoints.retain_mut(|kp| {
            if depth_source.has_valid_3d(level, kp.kp.u as usize, kp.kp.v as usize) {
                if let Some(xyz) = depth_source.xyz_at(level, kp.kp.u, kp.kp.v) {
                    kp.xyz = xyz;
                    kp.has_depth = true;
                    return true;
                }
            }
            false
        });
        for (index, kp) in self.keypoints.iter_mut().enumerate() {
            kp.keypoint_index = index;
        }
    }

    /// Extract descriptors for all retained keypoints (integer coordinates).
    pub fn populate_descriptors(&mut self) {
        self.descriptor_extractor.populate_descriptors_aligned(
            &self.raw_gray,
            &self.keypoints,
            &mut self.descriptors,
        );
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    fn level(width: usize, height: usize) -> PyramidLevel {
        let grid = GridKeyPointFilter::new(width, height, 80, 80, 25);
        PyramidLevel::new(width, height, 0, 9, grid).unwrap()
    }

    #[test]
    fn boundary_window() {
        let lvl = level(100, 80);
        assert!(lvl.is_legal_keypoint_coordinate(9.0, 9.0));
        assert!(!lvl.is_legal_keypoint_coordinate(8.9, 9.0));
        assert!(lvl.is_legal_keypoint_coordinate(88.9, 68.9));
        assert!(!lvl.is_legal_keypoint_coordinate(89.0, 9.0));
        assert!(!lvl.is_legal_keypoint_coordinate(9.0, 69.0));
    }

    #[test]
    fn detected_keypoints_respect_boundaries() {
        let mut lvl = level(64, 64);
        for v in 0..64 {
            lvl.raw_gray_mut().row_mut(v).iter_mut().for_each(|p| *p = 20);
        }
        // Corners near the boundary and one inside.
        for &(u, v) in &[(5, 5), (10, 10), (32, 32), (58, 58)] {
            lvl.raw_gray_mut().set(u, v, 250);
        }
        lvl.detect_features(20, true).unwrap();
        assert!(lvl.num_detected_keypoints() >= lvl.num_keypoints());
        for kp in lvl.keypoints() {
            assert!(lvl.is_legal_keypoint_coordinate(kp.kp.u, kp.kp.v));
        }
        assert_eq!(lvl.num_keypoints(), 2);
    }

    #[test]
    fn capacity_growth_is_monotonic() {
        let mut lvl = level(64, 64);
        let initial = lvl.capacity();
        lvl.increase_capacity(initial - 1).unwrap();
        assert_eq!(lvl.capacity(), initial);
        lvl.increase_capacity(initial + 10).unwrap();
        assert_eq!(lvl.capacity(), initial + 10);
    }
}
