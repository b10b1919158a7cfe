// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A full multi-level view over one raw input image.
//!
//! Preparing a frame runs the whole per-frame data pipeline: optional
//! intensity normalization, pyramid construction, per-level FAST detection,
//! bucketing, depth assignment and descriptor extraction. The three frames
//! of the controller are allocated once and reused forever.

use crate::core::camera::Intrinsics;
use crate::core::config::Config;
use crate::core::depth::DepthSource;
use crate::core::error::OdometryResult;
use crate::core::grid_filter::GridKeyPointFilter;
use crate::core::normalize::normalize_image;
use crate::core::pyramid::PyramidLevel;

/// An ordered array of pyramid levels over one input image,
/// finest at index 0.
pub struct OdometryFrame {
    levels: Vec<PyramidLevel>,
    min_pyramid_level: usize,
    use_bucketing: bool,
    use_image_normalization: bool,
    num_detected_keypoints: usize,
}

impl OdometryFrame {
    /// Allocate a frame with one pyramid level per configured scale.
    pub fn new(intrinsics: &Intrinsics, config: &Config) -> OdometryResult<Self> {
        let num_levels = config.num_pyramid_levels();
        let mut levels = Vec::with_capacity(num_levels);
        for level_num in 0..num_levels {
            let width = intrinsics.width >> level_num;
            let height = intrinsics.height >> level_num;
            let grid_filter = GridKeyPointFilter::new(
                width,
                height,
                config.bucket_width,
                config.bucket_height,
                config.max_keypoints_per_bucket,
            );
            levels.push(PyramidLevel::new(
                width,
                height,
                level_num,
                config.feature_window_size,
                grid_filter,
            )?);
        }
        Ok(OdometryFrame {
            levels,
            min_pyramid_level: config.min_pyramid_level,
            use_bucketing: config.use_bucketing,
            use_image_normalization: config.use_image_normalization,
            num_detected_keypoints: 0,
        })
    }

    /// Number of pyramid levels.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Access one pyramid level.
    pub fn level(&self, index: usize) -> &PyramidLevel {
        &self.levels[index]
    }

    /// Mutable access to one pyramid level.
    pub fn level_mut(&mut self, index: usize) -> &mut PyramidLevel {
        &mut self.levels[index]
    }

    /// Total raw FAST detections of the last preparation, before filtering.
    /// Drives the adaptive threshold controller.
    pub fn num_detected_keypoints(&self) -> usize {
        self.num_detected_keypoints
    }

    /// Total keypoints retained across all levels.
    pub fn num_keypoints(&self) -> usize {
        self.levels.iter().map(PyramidLevel::num_keypoints).sum()
    }

    /// Run the full per-frame pipeline on a new input image.
    ///
    /// `gray` must hold `height` rows of `stride >= width` bytes matching
    /// the intrinsics this frame was built with.
    pub fn prepare_frame(
        &mut self,
        gray: &[u8],
        stride: usize,
        fast_threshold: i32,
        depth_source: &dyn DepthSource,
    ) -> OdometryResult<()> {
        // Input copy, optional normalization, then the gaussian pyramid.
        self.levels[0].raw_gray_mut().copy_from(gray, stride)?;
        if self.use_image_normalization {
            normalize_image(self.levels[0].raw_gray_mut());
        }
        for l in 1..self.levels.len() {
            let (finer, coarser) = self.levels.split_at_mut(l);
            finer[l - 1].downsample_into(coarser[0].raw_gray_mut());
        }

        // Per-level feature pipeline.
        self.num_detected_keypoints = 0;
        let min_level = self.min_pyramid_level.min(self.levels.len() - 1);
        for (l, level) in self.levels.iter_mut().enumerate() {
            if l < min_level {
                level.clear_keypoints();
                continue;
            }
            self.num_detected_keypoints +=
                level.detect_features(fast_threshold, self.use_bucketing)?;
            level.assign_depth(depth_source);
            level.populate_descriptors();
        }
        Ok(())
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::depth::DepthImageSource;

    fn intrinsics() -> Intrinsics {
        Intrinsics {
            width: 128,
            height: 96,
            fx: 100.0,
            fy: 100.0,
            cx: 64.0,
            cy: 48.0,
        }
    }

    fn dotted_image(width: usize, height: usize) -> Vec<u8> {
        let mut img = vec![30u8; width * height];
        for v in (12..height - 12).step_by(12) {
            for u in (12..width - 12).step_by(12) {
                for dv in 0..3 {
                    for du in 0..3 {
                        img[(v + dv - 1) * width + u + du - 1] = 220;
                    }
                }
            }
        }
        img
    }

    #[test]
    fn pyramid_levels_have_halved_sizes() {
        let cam = intrinsics();
        let frame = OdometryFrame::new(&cam, &Config::default()).unwrap();
        assert_eq!(frame.num_levels(), 4);
        for l in 0..frame.num_levels() {
            assert_eq!(frame.level(l).width(), 128 >> l);
            assert_eq!(frame.level(l).height(), 96 >> l);
            assert_eq!(frame.level(l).raw_gray().stride() % 16, 0);
        }
    }

    #[test]
    fn prepare_detects_and_assigns_depth() {
        let cam = intrinsics();
        let mut frame = OdometryFrame::new(&cam, &Config::default()).unwrap();
        let depth = DepthImageSource::new(cam.clone(), vec![2.0; 128 * 96], 0.02);
        let img = dotted_image(128, 96);
        frame.prepare_frame(&img, 128, 20, &depth).unwrap();
        assert!(frame.num_detected_keypoints() > 0);
        assert!(frame.num_keypoints() > 0);
        for l in 0..frame.num_levels() {
            for kp in frame.level(l).keypoints() {
                assert!(kp.has_depth);
                assert!((kp.xyz.z - 2.0).abs() < 1e-3);
                assert!(frame.level(l).is_legal_keypoint_coordinate(kp.kp.u, kp.kp.v));
            }
        }
    }

    #[test]
    fn blank_image_yields_no_keypoints() {
        let cam = intrinsics();
        let mut frame = OdometryFrame::new(&cam, &Config::default()).unwrap();
        let depth = DepthImageSource::new(cam.clone(), vec![2.0; 128 * 96], 0.02);
        let img = vec![128u8; 128 * 96];
        frame.prepare_frame(&img, 128, 20, &depth).unwrap();
        assert_eq!(frame.num_detected_keypoints(), 0);
        assert_eq!(frame.num_keypoints(), 0);
    }
}
