// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The frame-to-reference visual odometry controller.
//!
//! The controller owns three frames (reference, previous, current) that
//! rotate roles by swapping, an adaptive FAST threshold, the feature
//! matcher and the motion estimator. Every input frame is matched against
//! the reference frame; when that fails, against the previous frame; when
//! tracking degrades, the reference frame is switched.

use crate::core::camera::Intrinsics;
use crate::core::config::{Config, VisualOdometryOptions};
use crate::core::depth::DepthSource;
use crate::core::error::OdometryResult;
use crate::core::frame::OdometryFrame;
use crate::core::homography;
use crate::core::matcher::FeatureMatcher;
use crate::core::motion::MotionEstimator;
use crate::misc::type_aliases::{Float, Iso3, Mat6, Quat};

/// Bounds of the adaptive FAST threshold.
const FAST_THRESHOLD_MIN: i32 = 5;
const FAST_THRESHOLD_MAX: i32 = 70;

/// Pyramid level targeted by the homography rotation prior.
const INITIAL_ROTATION_PYRAMID_LEVEL: usize = 4;

/// Frame-to-frame visual odometry engine.
pub struct VisualOdometry {
    intrinsics: Intrinsics,
    config: Config,
    ref_frame: OdometryFrame,
    prev_frame: OdometryFrame,
    cur_frame: OdometryFrame,
    matcher: FeatureMatcher,
    estimator: MotionEstimator,
    fast_threshold: i32,
    frame_count: usize,
    change_reference_frames: bool,
    pose: Iso3,
    ref_to_prev_frame: Iso3,
    motion_estimate: Iso3,
    motion_estimate_covariance: Mat6,
}

impl VisualOdometry {
    /// Create an engine for the given camera, allocating its three frames.
    ///
    /// Unrecognized option keys are warned about and ignored.
    pub fn new(intrinsics: &Intrinsics, options: &VisualOdometryOptions) -> OdometryResult<Self> {
        let config = Config::from_options(options);
        let ref_frame = OdometryFrame::new(intrinsics, &config)?;
        let prev_frame = OdometryFrame::new(intrinsics, &config)?;
        let cur_frame = OdometryFrame::new(intrinsics, &config)?;
        let matcher = FeatureMatcher::new(&config);
        let estimator = MotionEstimator::new(&config);
        Ok(VisualOdometry {
            intrinsics: intrinsics.clone(),
            fast_threshold: config.fast_threshold,
            config,
            ref_frame,
            prev_frame,
            cur_frame,
            matcher,
            estimator,
            frame_count: 0,
            change_reference_frames: false,
            pose: Iso3::identity(),
            ref_to_prev_frame: Iso3::identity(),
            motion_estimate: Iso3::identity(),
            motion_estimate_covariance: Mat6::identity(),
        })
    }

    /// Process one input frame: a grayscale image sized like the camera,
    /// provided as rows of `stride` bytes, plus its depth source.
    pub fn process_frame(
        &mut self,
        gray: &[u8],
        stride: usize,
        depth_source: &dyn DepthSource,
    ) -> OdometryResult<()> {
        if self.change_reference_frames {
            // The incoming frame becomes the new reference frame.
            std::mem::swap(&mut self.ref_frame, &mut self.cur_frame);
            self.ref_to_prev_frame = Iso3::identity();
        } else {
            // The reference stays, the current frame becomes the previous.
            std::mem::swap(&mut self.prev_frame, &mut self.cur_frame);
        }
        let changed_reference_frames = self.change_reference_frames;
        self.change_reference_frames = false;
        self.motion_estimate = Iso3::identity();

        self.cur_frame
            .prepare_frame(gray, stride, self.fast_threshold, depth_source)?;

        if self.config.use_adaptive_threshold {
            self.adapt_fast_threshold();
        }

        self.frame_count += 1;
        // Matching needs descriptors from an already prepared frame.
        if self.frame_count < 2 {
            self.change_reference_frames = true;
            return Ok(());
        }

        let init_rotation = if self.config.use_homography_initialization {
            if changed_reference_frames {
                // The previous frame was just swapped into the reference slot.
                estimate_initial_rotation(&self.ref_frame, &self.cur_frame, &self.intrinsics)
            } else {
                estimate_initial_rotation(&self.prev_frame, &self.cur_frame, &self.intrinsics)
            }
        } else {
            Quat::identity()
        };

        // Initial motion estimate, in "current to reference" form.
        let initial_motion_estimate =
            self.ref_to_prev_frame.inverse() * Iso3::from_parts(nalgebra::Translation3::identity(), init_rotation);
        let ref_to_cur = initial_motion_estimate.inverse();

        let mut matches = self.matcher.match_frames(
            &self.ref_frame,
            &mut self.cur_frame,
            depth_source,
            &ref_to_cur,
            &self.intrinsics,
        );
        self.estimator
            .estimate(&mut matches, &self.intrinsics, &ref_to_cur);

        if self.estimator.is_valid() {
            let to_reference = self.estimator.motion();
            self.motion_estimate = self.ref_to_prev_frame * to_reference;
            // The covariance is kept in the matched frame pair coordinates.
            self.motion_estimate_covariance = self.estimator.covariance();
            self.ref_to_prev_frame = to_reference.inverse();
            self.pose *= self.motion_estimate;
        } else if !changed_reference_frames {
            // Failed against the reference frame: retry against the
            // previous frame before giving up on this input.
            log::debug!("estimate failed against reference, retrying against previous");
            let initial_motion_estimate =
                Iso3::from_parts(nalgebra::Translation3::identity(), init_rotation);
            let prev_to_cur = initial_motion_estimate.inverse();
            let mut matches = self.matcher.match_frames(
                &self.prev_frame,
                &mut self.cur_frame,
                depth_source,
                &prev_to_cur,
                &self.intrinsics,
            );
            self.estimator
                .estimate(&mut matches, &self.intrinsics, &prev_to_cur);
            if self.estimator.is_valid() {
                self.motion_estimate = self.estimator.motion();
                self.motion_estimate_covariance = self.estimator.covariance();
                self.pose *= self.motion_estimate;
                self.change_reference_frames = true;
            }
        }

        if !self.estimator.is_valid()
            || self.estimator.num_inliers() < self.config.ref_frame_change_threshold
        {
            self.change_reference_frames = true;
        }
        if self.change_reference_frames {
            log::debug!("changing reference frames");
        }
        Ok(())
    }

    /// Proportional control of the FAST threshold toward the target
    /// feature density.
    fn adapt_fast_threshold(&mut self) {
        let target =
            (self.intrinsics.width * self.intrinsics.height) / self.config.target_pixels_per_feature;
        let err = self.cur_frame.num_detected_keypoints() as Float - target as Float;
        let adjustment = (err * self.config.fast_threshold_adaptive_gain).round() as i32;
        self.fast_threshold = (self.fast_threshold + adjustment)
            .max(FAST_THRESHOLD_MIN)
            .min(FAST_THRESHOLD_MAX);
    }

    /// Accumulated pose of the camera, in the frame of the first input.
    pub fn pose(&self) -> Iso3 {
        self.pose
    }

    /// Motion of the last processed frame relative to the frame before it.
    pub fn motion_estimate(&self) -> Iso3 {
        self.motion_estimate
    }

    /// Covariance of the last motion estimate.
    pub fn motion_estimate_covariance(&self) -> Mat6 {
        self.motion_estimate_covariance
    }

    /// Is the last motion estimate valid?
    pub fn motion_estimate_valid(&self) -> bool {
        self.estimator.is_valid()
    }

    /// Inlier count of the last motion estimation.
    pub fn num_inliers(&self) -> usize {
        self.estimator.num_inliers()
    }

    /// Mean reprojection error of the last motion estimation, in pixels.
    pub fn mean_reprojection_error(&self) -> Float {
        self.estimator.mean_reprojection_error()
    }

    /// Current FAST detector threshold.
    pub fn fast_threshold(&self) -> i32 {
        self.fast_threshold
    }

    /// Will the next input become the new reference frame?
    pub fn will_change_reference_frames(&self) -> bool {
        self.change_reference_frames
    }

    /// Number of frames processed so far.
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Diagnostic view of the reference frame.
    pub fn reference_frame(&self) -> &OdometryFrame {
        &self.ref_frame
    }

    /// Diagnostic view of the previous frame.
    pub fn previous_frame(&self) -> &OdometryFrame {
        &self.prev_frame
    }

    /// Diagnostic view of the current frame.
    pub fn current_frame(&self) -> &OdometryFrame {
        &self.cur_frame
    }
}

/// Coarse 3-DoF rotation prior between two frames, from the ESM homography
/// tracker run on a coarse pyramid level. Falls back to identity when the
/// tracker is degenerate.
fn estimate_initial_rotation(
    from: &OdometryFrame,
    cur: &OdometryFrame,
    intrinsics: &Intrinsics,
) -> Quat {
    let level = INITIAL_ROTATION_PYRAMID_LEVEL.min(from.num_levels() - 1);
    let template = from.level(level).raw_gray();
    let test = cur.level(level).raw_gray();
    match homography::track(template, test, homography::MAX_ESM_ITERATIONS) {
        Some((h, _rms)) => {
            let h_full = homography::scale_to_full_resolution(&h, level);
            homography::rotation_prior(&h_full, intrinsics)
        }
        None => Quat::identity(),
    }
}
