// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! String-keyed engine configuration.
//!
//! Callers hand the controller a map of option strings. Unrecognized keys
//! produce a warning but do not abort; malformed values warn and fall back
//! to the default of the key.

use std::collections::BTreeMap;

use crate::misc::type_aliases::Float;

/// String-keyed option record handed to the controller.
pub type VisualOdometryOptions = BTreeMap<String, String>;

/// The default value of every recognized option key.
pub fn default_options() -> VisualOdometryOptions {
    let mut options = BTreeMap::new();
    let mut set = |k: &str, v: &str| options.insert(k.to_string(), v.to_string());

    // Controller and frames.
    set("feature-window-size", "9");
    set("max-pyramid-level", "3");
    set("min-pyramid-level", "0");
    set("target-pixels-per-feature", "250");
    set("fast-threshold", "20");
    set("use-adaptive-threshold", "true");
    set("fast-threshold-adaptive-gain", "0.005");
    set("use-homography-initialization", "true");
    set("ref-frame-change-threshold", "150");

    // Frame preparation.
    set("use-bucketing", "true");
    set("bucket-width", "80");
    set("bucket-height", "80");
    set("max-keypoints-per-bucket", "25");
    set("use-image-normalization", "false");

    // Matcher and motion estimator.
    set("inlier-max-reprojection-error", "1.5");
    set("clique-inlier-threshold", "0.1");
    set("min-features-for-estimate", "10");
    set("max-mean-reprojection-error", "10.0");
    set("use-subpixel-refinement", "true");
    set("feature-search-window", "25");
    set("update-target-features-with-refined", "false");

    // Depth source options.
    set("stereo-require-mutual-match", "true");
    set("stereo-max-dist-epipolar-line", "1.5");
    set("stereo-max-refinement-displacement", "1.0");
    set("stereo-max-disparity", "128");

    options
}

/// Typed configuration extracted from a [`VisualOdometryOptions`] record.
#[derive(Debug, Clone)]
pub struct Config {
    /// Feature window size, controlling the descriptor patch and the
    /// keypoint-safe boundary margin.
    pub feature_window_size: usize,
    /// Coarsest pyramid level index.
    pub max_pyramid_level: usize,
    /// Finest pyramid level at which features are collected.
    pub min_pyramid_level: usize,
    /// Adaptive threshold aims for one feature per this many pixels.
    pub target_pixels_per_feature: usize,
    /// Initial FAST detector threshold.
    pub fast_threshold: i32,
    /// Enable the proportional control of the FAST threshold.
    pub use_adaptive_threshold: bool,
    /// Proportional gain of the adaptive threshold controller.
    pub fast_threshold_adaptive_gain: Float,
    /// Estimate an initial rotation with the ESM homography tracker.
    pub use_homography_initialization: bool,
    /// Minimum inlier count below which the reference frame is switched.
    pub ref_frame_change_threshold: usize,
    /// Spatially uniform keypoint subsampling.
    pub use_bucketing: bool,
    /// Bucket cell width in pixels.
    pub bucket_width: usize,
    /// Bucket cell height in pixels.
    pub bucket_height: usize,
    /// Keypoints retained per bucket cell.
    pub max_keypoints_per_bucket: usize,
    /// Normalize image intensities before building the pyramid.
    pub use_image_normalization: bool,
    /// Tukey cutoff and inlier gate on reprojection errors, in pixels.
    pub inlier_max_reprojection_error: Float,
    /// Pairwise rigid-distance tolerance of the clique graph, in meters.
    pub clique_inlier_threshold: Float,
    /// Abort floor for matches and clique size.
    pub min_features_for_estimate: usize,
    /// Validity gate on the mean reprojection error, in pixels.
    pub max_mean_reprojection_error: Float,
    /// Refine matches to subpixel positions.
    pub use_subpixel_refinement: bool,
    /// Matcher candidate search radius, in pixels of the matched level.
    pub feature_search_window: Float,
    /// Write refined pixels back into the target frame keypoints.
    pub update_target_features_with_refined: bool,
    /// Enforce mutual-best matching.
    pub stereo_require_mutual_match: bool,
    /// Maximum epipolar-line distance accepted by the stereo backend.
    pub stereo_max_dist_epipolar_line: Float,
    /// Discard subpixel refinements displacing a match further than this.
    pub stereo_max_refinement_displacement: Float,
    /// Maximum disparity accepted by the stereo backend.
    pub stereo_max_disparity: Float,
}

impl Default for Config {
    fn default() -> Self {
        Config::from_options(&default_options())
    }
}

impl Config {
    /// Extract a typed configuration, warning about unrecognized keys and
    /// falling back to defaults on malformed values.
    pub fn from_options(options: &VisualOdometryOptions) -> Config {
        let defaults = default_options();
        for key in options.keys() {
            if !defaults.contains_key(key) {
                log::warn!("unrecognized option [{}]", key);
            }
        }
        let config = Config {
            feature_window_size: get(options, &defaults, "feature-window-size"),
            max_pyramid_level: get(options, &defaults, "max-pyramid-level"),
            min_pyramid_level: get(options, &defaults, "min-pyramid-level"),
            target_pixels_per_feature: get(options, &defaults, "target-pixels-per-feature"),
            fast_threshold: get(options, &defaults, "fast-threshold"),
            use_adaptive_threshold: get(options, &defaults, "use-adaptive-threshold"),
            fast_threshold_adaptive_gain: get(options, &defaults, "fast-threshold-adaptive-gain"),
            use_homography_initialization: get(options, &defaults, "use-homography-initialization"),
            ref_frame_change_threshold: get(options, &defaults, "ref-frame-change-threshold"),
            use_bucketing: get(options, &defaults, "use-bucketing"),
            bucket_width: get(options, &defaults, "bucket-width"),
            bucket_height: get(options, &defaults, "bucket-height"),
            max_keypoints_per_bucket: get(options, &defaults, "max-keypoints-per-bucket"),
            use_image_normalization: get(options, &defaults, "use-image-normalization"),
            inlier_max_reprojection_error: get(options, &defaults, "inlier-max-reprojection-error"),
            clique_inlier_threshold: get(options, &defaults, "clique-inlier-threshold"),
            min_features_for_estimate: get(options, &defaults, "min-features-for-estimate"),
            max_mean_reprojection_error: get(options, &defaults, "max-mean-reprojection-error"),
            use_subpixel_refinement: get(options, &defaults, "use-subpixel-refinement"),
            feature_search_window: get(options, &defaults, "feature-search-window"),
            update_target_features_with_refined: get(
                options,
                &defaults,
                "update-target-features-with-refined",
            ),
            stereo_require_mutual_match: get(options, &defaults, "stereo-require-mutual-match"),
            stereo_max_dist_epipolar_line: get(options, &defaults, "stereo-max-dist-epipolar-line"),
            stereo_max_refinement_displacement: get(
                options,
                &defaults,
                "stereo-max-refinement-displacement",
            ),
            stereo_max_disparity: get(options, &defaults, "stereo-max-disparity"),
        };
        if config.min_pyramid_level > config.max_pyramid_level {
            log::warn!(
                "min-pyramid-level {} above max-pyramid-level {}, using 0",
                config.min_pyramid_level,
                config.max_pyramid_level
            );
            Config {
                min_pyramid_level: 0,
                ..config
            }
        } else {
            config
        }
    }

    /// Number of pyramid levels of every frame.
    pub fn num_pyramid_levels(&self) -> usize {
        self.max_pyramid_level + 1
    }
}

/// Parse the value of `key`, falling back to its default on a missing or
/// malformed value.
fn get<T: std::str::FromStr>(
    options: &VisualOdometryOptions,
    defaults: &VisualOdometryOptions,
    key: &str,
) -> T {
    let default_value = &defaults[key];
    let value = options.get(key).unwrap_or(default_value);
    value.parse().unwrap_or_else(|_| {
        log::warn!("malformed value [{}] for option [{}]", value, key);
        default_value
            .parse()
            .ok()
            .expect("default option values always parse")
    })
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let config = Config::default();
        assert_eq!(config.feature_window_size, 9);
        assert_eq!(config.num_pyramid_levels(), 4);
        assert_eq!(config.fast_threshold, 20);
        assert!(config.use_adaptive_threshold);
        assert!(config.use_homography_initialization);
        assert!(config.use_bucketing);
        assert!(!config.use_image_normalization);
        assert_eq!(config.ref_frame_change_threshold, 150);
        assert_eq!(config.max_keypoints_per_bucket, 25);
        assert!((config.inlier_max_reprojection_error - 1.5).abs() < 1e-6);
        assert!((config.clique_inlier_threshold - 0.1).abs() < 1e-6);
        assert_eq!(config.min_features_for_estimate, 10);
        assert!((config.feature_search_window - 25.0).abs() < 1e-6);
        assert!(config.stereo_require_mutual_match);
        assert!((config.stereo_max_refinement_displacement - 1.0).abs() < 1e-6);
    }

    #[test]
    fn unknown_keys_do_not_abort() {
        let mut options = default_options();
        options.insert("foo".to_string(), "bar".to_string());
        let config = Config::from_options(&options);
        assert_eq!(config.fast_threshold, 20);
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let mut options = VisualOdometryOptions::new();
        options.insert("fast-threshold".to_string(), "high".to_string());
        options.insert("bucket-width".to_string(), "40".to_string());
        let config = Config::from_options(&options);
        assert_eq!(config.fast_threshold, 20);
        assert_eq!(config.bucket_width, 40);
    }

    #[test]
    fn inverted_pyramid_levels_are_repaired() {
        let mut options = VisualOdometryOptions::new();
        options.insert("min-pyramid-level".to_string(), "5".to_string());
        let config = Config::from_options(&options);
        assert_eq!(config.min_pyramid_level, 0);
    }
}
