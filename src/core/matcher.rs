// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Feature matching between the reference frame and the current frame.
//!
//! Every reference keypoint with a valid depth is projected into the
//! current frame through the initial motion estimate; current keypoints of
//! the same pyramid level inside the search window are candidate matches,
//! scored by the sum of absolute differences of their descriptors. The best
//! candidate is kept, optionally subject to a mutual-best check, then
//! optionally refined to subpixel position by Gauss-Newton on the patch
//! intensity residual.

use crate::core::config::Config;
use crate::core::depth::DepthSource;
use crate::core::descriptor::descriptor_sad;
use crate::core::frame::OdometryFrame;
use crate::core::camera::Intrinsics;
use crate::misc::type_aliases::{Float, Iso3, Point2, Point3};

/// Iteration cap of the subpixel refinement.
const MAX_REFINEMENT_ITERATIONS: usize = 5;

/// A correspondence between a reference keypoint and a current keypoint.
#[derive(Debug, Clone)]
pub struct FeatureMatch {
    /// Pyramid level both keypoints live on.
    pub level: usize,
    /// Index of the reference keypoint in its level.
    pub ref_keypoint_index: usize,
    /// Index of the current keypoint in its level.
    pub cur_keypoint_index: usize,
    /// 3D position of the reference keypoint, in the reference camera frame.
    pub ref_xyz: Point3,
    /// 3D position of the current keypoint, in the current camera frame.
    pub cur_xyz: Point3,
    /// Current keypoint pixel after refinement, in level 0 coordinates.
    pub refined_base_uv: Point2,
    /// Reprojection error of the last motion refinement, in pixels.
    pub reprojection_error: Float,
    /// Whether the match survived inlier selection and pruning.
    pub inlier: bool,
    /// Index of this match in the compatibility graph adjacency bitsets.
    pub id: usize,
}

/// Matcher configuration and scratch state.
pub struct FeatureMatcher {
    require_mutual_match: bool,
    feature_search_window: Float,
    use_subpixel_refinement: bool,
    max_refinement_displacement: Float,
    update_target_features_with_refined: bool,
    // Scratch: best (sad, ref index) per current keypoint of one level.
    reverse_best: Vec<(u32, usize)>,
}

impl FeatureMatcher {
    /// Create a matcher from the engine configuration.
    pub fn new(config: &Config) -> Self {
        FeatureMatcher {
            require_mutual_match: config.stereo_require_mutual_match,
            feature_search_window: config.feature_search_window,
            use_subpixel_refinement: config.use_subpixel_refinement,
            max_refinement_displacement: config.stereo_max_refinement_displacement,
            update_target_features_with_refined: config.update_target_features_with_refined,
            reverse_best: Vec::new(),
        }
    }

    /// Match the reference frame against the current frame.
    ///
    /// `ref_to_cur` transforms reference-frame coordinates into
    /// current-frame coordinates (the inverse of the initial motion
    /// estimate published by the controller).
    pub fn match_frames(
        &mut self,
        ref_frame: &OdometryFrame,
        cur_frame: &mut OdometryFrame,
        depth_source: &dyn DepthSource,
        ref_to_cur: &Iso3,
        intrinsics: &Intrinsics,
    ) -> Vec<FeatureMatch> {
        let mut matches = Vec::new();
        let num_levels = ref_frame.num_levels().min(cur_frame.num_levels());
        for level in 0..num_levels {
            self.match_level(
                ref_frame,
                cur_frame,
                depth_source,
                ref_to_cur,
                intrinsics,
                level,
                &mut matches,
            );
        }
        for (id, m) in matches.iter_mut().enumerate() {
            m.id = id;
        }
        matches
    }

    #[allow(clippy::too_many_arguments)]
    fn match_level(
        &mut self,
        ref_frame: &OdometryFrame,
        cur_frame: &mut OdometryFrame,
        depth_source: &dyn DepthSource,
        ref_to_cur: &Iso3,
        intrinsics: &Intrinsics,
        level: usize,
        matches: &mut Vec<FeatureMatch>,
    ) {
        let ref_level = ref_frame.level(level);
        let cur_level = cur_frame.level(level);
        let num_cur = cur_level.num_keypoints();
        if num_cur == 0 {
            return;
        }
        let level_scale = (1usize << level) as Float;
        // The depth uncertainty hint widens the window at its projected size.
        let window = self.feature_search_window
            + depth_source.get_sigma_range() * intrinsics.fx / level_scale;

        self.reverse_best.clear();
        self.reverse_best.resize(num_cur, (u32::MAX, usize::MAX));

        // Forward pass: best current candidate of each reference keypoint.
        let mut forward: Vec<(usize, usize, u32)> = Vec::new();
        for ref_kp in ref_level.keypoints() {
            if !ref_kp.has_depth {
                continue;
            }
            let predicted = ref_to_cur * ref_kp.xyz;
            let base_uv = match intrinsics.project_pixel(predicted) {
                Some(uv) => uv,
                None => continue,
            };
            let pred_u = base_uv.x / level_scale;
            let pred_v = base_uv.y / level_scale;

            let ref_descriptor = ref_level.descriptor(ref_kp.keypoint_index);
            let mut best: Option<(usize, u32)> = None;
            for cur_kp in cur_level.keypoints() {
                if (cur_kp.kp.u - pred_u).abs() > window || (cur_kp.kp.v - pred_v).abs() > window {
                    continue;
                }
                let sad = descriptor_sad(ref_descriptor, cur_level.descriptor(cur_kp.keypoint_index));
                if best.map_or(true, |(_, best_sad)| sad < best_sad) {
                    best = Some((cur_kp.keypoint_index, sad));
                }
            }
            if let Some((cur_index, sad)) = best {
                forward.push((ref_kp.keypoint_index, cur_index, sad));
                // Track the reverse direction over the same candidate pairs.
                if sad < self.reverse_best[cur_index].0 {
                    self.reverse_best[cur_index] = (sad, ref_kp.keypoint_index);
                }
            }
        }

        for (ref_index, cur_index, _sad) in forward {
            if self.require_mutual_match && self.reverse_best[cur_index].1 != ref_index {
                continue;
            }
            let ref_kp = &ref_level.keypoints()[ref_index];
            let cur_kp = &cur_level.keypoints()[cur_index];
            let mut refined_u = cur_kp.kp.u;
            let mut refined_v = cur_kp.kp.v;
            if self.use_subpixel_refinement {
                let ref_descriptor = ref_level.descriptor(ref_index);
                if let Some((u, v)) = refine_match(
                    ref_descriptor,
                    cur_level.raw_gray(),
                    cur_level.descriptor_extractor().patch_radius(),
                    cur_kp.kp.u,
                    cur_kp.kp.v,
                    self.max_refinement_displacement,
                ) {
                    refined_u = u;
                    refined_v = v;
                }
            }
            // The current 3D position comes from the depth source at the
            // refined pixel; matches it cannot resolve are excluded.
            let cur_xyz = match depth_source.refine_xyz(level, refined_u, refined_v, &cur_kp.xyz) {
                Some(xyz) => xyz,
                None => continue,
            };
            matches.push(FeatureMatch {
                level,
                ref_keypoint_index: ref_index,
                cur_keypoint_index: cur_index,
                ref_xyz: ref_kp.xyz,
                cur_xyz,
                refined_base_uv: Point2::new(refined_u * level_scale, refined_v * level_scale),
                reprojection_error: Float::INFINITY,
                inlier: false,
                id: 0,
            });
        }

        if self.update_target_features_with_refined && self.use_subpixel_refinement {
            let scale_inv = 1.0 / level_scale;
            let cur_level = cur_frame.level_mut(level);
            for m in matches.iter().filter(|m| m.level == level) {
                let kp = &mut cur_level.keypoints_mut()[m.cur_keypoint_index];
                kp.kp.u = m.refined_base_uv.x * scale_inv;
                kp.kp.v = m.refined_base_uv.y * scale_inv;
                kp.base_uv = m.refined_base_uv;
                kp.xyz = m.cur_xyz;
            }
        }
    }
}

/// Gauss-Newton refinement of a match position on 2D translation,
/// minimizing the intensity residual between the reference descriptor and
/// the current image patch.
///
/// A step that would push the displacement beyond `max_displacement`,
/// leave the safe image area, raise the residual, or comes from a
/// degenerate gradient system is rejected and ends the iterations, so the
/// returned position never fits worse than the starting pixel and never
/// travels beyond the cap. `None` is only returned when no refinement is
/// possible at all because the starting patch touches the image border.
fn refine_match(
    ref_descriptor: &[u8],
    img: &crate::core::image::ImageBuf,
    patch_radius: usize,
    start_u: Float,
    start_v: Float,
    max_displacement: Float,
) -> Option<(Float, Float)> {
    let radius = patch_radius as Float;
    let in_bounds = |u: Float, v: Float| {
        u - radius >= 1.0
            && v - radius >= 1.0
            && u + radius < (img.width() - 2) as Float
            && v + radius < (img.height() - 2) as Float
    };
    if !in_bounds(start_u, start_v) {
        return None;
    }

    let mut u = start_u;
    let mut v = start_v;
    let mut last_ssd = patch_ssd(ref_descriptor, img, patch_radius, u, v)?;
    for _ in 0..MAX_REFINEMENT_ITERATIONS {
        // Accumulate the 2x2 normal equations of the photometric residual
        // with respect to the patch translation.
        let mut h00 = 0.0;
        let mut h01 = 0.0;
        let mut h11 = 0.0;
        let mut g0 = 0.0;
        let mut g1 = 0.0;
        let mut index = 0;
        let r = patch_radius as isize;
        for dv in -r..=r {
            for du in -r..=r {
                if du == 0 && dv == 0 {
                    continue;
                }
                let su = u + du as Float;
                let sv = v + dv as Float;
                let value = img.interpolate(su, sv)?;
                let gx = 0.5 * (img.interpolate(su + 1.0, sv)? - img.interpolate(su - 1.0, sv)?);
                let gy = 0.5 * (img.interpolate(su, sv + 1.0)? - img.interpolate(su, sv - 1.0)?);
                let residual = value - Float::from(ref_descriptor[index]);
                h00 += gx * gx;
                h01 += gx * gy;
                h11 += gy * gy;
                g0 += gx * residual;
                g1 += gy * residual;
                index += 1;
            }
        }
        let det = h00 * h11 - h01 * h01;
        if det.abs() < 1e-8 {
            break;
        }
        let mut step_u = -(h11 * g0 - h01 * g1) / det;
        let mut step_v = -(-h01 * g0 + h00 * g1) / det;
        // One pixel per iteration keeps the linearization valid.
        let step_norm = (step_u * step_u + step_v * step_v).sqrt();
        if step_norm < 0.01 {
            break;
        }
        if step_norm > 1.0 {
            step_u /= step_norm;
            step_v /= step_norm;
        }
        let candidate_u = u + step_u;
        let candidate_v = v + step_v;
        if !in_bounds(candidate_u, candidate_v) {
            break;
        }
        let displacement_2 = (candidate_u - start_u) * (candidate_u - start_u)
            + (candidate_v - start_v) * (candidate_v - start_v);
        if displacement_2.sqrt() > max_displacement {
            break;
        }
        let ssd = match patch_ssd(ref_descriptor, img, patch_radius, candidate_u, candidate_v) {
            Some(ssd) => ssd,
            None => break,
        };
        if ssd >= last_ssd {
            break;
        }
        u = candidate_u;
        v = candidate_v;
        last_ssd = ssd;
    }
    Some((u, v))
}

/// Sum of squared differences between the reference descriptor and the
/// interpolated current patch at `(u, v)`.
fn patch_ssd(
    ref_descriptor: &[u8],
    img: &crate::core::image::ImageBuf,
    patch_radius: usize,
    u: Float,
    v: Float,
) -> Option<Float> {
    let mut ssd = 0.0;
    let mut index = 0;
    let r = patch_radius as isize;
    for dv in -r..=r {
        for du in -r..=r {
            if du == 0 && dv == 0 {
                continue;
            }
            let value = img.interpolate(u + du as Float, v + dv as Float)?;
            let diff = value - Float::from(ref_descriptor[index]);
            ssd += diff * diff;
            index += 1;
        }
    }
    Some(ssd)
}

// TESTS #######################################################################
