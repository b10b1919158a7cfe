// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Rigid motion estimation from 3D to 2D feature correspondences.
//!
//! Inliers are selected first: a rigid motion preserves pairwise 3D
//! distances, so matches moving consistently form a clique of the graph
//! whose edges connect distance-preserving match pairs. An approximate
//! maximum clique is found greedily, then the motion is refined by
//! Levenberg-Marquardt on the reprojection error, matches above the error
//! cutoff are pruned, and a Tukey-weighted fit is run once more on the
//! survivors.
//!
//! The refined transform maps reference coordinates to current
//! coordinates; the published motion estimate is its inverse ("current to
//! reference"), which the controller composes into the pose.

use itertools::izip;
use nalgebra::Translation3;

use crate::core::camera::Intrinsics;
use crate::core::config::Config;
use crate::core::matcher::FeatureMatch;
use crate::math::optimizer::{self, Continue, State as _};
use crate::math::so3;
use crate::misc::type_aliases::{Float, Iso3, Mat6, Point2, Point3, Vec3, Vec6};

/// Iteration cap of one Levenberg-Marquardt fit.
const MAX_LM_ITERATIONS: usize = 10;

/// Estimates the rigid motion between two frames from feature matches.
pub struct MotionEstimator {
    inlier_max_reprojection_error: Float,
    clique_inlier_threshold: Float,
    min_features_for_estimate: usize,
    max_mean_reprojection_error: Float,
    // Results of the last estimation.
    motion: Iso3,
    covariance: Mat6,
    valid: bool,
    num_matches: usize,
    num_inliers: usize,
    mean_reprojection_error: Float,
}

impl MotionEstimator {
    /// Create an estimator from the engine configuration.
    pub fn new(config: &Config) -> Self {
        MotionEstimator {
            inlier_max_reprojection_error: config.inlier_max_reprojection_error,
            clique_inlier_threshold: config.clique_inlier_threshold,
            min_features_for_estimate: config.min_features_for_estimate,
            max_mean_reprojection_error: config.max_mean_reprojection_error,
            motion: Iso3::identity(),
            covariance: Mat6::identity(),
            valid: false,
            num_matches: 0,
            num_inliers: 0,
            mean_reprojection_error: Float::INFINITY,
        }
    }

    /// Is the last motion estimate valid?
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Last motion estimate, mapping current-frame coordinates into
    /// reference-frame coordinates.
    pub fn motion(&self) -> Iso3 {
        self.motion
    }

    /// 6x6 covariance of the last motion estimate
    /// (translation block first, rotation block last).
    pub fn covariance(&self) -> Mat6 {
        self.covariance
    }

    /// Number of matches handed to the last estimation.
    pub fn num_matches(&self) -> usize {
        self.num_matches
    }

    /// Number of inliers of the last estimation.
    pub fn num_inliers(&self) -> usize {
        self.num_inliers
    }

    /// Mean reprojection error over the inliers, in pixels.
    pub fn mean_reprojection_error(&self) -> Float {
        self.mean_reprojection_error
    }

    /// Estimate the motion explaining the given matches.
    ///
    /// `initial_ref_to_cur` seeds the refinement with the inverse of the
    /// controller's initial motion estimate. Match inlier flags and
    /// reprojection errors are updated in place.
    pub fn estimate(
        &mut self,
        matches: &mut [FeatureMatch],
        intrinsics: &Intrinsics,
        initial_ref_to_cur: &Iso3,
    ) {
        self.valid = false;
        self.num_matches = matches.len();
        self.num_inliers = 0;
        self.mean_reprojection_error = Float::INFINITY;
        self.motion = Iso3::identity();
        self.covariance = Mat6::identity();
        for m in matches.iter_mut() {
            m.inlier = false;
            m.reprojection_error = Float::INFINITY;
        }
        if matches.len() < self.min_features_for_estimate {
            return;
        }

        // Stage 1: approximate maximum clique of mutually consistent matches.
        let clique = max_consistency_clique(matches, self.clique_inlier_threshold);
        if clique.len() < self.min_features_for_estimate {
            return;
        }

        // Stage 2: least-squares refinement on the clique.
        let points: Vec<Point3> = clique.iter().map(|&i| matches[i].ref_xyz).collect();
        let targets: Vec<Point2> = clique
            .iter()
            .map(|&i| {
                let uv = matches[i].refined_base_uv;
                Point2::new(uv.x, uv.y)
            })
            .collect();
        let obs = ReprojectionObs {
            intrinsics,
            points: &points,
            targets: &targets,
            tukey_cutoff: None,
        };
        let ref_to_cur = match LMOptimizerState::iterative_solve(&obs, *initial_ref_to_cur) {
            Ok((state, _)) => state.eval_data.model,
            Err(err) => {
                log::debug!("motion refinement failed: {}", err);
                return;
            }
        };

        // Prune matches above the reprojection error cutoff and re-fit once
        // with the Tukey weights of the cutoff.
        let cutoff = self.inlier_max_reprojection_error;
        let survivors: Vec<usize> = clique
            .iter()
            .copied()
            .filter(|&i| {
                reprojection_error(&ref_to_cur, intrinsics, &matches[i].ref_xyz, &matches[i].refined_base_uv)
                    .map_or(false, |err| err <= cutoff)
            })
            .collect();
        if survivors.len() < self.min_features_for_estimate {
            return;
        }
        let points: Vec<Point3> = survivors.iter().map(|&i| matches[i].ref_xyz).collect();
        let targets: Vec<Point2> = survivors
            .iter()
            .map(|&i| matches[i].refined_base_uv)
            .collect();
        let obs = ReprojectionObs {
            intrinsics,
            points: &points,
            targets: &targets,
            tukey_cutoff: Some(cutoff),
        };
        let final_state = match LMOptimizerState::iterative_solve(&obs, ref_to_cur) {
            Ok((state, _)) => state,
            Err(err) => {
                log::debug!("robust motion re-fit failed: {}", err);
                return;
            }
        };
        let ref_to_cur = final_state.eval_data.model;

        // Final inlier flags, errors and statistics.
        let mut error_sum = 0.0;
        let mut num_inliers = 0;
        let clique_set: std::collections::HashSet<usize> = clique.iter().copied().collect();
        for (i, m) in matches.iter_mut().enumerate() {
            match reprojection_error(&ref_to_cur, intrinsics, &m.ref_xyz, &m.refined_base_uv) {
                Some(err) => m.reprojection_error = err,
                None => m.reprojection_error = Float::INFINITY,
            }
            m.inlier = clique_set.contains(&i) && m.reprojection_error <= cutoff;
            if m.inlier {
                error_sum += m.reprojection_error;
                num_inliers += 1;
            }
        }
        if num_inliers < self.min_features_for_estimate {
            return;
        }
        let mean_error = error_sum / num_inliers as Float;

        // Covariance of the solution: (J^T W J)^-1 scaled by the residual
        // variance of the weighted fit.
        let dof = 2 * num_inliers as i64 - 6;
        if dof <= 0 {
            return;
        }
        let sigma_2 = final_state.eval_data.weighted_sse / dof as Float;
        let covariance = match final_state.eval_data.hessian.try_inverse() {
            Some(inv) => inv * sigma_2,
            None => return,
        };
        if !covariance.iter().all(|x| x.is_finite()) {
            return;
        }

        self.motion = ref_to_cur.inverse();
        self.covariance = covariance;
        self.num_inliers = num_inliers;
        self.mean_reprojection_error = mean_error;
        self.valid = mean_error <= self.max_mean_reprojection_error;
    }
}

// Clique selection ############################################################

/// Greedy approximate maximum clique of the match compatibility graph.
///
/// Two matches are compatible when the distance between their reference 3D
/// points equals the distance between their current 3D points, within the
/// threshold. Starting from all matches as candidates, the candidate with
/// the highest degree restricted to the remaining candidate set is picked
/// (ties by lowest index), the candidate set is intersected with its
/// neighbors, and the selection repeats until no candidate is left.
fn max_consistency_clique(matches: &[FeatureMatch], threshold: Float) -> Vec<usize> {
    let n = matches.len();
    if n == 0 {
        return Vec::new();
    }
    let words = (n + 63) / 64;
    let mut adjacency = vec![0u64; n * words];
    for i in 0..n {
        for j in i + 1..n {
            let ref_dist = (matches[i].ref_xyz - matches[j].ref_xyz).norm();
            let cur_dist = (matches[i].cur_xyz - matches[j].cur_xyz).norm();
            if (ref_dist - cur_dist).abs() < threshold {
                adjacency[i * words + j / 64] |= 1 << (j % 64);
                adjacency[j * words + i / 64] |= 1 << (i % 64);
            }
        }
    }

    let mut candidates = vec![u64::MAX; words];
    if n % 64 != 0 {
        candidates[words - 1] = (1u64 << (n % 64)) - 1;
    }
    let mut clique = Vec::new();
    loop {
        // Degree of each remaining candidate, counted within the
        // candidate set only.
        let mut best: Option<(usize, u32)> = None;
        for v in 0..n {
            if candidates[v / 64] & (1 << (v % 64)) == 0 {
                continue;
            }
            let row = &adjacency[v * words..(v + 1) * words];
            let degree: u32 = candidates
                .iter()
                .zip(row.iter())
                .map(|(&c, &r)| (c & r).count_ones())
                .sum();
            if best.map_or(true, |(_, best_degree)| degree > best_degree) {
                best = Some((v, degree));
            }
        }
        let v = match best {
            Some((v, _)) => v,
            None => break,
        };
        clique.push(v);
        // Matches have no self edge, so intersecting with the neighbors of
        // `v` also removes `v` from the candidates.
        let row = &adjacency[v * words..(v + 1) * words];
        for (c, &r) in candidates.iter_mut().zip(row.iter()) {
            *c &= r;
        }
    }
    clique.sort_unstable();
    clique
}

// Levenberg-Marquardt reprojection refinement #################################

/// Observations of one motion refinement.
struct ReprojectionObs<'a> {
    intrinsics: &'a Intrinsics,
    points: &'a [Point3],
    targets: &'a [Point2],
    /// Tukey biweight cutoff in pixels; `None` runs an unweighted fit.
    tukey_cutoff: Option<Float>,
}

/// Data resulting of a successful model evaluation.
struct EvalData {
    hessian: Mat6,
    gradient: Vec6,
    energy: Float,
    weighted_sse: Float,
    model: Iso3,
}

/// Either evaluated data or the energy of a rejected (worse) model.
type EvalState = Result<EvalData, Float>;

/// State of the Levenberg-Marquardt reprojection optimizer.
struct LMOptimizerState {
    lm_coef: Float,
    eval_data: EvalData,
}

impl LMOptimizerState {
    /// Evaluate the model: energy, normal equations and weighted residuals.
    fn compute_eval_data(obs: &ReprojectionObs, model: Iso3) -> EvalData {
        let mut hessian = Mat6::zeros();
        let mut gradient = Vec6::zeros();
        let mut energy_sum = 0.0;
        let mut weighted_sse = 0.0;
        let mut count = 0usize;
        let fx = obs.intrinsics.fx;
        let fy = obs.intrinsics.fy;
        for (point, target) in izip!(obs.points, obs.targets) {
            let q = model * point;
            if q.z <= 0.0 {
                continue;
            }
            let z_inv = 1.0 / q.z;
            let u = fx * q.x * z_inv + obs.intrinsics.cx;
            let v = fy * q.y * z_inv + obs.intrinsics.cy;
            let ru = u - target.x;
            let rv = v - target.y;
            let err_2 = ru * ru + rv * rv;
            let (weight, rho) = match obs.tukey_cutoff {
                None => (1.0, err_2),
                Some(c) => tukey(err_2.sqrt(), c),
            };
            energy_sum += rho;
            weighted_sse += weight * err_2;
            count += 1;
            if weight == 0.0 {
                continue;
            }

            // Jacobian of the pixel residual with respect to the motion
            // update (dt, dw) applied as q' = q + dt + dw x q.
            let ju_q = Vec3::new(fx * z_inv, 0.0, -fx * q.x * z_inv * z_inv);
            let jv_q = Vec3::new(0.0, fy * z_inv, -fy * q.y * z_inv * z_inv);
            let q_vec = q.coords;
            let ju = jacobian_row(ju_q, q_vec);
            let jv = jacobian_row(jv_q, q_vec);
            hessian += weight * (ju * ju.transpose() + jv * jv.transpose());
            gradient += weight * (ju * ru + jv * rv);
        }
        let energy = if count == 0 {
            Float::INFINITY
        } else {
            energy_sum / count as Float
        };
        EvalData {
            hessian,
            gradient,
            energy,
            weighted_sse,
            model,
        }
    }
}

/// Row of the reprojection Jacobian: pixel derivative `j_q` with respect
/// to the rotated point, chained with `dq/d(dt, dw) = [I | -hat(q)]`.
fn jacobian_row(j_q: Vec3, q: Vec3) -> Vec6 {
    // j_q^T * (-hat(q)) = q x j_q
    let rot = q.cross(&j_q);
    Vec6::new(j_q.x, j_q.y, j_q.z, rot.x, rot.y, rot.z)
}

/// Tukey biweight: `(weight, rho)` of a residual of norm `r`.
fn tukey(r: Float, c: Float) -> (Float, Float) {
    if r < c {
        let ratio = 1.0 - (r / c) * (r / c);
        ((ratio * ratio), c * c / 6.0 * (1.0 - ratio * ratio * ratio))
    } else {
        (0.0, c * c / 6.0)
    }
}

/// Reprojection error in pixels, `None` for points behind the camera.
fn reprojection_error(
    ref_to_cur: &Iso3,
    intrinsics: &Intrinsics,
    ref_xyz: &Point3,
    target: &Point2,
) -> Option<Float> {
    let q = ref_to_cur * ref_xyz;
    let uv = intrinsics.project_pixel(q)?;
    Some(((uv.x - target.x).powi(2) + (uv.y - target.y).powi(2)).sqrt())
}

impl<'a> optimizer::State<ReprojectionObs<'a>, EvalState, Iso3, String> for LMOptimizerState {
    /// Initialize the optimizer state.
    fn init(obs: &ReprojectionObs, model: Iso3) -> Self {
        Self {
            lm_coef: 0.1,
            eval_data: Self::compute_eval_data(obs, model),
        }
    }

    /// Compute the step using Levenberg-Marquardt.
    /// May return an error at the Cholesky decomposition of the hessian.
    fn step(&self) -> Result<Iso3, String> {
        let mut hessian = self.eval_data.hessian;
        for i in 0..6 {
            hessian[(i, i)] *= 1.0 + self.lm_coef;
        }
        let cholesky = hessian
            .cholesky()
            .ok_or("Error at Cholesky decomposition of hessian")?;
        let delta = cholesky.solve(&self.eval_data.gradient);
        let dt = Vec3::new(delta[0], delta[1], delta[2]);
        let dw = Vec3::new(delta[3], delta[4], delta[5]);
        let update = Iso3::from_parts(Translation3::from(-dt), so3::exp(-dw));
        Ok(update * self.eval_data.model)
    }

    /// Evaluate the new model, erring with its energy when it got worse.
    fn eval(&self, obs: &ReprojectionObs, model: Iso3) -> EvalState {
        let eval_data = Self::compute_eval_data(obs, model);
        if eval_data.energy > self.eval_data.energy {
            Err(eval_data.energy)
        } else {
            Ok(eval_data)
        }
    }

    /// Stop after enough iterations or a negligible energy improvement.
    /// Raise the Levenberg-Marquardt coefficient on rejected steps.
    fn stop_criterion(self, nb_iter: usize, eval_state: EvalState) -> (Self, Continue) {
        let too_many_iterations = nb_iter >= MAX_LM_ITERATIONS;
        match (eval_state, too_many_iterations) {
            (Err(_), true) => (self, Continue::Stop),
            (Ok(eval_data), true) => {
                let kept_state = Self {
                    lm_coef: self.lm_coef,
                    eval_data,
                };
                (kept_state, Continue::Stop)
            }
            (Err(_energy), false) => {
                let mut kept_state = self;
                kept_state.lm_coef *= 10.0;
                (kept_state, Continue::Forward)
            }
            (Ok(eval_data), false) => {
                let d_energy = self.eval_data.energy - eval_data.energy;
                let continuation = if d_energy > 1e-4 * self.eval_data.energy.max(1e-6) {
                    Continue::Forward
                } else {
                    Continue::Stop
                };
                let kept_state = Self {
                    lm_coef: 0.1 * self.lm_coef,
                    eval_data,
                };
                (kept_state, continuation)
            }
        }
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;
    use crate::misc::type_aliases::Point2;

    fn intrinsics() -> Intrinsics {
        Intrinsics {
            width: 640,
            height: 480,
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        }
    }

    /// Deterministic pseudo-random scatter of 3D points in front of the camera.
    fn scatter(n: usize) -> Vec<Point3> {
        let mut state = 0x2545_f491u64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 40) as Float / (1u64 << 24) as Float
        };
        (0..n)
            .map(|_| {
                Point3::new(
                    2.0 * next() - 1.0,
                    1.5 * next() - 0.75,
                    1.5 + 2.0 * next(),
                )
            })
            .collect()
    }

    fn make_matches(points: &[Point3], ref_to_cur: &Iso3, cam: &Intrinsics) -> Vec<FeatureMatch> {
        points
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let q = ref_to_cur * p;
                let uv = cam.project_pixel(q)?;
                Some(FeatureMatch {
                    level: 0,
                    ref_keypoint_index: i,
                    cur_keypoint_index: i,
                    ref_xyz: *p,
                    cur_xyz: q,
                    refined_base_uv: Point2::new(uv.x, uv.y),
                    reprojection_error: Float::INFINITY,
                    inlier: false,
                    id: i,
                })
            })
            .collect()
    }

    #[test]
    fn known_motion_is_recovered() {
        let cam = intrinsics();
        let points = scatter(80);
        let truth_cur_from_ref =
            Iso3::from_parts(Translation3::new(-0.1, 0.02, 0.03), so3::exp(Vec3::new(0.01, -0.03, 0.005)));
        let mut matches = make_matches(&points, &truth_cur_from_ref, &cam);
        let mut estimator = MotionEstimator::new(&Config::default());
        estimator.estimate(&mut matches, &cam, &Iso3::identity());
        assert!(estimator.is_valid());
        // The published motion maps current coordinates to reference ones.
        let motion = estimator.motion();
        let expected = truth_cur_from_ref.inverse();
        assert!((motion.translation.vector - expected.translation.vector).norm() < 1e-3);
        assert!(so3::angle(motion.rotation.rotation_to(&expected.rotation)) < 1e-3);
        assert!(estimator.num_inliers() >= 70);
        assert!(estimator.mean_reprojection_error() < 0.5);
    }

    #[test]
    fn outliers_are_rejected_by_the_clique() {
        let cam = intrinsics();
        let points = scatter(60);
        let truth = Iso3::from_parts(Translation3::new(0.05, 0.0, 0.0), so3::exp(Vec3::zeros()));
        let mut matches = make_matches(&points, &truth, &cam);
        // Corrupt a third of the matches with inconsistent 3D positions.
        for m in matches.iter_mut().take(20) {
            m.cur_xyz.x += 1.0 + 0.05 * m.id as Float;
            m.refined_base_uv.x += 40.0;
        }
        let mut estimator = MotionEstimator::new(&Config::default());
        estimator.estimate(&mut matches, &cam, &Iso3::identity());
        assert!(estimator.is_valid());
        for m in matches.iter().take(20) {
            assert!(!m.inlier);
        }
        // Rigid-distance preservation holds over the inlier set.
        let inliers: Vec<&FeatureMatch> = matches.iter().filter(|m| m.inlier).collect();
        assert!(inliers.len() >= 30);
        for (a_idx, a) in inliers.iter().enumerate() {
            for b in inliers.iter().skip(a_idx + 1) {
                let ref_dist = (a.ref_xyz - b.ref_xyz).norm();
                let cur_dist = (a.cur_xyz - b.cur_xyz).norm();
                assert!((ref_dist - cur_dist).abs() < 0.1);
            }
        }
    }

    #[test]
    fn too_few_matches_is_invalid() {
        let cam = intrinsics();
        let points = scatter(5);
        let mut matches = make_matches(&points, &Iso3::identity(), &cam);
        let mut estimator = MotionEstimator::new(&Config::default());
        estimator.estimate(&mut matches, &cam, &Iso3::identity());
        assert!(!estimator.is_valid());
        assert_eq!(estimator.num_inliers(), 0);
    }

    #[test]
    fn identity_motion_on_identical_points() {
        let cam = intrinsics();
        let points = scatter(50);
        let mut matches = make_matches(&points, &Iso3::identity(), &cam);
        let mut estimator = MotionEstimator::new(&Config::default());
        estimator.estimate(&mut matches, &cam, &Iso3::identity());
        assert!(estimator.is_valid());
        let motion = estimator.motion();
        assert!(motion.translation.vector.norm() < 1e-5);
        assert!(so3::angle(motion.rotation) < 1e-5);
        assert!(estimator.covariance().iter().all(|x| x.is_finite()));
    }
}
