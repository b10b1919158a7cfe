// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Grid bucketing of keypoints for spatially uniform subsampling.
//!
//! The image is divided into fixed-size cells and only the strongest
//! keypoints of each cell are retained, so a strongly textured region
//! cannot crowd out the rest of the image.

use std::cmp::Ordering;

use crate::core::keypoint::KeyPoint;

/// Spatially uniform keypoint filter.
#[derive(Debug, Clone)]
pub struct GridKeyPointFilter {
    bucket_width: usize,
    bucket_height: usize,
    max_keypoints_per_bucket: usize,
    grid_cols: usize,
    buckets: Vec<Vec<KeyPoint>>,
}

impl GridKeyPointFilter {
    /// Create a filter for images of the given size.
    pub fn new(
        img_width: usize,
        img_height: usize,
        bucket_width: usize,
        bucket_height: usize,
        max_keypoints_per_bucket: usize,
    ) -> Self {
        let grid_cols = (img_width + bucket_width - 1) / bucket_width;
        let grid_rows = (img_height + bucket_height - 1) / bucket_height;
        GridKeyPointFilter {
            bucket_width,
            bucket_height,
            max_keypoints_per_bucket,
            grid_cols,
            buckets: vec![Vec::new(); grid_cols * grid_rows.max(1)],
        }
    }

    /// Retain in each bucket the strongest keypoints, by descending score.
    /// Ties are broken by smaller row then smaller column, so the result is
    /// fully deterministic. Keypoints are written back bucket by bucket in
    /// row-major bucket order.
    pub fn filter(&mut self, keypoints: &mut Vec<KeyPoint>) {
        for bucket in self.buckets.iter_mut() {
            bucket.clear();
        }
        for kp in keypoints.drain(..) {
            let col = kp.u as usize / self.bucket_width;
            let row = kp.v as usize / self.bucket_height;
            let idx = row * self.grid_cols + col;
            if let Some(bucket) = self.buckets.get_mut(idx) {
                bucket.push(kp);
            }
        }
        for bucket in self.buckets.iter_mut() {
            bucket.sort_by(keypoint_ordering);
            bucket.truncate(self.max_keypoints_per_bucket);
            keypoints.extend_from_slice(bucket);
        }
    }
}

/// Descending score, ties by smaller v then smaller u.
fn keypoint_ordering(a: &KeyPoint, b: &KeyPoint) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.v.partial_cmp(&b.v).unwrap_or(Ordering::Equal))
        .then(a.u.partial_cmp(&b.u).unwrap_or(Ordering::Equal))
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    fn kp(u: f32, v: f32, score: f32) -> KeyPoint {
        KeyPoint { u, v, score }
    }

    #[test]
    fn buckets_are_capped() {
        let mut filter = GridKeyPointFilter::new(160, 160, 80, 80, 2);
        let mut kps = vec![
            kp(10.0, 10.0, 1.0),
            kp(20.0, 10.0, 5.0),
            kp(30.0, 10.0, 3.0),
            kp(120.0, 10.0, 2.0),
        ];
        filter.filter(&mut kps);
        // First bucket keeps its 2 best, second bucket keeps its only one.
        assert_eq!(kps.len(), 3);
        assert_eq!(kps[0].score, 5.0);
        assert_eq!(kps[1].score, 3.0);
        assert_eq!(kps[2].score, 2.0);
    }

    #[test]
    fn ties_are_broken_by_position() {
        let mut filter = GridKeyPointFilter::new(80, 80, 80, 80, 3);
        let mut kps = vec![
            kp(5.0, 9.0, 7.0),
            kp(9.0, 5.0, 7.0),
            kp(5.0, 5.0, 7.0),
            kp(1.0, 1.0, 0.5),
        ];
        filter.filter(&mut kps);
        assert_eq!(kps.len(), 3);
        assert_eq!((kps[0].u, kps[0].v), (5.0, 5.0));
        assert_eq!((kps[1].u, kps[1].v), (9.0, 5.0));
        assert_eq!((kps[2].u, kps[2].v), (5.0, 9.0));
    }

    #[test]
    fn filtering_is_idempotent() {
        let mut filter = GridKeyPointFilter::new(160, 80, 80, 80, 8);
        let mut kps: Vec<KeyPoint> = (0..20)
            .map(|i| kp((i * 7 % 160) as f32, (i * 3 % 80) as f32, i as f32))
            .collect();
        filter.filter(&mut kps);
        let first = kps.clone();
        filter.filter(&mut kps);
        assert_eq!(first, kps);
    }
}
