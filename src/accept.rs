// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! On-surface test for candidate clusters.
//!
//! A cluster is an object resting on the table when its closest point lies
//! within a tolerance of the classification plane. Only the minimum distance
//! is tested: a tall object touching the table is still accepted.

use crate::{buffer::PointBuffer, plane::ClassificationPlane};
use tracing::debug;

/// Smallest algebraic distance from any point of `cluster` to `plane`, or
/// `None` when the cluster is empty.
pub fn min_plane_distance(cluster: &PointBuffer, plane: &ClassificationPlane) -> Option<f32> {
    cluster
        .iter()
        .map(|p| plane.distance(p.x, p.y, p.z))
        .min_by(f32::total_cmp)
}

/// True when the closest point of `cluster` lies within `tolerance` of
/// `plane`. An empty cluster is never accepted.
pub fn accept(cluster: &PointBuffer, plane: &ClassificationPlane, tolerance: f32) -> bool {
    let Some(min) = min_plane_distance(cluster, plane) else {
        return false;
    };

    let accepted = min <= tolerance;
    debug!(
        n_points = cluster.len(),
        min_distance = min,
        accepted,
        "cluster plane distance"
    );
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Point;

    fn table() -> ClassificationPlane {
        // z = 0.5, unnormalized on purpose
        ClassificationPlane {
            coefficients: [0.0, 0.0, 2.0, -1.0],
        }
    }

    fn column(z_min: f32, z_max: f32, n: usize) -> PointBuffer {
        PointBuffer::from_points(
            "cam",
            (0..n).map(|i| {
                let t = i as f32 / (n - 1) as f32;
                Point::new(0.1, 0.1, z_min + t * (z_max - z_min), [0; 3])
            }),
        )
    }

    #[test]
    fn test_min_distance_algebraic() {
        let cluster = column(0.55, 0.7, 4);
        // |2 * 0.55 - 1| = 0.1
        let d = min_plane_distance(&cluster, &table()).unwrap();
        assert!((d - 0.1).abs() < 1e-5);
        assert!(min_plane_distance(&PointBuffer::new("cam"), &table()).is_none());
    }

    #[test]
    fn test_accept_touching_tall_object() {
        // Bottom sits on the plane, top far above it
        let cluster = column(0.5, 0.9, 20);
        assert!(accept(&cluster, &table(), 0.09));
    }

    #[test]
    fn test_reject_floating_object() {
        let cluster = column(0.6, 0.7, 20);
        assert!(!accept(&cluster, &table(), 0.09));
    }

    #[test]
    fn test_accept_single_point() {
        let cluster = column(0.52, 0.52, 2);
        assert!(accept(&cluster, &table(), 0.09));
    }

    #[test]
    fn test_accept_agrees_with_min_distance() {
        for (z_min, z_max) in [(0.5, 0.9), (0.55, 0.7), (0.3, 0.45), (0.61, 0.61)] {
            let cluster = column(z_min, z_max, 5);
            let min = min_plane_distance(&cluster, &table()).unwrap();
            for tol in [0.0, 0.05, 0.1, 0.2, 0.3] {
                assert_eq!(accept(&cluster, &table(), tol), min <= tol, "{z_min}..{z_max} @ {tol}");
            }
        }
    }

    #[test]
    fn test_accept_empty() {
        assert!(!accept(&PointBuffer::new("cam"), &table(), f32::MAX));
    }

    #[test]
    fn test_accept_monotone_in_tolerance() {
        let cluster = column(0.56, 0.8, 10);
        let tolerances = [0.0, 0.05, 0.1, 0.119, 0.12, 0.121, 0.5, 1.0];
        let mut seen_accept = false;
        for tol in tolerances {
            let accepted = accept(&cluster, &table(), tol);
            assert!(!(seen_accept && !accepted), "rejected at {tol} after accepting");
            seen_accept |= accepted;
        }
        assert!(seen_accept);
        assert!(!accept(&cluster, &table(), 0.1));
    }
}
