// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Euclidean cluster extraction over a 3D spatial hash.
//!
//! Divides 3D space into voxels of size `tolerance`, hashes each point into
//! its voxel, and queries the 27 adjacent voxels (3×3×3) for neighbor
//! searches. Any two points within `tolerance` of each other are connected;
//! clusters are the connected components of that graph, found by flood fill
//! from the lowest unvisited index. This gives O(n) average performance for
//! uniform distributions.
//!
//! Components outside `[min_cluster_size, max_cluster_size]` are dropped.

use crate::{buffer::PointBuffer, config::ClusterParams};
use std::collections::HashMap;
use tracing::{debug, instrument};

// ── Section 1: SpatialHash ──────────────────────────────────────────────────

/// Cells kept across frames, relative to the point count, before the map is
/// dropped and rebuilt.
const MAX_CELLS_PER_POINT: usize = 4;
const MIN_RETAINED_CELLS: usize = 1024;

/// 3D spatial hash for O(1) average neighbor queries.
///
/// Points are binned into voxels of size `1/inv_cell_size`. Neighbor queries
/// check the 27 adjacent voxels (3×3×3) and filter by squared Euclidean
/// distance. Keys saturate at the `i64` range; the distance check keeps
/// queries exact even where far-off points share a saturated cell.
struct SpatialHash {
    cells: HashMap<(i64, i64, i64), Vec<usize>>,
    inv_cell_size: f32,
}

impl SpatialHash {
    fn new(cell_size: f32) -> Self {
        Self {
            cells: HashMap::new(),
            inv_cell_size: 1.0 / cell_size,
        }
    }

    /// Empty every cell for a frame of `n_points`. Cell allocations are kept
    /// unless the map has grown far beyond what the frame needs.
    fn clear(&mut self, n_points: usize) {
        if self.cells.len() > MAX_CELLS_PER_POINT * n_points.max(MIN_RETAINED_CELLS) {
            debug!(cells = self.cells.len(), "dropping stale spatial hash cells");
            self.cells.clear();
            return;
        }
        for v in self.cells.values_mut() {
            v.clear();
        }
    }

    fn voxel_key(&self, x: f32, y: f32, z: f32) -> (i64, i64, i64) {
        (
            (x * self.inv_cell_size).floor() as i64,
            (y * self.inv_cell_size).floor() as i64,
            (z * self.inv_cell_size).floor() as i64,
        )
    }

    fn build(&mut self, x: &[f32], y: &[f32], z: &[f32]) {
        self.clear(x.len());
        for i in 0..x.len() {
            let key = self.voxel_key(x[i], y[i], z[i]);
            self.cells.entry(key).or_default().push(i);
        }
    }

    /// Collect every point within `sqrt(radius_sq)` of `(qx, qy, qz)`,
    /// including the query point itself.
    #[allow(clippy::too_many_arguments)]
    fn query_neighbors(
        &self,
        qx: f32,
        qy: f32,
        qz: f32,
        x: &[f32],
        y: &[f32],
        z: &[f32],
        radius_sq: f32,
        neighbors: &mut Vec<usize>,
    ) {
        neighbors.clear();
        let (cx, cy, cz) = self.voxel_key(qx, qy, qz);

        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    // Neighbors past the end of the key range do not exist
                    let (Some(kx), Some(ky), Some(kz)) =
                        (cx.checked_add(dx), cy.checked_add(dy), cz.checked_add(dz))
                    else {
                        continue;
                    };
                    let Some(indices) = self.cells.get(&(kx, ky, kz)) else {
                        continue;
                    };
                    for &idx in indices {
                        let ddx = x[idx] - qx;
                        let ddy = y[idx] - qy;
                        let ddz = z[idx] - qz;
                        if ddx * ddx + ddy * ddy + ddz * ddz <= radius_sq {
                            neighbors.push(idx);
                        }
                    }
                }
            }
        }
    }
}

// ── Section 2: ClusterExtractor ─────────────────────────────────────────────

const UNVISITED: u32 = 0;

/// Reusable state for Euclidean cluster extraction.
///
/// All internal buffers are retained between calls to avoid allocation after
/// the first frame (warmup).
pub struct ClusterExtractor {
    params: ClusterParams,
    radius_sq: f32,
    spatial_hash: SpatialHash,
    labels: Vec<u32>,
    queue: Vec<usize>,
    neighbors: Vec<usize>,
}

impl ClusterExtractor {
    pub fn new(params: ClusterParams) -> Self {
        Self {
            params,
            radius_sq: params.tolerance * params.tolerance,
            spatial_hash: SpatialHash::new(params.tolerance),
            labels: Vec::new(),
            queue: Vec::new(),
            neighbors: Vec::new(),
        }
    }

    pub fn params(&self) -> &ClusterParams {
        &self.params
    }

    /// Label every point with its connected component.
    ///
    /// Returns a slice where each entry is the 1-based component ID of the
    /// corresponding point. IDs are assigned in discovery order: the component
    /// containing point 0 is 1, the next component seeded by the lowest
    /// unlabelled index is 2, and so on. No size filtering is applied here.
    pub fn label(&mut self, buffer: &PointBuffer) -> &[u32] {
        let (x, y, z) = (buffer.x(), buffer.y(), buffer.z());
        let n = buffer.len();

        self.labels.clear();
        self.labels.resize(n, UNVISITED);
        self.spatial_hash.build(x, y, z);

        let mut id: u32 = 0;
        for seed in 0..n {
            if self.labels[seed] != UNVISITED {
                continue;
            }
            id += 1;
            self.flood_fill(seed, id, x, y, z);
        }

        &self.labels
    }

    /// Breadth-first growth of component `id` from `seed`.
    fn flood_fill(&mut self, seed: usize, id: u32, x: &[f32], y: &[f32], z: &[f32]) {
        self.labels[seed] = id;
        self.queue.clear();
        self.queue.push(seed);

        // BFS using an index cursor to avoid borrow conflicts
        let mut qi = 0;
        while qi < self.queue.len() {
            let pt = self.queue[qi];
            qi += 1;

            self.spatial_hash.query_neighbors(
                x[pt],
                y[pt],
                z[pt],
                x,
                y,
                z,
                self.radius_sq,
                &mut self.neighbors,
            );

            for &ni in &self.neighbors {
                if self.labels[ni] == UNVISITED {
                    self.labels[ni] = id;
                    self.queue.push(ni);
                }
            }
        }
    }

    /// Extract the clusters of `buffer` whose size lies within the configured
    /// bounds, as independent buffers in discovery order.
    ///
    /// Points inside each cluster keep their input order.
    #[instrument(skip_all, fields(n_points = buffer.len()))]
    pub fn extract(&mut self, buffer: &PointBuffer) -> Vec<PointBuffer> {
        let ClusterParams {
            min_cluster_size,
            max_cluster_size,
            ..
        } = self.params;

        let labels = self.label(buffer);
        let n_components = labels.iter().copied().max().unwrap_or(0) as usize;

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); n_components];
        for (i, &label) in labels.iter().enumerate() {
            members[label as usize - 1].push(i);
        }

        let clusters: Vec<PointBuffer> = members
            .iter()
            .filter(|m| (min_cluster_size..=max_cluster_size).contains(&m.len()))
            .map(|m| buffer.select(m))
            .collect();

        debug!(
            components = n_components,
            kept = clusters.len(),
            "euclidean clustering"
        );
        clusters
    }
}

/// One-shot Euclidean cluster extraction.
///
/// Prefer holding a [`ClusterExtractor`] when clustering repeatedly.
pub fn extract_clusters(buffer: &PointBuffer, params: &ClusterParams) -> Vec<PointBuffer> {
    ClusterExtractor::new(*params).extract(buffer)
}

// ── Section 3: Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Point;

    /// `n³` lattice with spacing `step` whose min corner is `origin`.
    fn blob(origin: [f32; 3], n: usize, step: f32, rgb: [u8; 3]) -> Vec<Point> {
        let mut pts = Vec::with_capacity(n * n * n);
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    pts.push(Point::new(
                        origin[0] + i as f32 * step,
                        origin[1] + j as f32 * step,
                        origin[2] + k as f32 * step,
                        rgb,
                    ));
                }
            }
        }
        pts
    }

    fn params(tolerance: f32, min: usize, max: usize) -> ClusterParams {
        ClusterParams {
            tolerance,
            min_cluster_size: min,
            max_cluster_size: max,
        }
    }

    #[test]
    fn test_cluster_two_blobs() {
        // Blob A near the origin, blob B 1 m away, interleaved in the buffer
        let a = blob([0.0, 0.0, 0.5], 5, 0.01, [255, 0, 0]);
        let b = blob([1.0, 0.0, 0.5], 5, 0.01, [0, 0, 255]);
        let mut pts = Vec::new();
        for (pa, pb) in a.iter().zip(b.iter()) {
            pts.push(*pb);
            pts.push(*pa);
        }
        let cloud = PointBuffer::from_points("cam", pts);

        let clusters = extract_clusters(&cloud, &params(0.04, 50, 25_000));
        assert_eq!(clusters.len(), 2);

        // Discovery order: point 0 belongs to blob B
        assert_eq!(clusters[0].len(), 125);
        assert!(clusters[0].rgb().iter().all(|c| *c == [0, 0, 255]));
        assert_eq!(clusters[1].len(), 125);
        assert!(clusters[1].rgb().iter().all(|c| *c == [255, 0, 0]));

        for p in &b {
            assert!(clusters[0].iter().any(|q| q == *p));
        }
        assert_eq!(clusters[0].frame_id(), "cam");
    }

    #[test]
    fn test_cluster_size_bounds() {
        let mut pts = blob([0.0, 0.0, 0.0], 3, 0.01, [1; 3]); // 27 points
        pts.extend(blob([1.0, 0.0, 0.0], 4, 0.01, [2; 3])); // 64 points
        pts.extend(blob([2.0, 0.0, 0.0], 6, 0.01, [3; 3])); // 216 points
        let cloud = PointBuffer::from_points("cam", pts);

        let clusters = extract_clusters(&cloud, &params(0.02, 50, 100));
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 64);

        let clusters = extract_clusters(&cloud, &params(0.02, 27, 216));
        assert_eq!(clusters.len(), 3);
        for c in &clusters {
            assert!((27..=216).contains(&c.len()));
        }
    }

    #[test]
    fn test_cluster_chain_connects() {
        // A line of points 3 cm apart is one component at 4 cm tolerance,
        // and all singletons at 2 cm tolerance
        let cloud = PointBuffer::from_points(
            "cam",
            (0..60).map(|i| Point::new(i as f32 * 0.03, 0.0, 0.5, [0; 3])),
        );
        let clusters = extract_clusters(&cloud, &params(0.04, 50, 25_000));
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 60);

        let clusters = extract_clusters(&cloud, &params(0.02, 1, 25_000));
        assert_eq!(clusters.len(), 60);
    }

    #[test]
    fn test_cluster_tolerance_inclusive() {
        let cloud = PointBuffer::from_points(
            "cam",
            [Point::new(0.0, 0.0, 0.0, [0; 3]), Point::new(0.5, 0.0, 0.0, [0; 3])],
        );
        let mut extractor = ClusterExtractor::new(params(0.5, 1, 10));
        assert_eq!(extractor.label(&cloud), &[1, 1]);
    }

    #[test]
    fn test_cluster_negative_coordinates() {
        // Voxel keys must floor correctly across zero
        let cloud = PointBuffer::from_points(
            "cam",
            [
                Point::new(-0.01, -0.01, -0.01, [0; 3]),
                Point::new(0.01, 0.01, 0.01, [0; 3]),
            ],
        );
        let mut extractor = ClusterExtractor::new(params(0.04, 1, 10));
        assert_eq!(extractor.label(&cloud), &[1, 1]);
    }

    #[test]
    fn test_cluster_far_coordinates() {
        let mut pts = blob([0.0, 0.0, 0.5], 4, 0.01, [0; 3]);
        pts.push(Point::new(1e12, 0.0, 0.5, [1; 3]));
        pts.push(Point::new(-1e12, 0.0, 0.5, [2; 3]));
        pts.push(Point::new(f32::MAX, f32::MAX, f32::MAX, [3; 3]));
        pts.push(Point::new(f32::MIN, 0.0, f32::MIN, [4; 3]));
        let cloud = PointBuffer::from_points("cam", pts);

        let mut extractor = ClusterExtractor::new(params(0.04, 1, 25_000));
        let labels = extractor.label(&cloud).to_vec();
        assert!(labels[..64].iter().all(|&l| l == 1));
        assert_eq!(&labels[64..], &[2, 3, 4, 5]);

        let single = PointBuffer::from_points("cam", [Point::new(1e12, 0.0, 0.5, [0; 3])]);
        assert_eq!(extract_clusters(&single, &params(0.04, 1, 10)).len(), 1);
    }

    #[test]
    fn test_cluster_hash_does_not_grow_with_scene_extent() {
        // Small frames that move across the scene each time; every point
        // lands in a fresh cell
        let mut extractor = ClusterExtractor::new(params(0.04, 1, 25_000));
        for frame in 0..100 {
            let offset = frame as f32 * 100.0;
            let cloud = PointBuffer::from_points(
                "cam",
                (0..100).map(|i| Point::new(offset + i as f32 * 0.1, 0.0, 0.5, [0; 3])),
            );
            assert_eq!(extractor.extract(&cloud).len(), 100);
            assert!(
                extractor.spatial_hash.cells.len()
                    <= MAX_CELLS_PER_POINT * MIN_RETAINED_CELLS + cloud.len()
            );
        }
    }

    #[test]
    fn test_cluster_empty() {
        let clusters = extract_clusters(&PointBuffer::new("cam"), &ClusterParams::default());
        assert!(clusters.is_empty());
    }

    #[test]
    fn test_cluster_reuse_second_call() {
        let mut extractor = ClusterExtractor::new(params(0.04, 50, 25_000));

        let first = PointBuffer::from_points("cam", blob([0.0, 0.0, 0.5], 5, 0.01, [0; 3]));
        assert_eq!(extractor.extract(&first).len(), 1);

        let mut pts = blob([0.3, 0.3, 0.5], 4, 0.01, [0; 3]);
        pts.extend(blob([0.0, 0.0, 0.5], 4, 0.01, [0; 3]));
        let second = PointBuffer::from_points("cam", pts);
        let clusters = extractor.extract(&second);
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| c.len() == 64));
        assert!((clusters[0].x()[0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_cluster_matches_brute_force() {
        // Pseudo-random scatter; compare labels against an O(n²) reference
        let mut state = 12345u32;
        let mut next = || {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 8) as f32 / (1u32 << 24) as f32
        };
        let pts: Vec<Point> = (0..400)
            .map(|_| Point::new(next() * 0.5, next() * 0.5, next() * 0.5, [0; 3]))
            .collect();
        let cloud = PointBuffer::from_points("cam", pts);
        let tol = 0.04f32;

        let mut extractor = ClusterExtractor::new(params(tol, 1, 25_000));
        let labels = extractor.label(&cloud).to_vec();

        for i in 0..cloud.len() {
            for j in 0..cloud.len() {
                let (p, q) = (cloud.point(i), cloud.point(j));
                let d2 = (p.x - q.x).powi(2) + (p.y - q.y).powi(2) + (p.z - q.z).powi(2);
                if d2 <= tol * tol {
                    assert_eq!(labels[i], labels[j], "points {i} and {j} are neighbors");
                }
            }
        }
    }
}
