// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Spatial filters bounding the working set before plane fitting.
//!
//! - [`filter_range`] — pass-through filter along one axis
//! - [`downsample`] — voxel grid, one centroid per occupied voxel
//! - [`crop_box`] — axis-aligned box gate
//!
//! All filters drop non-finite points, so their outputs are always dense.

use crate::{
    buffer::{Point, PointBuffer},
    config::Axis,
};
use std::collections::HashMap;
use tracing::instrument;

/// Keep points whose coordinate along `axis` lies in `[min, max]`.
///
/// Point order is preserved and no point is created or modified.
#[instrument(skip_all, fields(n_in = buffer.len()))]
pub fn filter_range(buffer: &PointBuffer, axis: Axis, min: f32, max: f32) -> PointBuffer {
    let axis = axis.index();
    buffer.filtered(|p| p.is_finite() && (min..=max).contains(&p.position()[axis]))
}

/// Keep points inside the axis-aligned box `[min, max]` (inclusive).
pub fn crop_box(buffer: &PointBuffer, min: [f32; 3], max: [f32; 3]) -> PointBuffer {
    buffer.filtered(|p| {
        p.is_finite()
            && p
                .position()
                .iter()
                .zip(min.iter().zip(max.iter()))
                .all(|(v, (lo, hi))| (*lo..=*hi).contains(v))
    })
}

/// Running sums for one occupied voxel.
#[derive(Default)]
struct VoxelAccumulator {
    sum: [f64; 3],
    rgb: [u32; 3],
    count: u32,
}

impl VoxelAccumulator {
    fn add(&mut self, p: &Point) {
        self.sum[0] += p.x as f64;
        self.sum[1] += p.y as f64;
        self.sum[2] += p.z as f64;
        for (acc, c) in self.rgb.iter_mut().zip(p.rgb) {
            *acc += c as u32;
        }
        self.count += 1;
    }

    fn centroid(&self) -> Point {
        let n = self.count as f64;
        let half = self.count / 2;
        Point {
            x: (self.sum[0] / n) as f32,
            y: (self.sum[1] / n) as f32,
            z: (self.sum[2] / n) as f32,
            rgb: self.rgb.map(|c| ((c + half) / self.count) as u8),
        }
    }
}

/// Replace all points sharing a voxel of edge `leaf_size` with their centroid.
///
/// Colors are averaged with rounding. Voxels are emitted in the order they
/// were first occupied while scanning the input, which makes the output
/// deterministic for a given input buffer.
///
/// A non-positive `leaf_size` disables downsampling and returns the finite
/// points unchanged.
#[instrument(skip_all, fields(n_in = buffer.len(), leaf_size = leaf_size))]
pub fn downsample(buffer: &PointBuffer, leaf_size: f32) -> PointBuffer {
    if !(leaf_size > 0.0) {
        return buffer.filtered(Point::is_finite);
    }
    let inv_leaf = 1.0 / leaf_size;

    let mut slots: HashMap<(i64, i64, i64), usize> = HashMap::new();
    let mut voxels: Vec<VoxelAccumulator> = Vec::new();

    for p in buffer.iter().filter(Point::is_finite) {
        let key = (
            (p.x * inv_leaf).floor() as i64,
            (p.y * inv_leaf).floor() as i64,
            (p.z * inv_leaf).floor() as i64,
        );
        let slot = *slots.entry(key).or_insert_with(|| {
            voxels.push(VoxelAccumulator::default());
            voxels.len() - 1
        });
        voxels[slot].add(&p);
    }

    let mut out = buffer.empty_like(voxels.len());
    out.extend(voxels.iter().map(VoxelAccumulator::centroid));
    out
}
