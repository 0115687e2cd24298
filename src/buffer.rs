// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Colored point cloud buffer shared by every pipeline stage.
//!
//! Points are stored in a structure-of-arrays (SoA) layout so the geometric
//! stages (range filter, plane scoring, neighbor queries) walk contiguous
//! coordinate slices:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 PointBuffer                  │
//! │   x:   [f32]   y: [f32]   z: [f32]           │
//! │   rgb: [[u8; 3]]                             │
//! │   frame_id: String      dense: bool          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use edgefirst_tabletop::buffer::{Point, PointBuffer};
//!
//! let mut cloud = PointBuffer::with_capacity(2, "camera_color_optical_frame");
//! cloud.push(Point::new(0.1, 0.2, 0.5, [255, 0, 0]));
//! cloud.push(Point::new(0.1, 0.2, 0.6, [0, 255, 0]));
//!
//! assert_eq!(cloud.len(), 2);
//! assert_eq!(cloud.z(), &[0.5, 0.6]);
//! assert_eq!(cloud.point(1).rgb, [0, 255, 0]);
//! ```

use itertools::izip;

/// A single colored 3-D point (meters, 8-bit RGB).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rgb: [u8; 3],
}

impl Point {
    pub const fn new(x: f32, y: f32, z: f32, rgb: [u8; 3]) -> Self {
        Self { x, y, z, rgb }
    }

    /// True when all three coordinates are finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    #[inline]
    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Ordered, colored point cloud.
///
/// Order is insertion order. It carries no meaning beyond giving every point a
/// stable index for the stages that work on index sets (plane inliers,
/// clustering).
///
/// The `dense` flag is true when the buffer holds no non-finite points. It is
/// maintained by [`PointBuffer::push`], so a buffer built only from finite
/// points stays dense.
#[derive(Debug, Clone, PartialEq)]
pub struct PointBuffer {
    x: Vec<f32>,
    y: Vec<f32>,
    z: Vec<f32>,
    rgb: Vec<[u8; 3]>,
    frame_id: String,
    dense: bool,
}

impl PointBuffer {
    /// Create an empty buffer tagged with `frame_id`.
    pub fn new(frame_id: impl Into<String>) -> Self {
        Self::with_capacity(0, frame_id)
    }

    /// Create an empty buffer with room for `capacity` points.
    pub fn with_capacity(capacity: usize, frame_id: impl Into<String>) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
            rgb: Vec::with_capacity(capacity),
            frame_id: frame_id.into(),
            dense: true,
        }
    }

    /// Create an empty buffer sharing this buffer's frame id.
    pub fn empty_like(&self, capacity: usize) -> Self {
        Self::with_capacity(capacity, self.frame_id.clone())
    }

    /// Build a buffer from an iterator of points.
    pub fn from_points(frame_id: impl Into<String>, points: impl IntoIterator<Item = Point>) -> Self {
        let mut buf = Self::new(frame_id);
        buf.extend(points);
        buf
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Coordinate frame identifier, propagated unchanged through every stage.
    #[inline]
    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    pub fn set_frame_id(&mut self, frame_id: impl Into<String>) {
        self.frame_id = frame_id.into();
    }

    /// True when the buffer holds no NaN or infinite points.
    #[inline]
    pub fn is_dense(&self) -> bool {
        self.dense
    }

    /// Remove all points, keeping capacity and frame id.
    pub fn clear(&mut self) {
        self.x.clear();
        self.y.clear();
        self.z.clear();
        self.rgb.clear();
        self.dense = true;
    }

    #[inline]
    pub fn push(&mut self, point: Point) {
        self.dense &= point.is_finite();
        self.x.push(point.x);
        self.y.push(point.y);
        self.z.push(point.z);
        self.rgb.push(point.rgb);
    }

    /// Append every point of `other` (concatenation). The frame id of `self`
    /// is left untouched.
    pub fn append(&mut self, other: &PointBuffer) {
        self.x.extend_from_slice(&other.x);
        self.y.extend_from_slice(&other.y);
        self.z.extend_from_slice(&other.z);
        self.rgb.extend_from_slice(&other.rgb);
        self.dense &= other.dense;
    }

    /// Point at index `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.len()`.
    #[inline]
    pub fn point(&self, i: usize) -> Point {
        Point {
            x: self.x[i],
            y: self.y[i],
            z: self.z[i],
            rgb: self.rgb[i],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Point> + '_ {
        izip!(&self.x, &self.y, &self.z, &self.rgb).map(|(&x, &y, &z, &rgb)| Point { x, y, z, rgb })
    }

    #[inline]
    pub fn x(&self) -> &[f32] {
        &self.x
    }

    #[inline]
    pub fn y(&self) -> &[f32] {
        &self.y
    }

    #[inline]
    pub fn z(&self) -> &[f32] {
        &self.z
    }

    #[inline]
    pub fn rgb(&self) -> &[[u8; 3]] {
        &self.rgb
    }

    /// Copy the points at `indices`, in the order given, into a new buffer.
    pub fn select(&self, indices: &[usize]) -> PointBuffer {
        let mut out = self.empty_like(indices.len());
        for &i in indices {
            out.push(self.point(i));
        }
        out
    }

    /// Copy the points for which `keep` returns true, preserving order.
    pub fn filtered<F>(&self, mut keep: F) -> PointBuffer
    where
        F: FnMut(&Point) -> bool,
    {
        let mut out = self.empty_like(0);
        out.extend(self.iter().filter(|p| keep(p)));
        out
    }

    /// Axis-aligned bounds `(min, max)`, or `None` when empty.
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let mut iter = self.iter();
        let first = iter.next()?.position();
        Some(iter.fold((first, first), |(mut lo, mut hi), p| {
            for (axis, v) in p.position().into_iter().enumerate() {
                lo[axis] = lo[axis].min(v);
                hi[axis] = hi[axis].max(v);
            }
            (lo, hi)
        }))
    }
}

impl Default for PointBuffer {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl Extend<Point> for PointBuffer {
    fn extend<I: IntoIterator<Item = Point>>(&mut self, iter: I) {
        for p in iter {
            self.push(p);
        }
    }
}
