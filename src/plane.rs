// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Dominant plane estimation for tabletop scenes.
//!
//! 1. **Sample** — RANSAC draws three distinct points per iteration and builds
//!    the plane through them. Collinear samples are skipped.
//!
//! 2. **Score** — Every point within `distance_threshold` of the candidate is
//!    an inlier. The candidate with the most inliers wins; ties keep the
//!    earlier candidate.
//!
//! 3. **Refine** — The winner is refit by least squares: the normal is the
//!    eigenvector of the smallest eigenvalue of the inlier covariance. Inliers
//!    are then re-selected against the refined plane.
//!
//! The random source is an explicit argument so seeded generators reproduce
//! the same fit. The returned normal always has a non-negative `c` (ties on
//! `c == 0` fall through to `b`, then `a`), whichever sample won, so the sign
//! of the coefficients does not depend on the generator.

use crate::{
    buffer::PointBuffer,
    config::{ClassificationOffsets, PlaneFitParams},
};
use rand::Rng;
use tracing::{debug, instrument};

/// Minimum squared cross-product norm for a non-degenerate sample.
const MIN_SAMPLE_AREA_SQ: f32 = 1e-12;

/// Plane `a·x + b·y + c·z + d = 0` with a unit normal `(a, b, c)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneModel {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
}

impl PlaneModel {
    /// Build a plane from a normal and offset, normalizing the normal.
    /// Returns `None` for a zero normal.
    pub fn from_normal(normal: [f32; 3], d: f32) -> Option<Self> {
        let norm = (normal[0] * normal[0] + normal[1] * normal[1] + normal[2] * normal[2]).sqrt();
        if !(norm > 0.0) || !norm.is_finite() {
            return None;
        }
        let inv = 1.0 / norm;
        Some(Self {
            a: normal[0] * inv,
            b: normal[1] * inv,
            c: normal[2] * inv,
            d: d * inv,
        })
    }

    /// Plane through three points, `None` if they are collinear.
    pub fn from_points(p0: [f32; 3], p1: [f32; 3], p2: [f32; 3]) -> Option<Self> {
        let u = [p1[0] - p0[0], p1[1] - p0[1], p1[2] - p0[2]];
        let v = [p2[0] - p0[0], p2[1] - p0[1], p2[2] - p0[2]];
        let n = [
            u[1] * v[2] - u[2] * v[1],
            u[2] * v[0] - u[0] * v[2],
            u[0] * v[1] - u[1] * v[0],
        ];
        if n[0] * n[0] + n[1] * n[1] + n[2] * n[2] < MIN_SAMPLE_AREA_SQ {
            return None;
        }
        let d = -(n[0] * p0[0] + n[1] * p0[1] + n[2] * p0[2]);
        Self::from_normal(n, d)
    }

    /// The same plane with its normal flipped, when needed, so that the first
    /// non-zero of `c`, `b`, `a` is positive.
    pub fn oriented(self) -> Self {
        let key = if self.c != 0.0 {
            self.c
        } else if self.b != 0.0 {
            self.b
        } else {
            self.a
        };
        if key < 0.0 {
            Self {
                a: -self.a,
                b: -self.b,
                c: -self.c,
                d: -self.d,
            }
        } else {
            self
        }
    }

    #[inline]
    pub fn normal(&self) -> [f32; 3] {
        [self.a, self.b, self.c]
    }

    #[inline]
    pub fn coefficients(&self) -> [f32; 4] {
        [self.a, self.b, self.c, self.d]
    }

    /// Signed distance; positive on the side the normal points to.
    #[inline]
    pub fn signed_distance(&self, x: f32, y: f32, z: f32) -> f32 {
        self.a * x + self.b * y + self.c * z + self.d
    }

    #[inline]
    pub fn distance(&self, x: f32, y: f32, z: f32) -> f32 {
        self.signed_distance(x, y, z).abs()
    }

    /// Derive the bounding plane used to classify clusters.
    pub fn classification_plane(&self, offsets: &ClassificationOffsets) -> ClassificationPlane {
        ClassificationPlane {
            coefficients: [
                self.a + offsets.x,
                self.b + offsets.y,
                self.c + offsets.z,
                self.d,
            ],
        }
    }

    /// Indices of points within `threshold` of the plane, in buffer order.
    pub fn select_within(&self, buffer: &PointBuffer, threshold: f32) -> Vec<usize> {
        let (x, y, z) = (buffer.x(), buffer.y(), buffer.z());
        (0..buffer.len())
            .filter(|&i| self.distance(x[i], y[i], z[i]) <= threshold)
            .collect()
    }

    fn count_within(&self, x: &[f32], y: &[f32], z: &[f32], threshold: f32) -> usize {
        x.iter()
            .zip(y)
            .zip(z)
            .filter(|((xi, yi), zi)| self.distance(**xi, **yi, **zi) <= threshold)
            .count()
    }
}

/// Fitted plane normal perturbed by fixed offsets.
///
/// Distinct from [`PlaneModel`]: the normal is not renormalized, so distances
/// against it are algebraic (`|a·x + b·y + c·z + d|`), and its first three
/// coefficients double as the upper corner of the plane crop box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationPlane {
    pub coefficients: [f32; 4],
}

impl ClassificationPlane {
    #[inline]
    pub fn distance(&self, x: f32, y: f32, z: f32) -> f32 {
        let [a, b, c, d] = self.coefficients;
        (a * x + b * y + c * z + d).abs()
    }

    /// Upper corner of the crop box built from this plane.
    #[inline]
    pub fn corner(&self) -> [f32; 3] {
        [
            self.coefficients[0],
            self.coefficients[1],
            self.coefficients[2],
        ]
    }
}

/// Winning plane and the indices of its inliers (ascending).
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneFit {
    pub model: PlaneModel,
    pub inliers: Vec<usize>,
}

/// Fit the dominant plane of `buffer` with RANSAC.
///
/// Returns `None` when the buffer has fewer than three points or every sample
/// was degenerate.
#[instrument(skip_all, fields(n_points = buffer.len()))]
pub fn fit_plane<R: Rng + ?Sized>(
    buffer: &PointBuffer,
    params: &PlaneFitParams,
    rng: &mut R,
) -> Option<PlaneFit> {
    let n = buffer.len();
    if n < 3 {
        return None;
    }
    let (x, y, z) = (buffer.x(), buffer.y(), buffer.z());
    let threshold = params.distance_threshold;

    let mut best: Option<(PlaneModel, usize)> = None;
    for _ in 0..params.max_iterations {
        let sample = rand::seq::index::sample(rng, n, 3);
        let (i0, i1, i2) = (sample.index(0), sample.index(1), sample.index(2));
        let Some(model) = PlaneModel::from_points(
            [x[i0], y[i0], z[i0]],
            [x[i1], y[i1], z[i1]],
            [x[i2], y[i2], z[i2]],
        ) else {
            continue;
        };

        let count = model.count_within(x, y, z, threshold);
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((model, count));
        }
    }

    let (mut model, count) = best?;
    debug!(inliers = count, "ransac winner {:?}", model.coefficients());

    if params.optimize_coefficients {
        let inliers = model.select_within(buffer, threshold);
        if let Some(refined) = refit(buffer, &inliers, &model) {
            model = refined;
        }
    }

    let model = model.oriented();
    let inliers = model.select_within(buffer, threshold);
    Some(PlaneFit { model, inliers })
}

/// Split `buffer` into the points at `inliers` and the remaining points, in a
/// single pass. Both outputs keep the input order and frame id.
pub fn partition(buffer: &PointBuffer, inliers: &[usize]) -> (PointBuffer, PointBuffer) {
    let mut is_inlier = vec![false; buffer.len()];
    for &i in inliers {
        if let Some(flag) = is_inlier.get_mut(i) {
            *flag = true;
        }
    }

    let n_in = is_inlier.iter().filter(|&&v| v).count();
    let mut plane = buffer.empty_like(n_in);
    let mut rest = buffer.empty_like(buffer.len() - n_in);
    for (p, inlier) in buffer.iter().zip(is_inlier) {
        if inlier {
            plane.push(p);
        } else {
            rest.push(p);
        }
    }
    (plane, rest)
}

/// Least-squares plane through `indices`, oriented like `reference`.
fn refit(buffer: &PointBuffer, indices: &[usize], reference: &PlaneModel) -> Option<PlaneModel> {
    if indices.len() < 3 {
        return None;
    }
    let (x, y, z) = (buffer.x(), buffer.y(), buffer.z());
    let inv_k = 1.0 / indices.len() as f64;

    let mut c = [0.0f64; 3];
    for &i in indices {
        c[0] += x[i] as f64;
        c[1] += y[i] as f64;
        c[2] += z[i] as f64;
    }
    for v in c.iter_mut() {
        *v *= inv_k;
    }

    let mut cov = [0.0f64; 6];
    for &i in indices {
        let dx = x[i] as f64 - c[0];
        let dy = y[i] as f64 - c[1];
        let dz = z[i] as f64 - c[2];
        cov[0] += dx * dx;
        cov[1] += dx * dy;
        cov[2] += dx * dz;
        cov[3] += dy * dy;
        cov[4] += dy * dz;
        cov[5] += dz * dz;
    }
    for v in cov.iter_mut() {
        *v *= inv_k;
    }

    let (eigenvalues, eigenvectors) = sym3x3_eigen(cov);
    let mut normal = eigenvectors[smallest_eigenvalue_index(eigenvalues)];

    let r = reference.normal();
    if normal[0] * r[0] + normal[1] * r[1] + normal[2] * r[2] < 0.0 {
        normal = normal.map(|v| -v);
    }
    let d = -(normal[0] as f64 * c[0] + normal[1] as f64 * c[1] + normal[2] as f64 * c[2]);
    PlaneModel::from_normal(normal, d as f32)
}

fn smallest_eigenvalue_index(eigenvalues: [f64; 3]) -> usize {
    if eigenvalues[0] <= eigenvalues[1] && eigenvalues[0] <= eigenvalues[2] {
        0
    } else if eigenvalues[1] <= eigenvalues[2] {
        1
    } else {
        2
    }
}

/// Eigendecomposition of a 3×3 symmetric matrix given as its upper triangle
/// `[a11, a12, a13, a22, a23, a33]`.
///
/// Uses the analytical method described by Smith (1961) / Kopp (2008).
fn sym3x3_eigen(cov: [f64; 6]) -> ([f64; 3], [[f32; 3]; 3]) {
    let [a11, a12, a13, a22, a23, a33] = cov;

    let q = (a11 + a22 + a33) / 3.0;
    let p1 = a12 * a12 + a13 * a13 + a23 * a23;

    let eigenvalues = if p1 < 1e-30 {
        [a11, a22, a33]
    } else {
        let p2 = (a11 - q) * (a11 - q) + (a22 - q) * (a22 - q) + (a33 - q) * (a33 - q) + 2.0 * p1;
        let p = (p2 / 6.0).sqrt();
        let inv_p = 1.0 / p;

        let b11 = (a11 - q) * inv_p;
        let b12 = a12 * inv_p;
        let b13 = a13 * inv_p;
        let b22 = (a22 - q) * inv_p;
        let b23 = a23 * inv_p;
        let b33 = (a33 - q) * inv_p;

        let half_det = (b11 * b22 * b33 + 2.0 * b12 * b13 * b23
            - b11 * b23 * b23
            - b22 * b13 * b13
            - b33 * b12 * b12)
            / 2.0;

        let phi = half_det.clamp(-1.0, 1.0).acos() / 3.0;

        let e1 = q + 2.0 * p * phi.cos();
        let e3 = q + 2.0 * p * (phi + std::f64::consts::TAU / 3.0).cos();
        let e2 = 3.0 * q - e1 - e3;
        [e1, e2, e3]
    };

    let eigenvectors = if p1 < 1e-30 {
        // Already diagonal: the eigenvectors are the coordinate axes
        [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
    } else {
        eigenvalues.map(|lambda| eigenvector_for(cov, lambda))
    };

    (eigenvalues, eigenvectors)
}

/// Eigenvector of a 3×3 symmetric matrix for eigenvalue `lambda`, taken as
/// the largest cross product of two rows of `A - λI`.
fn eigenvector_for(mat: [f64; 6], lambda: f64) -> [f32; 3] {
    let m00 = mat[0] - lambda;
    let m01 = mat[1];
    let m02 = mat[2];
    let m11 = mat[3] - lambda;
    let m12 = mat[4];
    let m22 = mat[5] - lambda;

    let rows = [[m00, m01, m02], [m01, m11, m12], [m02, m12, m22]];
    let cross = |a: [f64; 3], b: [f64; 3]| {
        [
            a[1] * b[2] - a[2] * b[1],
            a[2] * b[0] - a[0] * b[2],
            a[0] * b[1] - a[1] * b[0],
        ]
    };
    let candidates = [
        cross(rows[0], rows[1]),
        cross(rows[0], rows[2]),
        cross(rows[1], rows[2]),
    ];

    let (v, mag) = candidates
        .iter()
        .map(|v| (*v, v[0] * v[0] + v[1] * v[1] + v[2] * v[2]))
        .fold(([0.0; 3], 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });

    if mag < 1e-30 {
        return [0.0, 0.0, 1.0];
    }

    let inv = 1.0 / mag.sqrt();
    [(v[0] * inv) as f32, (v[1] * inv) as f32, (v[2] * inv) as f32]
}
