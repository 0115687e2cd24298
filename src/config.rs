// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Parameter types configuring the detection stages.
//!
//! Every field has a default tuned for a tabletop RGB-D camera looking at a
//! table from roughly half a meter away. Configurations deserialize from JSON
//! with missing fields falling back to those defaults.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Coordinate axis selector for the range filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    /// Depth axis of an optical camera frame.
    #[default]
    Z,
}

impl Axis {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Pass-through range filter along one axis (inclusive bounds, meters).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeFilter {
    pub axis: Axis,
    pub min: f32,
    pub max: f32,
}

impl Default for RangeFilter {
    fn default() -> Self {
        Self {
            axis: Axis::Z,
            min: 0.0,
            max: 1.0,
        }
    }
}

/// RANSAC plane fitting parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaneFitParams {
    /// Maximum point-to-plane distance for an inlier (meters).
    pub distance_threshold: f32,
    /// Number of minimal samples drawn.
    pub max_iterations: usize,
    /// Refit the winning model by least squares over its inliers.
    pub optimize_coefficients: bool,
}

impl Default for PlaneFitParams {
    fn default() -> Self {
        Self {
            distance_threshold: 0.02,
            max_iterations: 1000,
            optimize_coefficients: true,
        }
    }
}

/// Euclidean cluster extraction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    /// Two points closer than this are connected (meters).
    pub tolerance: f32,
    /// Smaller components are dropped as noise.
    pub min_cluster_size: usize,
    /// Larger components are dropped as under-segmented background.
    pub max_cluster_size: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            tolerance: 0.04,
            min_cluster_size: 50,
            max_cluster_size: 25_000,
        }
    }
}

/// Offsets added to the fitted plane normal to build the classification
/// plane. They encode the expected camera-to-table mounting geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationOffsets {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for ClassificationOffsets {
    fn default() -> Self {
        Self {
            x: 0.1,
            y: 0.5,
            z: 0.1,
        }
    }
}

impl ClassificationOffsets {
    /// Offsets that leave the fitted normal unchanged.
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
}

/// Detector-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Number of consecutive frames merged per detection.
    pub aggregate_frames: usize,
    pub range: RangeFilter,
    /// Voxel grid edge length (meters).
    pub leaf_size: f32,
    pub plane: PlaneFitParams,
    pub cluster: ClusterParams,
    /// A cluster is accepted when its closest point lies within this distance
    /// of the classification plane.
    pub accept_tolerance: f32,
    pub offsets: ClassificationOffsets,
    /// Seed for the plane fitting RNG. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            aggregate_frames: 15,
            range: RangeFilter::default(),
            leaf_size: 0.005,
            plane: PlaneFitParams::default(),
            cluster: ClusterParams::default(),
            accept_tolerance: 0.09,
            offsets: ClassificationOffsets::default(),
            seed: None,
        }
    }
}

impl DetectorConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let config: DetectorConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the stages cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.range.min <= self.range.max) {
            return Err(Error::Config(format!(
                "range filter bounds inverted: [{}, {}]",
                self.range.min, self.range.max
            )));
        }
        positive("leaf_size", self.leaf_size)?;
        positive("plane.distance_threshold", self.plane.distance_threshold)?;
        positive("cluster.tolerance", self.cluster.tolerance)?;
        if !(self.accept_tolerance >= 0.0) {
            return Err(Error::Config(format!(
                "accept_tolerance must be non-negative, got {}",
                self.accept_tolerance
            )));
        }
        if self.cluster.min_cluster_size > self.cluster.max_cluster_size {
            return Err(Error::Config(format!(
                "cluster size bounds inverted: [{}, {}]",
                self.cluster.min_cluster_size, self.cluster.max_cluster_size
            )));
        }
        let offsets = self.offsets;
        if ![offsets.x, offsets.y, offsets.z].iter().all(|v| v.is_finite()) {
            return Err(Error::Config("classification offsets must be finite".into()));
        }
        Ok(())
    }
}

fn positive(name: &str, value: f32) -> Result<(), Error> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must be positive, got {}", name, value)))
    }
}
