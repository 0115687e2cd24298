// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_tabletop::{
    config::{Axis, DetectorConfig},
    error::Error,
};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// PCD files replayed as the incoming frame stream, in a loop.
    #[arg(env, required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,

    /// Frame id attached to replayed frames
    #[arg(long, env, default_value = "camera_color_optical_frame")]
    pub frame_id: String,

    /// Replay rate in frames per second
    #[arg(long, env, default_value = "30")]
    pub rate: f64,

    /// Number of detection passes to run before exiting
    #[arg(long, env, default_value = "1")]
    pub detections: usize,

    /// Directory receiving the plane and cluster clouds of each detection
    #[arg(long, env)]
    pub output: Option<PathBuf>,

    /// Directory receiving the intermediate debug clouds
    #[arg(long, env)]
    pub debug_dir: Option<PathBuf>,

    /// JSON detector configuration; the options below override it
    #[arg(long, env)]
    pub config: Option<PathBuf>,

    /// Frames aggregated per detection
    #[arg(long, env)]
    pub aggregate_frames: Option<usize>,

    /// Axis of the range filter
    #[arg(long, env)]
    pub range_axis: Option<Axis>,

    /// Range filter bounds in meters
    #[arg(long, env, num_args = 2, value_names = ["MIN", "MAX"], value_delimiter = ' ')]
    pub range: Option<Vec<f32>>,

    /// Voxel grid leaf size in meters
    #[arg(long, env)]
    pub leaf_size: Option<f32>,

    /// Plane inlier distance threshold in meters
    #[arg(long, env)]
    pub plane_threshold: Option<f32>,

    /// RANSAC iterations
    #[arg(long, env)]
    pub plane_iterations: Option<usize>,

    /// Cluster tolerance in meters
    #[arg(long, env)]
    pub cluster_tolerance: Option<f32>,

    /// Minimum points per cluster
    #[arg(long, env)]
    pub min_cluster_size: Option<usize>,

    /// Maximum points per cluster
    #[arg(long, env)]
    pub max_cluster_size: Option<usize>,

    /// Maximum distance between a cluster and the table, in meters
    #[arg(long, env)]
    pub accept_tolerance: Option<f32>,

    /// Offsets added to the plane normal for the classification plane
    #[arg(long, env, num_args = 3, value_names = ["X", "Y", "Z"], value_delimiter = ' ')]
    pub offsets: Option<Vec<f32>>,

    /// Seed for plane fitting, random when unset
    #[arg(long, env)]
    pub seed: Option<u64>,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,
}

impl Args {
    /// Detector configuration: the `--config` file (or defaults) with every
    /// given option applied on top.
    pub fn detector_config(&self) -> Result<DetectorConfig, Error> {
        let mut config = match &self.config {
            Some(path) => DetectorConfig::from_json_file(path)?,
            None => DetectorConfig::default(),
        };

        if let Some(v) = self.aggregate_frames {
            config.aggregate_frames = v;
        }
        if let Some(v) = self.range_axis {
            config.range.axis = v;
        }
        if let Some([min, max]) = self.range.as_deref() {
            config.range.min = *min;
            config.range.max = *max;
        }
        if let Some(v) = self.leaf_size {
            config.leaf_size = v;
        }
        if let Some(v) = self.plane_threshold {
            config.plane.distance_threshold = v;
        }
        if let Some(v) = self.plane_iterations {
            config.plane.max_iterations = v;
        }
        if let Some(v) = self.cluster_tolerance {
            config.cluster.tolerance = v;
        }
        if let Some(v) = self.min_cluster_size {
            config.cluster.min_cluster_size = v;
        }
        if let Some(v) = self.max_cluster_size {
            config.cluster.max_cluster_size = v;
        }
        if let Some(v) = self.accept_tolerance {
            config.accept_tolerance = v;
        }
        if let Some([x, y, z]) = self.offsets.as_deref() {
            config.offsets.x = *x;
            config.offsets.y = *y;
            config.offsets.z = *z;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_detector_config() {
        let args = Args::parse_from(["edgefirst-tabletop", "scene.pcd"]);
        assert_eq!(args.detections, 1);
        assert_eq!(args.detector_config().unwrap(), DetectorConfig::default());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{ "leaf_size": 0.01, "aggregate_frames": 3 }"#).unwrap();

        let args = Args::parse_from([
            "edgefirst-tabletop",
            "--config",
            path.to_str().unwrap(),
            "--aggregate-frames",
            "5",
            "--range",
            "0.2",
            "1.5",
            "--offsets",
            "0",
            "0",
            "0",
            "--seed",
            "9",
            "a.pcd",
            "b.pcd",
        ]);
        let cfg = args.detector_config().unwrap();
        assert_eq!(args.inputs.len(), 2);
        assert_eq!(cfg.leaf_size, 0.01);
        assert_eq!(cfg.aggregate_frames, 5);
        assert_eq!((cfg.range.min, cfg.range.max), (0.2, 1.5));
        assert_eq!((cfg.offsets.x, cfg.offsets.y, cfg.offsets.z), (0.0, 0.0, 0.0));
        assert_eq!(cfg.seed, Some(9));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = Args::parse_from(["edgefirst-tabletop", "--leaf-size", "0", "a.pcd"]);
        assert!(args.detector_config().is_err());
    }
}
