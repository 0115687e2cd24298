// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Detection orchestrator.
//!
//! One pass runs the stages strictly in sequence on the calling thread:
//!
//! ```text
//! Idle → Aggregating → Filtering → PlaneFitting ─┬─► NoPlane
//!                                                └─► Clustering → Accepting → Done
//! ```
//!
//! Stage failures never escape as errors: a missing plane is reported through
//! [`DetectionResult::is_plane_found`]. The only error a pass can return comes
//! from the frame source shutting down while the detector waits on it.

use crate::{
    accept::accept,
    buffer::PointBuffer,
    cluster::ClusterExtractor,
    config::DetectorConfig,
    error::Error,
    filter::{crop_box, downsample, filter_range},
    frame::{FrameSource, aggregate},
    plane::{fit_plane, partition},
    sink::{DebugCloud, DebugSink, NoopSink},
};
use rand::{SeedableRng, rngs::StdRng};
use serde::Serialize;
use tracing::{debug, info, info_span, instrument};

/// Stage the detector is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionState {
    Idle,
    Aggregating,
    Filtering,
    PlaneFitting,
    /// Terminal: no plane was found.
    NoPlane,
    Clustering,
    Accepting,
    /// Terminal: the result holds the plane and accepted clusters.
    Done,
}

/// Outcome of one detection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub is_plane_found: bool,
    /// Fitted plane `(a, b, c, d)`, zero when no plane was found.
    pub plane_coefficients: [f32; 4],
    /// Plane inliers cropped to the classification box.
    pub plane_cloud: PointBuffer,
    /// Accepted clusters in extraction order.
    pub clusters: Vec<PointBuffer>,
}

impl DetectionResult {
    /// Result for a pass that found no plane.
    pub fn not_found(frame_id: &str) -> Self {
        Self {
            is_plane_found: false,
            plane_coefficients: [0.0; 4],
            plane_cloud: PointBuffer::new(frame_id),
            clusters: Vec::new(),
        }
    }

    pub fn frame_id(&self) -> &str {
        self.plane_cloud.frame_id()
    }

    /// Compact description of the result, without point data.
    pub fn summary(&self) -> DetectionSummary {
        DetectionSummary {
            frame_id: self.frame_id().to_string(),
            is_plane_found: self.is_plane_found,
            plane_coefficients: self.plane_coefficients,
            plane_points: self.plane_cloud.len(),
            clusters: self
                .clusters
                .iter()
                .map(|c| {
                    let (min, max) = c.bounds().unwrap_or(([0.0; 3], [0.0; 3]));
                    ClusterSummary {
                        points: c.len(),
                        min,
                        max,
                    }
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub points: usize,
    pub min: [f32; 3],
    pub max: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionSummary {
    pub frame_id: String,
    pub is_plane_found: bool,
    pub plane_coefficients: [f32; 4],
    pub plane_points: usize,
    pub clusters: Vec<ClusterSummary>,
}

/// Tabletop object detector.
///
/// Owns its frame source, debug sink, random generator and clustering
/// scratch buffers; a detector serves one request at a time.
pub struct Detector<S: FrameSource, D: DebugSink = NoopSink> {
    config: DetectorConfig,
    source: S,
    sink: D,
    rng: StdRng,
    extractor: ClusterExtractor,
    state: DetectionState,
}

impl<S: FrameSource> Detector<S, NoopSink> {
    /// Build a detector without debug output.
    pub fn new(config: DetectorConfig, source: S) -> Result<Self, Error> {
        Self::with_sink(config, source, NoopSink)
    }
}

impl<S: FrameSource, D: DebugSink> Detector<S, D> {
    /// Build a detector publishing intermediate clouds to `sink`.
    ///
    /// Fails when `config` does not validate.
    pub fn with_sink(config: DetectorConfig, source: S, sink: D) -> Result<Self, Error> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            extractor: ClusterExtractor::new(config.cluster),
            config,
            source,
            sink,
            rng,
            state: DetectionState::Idle,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// State reached by the most recent pass.
    pub fn state(&self) -> DetectionState {
        self.state
    }

    fn enter(&mut self, state: DetectionState) {
        debug!(from = ?self.state, to = ?state, "detector state");
        self.state = state;
    }

    /// Aggregate the configured number of frames and run a detection pass.
    ///
    /// Blocks until enough frames arrived. Returns an error only when the
    /// frame source is cancelled or closed first.
    pub fn detect(&mut self) -> Result<DetectionResult, Error> {
        self.enter(DetectionState::Aggregating);
        let k = self.config.aggregate_frames;
        let cloud = match info_span!("aggregate").in_scope(|| aggregate(&self.source, k)) {
            Ok(cloud) => cloud,
            Err(e) => {
                self.enter(DetectionState::Idle);
                return Err(e);
            }
        };
        Ok(self.run(&cloud))
    }

    /// Run a detection pass on `cloud`, skipping aggregation.
    pub fn detect_cloud(&mut self, cloud: &PointBuffer) -> DetectionResult {
        self.enter(DetectionState::Idle);
        self.run(cloud)
    }

    #[instrument(skip_all, fields(n_points = cloud.len(), frame_id = cloud.frame_id()))]
    fn run(&mut self, cloud: &PointBuffer) -> DetectionResult {
        let config = self.config.clone();

        self.enter(DetectionState::Filtering);
        let filtered = info_span!("filtering").in_scope(|| {
            let range = config.range;
            let ranged = filter_range(cloud, range.axis, range.min, range.max);
            downsample(&ranged, config.leaf_size)
        });
        info!("After voxel grid filter: {} points", filtered.len());

        self.enter(DetectionState::PlaneFitting);
        let fit = info_span!("plane_fitting").in_scope(|| fit_plane(&filtered, &config.plane, &mut self.rng));
        let Some(fit) = fit else {
            info!("no plane found");
            self.enter(DetectionState::NoPlane);
            return DetectionResult::not_found(cloud.frame_id());
        };
        let (plane, blobs) = partition(&filtered, &fit.inliers);
        if plane.is_empty() {
            info!("no plane found");
            self.enter(DetectionState::NoPlane);
            return DetectionResult::not_found(cloud.frame_id());
        }
        self.sink.publish(DebugCloud::Blobs, &blobs);

        let classification = fit.model.classification_plane(&config.offsets);

        self.enter(DetectionState::Clustering);
        let candidates = info_span!("clustering").in_scope(|| self.extractor.extract(&blobs));
        info!("clusters found: {}", candidates.len());

        let plane_cloud = crop_box(&plane, [0.0; 3], classification.corner());

        self.enter(DetectionState::Accepting);
        let clusters: Vec<PointBuffer> = info_span!("accepting").in_scope(|| {
            candidates
                .into_iter()
                .filter(|c| accept(c, &classification, config.accept_tolerance))
                .collect()
        });
        info!("clusters on plane: {}", clusters.len());

        let mut merged = blobs.empty_like(clusters.iter().map(PointBuffer::len).sum());
        for c in &clusters {
            merged.append(c);
        }
        self.sink.publish(DebugCloud::Accepted, &merged);

        self.enter(DetectionState::Done);
        DetectionResult {
            is_plane_found: true,
            plane_coefficients: fit.model.coefficients(),
            plane_cloud,
            clusters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::Point,
        config::ClassificationOffsets,
        frame::{FrameQueue, FrameSlot},
        plane::PlaneModel,
    };
    use std::sync::{Arc, Mutex};

    /// 1 m × 1 m plane at z = 0.5 sampled every 2 cm.
    fn table(z: f32) -> Vec<Point> {
        let mut pts = Vec::new();
        for i in 0..50 {
            for j in 0..50 {
                pts.push(Point::new(i as f32 * 0.02, j as f32 * 0.02, z, [128; 3]));
            }
        }
        pts
    }

    /// Solid box of edge `edge` with its lower corner at `origin`, 1 cm spacing.
    fn cube(origin: [f32; 3], edge: f32) -> Vec<Point> {
        let n = (edge / 0.01).round() as usize + 1;
        let mut pts = Vec::new();
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    pts.push(Point::new(
                        origin[0] + i as f32 * 0.01,
                        origin[1] + j as f32 * 0.01,
                        origin[2] + k as f32 * 0.01,
                        [255, 0, 0],
                    ));
                }
            }
        }
        pts
    }

    fn config() -> DetectorConfig {
        DetectorConfig {
            seed: Some(7),
            offsets: ClassificationOffsets::ZERO,
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct Recorder(Arc<Mutex<Vec<(DebugCloud, usize)>>>);

    impl DebugSink for Recorder {
        fn publish(&mut self, kind: DebugCloud, cloud: &PointBuffer) {
            self.0.lock().unwrap().push((kind, cloud.len()));
        }
    }

    #[test]
    fn test_empty_cloud_no_plane() {
        let mut detector = Detector::new(config(), FrameQueue::default()).unwrap();
        let result = detector.detect_cloud(&PointBuffer::new("cam"));
        assert!(!result.is_plane_found);
        assert!(result.clusters.is_empty());
        assert!(result.plane_cloud.is_empty());
        assert_eq!(result.plane_coefficients, [0.0; 4]);
        assert_eq!(detector.state(), DetectionState::NoPlane);
    }

    #[test]
    fn test_object_on_table() {
        // Table at z = 0.5 so the default depth range keeps it
        let mut pts = table(0.5);
        pts.extend(cube([0.4, 0.4, 0.51], 0.1));
        let cloud = PointBuffer::from_points("cam", pts);

        let mut detector = Detector::new(config(), FrameQueue::default()).unwrap();
        let result = detector.detect_cloud(&cloud);

        assert!(result.is_plane_found);
        let [a, b, c, _] = result.plane_coefficients;
        assert!(a.abs() < 0.05 && b.abs() < 0.05 && c > 0.99);
        assert_eq!(result.clusters.len(), 1);
        let (lo, hi) = result.clusters[0].bounds().unwrap();
        assert!(lo[0] >= 0.4 - 1e-3 && hi[0] <= 0.5 + 1e-3);
        assert!(lo[2] >= 0.5 && hi[2] <= 0.61 + 1e-3);
        assert_eq!(result.frame_id(), "cam");
        assert_eq!(detector.state(), DetectionState::Done);
    }

    #[test]
    fn test_plane_cloud_is_cropped_inliers() {
        let mut pts = table(0.5);
        pts.extend(cube([0.4, 0.4, 0.51], 0.1));
        let cloud = PointBuffer::from_points("cam", pts);

        // Default offsets: the crop box is [0, 0, 0]..[0.1, 0.5, 1.1]
        let cfg = DetectorConfig {
            seed: Some(7),
            ..Default::default()
        };
        let mut detector = Detector::new(cfg.clone(), FrameQueue::default()).unwrap();
        let result = detector.detect_cloud(&cloud);
        assert!(result.is_plane_found);

        let [a, b, c, d] = result.plane_coefficients;
        let model = PlaneModel { a, b, c, d };
        let corner = model.classification_plane(&cfg.offsets).corner();
        assert!(corner[2] > 1.0, "corner {corner:?}");

        let range = cfg.range;
        let filtered = downsample(&filter_range(&cloud, range.axis, range.min, range.max), cfg.leaf_size);
        let threshold = cfg.plane.distance_threshold;
        let expected = filtered.filtered(|p| {
            model.distance(p.x, p.y, p.z) <= threshold
                && (0.0..=corner[0]).contains(&p.x)
                && (0.0..=corner[1]).contains(&p.y)
                && (0.0..=corner[2]).contains(&p.z)
        });

        assert!(!result.plane_cloud.is_empty());
        assert_eq!(result.plane_cloud, expected);
        assert!(result.plane_cloud.len() < model.select_within(&filtered, threshold).len());
    }

    #[test]
    fn test_debug_sink_receives_blobs_and_accepted() {
        let mut pts = table(0.5);
        pts.extend(cube([0.4, 0.4, 0.51], 0.1));
        let cloud = PointBuffer::from_points("cam", pts);

        let recorder = Recorder::default();
        let log = recorder.0.clone();
        let mut detector = Detector::with_sink(config(), FrameQueue::default(), recorder).unwrap();
        let result = detector.detect_cloud(&cloud);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].0, DebugCloud::Blobs);
        assert_eq!(log[1], (DebugCloud::Accepted, result.clusters[0].len()));
    }

    #[test]
    fn test_detect_aggregates_frames() {
        let frame = PointBuffer::from_points("cam", table(0.5));
        let mut cfg = config();
        cfg.aggregate_frames = 3;
        let queue = FrameQueue::new(std::iter::repeat_n(frame, 3));

        let mut detector = Detector::new(cfg, queue).unwrap();
        let result = detector.detect().unwrap();
        assert!(result.is_plane_found);
        assert!(result.clusters.is_empty());
        assert!(detector.source().is_empty());
    }

    #[test]
    fn test_detect_cancelled_slot() {
        let slot = Arc::new(FrameSlot::new());
        slot.cancel();
        let mut detector = Detector::new(config(), slot).unwrap();
        assert!(matches!(detector.detect(), Err(Error::Cancelled)));
        assert_eq!(detector.state(), DetectionState::Idle);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = config();
        cfg.cluster.tolerance = -1.0;
        assert!(Detector::new(cfg, FrameQueue::default()).is_err());
    }

    #[test]
    fn test_summary_serializes() {
        let result = DetectionResult::not_found("cam");
        let json = serde_json::to_value(result.summary()).unwrap();
        assert_eq!(json["frame_id"], "cam");
        assert_eq!(json["is_plane_found"], false);
        assert_eq!(json["clusters"].as_array().unwrap().len(), 0);
    }
}
