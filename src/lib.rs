// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! EdgeFirst Tabletop Detection Library
//!
//! Finds the dominant supporting plane (a table) in colored point clouds and
//! returns the object clusters resting on it.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌────────────┐   ┌────────────┐   ┌──────────┐
//! │ FrameSlot │ ─►│ aggregate │ ─►│ filter     │ ─►│ fit_plane  │ ─►│ partition│
//! │ (latest)  │   │ (k frames)│   │ range+voxel│   │ (RANSAC)   │   │          │
//! └───────────┘   └───────────┘   └────────────┘   └────────────┘   └────┬─────┘
//!                                                                        │ rest
//!                        ┌──────────────────┐   ┌────────────────────┐   ▼
//!                        │ DetectionResult  │ ◄─│ accept (on plane?) │ ◄─ extract_clusters
//!                        └──────────────────┘   └────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`buffer`]: Structure-of-arrays colored point buffer
//! - [`frame`]: Latest-wins frame slot, ingestion listener and aggregation
//! - [`filter`]: Range, voxel grid and crop box filters
//! - [`plane`]: RANSAC plane fitting and the classification plane
//! - [`cluster`]: Euclidean cluster extraction over a spatial hash
//! - [`accept`]: On-surface test for clusters
//! - [`detector`]: Orchestrator sequencing the stages
//! - [`config`]: Serde-backed parameters
//! - [`pcd`]: PCD file reader and writer
//! - [`sink`]: Debug cloud outputs
//!
//! # Example
//!
//! ```
//! use edgefirst_tabletop::{
//!     buffer::{Point, PointBuffer},
//!     config::DetectorConfig,
//!     detector::Detector,
//!     frame::FrameQueue,
//! };
//!
//! let table = PointBuffer::from_points(
//!     "camera",
//!     (0..400).map(|i| Point::new((i % 20) as f32 * 0.02, (i / 20) as f32 * 0.02, 0.6, [90; 3])),
//! );
//!
//! let config = DetectorConfig { seed: Some(1), ..Default::default() };
//! let mut detector = Detector::new(config, FrameQueue::default()).unwrap();
//! let result = detector.detect_cloud(&table);
//!
//! assert!(result.is_plane_found);
//! assert!(result.clusters.is_empty());
//! ```

pub mod accept;
pub mod buffer;
pub mod cluster;
pub mod config;
pub mod detector;
pub mod error;
pub mod filter;
pub mod frame;
pub mod pcd;
pub mod plane;
pub mod sink;

// Re-exports for convenience
pub use buffer::{Point, PointBuffer};
pub use config::DetectorConfig;
pub use detector::{DetectionResult, DetectionState, Detector};
pub use error::Error;
pub use frame::{FrameQueue, FrameSlot, FrameSource};
pub use plane::{ClassificationPlane, PlaneModel};
