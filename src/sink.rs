// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Debug outputs for intermediate clouds.
//!
//! Sinks observe the detector and never influence its result: a failing sink
//! logs and carries on.

use crate::{buffer::PointBuffer, pcd};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Intermediate cloud published during a detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCloud {
    /// Everything left after removing the plane inliers.
    Blobs,
    /// All accepted clusters merged into one cloud.
    Accepted,
}

impl DebugCloud {
    pub fn name(self) -> &'static str {
        match self {
            DebugCloud::Blobs => "blobs",
            DebugCloud::Accepted => "accepted",
        }
    }
}

/// Receiver of intermediate clouds.
pub trait DebugSink: Send {
    fn publish(&mut self, kind: DebugCloud, cloud: &PointBuffer);
}

/// Sink discarding everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DebugSink for NoopSink {
    fn publish(&mut self, _kind: DebugCloud, _cloud: &PointBuffer) {}
}

/// Sink writing every published cloud as `<seq>_<kind>.pcd` into a directory.
#[derive(Debug)]
pub struct PcdSink {
    dir: PathBuf,
    seq: u32,
}

impl PcdSink {
    /// Create `dir` if needed and write into it.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, seq: 0 })
    }
}

impl DebugSink for PcdSink {
    fn publish(&mut self, kind: DebugCloud, cloud: &PointBuffer) {
        let path = self
            .dir
            .join(format!("{:04}_{}.pcd", self.seq, kind.name()));
        self.seq += 1;
        match pcd::write_file(&path, cloud) {
            Ok(()) => debug!(path = %path.display(), n_points = cloud.len(), "debug cloud written"),
            Err(e) => warn!("could not write debug cloud {}: {}", path.display(), e),
        }
    }
}

impl<T: DebugSink + ?Sized> DebugSink for Box<T> {
    fn publish(&mut self, kind: DebugCloud, cloud: &PointBuffer) {
        (**self).publish(kind, cloud)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Point;

    #[test]
    fn test_pcd_sink_writes_sequenced_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PcdSink::new(dir.path().join("debug")).unwrap();
        let cloud = PointBuffer::from_points("cam", [Point::new(0.0, 0.0, 0.5, [9, 9, 9])]);

        sink.publish(DebugCloud::Blobs, &cloud);
        sink.publish(DebugCloud::Accepted, &PointBuffer::new("cam"));

        let first = dir.path().join("debug/0000_blobs.pcd");
        let second = dir.path().join("debug/0001_accepted.pcd");
        assert_eq!(pcd::read_file(&first, "cam").unwrap(), cloud);
        assert!(pcd::read_file(&second, "cam").unwrap().is_empty());
    }
}
