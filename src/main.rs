// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser as _;
use edgefirst_tabletop::{
    DetectionResult, Detector, Error, FrameSlot, PointBuffer,
    frame::spawn_listener,
    pcd,
    sink::{DebugSink, NoopSink, PcdSink},
};
use kanal::Sender;
use std::{
    path::Path,
    sync::Arc,
    thread::{self, JoinHandle, sleep},
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt().with_max_level(args.rust_log).init();

    let config = args.detector_config()?;
    if !(args.rate > 0.0 && args.rate.is_finite()) {
        return Err(Error::Config(format!("rate must be positive, got {}", args.rate)).into());
    }
    debug!("{:?}", config);

    let frames = args
        .inputs
        .iter()
        .map(|path| pcd::read_file(path, &args.frame_id))
        .collect::<Result<Vec<_>, _>>()?;
    info!(
        "loaded {} frames, {} points total",
        frames.len(),
        frames.iter().map(PointBuffer::len).sum::<usize>()
    );

    let slot = Arc::new(FrameSlot::new());
    let (tx, rx) = kanal::bounded(4);
    let listener = spawn_listener(rx, slot.clone())?;
    let producer = spawn_replay(tx, frames, args.rate)?;

    let sink: Box<dyn DebugSink> = match &args.debug_dir {
        Some(dir) => Box::new(PcdSink::new(dir)?),
        None => Box::new(NoopSink),
    };
    if let Some(dir) = &args.output {
        std::fs::create_dir_all(dir)?;
    }

    let mut detector = Detector::with_sink(config, slot.clone(), sink)?;
    let mut outcome = Ok(());
    for n in 0..args.detections {
        let result = match detector.detect() {
            Ok(v) => v,
            Err(e) => {
                outcome = Err(e);
                break;
            }
        };
        if let Some(dir) = &args.output {
            write_result(dir, n, &result)?;
        }
        println!("{}", serde_json::to_string(&result.summary())?);
    }

    slot.cancel();
    for (name, handle) in [("ingest", listener), ("replay", producer)] {
        if handle.join().is_err() {
            warn!("{} thread panicked", name);
        }
    }

    outcome.map_err(Into::into)
}

/// Replay `frames` in a loop at `rate` frames per second until the channel
/// closes.
fn spawn_replay(
    tx: Sender<PointBuffer>,
    frames: Vec<PointBuffer>,
    rate: f64,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("replay".to_string())
        .spawn(move || {
            let interval = Duration::from_secs_f64(1.0 / rate);
            let mut target_time = Instant::now() + interval;

            for frame in frames.iter().cycle() {
                if tx.send(frame.clone()).is_err() {
                    debug!("replay channel closed");
                    return;
                }
                sleep(target_time.saturating_duration_since(Instant::now()));
                target_time += interval;
            }
        })
}

/// Write the plane cloud and every accepted cluster of detection `n`.
fn write_result(dir: &Path, n: usize, result: &DetectionResult) -> Result<(), Error> {
    if !result.is_plane_found {
        return Ok(());
    }
    pcd::write_file(dir.join(format!("{:04}_plane.pcd", n)), &result.plane_cloud)?;
    for (i, cluster) in result.clusters.iter().enumerate() {
        pcd::write_file(dir.join(format!("{:04}_cluster_{:02}.pcd", n, i)), cluster)?;
    }
    Ok(())
}
