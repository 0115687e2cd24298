// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Frame ingestion and aggregation.
//!
//! Incoming frames are delivered on a separate thread and may arrive faster
//! than detections consume them. They land in a [`FrameSlot`], a single
//! latest-wins slot: each new frame overwrites the previous one and a
//! consumer takes at most one frame per wakeup.
//!
//! ```text
//! ┌──────────┐ kanal  ┌──────────┐ try_set_latest ┌───────────┐ next_frame ┌───────────┐
//! │ producer │ ─────► │ listener │ ─────────────► │ FrameSlot │ ─────────► │ aggregate │
//! └──────────┘        └──────────┘                └───────────┘            └───────────┘
//! ```

use crate::{buffer::PointBuffer, error::Error};
use kanal::Receiver;
use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::{self, JoinHandle},
};
use tracing::{debug, info, instrument, trace};

/// Source of point cloud frames for the aggregator.
pub trait FrameSource: Send + Sync {
    /// Block until the next frame is available and take it.
    ///
    /// # Returns
    /// - `Ok(frame)` - A frame not handed out before
    /// - `Err` - The source was cancelled or closed
    fn next_frame(&self) -> Result<PointBuffer, Error>;

    /// Discard any frame that arrived before this call.
    fn reset(&self) {}
}

impl<T: FrameSource + ?Sized> FrameSource for Arc<T> {
    fn next_frame(&self) -> Result<PointBuffer, Error> {
        (**self).next_frame()
    }

    fn reset(&self) {
        (**self).reset()
    }
}

#[derive(Default)]
struct SlotState {
    latest: Option<PointBuffer>,
    cancelled: bool,
}

/// Latest-wins frame slot shared between the ingestion thread and the
/// detector.
///
/// The lock is held only for the duration of a read or write, never across
/// the wait (the condition variable releases it).
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave SlotState half-written, so
    // a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish `frame`, replacing any frame not yet taken.
    ///
    /// Returns `false` once the slot has been cancelled; the frame is dropped.
    pub fn try_set_latest(&self, frame: PointBuffer) -> bool {
        let mut state = self.lock();
        if state.cancelled {
            return false;
        }
        if state.latest.replace(frame).is_some() {
            trace!("dropped unconsumed frame");
        }
        drop(state);
        self.ready.notify_one();
        true
    }

    /// Wait for a frame and take it, leaving the slot empty.
    pub fn take_latest_blocking(&self) -> Result<PointBuffer, Error> {
        let mut state = self.lock();
        loop {
            if state.cancelled {
                return Err(Error::Cancelled);
            }
            if let Some(frame) = state.latest.take() {
                return Ok(frame);
            }
            state = self.ready.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// True when a frame is waiting to be taken.
    pub fn has_pending(&self) -> bool {
        self.lock().latest.is_some()
    }

    /// Discard the pending frame, if any.
    pub fn reset(&self) {
        self.lock().latest = None;
    }

    /// Wake every waiter with [`Error::Cancelled`] and refuse further frames.
    pub fn cancel(&self) {
        self.lock().cancelled = true;
        self.ready.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }
}

impl FrameSource for FrameSlot {
    fn next_frame(&self) -> Result<PointBuffer, Error> {
        self.take_latest_blocking()
    }

    fn reset(&self) {
        FrameSlot::reset(self)
    }
}

/// Finite, ordered frame source. Every queued frame is handed out exactly
/// once; an exhausted queue reports [`Error::ChannelClosed`].
///
/// Useful for replaying recorded frames without a producer thread.
#[derive(Default)]
pub struct FrameQueue {
    frames: Mutex<VecDeque<PointBuffer>>,
}

impl FrameQueue {
    pub fn new(frames: impl IntoIterator<Item = PointBuffer>) -> Self {
        Self {
            frames: Mutex::new(frames.into_iter().collect()),
        }
    }

    pub fn push(&self, frame: PointBuffer) {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameSource for FrameQueue {
    fn next_frame(&self) -> Result<PointBuffer, Error> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or(Error::ChannelClosed)
    }
}

/// Concatenate the next `k` frames of `source` into one buffer.
///
/// Any frame already pending when aggregation starts is discarded first, so
/// the result only holds frames that arrived during this pass. The frame id of
/// the result is that of the last frame appended. `k == 0` returns an empty
/// buffer without touching the source.
///
/// Blocks for as long as the source withholds frames.
#[instrument(skip(source))]
pub fn aggregate<S: FrameSource + ?Sized>(source: &S, k: usize) -> Result<PointBuffer, Error> {
    let mut aggregated = PointBuffer::default();
    if k == 0 {
        return Ok(aggregated);
    }

    source.reset();
    for i in 0..k {
        let frame = source.next_frame()?;
        trace!(frame = i, n_points = frame.len(), "aggregating");
        aggregated.append(&frame);
        aggregated.set_frame_id(frame.frame_id());
    }

    debug!(
        frames = k,
        n_points = aggregated.len(),
        frame_id = aggregated.frame_id(),
        "aggregation complete"
    );
    Ok(aggregated)
}

// If the receiver is empty, waits for the next message, otherwise returns the
// most recent message on this receiver. If the receiver is closed, returns None
fn drain_recv<T>(rx: &Receiver<T>) -> Option<T> {
    let mut msg = match rx.try_recv() {
        Err(_) => return None,
        Ok(Some(v)) => v,
        Ok(None) => return rx.recv().ok(),
    };
    while let Ok(Some(v)) = rx.try_recv() {
        msg = v;
    }
    Some(msg)
}

/// Spawn the ingestion thread moving frames from `rx` into `slot`.
///
/// Backlogged frames are collapsed to the most recent one. The thread exits
/// when the channel closes, cancelling the slot so waiting consumers are
/// released, or when the slot is cancelled.
pub fn spawn_listener(
    rx: Receiver<PointBuffer>,
    slot: Arc<FrameSlot>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("ingest".to_string())
        .spawn(move || {
            loop {
                let Some(frame) = drain_recv(&rx) else {
                    info!("frame channel closed");
                    slot.cancel();
                    return;
                };
                if !slot.try_set_latest(frame) {
                    debug!("frame slot cancelled, listener exiting");
                    return;
                }
            }
        })
}
