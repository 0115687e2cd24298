// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Crate-wide error type.
//!
//! Detection stages never fail through this type: a missing plane or an empty
//! cloud is reported inside [`crate::detector::DetectionResult`]. Errors are
//! reserved for configuration, file I/O and frame-source lifecycle.

use std::fmt;

/// Common error type for tabletop detection.
#[derive(Debug)]
pub enum Error {
    /// I/O error (PCD files, output directories)
    Io(std::io::Error),
    /// JSON configuration or summary encoding error
    Json(serde_json::Error),
    /// Invalid configuration value
    Config(String),
    /// Malformed or unsupported PCD content
    Pcd(String),
    /// The frame slot was cancelled while a consumer was waiting on it
    Cancelled,
    /// The ingestion channel was closed by its producer
    ChannelClosed,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Pcd(msg) => write!(f, "invalid PCD: {}", msg),
            Error::Cancelled => write!(f, "frame source cancelled"),
            Error::ChannelClosed => write!(f, "ingestion channel closed"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<kanal::SendError> for Error {
    fn from(_: kanal::SendError) -> Self {
        Error::ChannelClosed
    }
}

impl From<kanal::ReceiveError> for Error {
    fn from(_: kanal::ReceiveError) -> Self {
        Error::ChannelClosed
    }
}
