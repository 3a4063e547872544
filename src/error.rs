// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("at least 2 channels are needed to measure distances, got {0}")]
    InsufficientChannels(usize),

    #[error("max distance must be finite and positive, got {0}")]
    InvalidMaxDistance(f64),

    #[error("pixel size must be finite and positive on every axis, got {0:?}")]
    InvalidPixelSize([f64; 3]),

    #[error("channel {channel} point {index} has a non-finite coordinate {point:?}")]
    NonFinitePosition { channel: usize, index: usize, point: [f64; 3] },

    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch { expected: (usize, usize, usize), actual: (usize, usize, usize) },

    #[error("shape {0:?} has more elements than can be addressed")]
    ShapeOverflow(Vec<usize>),

    #[error("gaussian sigma must be finite and non-negative, got {0}")]
    InvalidSigma(f32),

    #[error("expected {expected} values, got {actual}")]
    DataLength { expected: usize, actual: usize },

    #[error("volume has no planes")]
    EmptyVolume,

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("range on axis {axis} stops at {stop}, outside of 1..={size}")]
    RangeOutOfBounds { axis: char, stop: usize, size: usize },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("invalid table column '{name}': {reason}")]
    InvalidColumn { name: String, reason: String },

    #[error("invalid annotation: {0}")]
    InvalidAnnotation(String),

    #[error("session error: {0}")]
    Session(String),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
