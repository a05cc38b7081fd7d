use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`SpikeError`], stable across releases so callers can
/// branch on it without matching message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    OutOfRange,
    InsufficientSamples,
    BackendUnavailable,
    NotFound,
    NoSpikesAvailable,
    AmbiguousOrientation,
    InvalidData,
    InvalidConfig,
    Io,
}

#[derive(Error, Debug)]
pub enum SpikeError {
    #[error("channel {channel} is out of range (recording has {channels} channels)")]
    ChannelOutOfRange { channel: usize, channels: usize },

    #[error("sample range {start}..{end} is invalid")]
    InvalidRange { start: usize, end: usize },

    #[error("filter needs at least {required} samples, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },

    #[error("backend unavailable for {}: {reason}", path.display())]
    BackendUnavailable { path: PathBuf, reason: String },

    #[error("cannot infer axis order of stored shape ({rows}, {cols}); set an explicit orientation")]
    AmbiguousOrientation { rows: usize, cols: usize },

    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error("no precomputed spikes available for the selected channels")]
    NoSpikesAvailable,

    #[error("invalid data in {}: {reason}", path.display())]
    InvalidData { path: PathBuf, reason: String },

    #[error("invalid configuration {}: {reason}", path.display())]
    InvalidConfig { path: PathBuf, reason: String },

    #[error("invalid filter design: {reason}")]
    InvalidFilter { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpikeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpikeError::ChannelOutOfRange { .. } | SpikeError::InvalidRange { .. } => {
                ErrorKind::OutOfRange
            }
            SpikeError::InsufficientSamples { .. } => ErrorKind::InsufficientSamples,
            SpikeError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            SpikeError::AmbiguousOrientation { .. } => ErrorKind::AmbiguousOrientation,
            SpikeError::NotFound { .. } => ErrorKind::NotFound,
            SpikeError::NoSpikesAvailable => ErrorKind::NoSpikesAvailable,
            SpikeError::InvalidData { .. } => ErrorKind::InvalidData,
            SpikeError::InvalidConfig { .. } | SpikeError::InvalidFilter { .. } => {
                ErrorKind::InvalidConfig
            }
            SpikeError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SpikeError::BackendUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_data(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SpikeError::InvalidData {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        SpikeError::NotFound {
            what,
            name: name.into(),
        }
    }
}

/// Serialisable form of an error handed to whatever sits in front of the library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SpikeError> for ErrorReport {
    fn from(err: &SpikeError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SpikeError>;
