// src/error.rs
//! Error types for the walk tracker

use crate::{gps::SourceError, walk::Walk};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WalkError>;

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serial error: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Parse error: {0}")]
    Parse(String),

    /// Location permission was not granted when starting a walk.
    #[error("Location permission denied")]
    PermissionDenied,
    /// `start` was called while a walk is already being recorded.
    #[error("A walk is already being recorded")]
    AlreadyRecording,
    /// A one-shot position fetch timed out or the source reported an error.
    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),
    /// The continuous subscription failed mid-walk.
    #[error("Tracking interrupted: {0}")]
    TrackingInterrupted(SourceError),
    #[error("Storage error: {0}")]
    Storage(String),
    /// The walk was finalized and kept in memory, but the archive write failed.
    #[error("Walk {} finished but could not be saved: {reason}", walk.id)]
    Unpersisted { walk: Box<Walk>, reason: String },
    #[error("No walk with id {0}")]
    WalkNotFound(String),

    #[error("Error: {0}")]
    Other(String),
}

impl From<SourceError> for WalkError {
    fn from(error: SourceError) -> Self {
        match error {
            SourceError::PermissionDenied => WalkError::PermissionDenied,
            SourceError::Timeout(_) | SourceError::Unavailable(_) => {
                WalkError::LocationUnavailable(error.to_string())
            }
            other => WalkError::TrackingInterrupted(other),
        }
    }
}

impl From<tokio::task::JoinError> for WalkError {
    fn from(error: tokio::task::JoinError) -> Self {
        WalkError::Other(format!("Background task failed: {}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_source_errors_map_to_walk_errors() {
        assert!(matches!(
            WalkError::from(SourceError::PermissionDenied),
            WalkError::PermissionDenied
        ));
        assert!(matches!(
            WalkError::from(SourceError::Timeout(Duration::from_secs(5))),
            WalkError::LocationUnavailable(_)
        ));
        assert!(matches!(
            WalkError::from(SourceError::Unavailable("no receiver".to_string())),
            WalkError::LocationUnavailable(_)
        ));

        let interrupted = WalkError::from(SourceError::Io("reset".to_string()));
        assert!(matches!(
            &interrupted,
            WalkError::TrackingInterrupted(SourceError::Io(_))
        ));
        assert_eq!(
            interrupted.to_string(),
            "Tracking interrupted: position source read failed: reset"
        );
        assert!(matches!(
            WalkError::from(SourceError::Closed),
            WalkError::TrackingInterrupted(SourceError::Closed)
        ));
    }

    #[test]
    fn test_serial_errors_convert() {
        let error: WalkError =
            tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "no such port").into();
        assert!(matches!(error, WalkError::Serial(_)));
        assert!(error.to_string().starts_with("Serial error: "));
    }
}
