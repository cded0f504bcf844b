//! Evidence produced around a test: screen recordings and screenshots.
//!
//! Nothing in this module changes a test's verdict. Every failure is logged
//! and absorbed by the caller.

pub mod naming;
pub mod recording;
pub mod screenshot;

use std::path::PathBuf;

use thiserror::Error;

use crate::device::BridgeError;
use crate::driver::DriverError;

pub use naming::{artifact_name, sanitize_name, timestamp};
pub use recording::{FinalizeOutcome, RecordingPipeline, RecordingState, StartOutcome};
pub use screenshot::{ScreenshotManifest, Screenshots, cleanup_old};

/// Result type for artifact operations
pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Error types for artifact operations
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Device bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
