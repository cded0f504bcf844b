//! Crate-level error aggregating the per-module errors.

use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::config::ConfigError;
use crate::device::BridgeError;
use crate::driver::DriverError;
use crate::report::ReportError;
use crate::session::SessionError;
use crate::wait::WaitError;

/// Result type for harness-level operations
pub type HarnessResult<T> = Result<T, HarnessError>;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Check(String),
}
