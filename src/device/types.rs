// Core types for the device bridge

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of a bounded bridge invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitResult {
    /// Process exit code (`None` when terminated by a signal)
    pub code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Wall-clock time the invocation took
    pub elapsed: Duration,
}

impl ExitResult {
    /// Whether the tool exited with status 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Limits passed to the on-device screen capture command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureLimits {
    /// Hard cap on capture duration, enforced on the device
    pub time_limit: Duration,
    /// Encoder bit rate in bits per second
    pub bit_rate: u32,
    /// Video size as `WxH`
    pub size: String,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(crate::config::DEFAULT_TIME_LIMIT_SECS),
            bit_rate: crate::config::DEFAULT_BIT_RATE,
            size: crate::config::DEFAULT_VIDEO_SIZE.to_string(),
        }
    }
}

impl CaptureLimits {
    /// Render the limits as `screenrecord` arguments
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "--time-limit".to_string(),
            self.time_limit.as_secs().to_string(),
            "--bit-rate".to_string(),
            self.bit_rate.to_string(),
            "--size".to_string(),
            self.size.clone(),
        ]
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error types for device bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Device bridge tool '{0}' is not available")]
    ToolUnavailable(String),

    #[error("No device connected")]
    DeviceDisconnected,

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("'{command}' exited with {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
