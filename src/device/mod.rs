pub mod backend;
pub mod bridge;
pub mod types;

pub use backend::{CaptureProcess, ChildCapture, DeviceControl, MockCapture, MockDevice};
pub use bridge::{CAPTURE_TOOL, DeviceBridge, PROBE_TIMEOUT, PULL_TIMEOUT, wait_with_timeout};
pub use types::{BridgeError, BridgeResult, CaptureLimits, ExitResult};
