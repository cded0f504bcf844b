//! Bounded invocation of the device-control command-line tool.
//!
//! Every call made through [`DeviceBridge::run`] carries an explicit timeout.
//! On expiry the child is killed and reaped so a wedged `adb` never blocks
//! the calling test.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::types::{BridgeError, BridgeResult, CaptureLimits, ExitResult};

/// Timeout for availability and connectivity probes
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout for killing stale capture processes on the device
pub const KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for pulling a file off the device
pub const PULL_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for removing a file on the device
pub const REMOVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Process name of the on-device capture tool
pub const CAPTURE_TOOL: &str = "screenrecord";

/// State `adb devices` lists for a ready device
const DEVICE_STATE: &str = "device";

/// Poll interval while waiting for a child to exit
const EXIT_POLL: Duration = Duration::from_millis(20);

/// How long to wait for output readers after the child has exited
const READER_GRACE: Duration = Duration::from_millis(500);

/// Thin wrapper around the device-control tool
#[derive(Debug, Clone)]
pub struct DeviceBridge {
    program: String,
    serial: Option<String>,
}

impl DeviceBridge {
    /// Create a bridge invoking `program` (usually `adb`)
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            serial: None,
        }
    }

    /// Target a specific device serial (`-s <serial>`)
    pub fn with_serial(mut self, serial: Option<String>) -> Self {
        self.serial = serial;
        self
    }

    /// The program this bridge invokes
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The targeted device serial, if any
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(serial) = &self.serial {
            cmd.args(["-s", serial]);
        }
        cmd.args(args);
        cmd
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    fn spawn_error(&self, source: std::io::Error) -> BridgeError {
        if source.kind() == std::io::ErrorKind::NotFound {
            BridgeError::ToolUnavailable(self.program.clone())
        } else {
            BridgeError::Spawn {
                program: self.program.clone(),
                source,
            }
        }
    }

    /// Run the tool with `args`, waiting at most `timeout` for it to exit.
    ///
    /// A non-zero exit is not an error here; inspect [`ExitResult::code`].
    pub fn run(&self, args: &[&str], timeout: Duration) -> BridgeResult<ExitResult> {
        let command = self.describe(args);
        debug!(%command, ?timeout, "Running device bridge command");

        let started = Instant::now();
        let mut child = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout_rx = drain(child.stdout.take());
        let stderr_rx = drain(child.stderr.take());

        match wait_with_timeout(&mut child, timeout)? {
            Some(status) => Ok(ExitResult {
                code: status.code(),
                stdout: stdout_rx.recv_timeout(READER_GRACE).unwrap_or_default(),
                stderr: stderr_rx.recv_timeout(READER_GRACE).unwrap_or_default(),
                elapsed: started.elapsed(),
            }),
            None => {
                warn!(%command, ?timeout, "Device bridge command timed out, killing it");
                let _ = child.kill();
                let _ = child.wait();
                Err(BridgeError::TimedOut { command, timeout })
            }
        }
    }

    /// Like [`run`](Self::run) but treats a non-zero exit as an error
    pub fn run_checked(&self, args: &[&str], timeout: Duration) -> BridgeResult<ExitResult> {
        let result = self.run(args, timeout)?;
        if result.success() {
            Ok(result)
        } else {
            Err(BridgeError::Failed {
                command: self.describe(args),
                code: result.code,
                stderr: result.stderr.trim().to_string(),
            })
        }
    }

    /// Spawn the tool without waiting; output is discarded
    pub fn spawn(&self, args: &[&str]) -> BridgeResult<Child> {
        debug!(command = %self.describe(args), "Spawning device bridge command");
        self.command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| self.spawn_error(e))
    }

    /// Whether the tool can be executed at all. Never fails.
    pub fn is_tool_available(&self) -> bool {
        match self.run(&["version"], PROBE_TIMEOUT) {
            Ok(result) => result.success(),
            Err(e) => {
                debug!(error = %e, "Device bridge tool probe failed");
                false
            }
        }
    }

    /// Whether a device (the targeted serial, if set) is attached. Never fails.
    pub fn is_device_connected(&self) -> bool {
        match self.run(&["devices"], PROBE_TIMEOUT) {
            Ok(result) if result.success() => {
                has_connected_device(&result.stdout, self.serial.as_deref())
            }
            Ok(_) => false,
            Err(e) => {
                debug!(error = %e, "Device connectivity probe failed");
                false
            }
        }
    }

    /// Start an on-device screen capture writing to `remote`
    pub fn start_capture(&self, remote: &str, limits: &CaptureLimits) -> BridgeResult<Child> {
        let limit_args = limits.to_args();
        let mut args = vec!["shell", CAPTURE_TOOL];
        args.extend(limit_args.iter().map(String::as_str));
        args.push(remote);
        self.spawn(&args)
    }

    /// Kill any capture process left running on the device.
    ///
    /// `pkill` exits 1 when nothing matched, which is the common case.
    pub fn kill_stale_captures(&self) -> BridgeResult<ExitResult> {
        self.run(&["shell", "pkill", "-f", CAPTURE_TOOL], KILL_TIMEOUT)
    }

    /// Copy `remote` from the device to `local`
    pub fn pull(&self, remote: &str, local: &Path) -> BridgeResult<ExitResult> {
        let local = local.to_string_lossy();
        self.run_checked(&["pull", remote, &local], PULL_TIMEOUT)
    }

    /// Delete `remote` on the device
    pub fn remove(&self, remote: &str) -> BridgeResult<ExitResult> {
        self.run_checked(&["shell", "rm", "-f", remote], REMOVE_TIMEOUT)
    }
}

/// Read a child pipe to completion on a helper thread
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
    }
    rx
}

/// Poll `child` until it exits or `timeout` elapses.
///
/// Returns `None` on timeout; the child is left running for the caller.
pub fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Ok(None);
        }
        thread::sleep(EXIT_POLL.min(timeout - elapsed));
    }
}

/// Check `adb devices` output for a ready device
fn has_connected_device(output: &str, serial: Option<&str>) -> bool {
    output.lines().any(|line| {
        let mut fields = line.split('\t');
        match (fields.next(), fields.next()) {
            (Some(listed), Some(state)) => {
                state.trim() == DEVICE_STATE && serial.is_none_or(|s| listed.trim() == s)
            }
            _ => false,
        }
    })
}
