//! Device control abstraction used by the recording pipeline.
//!
//! - `DeviceBridge` drives a real device through `adb`
//! - `MockDevice` keeps an in-memory file table for testing

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::process::Child;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::bridge::{DeviceBridge, wait_with_timeout};
use super::types::{BridgeError, BridgeResult, CaptureLimits};

/// Handle to a running on-device capture
pub trait CaptureProcess: Send {
    /// Ask the capture to finish cleanly and wait up to `grace` for it.
    ///
    /// Kills the process if it does not exit in time. Returns whether it
    /// exited on its own.
    fn stop(&mut self, grace: Duration) -> bool;

    /// Terminate the capture without caring about the output file
    fn terminate(&mut self, grace: Duration);

    /// Whether the capture is still running
    fn is_running(&mut self) -> bool;
}

/// Operations the recording pipeline needs from a device
pub trait DeviceControl: Send + Sync {
    /// Whether the control tool can be executed
    fn is_tool_available(&self) -> bool;

    /// Whether a device is attached and ready
    fn is_device_connected(&self) -> bool;

    /// Kill any capture process left over from an earlier run
    fn kill_stale_captures(&self) -> BridgeResult<()>;

    /// Start capturing the screen into `remote`
    fn start_capture(
        &self,
        remote: &str,
        limits: &CaptureLimits,
    ) -> BridgeResult<Box<dyn CaptureProcess>>;

    /// Copy `remote` to `local`
    fn pull(&self, remote: &str, local: &Path) -> BridgeResult<()>;

    /// Delete `remote` from the device
    fn remove(&self, remote: &str) -> BridgeResult<()>;
}

/// A capture running as a local `adb shell screenrecord` child
pub struct ChildCapture {
    child: Child,
}

impl ChildCapture {
    pub fn new(child: Child) -> Self {
        Self { child }
    }

    #[cfg(unix)]
    fn signal(&mut self, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let pid = Pid::from_raw(self.child.id() as i32);
        if let Err(e) = kill(pid, signal) {
            debug!(error = %e, ?signal, "Signalling capture process failed, killing it");
            let _ = self.child.kill();
        }
    }

    #[cfg(not(unix))]
    fn signal(&mut self) {
        let _ = self.child.kill();
    }

    fn reap(&mut self, grace: Duration) -> bool {
        match wait_with_timeout(&mut self.child, grace) {
            Ok(Some(_)) => true,
            _ => {
                let _ = self.child.kill();
                let _ = self.child.wait();
                false
            }
        }
    }
}

impl CaptureProcess for ChildCapture {
    fn stop(&mut self, grace: Duration) -> bool {
        if !self.is_running() {
            return true;
        }
        // SIGINT lets screenrecord finalize the mp4 container
        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGINT);
        #[cfg(not(unix))]
        self.signal();
        self.reap(grace)
    }

    fn terminate(&mut self, grace: Duration) {
        if !self.is_running() {
            return;
        }
        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGTERM);
        #[cfg(not(unix))]
        self.signal();
        self.reap(grace);
    }

    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl Drop for ChildCapture {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

impl DeviceControl for DeviceBridge {
    fn is_tool_available(&self) -> bool {
        DeviceBridge::is_tool_available(self)
    }

    fn is_device_connected(&self) -> bool {
        DeviceBridge::is_device_connected(self)
    }

    fn kill_stale_captures(&self) -> BridgeResult<()> {
        DeviceBridge::kill_stale_captures(self).map(|_| ())
    }

    fn start_capture(
        &self,
        remote: &str,
        limits: &CaptureLimits,
    ) -> BridgeResult<Box<dyn CaptureProcess>> {
        let child = DeviceBridge::start_capture(self, remote, limits)?;
        Ok(Box::new(ChildCapture::new(child)))
    }

    fn pull(&self, remote: &str, local: &Path) -> BridgeResult<()> {
        DeviceBridge::pull(self, remote, local).map(|_| ())
    }

    fn remove(&self, remote: &str) -> BridgeResult<()> {
        DeviceBridge::remove(self, remote).map(|_| ())
    }
}

#[derive(Debug, Default)]
struct MockDeviceState {
    tool_available: bool,
    connected: bool,
    fail_pulls: bool,
    files: BTreeSet<String>,
    /// Files whose capture was killed before it could finalize
    truncated: BTreeSet<String>,
    captures: Vec<(String, Arc<AtomicBool>)>,
    commands: Vec<String>,
}

/// An in-memory device for exercising the recording pipeline
///
/// Captures create their remote file immediately, like `screenrecord`
/// does. Pulled files are written to the local filesystem with a
/// placeholder payload. A capture killed by the stale sweep while still
/// running leaves a truncated file that cannot be pulled.
#[derive(Debug, Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockDeviceState>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Placeholder content written by `pull`
    pub const PAYLOAD: &'static [u8] = b"mock-mp4";

    /// A connected device with the tool available
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockDeviceState {
                tool_available: true,
                connected: true,
                ..Default::default()
            })),
        }
    }

    /// A device that is not attached
    pub fn disconnected() -> Self {
        let device = Self::new();
        device.set_connected(false);
        device
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    pub fn set_tool_available(&self, available: bool) {
        self.state.lock().tool_available = available;
    }

    /// Make every subsequent pull fail
    pub fn fail_pulls(&self, fail: bool) {
        self.state.lock().fail_pulls = fail;
    }

    /// Simulate a capture leaked by an earlier, abnormally terminated run
    pub fn leak_capture(&self, remote: &str) {
        let mut state = self.state.lock();
        state.files.insert(remote.to_string());
        state
            .captures
            .push((remote.to_string(), Arc::new(AtomicBool::new(true))));
    }

    /// Remote files currently on the device
    pub fn files(&self) -> Vec<String> {
        self.state.lock().files.iter().cloned().collect()
    }

    /// Number of capture processes still running
    pub fn running_captures(&self) -> usize {
        self.state
            .lock()
            .captures
            .iter()
            .filter(|(_, running)| running.load(Ordering::SeqCst))
            .count()
    }

    /// Commands received, in order
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }
}

/// Capture handle returned by [`MockDevice`]
pub struct MockCapture {
    running: Arc<AtomicBool>,
    state: Arc<Mutex<MockDeviceState>>,
}

impl CaptureProcess for MockCapture {
    fn stop(&mut self, _grace: Duration) -> bool {
        self.state.lock().commands.push("stop".to_string());
        self.running.store(false, Ordering::SeqCst);
        true
    }

    fn terminate(&mut self, _grace: Duration) {
        self.state.lock().commands.push("terminate".to_string());
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&mut self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl DeviceControl for MockDevice {
    fn is_tool_available(&self) -> bool {
        self.state.lock().tool_available
    }

    fn is_device_connected(&self) -> bool {
        let state = self.state.lock();
        state.tool_available && state.connected
    }

    fn kill_stale_captures(&self) -> BridgeResult<()> {
        let mut state = self.state.lock();
        state.commands.push("kill-stale".to_string());
        let killed: Vec<String> = state
            .captures
            .iter()
            .filter(|(_, running)| running.swap(false, Ordering::SeqCst))
            .map(|(remote, _)| remote.clone())
            .collect();
        state.truncated.extend(killed);
        Ok(())
    }

    fn start_capture(
        &self,
        remote: &str,
        _limits: &CaptureLimits,
    ) -> BridgeResult<Box<dyn CaptureProcess>> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(BridgeError::DeviceDisconnected);
        }
        state.commands.push(format!("start {remote}"));
        state.files.insert(remote.to_string());
        let running = Arc::new(AtomicBool::new(true));
        state.truncated.remove(remote);
        state
            .captures
            .push((remote.to_string(), Arc::clone(&running)));
        Ok(Box::new(MockCapture {
            running,
            state: Arc::clone(&self.state),
        }))
    }

    fn pull(&self, remote: &str, local: &Path) -> BridgeResult<()> {
        let mut state = self.state.lock();
        state.commands.push(format!("pull {remote}"));
        if state.fail_pulls || !state.files.contains(remote) {
            return Err(BridgeError::Failed {
                command: format!("pull {remote}"),
                code: Some(1),
                stderr: format!("remote object '{remote}' does not exist"),
            });
        }
        if state.truncated.contains(remote) {
            return Err(BridgeError::Failed {
                command: format!("pull {remote}"),
                code: Some(1),
                stderr: format!("'{remote}' is truncated: capture was killed"),
            });
        }
        drop(state);
        fs::write(local, Self::PAYLOAD)?;
        Ok(())
    }

    fn remove(&self, remote: &str) -> BridgeResult<()> {
        let mut state = self.state.lock();
        state.commands.push(format!("remove {remote}"));
        state.files.remove(remote);
        state.truncated.remove(remote);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_capture_lifecycle() {
        let device = MockDevice::new();
        let mut capture = device
            .start_capture("/sdcard/a.mp4", &CaptureLimits::default())
            .unwrap();
        assert_eq!(device.files(), vec!["/sdcard/a.mp4"]);
        assert_eq!(device.running_captures(), 1);

        assert!(capture.stop(Duration::from_secs(1)));
        assert!(!capture.is_running());
        assert_eq!(device.running_captures(), 0);

        device.remove("/sdcard/a.mp4").unwrap();
        assert!(device.files().is_empty());
    }

    #[test]
    fn test_mock_kill_stale_stops_leaked_capture() {
        let device = MockDevice::new();
        device.leak_capture("/sdcard/old.mp4");
        assert_eq!(device.running_captures(), 1);

        device.kill_stale_captures().unwrap();
        assert_eq!(device.running_captures(), 0);
    }

    #[test]
    fn test_mock_killed_live_capture_cannot_be_pulled() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockDevice::new();
        let mut live = device
            .start_capture("/sdcard/live.mp4", &CaptureLimits::default())
            .unwrap();
        device.kill_stale_captures().unwrap();
        assert!(!live.is_running());
        assert!(matches!(
            device.pull("/sdcard/live.mp4", &dir.path().join("live.mp4")),
            Err(BridgeError::Failed { .. })
        ));

        let mut finished = device
            .start_capture("/sdcard/done.mp4", &CaptureLimits::default())
            .unwrap();
        finished.stop(Duration::from_secs(1));
        device.kill_stale_captures().unwrap();
        device
            .pull("/sdcard/done.mp4", &dir.path().join("done.mp4"))
            .unwrap();
    }

    #[test]
    fn test_mock_pull_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockDevice::new();
        let err = device.pull("/sdcard/none.mp4", &dir.path().join("x.mp4"));
        assert!(matches!(err, Err(BridgeError::Failed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_child_capture_stop_interrupts() {
        let child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let mut capture = ChildCapture::new(child);
        assert!(capture.is_running());
        capture.stop(Duration::from_secs(2));
        assert!(!capture.is_running());
    }
}
