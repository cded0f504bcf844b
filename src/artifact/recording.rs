//! Verdict-keyed screen recording.
//!
//! Each execution unit moves through `Idle → Recording → Finalizing → Idle`.
//! A capture is started when a test starts and, once the verdict is known,
//! either pulled to the local recordings directory (Passed) or deleted from
//! the device (Failed, Skipped).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::naming::{artifact_name, remote_recording_path, timestamp};
use super::{ArtifactError, ArtifactResult};
use crate::config::{OutputSettings, RecordingSettings};
use crate::device::{CaptureProcess, DeviceBridge, DeviceControl};
use crate::session::UnitId;
use crate::verdict::Verdict;

/// How long a stopped capture may take to finalize its file
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// How long a discarded capture may take to exit
pub const DISCARD_GRACE: Duration = Duration::from_secs(3);

/// Lifecycle state of one unit's recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Finalizing,
}

/// What happened when a test started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A capture is running into `remote`
    Started { remote: String },
    /// Recording was not started; the test runs regardless
    Skipped { reason: String },
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started { .. })
    }

    fn skipped(reason: impl Into<String>) -> Self {
        StartOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

/// What happened when a verdict arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// No recording was active for the unit
    Idle,
    /// The recording was retrieved to this local path
    Saved(PathBuf),
    /// The recording was deliberately dropped
    Discarded,
    /// The recording should have been kept but retrieval failed
    SaveFailed,
}

struct ActiveRecording {
    test: String,
    remote: String,
    timestamp: String,
    started_at: DateTime<Utc>,
    capture: Box<dyn CaptureProcess>,
}

enum Slot {
    Recording(ActiveRecording),
    Finalizing,
}

/// Per-unit recording state machine over a [`DeviceControl`]
pub struct RecordingPipeline {
    device: Arc<dyn DeviceControl>,
    settings: RecordingSettings,
    output: OutputSettings,
    slots: Mutex<HashMap<UnitId, Slot>>,
    /// Serializes the stale-capture sweep with capture start
    launch: Mutex<()>,
}

impl RecordingPipeline {
    pub fn new(
        device: Arc<dyn DeviceControl>,
        settings: RecordingSettings,
        output: OutputSettings,
    ) -> Self {
        Self {
            device,
            settings,
            output,
            slots: Mutex::new(HashMap::new()),
            launch: Mutex::new(()),
        }
    }

    /// Pipeline over the configured `adb` bridge
    pub fn with_bridge(settings: RecordingSettings, output: OutputSettings) -> Self {
        let bridge = DeviceBridge::new(settings.program.clone()).with_serial(settings.serial.clone());
        Self::new(Arc::new(bridge), settings, output)
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn state(&self, unit: &UnitId) -> RecordingState {
        match self.slots.lock().get(unit) {
            None => RecordingState::Idle,
            Some(Slot::Recording(_)) => RecordingState::Recording,
            Some(Slot::Finalizing) => RecordingState::Finalizing,
        }
    }

    /// Start recording `test` for `unit`.
    ///
    /// Never fails: when recording is disabled or the device is unusable the
    /// unit stays Idle and the reason is returned.
    pub fn start(&self, unit: &UnitId, test: &str) -> StartOutcome {
        if !self.settings.enabled {
            debug!(%unit, test, "Recording disabled");
            return StartOutcome::skipped("recording disabled");
        }

        if let Some(stale) = self.take_recording(unit) {
            warn!(%unit, test = %stale.test, "Unit still had a recording running; discarding it");
            self.discard(unit, stale);
            self.slots.lock().remove(unit);
        }

        if !self.device.is_tool_available() {
            warn!(%unit, test, "Device tool not available; skipping recording");
            return StartOutcome::skipped("device tool not available");
        }
        if !self.device.is_device_connected() {
            warn!(%unit, test, "No device connected; skipping recording");
            return StartOutcome::skipped("no device connected");
        }

        let launch = self.launch.lock();

        // Captures owned by sibling units are live, not stale
        let siblings = self.slots.lock().keys().filter(|u| *u != unit).count();
        if siblings == 0 {
            if let Err(e) = self.device.kill_stale_captures() {
                warn!(%unit, error = %e, "Could not kill stale captures; continuing");
            }
        } else {
            debug!(%unit, siblings, "Sibling recordings active; not sweeping captures");
        }

        let timestamp = timestamp();
        let remote = remote_recording_path(&self.settings.device_dir, test, &timestamp);
        let capture = match self.device.start_capture(&remote, &self.settings.limits) {
            Ok(capture) => capture,
            Err(e) => {
                warn!(%unit, test, error = %e, "Failed to start screen recording");
                return StartOutcome::skipped(format!("capture failed to start: {e}"));
            }
        };

        self.slots.lock().insert(
            unit.clone(),
            Slot::Recording(ActiveRecording {
                test: test.to_string(),
                remote: remote.clone(),
                timestamp,
                started_at: Utc::now(),
                capture,
            }),
        );
        drop(launch);
        info!(%unit, test, %remote, "Screen recording started");

        if !self.settings.start_delay.is_zero() {
            thread::sleep(self.settings.start_delay);
        }
        StartOutcome::Started { remote }
    }

    /// Keep or drop the unit's recording according to `verdict`.
    ///
    /// Only Passed keeps the recording. Idempotent: a unit with no active
    /// recording is a no-op.
    pub fn finalize(&self, unit: &UnitId, verdict: Verdict) -> FinalizeOutcome {
        let Some(recording) = self.take_recording(unit) else {
            debug!(%unit, %verdict, "No active recording");
            return FinalizeOutcome::Idle;
        };

        let outcome = match verdict {
            Verdict::Passed => self.save(unit, recording),
            _ => {
                self.discard(unit, recording);
                FinalizeOutcome::Discarded
            }
        };
        self.slots.lock().remove(unit);
        outcome
    }

    /// Units with a recording in flight
    pub fn active_units(&self) -> Vec<UnitId> {
        self.slots.lock().keys().cloned().collect()
    }

    /// Take the unit's recording out of its slot, leaving it Finalizing
    fn take_recording(&self, unit: &UnitId) -> Option<ActiveRecording> {
        let mut slots = self.slots.lock();
        match slots.remove(unit) {
            Some(Slot::Recording(recording)) => {
                slots.insert(unit.clone(), Slot::Finalizing);
                Some(recording)
            }
            Some(Slot::Finalizing) => {
                slots.insert(unit.clone(), Slot::Finalizing);
                None
            }
            None => None,
        }
    }

    fn save(&self, unit: &UnitId, mut recording: ActiveRecording) -> FinalizeOutcome {
        if !recording.capture.stop(STOP_GRACE) {
            warn!(%unit, remote = %recording.remote, "Capture did not exit in time; killed it");
        }
        if !self.settings.flush_delay.is_zero() {
            thread::sleep(self.settings.flush_delay);
        }

        let file_name = artifact_name(
            Verdict::Passed.prefix(),
            &recording.test,
            &recording.timestamp,
            "mp4",
        );
        let local = self.output.recordings_dir().join(file_name);
        let saved = match self.retrieve(&recording.remote, &local) {
            Ok(()) => {
                let duration = Utc::now() - recording.started_at;
                info!(
                    %unit,
                    test = %recording.test,
                    path = %local.display(),
                    seconds = duration.num_seconds(),
                    "Recording saved"
                );
                Some(local)
            }
            Err(e) => {
                warn!(%unit, remote = %recording.remote, error = %e, "Failed to retrieve recording");
                None
            }
        };

        self.remove_remote(unit, &recording.remote);
        saved.map_or(FinalizeOutcome::SaveFailed, FinalizeOutcome::Saved)
    }

    fn discard(&self, unit: &UnitId, mut recording: ActiveRecording) {
        recording.capture.terminate(DISCARD_GRACE);
        self.remove_remote(unit, &recording.remote);
        info!(%unit, test = %recording.test, "Recording discarded");
    }

    fn retrieve(&self, remote: &str, local: &std::path::Path) -> ArtifactResult<()> {
        let dir = self.output.recordings_dir();
        fs::create_dir_all(&dir).map_err(|source| ArtifactError::Write { path: dir, source })?;
        self.device.pull(remote, local)?;
        Ok(())
    }

    fn remove_remote(&self, unit: &UnitId, remote: &str) {
        if let Err(e) = self.device.remove(remote) {
            warn!(%unit, %remote, error = %e, "Failed to remove recording from device");
        }
    }
}

impl Drop for RecordingPipeline {
    fn drop(&mut self) {
        let units = self.active_units();
        for unit in units {
            if let Some(recording) = self.take_recording(&unit) {
                self.discard(&unit, recording);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDevice;

    fn settings() -> RecordingSettings {
        RecordingSettings {
            enabled: true,
            start_delay: Duration::ZERO,
            flush_delay: Duration::ZERO,
            ..RecordingSettings::defaults()
        }
    }

    fn pipeline(device: &MockDevice, root: &std::path::Path) -> RecordingPipeline {
        RecordingPipeline::new(
            Arc::new(device.clone()),
            settings(),
            OutputSettings::new(root),
        )
    }

    fn local_files(root: &std::path::Path) -> Vec<String> {
        match fs::read_dir(root.join("recordings")) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    #[test]
    fn test_passed_keeps_one_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockDevice::new();
        let pipeline = pipeline(&device, dir.path());
        let unit = UnitId::new("u1");

        let started = pipeline.start(&unit, "addItem");
        assert!(started.is_started());
        assert_eq!(pipeline.state(&unit), RecordingState::Recording);

        let outcome = pipeline.finalize(&unit, Verdict::Passed);
        let FinalizeOutcome::Saved(path) = outcome else {
            panic!("expected a saved recording, got {outcome:?}");
        };
        assert_eq!(fs::read(&path).unwrap(), MockDevice::PAYLOAD);

        let files = local_files(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("SUCCESS_addItem_"));
        assert!(files[0].ends_with(".mp4"));
        assert!(device.files().is_empty());
        assert_eq!(pipeline.state(&unit), RecordingState::Idle);
    }

    #[test]
    fn test_failed_and_skipped_discard() {
        for verdict in [Verdict::Failed, Verdict::Skipped] {
            let dir = tempfile::tempdir().unwrap();
            let device = MockDevice::new();
            let pipeline = pipeline(&device, dir.path());
            let unit = UnitId::new("u1");

            pipeline.start(&unit, "checkout");
            assert_eq!(pipeline.finalize(&unit, verdict), FinalizeOutcome::Discarded);
            assert!(local_files(dir.path()).is_empty());
            assert!(device.files().is_empty());
            assert!(device.commands().contains(&"terminate".to_string()));
            assert!(!device.commands().iter().any(|c| c.starts_with("pull")));
        }
    }

    #[test]
    fn test_stale_capture_killed_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockDevice::new();
        device.leak_capture("/sdcard/crashed_run.mp4");
        let pipeline = pipeline(&device, dir.path());

        pipeline.start(&UnitId::new("u1"), "addItem");
        let commands = device.commands();
        let kill = commands.iter().position(|c| c == "kill-stale").unwrap();
        let start = commands.iter().position(|c| c.starts_with("start ")).unwrap();
        assert!(kill < start);
        assert_eq!(device.running_captures(), 1);
    }

    #[test]
    fn test_disabled_or_unavailable_stays_idle() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockDevice::new();
        let disabled = RecordingPipeline::new(
            Arc::new(device.clone()),
            RecordingSettings::defaults(),
            OutputSettings::new(dir.path()),
        );
        let unit = UnitId::new("u1");
        assert!(!disabled.start(&unit, "t").is_started());
        assert_eq!(disabled.finalize(&unit, Verdict::Passed), FinalizeOutcome::Idle);

        let offline = MockDevice::disconnected();
        let pipeline = pipeline(&offline, dir.path());
        assert_eq!(
            pipeline.start(&unit, "t"),
            StartOutcome::Skipped {
                reason: "no device connected".into()
            }
        );
        assert_eq!(pipeline.state(&unit), RecordingState::Idle);
        assert!(offline.commands().is_empty());
    }

    #[test]
    fn test_failed_pull_still_removes_device_copy() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockDevice::new();
        let pipeline = pipeline(&device, dir.path());
        let unit = UnitId::new("u1");

        pipeline.start(&unit, "addItem");
        device.fail_pulls(true);
        assert_eq!(pipeline.finalize(&unit, Verdict::Passed), FinalizeOutcome::SaveFailed);
        assert!(device.files().is_empty());
        assert!(local_files(dir.path()).is_empty());
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockDevice::new();
        let pipeline = pipeline(&device, dir.path());
        let unit = UnitId::new("u1");

        pipeline.start(&unit, "addItem");
        assert!(matches!(pipeline.finalize(&unit, Verdict::Passed), FinalizeOutcome::Saved(_)));
        assert_eq!(pipeline.finalize(&unit, Verdict::Passed), FinalizeOutcome::Idle);
        assert_eq!(local_files(dir.path()).len(), 1);
    }

    #[test]
    fn test_units_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockDevice::new();
        let pipeline = pipeline(&device, dir.path());
        let (a, b) = (UnitId::new("a"), UnitId::new("b"));

        pipeline.start(&a, "first");
        pipeline.start(&b, "second");
        assert_eq!(pipeline.finalize(&a, Verdict::Failed), FinalizeOutcome::Discarded);
        assert_eq!(pipeline.state(&b), RecordingState::Recording);
        assert!(matches!(pipeline.finalize(&b, Verdict::Passed), FinalizeOutcome::Saved(_)));
    }

    #[test]
    fn test_sibling_start_keeps_live_capture() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockDevice::new();
        let pipeline = pipeline(&device, dir.path());
        let (a, b) = (UnitId::new("a"), UnitId::new("b"));

        pipeline.start(&a, "first");
        pipeline.start(&b, "second");
        assert_eq!(device.running_captures(), 2);
        let sweeps = device.commands().iter().filter(|c| *c == "kill-stale").count();
        assert_eq!(sweeps, 1);

        assert!(matches!(pipeline.finalize(&a, Verdict::Passed), FinalizeOutcome::Saved(_)));
        assert!(matches!(pipeline.finalize(&b, Verdict::Passed), FinalizeOutcome::Saved(_)));
        assert_eq!(local_files(dir.path()).len(), 2);
    }

    #[test]
    fn test_restart_discards_previous_recording() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockDevice::new();
        let pipeline = pipeline(&device, dir.path());
        let unit = UnitId::new("u1");

        pipeline.start(&unit, "first");
        pipeline.start(&unit, "second");
        assert_eq!(device.files().len(), 1);
        assert!(device.files()[0].contains("second"));
        assert_eq!(pipeline.state(&unit), RecordingState::Recording);
    }
}
