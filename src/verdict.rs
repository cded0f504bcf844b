//! Routes test lifecycle signals to the session manager, the recording
//! pipeline and the report sink.
//!
//! A test produces one `Started` signal and, later, one terminal verdict.
//! The router keeps the per-unit bookkeeping between the two. Teardown on a
//! terminal verdict always runs in the same order:
//!
//! 1. failure screenshot (Failed only, while the session is still open)
//! 2. report event
//! 3. recording finalize (keep on Passed, drop otherwise)
//! 4. session close

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::{FinalizeOutcome, RecordingPipeline, Screenshots};
use crate::driver::Capabilities;
use crate::report::ReportSink;
use crate::session::{Session, SessionManager, SessionResult, UnitId};

/// Lifecycle signal for one test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Started,
    Passed,
    Failed,
    Skipped,
}

impl Verdict {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Verdict::Started)
    }

    /// File name prefix for artifacts kept under this verdict
    pub fn prefix(self) -> &'static str {
        match self {
            Verdict::Started => "STARTED",
            Verdict::Passed => "SUCCESS",
            Verdict::Failed => "FAILED",
            Verdict::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Started => "started",
            Verdict::Passed => "passed",
            Verdict::Failed => "failed",
            Verdict::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Everything that happened to one finished test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub unit: UnitId,
    pub test: String,
    pub verdict: Verdict,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording: Option<PathBuf>,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

struct RunningTest {
    test: String,
    started: Instant,
}

/// Dispatches lifecycle signals for every execution unit
pub struct VerdictRouter {
    sessions: Arc<SessionManager>,
    recordings: Arc<RecordingPipeline>,
    screenshots: Screenshots,
    reporter: Arc<dyn ReportSink>,
    capabilities: Capabilities,
    running: Mutex<HashMap<UnitId, RunningTest>>,
}

impl VerdictRouter {
    pub fn new(
        sessions: Arc<SessionManager>,
        recordings: Arc<RecordingPipeline>,
        screenshots: Screenshots,
        reporter: Arc<dyn ReportSink>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            sessions,
            recordings,
            screenshots,
            reporter,
            capabilities,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn recordings(&self) -> &Arc<RecordingPipeline> {
        &self.recordings
    }

    pub fn reporter(&self) -> &Arc<dyn ReportSink> {
        &self.reporter
    }

    /// Units between Started and their terminal verdict
    pub fn running_units(&self) -> usize {
        self.running.lock().len()
    }

    /// Handle `Started`: open the session, then start recording.
    ///
    /// A unit that is still running from an earlier Started is finalized as
    /// Skipped first. A session failure is returned to the caller; the unit
    /// stays registered so its terminal verdict is still routed.
    pub fn on_start(&self, unit: &UnitId, test: &str) -> SessionResult<Arc<Session>> {
        let previous = self.running.lock().insert(
            unit.clone(),
            RunningTest {
                test: test.to_string(),
                started: Instant::now(),
            },
        );
        if let Some(stale) = previous {
            warn!(%unit, stale = %stale.test, test, "Duplicate start; finalizing previous test");
            self.teardown(unit, stale, Verdict::Skipped, Some("superseded by a new start"));
        }

        info!(%unit, test, "Test started");
        self.reporter.info(test, "Test started");

        let session = self.sessions.open_session(unit, self.capabilities.clone())?;
        self.recordings.start(unit, test);
        Ok(session)
    }

    pub fn on_success(&self, unit: &UnitId) -> Option<TestOutcome> {
        self.on_terminal(unit, Verdict::Passed, None)
    }

    pub fn on_failure(&self, unit: &UnitId, message: &str) -> Option<TestOutcome> {
        self.on_terminal(unit, Verdict::Failed, Some(message))
    }

    pub fn on_skip(&self, unit: &UnitId, reason: &str) -> Option<TestOutcome> {
        self.on_terminal(unit, Verdict::Skipped, Some(reason))
    }

    /// Handle a terminal verdict. Never fails.
    ///
    /// Returns `None` when the unit was never started (or the verdict is not
    /// terminal); the signal is logged and otherwise ignored.
    pub fn on_terminal(&self, unit: &UnitId, verdict: Verdict, message: Option<&str>) -> Option<TestOutcome> {
        if !verdict.is_terminal() {
            warn!(%unit, "Started is not a terminal verdict; ignoring");
            return None;
        }
        let Some(running) = self.running.lock().remove(unit) else {
            warn!(%unit, %verdict, "Verdict for a unit that never started; ignoring");
            return None;
        };
        Some(self.teardown(unit, running, verdict, message))
    }

    fn teardown(
        &self,
        unit: &UnitId,
        running: RunningTest,
        verdict: Verdict,
        message: Option<&str>,
    ) -> TestOutcome {
        let test = running.test.as_str();

        let screenshot = match verdict {
            Verdict::Failed => self.failure_screenshot(unit, test),
            _ => None,
        };

        match verdict {
            Verdict::Passed => self.reporter.pass(test, message.unwrap_or("Test passed")),
            Verdict::Failed => {
                self.reporter
                    .fail(test, message.unwrap_or("Test failed"), screenshot.as_deref())
            }
            Verdict::Skipped => self.reporter.skip(test, message.unwrap_or("Test skipped")),
            Verdict::Started => {}
        }

        let recording = match self.recordings.finalize(unit, verdict) {
            FinalizeOutcome::Saved(path) => Some(path),
            FinalizeOutcome::SaveFailed => {
                self.reporter.warn(test, "Recording could not be retrieved");
                None
            }
            FinalizeOutcome::Idle | FinalizeOutcome::Discarded => None,
        };

        self.sessions.close_session(unit);

        let duration = running.started.elapsed();
        info!(%unit, test, %verdict, ?duration, "Test finished");
        TestOutcome {
            unit: unit.clone(),
            test: running.test,
            verdict,
            duration,
            message: message.map(str::to_string),
            screenshot,
            recording,
        }
    }

    fn failure_screenshot(&self, unit: &UnitId, test: &str) -> Option<PathBuf> {
        let session = match self.sessions.current_session(unit) {
            Ok(session) => session,
            Err(e) => {
                debug!(%unit, error = %e, "No session for failure screenshot");
                return None;
            }
        };
        match self.screenshots.capture_failure(session.driver(), test) {
            Ok(manifest) => Some(manifest.image_path),
            Err(e) => {
                warn!(%unit, test, error = %e, "Failed to capture failure screenshot");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputSettings, RecordingSettings};
    use crate::device::MockDevice;
    use crate::driver::{AppReference, MockConnector};
    use crate::report::{EventKind, MemoryReporter};

    struct Fixture {
        router: VerdictRouter,
        connector: MockConnector,
        device: MockDevice,
        reporter: MemoryReporter,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputSettings::new(dir.path());
        let connector = MockConnector::default();
        let device = MockDevice::new();
        let reporter = MemoryReporter::new();
        let settings = RecordingSettings {
            enabled: true,
            start_delay: Duration::ZERO,
            flush_delay: Duration::ZERO,
            ..RecordingSettings::defaults()
        };
        let router = VerdictRouter::new(
            Arc::new(SessionManager::new("http://127.0.0.1:4723", Arc::new(connector.clone()))),
            Arc::new(RecordingPipeline::new(Arc::new(device.clone()), settings, output.clone())),
            Screenshots::new(&output),
            Arc::new(reporter.clone()),
            Capabilities::new("Android", "emulator-1", AppReference::binary("/apps/shop.apk")),
        );
        Fixture {
            router,
            connector,
            device,
            reporter,
            _dir: dir,
        }
    }

    #[test]
    fn test_passed_keeps_recording_and_closes_session() {
        let f = fixture();
        let unit = UnitId::new("u1");
        f.router.on_start(&unit, "addItem").unwrap();
        assert_eq!(f.connector.live_sessions(), 1);

        let outcome = f.router.on_success(&unit).unwrap();
        assert_eq!(outcome.verdict, Verdict::Passed);
        assert!(outcome.recording.unwrap().exists());
        assert!(outcome.screenshot.is_none());
        assert_eq!(f.connector.live_sessions(), 0);
        assert!(f.device.files().is_empty());
        assert_eq!(f.reporter.kinds_for("addItem"), vec![EventKind::Info, EventKind::Pass]);
    }

    #[test]
    fn test_failed_takes_screenshot_before_close() {
        let f = fixture();
        let unit = UnitId::new("u1");
        f.router.on_start(&unit, "checkout").unwrap();

        let outcome = f.router.on_failure(&unit, "total mismatch").unwrap();
        let shot = outcome.screenshot.unwrap();
        assert!(shot.exists());
        assert!(outcome.recording.is_none());
        assert!(f.device.files().is_empty());

        let fail = f.reporter.events_for("checkout").pop().unwrap();
        assert_eq!(fail.kind, EventKind::Fail);
        assert_eq!(fail.message, "total mismatch");
        assert_eq!(fail.screenshot, Some(shot));
    }

    #[test]
    fn test_terminal_without_start_is_ignored() {
        let f = fixture();
        assert!(f.router.on_success(&UnitId::new("ghost")).is_none());
        assert!(f.router.on_terminal(&UnitId::new("ghost"), Verdict::Started, None).is_none());
        assert!(f.reporter.events().is_empty());
    }

    #[test]
    fn test_duplicate_start_finalizes_stale_state() {
        let f = fixture();
        let unit = UnitId::new("u1");
        f.router.on_start(&unit, "first").unwrap();
        f.router.on_start(&unit, "second").unwrap();

        assert_eq!(f.reporter.kinds_for("first"), vec![EventKind::Info, EventKind::Skip]);
        assert_eq!(f.connector.live_sessions(), 1);
        assert_eq!(f.router.running_units(), 1);

        f.router.on_skip(&unit, "not supported").unwrap();
        assert_eq!(f.connector.live_sessions(), 0);
        assert!(f.device.files().is_empty());
    }

    #[test]
    fn test_session_failure_still_routes_terminal() {
        let f = fixture();
        f.connector.set_unreachable(true);
        let unit = UnitId::new("u1");
        assert!(f.router.on_start(&unit, "addItem").is_err());
        assert!(f.device.commands().is_empty());

        let outcome = f.router.on_failure(&unit, "no session").unwrap();
        assert!(outcome.screenshot.is_none());
        assert_eq!(f.router.running_units(), 0);
    }

    #[test]
    fn test_verdict_prefix_and_display() {
        assert_eq!(Verdict::Passed.prefix(), "SUCCESS");
        assert_eq!(Verdict::Failed.prefix(), "FAILED");
        assert_eq!(Verdict::Skipped.to_string(), "skipped");
        assert!(!Verdict::Started.is_terminal());
    }
}
