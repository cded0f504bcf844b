//! Test execution: drives each test through its lifecycle and collects the
//! results of a suite run.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::artifact::{RecordingPipeline, Screenshots};
use crate::config::Config;
use crate::device::{DeviceBridge, DeviceControl};
use crate::driver::{AutomationDriver, DriverConnector, WebDriverConnector};
use crate::page::Page;
use crate::report::ReportSink;
use crate::session::{Session, SessionManager, UnitId};
use crate::verdict::{TestOutcome, Verdict, VerdictRouter};
use crate::wait::Waiter;

/// Why a test body did not pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestFailure {
    Failed(String),
    Skipped(String),
}

impl TestFailure {
    pub fn failed(message: impl Into<String>) -> Self {
        TestFailure::Failed(message.into())
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        TestFailure::Skipped(reason.into())
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestFailure::Failed(m) => write!(f, "{m}"),
            TestFailure::Skipped(m) => write!(f, "skipped: {m}"),
        }
    }
}

// Any error raised in a test body fails the test
impl<E: std::error::Error> From<E> for TestFailure {
    fn from(e: E) -> Self {
        TestFailure::Failed(e.to_string())
    }
}

/// Result type returned by test bodies
pub type TestResult = Result<(), TestFailure>;

/// Fail the test unless `condition` holds
pub fn ensure(condition: bool, message: impl Into<String>) -> TestResult {
    if condition {
        Ok(())
    } else {
        Err(TestFailure::Failed(message.into()))
    }
}

/// What a running test body can reach
pub struct TestContext {
    unit: UnitId,
    page: Page,
    screenshots: Screenshots,
}

impl TestContext {
    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    pub fn name(&self) -> &str {
        self.page.test()
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn session(&self) -> &Arc<Session> {
        self.page.session()
    }

    pub fn driver(&self) -> &dyn AutomationDriver {
        self.page.driver()
    }

    pub fn waiter(&self) -> &Waiter {
        self.page.waiter()
    }

    /// Ad-hoc labelled screenshot; failures are logged, not raised
    pub fn screenshot(&self, label: &str) -> Option<PathBuf> {
        match self.screenshots.capture_named(self.driver(), self.name(), label) {
            Ok(manifest) => Some(manifest.image_path),
            Err(e) => {
                warn!(unit = %self.unit, label, error = %e, "Screenshot failed");
                None
            }
        }
    }
}

type TestBody<'a> = Box<dyn FnOnce(&TestContext) -> TestResult + Send + 'a>;

/// A named test body for [`TestRunner::run_parallel`]
pub struct TestCase<'a> {
    pub name: String,
    body: TestBody<'a>,
}

impl<'a> TestCase<'a> {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(&TestContext) -> TestResult + Send + 'a,
    {
        Self {
            name: name.into(),
            body: Box::new(body),
        }
    }
}

/// Totals for a suite run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<TestOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PathBuf>,
}

impl RunSummary {
    /// No test failed
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Runs tests with unconditional teardown
pub struct TestRunner {
    router: Arc<VerdictRouter>,
    waiter: Waiter,
    screenshots: Screenshots,
    outcomes: Mutex<Vec<TestOutcome>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl TestRunner {
    pub fn new(router: Arc<VerdictRouter>, waiter: Waiter, screenshots: Screenshots) -> Self {
        Self {
            router,
            waiter,
            screenshots,
            outcomes: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
        }
    }

    /// Wire every component from `config` over the given backends
    pub fn from_config(
        config: &Config,
        connector: Arc<dyn DriverConnector>,
        device: Arc<dyn DeviceControl>,
        reporter: Arc<dyn ReportSink>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(
            config.driver.server_url.clone(),
            connector,
        ));
        let recordings = Arc::new(RecordingPipeline::new(
            device,
            config.recording.clone(),
            config.output.clone(),
        ));
        let screenshots = Screenshots::new(&config.output);
        let router = VerdictRouter::new(
            sessions,
            recordings,
            screenshots.clone(),
            reporter,
            config.driver.capabilities.clone(),
        );
        Self::new(Arc::new(router), Waiter::new(config.wait.clone()), screenshots)
    }

    /// WebDriver backend and `adb` device from `config`
    pub fn connect(config: &Config, reporter: Arc<dyn ReportSink>) -> Self {
        let connector = WebDriverConnector::new().implicit_wait(config.driver.implicit_wait);
        let bridge = DeviceBridge::new(config.recording.program.clone())
            .with_serial(config.recording.serial.clone());
        Self::from_config(config, Arc::new(connector), Arc::new(bridge), reporter)
    }

    pub fn router(&self) -> &Arc<VerdictRouter> {
        &self.router
    }

    /// Mark the start of a suite; outcomes from earlier runs are dropped
    pub fn start_suite(&self) {
        *self.started_at.lock() = Some(Utc::now());
        self.outcomes.lock().clear();
        info!("Test suite started");
    }

    /// Run one test on the calling thread.
    ///
    /// Started is signalled before `body` and exactly one terminal verdict
    /// after it, whether the body returns, fails or panics.
    pub fn run<F>(&self, name: &str, body: F) -> TestOutcome
    where
        F: FnOnce(&TestContext) -> TestResult,
    {
        let unit = UnitId::unique(name);
        let reporter = Arc::clone(self.router.reporter());

        let session = match self.router.on_start(&unit, name) {
            Ok(session) => session,
            Err(e) => {
                error!(%unit, test = name, error = %e, "Could not open session");
                return self.record(&unit, name, Verdict::Failed, Some(e.to_string()));
            }
        };

        let context = TestContext {
            unit: unit.clone(),
            page: Page::new(session, self.waiter.clone(), reporter, name),
            screenshots: self.screenshots.clone(),
        };

        let (verdict, message) = match panic::catch_unwind(AssertUnwindSafe(|| body(&context))) {
            Ok(Ok(())) => (Verdict::Passed, None),
            Ok(Err(TestFailure::Failed(message))) => (Verdict::Failed, Some(message)),
            Ok(Err(TestFailure::Skipped(reason))) => (Verdict::Skipped, Some(reason)),
            Err(payload) => (Verdict::Failed, Some(panic_message(payload.as_ref()))),
        };
        drop(context);

        self.record(&unit, name, verdict, message)
    }

    /// Run every case on its own thread, one execution unit each
    pub fn run_parallel(&self, cases: Vec<TestCase<'_>>) -> Vec<TestOutcome> {
        thread::scope(|scope| {
            let handles: Vec<_> = cases
                .into_iter()
                .map(|case| {
                    let TestCase { name, body } = case;
                    scope.spawn(move || self.run(&name, body))
                })
                .collect();

            handles
                .into_iter()
                .filter_map(|handle| match handle.join() {
                    Ok(outcome) => Some(outcome),
                    Err(_) => {
                        error!("Test thread panicked outside the test body");
                        None
                    }
                })
                .collect()
        })
    }

    /// Flush the report sink and summarize the suite
    pub fn finish_suite(&self) -> RunSummary {
        let outcomes = self.outcomes.lock().clone();
        let count = |v: Verdict| outcomes.iter().filter(|o| o.verdict == v).count();

        let report = match self.router.reporter().flush() {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Failed to write report");
                None
            }
        };

        let finished_at = Utc::now();
        let summary = RunSummary {
            started_at: self.started_at.lock().unwrap_or(finished_at),
            finished_at,
            total: outcomes.len(),
            passed: count(Verdict::Passed),
            failed: count(Verdict::Failed),
            skipped: count(Verdict::Skipped),
            outcomes,
            report,
        };
        info!(
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            "Test suite finished"
        );
        summary
    }

    fn record(&self, unit: &UnitId, name: &str, verdict: Verdict, message: Option<String>) -> TestOutcome {
        let outcome = self
            .router
            .on_terminal(unit, verdict, message.as_deref())
            .unwrap_or_else(|| TestOutcome {
                unit: unit.clone(),
                test: name.to_string(),
                verdict,
                duration: Duration::ZERO,
                message,
                screenshot: None,
                recording: None,
            });
        self.outcomes.lock().push(outcome.clone());
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    format!("panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DriverSettings, OutputSettings, RecordingSettings, WaitSettings};
    use crate::device::MockDevice;
    use crate::driver::{AppReference, Capabilities, Locator, MockConnector, MockElement};
    use crate::report::MemoryReporter;

    fn config(root: &std::path::Path) -> Config {
        Config {
            driver: DriverSettings {
                server_url: "http://127.0.0.1:4723".into(),
                capabilities: Capabilities::new("Android", "emulator-1", AppReference::binary("a.apk")),
                implicit_wait: Duration::ZERO,
            },
            wait: WaitSettings {
                timeout: Duration::from_millis(200),
                poll_interval: Duration::from_millis(20),
                settle: Duration::ZERO,
                page_settle: Duration::ZERO,
                probe_timeout: Duration::from_millis(50),
            },
            recording: RecordingSettings {
                enabled: true,
                start_delay: Duration::ZERO,
                flush_delay: Duration::ZERO,
                ..RecordingSettings::defaults()
            },
            output: OutputSettings::new(root),
        }
    }

    fn runner(root: &std::path::Path) -> (TestRunner, MockConnector, MockDevice) {
        let connector = MockConnector::default();
        let device = MockDevice::new();
        let runner = TestRunner::from_config(
            &config(root),
            Arc::new(connector.clone()),
            Arc::new(device.clone()),
            Arc::new(MemoryReporter::new()),
        );
        (runner, connector, device)
    }

    #[test]
    fn test_body_results_map_to_verdicts() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, connector, device) = runner(dir.path());
        connector
            .screen()
            .add(Locator::id("title"), MockElement::new("Lists"));

        runner.start_suite();
        let passed = runner.run("opens", |ctx| {
            ensure(ctx.page().text(&Locator::id("title"))? == "Lists", "wrong title")
        });
        let failed = runner.run("missing", |ctx| {
            ctx.page().click(&Locator::id("nope"))?;
            Ok(())
        });
        let skipped = runner.run("tablet", |_| Err(TestFailure::skipped("phone only")));

        assert_eq!(passed.verdict, Verdict::Passed);
        assert!(passed.recording.is_some());
        assert_eq!(failed.verdict, Verdict::Failed);
        assert!(failed.message.unwrap().contains("By.id: nope"));
        assert!(failed.screenshot.is_some());
        assert_eq!(skipped.verdict, Verdict::Skipped);

        let summary = runner.finish_suite();
        assert_eq!((summary.total, summary.passed, summary.failed, summary.skipped), (3, 1, 1, 1));
        assert!(!summary.success());
        assert_eq!(connector.live_sessions(), 0);
        assert!(device.files().is_empty());
    }

    #[test]
    fn test_panic_still_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, connector, device) = runner(dir.path());

        let outcome = runner.run("explodes", |_| panic!("index out of range"));
        assert_eq!(outcome.verdict, Verdict::Failed);
        assert_eq!(outcome.message.as_deref(), Some("panicked: index out of range"));
        assert_eq!(connector.sessions_created(), 1);
        assert_eq!(connector.live_sessions(), 0);
        assert!(device.files().is_empty());
        assert_eq!(runner.router().running_units(), 0);
    }

    #[test]
    fn test_unreachable_backend_fails_only_that_test() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, connector, _) = runner(dir.path());
        connector.set_unreachable(true);
        let outcome = runner.run("addItem", |_| Ok(()));
        assert_eq!(outcome.verdict, Verdict::Failed);
        assert!(outcome.message.unwrap().contains("Failed to create session"));

        connector.set_unreachable(false);
        assert_eq!(runner.run("addItem", |_| Ok(())).verdict, Verdict::Passed);
    }

    #[test]
    fn test_run_parallel_isolates_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, connector, _) = runner(dir.path());
        let seen = Mutex::new(Vec::new());

        let cases = (0..4)
            .map(|i| {
                let seen = &seen;
                TestCase::new(format!("case{i}"), move |ctx: &TestContext| {
                    seen.lock().push(ctx.session().session_id().to_string());
                    Ok(())
                })
            })
            .collect();
        let outcomes = runner.run_parallel(cases);

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| o.verdict == Verdict::Passed));
        let mut ids = seen.into_inner();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        assert_eq!(connector.live_sessions(), 0);
    }

    #[test]
    fn test_summary_serializes() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _, _) = runner(dir.path());
        runner.start_suite();
        runner.run("addItem", |_| Ok(()));
        let summary = runner.finish_suite();
        assert!(summary.success());

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["passed"], 1);
        assert_eq!(json["outcomes"][0]["verdict"], "passed");
    }
}
