//! Write-only test reporting.
//!
//! Tests and the verdict router emit info/pass/fail/warn/skip events through
//! a [`ReportSink`]. Rendering is left to the sink.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::artifact::timestamp;

/// Result type for report output
pub type ReportResult<T> = Result<T, ReportError>;

/// Error types for report output
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Info,
    Pass,
    Fail,
    Warn,
    Skip,
}

impl EventKind {
    /// Pass, fail and skip close a test
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::Pass | EventKind::Fail | EventKind::Skip)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Info => "INFO",
            EventKind::Pass => "PASS",
            EventKind::Fail => "FAIL",
            EventKind::Warn => "WARN",
            EventKind::Skip => "SKIP",
        };
        f.write_str(s)
    }
}

/// One report entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEvent {
    pub test: String,
    pub kind: EventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

impl ReportEvent {
    pub fn new(test: &str, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            test: test.to_string(),
            kind,
            message: message.into(),
            screenshot: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_screenshot(mut self, path: Option<&Path>) -> Self {
        self.screenshot = path.map(Path::to_path_buf);
        self
    }
}

/// Receiver of test report events
pub trait ReportSink: Send + Sync {
    fn record(&self, event: ReportEvent);

    fn info(&self, test: &str, message: &str) {
        self.record(ReportEvent::new(test, EventKind::Info, message));
    }

    fn pass(&self, test: &str, message: &str) {
        self.record(ReportEvent::new(test, EventKind::Pass, message));
    }

    fn fail(&self, test: &str, message: &str, screenshot: Option<&Path>) {
        self.record(ReportEvent::new(test, EventKind::Fail, message).with_screenshot(screenshot));
    }

    fn warn(&self, test: &str, message: &str) {
        self.record(ReportEvent::new(test, EventKind::Warn, message));
    }

    fn skip(&self, test: &str, message: &str) {
        self.record(ReportEvent::new(test, EventKind::Skip, message));
    }

    /// Persist buffered events; returns the written file, if any
    fn flush(&self) -> ReportResult<Option<PathBuf>> {
        Ok(None)
    }
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ReportSink for TracingReporter {
    fn record(&self, event: ReportEvent) {
        let test = event.test.as_str();
        let message = event.message.as_str();
        match event.kind {
            EventKind::Info => info!(test, "{message}"),
            EventKind::Pass => info!(test, result = "pass", "{message}"),
            EventKind::Skip => warn!(test, result = "skip", "{message}"),
            EventKind::Warn => warn!(test, "{message}"),
            EventKind::Fail => match &event.screenshot {
                Some(path) => error!(test, result = "fail", screenshot = %path.display(), "{message}"),
                None => error!(test, result = "fail", "{message}"),
            },
        }
    }
}

/// Keeps events in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryReporter {
    events: Arc<Mutex<Vec<ReportEvent>>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, test: &str) -> Vec<ReportEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.test == test)
            .cloned()
            .collect()
    }

    /// Kinds of the events recorded for `test`, in order
    pub fn kinds_for(&self, test: &str) -> Vec<EventKind> {
        self.events_for(test).into_iter().map(|e| e.kind).collect()
    }
}

impl ReportSink for MemoryReporter {
    fn record(&self, event: ReportEvent) {
        self.events.lock().push(event);
    }
}

/// Host details stamped on JSON reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub host: String,
    pub os: String,
    pub arch: String,
    pub family: String,
}

impl SystemInfo {
    pub fn current() -> Self {
        Self {
            host: get_hostname(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            family: std::env::consts::FAMILY.to_string(),
        }
    }
}

fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Per-test section of a JSON report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub name: String,
    /// Last terminal event kind, if the test finished
    pub status: Option<EventKind>,
    pub events: Vec<ReportEvent>,
}

/// Serialized JSON report document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub generated_at: DateTime<Utc>,
    pub system: SystemInfo,
    pub tests: Vec<TestReport>,
}

/// Collects events and writes them as `reports/report_<timestamp>.json`
#[derive(Debug)]
pub struct JsonReport {
    dir: PathBuf,
    system: SystemInfo,
    events: Mutex<Vec<ReportEvent>>,
}

impl JsonReport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_system(dir, SystemInfo::current())
    }

    pub fn with_system(dir: impl Into<PathBuf>, system: SystemInfo) -> Self {
        Self {
            dir: dir.into(),
            system,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Group the buffered events by test, in order of first appearance
    pub fn document(&self) -> ReportDocument {
        let events = self.events.lock().clone();
        let mut order: Vec<String> = Vec::new();
        let mut grouped: BTreeMap<String, Vec<ReportEvent>> = BTreeMap::new();
        for event in events {
            if !grouped.contains_key(&event.test) {
                order.push(event.test.clone());
            }
            grouped.entry(event.test.clone()).or_default().push(event);
        }

        let tests = order
            .into_iter()
            .filter_map(|name| {
                let events = grouped.remove(&name)?;
                let status = events.iter().rev().map(|e| e.kind).find(|k| k.is_terminal());
                Some(TestReport {
                    name,
                    status,
                    events,
                })
            })
            .collect();

        ReportDocument {
            generated_at: Utc::now(),
            system: self.system.clone(),
            tests,
        }
    }
}

impl ReportSink for JsonReport {
    fn record(&self, event: ReportEvent) {
        self.events.lock().push(event);
    }

    fn flush(&self) -> ReportResult<Option<PathBuf>> {
        let document = self.document();
        fs::create_dir_all(&self.dir).map_err(|source| ReportError::Write {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.dir.join(format!("report_{}.json", timestamp()));
        fs::write(&path, serde_json::to_string_pretty(&document)?).map_err(|source| {
            ReportError::Write {
                path: path.clone(),
                source,
            }
        })?;
        info!(path = %path.display(), tests = document.tests.len(), "Report written");
        Ok(Some(path))
    }
}

/// Sends every event to each inner sink
#[derive(Default, Clone)]
pub struct Fanout {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ReportSink for Fanout {
    fn record(&self, event: ReportEvent) {
        for sink in &self.sinks {
            sink.record(event.clone());
        }
    }

    /// Flushes every sink; returns the first written path or the first error
    fn flush(&self) -> ReportResult<Option<PathBuf>> {
        let mut written = None;
        let mut first_error = None;
        for sink in &self.sinks {
            match sink.flush() {
                Ok(path) => written = written.or(path),
                Err(e) => {
                    warn!(error = %e, "Report sink failed to flush");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_current_system_info_names_host() {
        let info = SystemInfo::current();
        assert!(!info.host.is_empty());
        assert_eq!(info.os.as_str(), std::env::consts::OS);
    }

    fn system() -> SystemInfo {
        SystemInfo {
            host: "ci-runner".into(),
            os: "linux".into(),
            arch: "x86_64".into(),
            family: "unix".into(),
        }
    }

    #[test]
    fn test_memory_reporter_records_in_order() {
        let reporter = MemoryReporter::new();
        reporter.info("addItem", "Clicking By.id: add");
        reporter.pass("addItem", "Test passed");
        reporter.warn("other", "slow");

        assert_eq!(reporter.kinds_for("addItem"), vec![EventKind::Info, EventKind::Pass]);
        assert_eq!(reporter.events().len(), 3);
    }

    #[test]
    fn test_json_report_groups_by_test() {
        let report = JsonReport::with_system("unused", system());
        report.info("b", "step");
        report.info("a", "step");
        report.fail("b", "boom", Some(Path::new("shots/FAILED_b.png")));
        report.skip("a", "not supported");

        let doc = report.document();
        let names: Vec<_> = doc.tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(doc.tests[0].status, Some(EventKind::Fail));
        assert_eq!(doc.tests[1].status, Some(EventKind::Skip));
        assert_eq!(
            doc.tests[0].events[1].screenshot.as_deref(),
            Some(Path::new("shots/FAILED_b.png"))
        );
    }

    #[test]
    fn test_json_report_flush_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let report = JsonReport::with_system(dir.path().join("reports"), system());
        report.pass("addItem", "ok");

        let path = report.flush().unwrap().unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("report_") && name.ends_with(".json"));

        let doc: ReportDocument = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(doc.system, system());
        assert_eq!(doc.tests.len(), 1);
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = MemoryReporter::new();
        let b = MemoryReporter::new();
        let fanout = Fanout::new()
            .with(Arc::new(a.clone()))
            .with(Arc::new(b.clone()))
            .with(Arc::new(TracingReporter));
        fanout.fail("t", "broken", None);

        assert_eq!(a.kinds_for("t"), vec![EventKind::Fail]);
        assert_eq!(b.kinds_for("t"), vec![EventKind::Fail]);
        assert_eq!(fanout.flush().unwrap(), None);
    }
}
