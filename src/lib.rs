//! Mobile Harness - UI test execution for mobile apps over Appium.
//!
//! This crate provides:
//! - One automation session per concurrently running test
//! - Bounded polling waits against an asynchronously rendering UI
//! - Screen recordings kept or discarded by test verdict
//! - Failure screenshots and JSON reports
//! - Mock driver and mock device for testing without hardware
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mobile_harness::{Config, Locator, TestRunner, TracingReporter, ensure};
//!
//! let config = Config::load(None).unwrap();
//! let runner = TestRunner::connect(&config, Arc::new(TracingReporter));
//! runner.start_suite();
//! runner.run("createList", |ctx| {
//!     let page = ctx.page();
//!     page.click(&Locator::accessibility_id("New list"))?;
//!     page.send_keys(&Locator::id("com.example:id/name"), "Groceries")?;
//!     let title = page.text(&Locator::id("com.example:id/title"))?;
//!     ensure(title == "Groceries", format!("unexpected title {title}"))
//! });
//! let summary = runner.finish_suite();
//! assert!(summary.success());
//! ```

pub mod artifact;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod logging;
pub mod page;
pub mod report;
pub mod runner;
pub mod session;
pub mod verdict;
pub mod wait;

// Re-export configuration
pub use config::{Config, ConfigError, ConfigProvider, ConfigResult, EnvProvider, LayeredProvider, PropertiesProvider};

// Re-export driver types
pub use driver::{
    AppReference, AutomationDriver, Capabilities, DriverConnector, DriverError, DriverResult,
    ElementRef, Locator, MockConnector, MockDriver, MockElement, MockScreen, WebDriverConnector,
};

// Re-export device bridge
pub use device::{BridgeError, BridgeResult, DeviceBridge, DeviceControl, MockDevice};

// Re-export lifecycle types
pub use artifact::{FinalizeOutcome, RecordingPipeline, Screenshots, StartOutcome};
pub use error::{HarnessError, HarnessResult};
pub use page::{Page, random_name};
pub use report::{EventKind, Fanout, JsonReport, MemoryReporter, ReportSink, TracingReporter};
pub use runner::{RunSummary, TestCase, TestContext, TestFailure, TestResult, TestRunner, ensure};
pub use session::{Session, SessionError, SessionManager, UnitId};
pub use verdict::{TestOutcome, Verdict, VerdictRouter};
pub use wait::{WaitError, WaitResult, Waiter, wait_until};
