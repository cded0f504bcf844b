//! Bounded polling against an asynchronously rendering UI.
//!
//! Every page-level operation goes through [`Waiter::until`]: the predicate is
//! evaluated at poll boundaries until it yields a value or the timeout is
//! reached. The final evaluation happens at the timeout bound, so a wait never
//! overruns by more than one poll interval.
//!
//! Not-found and stale-element conditions mean "not yet". Any other driver
//! error aborts the wait immediately.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace};

use crate::config::WaitSettings;
use crate::driver::{AutomationDriver, DriverError, DriverResult, ElementRef, Locator};

/// Lower bound on the poll interval, so a zero setting cannot spin
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Result type for wait operations
pub type WaitResult<T> = Result<T, WaitError>;

/// Error types for wait operations
#[derive(Error, Debug)]
pub enum WaitError {
    #[error("Timed out after {elapsed:?} waiting for {description} (limit {timeout:?})")]
    Timeout {
        description: String,
        timeout: Duration,
        elapsed: Duration,
        /// Last "not yet" condition reported by the backend
        last_error: Option<String>,
    },

    #[error("{description} failed: {source}")]
    Driver {
        description: String,
        #[source]
        source: DriverError,
    },
}

impl WaitError {
    fn driver(description: impl Into<String>, source: DriverError) -> Self {
        WaitError::Driver {
            description: description.into(),
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }

    /// The action failed on a stale element reference
    pub fn is_stale(&self) -> bool {
        matches!(self, WaitError::Driver { source, .. } if source.is_stale())
    }
}

/// Poll `predicate` every `poll_interval` until it returns `Some` or
/// `timeout` elapses.
pub fn wait_until<T, F>(
    timeout: Duration,
    poll_interval: Duration,
    description: &str,
    mut predicate: F,
) -> WaitResult<T>
where
    F: FnMut() -> DriverResult<Option<T>>,
{
    let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
    let start = Instant::now();
    let mut last_error = None;

    loop {
        match predicate() {
            Ok(Some(value)) => {
                trace!(description, elapsed = ?start.elapsed(), "Wait satisfied");
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) if e.is_not_found() || e.is_stale() => last_error = Some(e.to_string()),
            Err(e) => return Err(WaitError::driver(description, e)),
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            debug!(description, ?elapsed, "Wait timed out");
            return Err(WaitError::Timeout {
                description: description.to_string(),
                timeout,
                elapsed,
                last_error,
            });
        }
        thread::sleep(poll_interval.min(timeout - elapsed));
    }
}

/// Synchronization engine configured with timeouts and settle delays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waiter {
    settings: WaitSettings,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new(WaitSettings::defaults())
    }
}

impl Waiter {
    pub fn new(settings: WaitSettings) -> Self {
        Self { settings }
    }

    /// A copy of this waiter with a different timeout
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut settings = self.settings.clone();
        settings.timeout = timeout;
        Self { settings }
    }

    pub fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.settings.poll_interval
    }

    /// [`wait_until`] with this waiter's timeout and poll interval
    pub fn until<T, F>(&self, description: &str, predicate: F) -> WaitResult<T>
    where
        F: FnMut() -> DriverResult<Option<T>>,
    {
        wait_until(
            self.settings.timeout,
            self.settings.poll_interval,
            description,
            predicate,
        )
    }

    /// Wait until the element is displayed and return it
    pub fn visible(&self, driver: &dyn AutomationDriver, locator: &Locator) -> WaitResult<ElementRef> {
        self.until(&format!("visibility of {locator}"), || {
            let element = driver.find_element(locator)?;
            Ok(driver.is_displayed(&element)?.then_some(element))
        })
    }

    /// Wait until the element is displayed and enabled
    pub fn clickable(&self, driver: &dyn AutomationDriver, locator: &Locator) -> WaitResult<ElementRef> {
        self.until(&format!("clickability of {locator}"), || {
            let element = driver.find_element(locator)?;
            let ready = driver.is_displayed(&element)? && driver.is_enabled(&element)?;
            Ok(ready.then_some(element))
        })
    }

    /// Wait until the element exists, displayed or not
    pub fn present(&self, driver: &dyn AutomationDriver, locator: &Locator) -> WaitResult<ElementRef> {
        self.until(&format!("presence of {locator}"), || {
            driver.find_element(locator).map(Some)
        })
    }

    /// Wait until the element is gone or hidden
    pub fn absent(&self, driver: &dyn AutomationDriver, locator: &Locator) -> WaitResult<()> {
        self.until(&format!("invisibility of {locator}"), || {
            let element = match driver.find_element(locator) {
                Ok(element) => element,
                Err(e) if e.is_not_found() => return Ok(Some(())),
                Err(e) => return Err(e),
            };
            match driver.is_displayed(&element) {
                Ok(displayed) => Ok((!displayed).then_some(())),
                Err(e) if e.is_stale() || e.is_not_found() => Ok(Some(())),
                Err(e) => Err(e),
            }
        })
    }

    /// Wait until the element's text contains `text`; returns the full text
    pub fn text_contains(
        &self,
        driver: &dyn AutomationDriver,
        locator: &Locator,
        text: &str,
    ) -> WaitResult<String> {
        self.until(&format!("text '{text}' in {locator}"), || {
            let element = driver.find_element(locator)?;
            let current = driver.text(&element)?;
            Ok(current.contains(text).then_some(current))
        })
    }

    /// Non-waiting existence check; not-found is `false`, not an error
    pub fn is_present(&self, driver: &dyn AutomationDriver, locator: &Locator) -> DriverResult<bool> {
        match driver.find_element(locator) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Feature probe: is the element displayed within the probe timeout?
    pub fn is_displayed_within(&self, driver: &dyn AutomationDriver, locator: &Locator) -> bool {
        self.with_timeout(self.settings.probe_timeout)
            .visible(driver, locator)
            .is_ok()
    }

    /// Wait for clickability, then click. Retries once on a stale element.
    pub fn click(&self, driver: &dyn AutomationDriver, locator: &Locator) -> WaitResult<()> {
        self.retry_stale(locator, || {
            let element = self.clickable(driver, locator)?;
            driver
                .click(&element)
                .map_err(|e| WaitError::driver(format!("click on {locator}"), e))
        })
    }

    /// Wait for visibility, clear, settle, then type. Retries once on a
    /// stale element.
    pub fn type_into(&self, driver: &dyn AutomationDriver, locator: &Locator, text: &str) -> WaitResult<()> {
        self.retry_stale(locator, || {
            let element = self.visible(driver, locator)?;
            let describe = || format!("typing into {locator}");
            driver
                .clear(&element)
                .map_err(|e| WaitError::driver(describe(), e))?;
            self.settle();
            driver
                .send_keys(&element, text)
                .map_err(|e| WaitError::driver(describe(), e))
        })
    }

    /// Wait for visibility and read the text. Retries once on a stale element.
    pub fn text_of(&self, driver: &dyn AutomationDriver, locator: &Locator) -> WaitResult<String> {
        self.retry_stale(locator, || {
            let element = self.visible(driver, locator)?;
            driver
                .text(&element)
                .map_err(|e| WaitError::driver(format!("reading text of {locator}"), e))
        })
    }

    fn retry_stale<T>(&self, locator: &Locator, mut action: impl FnMut() -> WaitResult<T>) -> WaitResult<T> {
        match action() {
            Err(e) if e.is_stale() => {
                debug!(%locator, "Element went stale, retrying once");
                action()
            }
            other => other,
        }
    }

    /// Short fixed delay for UI transitions with no observable predicate
    pub fn settle(&self) {
        if !self.settings.settle.is_zero() {
            thread::sleep(self.settings.settle);
        }
    }

    /// Longer fixed delay used when a screen has no load predicate
    pub fn settle_page(&self) {
        if !self.settings.page_settle.is_zero() {
            thread::sleep(self.settings.page_settle);
        }
    }
}
