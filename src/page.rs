//! Base for screen objects: waited interactions that report each step.

use std::sync::Arc;

use rand::Rng;
use tracing::warn;

use crate::driver::{AutomationDriver, ElementRef, Locator};
use crate::report::ReportSink;
use crate::session::Session;
use crate::wait::{WaitResult, Waiter};

/// Screen-level operations for one test's session
pub struct Page {
    session: Arc<Session>,
    waiter: Waiter,
    reporter: Arc<dyn ReportSink>,
    test: String,
}

impl Page {
    pub fn new(
        session: Arc<Session>,
        waiter: Waiter,
        reporter: Arc<dyn ReportSink>,
        test: impl Into<String>,
    ) -> Self {
        Self {
            session,
            waiter,
            reporter,
            test: test.into(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn driver(&self) -> &dyn AutomationDriver {
        self.session.driver()
    }

    pub fn waiter(&self) -> &Waiter {
        &self.waiter
    }

    pub fn test(&self) -> &str {
        &self.test
    }

    fn log(&self, message: &str) {
        self.reporter.info(&self.test, message);
    }

    /// Wait until clickable, then click
    pub fn click(&self, locator: &Locator) -> WaitResult<()> {
        self.waiter.click(self.driver(), locator)?;
        self.log(&format!("Clicked on element: {locator}"));
        Ok(())
    }

    /// Wait until visible, clear, then type `text`
    pub fn send_keys(&self, locator: &Locator, text: &str) -> WaitResult<()> {
        self.waiter.type_into(self.driver(), locator, text)?;
        self.log(&format!("Entered text '{text}' in element: {locator}"));
        Ok(())
    }

    pub fn text(&self, locator: &Locator) -> WaitResult<String> {
        let text = self.waiter.text_of(self.driver(), locator)?;
        self.log(&format!("Retrieved text '{text}' from element: {locator}"));
        Ok(text)
    }

    /// Displayed within the probe timeout
    pub fn is_displayed(&self, locator: &Locator) -> bool {
        self.waiter.is_displayed_within(self.driver(), locator)
    }

    /// Present right now. Backend errors other than not-found are logged and
    /// read as absent.
    pub fn is_present(&self, locator: &Locator) -> bool {
        self.waiter
            .is_present(self.driver(), locator)
            .unwrap_or_else(|e| {
                warn!(test = %self.test, %locator, error = %e, "Presence check failed");
                false
            })
    }

    /// Wait until at least one element matches, then return every match
    pub fn elements(&self, locator: &Locator) -> WaitResult<Vec<ElementRef>> {
        let driver = self.driver();
        self.waiter
            .until(&format!("presence of all {locator}"), || {
                let found = driver.find_elements(locator)?;
                Ok((!found.is_empty()).then_some(found))
            })
    }

    /// Fixed delay for screens without a load predicate
    pub fn wait_for_page_to_load(&self) {
        self.waiter.settle_page();
    }
}

/// Random test data name: `<prefix>_<0..1000>`
pub fn random_name(prefix: &str) -> String {
    format!("{}_{}", prefix, rand::thread_rng().gen_range(0..1000))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::WaitSettings;
    use crate::driver::{AppReference, Capabilities, MockConnector, MockElement, MockScreen};
    use crate::report::MemoryReporter;
    use crate::session::{SessionManager, UnitId};

    fn page(screen: &MockScreen) -> (Page, MemoryReporter, SessionManager) {
        let connector = MockConnector::new(screen.clone());
        let manager = SessionManager::new("http://127.0.0.1:4723", Arc::new(connector));
        let session = manager
            .open_session(
                &UnitId::new("u1"),
                Capabilities::new("Android", "emulator-1", AppReference::binary("a.apk")),
            )
            .unwrap();
        let reporter = MemoryReporter::new();
        let waiter = Waiter::new(WaitSettings {
            timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(20),
            settle: Duration::ZERO,
            page_settle: Duration::ZERO,
            probe_timeout: Duration::from_millis(50),
        });
        let page = Page::new(session, waiter, Arc::new(reporter.clone()), "addItem");
        (page, reporter, manager)
    }

    #[test]
    fn test_actions_are_reported() {
        let screen = MockScreen::new();
        let field = Locator::id("name");
        let save = Locator::accessibility_id("Save");
        screen.add(field.clone(), MockElement::new(""));
        screen.add(save.clone(), MockElement::new("Save"));
        let (page, reporter, _manager) = page(&screen);

        page.send_keys(&field, "Milk").unwrap();
        page.click(&save).unwrap();
        assert_eq!(page.text(&field).unwrap(), "Milk");

        let messages: Vec<_> = reporter.events().into_iter().map(|e| e.message).collect();
        assert_eq!(
            messages,
            vec![
                "Entered text 'Milk' in element: By.id: name",
                "Clicked on element: By.accessibility id: Save",
                "Retrieved text 'Milk' from element: By.id: name",
            ]
        );
    }

    #[test]
    fn test_probes() {
        let screen = MockScreen::new();
        let banner = Locator::id("banner");
        screen.add(banner.clone(), MockElement::new("").hidden());
        let (page, _, _manager) = page(&screen);

        assert!(page.is_present(&banner));
        assert!(!page.is_displayed(&banner));
        assert!(!page.is_present(&Locator::id("missing")));
        assert_eq!(page.elements(&banner).unwrap().len(), 1);
        assert!(page.elements(&Locator::id("missing")).unwrap_err().is_timeout());
    }

    #[test]
    fn test_failed_action_is_not_reported() {
        let screen = MockScreen::new();
        let (page, reporter, _manager) = page(&screen);
        assert!(page.click(&Locator::id("missing")).is_err());
        assert!(reporter.events().is_empty());
    }

    #[test]
    fn test_random_name() {
        let name = random_name("List");
        let suffix: u32 = name.strip_prefix("List_").unwrap().parse().unwrap();
        assert!(suffix < 1000);
    }
}
