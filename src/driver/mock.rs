//! Scripted in-memory automation backend for testing.
//!
//! A [`MockScreen`] holds the elements currently "on screen". Elements can
//! appear or vanish after a delay and can report a number of stale-reference
//! failures, which is enough to exercise waits and safe interactions.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use image::{ImageBuffer, Rgb, RgbImage};
use parking_lot::Mutex;

use super::capabilities::Capabilities;
use super::types::{DriverError, DriverResult, ElementRef, Locator};
use super::{AutomationDriver, DriverConnector};

/// Width of mock screenshots in pixels
pub const MOCK_SCREEN_WIDTH: u32 = 36;

/// Height of mock screenshots in pixels
pub const MOCK_SCREEN_HEIGHT: u32 = 64;

/// An element on the mock screen
#[derive(Debug, Clone)]
pub struct MockElement {
    pub displayed: bool,
    pub enabled: bool,
    pub text: String,
    visible_from: Option<Instant>,
    gone_from: Option<Instant>,
    stale_failures: u32,
}

impl MockElement {
    /// A displayed, enabled element with the given text
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            displayed: true,
            enabled: true,
            text: text.into(),
            visible_from: None,
            gone_from: None,
            stale_failures: 0,
        }
    }

    /// Present in the hierarchy but not displayed
    pub fn hidden(mut self) -> Self {
        self.displayed = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Not locatable until `delay` from now
    pub fn appears_after(mut self, delay: Duration) -> Self {
        self.visible_from = Some(Instant::now() + delay);
        self
    }

    /// No longer locatable once `delay` from now has passed
    pub fn vanishes_after(mut self, delay: Duration) -> Self {
        self.gone_from = Some(Instant::now() + delay);
        self
    }

    /// The next `count` interactions fail with a stale reference
    pub fn stale_for(mut self, count: u32) -> Self {
        self.stale_failures = count;
        self
    }

    fn is_present(&self, now: Instant) -> bool {
        self.visible_from.is_none_or(|t| now >= t) && self.gone_from.is_none_or(|t| now < t)
    }
}

#[derive(Debug, Default)]
struct ScreenState {
    elements: HashMap<Locator, MockElement>,
    actions: Vec<String>,
    screenshot: Option<Vec<u8>>,
}

/// Shared mock screen; clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct MockScreen {
    state: Arc<Mutex<ScreenState>>,
}

impl MockScreen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `element` on screen under `locator`
    pub fn add(&self, locator: Locator, element: MockElement) -> &Self {
        self.state.lock().elements.insert(locator, element);
        self
    }

    pub fn remove(&self, locator: &Locator) {
        self.state.lock().elements.remove(locator);
    }

    /// Current text of an element, if on screen
    pub fn text_of(&self, locator: &Locator) -> Option<String> {
        self.state.lock().elements.get(locator).map(|e| e.text.clone())
    }

    /// Serve `bytes` as the screenshot instead of the generated PNG
    pub fn set_screenshot(&self, bytes: Vec<u8>) {
        self.state.lock().screenshot = Some(bytes);
    }

    /// Interactions performed so far (`click <locator>`, `type <locator> <text>`, ...)
    pub fn actions(&self) -> Vec<String> {
        self.state.lock().actions.clone()
    }

    fn with_element<T>(
        &self,
        element: &ElementRef,
        interaction: bool,
        f: impl FnOnce(&Locator, &mut MockElement) -> T,
    ) -> DriverResult<(T, String)> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let (locator, el) = state
            .elements
            .iter_mut()
            .find(|(l, e)| element_id(l) == element.id() && e.is_present(now))
            .ok_or_else(|| DriverError::StaleElement(element.id().to_string()))?;
        if interaction && el.stale_failures > 0 {
            el.stale_failures -= 1;
            return Err(DriverError::StaleElement(element.id().to_string()));
        }
        let result = f(locator, el);
        Ok((result, locator.to_string()))
    }

    fn record(&self, action: String) {
        self.state.lock().actions.push(action);
    }
}

fn element_id(locator: &Locator) -> String {
    format!("{}={}", locator.strategy(), locator.value())
}

/// Mock session over a [`MockScreen`]
#[derive(Debug)]
pub struct MockDriver {
    id: String,
    screen: MockScreen,
    live: Arc<AtomicUsize>,
    quit: AtomicBool,
    fail_quit: bool,
}

impl MockDriver {
    pub fn new(id: impl Into<String>, screen: MockScreen) -> Self {
        let live = Arc::new(AtomicUsize::new(1));
        Self::attached(id.into(), screen, live, false)
    }

    fn attached(id: String, screen: MockScreen, live: Arc<AtomicUsize>, fail_quit: bool) -> Self {
        Self {
            id,
            screen,
            live,
            quit: AtomicBool::new(false),
            fail_quit,
        }
    }

    fn ensure_live(&self) -> DriverResult<()> {
        if self.quit.load(Ordering::SeqCst) {
            return Err(DriverError::InvalidSession(self.id.clone()));
        }
        Ok(())
    }
}

impl AutomationDriver for MockDriver {
    fn session_id(&self) -> &str {
        &self.id
    }

    fn find_element(&self, locator: &Locator) -> DriverResult<ElementRef> {
        self.ensure_live()?;
        let state = self.screen.state.lock();
        match state.elements.get(locator) {
            Some(e) if e.is_present(Instant::now()) => Ok(ElementRef::new(element_id(locator))),
            _ => Err(DriverError::NoSuchElement(locator.to_string())),
        }
    }

    fn find_elements(&self, locator: &Locator) -> DriverResult<Vec<ElementRef>> {
        match self.find_element(locator) {
            Ok(element) => Ok(vec![element]),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn is_displayed(&self, element: &ElementRef) -> DriverResult<bool> {
        self.ensure_live()?;
        self.screen
            .with_element(element, false, |_, e| e.displayed)
            .map(|(d, _)| d)
    }

    fn is_enabled(&self, element: &ElementRef) -> DriverResult<bool> {
        self.ensure_live()?;
        self.screen
            .with_element(element, false, |_, e| e.enabled)
            .map(|(d, _)| d)
    }

    fn click(&self, element: &ElementRef) -> DriverResult<()> {
        self.ensure_live()?;
        let ((), locator) = self.screen.with_element(element, true, |_, _| ())?;
        self.screen.record(format!("click {locator}"));
        Ok(())
    }

    fn clear(&self, element: &ElementRef) -> DriverResult<()> {
        self.ensure_live()?;
        let ((), locator) = self.screen.with_element(element, true, |_, e| e.text.clear())?;
        self.screen.record(format!("clear {locator}"));
        Ok(())
    }

    fn send_keys(&self, element: &ElementRef, text: &str) -> DriverResult<()> {
        self.ensure_live()?;
        let ((), locator) = self
            .screen
            .with_element(element, true, |_, e| e.text.push_str(text))?;
        self.screen.record(format!("type {locator} {text}"));
        Ok(())
    }

    fn text(&self, element: &ElementRef) -> DriverResult<String> {
        self.ensure_live()?;
        self.screen
            .with_element(element, true, |_, e| e.text.clone())
            .map(|(t, _)| t)
    }

    fn screenshot(&self) -> DriverResult<Vec<u8>> {
        self.ensure_live()?;
        if let Some(bytes) = self.screen.state.lock().screenshot.clone() {
            return Ok(bytes);
        }
        let img: RgbImage =
            ImageBuffer::from_pixel(MOCK_SCREEN_WIDTH, MOCK_SCREEN_HEIGHT, Rgb([32, 33, 36]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| DriverError::InvalidResponse(format!("Failed to encode PNG: {}", e)))?;
        Ok(bytes)
    }

    fn quit(&self) -> DriverResult<()> {
        if self.quit.swap(true, Ordering::SeqCst) {
            return Err(DriverError::InvalidSession(self.id.clone()));
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
        if self.fail_quit {
            return Err(DriverError::Command {
                error: "unknown error".into(),
                message: "socket hang up".into(),
            });
        }
        Ok(())
    }
}

/// Hands out [`MockDriver`] sessions over one shared screen
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    screen: MockScreen,
    created: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    unreachable: Arc<AtomicBool>,
    fail_quit: Arc<AtomicBool>,
}

impl MockConnector {
    pub fn new(screen: MockScreen) -> Self {
        Self {
            screen,
            ..Default::default()
        }
    }

    pub fn screen(&self) -> &MockScreen {
        &self.screen
    }

    /// Make session creation fail as if the backend were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Make `quit` report an error (the session still ends)
    pub fn fail_quit(&self, fail: bool) {
        self.fail_quit.store(fail, Ordering::SeqCst);
    }

    /// Sessions created so far
    pub fn sessions_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Sessions created and not yet quit
    pub fn live_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl DriverConnector for MockConnector {
    fn connect(
        &self,
        server_url: &str,
        capabilities: &Capabilities,
    ) -> DriverResult<Box<dyn AutomationDriver>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(DriverError::SessionNotCreated(format!(
                "could not reach {server_url} for {}",
                capabilities.device_name
            )));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockDriver::attached(
            format!("mock-session-{n}"),
            self.screen.clone(),
            Arc::clone(&self.live),
            self.fail_quit.load(Ordering::SeqCst),
        )))
    }
}
