//! Automation driver abstraction.
//!
//! The backend is consumed as a black box through [`AutomationDriver`]:
//! - `WebDriverClient` speaks W3C WebDriver (Appium) over HTTP
//! - `MockDriver` serves a scripted screen for testing

pub mod capabilities;
pub mod mock;
pub mod types;
pub mod webdriver;

pub use capabilities::{AppReference, Capabilities, ResetPolicy};
pub use mock::{MockConnector, MockDriver, MockElement, MockScreen};
pub use types::{DriverError, DriverResult, ElementRef, Locator};
pub use webdriver::{WebDriverClient, WebDriverConnector};

/// One live automation session
pub trait AutomationDriver: Send + Sync {
    /// Backend session identifier
    fn session_id(&self) -> &str;

    /// Locate the first element matching `locator`
    fn find_element(&self, locator: &Locator) -> DriverResult<ElementRef>;

    /// Locate every element matching `locator` (possibly none)
    fn find_elements(&self, locator: &Locator) -> DriverResult<Vec<ElementRef>>;

    fn is_displayed(&self, element: &ElementRef) -> DriverResult<bool>;

    fn is_enabled(&self, element: &ElementRef) -> DriverResult<bool>;

    fn click(&self, element: &ElementRef) -> DriverResult<()>;

    fn clear(&self, element: &ElementRef) -> DriverResult<()>;

    fn send_keys(&self, element: &ElementRef, text: &str) -> DriverResult<()>;

    fn text(&self, element: &ElementRef) -> DriverResult<String>;

    /// PNG screenshot of the current screen
    fn screenshot(&self) -> DriverResult<Vec<u8>>;

    /// End the session on the backend
    fn quit(&self) -> DriverResult<()>;
}

/// Creates sessions on an automation backend
pub trait DriverConnector: Send + Sync {
    fn connect(
        &self,
        server_url: &str,
        capabilities: &Capabilities,
    ) -> DriverResult<Box<dyn AutomationDriver>>;
}
