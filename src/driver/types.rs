// Core types shared by automation driver implementations

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How to locate an element on screen
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locator {
    /// Android resource id (e.g. `com.app:id/title`)
    Id(String),
    /// Content description / accessibility label
    AccessibilityId(String),
    /// XPath over the UI hierarchy
    XPath(String),
    /// Widget class name (e.g. `android.widget.EditText`)
    ClassName(String),
    /// UiAutomator selector expression
    UiAutomator(String),
}

impl Locator {
    pub fn id(value: impl Into<String>) -> Self {
        Locator::Id(value.into())
    }

    pub fn accessibility_id(value: impl Into<String>) -> Self {
        Locator::AccessibilityId(value.into())
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Locator::XPath(value.into())
    }

    pub fn class_name(value: impl Into<String>) -> Self {
        Locator::ClassName(value.into())
    }

    pub fn ui_automator(value: impl Into<String>) -> Self {
        Locator::UiAutomator(value.into())
    }

    /// Wire name of the location strategy
    pub fn strategy(&self) -> &'static str {
        match self {
            Locator::Id(_) => "id",
            Locator::AccessibilityId(_) => "accessibility id",
            Locator::XPath(_) => "xpath",
            Locator::ClassName(_) => "class name",
            Locator::UiAutomator(_) => "-android uiautomator",
        }
    }

    /// The selector value
    pub fn value(&self) -> &str {
        match self {
            Locator::Id(v)
            | Locator::AccessibilityId(v)
            | Locator::XPath(v)
            | Locator::ClassName(v)
            | Locator::UiAutomator(v) => v,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "By.{}: {}", self.strategy(), self.value())
    }
}

/// Opaque reference to an element returned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef(pub String);

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        ElementRef(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// Error types for automation driver operations
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("No such element: {0}")]
    NoSuchElement(String),

    #[error("Stale element reference: {0}")]
    StaleElement(String),

    #[error("Session not created: {0}")]
    SessionNotCreated(String),

    #[error("Invalid session id: {0}")]
    InvalidSession(String),

    #[error("{error}: {message}")]
    Command { error: String, message: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl DriverError {
    /// Map a W3C WebDriver error code to a variant
    pub fn from_w3c(error: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match error {
            "no such element" => DriverError::NoSuchElement(message),
            "stale element reference" => DriverError::StaleElement(message),
            "session not created" => DriverError::SessionNotCreated(message),
            "invalid session id" => DriverError::InvalidSession(message),
            other => DriverError::Command {
                error: other.to_string(),
                message,
            },
        }
    }

    /// The element could not be found (a legitimate "not yet" while waiting)
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NoSuchElement(_))
    }

    /// The element went stale and needs to be located again
    pub fn is_stale(&self) -> bool {
        matches!(self, DriverError::StaleElement(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_display() {
        assert_eq!(Locator::id("com.app:id/add").to_string(), "By.id: com.app:id/add");
        assert_eq!(
            Locator::accessibility_id("Add list").strategy(),
            "accessibility id"
        );
    }

    #[test]
    fn test_error_from_w3c() {
        assert!(DriverError::from_w3c("no such element", "x").is_not_found());
        assert!(DriverError::from_w3c("stale element reference", "x").is_stale());
        assert!(matches!(
            DriverError::from_w3c("element not interactable", "x"),
            DriverError::Command { .. }
        ));
    }
}
