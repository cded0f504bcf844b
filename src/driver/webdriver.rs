//! W3C WebDriver client for Appium-compatible backends.

use std::time::Duration;

use base64::Engine;
use reqwest::blocking::{Client, Response};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::capabilities::Capabilities;
use super::types::{DriverError, DriverResult, ElementRef, Locator};
use super::{AutomationDriver, DriverConnector};

/// W3C element reference key
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Pre-W3C element reference key, still emitted by some backends
const LEGACY_ELEMENT_KEY: &str = "ELEMENT";

/// Default HTTP timeout; session creation may install the app
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Opens [`WebDriverClient`] sessions
#[derive(Debug, Clone)]
pub struct WebDriverConnector {
    request_timeout: Duration,
    implicit_wait: Duration,
}

impl Default for WebDriverConnector {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            implicit_wait: Duration::ZERO,
        }
    }
}

impl WebDriverConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Implicit wait applied to each new session
    pub fn implicit_wait(mut self, wait: Duration) -> Self {
        self.implicit_wait = wait;
        self
    }
}

impl DriverConnector for WebDriverConnector {
    fn connect(
        &self,
        server_url: &str,
        capabilities: &Capabilities,
    ) -> DriverResult<Box<dyn AutomationDriver>> {
        let http = Client::builder().timeout(self.request_timeout).build()?;
        let client = WebDriverClient::new_session(http, server_url, capabilities)?;
        if let Err(e) = client.set_implicit_wait(self.implicit_wait) {
            let _ = client.quit();
            return Err(e);
        }
        Ok(Box::new(client))
    }
}

/// A session on a WebDriver backend
#[derive(Debug)]
pub struct WebDriverClient {
    http: Client,
    base_url: String,
    session_id: String,
}

impl WebDriverClient {
    /// `POST /session`
    pub fn new_session(
        http: Client,
        server_url: &str,
        capabilities: &Capabilities,
    ) -> DriverResult<Self> {
        let base_url = server_url.trim_end_matches('/').to_string();
        let body = json!({
            "capabilities": {
                "alwaysMatch": capabilities.to_w3c(),
                "firstMatch": [{}]
            }
        });

        debug!(%base_url, device = %capabilities.device_name, "Creating WebDriver session");
        let value = decode(http.post(format!("{base_url}/session")).json(&body).send()?)?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::InvalidResponse("new session response has no sessionId".into()))?
            .to_string();

        info!(%session_id, "WebDriver session created");
        Ok(Self {
            http,
            base_url,
            session_id,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.session_id, path)
    }

    fn get(&self, path: &str) -> DriverResult<Value> {
        decode(self.http.get(self.url(path)).send()?)
    }

    fn post(&self, path: &str, body: Value) -> DriverResult<Value> {
        decode(self.http.post(self.url(path)).json(&body).send()?)
    }

    fn element_path(element: &ElementRef, action: &str) -> String {
        format!("/element/{}/{}", element.id(), action)
    }

    /// `POST /session/{id}/timeouts`
    pub fn set_implicit_wait(&self, wait: Duration) -> DriverResult<()> {
        self.post("/timeouts", json!({ "implicit": wait.as_millis() as u64 }))
            .map(|_| ())
    }

    fn locate_body(locator: &Locator) -> Value {
        json!({ "using": locator.strategy(), "value": locator.value() })
    }
}

impl AutomationDriver for WebDriverClient {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn find_element(&self, locator: &Locator) -> DriverResult<ElementRef> {
        let value = self.post("/element", Self::locate_body(locator))?;
        element_from(&value)
    }

    fn find_elements(&self, locator: &Locator) -> DriverResult<Vec<ElementRef>> {
        let value = self.post("/elements", Self::locate_body(locator))?;
        value
            .as_array()
            .ok_or_else(|| DriverError::InvalidResponse("expected an element array".into()))?
            .iter()
            .map(element_from)
            .collect()
    }

    fn is_displayed(&self, element: &ElementRef) -> DriverResult<bool> {
        as_bool(self.get(&Self::element_path(element, "displayed"))?)
    }

    fn is_enabled(&self, element: &ElementRef) -> DriverResult<bool> {
        as_bool(self.get(&Self::element_path(element, "enabled"))?)
    }

    fn click(&self, element: &ElementRef) -> DriverResult<()> {
        self.post(&Self::element_path(element, "click"), json!({}))
            .map(|_| ())
    }

    fn clear(&self, element: &ElementRef) -> DriverResult<()> {
        self.post(&Self::element_path(element, "clear"), json!({}))
            .map(|_| ())
    }

    fn send_keys(&self, element: &ElementRef, text: &str) -> DriverResult<()> {
        self.post(&Self::element_path(element, "value"), json!({ "text": text }))
            .map(|_| ())
    }

    fn text(&self, element: &ElementRef) -> DriverResult<String> {
        let value = self.get(&Self::element_path(element, "text"))?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DriverError::InvalidResponse(format!("expected text, got {value}")))
    }

    fn screenshot(&self) -> DriverResult<Vec<u8>> {
        let value = self.get("/screenshot")?;
        let encoded: String = value
            .as_str()
            .ok_or_else(|| DriverError::InvalidResponse("expected base64 screenshot".into()))?
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DriverError::InvalidResponse(format!("bad screenshot encoding: {e}")))
    }

    fn quit(&self) -> DriverResult<()> {
        debug!(session_id = %self.session_id, "Deleting WebDriver session");
        decode(self.http.delete(self.url("")).send()?).map(|_| ())
    }
}

/// Unwrap the `value` member of a WebDriver response, mapping errors
fn decode(response: Response) -> DriverResult<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .map_err(|e| DriverError::InvalidResponse(format!("HTTP {status}: {e}")))?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Err(DriverError::from_w3c(error, message))
}

fn element_from(value: &Value) -> DriverResult<ElementRef> {
    value
        .get(ELEMENT_KEY)
        .or_else(|| value.get(LEGACY_ELEMENT_KEY))
        .and_then(Value::as_str)
        .map(ElementRef::new)
        .ok_or_else(|| DriverError::InvalidResponse(format!("not an element reference: {value}")))
}

fn as_bool(value: Value) -> DriverResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| DriverError::InvalidResponse(format!("expected boolean, got {value}")))
}
