//! Session capabilities sent to the automation backend.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::{
    ConfigError, ConfigProvider, ConfigResult, DEFAULT_APP_WAIT_SECS,
    DEFAULT_NEW_COMMAND_TIMEOUT_SECS, KEY_APP_ACTIVITY, KEY_APP_PACKAGE, KEY_APP_PATH,
    KEY_AUTOMATION_NAME, KEY_DEVICE_NAME, KEY_FULL_RESET, KEY_NO_RESET, KEY_PLATFORM_NAME,
    KEY_PLATFORM_VERSION,
};

/// How app state is reset between sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetPolicy {
    /// Keep app data between sessions
    NoReset,
    /// Uninstall and reinstall the app
    FullReset,
    /// Backend default: clear app data, keep the install
    Standard,
}

impl ResetPolicy {
    /// Resolve the `no.reset` / `full.reset` flag pair
    pub fn from_flags(no_reset: bool, full_reset: bool) -> Option<Self> {
        match (no_reset, full_reset) {
            (true, true) => None,
            (true, false) => Some(ResetPolicy::NoReset),
            (false, true) => Some(ResetPolicy::FullReset),
            (false, false) => Some(ResetPolicy::Standard),
        }
    }
}

/// The app under test: a binary to install, an installed package, or both
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppReference {
    pub path: Option<String>,
    pub package: Option<String>,
    pub activity: Option<String>,
}

impl AppReference {
    pub fn binary(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            package: None,
            activity: None,
        }
    }

    pub fn installed(package: impl Into<String>, activity: impl Into<String>) -> Self {
        Self {
            path: None,
            package: Some(package.into()),
            activity: Some(activity.into()),
        }
    }

    fn from_provider(provider: &dyn ConfigProvider) -> ConfigResult<Self> {
        let app = Self {
            path: provider.optional(KEY_APP_PATH),
            package: provider.optional(KEY_APP_PACKAGE),
            activity: provider.optional(KEY_APP_ACTIVITY),
        };
        let launchable = app.package.is_some() && app.activity.is_some();
        if app.path.is_none() && !launchable {
            return Err(ConfigError::Missing(format!(
                "{KEY_APP_PATH} (or {KEY_APP_PACKAGE} and {KEY_APP_ACTIVITY})"
            )));
        }
        Ok(app)
    }
}

/// Immutable capability set for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub platform_name: String,
    pub platform_version: String,
    pub device_name: String,
    pub app: AppReference,
    pub automation_name: String,
    pub reset: ResetPolicy,
    /// Backend idle timeout before it ends the session
    pub new_command_timeout: Duration,
    /// How long the backend waits for the app to launch
    pub app_wait: Duration,
}

impl Capabilities {
    /// Minimal capability set with default reset policy and timeouts
    pub fn new(
        platform_name: impl Into<String>,
        device_name: impl Into<String>,
        app: AppReference,
    ) -> Self {
        Self {
            platform_name: platform_name.into(),
            platform_version: String::new(),
            device_name: device_name.into(),
            app,
            automation_name: "UiAutomator2".to_string(),
            reset: ResetPolicy::NoReset,
            new_command_timeout: Duration::from_secs(DEFAULT_NEW_COMMAND_TIMEOUT_SECS),
            app_wait: Duration::from_secs(DEFAULT_APP_WAIT_SECS),
        }
    }

    pub fn from_provider(provider: &dyn ConfigProvider) -> ConfigResult<Self> {
        let no_reset = provider.required_bool(KEY_NO_RESET)?;
        let full_reset = provider.required_bool(KEY_FULL_RESET)?;
        let reset =
            ResetPolicy::from_flags(no_reset, full_reset).ok_or_else(|| ConfigError::Invalid {
                key: format!("{KEY_NO_RESET}/{KEY_FULL_RESET}"),
                value: "both true".to_string(),
            })?;

        Ok(Self {
            platform_name: provider.required(KEY_PLATFORM_NAME)?,
            platform_version: provider.required(KEY_PLATFORM_VERSION)?,
            device_name: provider.required(KEY_DEVICE_NAME)?,
            app: AppReference::from_provider(provider)?,
            automation_name: provider.required(KEY_AUTOMATION_NAME)?,
            reset,
            new_command_timeout: Duration::from_secs(DEFAULT_NEW_COMMAND_TIMEOUT_SECS),
            app_wait: Duration::from_secs(DEFAULT_APP_WAIT_SECS),
        })
    }

    /// W3C `alwaysMatch` object with `appium:` vendor prefixes.
    ///
    /// Keyboard and webview stability flags are always on.
    pub fn to_w3c(&self) -> Value {
        let mut caps = Map::new();
        caps.insert("platformName".into(), json!(self.platform_name));
        if !self.platform_version.is_empty() {
            caps.insert("appium:platformVersion".into(), json!(self.platform_version));
        }
        caps.insert("appium:deviceName".into(), json!(self.device_name));
        caps.insert("appium:automationName".into(), json!(self.automation_name));
        if let Some(path) = &self.app.path {
            caps.insert("appium:app".into(), json!(path));
        }
        if let Some(package) = &self.app.package {
            caps.insert("appium:appPackage".into(), json!(package));
        }
        if let Some(activity) = &self.app.activity {
            caps.insert("appium:appActivity".into(), json!(activity));
        }
        caps.insert(
            "appium:noReset".into(),
            json!(self.reset == ResetPolicy::NoReset),
        );
        caps.insert(
            "appium:fullReset".into(),
            json!(self.reset == ResetPolicy::FullReset),
        );
        caps.insert(
            "appium:newCommandTimeout".into(),
            json!(self.new_command_timeout.as_secs()),
        );
        caps.insert(
            "appium:appWaitDuration".into(),
            json!(self.app_wait.as_millis() as u64),
        );
        for flag in [
            "appium:unicodeKeyboard",
            "appium:resetKeyboard",
            "appium:ensureWebviewsHavePages",
            "appium:nativeWebScreenshot",
            "appium:connectHardwareKeyboard",
        ] {
            caps.insert(flag.into(), json!(true));
        }
        Value::Object(caps)
    }
}
