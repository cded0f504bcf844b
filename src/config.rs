//! Configuration management with property-file and environment support.
//!
//! Configuration is read once through a [`ConfigProvider`] and frozen into an
//! immutable [`Config`] that is handed to the components that need it.
//!
//! # Keys
//!
//! | Key | Description | Default |
//! |-----|-------------|---------|
//! | `platform.name` | Platform name (e.g. `Android`) | required |
//! | `platform.version` | Platform version | required |
//! | `device.name` | Device name | required |
//! | `app.path` | Path to the app binary | one of path / package+activity |
//! | `app.package` | Installed app package | one of path / package+activity |
//! | `app.activity` | Launch activity | one of path / package+activity |
//! | `automation.name` | Automation engine | required |
//! | `no.reset` | Do not reset app state | required |
//! | `full.reset` | Reinstall the app | required |
//! | `appium.server.url` | Automation backend URL | required |
//! | `implicit.wait.seconds` | Backend implicit wait | `0` |
//! | `wait.timeout.seconds` | Default wait timeout | `30` |
//! | `wait.poll.millis` | Wait poll interval | `500` |
//! | `wait.settle.millis` | Settle delay between clear and type | `300` |
//! | `wait.page.settle.millis` | Page load settle delay | `2000` |
//! | `wait.probe.seconds` | Timeout for "is displayed" probes | `5` |
//! | `video.recording.enabled` | Record passing tests | `false` |
//! | `adb.path` | Device bridge program | `adb` |
//! | `adb.serial` | Device serial passed as `-s` | none |
//! | `video.device.dir` | On-device recording directory | `/sdcard` |
//! | `video.time.limit.seconds` | Capture hard cap | `300` |
//! | `video.bit.rate` | Capture bit rate | `6000000` |
//! | `video.size` | Capture size | `720x1280` |
//! | `video.start.delay.millis` | Delay after starting a capture | `1000` |
//! | `video.flush.delay.millis` | Delay before pulling a capture | `2000` |
//! | `output.dir` | Local artifact root | `test-output` |
//!
//! Every key can be overridden from the environment: `MOBILE_HARNESS_` plus
//! the key upper-cased with dots replaced by underscores
//! (`video.recording.enabled` → `MOBILE_HARNESS_VIDEO_RECORDING_ENABLED`).

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::device::CaptureLimits;
use crate::driver::Capabilities;

// ============================================================================
// Default Values
// ============================================================================

/// Default wait timeout (seconds)
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 30;

/// Default wait poll interval (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MILLIS: u64 = 500;

/// Default settle delay (milliseconds)
pub const DEFAULT_SETTLE_MILLIS: u64 = 300;

/// Default page load settle delay (milliseconds)
pub const DEFAULT_PAGE_SETTLE_MILLIS: u64 = 2000;

/// Default timeout for displayed probes (seconds)
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Default backend implicit wait (seconds)
pub const DEFAULT_IMPLICIT_WAIT_SECS: u64 = 0;

/// Default backend new-command timeout (seconds)
pub const DEFAULT_NEW_COMMAND_TIMEOUT_SECS: u64 = 60;

/// Default app launch wait (seconds)
pub const DEFAULT_APP_WAIT_SECS: u64 = 30;

/// Default device bridge program
pub const DEFAULT_BRIDGE_PROGRAM: &str = "adb";

/// Default on-device recording directory
pub const DEFAULT_DEVICE_DIR: &str = "/sdcard";

/// Default capture hard cap (seconds)
pub const DEFAULT_TIME_LIMIT_SECS: u64 = 300;

/// Default capture bit rate
pub const DEFAULT_BIT_RATE: u32 = 6_000_000;

/// Default capture size
pub const DEFAULT_VIDEO_SIZE: &str = "720x1280";

/// Default delay after starting a capture (milliseconds)
pub const DEFAULT_START_DELAY_MILLIS: u64 = 1000;

/// Default delay before pulling a stopped capture (milliseconds)
pub const DEFAULT_FLUSH_DELAY_MILLIS: u64 = 2000;

/// Default artifact output root
pub const DEFAULT_OUTPUT_DIR: &str = "test-output";

/// Default properties file name
pub const DEFAULT_PROPERTIES_FILE: &str = "config.properties";

/// Environment override prefix
pub const ENV_PREFIX: &str = "MOBILE_HARNESS_";

// ============================================================================
// Keys
// ============================================================================

pub const KEY_PLATFORM_NAME: &str = "platform.name";
pub const KEY_PLATFORM_VERSION: &str = "platform.version";
pub const KEY_DEVICE_NAME: &str = "device.name";
pub const KEY_APP_PATH: &str = "app.path";
pub const KEY_APP_PACKAGE: &str = "app.package";
pub const KEY_APP_ACTIVITY: &str = "app.activity";
pub const KEY_AUTOMATION_NAME: &str = "automation.name";
pub const KEY_NO_RESET: &str = "no.reset";
pub const KEY_FULL_RESET: &str = "full.reset";
pub const KEY_SERVER_URL: &str = "appium.server.url";
pub const KEY_IMPLICIT_WAIT: &str = "implicit.wait.seconds";
pub const KEY_WAIT_TIMEOUT: &str = "wait.timeout.seconds";
pub const KEY_POLL_INTERVAL: &str = "wait.poll.millis";
pub const KEY_SETTLE: &str = "wait.settle.millis";
pub const KEY_PAGE_SETTLE: &str = "wait.page.settle.millis";
pub const KEY_PROBE_TIMEOUT: &str = "wait.probe.seconds";
pub const KEY_RECORDING_ENABLED: &str = "video.recording.enabled";
pub const KEY_BRIDGE_PROGRAM: &str = "adb.path";
pub const KEY_BRIDGE_SERIAL: &str = "adb.serial";
pub const KEY_DEVICE_DIR: &str = "video.device.dir";
pub const KEY_TIME_LIMIT: &str = "video.time.limit.seconds";
pub const KEY_BIT_RATE: &str = "video.bit.rate";
pub const KEY_VIDEO_SIZE: &str = "video.size";
pub const KEY_START_DELAY: &str = "video.start.delay.millis";
pub const KEY_FLUSH_DELAY: &str = "video.flush.delay.millis";
pub const KEY_OUTPUT_DIR: &str = "output.dir";

// ============================================================================
// Errors
// ============================================================================

/// Result type for configuration lookups
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Error types for configuration lookups
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Property '{0}' not found in configuration")]
    Missing(String),

    #[error("Property '{key}' has invalid value '{value}'")]
    Invalid { key: String, value: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// Providers
// ============================================================================

/// External key-value configuration source
pub trait ConfigProvider: Send + Sync {
    /// Raw lookup; `None` when the key is absent
    fn lookup(&self, key: &str) -> Option<String>;

    /// Value of a required key; blank values count as missing
    fn required(&self, key: &str) -> ConfigResult<String> {
        self.lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    /// Value of an optional key
    fn optional(&self, key: &str) -> Option<String> {
        self.lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Boolean value of a required key (`true`, case-insensitive; anything else is false)
    fn required_bool(&self, key: &str) -> ConfigResult<bool> {
        self.required(key).map(|v| parse_bool(&v))
    }

    /// Boolean value of an optional key
    fn bool_or(&self, key: &str, default: bool) -> bool {
        self.optional(key).map(|v| parse_bool(&v)).unwrap_or(default)
    }
}

impl ConfigProvider for HashMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Parse an optional key, falling back to `default` when absent
pub fn parse_or<T, P>(provider: &P, key: &str, default: T) -> ConfigResult<T>
where
    T: FromStr,
    P: ConfigProvider + ?Sized,
{
    match provider.optional(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value,
        }),
    }
}

fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// `key=value` properties file
#[derive(Debug, Clone, Default)]
pub struct PropertiesProvider {
    values: HashMap<String, String>,
}

impl PropertiesProvider {
    /// Load a properties file from disk
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Parse properties text.
    ///
    /// Supports `key=value` and `key: value`, `#` and `!` comment lines.
    pub fn parse(text: &str) -> Self {
        let values = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
            .filter_map(|line| {
                let split = line.find(['=', ':'])?;
                let (key, value) = line.split_at(split);
                Some((key.trim().to_string(), value[1..].trim().to_string()))
            })
            .collect();
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ConfigProvider for PropertiesProvider {
    fn lookup(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Environment variables named after the keys
#[derive(Debug, Clone)]
pub struct EnvProvider {
    prefix: String,
}

impl Default for EnvProvider {
    fn default() -> Self {
        Self::new(ENV_PREFIX)
    }
}

impl EnvProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable name for `key`
    pub fn var_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.replace('.', "_").to_uppercase())
    }
}

impl ConfigProvider for EnvProvider {
    fn lookup(&self, key: &str) -> Option<String> {
        env::var(self.var_name(key)).ok()
    }
}

/// Providers consulted in order; the first hit wins
#[derive(Default)]
pub struct LayeredProvider {
    layers: Vec<Box<dyn ConfigProvider>>,
}

impl LayeredProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, provider: impl ConfigProvider + 'static) -> Self {
        self.layers.push(Box::new(provider));
        self
    }
}

impl ConfigProvider for LayeredProvider {
    fn lookup(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|p| p.lookup(key))
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Complete harness configuration, built once per process
#[derive(Debug, Clone)]
pub struct Config {
    /// Automation backend settings
    pub driver: DriverSettings,
    /// Synchronization settings
    pub wait: WaitSettings,
    /// Screen recording settings
    pub recording: RecordingSettings,
    /// Artifact output settings
    pub output: OutputSettings,
}

/// Automation backend settings
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    /// Backend URL
    pub server_url: String,
    /// Session capabilities
    pub capabilities: Capabilities,
    /// Implicit wait set on every new session
    pub implicit_wait: Duration,
}

/// Synchronization engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitSettings {
    /// Default wait timeout
    pub timeout: Duration,
    /// Interval between predicate evaluations
    pub poll_interval: Duration,
    /// Fixed delay between clearing a field and typing
    pub settle: Duration,
    /// Fixed delay used when no page-ready predicate exists
    pub page_settle: Duration,
    /// Timeout for "is displayed" feature probes
    pub probe_timeout: Duration,
}

/// Screen recording settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSettings {
    /// Whether passing tests are recorded
    pub enabled: bool,
    /// Device bridge program
    pub program: String,
    /// Device serial, if several devices are attached
    pub serial: Option<String>,
    /// On-device directory for in-flight recordings
    pub device_dir: String,
    /// Capture limits
    pub limits: CaptureLimits,
    /// Delay after starting a capture
    pub start_delay: Duration,
    /// Delay between stopping a capture and pulling it
    pub flush_delay: Duration,
}

/// Local artifact layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    /// Artifact root directory
    pub root: PathBuf,
}

impl Config {
    /// Build configuration from a provider. Missing required keys are fatal.
    pub fn from_provider(provider: &dyn ConfigProvider) -> ConfigResult<Self> {
        Ok(Self {
            driver: DriverSettings::from_provider(provider)?,
            wait: WaitSettings::from_provider(provider)?,
            recording: RecordingSettings::from_provider(provider)?,
            output: OutputSettings::from_provider(provider),
        })
    }

    /// Load from a properties file with environment overrides.
    ///
    /// Without a path, `config.properties` in the working directory is used
    /// when present; otherwise only the environment is consulted.
    pub fn load(properties: Option<&Path>) -> ConfigResult<Self> {
        Self::from_provider(&default_provider(properties)?)
    }
}

/// Environment layered over the properties file used by [`Config::load`]
pub fn default_provider(properties: Option<&Path>) -> ConfigResult<LayeredProvider> {
    let provider = LayeredProvider::new().layer(EnvProvider::default());
    match properties {
        Some(path) => Ok(provider.layer(PropertiesProvider::from_file(path)?)),
        None => {
            let default_path = Path::new(DEFAULT_PROPERTIES_FILE);
            if default_path.exists() {
                Ok(provider.layer(PropertiesProvider::from_file(default_path)?))
            } else {
                Ok(provider)
            }
        }
    }
}

impl DriverSettings {
    pub fn from_provider(provider: &dyn ConfigProvider) -> ConfigResult<Self> {
        Ok(Self {
            server_url: provider.required(KEY_SERVER_URL)?,
            capabilities: Capabilities::from_provider(provider)?,
            implicit_wait: Duration::from_secs(parse_or(
                provider,
                KEY_IMPLICIT_WAIT,
                DEFAULT_IMPLICIT_WAIT_SECS,
            )?),
        })
    }
}

impl WaitSettings {
    pub fn from_provider(provider: &dyn ConfigProvider) -> ConfigResult<Self> {
        Ok(Self {
            timeout: Duration::from_secs(parse_or(
                provider,
                KEY_WAIT_TIMEOUT,
                DEFAULT_WAIT_TIMEOUT_SECS,
            )?),
            poll_interval: Duration::from_millis(parse_or(
                provider,
                KEY_POLL_INTERVAL,
                DEFAULT_POLL_INTERVAL_MILLIS,
            )?),
            settle: Duration::from_millis(parse_or(provider, KEY_SETTLE, DEFAULT_SETTLE_MILLIS)?),
            page_settle: Duration::from_millis(parse_or(
                provider,
                KEY_PAGE_SETTLE,
                DEFAULT_PAGE_SETTLE_MILLIS,
            )?),
            probe_timeout: Duration::from_secs(parse_or(
                provider,
                KEY_PROBE_TIMEOUT,
                DEFAULT_PROBE_TIMEOUT_SECS,
            )?),
        })
    }

    pub fn defaults() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MILLIS),
            settle: Duration::from_millis(DEFAULT_SETTLE_MILLIS),
            page_settle: Duration::from_millis(DEFAULT_PAGE_SETTLE_MILLIS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self::defaults()
    }
}

impl RecordingSettings {
    pub fn from_provider(provider: &dyn ConfigProvider) -> ConfigResult<Self> {
        let defaults = Self::defaults();
        Ok(Self {
            enabled: provider.bool_or(KEY_RECORDING_ENABLED, defaults.enabled),
            program: provider
                .optional(KEY_BRIDGE_PROGRAM)
                .unwrap_or(defaults.program),
            serial: provider.optional(KEY_BRIDGE_SERIAL),
            device_dir: provider
                .optional(KEY_DEVICE_DIR)
                .map(|d| d.trim_end_matches('/').to_string())
                .unwrap_or(defaults.device_dir),
            limits: CaptureLimits {
                time_limit: Duration::from_secs(parse_or(
                    provider,
                    KEY_TIME_LIMIT,
                    DEFAULT_TIME_LIMIT_SECS,
                )?),
                bit_rate: parse_or(provider, KEY_BIT_RATE, DEFAULT_BIT_RATE)?,
                size: provider
                    .optional(KEY_VIDEO_SIZE)
                    .unwrap_or(defaults.limits.size),
            },
            start_delay: Duration::from_millis(parse_or(
                provider,
                KEY_START_DELAY,
                DEFAULT_START_DELAY_MILLIS,
            )?),
            flush_delay: Duration::from_millis(parse_or(
                provider,
                KEY_FLUSH_DELAY,
                DEFAULT_FLUSH_DELAY_MILLIS,
            )?),
        })
    }

    /// Recording disabled, `adb` with default limits
    pub fn defaults() -> Self {
        Self {
            enabled: false,
            program: DEFAULT_BRIDGE_PROGRAM.to_string(),
            serial: None,
            device_dir: DEFAULT_DEVICE_DIR.to_string(),
            limits: CaptureLimits::default(),
            start_delay: Duration::from_millis(DEFAULT_START_DELAY_MILLIS),
            flush_delay: Duration::from_millis(DEFAULT_FLUSH_DELAY_MILLIS),
        }
    }
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self::defaults()
    }
}

impl OutputSettings {
    pub fn from_provider(provider: &dyn ConfigProvider) -> Self {
        Self::new(
            provider
                .optional(KEY_OUTPUT_DIR)
                .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()),
        )
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory for failure and ad-hoc screenshots
    pub fn screenshots_dir(&self) -> PathBuf {
        self.root.join("screenshots")
    }

    /// Directory for retained recordings
    pub fn recordings_dir(&self) -> PathBuf {
        self.root.join("recordings")
    }

    /// Directory for JSON reports
    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_DIR)
    }
}
