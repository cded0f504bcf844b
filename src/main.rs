use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use mobile_harness::artifact::{FinalizeOutcome, RecordingPipeline, StartOutcome, cleanup_old};
use mobile_harness::config::{
    Config, ConfigProvider, KEY_SERVER_URL, OutputSettings, RecordingSettings, default_provider,
};
use mobile_harness::device::DeviceBridge;
use mobile_harness::logging::{DEFAULT_LOG_FILTER, init_tracing};
use mobile_harness::{HarnessError, HarnessResult, UnitId, Verdict};

/// Timeout for the automation backend status probe
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Mobile Harness - UI test execution support for mobile apps
#[derive(Parser, Debug)]
#[command(
    name = "mobile-harness",
    about = "Per-test automation sessions, bounded waits and verdict-keyed screen recording",
    after_help = "ENVIRONMENT VARIABLES:\n\
        MOBILE_HARNESS_CONFIG      Properties file (default: ./config.properties)\n\
        MOBILE_HARNESS_<KEY>       Override any property, e.g. MOBILE_HARNESS_APPIUM_SERVER_URL\n\
        RUST_LOG                   Log filter (default: info)"
)]
struct Args {
    /// Properties file to read
    #[arg(short, long, global = true, env = "MOBILE_HARNESS_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check the device tool, the attached device and the automation backend
    Doctor,

    /// Print the resolved session capabilities as W3C JSON
    Caps,

    /// Record the device screen and keep the file
    Record {
        /// Recording length in seconds
        #[arg(short, long, default_value = "10")]
        seconds: u64,

        /// Name used in the recording file name
        #[arg(short, long, default_value = "manual")]
        name: String,
    },

    /// Delete old screenshots and recordings
    Clean {
        /// Remove artifacts older than this many hours
        #[arg(long, default_value = "24")]
        older_than_hours: u64,
    },
}

fn main() {
    let args = Args::parse();
    init_tracing(DEFAULT_LOG_FILTER, args.log_json);

    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> HarnessResult<()> {
    let provider = default_provider(args.config.as_deref())?;

    match args.command {
        Commands::Doctor => doctor(&provider),

        Commands::Caps => {
            let config = Config::from_provider(&provider)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&config.driver.capabilities.to_w3c())?
            );
            Ok(())
        }

        Commands::Record { seconds, name } => {
            let settings = RecordingSettings {
                enabled: true,
                ..RecordingSettings::from_provider(&provider)?
            };
            let output = OutputSettings::from_provider(&provider);
            let pipeline = RecordingPipeline::with_bridge(settings, output);
            let unit = UnitId::unique(&name);

            match pipeline.start(&unit, &name) {
                StartOutcome::Started { remote } => println!("Recording to {remote} for {seconds}s"),
                StartOutcome::Skipped { reason } => {
                    return Err(HarnessError::Check(format!("recording not started: {reason}")));
                }
            }
            thread::sleep(Duration::from_secs(seconds));

            match pipeline.finalize(&unit, Verdict::Passed) {
                FinalizeOutcome::Saved(path) => {
                    println!("Saved recording: {}", path.display());
                    Ok(())
                }
                other => Err(HarnessError::Check(format!("recording not saved: {other:?}"))),
            }
        }

        Commands::Clean { older_than_hours } => {
            let output = OutputSettings::from_provider(&provider);
            let max_age = max_age_from_hours(older_than_hours);
            let mut total = 0;
            for dir in [output.screenshots_dir(), output.recordings_dir()] {
                let removed = cleanup_old(&dir, max_age)?;
                println!("{}: removed {} file(s)", dir.display(), removed);
                total += removed;
            }
            println!("Removed {total} artifact(s) older than {older_than_hours}h");
            Ok(())
        }
    }
}

fn doctor(provider: &dyn ConfigProvider) -> HarnessResult<()> {
    let settings = RecordingSettings::from_provider(provider)?;
    let bridge = DeviceBridge::new(settings.program.clone()).with_serial(settings.serial.clone());

    let tool = bridge.is_tool_available();
    let device = tool && bridge.is_device_connected();
    let backend = provider
        .optional(KEY_SERVER_URL)
        .map(|url| (backend_ready(&url), url));

    let mark = |ok: bool| if ok { "ok" } else { "FAIL" };
    println!("[{}] device tool '{}'", mark(tool), settings.program);
    println!("[{}] device connected", mark(device));
    match &backend {
        Some((ready, url)) => println!("[{}] automation backend at {url}", mark(*ready)),
        None => println!("[FAIL] automation backend: '{KEY_SERVER_URL}' not configured"),
    }
    println!(
        "[--] recording {}",
        if settings.enabled { "enabled" } else { "disabled" }
    );

    let backend_ok = backend.is_some_and(|(ready, _)| ready);
    if tool && device && backend_ok {
        Ok(())
    } else {
        Err(HarnessError::Check("one or more checks failed".to_string()))
    }
}

/// Age threshold for `clean`; absurdly large inputs saturate
fn max_age_from_hours(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

/// `GET /status` on a WebDriver backend
fn backend_ready(server_url: &str) -> bool {
    let url = format!("{}/status", server_url.trim_end_matches('/'));
    let client = match reqwest::blocking::Client::builder()
        .timeout(STATUS_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "Could not build HTTP client");
            return false;
        }
    };
    match client.get(&url).send() {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!(%url, error = %e, "Backend status probe failed");
            false
        }
    }
}
