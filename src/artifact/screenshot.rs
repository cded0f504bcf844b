use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::naming::{artifact_name, sanitize_name, timestamp};
use super::{ArtifactError, ArtifactResult};
use crate::config::OutputSettings;
use crate::driver::AutomationDriver;
use crate::verdict::Verdict;

/// Sidecar JSON written next to every screenshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotManifest {
    pub test: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub timestamp: DateTime<Utc>,
    pub image_path: PathBuf,
}

/// Writes driver screenshots under `<output>/screenshots`
#[derive(Debug, Clone)]
pub struct Screenshots {
    dir: PathBuf,
}

impl Screenshots {
    pub fn new(output: &OutputSettings) -> Self {
        Self {
            dir: output.screenshots_dir(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `FAILED_<test>_<timestamp>.png` plus manifest
    pub fn capture_failure(
        &self,
        driver: &dyn AutomationDriver,
        test: &str,
    ) -> ArtifactResult<ScreenshotManifest> {
        let file_name = artifact_name(Verdict::Failed.prefix(), test, &timestamp(), "png");
        self.capture(driver, test, file_name, Some(Verdict::Failed), None)
    }

    /// Ad-hoc screenshot: `<test>_<label>_<timestamp>.png` plus manifest
    pub fn capture_named(
        &self,
        driver: &dyn AutomationDriver,
        test: &str,
        label: &str,
    ) -> ArtifactResult<ScreenshotManifest> {
        let file_name = format!(
            "{}_{}_{}.png",
            sanitize_name(test),
            sanitize_name(label),
            timestamp()
        );
        self.capture(driver, test, file_name, None, Some(label.to_string()))
    }

    fn capture(
        &self,
        driver: &dyn AutomationDriver,
        test: &str,
        file_name: String,
        verdict: Option<Verdict>,
        label: Option<String>,
    ) -> ArtifactResult<ScreenshotManifest> {
        let png = driver.screenshot()?;

        fs::create_dir_all(&self.dir).map_err(|source| ArtifactError::Write {
            path: self.dir.clone(),
            source,
        })?;
        let image_path = self.dir.join(file_name);
        fs::write(&image_path, &png).map_err(|source| ArtifactError::Write {
            path: image_path.clone(),
            source,
        })?;
        let (width, height) = dimensions(&png).unwrap_or_else(|e| {
            warn!(test, error = %e, "Could not read screenshot dimensions");
            (0, 0)
        });

        let manifest = ScreenshotManifest {
            test: test.to_string(),
            verdict,
            label,
            width,
            height,
            timestamp: Utc::now(),
            image_path,
        };
        write_manifest(&manifest)?;
        info!(test, path = %manifest.image_path.display(), "Screenshot saved");
        Ok(manifest)
    }

    /// Remove screenshots older than `max_age`
    pub fn cleanup_old(&self, max_age: Duration) -> io::Result<usize> {
        cleanup_old(&self.dir, max_age)
    }
}

/// Read the image header only
fn dimensions(bytes: &[u8]) -> ArtifactResult<(u32, u32)> {
    let reader = image::io::Reader::new(Cursor::new(bytes)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

fn write_manifest(manifest: &ScreenshotManifest) -> ArtifactResult<()> {
    let manifest_path = manifest.image_path.with_extension("json");
    fs::write(&manifest_path, serde_json::to_string_pretty(manifest)?).map_err(|source| {
        ArtifactError::Write {
            path: manifest_path,
            source,
        }
    })
}

/// Delete files in `dir` last modified more than `max_age` ago.
///
/// Returns the number of files removed. A missing directory removes nothing.
pub fn cleanup_old(dir: &Path, max_age: Duration) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut cleaned = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > max_age) && fs::remove_file(&path).is_ok() {
            debug!(path = %path.display(), "Removed old artifact");
            cleaned += 1;
        }
    }

    Ok(cleaned)
}
