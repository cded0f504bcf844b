use chrono::Utc;

/// Timestamp format used in artifact file names, down to milliseconds
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S_%3f";

/// Generate a timestamp string in YYYY-MM-DD_HH-MM-SS_mmm format
pub fn timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Sanitize a name for use in filenames
pub fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    if sanitized.is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

/// `<prefix>_<test>_<timestamp>.<ext>`
pub fn artifact_name(prefix: &str, test: &str, timestamp: &str, ext: &str) -> String {
    format!("{}_{}_{}.{}", prefix, sanitize_name(test), timestamp, ext)
}

/// On-device path for an in-flight recording: `<dir>/<test>_<timestamp>.mp4`
pub fn remote_recording_path(device_dir: &str, test: &str, timestamp: &str) -> String {
    format!(
        "{}/{}_{}.mp4",
        device_dir.trim_end_matches('/'),
        sanitize_name(test),
        timestamp
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("add item"), "add_item");
        assert_eq!(sanitize_name("cart::checkout"), "cart__checkout");
        assert_eq!(sanitize_name("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_name(""), "unnamed");
    }

    #[test]
    fn test_timestamp_shape() {
        let ts = timestamp();
        // 2026-01-02_03-04-05_678
        assert_eq!(ts.len(), 23);
        assert_eq!(&ts[10..11], "_");
        assert_eq!(&ts[19..20], "_");
    }

    #[test]
    fn test_artifact_name() {
        assert_eq!(
            artifact_name("SUCCESS", "addItem", "2026-01-02_03-04-05_678", "mp4"),
            "SUCCESS_addItem_2026-01-02_03-04-05_678.mp4"
        );
    }

    #[test]
    fn test_remote_recording_path() {
        assert_eq!(
            remote_recording_path("/sdcard/", "add item", "ts"),
            "/sdcard/add_item_ts.mp4"
        );
    }
}
