use crate::{CaptureFormat, ScreenshotError};
use std::time::Duration;
use url::Url;

/// Accept only absolute http(s) URLs.
pub fn validate_url(url: &str) -> Result<Url, ScreenshotError> {
    if url.trim().is_empty() {
        return Err(ScreenshotError::InvalidUrl("URL is required".to_string()));
    }

    let parsed = Url::parse(url).map_err(|e| ScreenshotError::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(ScreenshotError::InvalidUrl(format!(
            "{url}: unsupported scheme '{scheme}'"
        ))),
    }
}

pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}

pub fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// File name for a saved artifact, e.g. `3_example.com.jpg`.
pub fn artifact_filename(job_id: u64, url: &str, format: CaptureFormat) -> String {
    let host = extract_domain(url).unwrap_or_else(|| "screenshot".to_string());
    format!(
        "{}_{}.{}",
        job_id,
        sanitize_filename(&host),
        format.extension()
    )
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}

pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
