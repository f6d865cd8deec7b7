use anyhow::Result;
use url::Url;

use crate::DownloadError;

/// Device names Windows refuses as file names, whatever the extension
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
    "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Validate a book URL: http(s) and hosted on the configured site
pub fn validate_book_url(url: &str, site_host: Option<&str>) -> Result<Url> {
    let parsed = Url::parse(url)
        .map_err(|_| anyhow::anyhow!("Invalid URL format: {}", url))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("URL must use HTTP or HTTPS protocol");
    }

    if let Some(site_host) = site_host {
        let host = extract_domain(url).unwrap_or_default();
        if host != site_host && !host.ends_with(&format!(".{}", site_host)) {
            return Err(DownloadError::UnsupportedUrl(url.to_string()).into());
        }
    }

    Ok(parsed)
}

/// Whether the URL points at a series listing rather than a single book
pub fn is_series_url(url: &Url) -> bool {
    url.path_segments()
        .map(|mut segments| segments.any(|segment| segment == "series"))
        .unwrap_or(false)
}

/// Last non-empty path segment of a URL, used to name archives
pub fn url_slug(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(|segment| {
            let decoded = urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| segment.to_string());
            sanitize_filename(&decoded)
        })
}

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Longest sanitized name in bytes, leaving room for a ` (N)` suffix and `.mp3` within
/// the usual 255-byte file name limit
pub const MAX_NAME_BYTES: usize = 240;

/// Sanitize filename for safe filesystem usage
///
/// Characters that are invalid in file names on any common platform become `_`, and the
/// result is cut to [`MAX_NAME_BYTES`] on a char boundary.
/// Applying it twice gives the same result as applying it once.
pub fn sanitize_filename(filename: &str) -> String {
    let replaced: String = filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let name = trim_name_end(truncate_bytes(trim_name_end(replaced.trim()), MAX_NAME_BYTES));
    if name.is_empty() {
        return "_".to_string();
    }

    let stem = name.split('.').next().unwrap_or(name);
    if RESERVED_NAMES.iter().any(|reserved| stem.eq_ignore_ascii_case(reserved)) {
        let renamed = format!("{}_{}", stem, &name[stem.len()..]);
        return trim_name_end(truncate_bytes(&renamed, MAX_NAME_BYTES)).to_string();
    }

    name.to_string()
}

fn trim_name_end(name: &str) -> &str {
    name.trim_end_matches(|c: char| c == '.' || c.is_whitespace())
}

fn truncate_bytes(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Extract domain from URL for display purposes
pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(|host| {
            // Remove 'www.' prefix if present
            if let Some(stripped) = host.strip_prefix("www.") {
                stripped.to_string()
            } else {
                host.to_string()
            }
        })
}

/// Check if the current environment has required tools
pub async fn check_dependencies(ffmpeg_path: &str) -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available(ffmpeg_path).await {
        missing.push(format!("{} - required for remuxing and tagging chapters", ffmpeg_path));
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg("-version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
