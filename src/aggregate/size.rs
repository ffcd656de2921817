use std::sync::OnceLock;

use regex::Regex;

use super::quality::resolution_of;

const MB_PER_GB: f64 = 1024.0;

fn size_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(\d+(?:[.,]\d+)?)\s*(gb|mb|kb)?$").expect("size pattern is valid")
    })
}

/// Parses a size such as `"1.2GB"`, `"700 mb"` or `"850"` into megabytes.
///
/// Unit-less numbers are megabytes. Anything else, including `"unknown"`,
/// yields `None`.
pub fn parse_size_mb(raw: &str) -> Option<f64> {
    let captures = size_pattern().captures(raw.trim())?;
    let value: f64 = captures[1].replace(',', ".").parse().ok()?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }

    let unit = captures
        .get(2)
        .map(|unit| unit.as_str().to_ascii_lowercase());
    let megabytes = match unit.as_deref() {
        Some("gb") => value * MB_PER_GB,
        Some("kb") => value / 1024.0,
        _ => value,
    };

    Some(megabytes)
}

/// Renders megabytes back into a compact `GB`/`MB` string.
pub fn format_size(megabytes: f64) -> String {
    // Round first so 1023.6MB reads as 1GB, not 1024MB.
    if megabytes.round() >= MB_PER_GB {
        let gigabytes = format!("{:.2}", megabytes / MB_PER_GB);
        format!("{}GB", gigabytes.trim_end_matches('0').trim_end_matches('.'))
    } else {
        format!("{}MB", megabytes.round().max(1.0) as u64)
    }
}

/// Size estimate for a quality group.
///
/// Reports `min–max` over every parseable size, a single value when the
/// bounds coincide, and the static default for the quality otherwise.
pub fn estimate<'a>(sizes: impl IntoIterator<Item = &'a str>, quality: &str) -> String {
    let parsed: Vec<f64> = sizes.into_iter().filter_map(parse_size_mb).collect();
    if parsed.is_empty() {
        return default_estimate(quality).to_owned();
    }

    let min = parsed.iter().copied().fold(f64::INFINITY, f64::min);
    let max = parsed.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let (low, high) = (format_size(min), format_size(max));
    if low == high {
        low
    } else {
        format!("{low}–{high}")
    }
}

/// Static range shown when no size was published for a quality.
pub fn default_estimate(quality: &str) -> &'static str {
    match resolution_of(quality) {
        Some(2160) => "8–15GB",
        Some(1080) => "2–4GB",
        Some(720) => "1–2GB",
        Some(480) => "400–700MB",
        Some(360) => "200–400MB",
        _ => "Unknown",
    }
}
