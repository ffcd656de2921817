use std::sync::OnceLock;

use regex::Regex;

use crate::util::normalize_whitespace;

/// Label used when no quality could be detected.
pub const UNKNOWN_QUALITY: &str = "Unknown";

fn quality_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:(2160|1440|1080|720|576|480|360|240)\s*p|(4k|uhd))\b((?:[\s._-]+(?:hevc|x26[45]|h\.?26[45]|10\s?bit|hdr(?:10)?|dv|av1)\b)*)",
        )
        .expect("quality pattern is valid")
    })
}

/// Finds the first quality label in `text`, e.g. `"1080p HEVC"`.
///
/// The resolution is rendered as `<n>p`; trailing codec qualifiers keep the
/// spelling used by the source page.
pub fn detect_quality(text: &str) -> Option<String> {
    let captures = quality_pattern().captures(text)?;

    let resolution = match (captures.get(1), captures.get(2)) {
        (Some(lines), _) => format!("{}p", lines.as_str()),
        (None, Some(marker)) => marker.as_str().to_ascii_uppercase(),
        (None, None) => return None,
    };

    let qualifiers = captures
        .get(3)
        .map(|found| normalize_whitespace(&found.as_str().replace(['.', '_', '-'], " ")))
        .unwrap_or_default();

    if qualifiers.is_empty() {
        Some(resolution)
    } else {
        Some(format!("{resolution} {qualifiers}"))
    }
}

/// Grouping key for a quality label.
///
/// Lowercases and strips whitespace, dashes and underscores. Keys are only
/// ever compared for equality, so `"720p"` and `"720p HEVC"` stay distinct.
pub fn normalize_quality(label: &str) -> String {
    label
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Base resolution of a label in lines (`"1080p HEVC"` -> 1080).
pub(crate) fn resolution_of(label: &str) -> Option<u32> {
    let captures = quality_pattern().captures(label)?;
    if let Some(lines) = captures.get(1) {
        return lines.as_str().parse().ok();
    }
    captures.get(2).map(|_| 2160)
}
