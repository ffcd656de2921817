//! Terminal page link classification.
//!
//! Every "action button" anchor on the terminal page becomes at most one
//! [`CandidateLink`]. Candidates are tagged with a [`HostTier`] from the
//! configured host rules and returned with elevated tiers first.

use std::collections::HashSet;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::ClassifierConfig;
use crate::util::normalize_whitespace;

/// Reliability tier assigned to a destination host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostTier {
    /// Hosts known to be reliable and ad-light; eligible for auto-selection.
    Preferred,
    Trusted,
    Other,
    /// Link shorteners and ad walls.
    Blacklisted,
}

impl HostTier {
    /// `Preferred` and `Trusted` hosts are listed ahead of everything else.
    pub fn is_elevated(self) -> bool {
        matches!(self, HostTier::Preferred | HostTier::Trusted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostTier::Preferred => "preferred",
            HostTier::Trusted => "trusted",
            HostTier::Other => "other",
            HostTier::Blacklisted => "blacklisted",
        }
    }
}

/// A destination link found on the terminal page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateLink {
    pub label: String,
    pub raw_text: String,
    pub url: String,
    pub host_tier: HostTier,
    /// Name of the matching host rule, else the URL host.
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("invalid selector `{selector}` for {field}: {message}")]
    Selector {
        field: &'static str,
        selector: String,
        message: String,
    },

    #[error("invalid pattern `{pattern}` for {field}: {source}")]
    Pattern {
        field: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
struct HostRule {
    name: String,
    pattern: Regex,
    tier: HostTier,
}

/// Compiled selectors and patterns used by [`classify`].
#[derive(Debug, Clone)]
pub struct HostRules {
    button: Selector,
    section: Option<Selector>,
    exclusions: Vec<Regex>,
    hosts: Vec<HostRule>,
    blacklist: Vec<Regex>,
    size: Regex,
}

impl HostRules {
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, RulesError> {
        let button = parse_selector("classifier.button_selector", &config.button_selector)?;
        let section = if config.section_selector.is_empty() {
            None
        } else {
            Some(parse_selector(
                "classifier.section_selector",
                &config.section_selector,
            )?)
        };

        let exclusions = compile_all("classifier.exclusions", &config.exclusions)?;
        let blacklist = compile_all("classifier.blacklist", &config.blacklist)?;

        let hosts = config
            .hosts
            .iter()
            .enumerate()
            .map(|(idx, rule)| {
                Ok(HostRule {
                    name: rule.name.clone(),
                    pattern: compile(format!("classifier.hosts[{idx}].pattern"), &rule.pattern)?,
                    tier: rule.tier,
                })
            })
            .collect::<Result<Vec<_>, RulesError>>()?;

        Ok(Self {
            button,
            section,
            exclusions,
            hosts,
            blacklist,
            size: size_pattern(),
        })
    }

    fn is_excluded(&self, text: &str) -> bool {
        self.exclusions.iter().any(|pattern| pattern.is_match(text))
    }

    fn is_blacklisted(&self, label: &str, url: &str) -> bool {
        self.blacklist
            .iter()
            .any(|pattern| pattern.is_match(label) || pattern.is_match(url))
    }

    fn host_rule(&self, url: &str) -> Option<&HostRule> {
        self.hosts.iter().find(|rule| rule.pattern.is_match(url))
    }

    fn find_size(&self, text: &str) -> Option<String> {
        self.size
            .find(text)
            .map(|found| found.as_str().split_whitespace().collect())
    }
}

fn parse_selector(field: &'static str, selector: &str) -> Result<Selector, RulesError> {
    Selector::parse(selector).map_err(|err| RulesError::Selector {
        field,
        selector: selector.to_owned(),
        message: err.to_string(),
    })
}

fn compile(field: String, pattern: &str) -> Result<Regex, RulesError> {
    Regex::new(pattern).map_err(|source| RulesError::Pattern {
        field,
        pattern: pattern.to_owned(),
        source,
    })
}

fn compile_all(field: &str, patterns: &[String]) -> Result<Vec<Regex>, RulesError> {
    patterns
        .iter()
        .enumerate()
        .map(|(idx, pattern)| compile(format!("{field}[{idx}]"), pattern))
        .collect()
}

fn size_pattern() -> Regex {
    Regex::new(r"(?i)\b\d+(?:[.,]\d+)?\s*(?:GB|MB|KB)\b").expect("size pattern is valid")
}

/// Extracts candidate links from a terminal page.
///
/// Relative hrefs are resolved against `base`. The result is deterministic
/// for a given input.
pub fn classify(content: &str, base: &Url, rules: &HostRules) -> Vec<CandidateLink> {
    let document = Html::parse_document(content);
    let mut section: Option<String> = None;
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for element in document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
    {
        if let Some(heading) = rules.section.as_ref() {
            if heading.matches(&element) {
                let text = element_text(&element);
                section = (!text.is_empty()).then_some(text);
                continue;
            }
        }

        if !rules.button.matches(&element) {
            continue;
        }

        let Some(candidate) = candidate_from(&element, base, section.as_deref(), rules) else {
            continue;
        };

        if seen.insert((candidate.section.clone(), candidate.url.clone())) {
            candidates.push(candidate);
        }
    }

    if candidates.len() > 1 {
        candidates.retain(|candidate| candidate.host_tier != HostTier::Blacklisted);
    }

    candidates.sort_by_key(|candidate| !candidate.host_tier.is_elevated());

    tracing::debug!(
        candidates = candidates.len(),
        elevated = candidates
            .iter()
            .filter(|candidate| candidate.host_tier.is_elevated())
            .count(),
        "classified terminal page links"
    );

    candidates
}

fn candidate_from(
    element: &ElementRef<'_>,
    base: &Url,
    section: Option<&str>,
    rules: &HostRules,
) -> Option<CandidateLink> {
    let raw_text = element_text(element);
    if rules.is_excluded(&raw_text) {
        return None;
    }

    let url = resolve_href(element.value().attr("href")?, base)?;
    let url_text = url.to_string();

    let rule = rules.host_rule(&url_text);
    let server = rule
        .map(|rule| rule.name.clone())
        .unwrap_or_else(|| host_name(&url));

    let label = match bracket_label(&raw_text) {
        Some(label) => label,
        None if raw_text.is_empty() => server.clone(),
        None => raw_text.clone(),
    };

    let host_tier = if rules.is_blacklisted(&label, &url_text) {
        HostTier::Blacklisted
    } else {
        rule.map_or(HostTier::Other, |rule| rule.tier)
    };

    let size = rules
        .find_size(&raw_text)
        .or_else(|| section.and_then(|section| rules.find_size(section)));

    Some(CandidateLink {
        label,
        raw_text,
        url: url_text,
        host_tier,
        server,
        section: section.map(str::to_owned),
        size,
    })
}

fn element_text(element: &ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

/// Trimmed contents of the first non-empty `[...]` segment.
fn bracket_label(text: &str) -> Option<String> {
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let close = after.find(']')?;
        let inner = normalize_whitespace(&after[..close]);
        if !inner.is_empty() {
            return Some(inner);
        }
        rest = &after[close + 1..];
    }
    None
}

fn resolve_href(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "about:", "data:", "mailto:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let url = base.join(href).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

fn host_name(url: &Url) -> String {
    url.host_str()
        .map(|host| host.trim_start_matches("www.").to_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn rules() -> HostRules {
        HostRules::from_config(&Config::default().classifier).expect("default rules compile")
    }

    fn base() -> Url {
        Url::parse("https://links.example/final/page").unwrap()
    }

    fn labels(candidates: &[CandidateLink]) -> Vec<&str> {
        candidates.iter().map(|c| c.label.as_str()).collect()
    }

    #[test]
    fn elevated_tiers_precede_other_hosts() {
        let html = r#"
            <a class="maxbutton" href="https://files.example/a">[Mirror A]</a>
            <a class="maxbutton" href="https://drive.google.com/file/d/1">[Fast]</a>
            <a class="maxbutton" href="https://mega.nz/file/2">[Mega]</a>
            <a class="maxbutton" href="https://files.example/b">[Mirror B]</a>
        "#;

        let candidates = classify(html, &base(), &rules());
        assert_eq!(labels(&candidates), ["Fast", "Mega", "Mirror A", "Mirror B"]);
        let tiers: Vec<_> = candidates.iter().map(|c| c.host_tier).collect();
        assert_eq!(
            tiers,
            [
                HostTier::Preferred,
                HostTier::Trusted,
                HostTier::Other,
                HostTier::Other
            ]
        );
        assert_eq!(candidates[0].server, "G-Drive");
        assert_eq!(candidates[2].server, "files.example");
    }

    #[test]
    fn classification_is_idempotent() {
        let html = r#"
            <h3>Episode 1 720p [350MB]</h3>
            <a class="maxbutton" href="https://pixeldrain.com/u/1">PixelDrain</a>
            <a class="maxbutton" href="https://gofile.io/d/1">GoFile</a>
            <h3>Episode 2 720p [360MB]</h3>
            <a class="maxbutton" href="https://pixeldrain.com/u/2">PixelDrain</a>
        "#;

        let first = classify(html, &base(), &rules());
        let second = classify(html, &base(), &rules());
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn sole_blacklisted_candidate_is_kept() {
        let html = r#"<a class="maxbutton" href="https://ouo.io/xyz">[Download]</a>"#;
        let candidates = classify(html, &base(), &rules());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].host_tier, HostTier::Blacklisted);
    }

    #[test]
    fn blacklisted_candidates_are_dropped_when_alternatives_exist() {
        let html = r#"
            <a class="maxbutton" href="https://ouo.io/xyz">[Download]</a>
            <a class="maxbutton" href="https://files.example/a">[Linkvertise mirror]</a>
            <a class="maxbutton" href="https://files.example/b">[Mirror]</a>
        "#;
        let candidates = classify(html, &base(), &rules());
        assert_eq!(labels(&candidates), ["Mirror"]);
    }

    #[test]
    fn excluded_and_invalid_links_never_become_candidates() {
        let html = r##"
            <a class="maxbutton" href="https://chat.example/invite">Join our Telegram</a>
            <a class="maxbutton" href="">[Empty]</a>
            <a class="maxbutton" href="#">[Anchor]</a>
            <a class="maxbutton" href="javascript:void(0)">[Script]</a>
            <a class="maxbutton" href="ftp://files.example/x">[Ftp]</a>
            <a class="maxbutton">[No href]</a>
            <a href="https://files.example/not-a-button">[Plain]</a>
            <a class="btn" href="/relative/file">  Direct   Download  </a>
        "##;
        let candidates = classify(html, &base(), &rules());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].label, "Direct Download");
        assert_eq!(candidates[0].url, "https://links.example/relative/file");
    }

    #[test]
    fn section_heading_and_size_are_attached() {
        let html = r#"
            <h2>Movie (2021) 1080p HEVC [2.1 GB]</h2>
            <a class="maxbutton" href="https://mega.nz/file/a">[Mega]</a>
            <a class="maxbutton" href="https://mega.nz/file/a">[Mega again]</a>
            <h2>Movie (2021) 720p</h2>
            <a class="maxbutton" href="https://mega.nz/file/a">[Mega] 900MB</a>
        "#;
        let candidates = classify(html, &base(), &rules());
        assert_eq!(candidates.len(), 2);
        assert_eq!(
            candidates[0].section.as_deref(),
            Some("Movie (2021) 1080p HEVC [2.1 GB]")
        );
        assert_eq!(candidates[0].size.as_deref(), Some("2.1GB"));
        assert_eq!(candidates[1].size.as_deref(), Some("900MB"));
    }

    #[test]
    fn bracket_label_skips_empty_segments() {
        assert_eq!(bracket_label("[ ] [ G-Drive ]").as_deref(), Some("G-Drive"));
        assert_eq!(bracket_label("no brackets"), None);
        assert_eq!(bracket_label("[unterminated"), None);
    }

    #[test]
    fn invalid_patterns_are_reported() {
        let mut config = Config::default().classifier;
        config.blacklist.push("(unclosed".into());
        let err = HostRules::from_config(&config).unwrap_err();
        assert!(matches!(err, RulesError::Pattern { ref field, .. } if field == "classifier.blacklist[3]"));

        let mut config = Config::default().classifier;
        config.button_selector = "a[".into();
        assert!(matches!(
            HostRules::from_config(&config),
            Err(RulesError::Selector { .. })
        ));
    }
}
