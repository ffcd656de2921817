//! Groups classified links into content units and quality groups.

mod quality;
mod size;

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::classify::{CandidateLink, HostTier};

pub use quality::{detect_quality, normalize_quality, UNKNOWN_QUALITY};
pub use size::{default_estimate, estimate as estimate_size, format_size, parse_size_mb};

/// Granularity a set of links is grouped at.
///
/// The derived ordering is the presentation order: `Single`, then episodes
/// by number, then `Batch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type", content = "episode", rename_all = "lowercase")]
pub enum UnitKind {
    Single,
    Episode(u32),
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UnitStatus {
    Available,
    NoLinksAvailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityGroup {
    pub quality: String,
    pub size_estimate: String,
    pub servers: Vec<CandidateLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUnit {
    pub kind: UnitKind,
    pub groups: Vec<QualityGroup>,
    pub status: UnitStatus,
}

/// Request-level hints that shape aggregation.
#[derive(Debug, Clone, Default)]
pub struct UnitHints {
    /// Only groups whose normalized quality equals this are kept.
    pub quality: Option<String>,
    /// Quality assumed for links whose text carries none.
    pub fallback_quality: Option<String>,
}

impl UnitHints {
    fn quality_filter(&self) -> Option<String> {
        self.quality
            .as_deref()
            .map(normalize_quality)
            .filter(|key| !key.is_empty())
    }

    fn fallback_quality(&self) -> &str {
        self.fallback_quality
            .as_deref()
            .map(str::trim)
            .filter(|quality| !quality.is_empty())
            .unwrap_or(UNKNOWN_QUALITY)
    }
}

const BATCH_KEYWORDS: [&str; 4] = ["batch", "zip", "complete", "season"];

fn episode_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?:\bepisode|\bep|\bs\d{1,2}\s*e)\s*[.:#-]?\s*(\d{1,4})\b")
            .expect("episode pattern is valid")
    })
}

fn episode_number(text: &str) -> Option<u32> {
    episode_pattern()
        .captures(text)
        .and_then(|captures| captures[1].parse().ok())
}

/// Decides which unit a candidate belongs to.
///
/// Batch keywords in the label or section win over any episode number.
pub fn unit_kind(candidate: &CandidateLink) -> UnitKind {
    let section = candidate.section.as_deref().unwrap_or_default();
    let haystack = format!("{} {}", candidate.label, section).to_lowercase();

    if BATCH_KEYWORDS
        .iter()
        .any(|keyword| haystack.contains(keyword))
    {
        return UnitKind::Batch;
    }

    let episode = episode_number(section).or_else(|| episode_number(&candidate.label));
    match episode {
        Some(number) => UnitKind::Episode(number),
        None => UnitKind::Single,
    }
}

fn candidate_quality(candidate: &CandidateLink, hints: &UnitHints) -> String {
    detect_quality(&candidate.label)
        .or_else(|| candidate.section.as_deref().and_then(detect_quality))
        .unwrap_or_else(|| hints.fallback_quality().to_owned())
}

#[derive(Default)]
struct UnitBuilder {
    groups: Vec<(String, String, Vec<CandidateLink>)>,
}

impl UnitBuilder {
    fn push(&mut self, key: String, quality: String, candidate: CandidateLink) {
        match self.groups.iter_mut().find(|(existing, _, _)| *existing == key) {
            Some((_, _, servers)) => servers.push(candidate),
            None => self.groups.push((key, quality, vec![candidate])),
        }
    }

    fn build(self, kind: UnitKind) -> ContentUnit {
        let groups: Vec<QualityGroup> = self
            .groups
            .into_iter()
            .map(|(_, quality, servers)| QualityGroup {
                size_estimate: size::estimate(
                    servers.iter().filter_map(|server| server.size.as_deref()),
                    &quality,
                ),
                quality,
                servers,
            })
            .collect();

        let status = if groups.is_empty() {
            UnitStatus::NoLinksAvailable
        } else {
            UnitStatus::Available
        };

        ContentUnit {
            kind,
            groups,
            status,
        }
    }
}

/// Groups candidates into ordered content units.
///
/// Units whose candidates were all filtered out are kept with
/// [`UnitStatus::NoLinksAvailable`]; an empty input yields a single such
/// `Single` unit.
pub fn aggregate(candidates: &[CandidateLink], hints: &UnitHints) -> Vec<ContentUnit> {
    let filter = hints.quality_filter();
    let mut units: BTreeMap<UnitKind, UnitBuilder> = BTreeMap::new();

    for candidate in candidates {
        let kind = unit_kind(candidate);
        let unit = units.entry(kind).or_default();

        let quality = candidate_quality(candidate, hints);
        let key = normalize_quality(&quality);
        if filter.as_ref().is_some_and(|wanted| *wanted != key) {
            continue;
        }

        unit.push(key, quality, candidate.clone());
    }

    if units.is_empty() {
        units.insert(UnitKind::Single, UnitBuilder::default());
    }

    units
        .into_iter()
        .map(|(kind, builder)| builder.build(kind))
        .collect()
}

/// Returns the group's only `Preferred` candidate, if there is exactly one.
pub fn select_preferred(group: &QualityGroup) -> Option<&CandidateLink> {
    let mut preferred = group
        .servers
        .iter()
        .filter(|candidate| candidate.host_tier == HostTier::Preferred);

    match (preferred.next(), preferred.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}
