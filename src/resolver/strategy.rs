//! Next-hop extraction strategies.
//!
//! Each strategy is a pure function of a fetched page. The resolver tries
//! them in order and keeps the first URL produced, so supporting a new page
//! format means appending a strategy.

use std::fmt;

use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use url::Url;

use super::fetcher::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    VariableAssignment,
    AnchorToken,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::VariableAssignment => "variable_assignment",
            StrategyKind::AnchorToken => "anchor_token",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait ExtractionStrategy: Send + Sync + fmt::Debug {
    fn kind(&self) -> StrategyKind;

    fn extract(&self, page: &Page) -> Option<Url>;
}

/// Matches `name = "https://..."` for any configured variable name,
/// optionally introduced by `var`, `let` or `const`.
#[derive(Debug, Clone)]
pub struct VariableAssignment {
    pattern: Regex,
}

impl VariableAssignment {
    pub fn new(names: &[String]) -> Result<Self, regex::Error> {
        let alternatives = names
            .iter()
            .map(|name| regex::escape(name))
            .collect::<Vec<_>>()
            .join("|");

        let pattern = Regex::new(&format!(
            r#"(?:^|[^\w$])(?:(?:var|let|const)\s+)?(?:{alternatives})\s*=\s*(?:"([^"\s]+)"|'([^'\s]+)')"#
        ))?;

        Ok(Self { pattern })
    }
}

impl ExtractionStrategy for VariableAssignment {
    fn kind(&self) -> StrategyKind {
        StrategyKind::VariableAssignment
    }

    fn extract(&self, page: &Page) -> Option<Url> {
        self.pattern.captures_iter(&page.body).find_map(|captures| {
            let raw = captures.get(1).or_else(|| captures.get(2))?.as_str();
            http_url(&page.url, &raw.replace("\\/", "/"))
        })
    }
}

/// First anchor whose `href` carries one of the token query keys.
#[derive(Debug, Clone)]
pub struct AnchorToken {
    keys: Vec<String>,
    anchors: Selector,
}

impl AnchorToken {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            anchors: Selector::parse("a[href]").expect("anchor selector is valid"),
        }
    }

    fn carries_token(&self, url: &Url) -> bool {
        url.query_pairs()
            .any(|(key, value)| !value.is_empty() && self.keys.iter().any(|k| *k == key))
    }
}

impl ExtractionStrategy for AnchorToken {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AnchorToken
    }

    fn extract(&self, page: &Page) -> Option<Url> {
        let document = Html::parse_document(&page.body);
        document
            .select(&self.anchors)
            .filter_map(|anchor| anchor.value().attr("href"))
            .filter_map(|href| http_url(&page.url, href))
            .find(|url| self.carries_token(url))
    }
}

fn http_url(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }

    let url = base.join(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> Page {
        Page {
            url: Url::parse("https://hop.example/step/one?x=1").unwrap(),
            body: body.into(),
        }
    }

    fn variable() -> VariableAssignment {
        VariableAssignment::new(&["url".into(), "redirect_url".into()]).unwrap()
    }

    #[test]
    fn variable_assignment_finds_quoted_urls() {
        let found = variable().extract(&page(
            r#"<script>var redirect_url = "https:\/\/next.example\/go?id=9";</script>"#,
        ));
        assert_eq!(found.unwrap().as_str(), "https://next.example/go?id=9");

        let found = variable().extract(&page("let url='/relative/next';"));
        assert_eq!(found.unwrap().as_str(), "https://hop.example/relative/next");
    }

    #[test]
    fn variable_assignment_ignores_other_names_and_comparisons() {
        assert!(variable()
            .extract(&page(r#"var my_url = "https://a.example"; if (url == "x") {}"#))
            .is_none());
        assert!(variable()
            .extract(&page(r#"var url = "javascript:alert(1)";"#))
            .is_none());
    }

    #[test]
    fn variable_assignment_skips_unusable_matches() {
        let found = variable().extract(&page(
            r#"url = "mailto:x@y.example"; url = "https://b.example/next";"#,
        ));
        assert_eq!(found.unwrap().as_str(), "https://b.example/next");
    }

    #[test]
    fn anchor_token_takes_first_matching_anchor() {
        let strategy = AnchorToken::new(vec!["token".into()]);
        let found = strategy.extract(&page(
            r#"
            <a href="/about">About</a>
            <a href="/go?token=">Empty</a>
            <a href="/go?token=abc">Continue</a>
            <a href="https://other.example/go?token=def">Other</a>
            "#,
        ));
        assert_eq!(found.unwrap().as_str(), "https://hop.example/go?token=abc");
    }

    #[test]
    fn anchor_token_requires_a_known_key() {
        let strategy = AnchorToken::new(vec!["token".into()]);
        assert!(strategy
            .extract(&page(r#"<a href="/go?tok=abc">x</a>"#))
            .is_none());
    }
}
