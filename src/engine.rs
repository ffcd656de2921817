//! Request-level resolution pipeline.
//!
//! [`Engine::resolve`] decodes the routing context, walks the hop chain,
//! classifies and aggregates the terminal page's links and optionally mints a
//! token for an auto-selected link. It never returns an error: every failure
//! becomes a [`ResolutionResult`] with [`Status::Failed`] that still carries
//! the original reference for manual continuation.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::aggregate::{self, ContentUnit, UnitHints, UnitStatus};
use crate::classify::{self, CandidateLink, HostRules, RulesError};
use crate::codec::{self, Codec, DecodeError, RoutingContext};
use crate::config::Config;
use crate::resolver::{BuildError, HopResult, HttpFetcher, PageFetcher, Resolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Resolved,
    NoLinks,
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Resolved => "resolved",
            Status::NoLinks => "no_links",
            Status::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Stream,
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown action `{0}`; expected `stream` or `download`")]
pub struct ParseActionError(String);

impl FromStr for Action {
    type Err = ParseActionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stream" | "watch" => Ok(Action::Stream),
            "download" => Ok(Action::Download),
            _ => Err(ParseActionError(value.to_owned())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Stream => f.write_str("stream"),
            Action::Download => f.write_str("download"),
        }
    }
}

/// Inbound resolution request.
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    /// Compact token, bare URL or numeric content id.
    pub token: Option<String>,
    /// Discrete legacy parameters, used when no token is given.
    pub params: Vec<(String, String)>,
    pub quality: Option<String>,
    pub action: Option<Action>,
}

impl ResolveRequest {
    pub fn from_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }
}

/// Link picked automatically together with the token for the next step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub link: CandidateLink,
    pub quality: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    pub status: Status,
    pub context: RoutingContext,
    pub units: Vec<ContentUnit>,
    pub is_archive_only: bool,
    pub terminal_title: String,
    pub actions: Vec<Action>,
    pub action: Option<Action>,
    pub hops: Vec<HopResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    /// Original reference the caller can open manually.
    pub fallback_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureDetail>,
}

impl ResolutionResult {
    fn failed(context: RoutingContext, kind: &str, message: impl ToString) -> Self {
        Self {
            status: Status::Failed,
            context,
            units: Vec::new(),
            is_archive_only: false,
            terminal_title: String::new(),
            actions: Vec::new(),
            action: None,
            hops: Vec::new(),
            selection: None,
            fallback_url: None,
            last_url: None,
            error: Some(FailureDetail {
                kind: kind.to_owned(),
                message: message.to_string(),
                hop: None,
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid classifier rules: {0}")]
    Rules(#[from] RulesError),

    #[error("failed to build resolver: {0}")]
    Resolver(#[from] BuildError),
}

pub struct Engine<F = HttpFetcher> {
    codec: Codec,
    resolver: Resolver<F>,
    rules: HostRules,
}

impl<F> fmt::Debug for Engine<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("codec", &self.codec)
            .field("max_hops", &self.resolver.max_hops())
            .field("request_timeout", &self.resolver.request_timeout())
            .finish_non_exhaustive()
    }
}

impl Engine<HttpFetcher> {
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let resolver = Resolver::from_config(&config.resolver)?;
        Self::with_resolver(resolver, config)
    }
}

impl<F: PageFetcher> Engine<F> {
    /// Builds an engine around an existing resolver, taking everything else
    /// from `config`.
    pub fn with_resolver(resolver: Resolver<F>, config: &Config) -> Result<Self, EngineError> {
        Ok(Self {
            codec: Codec::new(
                config.codec.legacy_base_url.clone(),
                config.codec.placeholder_poster.clone(),
            ),
            resolver,
            rules: HostRules::from_config(&config.classifier)?,
        })
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    #[tracing::instrument(name = "engine.resolve", skip_all, fields(status = tracing::field::Empty))]
    pub async fn resolve(&self, request: ResolveRequest) -> ResolutionResult {
        let started = Instant::now();
        let result = self.run(request).await;

        tracing::Span::current().record("status", result.status.as_str());
        #[cfg(feature = "telemetry")]
        {
            metrics::counter!("linkhop_resolutions_total", "status" => result.status.as_str())
                .increment(1);
            metrics::histogram!("linkhop_resolution_duration_seconds")
                .record(started.elapsed().as_secs_f64());
        }
        tracing::info!(
            status = result.status.as_str(),
            hops = result.hops.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "resolution finished"
        );

        result
    }

    async fn run(&self, request: ResolveRequest) -> ResolutionResult {
        let context = match self.decode(&request) {
            Ok(context) => context,
            Err(error) => {
                tracing::warn!(%error, "routing context could not be decoded");
                return ResolutionResult::failed(self.codec.fallback_context(), "decode", error);
            }
        };

        let fallback_url = absolute_url(&context.destination_ref);
        let start_url = match self.codec.start_url(&context) {
            Ok(url) => url,
            Err(error) => {
                tracing::warn!(%error, "no start url for routing context");
                let mut result =
                    ResolutionResult::failed(self.codec.with_defaults(context), "decode", error);
                result.fallback_url = fallback_url;
                return result;
            }
        };

        let display_context = self.codec.with_defaults(context.clone());
        let terminal = match self.resolver.resolve(&start_url).await {
            Ok(terminal) => terminal,
            Err(error) => {
                let mut result =
                    ResolutionResult::failed(display_context, error.kind(), &error);
                if let Some(detail) = result.error.as_mut() {
                    detail.hop = Some(error.hop());
                }
                result.hops = error.hops().to_vec();
                result.fallback_url = Some(error.start_url().to_string());
                result.last_url = Some(error.last_url().to_string());
                return result;
            }
        };

        let candidates = classify::classify(&terminal.content, &terminal.url, &self.rules);

        let quality = request
            .quality
            .clone()
            .or_else(|| context.quality_hint.clone())
            .filter(|quality| !quality.trim().is_empty());
        let hints = UnitHints {
            quality: quality.clone(),
            fallback_quality: context.quality_hint.clone(),
        };
        let units = aggregate::aggregate(&candidates, &hints);

        let status = if units
            .iter()
            .any(|unit| unit.status == UnitStatus::Available)
        {
            Status::Resolved
        } else {
            Status::NoLinks
        };

        let actions = if terminal.is_archive_only {
            vec![Action::Download]
        } else {
            vec![Action::Stream, Action::Download]
        };
        let action = request.action.map(|action| {
            if terminal.is_archive_only {
                Action::Download
            } else {
                action
            }
        });

        let selection = quality
            .as_ref()
            .and_then(|_| self.select(&context, &units));

        ResolutionResult {
            status,
            context: display_context,
            units,
            is_archive_only: terminal.is_archive_only,
            terminal_title: terminal.title,
            actions,
            action,
            hops: terminal.hops,
            selection,
            fallback_url: Some(start_url.to_string()),
            last_url: Some(terminal.url.to_string()),
            error: None,
        }
    }

    fn decode(&self, request: &ResolveRequest) -> Result<RoutingContext, DecodeError> {
        match request.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => codec::decode(token),
            _ if !request.params.is_empty() => codec::decode_params(
                request
                    .params
                    .iter()
                    .map(|(key, value)| (key.as_str(), value.as_str())),
            ),
            _ => Err(DecodeError::Empty),
        }
    }

    /// Auto-selects when the request narrows the result to a single quality
    /// group holding exactly one preferred link.
    fn select(&self, context: &RoutingContext, units: &[ContentUnit]) -> Option<Selection> {
        let mut groups = units.iter().flat_map(|unit| unit.groups.iter());
        let group = match (groups.next(), groups.next()) {
            (Some(only), None) => only,
            _ => return None,
        };

        let link = aggregate::select_preferred(group)?;
        let next = RoutingContext {
            destination_ref: link.url.clone(),
            server_hint: Some(link.label.clone()),
            quality_hint: Some(group.quality.clone()),
            ..context.clone()
        };

        match codec::encode(&next) {
            Ok(token) => Some(Selection {
                link: link.clone(),
                quality: group.quality.clone(),
                token,
            }),
            Err(error) => {
                tracing::warn!(%error, "failed to mint token for selected link");
                None
            }
        }
    }
}

fn absolute_url(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Url::parse(value).ok().map(|url| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::HostTier;
    use crate::resolver::{FetchError, Page};
    use async_trait::async_trait;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    struct StaticFetcher {
        pages: HashMap<String, String>,
    }

    impl StaticFetcher {
        fn with(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.into(), body.into());
            self
        }
    }

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch(&self, url: &Url) -> Result<Page, FetchError> {
            self.pages
                .get(url.as_str())
                .map(|body| Page {
                    url: url.clone(),
                    body: body.clone(),
                })
                .ok_or_else(|| FetchError::Status {
                    url: url.clone(),
                    status: 404,
                })
        }
    }

    const TERMINAL: &str = r#"
        <h1>Movie (2021)</h1>
        <h3>Movie 2021 1080p [2.2GB]</h3>
        <a class="maxbutton" href="https://drive.google.com/file/d/abc">[G-Drive]</a>
        <a class="maxbutton" href="https://mega.nz/file/abc">[Mega]</a>
        <h3>Movie 2021 720p [1.1GB]</h3>
        <a class="maxbutton" href="https://files.example/720">[Mirror]</a>
        <a class="maxbutton" href="https://t.me/joinchat/x">Join Telegram</a>
    "#;

    fn engine(fetcher: StaticFetcher) -> Engine<StaticFetcher> {
        let mut config = Config::default();
        config.resolver.max_hops = 1;
        config.codec.legacy_base_url = Some("https://site.example/?p=".into());
        let resolver = Resolver::new(fetcher, &config.resolver).unwrap();
        Engine::with_resolver(resolver, &config).unwrap()
    }

    fn chain() -> StaticFetcher {
        StaticFetcher::default()
            .with(
                "https://dist.example/go",
                r#"<script>var url = "https://links.example/final";</script>"#,
            )
            .with("https://links.example/final", TERMINAL)
    }

    fn token() -> String {
        codec::encode(&RoutingContext {
            destination_ref: "https://dist.example/go".into(),
            title: "Movie (2021)".into(),
            ..RoutingContext::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn resolves_groups_and_offers_both_actions() {
        let result = engine(chain()).resolve(ResolveRequest::from_token(token())).await;

        assert_eq!(result.status, Status::Resolved);
        assert_eq!(result.terminal_title, "Movie (2021)");
        assert_eq!(result.actions, [Action::Stream, Action::Download]);
        assert_eq!(result.hops.len(), 1);
        assert_eq!(result.units.len(), 1);

        let groups = &result.units[0].groups;
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].quality, "1080p");
        assert_eq!(groups[0].size_estimate, "2.2GB");
        assert_eq!(groups[0].servers[0].host_tier, HostTier::Preferred);
        assert_eq!(groups[1].quality, "720p");
        assert!(result.selection.is_none());
        assert_eq!(result.fallback_url.as_deref(), Some("https://dist.example/go"));
    }

    #[tokio::test]
    async fn quality_request_auto_selects_the_sole_preferred_link() {
        let request = ResolveRequest {
            quality: Some("1080p".into()),
            ..ResolveRequest::from_token(token())
        };
        let result = engine(chain()).resolve(request).await;

        let selection = result.selection.expect("a link should be selected");
        assert_eq!(selection.link.label, "G-Drive");
        let next = codec::decode(&selection.token).unwrap();
        assert_eq!(next.destination_ref, "https://drive.google.com/file/d/abc");
        assert_eq!(next.server_hint.as_deref(), Some("G-Drive"));
        assert_eq!(next.quality_hint.as_deref(), Some("1080p"));
        assert_eq!(next.title, "Movie (2021)");
    }

    #[tokio::test]
    async fn archive_terminal_only_offers_download() {
        let fetcher = StaticFetcher::default()
            .with(
                "https://dist.example/go",
                r#"<a href="/t?token=1">continue</a>"#,
            )
            .with(
                "https://dist.example/t?token=1",
                r#"<h1>Show.S01.720p.zip</h1>
                   <a class="maxbutton" href="https://gofile.io/d/x">[GoFile]</a>"#,
            );

        let request = ResolveRequest {
            action: Some(Action::Stream),
            ..ResolveRequest::from_token(token())
        };
        let result = engine(fetcher).resolve(request).await;

        assert!(result.is_archive_only);
        assert_eq!(result.actions, [Action::Download]);
        assert_eq!(result.action, Some(Action::Download));
    }

    #[tokio::test]
    async fn extraction_failure_keeps_manual_continuation_urls() {
        let fetcher = StaticFetcher::default().with("https://dist.example/go", "<p>captcha</p>");
        let result = engine(fetcher).resolve(ResolveRequest::from_token(token())).await;

        assert_eq!(result.status, Status::Failed);
        let error = result.error.expect("error detail");
        assert_eq!(error.kind, "extraction");
        assert_eq!(error.hop, Some(0));
        assert_eq!(result.fallback_url.as_deref(), Some("https://dist.example/go"));
        assert_eq!(result.last_url.as_deref(), Some("https://dist.example/go"));
        assert_eq!(result.context.title, "Movie (2021)");
    }

    /// Serves pages from a [`StaticFetcher`] but never answers for `stall_on`.
    struct StallingFetcher {
        pages: StaticFetcher,
        stall_on: &'static str,
    }

    #[async_trait]
    impl PageFetcher for StallingFetcher {
        async fn fetch(&self, url: &Url) -> Result<Page, FetchError> {
            if url.as_str() == self.stall_on {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            }
            self.pages.fetch(url).await
        }
    }

    #[tokio::test]
    async fn request_timeout_keeps_the_hops_already_reached() {
        let fetcher = StallingFetcher {
            pages: StaticFetcher::default().with(
                "https://dist.example/go",
                r#"<script>var url = "https://dist.example/hop2";</script>"#,
            ),
            stall_on: "https://dist.example/hop2",
        };

        let mut config = Config::default();
        config.resolver.max_hops = 2;
        config.resolver.request_timeout = std::time::Duration::from_millis(200);
        let resolver = Resolver::new(fetcher, &config.resolver).unwrap();
        let engine = Engine::with_resolver(resolver, &config).unwrap();

        let result = engine.resolve(ResolveRequest::from_token(token())).await;

        assert_eq!(result.status, Status::Failed);
        let error = result.error.expect("error detail");
        assert_eq!(error.kind, "timeout");
        assert_eq!(error.hop, Some(1));
        assert_eq!(result.hops.len(), 1);
        assert_eq!(result.hops[0].next_url.as_str(), "https://dist.example/hop2");
        assert_eq!(result.fallback_url.as_deref(), Some("https://dist.example/go"));
        assert_eq!(result.last_url.as_deref(), Some("https://dist.example/hop2"));
    }

    #[tokio::test]
    async fn undecodable_token_falls_back_to_defaults() {
        let result = engine(chain())
            .resolve(ResolveRequest::from_token("%%%"))
            .await;

        assert_eq!(result.status, Status::Failed);
        assert_eq!(result.context.title, codec::DEFAULT_TITLE);
        assert_eq!(result.error.unwrap().kind, "decode");
        assert!(result.fallback_url.is_none());
    }

    #[tokio::test]
    async fn legacy_params_and_numeric_ids_are_accepted() {
        let fetcher = chain().with(
            "https://site.example/?p=42",
            r#"var url = "https://links.example/final";"#,
        );
        let engine = engine(fetcher);

        let result = engine
            .resolve(ResolveRequest {
                params: vec![("url".into(), "https://dist.example/go".into())],
                ..ResolveRequest::default()
            })
            .await;
        assert_eq!(result.status, Status::Resolved);

        let result = engine.resolve(ResolveRequest::from_token("42")).await;
        assert_eq!(result.status, Status::Resolved);
        assert_eq!(result.fallback_url.as_deref(), Some("https://site.example/?p=42"));
    }

    #[tokio::test]
    async fn empty_terminal_page_reports_no_links() {
        let fetcher = StaticFetcher::default()
            .with(
                "https://dist.example/go",
                r#"var url = "https://links.example/empty";"#,
            )
            .with("https://links.example/empty", "<h1>Nothing yet</h1>");
        let result = engine(fetcher).resolve(ResolveRequest::from_token(token())).await;

        assert_eq!(result.status, Status::NoLinks);
        assert_eq!(result.units.len(), 1);
        assert_eq!(result.units[0].status, UnitStatus::NoLinksAvailable);
    }

    #[test]
    fn actions_parse_from_query_values() {
        assert_eq!("Stream".parse::<Action>(), Ok(Action::Stream));
        assert_eq!("download".parse::<Action>(), Ok(Action::Download));
        assert!("play".parse::<Action>().is_err());
    }

    #[test]
    fn result_serializes_in_camel_case() {
        let result = ResolutionResult::failed(RoutingContext::default(), "decode", "bad token");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["isArchiveOnly"], false);
        assert_eq!(value["error"]["kind"], "decode");
        assert!(value.get("selection").is_none());
    }
}
