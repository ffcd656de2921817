//! Bounded hop resolution.
//!
//! Starting from a distribution URL, every hop fetches a page and extracts
//! the next URL from it. After `max_hops` extraction hops the page reached is
//! the terminal page holding the destination links. Hops run strictly in
//! sequence; failures carry the start URL and the last URL reached so a
//! caller can offer manual continuation.

mod fetcher;
mod strategy;
mod terminal;

use std::time::Duration;

use scraper::Selector;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

use crate::config::ResolverConfig;

pub use fetcher::{FetchError, HttpFetcher, Page, PageFetcher};
pub use strategy::{AnchorToken, ExtractionStrategy, StrategyKind, VariableAssignment};
pub use terminal::TerminalInspector;

/// Outcome of one extraction hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HopResult {
    pub next_url: Url,
    pub strategy_used: StrategyKind,
    pub hop_index: usize,
}

/// Page reached after the last hop.
#[derive(Debug, Clone)]
pub struct TerminalPage {
    pub url: Url,
    pub content: String,
    pub title: String,
    pub is_archive_only: bool,
    pub hops: Vec<HopResult>,
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("hop {hop}: failed to fetch {url}: {source}")]
    Fetch {
        hop: usize,
        url: Url,
        start_url: Url,
        hops: Vec<HopResult>,
        #[source]
        source: FetchError,
    },

    #[error("hop {hop}: no extraction strategy matched {url}")]
    Extraction {
        hop: usize,
        url: Url,
        start_url: Url,
        hops: Vec<HopResult>,
    },

    #[error("hop {hop}: resolution exceeded {timeout:?} while fetching {url}")]
    Deadline {
        hop: usize,
        url: Url,
        start_url: Url,
        hops: Vec<HopResult>,
        timeout: Duration,
    },
}

impl ResolutionError {
    pub fn hop(&self) -> usize {
        match self {
            ResolutionError::Fetch { hop, .. }
            | ResolutionError::Extraction { hop, .. }
            | ResolutionError::Deadline { hop, .. } => *hop,
        }
    }

    pub fn start_url(&self) -> &Url {
        match self {
            ResolutionError::Fetch { start_url, .. }
            | ResolutionError::Extraction { start_url, .. }
            | ResolutionError::Deadline { start_url, .. } => start_url,
        }
    }

    /// URL of the hop that failed; the last one known to exist.
    pub fn last_url(&self) -> &Url {
        match self {
            ResolutionError::Fetch { url, .. }
            | ResolutionError::Extraction { url, .. }
            | ResolutionError::Deadline { url, .. } => url,
        }
    }

    /// Hops completed before the failure.
    pub fn hops(&self) -> &[HopResult] {
        match self {
            ResolutionError::Fetch { hops, .. }
            | ResolutionError::Extraction { hops, .. }
            | ResolutionError::Deadline { hops, .. } => hops,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResolutionError::Fetch { .. } => "fetch",
            ResolutionError::Extraction { .. } => "extraction",
            ResolutionError::Deadline { .. } => "timeout",
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid variable name pattern: {0}")]
    VariablePattern(#[source] regex::Error),

    #[error("invalid title selector `{selector}`: {message}")]
    TitleSelector { selector: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Walks hop chains with a [`PageFetcher`] and an ordered strategy list.
#[derive(Debug)]
pub struct Resolver<F = HttpFetcher> {
    fetcher: F,
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    terminal: TerminalInspector,
    max_hops: usize,
    request_timeout: Duration,
}

impl Resolver<HttpFetcher> {
    pub fn from_config(config: &ResolverConfig) -> Result<Self, BuildError> {
        let fetcher = HttpFetcher::from_config(config).map_err(BuildError::Client)?;
        Self::new(fetcher, config)
    }
}

impl<F> Resolver<F> {
    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    /// Bound on a whole chain, terminal fetch included.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

impl<F: PageFetcher> Resolver<F> {
    /// Builds a resolver with the default strategy order: variable
    /// assignment, then anchor token.
    pub fn new(fetcher: F, config: &ResolverConfig) -> Result<Self, BuildError> {
        let strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
            Box::new(
                VariableAssignment::new(&config.variable_names)
                    .map_err(BuildError::VariablePattern)?,
            ),
            Box::new(AnchorToken::new(config.token_keys.clone())),
        ];

        let title_selectors = config
            .title_selectors
            .iter()
            .map(|selector| {
                Selector::parse(selector).map_err(|err| BuildError::TitleSelector {
                    selector: selector.clone(),
                    message: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            fetcher,
            strategies,
            terminal: TerminalInspector::new(title_selectors, config.archive_extensions.clone()),
            max_hops: config.max_hops,
            request_timeout: config.request_timeout,
        })
    }

    /// Replaces the strategy list. Order is priority order.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    #[tracing::instrument(name = "resolver.resolve", skip(self, start_url), fields(start_url = %start_url, max_hops = self.max_hops))]
    pub async fn resolve(&self, start_url: &Url) -> Result<TerminalPage, ResolutionError> {
        let deadline = Instant::now() + self.request_timeout;
        let mut current = start_url.clone();
        let mut hops = Vec::with_capacity(self.max_hops);

        for hop in 0..self.max_hops {
            let page = self.fetch(hop, &current, start_url, &hops, deadline).await?;

            let Some((next_url, strategy)) = self.extract(hop, &page) else {
                #[cfg(feature = "telemetry")]
                metrics::counter!("linkhop_hop_failures_total", "kind" => "extraction")
                    .increment(1);
                tracing::warn!(hop, url = %page.url, "no extraction strategy matched");

                return Err(ResolutionError::Extraction {
                    hop,
                    url: page.url,
                    start_url: start_url.clone(),
                    hops,
                });
            };

            #[cfg(feature = "telemetry")]
            metrics::counter!("linkhop_hops_total", "strategy" => strategy.as_str()).increment(1);
            tracing::info!(hop, %strategy, next_url = %next_url, "hop resolved");

            hops.push(HopResult {
                next_url: next_url.clone(),
                strategy_used: strategy,
                hop_index: hop,
            });
            current = next_url;
        }

        let page = self
            .fetch(self.max_hops, &current, start_url, &hops, deadline)
            .await?;
        let title = self.terminal.title(&page.body);
        let is_archive_only = self.terminal.is_archive(&title);

        tracing::info!(
            url = %page.url,
            title = %title,
            is_archive_only,
            "reached terminal page"
        );

        Ok(TerminalPage {
            url: page.url,
            content: page.body,
            title,
            is_archive_only,
            hops,
        })
    }

    #[tracing::instrument(name = "resolver.hop", level = "debug", skip(self, url, start_url, hops, deadline), fields(url = %url))]
    async fn fetch(
        &self,
        hop: usize,
        url: &Url,
        start_url: &Url,
        hops: &[HopResult],
        deadline: Instant,
    ) -> Result<Page, ResolutionError> {
        let Ok(fetched) = tokio::time::timeout_at(deadline, self.fetcher.fetch(url)).await else {
            #[cfg(feature = "telemetry")]
            metrics::counter!("linkhop_hop_failures_total", "kind" => "timeout").increment(1);
            tracing::warn!(hop, url = %url, timeout = ?self.request_timeout, "resolution deadline reached");

            return Err(ResolutionError::Deadline {
                hop,
                url: url.clone(),
                start_url: start_url.clone(),
                hops: hops.to_vec(),
                timeout: self.request_timeout,
            });
        };

        fetched.map_err(|source| {
            #[cfg(feature = "telemetry")]
            metrics::counter!("linkhop_hop_failures_total", "kind" => source.kind()).increment(1);
            tracing::warn!(hop, url = %url, error = %source, "hop fetch failed");

            ResolutionError::Fetch {
                hop,
                url: url.clone(),
                start_url: start_url.clone(),
                hops: hops.to_vec(),
                source,
            }
        })
    }

    fn extract(&self, hop: usize, page: &Page) -> Option<(Url, StrategyKind)> {
        self.strategies.iter().find_map(|strategy| {
            let found = strategy.extract(page);
            tracing::debug!(hop, strategy = %strategy.kind(), matched = found.is_some(), "tried extraction strategy");
            found.map(|url| (url, strategy.kind()))
        })
    }
}
