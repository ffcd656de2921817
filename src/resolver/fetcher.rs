use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client};
use thiserror::Error;
use url::Url;

use crate::config::ResolverConfig;
use crate::retry::{self, RetryError, RetryPolicy};

/// A fetched page. `url` is the address after HTTP redirects.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build request for {url}: {source}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: Url, timeout: Duration },

    #[error("request to {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        url: Url,
        attempts: u32,
        #[source]
        source: RetryError,
    },

    #[error("{url} responded with status {status}")]
    Status { url: Url, status: u16 },

    #[error("failed to read response body from {url}: {source}")]
    Body {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Short label used for metrics and result payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Request { .. } => "request",
            FetchError::Timeout { .. } => "timeout",
            FetchError::Transport { .. } => "transport",
            FetchError::Status { .. } => "status",
            FetchError::Body { .. } => "body",
        }
    }
}

/// Retrieves page content for a hop.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Page, FetchError>;
}

/// [`PageFetcher`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
    hop_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(client: Client, retry: RetryPolicy, hop_timeout: Duration) -> Self {
        Self {
            client,
            retry,
            hop_timeout,
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self, reqwest::Error> {
        let redirects = match config.max_http_redirects {
            0 => redirect::Policy::none(),
            limit => redirect::Policy::limited(limit),
        };

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .redirect(redirects)
            .build()?;

        let retry = RetryPolicy::new(
            config.retry.max_attempts,
            config.retry.base_delay,
            config.retry.max_delay,
            config.retry.jitter,
        );

        Ok(Self::new(client, retry, config.hop_timeout))
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Page, FetchError> {
        let request = self
            .client
            .get(url.clone())
            .timeout(self.hop_timeout)
            .build()
            .map_err(|source| FetchError::Request {
                url: url.clone(),
                source,
            })?;

        let attempt =
            retry::execute_with_retry(self.client.clone(), request, self.retry.clone()).await;
        let attempts = attempt.attempts();

        let response = attempt.into_result().map_err(|source| {
            if matches!(&source, RetryError::Request(error) if error.is_timeout()) {
                FetchError::Timeout {
                    url: url.clone(),
                    timeout: self.hop_timeout,
                }
            } else {
                FetchError::Transport {
                    url: url.clone(),
                    attempts,
                    source,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.clone(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        let body = response.text().await.map_err(|source| {
            if source.is_timeout() {
                FetchError::Timeout {
                    url: url.clone(),
                    timeout: self.hop_timeout,
                }
            } else {
                FetchError::Body {
                    url: url.clone(),
                    source,
                }
            }
        })?;

        tracing::debug!(
            url = %url,
            final_url = %final_url,
            attempts,
            bytes = body.len(),
            "fetched hop page"
        );

        Ok(Page {
            url: final_url,
            body,
        })
    }
}
