//! linkhop library crate.
//!
//! Resolves obfuscated multi-hop distribution links into classified,
//! quality-grouped destination links. The pipeline runs codec, resolver,
//! classifier and aggregator in that order; see [`engine::Engine`].

pub mod aggregate;
pub mod app;
pub mod classify;
pub mod codec;
pub mod config;
pub mod engine;
pub mod resolver;
pub mod retry;
pub mod state;
mod telemetry;
pub mod util;

pub use codec::{Codec, DecodeError, RoutingContext};
pub use engine::{Action, Engine, ResolutionResult, ResolveRequest, Status};

/// Installs the tracing subscriber and, with the `telemetry` feature, the
/// Prometheus recorder.
pub fn init() -> anyhow::Result<()> {
    telemetry::init()
}

/// Renders the Prometheus metrics if the recorder has been installed.
#[cfg(feature = "telemetry")]
pub fn scrape_metrics() -> Option<String> {
    telemetry::prometheus_metrics()
}
