//! Structured logging and Prometheus metrics.
//!
//! Logs are JSON lines on stderr so that CLI output on stdout stays
//! machine-readable. The Prometheus handle is process-wide and rendered by the
//! `/metrics` route.

#[cfg(feature = "telemetry")]
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
#[cfg(feature = "telemetry")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "telemetry")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init() -> Result<()> {
    init_tracing()?;
    #[cfg(feature = "telemetry")]
    init_metrics()?;

    Ok(())
}

fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to construct tracing filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .try_init()
        .map_err(|err| anyhow!("failed to initialize tracing subscriber: {err}"))?;

    Ok(())
}

#[cfg(feature = "telemetry")]
fn init_metrics() -> Result<()> {
    let recorder = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    PROMETHEUS_HANDLE
        .set(recorder)
        .map_err(|_| anyhow!("Prometheus recorder has already been initialized"))?;

    metrics::describe_counter!(
        "linkhop_resolutions_total",
        "Resolution requests completed, labelled by result status."
    );
    metrics::describe_histogram!(
        "linkhop_resolution_duration_seconds",
        "End-to-end latency (in seconds) of resolution requests."
    );
    metrics::describe_counter!(
        "linkhop_hops_total",
        "Hops resolved, labelled by the extraction strategy that matched."
    );
    metrics::describe_counter!(
        "linkhop_hop_failures_total",
        "Hops that failed, labelled by failure kind."
    );
    metrics::describe_counter!(
        "linkhop_http_responses_total",
        "HTTP responses emitted by the service, labelled by route and status."
    );
    metrics::describe_histogram!(
        "linkhop_http_response_duration_seconds",
        "Latency histogram (in seconds) for HTTP responses emitted by the service."
    );

    Ok(())
}

#[cfg(feature = "telemetry")]
pub(crate) fn prometheus_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}
