//! Axum router exposing the resolution engine over HTTP.

use std::time::Instant;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
#[cfg(feature = "telemetry")]
use axum::http::HeaderValue;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::Level;

use crate::codec::{self, RoutingContext};
use crate::engine::{Action, ResolveRequest};
use crate::state::SharedAppState;

/// Parameters that steer resolution rather than describe the routing context.
const CONTROL_PARAMS: [&str; 4] = ["id", "token", "quality", "action"];

pub fn build_router(state: SharedAppState) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/resolve", get(resolve))
        .route("/decode", get(decode))
        .route("/encode", post(encode));

    #[cfg(feature = "telemetry")]
    let router = router.route("/metrics", get(prometheus_metrics));

    router.with_state(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &Request<Body>| {
                let user_agent = request
                    .headers()
                    .get(header::USER_AGENT)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    user_agent = %user_agent,
                )
            })
            .on_response(
                DefaultOnResponse::new()
                    .level(Level::INFO)
                    .latency_unit(LatencyUnit::Millis),
            ),
    )
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

async fn resolve(
    State(state): State<SharedAppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let start = Instant::now();

    let lookup = |name: &str| {
        params
            .iter()
            .find(|(key, value)| key == name && !value.trim().is_empty())
            .map(|(_, value)| value.clone())
    };

    let action = match lookup("action").map(|value| value.parse::<Action>()) {
        Some(Ok(action)) => Some(action),
        Some(Err(error)) => {
            let response = bad_request(error.to_string());
            record_http_metrics("resolve", response.status(), start);
            return response;
        }
        None => None,
    };

    let request = ResolveRequest {
        token: lookup("id").or_else(|| lookup("token")),
        quality: lookup("quality"),
        action,
        params: params
            .iter()
            .filter(|(key, _)| !CONTROL_PARAMS.contains(&key.as_str()))
            .cloned()
            .collect(),
    };

    let engine = state.snapshot().engine();
    let result = engine.resolve(request).await;

    let response = Json(result).into_response();
    record_http_metrics("resolve", response.status(), start);
    response
}

#[derive(Debug, Deserialize)]
struct DecodeQuery {
    token: Option<String>,
}

async fn decode(
    State(state): State<SharedAppState>,
    Query(query): Query<DecodeQuery>,
) -> Response {
    let start = Instant::now();
    let snapshot = state.snapshot();

    let response = match codec::decode(query.token.as_deref().unwrap_or_default()) {
        Ok(context) => Json(snapshot.codec().with_defaults(context)).into_response(),
        Err(error) => {
            tracing::debug!(%error, "rejected routing token");
            bad_request(error.to_string())
        }
    };

    record_http_metrics("decode", response.status(), start);
    response
}

async fn encode(Json(context): Json<RoutingContext>) -> Response {
    let start = Instant::now();

    let response = match codec::encode(&context) {
        Ok(token) => Json(json!({ "token": token })).into_response(),
        Err(error) => {
            tracing::error!(%error, "failed to encode routing context");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "The routing context could not be encoded." })),
            )
                .into_response()
        }
    };

    record_http_metrics("encode", response.status(), start);
    response
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

#[cfg(feature = "telemetry")]
async fn prometheus_metrics() -> impl IntoResponse {
    match crate::scrape_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )],
            body,
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder unavailable",
        )
            .into_response(),
    }
}

#[cfg(feature = "telemetry")]
fn record_http_metrics(route: &'static str, status: StatusCode, start: Instant) {
    let status_label = status.as_u16().to_string();

    metrics::counter!(
        "linkhop_http_responses_total",
        "route" => route,
        "status" => status_label.clone(),
    )
    .increment(1);
    metrics::histogram!(
        "linkhop_http_response_duration_seconds",
        "route" => route,
        "status" => status_label,
    )
    .record(start.elapsed().as_secs_f64());
}

#[cfg(not(feature = "telemetry"))]
fn record_http_metrics(_route: &'static str, _status: StatusCode, _start: Instant) {}
