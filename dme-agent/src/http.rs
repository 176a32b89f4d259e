// DME Agent - Telemetry simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Plain HTTP query service
//!
//! Unauthenticated, read-only JSON view of the metric store. The two data
//! routes are rate limited per caller IP; a caller over its ceiling gets an
//! immediate 429.

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{Local, SecondsFormat};
use dme::{MetricStore, Oid, RateLimiter};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, warn};

/// State shared by the HTTP handlers
#[derive(Debug)]
pub struct HttpState {
    store: Arc<MetricStore>,
    oid_limiter: Mutex<RateLimiter<IpAddr>>,
    all_limiter: Mutex<RateLimiter<IpAddr>>,
}

impl HttpState {
    /// State with per-minute ceilings for /oid/{oid} and /all
    pub fn new(store: Arc<MetricStore>, oid_rate_per_min: u32, all_rate_per_min: u32) -> Self {
        Self {
            store,
            oid_limiter: Mutex::new(RateLimiter::per_minute(oid_rate_per_min)),
            all_limiter: Mutex::new(RateLimiter::per_minute(all_rate_per_min)),
        }
    }
}

/// Build the router
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/oid/:oid", get(oid_handler))
        .route("/all", get(all_handler))
        .route("/oids", get(oids_handler))
        .with_state(state)
}

fn now_iso() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Consume a token for `caller`, or build the 429 answer
fn admit(limiter: &Mutex<RateLimiter<IpAddr>>, caller: IpAddr, route: &str) -> Option<Response> {
    let verdict = limiter
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .check(caller, Instant::now());
    let wait = verdict.err()?;
    let retry_after = wait.as_secs_f64().ceil().max(1.0) as u64;
    warn!(%caller, route, retry_after, "rate limit exceeded");
    Some(
        (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after.to_string())],
            Json(json!({
                "error": "rate limit exceeded",
                "retry_after_secs": retry_after,
            })),
        )
            .into_response(),
    )
}

/// Health response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

/// Health check handler.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: now_iso(),
    })
}

/// Single metric response
#[derive(Serialize)]
struct OidResponse {
    oid: String,
    name: String,
    value: i64,
    timestamp: String,
}

/// Value of one metric.
async fn oid_handler(
    State(state): State<Arc<HttpState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(oid): Path<String>,
) -> Response {
    if let Some(limited) = admit(&state.oid_limiter, peer.ip(), "/oid") {
        return limited;
    }

    let snapshot = state.store.snapshot();
    let found = oid
        .parse::<Oid>()
        .ok()
        .and_then(|parsed| state.store.schema().by_oid(&parsed))
        .and_then(|metric| Some((metric, snapshot.value_by_oid(&metric.oid)?)));

    match found {
        Some((metric, value)) => Json(OidResponse {
            oid: metric.oid.to_string(),
            name: metric.name.clone(),
            value,
            timestamp: now_iso(),
        })
        .into_response(),
        None => {
            debug!(%oid, "unknown OID requested");
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "OID not found", "oid": oid })),
            )
                .into_response()
        }
    }
}

/// All metrics response
#[derive(Serialize)]
struct AllResponse {
    data: Map<String, Value>,
    timestamp: String,
}

/// Every metric keyed by name.
async fn all_handler(
    State(state): State<Arc<HttpState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if let Some(limited) = admit(&state.all_limiter, peer.ip(), "/all") {
        return limited;
    }

    let data = state
        .store
        .snapshot()
        .iter()
        .map(|(metric, value)| (metric.name.clone(), Value::from(value)))
        .collect();
    Json(AllResponse {
        data,
        timestamp: now_iso(),
    })
    .into_response()
}

/// OID listing response
#[derive(Serialize)]
struct OidsResponse {
    oids: Vec<String>,
    descriptions: BTreeMap<String, String>,
}

/// Every OID with its metric name.
async fn oids_handler(State(state): State<Arc<HttpState>>) -> Json<OidsResponse> {
    let schema = state.store.schema();
    Json(OidsResponse {
        oids: schema.iter().map(|m| m.oid.to_string()).collect(),
        descriptions: schema
            .iter()
            .map(|m| (m.oid.to_string(), m.name.clone()))
            .collect(),
    })
}
