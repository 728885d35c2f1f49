//! HTTP surface of the symbol service
//!
//! `GET /add?symbols=A&symbols=B` and `GET /split?symbol=S` answer with the
//! parsed result, or with the empty fallback payload when inference or reply
//! parsing fails. Only malformed input gets an error status.

pub mod tracker;

use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use infini_craft::{CraftService, ServiceStats, Symbol, SymbolPair, SymbolResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::{info, instrument, warn};
use url::form_urlencoded;
use uuid::Uuid;

pub use tracker::{Outcome, RequestGuard, RequestStats, RequestTracker};

#[derive(Debug, Clone)]
pub struct AppState {
    pub service: Arc<CraftService>,
    pub tracker: Arc<RequestTracker>,
}

impl AppState {
    pub fn new(service: Arc<CraftService>) -> Self {
        Self {
            service,
            tracker: Arc::new(RequestTracker::new()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_requests: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub requests: RequestStats,
    pub cache: ServiceStats,
}

type Rejection = (StatusCode, Json<ErrorResponse>);

fn bad_request(code: &str, error: impl Into<String>) -> Rejection {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

pub fn create_router(state: AppState, cors: bool) -> Router {
    let app = Router::new()
        .route("/add", get(add_handler))
        .route("/split", get(split_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default())),
        );

    if cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// All values of a repeated query parameter, percent-decoded
fn query_values(query: Option<&str>, key: &str) -> Vec<String> {
    query
        .map(|q| {
            form_urlencoded::parse(q.as_bytes())
                .filter(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
                .collect()
        })
        .unwrap_or_default()
}

fn to_symbol(value: String) -> Result<Symbol, Rejection> {
    Symbol::new(value).map_err(|e| bad_request("EMPTY_SYMBOL", e.to_string()))
}

fn parse_add_query(query: Option<&str>) -> Result<(Symbol, Symbol), Rejection> {
    let mut symbols = query_values(query, "symbols");
    match symbols.len() {
        0 => Err(bad_request(
            "MISSING_PARAMETER",
            "query parameter 'symbols' is required",
        )),
        2 => {
            let second = to_symbol(symbols.pop().unwrap_or_default())?;
            let first = to_symbol(symbols.pop().unwrap_or_default())?;
            Ok((first, second))
        }
        n => Err(bad_request(
            "INVALID_SYMBOL_COUNT",
            format!("expected exactly 2 symbols, got {}", n),
        )),
    }
}

fn parse_split_query(query: Option<&str>) -> Result<Symbol, Rejection> {
    match query_values(query, "symbol").pop() {
        Some(value) => to_symbol(value),
        None => Err(bad_request(
            "MISSING_PARAMETER",
            "query parameter 'symbol' is required",
        )),
    }
}

#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
async fn add_handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<SymbolResult>, Rejection> {
    let request = state.tracker.start_request();

    let (first, second) = match parse_add_query(query.as_deref()) {
        Ok(symbols) => symbols,
        Err(rejection) => {
            request.finish(Outcome::Rejected);
            return Err(rejection);
        }
    };

    let (result, outcome) = match state.service.combine(&first, &second).await {
        Ok(result) => (result, Outcome::Success),
        Err(e) => {
            warn!("add [{}, {}] answered with fallback: {}", first, second, e);
            (SymbolResult::empty(), Outcome::Fallback)
        }
    };

    request.finish(outcome);
    Ok(Json(result))
}

#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
async fn split_handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<SymbolPair>, Rejection> {
    let request = state.tracker.start_request();

    let symbol = match parse_split_query(query.as_deref()) {
        Ok(symbol) => symbol,
        Err(rejection) => {
            request.finish(Outcome::Rejected);
            return Err(rejection);
        }
    };

    let (pair, outcome) = match state.service.split(&symbol).await {
        Ok(pair) => (pair, Outcome::Success),
        Err(e) => {
            warn!("split {} answered with fallback: {}", symbol, e);
            (SymbolPair::empty(), Outcome::Fallback)
        }
    };

    request.finish(outcome);
    Ok(Json(pair))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.tracker.uptime().as_secs(),
        active_requests: state.tracker.active_requests(),
    })
}

async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = StatsResponse {
        requests: state.tracker.get_stats(),
        cache: state.service.stats(),
    };
    info!(
        "stats: {} requests, {} fallbacks",
        stats.requests.total_requests, stats.requests.fallback_requests
    );
    Json(stats)
}
