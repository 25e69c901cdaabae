//! HTTP API.
//!
//! JSON endpoints under `/api/v1` plus the `/ws` event stream. Handlers
//! read tracker snapshots and query the store; nothing here mutates
//! tracker state. Routes backed by the store return 503 when the
//! service runs without a database.

mod handlers;
mod ws;

pub use ws::Hub;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::db::{Database, DbError};
use crate::feed::FeedStats;
use crate::health::{HealthMonitor, Readiness};
use crate::range::RangeTracker;
use crate::tracker::Tracker;
use crate::webhook::WebhookDispatcher;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Tracker>,
    pub db: Option<Arc<Database>>,
    pub feed: Arc<FeedStats>,
    pub health: Arc<HealthMonitor>,
    pub range: Arc<RangeTracker>,
    pub webhooks: Option<Arc<WebhookDispatcher>>,
    pub readiness: Arc<Readiness>,
    pub hub: Arc<Hub>,
    pub node_name: Option<String>,
}

/// Build the full application router. Methods other than the declared
/// ones return 405; CORS is permissive.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/aircraft", get(handlers::list_aircraft))
        .route("/api/v1/aircraft/search", get(handlers::search_aircraft))
        .route("/api/v1/aircraft/{icao}", get(handlers::aircraft_by_icao))
        .route("/api/v1/aircraft/{icao}/trail", get(handlers::aircraft_trail))
        .route("/api/v1/aircraft/{icao}/faa", get(handlers::aircraft_registry))
        .route("/api/v1/aircraft/{icao}/history", get(handlers::aircraft_history))
        .route("/api/v1/receiver", get(handlers::receiver))
        .route("/api/v1/receiver/health", get(handlers::receiver_health))
        .route("/api/v1/receiver/feed", get(handlers::receiver_feed))
        .route("/api/v1/stats", get(handlers::stats))
        .route("/api/v1/stats/overall", get(handlers::stats_overall))
        .route("/api/v1/stats/hourly", get(handlers::stats_hourly))
        .route("/api/v1/stats/daily", get(handlers::stats_daily))
        .route("/api/v1/stats/types", get(handlers::stats_types))
        .route("/api/v1/stats/operators", get(handlers::stats_operators))
        .route("/api/v1/stats/altitude", get(handlers::stats_altitude))
        .route("/api/v1/stats/recent", get(handlers::stats_recent))
        .route("/api/v1/stats/range", get(handlers::stats_range))
        .route("/api/v1/flights", get(handlers::recent_flights))
        .route("/api/v1/flights/{id}", get(handlers::flight_by_id))
        .route("/api/v1/health", get(handlers::service_health))
        .route("/api/v1/webhooks/test", post(handlers::webhook_test))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler-level errors mapped onto HTTP statuses.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(&'static str),
    Unavailable(&'static str),
    Internal,
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        error!(error = %e, "Store query failed");
        ApiError::Internal
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what.to_string()),
            ApiError::Unavailable(what) => (StatusCode::SERVICE_UNAVAILABLE, what.to_string()),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
