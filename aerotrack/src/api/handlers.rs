//! Request handlers for the JSON endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, AppState};
use crate::tracker::{Bounds, SearchFilters};

/// `GET /api/v1/aircraft`
pub async fn list_aircraft(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.tracker.get_all()))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    callsign: Option<String>,
    #[serde(rename = "type")]
    aircraft_type: Option<String>,
    registration: Option<String>,
    bounds: Option<String>,
}

/// `GET /api/v1/aircraft/search`
pub async fn search_aircraft(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    let bounds = params.bounds.as_deref().map(parse_bounds).transpose()?;
    let filters = SearchFilters {
        callsign: params.callsign,
        aircraft_type: params.aircraft_type,
        registration: params.registration,
        bounds,
    };
    Ok(Json(json!(state.tracker.search(&filters))))
}

/// `GET /api/v1/aircraft/{icao}`
pub async fn aircraft_by_icao(
    State(state): State<AppState>,
    Path(icao): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let icao = icao.trim().to_uppercase();
    match state.tracker.get(&icao) {
        Some(ac) => Ok(Json(json!(ac))),
        None => Err(ApiError::NotFound("aircraft not found")),
    }
}

/// `GET /api/v1/aircraft/{icao}/trail`
pub async fn aircraft_trail(
    State(state): State<AppState>,
    Path(icao): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let icao = icao.trim().to_uppercase();
    let trail = state.tracker.get_trail(&icao).await?;
    Ok(Json(json!(trail)))
}

/// `GET /api/v1/aircraft/{icao}/faa`
pub async fn aircraft_registry(
    State(state): State<AppState>,
    Path(icao): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.as_ref().ok_or(ApiError::Unavailable("registry lookup not available"))?;
    let icao = icao.trim().to_uppercase();
    match db.faa_info(&icao).await? {
        Some(info) => Ok(Json(json!(info))),
        None => Err(ApiError::NotFound("registry record not found")),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

/// `GET /api/v1/aircraft/{icao}/history`
pub async fn aircraft_history(
    State(state): State<AppState>,
    Path(icao): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.as_ref().ok_or(ApiError::Unavailable("history not available"))?;
    let icao = icao.trim().to_uppercase();
    let limit = clamp_limit(params.limit, 1, 1000, 100);
    let positions = db
        .position_history_range(&icao, params.from, params.to, limit)
        .await?;
    Ok(Json(json!(positions)))
}

/// `GET /api/v1/receiver`
pub async fn receiver(State(state): State<AppState>) -> Json<Value> {
    match state.tracker.receiver_location() {
        Some(rx) => Json(json!({ "lat": rx.lat, "lon": rx.lon })),
        None => Json(json!({})),
    }
}

/// `GET /api/v1/receiver/health`
pub async fn receiver_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "system": state.health.snapshot(),
        "components": state.readiness.snapshot(),
        "ready": state.readiness.ready(),
    }))
}

/// `GET /api/v1/receiver/feed`
pub async fn receiver_feed(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.feed.snapshot()))
}

/// `GET /api/v1/stats`
pub async fn stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.tracker.stats();
    let uptime = state.health.snapshot();
    Json(json!({
        "uptime": uptime.uptime,
        "aircraft_now": stats.aircraft_count,
        "total_seen": stats.total_seen,
        "max_range_nm": stats.max_range_nm,
        "max_range_icao": stats.max_range_icao,
    }))
}

/// `GET /api/v1/stats/overall`
pub async fn stats_overall(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let db = state.db.as_ref().ok_or(ApiError::Unavailable("database not available"))?;
    let mut body = json!(db.overall_stats().await?);
    body["peaks"] = json!(db.peak_stats().await?);
    Ok(Json(body))
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowParams {
    hours: Option<i64>,
    days: Option<i64>,
    limit: Option<i64>,
}

/// `GET /api/v1/stats/hourly`
pub async fn stats_hourly(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.as_ref().ok_or(ApiError::Unavailable("database not available"))?;
    let hours = clamp_limit(params.hours, 1, 168, 24) as i32;
    Ok(Json(json!(db.hourly_stats(hours).await?)))
}

/// `GET /api/v1/stats/daily`
pub async fn stats_daily(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.as_ref().ok_or(ApiError::Unavailable("database not available"))?;
    let days = clamp_limit(params.days, 1, 90, 7) as i32;
    Ok(Json(json!(db.daily_stats(days).await?)))
}

/// `GET /api/v1/stats/types`
pub async fn stats_types(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.as_ref().ok_or(ApiError::Unavailable("database not available"))?;
    let limit = clamp_limit(params.limit, 1, 50, 10);
    Ok(Json(json!(db.top_aircraft_types(limit).await?)))
}

/// `GET /api/v1/stats/operators`
pub async fn stats_operators(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.as_ref().ok_or(ApiError::Unavailable("database not available"))?;
    let limit = clamp_limit(params.limit, 1, 50, 10);
    Ok(Json(json!(db.top_operators(limit).await?)))
}

/// `GET /api/v1/stats/altitude`
pub async fn stats_altitude(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let db = state.db.as_ref().ok_or(ApiError::Unavailable("database not available"))?;
    Ok(Json(json!(db.altitude_distribution().await?)))
}

/// `GET /api/v1/stats/recent`
pub async fn stats_recent(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.as_ref().ok_or(ApiError::Unavailable("database not available"))?;
    let limit = clamp_limit(params.limit, 1, 200, 50);
    Ok(Json(json!(db.recent_aircraft(limit).await?)))
}

/// `GET /api/v1/stats/range`
pub async fn stats_range(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.range.snapshot()))
}

/// `GET /api/v1/flights`
pub async fn recent_flights(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.as_ref().ok_or(ApiError::Unavailable("database not available"))?;
    let limit = clamp_limit(params.limit, 1, 200, 50);
    Ok(Json(json!(db.recent_flights(limit).await?)))
}

/// `GET /api/v1/flights/{id}`
pub async fn flight_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.as_ref().ok_or(ApiError::Unavailable("database not available"))?;
    match db.flight_by_id(id).await? {
        Some(flight) => Ok(Json(json!(flight))),
        None => Err(ApiError::NotFound("flight not found")),
    }
}

/// `GET /api/v1/health`
pub async fn service_health(State(state): State<AppState>) -> Json<Value> {
    let mut body = json!({
        "status": "ok",
        "uptime": state.health.snapshot().uptime,
        "aircraft_count": state.tracker.count(),
    });
    if let Some(node_name) = &state.node_name {
        body["node_name"] = json!(node_name);
    }
    Json(body)
}

/// `POST /api/v1/webhooks/test`
pub async fn webhook_test(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let webhooks = state
        .webhooks
        .as_ref()
        .ok_or(ApiError::Unavailable("webhooks not configured"))?;
    webhooks.send_test().await;
    Ok(Json(json!({ "status": "sent" })))
}

/// Parse `minLat,minLon,maxLat,maxLon`.
fn parse_bounds(raw: &str) -> Result<Bounds, ApiError> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 4 {
        return Err(ApiError::BadRequest(
            "bounds must be minLat,minLon,maxLat,maxLon".to_string(),
        ));
    }

    let mut values = [0.0f64; 4];
    for (i, part) in parts.iter().enumerate() {
        values[i] = part
            .trim()
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("invalid bounds value '{}'", part)))?;
    }

    Ok(Bounds {
        min_lat: values[0],
        min_lon: values[1],
        max_lat: values[2],
        max_lon: values[3],
    })
}

/// Clamp an optional query limit into its documented range.
fn clamp_limit(value: Option<i64>, min: i64, max: i64, default: i64) -> i64 {
    value.unwrap_or(default).clamp(min, max)
}
