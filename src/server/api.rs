// Query/Export API - filtered reads over the signal store
// Store calls are blocking SQLite work, so every handler hops through
// spawn_blocking

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::server::AppState;
use crate::store::export::{signals_to_csv, signals_to_json};
use crate::store::{SignalFilter, SignalRow};

#[derive(Debug, Deserialize)]
pub struct SignalsQueryParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub signal_type: Option<String>,
    pub direction: Option<String>,
    pub outcome: Option<String>,
    /// ISO 8601 timestamp or plain date, e.g. "2025-06-02T09:30:00Z" or
    /// "2025-06-02".
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionsQueryParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQueryParams {
    pub signal_type: Option<String>,
    pub direction: Option<String>,
    pub outcome: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// "csv" or "json" (default json).
    pub format: Option<String>,
}

#[derive(Serialize)]
pub struct SignalsResponse {
    pub signals: Vec<SignalRow>,
    pub total: u64,
}

/// Accepts a full RFC 3339 timestamp or a bare date. A bare end date means
/// the end of that day.
fn parse_date_ms(value: &str, end_of_day: bool) -> Option<i64> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc).timestamp_millis());
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)?
    } else {
        date.and_hms_opt(0, 0, 0)?
    };
    Some(time.and_utc().timestamp_millis())
}

fn build_filter(
    signal_type: Option<String>,
    direction: Option<String>,
    outcome: Option<String>,
    start_date: Option<&str>,
    end_date: Option<&str>,
    limit: Option<u32>,
    offset: Option<u32>,
) -> SignalFilter {
    SignalFilter {
        signal_type,
        direction,
        outcome,
        start_ms: start_date.and_then(|d| parse_date_ms(d, false)),
        end_ms: end_date.and_then(|d| parse_date_ms(d, true)),
        limit,
        offset,
    }
}

/// GET /api/signals
pub async fn get_signals(
    State(state): State<AppState>,
    Query(params): Query<SignalsQueryParams>,
) -> impl IntoResponse {
    let filter = build_filter(
        params.signal_type,
        params.direction,
        params.outcome,
        params.start_date.as_deref(),
        params.end_date.as_deref(),
        params.limit,
        params.offset,
    );

    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || {
        let signals = store.query_signals(&filter)?;
        let total = store.count_signals(&filter)?;
        Ok::<_, crate::core::error::StoreError>(SignalsResponse { signals, total })
    })
    .await;

    match result {
        Ok(Ok(response)) => (StatusCode::OK, Json(serde_json::json!(response))),
        Ok(Err(error)) => {
            error!(%error, "signal query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": error.to_string()})),
            )
        }
        Err(join_error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": join_error.to_string()})),
        ),
    }
}

/// GET /api/sessions
pub async fn get_sessions(
    State(state): State<AppState>,
    Query(params): Query<SessionsQueryParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(20).min(500);
    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.query_sessions(limit)).await;

    match result {
        Ok(Ok(sessions)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "sessions": sessions })),
        ),
        Ok(Err(error)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": error.to_string()})),
        ),
        Err(join_error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": join_error.to_string()})),
        ),
    }
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.aggregate_stats()).await;

    match result {
        Ok(Ok(stats)) => (StatusCode::OK, Json(serde_json::json!(stats))),
        Ok(Err(error)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": error.to_string()})),
        ),
        Err(join_error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": join_error.to_string()})),
        ),
    }
}

/// GET /api/signals/export
pub async fn export_signals(
    State(state): State<AppState>,
    Query(params): Query<ExportQueryParams>,
) -> impl IntoResponse {
    let filter = build_filter(
        params.signal_type,
        params.direction,
        params.outcome,
        params.start_date.as_deref(),
        params.end_date.as_deref(),
        Some(10_000),
        None,
    );

    let store = state.store.clone();
    let rows = match tokio::task::spawn_blocking(move || store.query_signals(&filter)).await {
        Ok(Ok(rows)) => rows,
        Ok(Err(error)) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "application/json")],
                format!(r#"{{"error":"{}"}}"#, error),
            );
        }
        Err(join_error) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "application/json")],
                format!(r#"{{"error":"{}"}}"#, join_error),
            );
        }
    };

    if params.format.as_deref() == Some("csv") {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            signals_to_csv(&rows),
        )
    } else {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            signals_to_json(&rows),
        )
    }
}
