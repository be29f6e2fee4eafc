use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use gwrap_storage::{RequestStore, StorageError, TimeBucket};

const ADMIN_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<RequestStore>,
}

pub fn admin_router(store: Arc<RequestStore>) -> Router {
    Router::new()
        .route("/stats", get(stats))
        .route("/requests", get(requests))
        .route("/requests/{id}", get(request_by_id))
        .route("/timeseries", get(timeseries))
        .with_state(AdminState { store })
}

#[derive(Deserialize)]
struct WindowQuery {
    #[serde(default = "default_duration")]
    duration: String,
}

fn default_duration() -> String {
    "24h".to_string()
}

fn window(duration: &str) -> (OffsetDateTime, TimeBucket) {
    match duration {
        "7d" => (
            OffsetDateTime::now_utc() - time::Duration::days(7),
            TimeBucket::Day,
        ),
        _ => (
            OffsetDateTime::now_utc() - time::Duration::hours(24),
            TimeBucket::Hour,
        ),
    }
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_page")]
    page: u64,
    #[serde(default = "default_per_page")]
    per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

async fn stats(State(state): State<AdminState>, Query(query): Query<WindowQuery>) -> Response {
    let (since, _) = window(&query.duration);
    bounded(state.store.stats(since))
        .await
        .map(|stats| Json(stats).into_response())
        .unwrap_or_else(storage_error)
}

async fn requests(State(state): State<AdminState>, Query(query): Query<PageQuery>) -> Response {
    let page = query.page.max(1);
    let per_page = if (1..=100).contains(&query.per_page) {
        query.per_page
    } else {
        default_per_page()
    };
    bounded(state.store.recent(page, per_page))
        .await
        .map(|paged| Json(paged).into_response())
        .unwrap_or_else(storage_error)
}

async fn request_by_id(State(state): State<AdminState>, Path(id): Path<i64>) -> Response {
    let row = match bounded(state.store.find_by_id(id)).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response();
        }
        Err(err) => return storage_error(err),
    };

    let mut request_json = row.request_json.clone();
    redact_inline_data(&mut request_json);
    Json(json!({
        "id": row.id,
        "timestamp": row.timestamp.format(&Rfc3339).unwrap_or_default(),
        "model": row.model,
        "request": request_json,
        "response": row.response_json,
        "status_code": row.status_code,
        "success": row.success,
        "error": row.error,
        "cost": {
            "input": row.cost_input,
            "output": row.cost_output,
            "total": row.cost_total,
        },
        "temperature": row.temperature,
        "key_source": row.key_source,
        "cache_hit": row.cache_hit,
        "request_hash": row.request_hash,
        "duration_ms": row.duration_ms,
        "prompt_tokens": row.prompt_tokens,
        "output_tokens": row.output_tokens,
        "total_tokens": row.total_tokens,
        "is_vision": row.is_vision,
    }))
    .into_response()
}

async fn timeseries(State(state): State<AdminState>, Query(query): Query<WindowQuery>) -> Response {
    let (since, bucket) = window(&query.duration);
    bounded(state.store.timeseries(since, bucket))
        .await
        .map(|points| Json(points).into_response())
        .unwrap_or_else(storage_error)
}

/// Admin aggregates run against the same store as the hot path and are
/// capped at 10s.
async fn bounded<T>(
    query: impl Future<Output = Result<T, StorageError>>,
) -> Result<T, String> {
    match tokio::time::timeout(ADMIN_QUERY_TIMEOUT, query).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err("query timed out".to_string()),
    }
}

fn storage_error(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

/// The admin view keeps inline data mime types but drops the payload bytes.
fn redact_inline_data(request: &mut Value) {
    let Some(contents) = request.get_mut("contents").and_then(Value::as_array_mut) else {
        return;
    };
    for content in contents {
        let Some(parts) = content.get_mut("parts").and_then(Value::as_array_mut) else {
            continue;
        };
        for part in parts {
            if let Some(data) = part
                .get_mut("inlineData")
                .and_then(|blob| blob.get_mut("data"))
            {
                *data = Value::String("[redacted]".to_string());
            }
        }
    }
}
