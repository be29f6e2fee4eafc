use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde_json::json;

use gwrap_core::{ProxyEngine, ProxyError, ProxyReply};

#[derive(Clone)]
pub struct ProxyState {
    pub engine: Arc<ProxyEngine>,
}

pub fn proxy_router(engine: Arc<ProxyEngine>) -> Router {
    let state = ProxyState { engine };
    Router::new()
        .route("/health", get(health))
        .route("/v1beta/models/{*name}", post(generate))
        .with_state(state)
}

async fn health(State(state): State<ProxyState>) -> Response {
    axum::Json(json!({
        "status": "ok",
        "models": state.engine.model_names(),
    }))
    .into_response()
}

async fn generate(
    State(state): State<ProxyState>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let user_key = query
        .get("key")
        .map(String::as_str)
        .filter(|key| !key.is_empty());
    match state.engine.handle(&name, user_key, body).await {
        Ok(reply) => reply_response(reply),
        Err(err) => error_response(err),
    }
}

fn reply_response(reply: ProxyReply) -> Response {
    let mut response = Response::new(Body::from(reply.body));
    let headers = response.headers_mut();
    insert_header(headers, "x-cost-input", format!("{:.6}", reply.cost.input));
    insert_header(headers, "x-cost-output", format!("{:.6}", reply.cost.output));
    insert_header(headers, "x-cost-total", format!("{:.6}", reply.cost.total));
    headers.insert(
        HeaderName::from_static("x-cache-status"),
        HeaderValue::from_static(reply.cache_status.as_str()),
    );
    headers.insert(
        HeaderName::from_static("x-key-source"),
        HeaderValue::from_static(reply.key_source.as_str()),
    );
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn error_response(err: ProxyError) -> Response {
    let mut response = Response::new(Body::from(err.body));
    *response.status_mut() = err.status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
