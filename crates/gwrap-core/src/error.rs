use bytes::Bytes;
use http::StatusCode;
use serde_json::json;

/// Terminal response for a request that never produced a successful reply.
/// The body is always a ready-to-send JSON document.
#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ProxyError {
    fn json(status: StatusCode, body: serde_json::Value) -> Self {
        Self {
            status,
            body: Bytes::from(body.to_string()),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::json(StatusCode::BAD_REQUEST, json!({ "error": message.into() }))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::json(StatusCode::UNAUTHORIZED, json!({ "error": message.into() }))
    }

    pub fn cost_denied(predicted: f64, max_cost: f64) -> Self {
        Self::json(
            StatusCode::PAYMENT_REQUIRED,
            json!({
                "error": format!(
                    "predicted cost ${predicted:.6} exceeds maximum allowed cost ${max_cost:.6}"
                ),
                "predicted_cost": predicted,
                "max_cost": max_cost,
            }),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::json(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": message.into() }),
        )
    }

    /// Upstream failure passed through with whatever body the caller built
    /// (the structured upstream envelope when one exists).
    pub fn upstream(status: u16, body: Bytes) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            body,
        }
    }
}
