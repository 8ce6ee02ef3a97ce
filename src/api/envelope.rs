// ── API: Error Envelope ────────────────────────────────────────────────────
// Every failure leaving the HTTP surface has the same shape:
//   { success: false,
//     error: { code, message, requestId, timestamp },
//     metadata: { responseTime } }
// Messages from non-user-facing variants are redacted outside development.

use crate::atoms::error::EngineError;
use crate::engine::config::AppConfig;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::time::Instant;

pub fn error_response(
    config: &AppConfig,
    request_id: &str,
    started: Instant,
    err: &EngineError,
) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = if err.user_facing() || !config.is_production() {
        err.to_string()
    } else {
        log::error!("[api] internal error on request {}: {}", request_id, err);
        "internal server error".to_string()
    };

    let body = json!({
        "success": false,
        "error": {
            "code": err.code(),
            "message": message,
            "requestId": request_id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        },
        "metadata": {
            "responseTime": started.elapsed().as_millis() as u64,
        },
    });

    let mut response = (status, Json(body)).into_response();
    if let Some(secs) = err.retry_after() {
        if let Ok(value) = secs.to_string().parse() {
            response.headers_mut().insert("Retry-After", value);
        }
    }
    response
}

/// Request id: honor the client's `X-Request-Id`, otherwise mint one.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
