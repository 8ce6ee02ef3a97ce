// ── API: AI Endpoints ──────────────────────────────────────────────────────
// POST /ai/chat plus the observability and admin surface. Fallback
// responses are successes with `isFallback` metadata — callers never see a
// raw provider failure once the gateway has degraded gracefully.

use super::envelope::{error_response, request_id};
use super::{client_key, require_admin_key, require_api_key, AppState};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{AiResponse, ChatContext, ChatOptions};
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub message: String,
    pub context: Option<ChatContext>,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub bypass_cache: bool,
}

pub async fn chat(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let req_id = request_id(&headers);

    match run_chat(&state, &headers, peer.as_ref(), body).await {
        Ok(response) => Json(json!({
            "success": true,
            "response": response.content,
            "metadata": chat_metadata(&response, started),
        }))
        .into_response(),
        Err(err) => error_response(&state.config, &req_id, started, &err),
    }
}

fn chat_metadata(response: &AiResponse, started: Instant) -> serde_json::Value {
    json!({
        "provider": response.provider,
        "model": response.model,
        "tokensUsed": response.tokens_used,
        "cost": response.cost,
        "latency": response.latency_ms,
        "requestId": response.request_id,
        "isCached": response.is_cached,
        "isFallback": response.is_fallback,
        "fallbackType": response.fallback_type,
        "confidence": response.confidence,
        "responseTime": started.elapsed().as_millis() as u64,
    })
}

async fn run_chat(
    state: &AppState,
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> EngineResult<AiResponse> {
    require_api_key(&state.config, headers)?;

    let key = client_key(headers, peer);
    if let Err(retry_after_secs) = state.general_limiter.check(&key) {
        return Err(EngineError::RateLimited {
            message: "rate limit exceeded".into(),
            retry_after_secs,
        });
    }

    let Json(body) =
        body.map_err(|e| EngineError::validation("bad_json", format!("invalid request body: {e}")))?;
    let options = ChatOptions {
        bypass_cache: body.bypass_cache,
        project_id: body.project_id,
        user_id: body.user_id,
    };
    state.gateway.chat(&body.message, body.context, options).await
}

// ── Observability ──────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Response {
    let snapshot = state.gateway.health().snapshot();
    Json(json!({
        "success": true,
        "status": snapshot.overall,
        "providers": snapshot.providers,
        "alerts": snapshot.alerts,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    Json(json!({ "success": true, "metrics": state.gateway.metrics() })).into_response()
}

pub async fn status(State(state): State<AppState>) -> Response {
    let circuits = state.gateway.circuit_snapshots();
    let health = state.gateway.health();
    let providers: Vec<_> = state
        .gateway
        .registry()
        .descriptors()
        .into_iter()
        .map(|d| {
            json!({
                "descriptor": d,
                "health": health.status_of(&d.name),
                "circuit": circuits.get(&d.name),
            })
        })
        .collect();

    Json(json!({
        "success": true,
        "strategy": state.gateway.registry().strategy(),
        "providers": providers,
        "cache": state.gateway.cache().stats(),
        "queueDepth": state.gateway.queue().len(),
        "overall": health.overall(),
    }))
    .into_response()
}

// ── Admin ──────────────────────────────────────────────────────────────────

pub async fn reset_metrics(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let started = Instant::now();
    let req_id = request_id(&headers);
    if let Err(err) = require_admin_key(&state.config, &headers) {
        return error_response(&state.config, &req_id, started, &err);
    }
    state.gateway.reset_metrics();
    Json(json!({ "success": true })).into_response()
}

pub async fn force_probe(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let started = Instant::now();
    let req_id = request_id(&headers);
    if let Err(err) = require_admin_key(&state.config, &headers) {
        return error_response(&state.config, &req_id, started, &err);
    }
    state.gateway.probe_providers().await;
    let snapshot = state.gateway.health().snapshot();
    Json(json!({ "success": true, "status": snapshot.overall, "providers": snapshot.providers }))
        .into_response()
}
