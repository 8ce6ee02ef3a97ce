// ── API: Execute Endpoints ─────────────────────────────────────────────────
// POST /api/execute, GET /api/languages, GET /api/system, GET /health.

use super::envelope::{error_response, request_id};
use super::{client_key, require_api_key, AppState};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::ExecutionRequest;
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
pub struct ExecuteBody {
    pub language: String,
    pub code: String,
    pub stdin: Option<String>,
    /// Legacy alias for `stdin`; `stdin` wins when both are present.
    pub input: Option<String>,
    /// Timeout override in ms, clamped by the runner.
    pub timeout: Option<u64>,
}

pub async fn execute(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let req_id = request_id(&headers);

    match run_execute(&state, &headers, peer.as_ref(), body).await {
        Ok(result) => Json(json!({
            "success": result.success,
            "language": result.language,
            "output": result.result.output,
            "error": result.result.error,
            "exitCode": result.result.exit_code,
            "executionTime": result.result.execution_time,
            "timestamp": result.result.timestamp,
        }))
        .into_response(),
        Err(err) => error_response(&state.config, &req_id, started, &err),
    }
}

struct ExecuteOutcome {
    success: bool,
    language: String,
    result: crate::atoms::types::ExecutionResult,
}

async fn run_execute(
    state: &AppState,
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> EngineResult<ExecuteOutcome> {
    require_api_key(&state.config, headers)?;

    let key = client_key(headers, peer);
    if let Err(retry_after_secs) = state.execute_limiter.check(&key) {
        return Err(EngineError::RateLimited {
            message: "execute rate limit exceeded".into(),
            retry_after_secs,
        });
    }

    let Json(body) =
        body.map_err(|e| EngineError::validation("bad_json", format!("invalid request body: {e}")))?;

    let config = state
        .catalog
        .get(&body.language)
        .ok_or_else(|| {
            EngineError::validation(
                "unsupported_language",
                format!("language '{}' is not supported", body.language),
            )
        })?
        .clone();

    let code = state.normalizer.normalize_code(&body.code, &config)?;
    let stdin = match body.stdin.or(body.input) {
        Some(text) if !text.is_empty() => Some(state.normalizer.normalize_stdin(text.as_bytes())?),
        _ => None,
    };

    let request = ExecutionRequest {
        language: body.language.clone(),
        code,
        stdin,
        timeout_ms: body.timeout,
    };
    let result = state.runner.execute(&request).await?;
    Ok(ExecuteOutcome { success: result.success, language: body.language, result })
}

pub async fn languages(State(state): State<AppState>) -> Response {
    let languages: Vec<_> = state
        .catalog
        .list()
        .into_iter()
        .map(|c| {
            json!({
                "id": c.id,
                "name": c.name,
                "type": c.kind,
                "fileExtension": c.extension,
                "timeout": c.timeout_ms,
                "memoryLimit": c.memory_limit,
                "cpuLimit": c.cpu_limit,
            })
        })
        .collect();
    Json(json!({ "success": true, "count": languages.len(), "languages": languages }))
        .into_response()
}

pub async fn system(State(state): State<AppState>) -> Response {
    let docker_info = match state.docker.acquire().await {
        Ok(docker) => match docker.version().await {
            Ok(v) => json!({
                "available": true,
                "version": v.version,
                "apiVersion": v.api_version,
                "os": v.os,
                "arch": v.arch,
            }),
            Err(e) => json!({ "available": false, "error": e.to_string() }),
        },
        Err(_) => json!({ "available": false }),
    };

    Json(json!({
        "success": true,
        "docker": docker_info,
        "process": {
            "uptime": state.started_at.elapsed().as_secs(),
            "pid": std::process::id(),
        },
        "languages": state.catalog.len(),
        "activeTerminals": state.terminals.active_count(),
    }))
    .into_response()
}

pub async fn health(State(state): State<AppState>) -> Response {
    // On-demand probe keeps the report honest even between backoff windows.
    let available = state.docker.probe().await;
    let docker = state.docker.status();
    Json(json!({
        "status": if available { "ok" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "docker": docker,
    }))
    .into_response()
}
