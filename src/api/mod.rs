// ── API Layer ──────────────────────────────────────────────────────────────
// Transport-layer wrappers: axum routes for the Execute and AI APIs, the
// WebSocket terminal endpoint, rate limiting, API-key auth, and the error
// envelope. All domain logic lives in engine/.

pub mod ai;
pub mod envelope;
pub mod execute;
pub mod ratelimit;
pub mod ws;

use crate::atoms::constants::{EXECUTE_RATE_MAX_REQUESTS, EXECUTE_RATE_WINDOW_MS};
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::config::AppConfig;
use crate::engine::gateway::AiGateway;
use crate::engine::sandbox::docker::DockerManager;
use crate::engine::sandbox::languages::LanguageCatalog;
use crate::engine::sandbox::normalize::InputNormalizer;
use crate::engine::sandbox::runner::SandboxRunner;
use crate::engine::sandbox::terminal::TerminalManager;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Method};
use axum::routing::{get, post};
use axum::Router;
use ratelimit::RateLimiter;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub gateway: Arc<AiGateway>,
    pub runner: Arc<SandboxRunner>,
    pub normalizer: Arc<InputNormalizer>,
    pub catalog: Arc<LanguageCatalog>,
    pub terminals: Arc<TerminalManager>,
    pub docker: Arc<DockerManager>,
    pub general_limiter: Arc<RateLimiter>,
    pub execute_limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<AppConfig>,
        gateway: Arc<AiGateway>,
        runner: Arc<SandboxRunner>,
        catalog: Arc<LanguageCatalog>,
        terminals: Arc<TerminalManager>,
        docker: Arc<DockerManager>,
    ) -> Self {
        let normalizer =
            Arc::new(InputNormalizer::new(config.max_code_size_bytes, config.max_stdin_size_bytes));
        let general_limiter =
            Arc::new(RateLimiter::new(config.rate_limit_window, config.rate_limit_max_requests));
        let execute_limiter = Arc::new(RateLimiter::new(
            Duration::from_millis(EXECUTE_RATE_WINDOW_MS),
            EXECUTE_RATE_MAX_REQUESTS,
        ));
        AppState {
            config,
            gateway,
            runner,
            normalizer,
            catalog,
            terminals,
            docker,
            general_limiter,
            execute_limiter,
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = if state.config.cors_origin == "*" {
        CorsLayer::new().allow_origin(Any).allow_methods([Method::GET, Method::POST]).allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::exact(
                state.config.cors_origin.parse().expect("valid CORS_ORIGIN"),
            ))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(execute::health))
        .route("/api/execute", post(execute::execute))
        .route("/api/languages", get(execute::languages))
        .route("/api/system", get(execute::system))
        .route("/ai/chat", post(ai::chat))
        .route("/ai/health", get(ai::health))
        .route("/ai/metrics", get(ai::metrics))
        .route("/ai/status", get(ai::status))
        .route("/ai/metrics/reset", post(ai::reset_metrics))
        .route("/ai/health/force", post(ai::force_probe))
        .route("/terminal", get(ws::terminal_upgrade))
        .layer(cors)
        .with_state(state)
}

// ── Auth helpers ───────────────────────────────────────────────────────────

/// `X-API-Key` check. An empty configured key disables auth (development).
pub(crate) fn require_api_key(config: &AppConfig, headers: &HeaderMap) -> EngineResult<()> {
    if config.api_key.is_empty() {
        return Ok(());
    }
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == config.api_key {
        Ok(())
    } else {
        Err(EngineError::Auth("missing or invalid API key".into()))
    }
}

/// `X-Admin-Key` check for operator endpoints. In production without a
/// configured secret the endpoints do not exist.
pub(crate) fn require_admin_key(config: &AppConfig, headers: &HeaderMap) -> EngineResult<()> {
    if !config.admin_enabled() {
        return Err(EngineError::Auth("admin endpoints are disabled".into()));
    }
    if config.admin_key.is_empty() {
        return Ok(()); // development convenience
    }
    let provided = headers.get("x-admin-key").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == config.admin_key {
        Ok(())
    } else {
        Err(EngineError::Auth("missing or invalid admin key".into()))
    }
}

/// Rate-limit identity: API key when present, else peer address.
pub(crate) fn client_key(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if !key.is_empty() {
            return format!("key:{key}");
        }
    }
    match peer {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => "anonymous".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::AppMode;

    fn config(api_key: &str, admin_key: &str, mode: AppMode) -> AppConfig {
        AppConfig {
            port: 0,
            mode,
            cors_origin: "*".into(),
            api_key: api_key.into(),
            admin_key: admin_key.into(),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_requests: 10,
            max_code_size_bytes: 1024,
            max_stdin_size_bytes: 1024,
            db_path: ":memory:".into(),
            gemini_api_key: None,
            openai_api_key: None,
            anthropic_api_key: None,
            glm_api_key: None,
        }
    }

    #[test]
    fn api_key_auth() {
        let open = config("", "", AppMode::Development);
        assert!(require_api_key(&open, &HeaderMap::new()).is_ok());

        let locked = config("secret", "", AppMode::Development);
        assert!(require_api_key(&locked, &HeaderMap::new()).is_err());
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret".parse().unwrap());
        assert!(require_api_key(&locked, &headers).is_ok());
    }

    #[test]
    fn admin_disabled_in_production_without_secret() {
        let prod = config("", "", AppMode::Production);
        assert!(require_admin_key(&prod, &HeaderMap::new()).is_err());

        let prod_with_key = config("", "admin-secret", AppMode::Production);
        let mut headers = HeaderMap::new();
        headers.insert("x-admin-key", "admin-secret".parse().unwrap());
        assert!(require_admin_key(&prod_with_key, &headers).is_ok());
        assert!(require_admin_key(&prod_with_key, &HeaderMap::new()).is_err());
    }
}
