// ── Engine: Configuration ──────────────────────────────────────────────────
// Environment-variable configuration, read once at startup and passed down
// from the composition root. No implicit globals: everything that needs a
// setting receives it (or a derived handle) explicitly.

use crate::atoms::constants::*;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Development,
    Production,
    Test,
}

impl AppMode {
    fn parse(s: &str) -> Self {
        match s {
            "production" => Self::Production,
            "test" => Self::Test,
            _ => Self::Development,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub mode: AppMode,
    pub cors_origin: String,
    /// Execute API key. Empty = auth disabled (development convenience).
    pub api_key: String,
    /// Admin endpoints secret. Empty in production disables admin routes.
    pub admin_key: String,
    pub rate_limit_window: Duration,
    pub rate_limit_max_requests: u32,
    pub max_code_size_bytes: usize,
    pub max_stdin_size_bytes: usize,
    pub db_path: String,
    /// Provider API keys; a missing key means the provider is not registered.
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub glm_api_key: Option<String>,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mode = AppMode::parse(&std::env::var("APP_ENV").unwrap_or_default());
        let default_code_cap = if mode == AppMode::Test {
            MAX_CODE_SIZE_BYTES_TEST
        } else {
            MAX_CODE_SIZE_BYTES
        };
        AppConfig {
            port: env_or("PORT", 3001),
            mode,
            cors_origin: std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "*".into()),
            api_key: std::env::var("API_KEY").unwrap_or_default(),
            admin_key: std::env::var("ADMIN_KEY").unwrap_or_default(),
            rate_limit_window: Duration::from_millis(env_or("RATE_LIMIT_WINDOW_MS", 900_000u64)),
            rate_limit_max_requests: env_or("RATE_LIMIT_MAX_REQUESTS", 100),
            max_code_size_bytes: env_or("MAX_CODE_SIZE_BYTES", default_code_cap),
            max_stdin_size_bytes: env_or("MAX_INPUT_SIZE_BYTES", MAX_STDIN_SIZE_BYTES),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "codejoin.db".into()),
            gemini_api_key: env_opt("GEMINI_API_KEY"),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            anthropic_api_key: env_opt("ANTHROPIC_API_KEY"),
            glm_api_key: env_opt("GLM_API_KEY"),
        }
    }

    pub fn is_production(&self) -> bool {
        self.mode == AppMode::Production
    }

    /// Admin routes are served only when a secret is configured in production.
    pub fn admin_enabled(&self) -> bool {
        !self.is_production() || !self.admin_key.is_empty()
    }
}
