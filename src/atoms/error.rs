// ── Atoms: Error Types ─────────────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (Validation, Provider, Docker…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • Every variant maps to exactly one HTTP status and machine code; the
//     api layer renders the structured envelope from those two accessors.
//   • No variant carries secret material (API keys) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Docker Engine API failure (bollard layer).
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Bad input: size, missing field, wrong type, dangerous pattern.
    /// `code` is a stable machine-readable sub-code (e.g. "code_too_large").
    #[error("Validation error: {message}")]
    Validation { code: &'static str, message: String },

    /// Missing or invalid API key / admin key.
    #[error("Auth error: {0}")]
    Auth(String),

    /// Per-endpoint limiter or provider quota exhausted.
    #[error("Rate limited: {message}")]
    RateLimited { message: String, retry_after_secs: u64 },

    /// Container runtime unreachable. Carries operator guidance.
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Wall clock exceeded on an outward call.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Dependency gated by an open circuit breaker.
    #[error("Circuit open, retry in {retry_after_secs}s")]
    CircuitOpen { retry_after_secs: u64 },

    /// Upstream AI provider failure (overloaded, safety block, quota…).
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Interactive session missing or already in cleanup.
    #[error("Session not active: {0}")]
    SessionNotActive(String),

    /// Catch-all. Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Internal(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { code, message: message.into() }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }

    /// Stable machine code rendered in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. } => code,
            Self::Auth(_) => "unauthorized",
            Self::RateLimited { .. } => "rate_limited",
            Self::RuntimeUnavailable(_) => "runtime_unavailable",
            Self::Timeout(_) => "timeout",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Provider { .. } => "provider_error",
            Self::SessionNotActive(_) => "session_not_active",
            Self::Docker(_) => "docker_error",
            Self::Database(_) => "database_error",
            Self::Network(_) => "network_error",
            Self::Serialization(_) => "bad_json",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for the api layer. Socket surfaces only use the message.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::SessionNotActive(_) | Self::Serialization(_) => 400,
            Self::Auth(_) => 401,
            Self::RateLimited { .. } => 429,
            Self::RuntimeUnavailable(_) | Self::CircuitOpen { .. } => 503,
            Self::Timeout(_) => 504,
            _ => 500,
        }
    }

    /// Seconds a client should wait before retrying, when known.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs, .. } | Self::CircuitOpen { retry_after_secs } => {
                Some(*retry_after_secs)
            }
            _ => None,
        }
    }

    /// True when the message is safe to show users outside development.
    /// Internal/database/IO details are redacted in production.
    pub fn user_facing(&self) -> bool {
        !matches!(
            self,
            Self::Internal(_) | Self::Database(_) | Self::Io(_) | Self::Docker(_) | Self::Network(_)
        )
    }
}

// ── Migration bridge: String → EngineError ─────────────────────────────────
// Allows `?` on helpers that return `Result<T, String>`.

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Internal(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Internal(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(EngineError::validation("bad", "x").http_status(), 400);
        assert_eq!(EngineError::Auth("no key".into()).http_status(), 401);
        assert_eq!(
            EngineError::RateLimited { message: "slow down".into(), retry_after_secs: 9 }.http_status(),
            429
        );
        assert_eq!(EngineError::RuntimeUnavailable("docker down".into()).http_status(), 503);
        assert_eq!(EngineError::Internal("boom".into()).http_status(), 500);
    }

    #[test]
    fn retry_after_surfaced() {
        let e = EngineError::CircuitOpen { retry_after_secs: 42 };
        assert_eq!(e.retry_after(), Some(42));
        assert_eq!(e.code(), "circuit_open");
        assert!(EngineError::Timeout("x".into()).retry_after().is_none());
    }

    #[test]
    fn internal_details_redactable() {
        assert!(!EngineError::Internal("stack".into()).user_facing());
        assert!(EngineError::validation("code_too_large", "too big").user_facing());
    }
}
