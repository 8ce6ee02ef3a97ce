// ── AI Provider Registry ───────────────────────────────────────────────────
// Every backend satisfies the same capability pair — `chat` and
// `health_check` — behind `Arc<dyn AiProvider>`. Adding a provider with an
// OpenAI-compatible wire format needs no new module (see `OpenAiProvider`
// constructors); a unique wire format gets its own file implementing the
// trait.

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::ChatContext;
use async_trait::async_trait;
use std::time::Duration;

/// What a provider call actually produced; the gateway turns this into the
/// user-facing `AiResponse` (cost, latency, request id, cache flags).
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub content: String,
    pub model: String,
    pub tokens_used: u64,
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// One chat completion. `context` is opaque caller state (conversation
    /// history, project facts) folded into the prompt.
    async fn chat(&self, message: &str, context: Option<&ChatContext>) -> EngineResult<ProviderReply>;

    /// Cheap reachability probe used by the health monitor.
    async fn health_check(&self) -> EngineResult<()>;
}

// ── Shared HTTP plumbing ───────────────────────────────────────────────────

/// One client per provider: connection pooling without a process global.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(120))
        .build()
        .unwrap_or_default()
}

/// Render the opaque context as a system-style preamble.
pub(crate) fn context_preamble(context: Option<&ChatContext>) -> Option<String> {
    let ctx = context?;
    if ctx.is_null() {
        return None;
    }
    Some(format!(
        "You are a coding assistant embedded in a collaborative editor. \
         Request context (JSON): {}",
        ctx
    ))
}

/// Map a non-success HTTP response to the canonical error taxonomy.
/// The status code is kept in the message so the retry classifier sees
/// "503"/"429" tokens.
pub(crate) fn api_error(provider: &str, status: u16, body: &str, retry_after: Option<u64>) -> EngineError {
    let message = format!("API error {}: {}", status, crate::atoms::types::truncate_utf8(body, 200));
    match status {
        401 | 403 => EngineError::Auth(format!("{provider}: {message}")),
        429 => EngineError::RateLimited {
            message: format!("{provider}: {message}"),
            retry_after_secs: retry_after.unwrap_or(30),
        },
        _ => EngineError::provider(provider, message),
    }
}

/// Parse a Retry-After header value (integer seconds only).
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers.get("retry-after")?.to_str().ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preamble_skips_null_context() {
        assert!(context_preamble(None).is_none());
        assert!(context_preamble(Some(&json!(null))).is_none());
        let p = context_preamble(Some(&json!({"project": "demo"}))).unwrap();
        assert!(p.contains("\"project\""));
    }

    #[test]
    fn api_error_classification() {
        assert!(matches!(api_error("x", 401, "no", None), EngineError::Auth(_)));
        match api_error("x", 429, "slow", Some(7)) {
            EngineError::RateLimited { retry_after_secs, .. } => assert_eq!(retry_after_secs, 7),
            other => panic!("{other:?}"),
        }
        let e = api_error("x", 503, "upstream", None);
        assert!(e.to_string().contains("503"));
    }
}
