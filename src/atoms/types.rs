// ── Atoms: Pure Data Types ─────────────────────────────────────────────────
// All plain struct/enum definitions shared across subsystems. No logic
// beyond trivial accessors, no I/O, no imports from engine/ or api/.

use serde::{Deserialize, Serialize};

// ── Languages ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageKind {
    Interpreted,
    Compiled,
    Transpiled,
    /// SQL dialects executed by an embedded engine rather than a compiler.
    Sql,
}

/// Immutable per-language execution profile, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Lowercase ASCII identifier ("python", "cpp", …).
    pub id: String,
    /// Human-readable name ("Python 3").
    pub name: String,
    pub kind: LanguageKind,
    /// Container image reference.
    pub image: String,
    /// File extension including the leading dot.
    pub extension: String,
    /// Class name used to mangle the source filename (Java).
    pub class_name: Option<String>,
    /// Compile command template; present iff kind is Compiled or Transpiled.
    /// `{src}` expands to the source path, `{bin}` to the output path.
    pub compile_command: Option<String>,
    /// Run command template; `{src}` / `{bin}` expand as above.
    pub run_command: String,
    /// Default wall-clock timeout, milliseconds.
    pub timeout_ms: u64,
    /// Human-readable memory limit ("256m").
    pub memory_limit: String,
    /// CPU quota in fractional cores.
    pub cpu_limit: f64,
}

// ── One-shot execution ─────────────────────────────────────────────────────

/// A validated, normalized execution request (post-normalizer).
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub language: String,
    pub code: String,
    /// Normalized stdin bytes. Binary input is preserved verbatim.
    pub stdin: Option<Vec<u8>>,
    /// Clamped timeout override, milliseconds.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    /// Captured stderr, merged with any runner-level error message.
    pub error: String,
    /// 124 means the wall clock won the race against the container.
    pub exit_code: i64,
    /// Wall-clock duration, milliseconds.
    pub execution_time: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

// ── Providers ──────────────────────────────────────────────────────────────

/// Static ranking metadata supplied at provider registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub name: String,
    /// Lower = preferred by the priority strategy.
    pub priority: u32,
    /// Relative weight for the weighted strategy.
    pub weight: u32,
    pub cost_per_token: f64,
    /// Subjective quality score in [0,1], used by the quality strategy.
    pub quality: f64,
    pub expected_latency_ms: u64,
    /// Error-rate ceiling before health alerts fire, percent.
    pub max_error_rate_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    Priority,
    Weighted,
    Cost,
    Quality,
    RoundRobin,
}

// ── Chat ───────────────────────────────────────────────────────────────────

/// Caller-supplied conversational context, canonicalized by the cache and
/// forwarded opaquely to providers.
pub type ChatContext = serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Skip the response cache for this request.
    pub bypass_cache: bool,
    /// Project/user attribution persisted with gateway metadata.
    pub project_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackType {
    Template,
    Guidance,
    Cache,
    Canned,
}

/// The gateway's unified chat result, whether served by a provider, the
/// cache, or the fallback generator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResponse {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub tokens_used: u64,
    pub cost: f64,
    pub latency_ms: u64,
    pub request_id: String,
    pub is_cached: bool,
    pub is_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_type: Option<FallbackType>,
    /// Confidence in [0,1]. Provider responses report 1.0.
    pub confidence: f64,
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// Truncate to a byte budget without splitting a UTF-8 code point.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        let t = truncate_utf8(s, 2);
        assert!(t.len() <= 2);
        assert!(s.starts_with(t));
        assert_eq!(truncate_utf8("abc", 10), "abc");
    }

    #[test]
    fn ai_response_serializes_camel_case() {
        let r = AiResponse {
            content: "hi".into(),
            provider: "gemini".into(),
            model: "gemini-pro".into(),
            tokens_used: 10,
            cost: 0.0001,
            latency_ms: 120,
            request_id: "req-1".into(),
            is_cached: false,
            is_fallback: false,
            fallback_type: None,
            confidence: 1.0,
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["isCached"], false);
        assert_eq!(v["tokensUsed"], 10);
        assert!(v.get("fallbackType").is_none());
    }
}
