// ── Gateway: Fallback Generator ────────────────────────────────────────────
// Deterministic offline responder for when every provider is down. Never
// fails: tries the response cache, then keyword templates, then generic
// guidance, then a canned line. Confidence reflects how specific the match
// was.

use super::cache::ResponseCache;
use super::retry::rand_unit;
use crate::atoms::types::{AiResponse, ChatContext, FallbackType};
use std::sync::Arc;

const CANNED: &[&str] = &[
    "The AI assistants are briefly unavailable. Your work is safe — please try again in a moment.",
    "All AI backends are busy right now. The request has been noted; retrying shortly usually works.",
    "The assistant cannot reach its providers at the moment. Please retry in a few seconds.",
];

const GUIDANCE: &str = "The AI service is temporarily unavailable, so here is some general \
guidance instead: check the panel for compiler or runtime errors first, re-run with a smaller \
input to isolate the failure, and consult the language's standard documentation for the API in \
question. Your question will succeed once a provider recovers.";

struct Template {
    keywords: &'static [&'static str],
    response: &'static str,
    confidence: f64,
}

/// Keyword templates, checked in order; the first hit wins.
const TEMPLATES: &[Template] = &[
    Template {
        keywords: &["error", "exception", "traceback", "panic", "crash", "bug"],
        response: "I can't reach a live model right now, but for debugging: read the first \
error in the output (later ones usually cascade), check the named line and the one above it, \
and verify types and null/None handling around that point. Re-run after each single change.",
        confidence: 0.6,
    },
    Template {
        keywords: &["explain", "what does", "what is", "how does"],
        response: "No live model is available for a full explanation at the moment. As a start: \
read the code top-down, note each function's inputs and outputs, and trace one concrete value \
through it. Ask again shortly for a detailed walkthrough.",
        confidence: 0.55,
    },
    Template {
        keywords: &["optimize", "faster", "performance", "slow"],
        response: "Offline tip while providers recover: measure before optimizing — time the \
hot path, look for repeated work inside loops, and prefer better algorithms over micro-tweaks.",
        confidence: 0.55,
    },
    Template {
        keywords: &["hello", "hi ", "hey"],
        response: "Hello! The AI backends are briefly offline, but code execution still works. \
Ask me again in a moment.",
        confidence: 0.7,
    },
];

pub struct FallbackGenerator {
    cache: Option<Arc<ResponseCache>>,
}

impl FallbackGenerator {
    pub fn new(cache: Option<Arc<ResponseCache>>) -> Self {
        FallbackGenerator { cache }
    }

    /// Produce a degraded-but-valid response. Infallible by contract.
    pub fn generate(&self, message: &str, context: Option<&ChatContext>, request_id: &str) -> AiResponse {
        // A previously cached answer for the same request beats any template.
        if let Some(cache) = &self.cache {
            let key = ResponseCache::key(message, context);
            if let Some(mut cached) = cache.get(&key) {
                cached.request_id = request_id.to_string();
                cached.is_fallback = true;
                cached.fallback_type = Some(FallbackType::Cache);
                cached.confidence = 0.8;
                return cached;
            }
        }

        let lowered = message.to_lowercase();
        for template in TEMPLATES {
            if template.keywords.iter().any(|k| lowered.contains(k)) {
                return self.response(template.response, FallbackType::Template, template.confidence, request_id);
            }
        }

        // Substantive questions get guidance; anything else a canned line.
        if message.trim().len() >= 20 {
            return self.response(GUIDANCE, FallbackType::Guidance, 0.4, request_id);
        }
        let canned = CANNED[(rand_unit() * CANNED.len() as f64) as usize % CANNED.len()];
        self.response(canned, FallbackType::Canned, 0.2, request_id)
    }

    fn response(&self, content: &str, fallback_type: FallbackType, confidence: f64, request_id: &str) -> AiResponse {
        AiResponse {
            content: content.to_string(),
            provider: "fallback".into(),
            model: "local-template".into(),
            tokens_used: 0,
            cost: 0.0,
            latency_ms: 0,
            request_id: request_id.to_string(),
            is_cached: false,
            is_fallback: true,
            fallback_type: Some(fallback_type),
            confidence,
        }
    }
}
