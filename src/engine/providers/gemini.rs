// ── Google Gemini Provider ─────────────────────────────────────────────────
// `generateContent` wire format: parts arrays, API key in the query string,
// token usage under `usageMetadata`.

use super::{api_error, context_preamble, http_client, parse_retry_after, AiProvider, ProviderReply};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::ChatContext;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        GeminiProvider {
            client: http_client(),
            base_url: "https://generativelanguage.googleapis.com".into(),
            api_key: api_key.into(),
            model: "gemini-1.5-flash".into(),
        }
    }

    fn build_body(&self, message: &str, context: Option<&ChatContext>) -> Value {
        let mut body = json!({
            "contents": [{"role": "user", "parts": [{"text": message}]}]
        });
        if let Some(preamble) = context_preamble(context) {
            body["systemInstruction"] = json!({"parts": [{"text": preamble}]});
        }
        body
    }
}

/// Concatenate candidate parts; usage comes from `usageMetadata`.
pub(crate) fn parse_generate_response(body: &Value) -> EngineResult<ProviderReply> {
    let parts = body["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| EngineError::provider("gemini", "response carried no candidates"))?;
    let content: String =
        parts.iter().filter_map(|p| p["text"].as_str()).collect::<Vec<_>>().join("");
    if content.is_empty() {
        // Safety blocks come back as an empty candidate with a finishReason.
        let reason = body["candidates"][0]["finishReason"].as_str().unwrap_or("no text parts");
        return Err(EngineError::provider("gemini", format!("empty response: {reason}")));
    }
    Ok(ProviderReply {
        content,
        model: body["modelVersion"].as_str().unwrap_or_default().to_string(),
        tokens_used: body["usageMetadata"]["totalTokenCount"].as_u64().unwrap_or(0),
    })
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, message: &str, context: Option<&ChatContext>) -> EngineResult<ProviderReply> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let response = self.client.post(&url).json(&self.build_body(message, context)).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(api_error("gemini", status, &body, retry_after));
        }

        let body: Value = response.json().await?;
        let mut reply = parse_generate_response(&body)?;
        if reply.model.is_empty() {
            reply.model = self.model.clone();
        }
        Ok(reply)
    }

    async fn health_check(&self) -> EngineResult<()> {
        let url = format!("{}/v1beta/models?key={}&pageSize=1", self.base_url, self.api_key);
        let response = self.client.get(&url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(api_error("gemini", response.status().as_u16(), "health probe failed", None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_candidate_parts() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "4"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"totalTokenCount": 12},
            "modelVersion": "gemini-1.5-flash-002"
        });
        let reply = parse_generate_response(&body).unwrap();
        assert_eq!(reply.content, "4");
        assert_eq!(reply.tokens_used, 12);
        assert_eq!(reply.model, "gemini-1.5-flash-002");
    }

    #[test]
    fn safety_block_surfaces_finish_reason() {
        let body = json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "SAFETY"}]
        });
        let err = parse_generate_response(&body).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }
}
