// ── Anthropic Provider ─────────────────────────────────────────────────────
// The `/v1/messages` wire format: system prompt travels in its own field,
// usage splits input/output tokens.

use super::{api_error, context_preamble, http_client, parse_retry_after, AiProvider, ProviderReply};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::ChatContext;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        AnthropicProvider {
            client: http_client(),
            base_url: "https://api.anthropic.com".into(),
            api_key: api_key.into(),
            model: "claude-3-5-haiku-latest".into(),
        }
    }

    fn build_body(&self, message: &str, context: Option<&ChatContext>) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": 1024,
            "messages": [{"role": "user", "content": message}],
        });
        if let Some(preamble) = context_preamble(context) {
            body["system"] = Value::String(preamble);
        }
        body
    }
}

/// Concatenate text blocks and sum the split token usage.
pub(crate) fn parse_messages_response(body: &Value) -> EngineResult<ProviderReply> {
    let blocks = body["content"]
        .as_array()
        .ok_or_else(|| EngineError::provider("anthropic", "response carried no content"))?;
    let content: String =
        blocks.iter().filter_map(|b| b["text"].as_str()).collect::<Vec<_>>().join("");
    if content.is_empty() {
        return Err(EngineError::provider("anthropic", "response carried no text blocks"));
    }
    let tokens = body["usage"]["input_tokens"].as_u64().unwrap_or(0)
        + body["usage"]["output_tokens"].as_u64().unwrap_or(0);
    Ok(ProviderReply {
        content,
        model: body["model"].as_str().unwrap_or_default().to_string(),
        tokens_used: tokens,
    })
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, message: &str, context: Option<&ChatContext>) -> EngineResult<ProviderReply> {
        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.build_body(message, context))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(api_error("anthropic", status, &body, retry_after));
        }

        let body: Value = response.json().await?;
        let mut reply = parse_messages_response(&body)?;
        if reply.model.is_empty() {
            reply.model = self.model.clone();
        }
        Ok(reply)
    }

    async fn health_check(&self) -> EngineResult<()> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(api_error("anthropic", response.status().as_u16(), "health probe failed", None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_blocks_and_usage() {
        let body = json!({
            "model": "claude-3-5-haiku-latest",
            "content": [{"type": "text", "text": "Hello"}, {"type": "text", "text": " world"}],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let reply = parse_messages_response(&body).unwrap();
        assert_eq!(reply.content, "Hello world");
        assert_eq!(reply.tokens_used, 15);
    }

    #[test]
    fn empty_content_is_an_error() {
        assert!(parse_messages_response(&json!({"content": []})).is_err());
        assert!(parse_messages_response(&json!({})).is_err());
    }

    #[test]
    fn system_prompt_only_with_context() {
        let p = AnthropicProvider::new("k");
        assert!(p.build_body("hi", None).get("system").is_none());
        let body = p.build_body("hi", Some(&json!({"a": 1})));
        assert!(body["system"].as_str().unwrap().contains("\"a\""));
    }
}
