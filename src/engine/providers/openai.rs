// ── OpenAI-Compatible Provider ─────────────────────────────────────────────
// Speaks the `/chat/completions` wire format. Covers OpenAI itself and every
// compatible backend (GLM) — only the base URL and default model differ.

use super::{api_error, context_preamble, http_client, parse_retry_after, AiProvider, ProviderReply};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::ChatContext;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

pub struct OpenAiProvider {
    name: String,
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        OpenAiProvider {
            name: name.into(),
            client: http_client(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key, "gpt-4o-mini")
    }

    /// GLM exposes the same wire format on a different host.
    pub fn glm(api_key: impl Into<String>) -> Self {
        Self::new("glm", "https://open.bigmodel.cn/api/paas/v4", api_key, "glm-4-flash")
    }

    fn build_body(&self, message: &str, context: Option<&ChatContext>) -> Value {
        let mut messages = Vec::new();
        if let Some(preamble) = context_preamble(context) {
            messages.push(json!({"role": "system", "content": preamble}));
        }
        messages.push(json!({"role": "user", "content": message}));
        json!({ "model": self.model, "messages": messages })
    }
}

/// Pull content + token usage out of a `/chat/completions` response.
pub(crate) fn parse_completion(provider: &str, body: &Value) -> EngineResult<ProviderReply> {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| EngineError::provider(provider, "response carried no content"))?;
    Ok(ProviderReply {
        content: content.to_string(),
        model: body["model"].as_str().unwrap_or_default().to_string(),
        tokens_used: body["usage"]["total_tokens"].as_u64().unwrap_or(0),
    })
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, message: &str, context: Option<&ChatContext>) -> EngineResult<ProviderReply> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.build_body(message, context))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(&self.name, status, &body, retry_after));
        }

        let body: Value = response.json().await?;
        let mut reply = parse_completion(&self.name, &body)?;
        if reply.model.is_empty() {
            reply.model = self.model.clone();
        }
        Ok(reply)
    }

    async fn health_check(&self) -> EngineResult<()> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(api_error(&self.name, response.status().as_u16(), "health probe failed", None))
        }
    }
}
