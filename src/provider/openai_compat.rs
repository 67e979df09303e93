//! OpenAI-compatible chat completion provider (single attempt, no retries).

use super::classify::{classify_status, classify_transport, retry_after_from_headers};
use super::{Completion, CompletionProvider, CompletionRequest, ProviderError};
use crate::config::ProviderConfig;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use std::env;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(
                env::var("AI_ANALYZE_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| {
                Error::configuration_with_context(
                    format!("failed to build HTTP client: {}", e),
                    ErrorContext::new().with_source("openai_compat"),
                )
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: Self::resolve_api_key(config),
        })
    }

    fn resolve_api_key(config: &ProviderConfig) -> Option<String> {
        // 1. Explicit key from config
        if let Some(key) = config.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Some(key.trim().to_string());
        }

        // 2. Environment variable (PROVIDER_API_KEY)
        let env_var = format!("{}_API_KEY", config.name.to_uppercase());
        env::var(env_var).ok().filter(|k| !k.trim().is_empty())
    }

    fn extract_completion(&self, body: &str) -> std::result::Result<Completion, ProviderError> {
        let json: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| ProviderError::fatal(format!("undecodable completion body: {}", e)))?;

        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::fatal("completion body has no content"))?
            .to_string();
        let model = json
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.model)
            .to_string();
        let tokens_used = json
            .pointer("/usage/total_tokens")
            .and_then(|v| v.as_u64())
            .map(|v| v.min(u32::MAX as u64) as u32);

        Ok(Completion {
            content,
            model,
            tokens_used,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let client_request_id = Uuid::new_v4().to_string();
        let payload = serde_json::json!({
            "model": self.model,
            "temperature": request.temperature,
            "messages": request.messages,
        });

        let mut req = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .header("x-client-request-id", client_request_id.as_str())
            .json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let start = std::time::Instant::now();
        let resp = req
            .send()
            .await
            .map_err(|e| classify_transport(&e, request.timeout))?;

        let status = resp.status().as_u16();
        let header_retry_after = retry_after_from_headers(resp.headers());
        let body = resp
            .text()
            .await
            .map_err(|e| classify_transport(&e, request.timeout))?;

        if !(200..300).contains(&status) {
            let err = classify_status(status, &body, header_retry_after);
            info!(
                http_status = status,
                error_kind = err.kind().as_str(),
                client_request_id = client_request_id.as_str(),
                duration_ms = start.elapsed().as_millis() as u64,
                "completion request failed"
            );
            return Err(err);
        }

        let completion = self.extract_completion(&body)?;
        info!(
            http_status = status,
            client_request_id = client_request_id.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            tokens_used = completion.tokens_used.unwrap_or(0),
            "completion request succeeded"
        );
        Ok(completion)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
