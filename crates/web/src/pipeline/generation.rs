//! Code generation client
//!
//! One request per run against a Gemini-compatible `generateContent`
//! endpoint. No retries and no streaming.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::GenerationError;
use crate::config::{AuthMode, ModelConfig};

/// A model that turns a prompt into source text
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Return the model's raw text answer for `prompt`
    async fn complete(&self, prompt: &str, api_key: &str) -> Result<String, GenerationError>;
}

/// Remove markdown fence markers wherever they appear
pub fn strip_code_fences(raw: &str) -> String {
    raw.replace("```javascript", "").replace("```", "")
}

/// Ask `generator` for a script and strip its fencing
pub async fn generate_source(
    generator: &dyn CodeGenerator,
    prompt: &str,
    api_key: Option<&str>,
) -> Result<String, GenerationError> {
    let api_key = api_key
        .filter(|k| !k.trim().is_empty())
        .ok_or(GenerationError::MissingCredential)?;

    let raw = generator.complete(prompt, api_key).await?;
    let source = strip_code_fences(&raw);
    if source.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    debug!("Generated {} bytes of source", source.len());
    Ok(source)
}

/// Pick the provider key for one request.
///
/// In session mode the configured key wins and a request key is only a
/// fallback. In inline-key mode the request key wins; the configured key is
/// only lent to authenticated users.
pub fn resolve_credential(
    mode: AuthMode,
    configured: Option<&str>,
    supplied: Option<&str>,
    authenticated: bool,
) -> Option<String> {
    let configured = configured.filter(|k| !k.trim().is_empty());
    let supplied = supplied.filter(|k| !k.trim().is_empty());
    match mode {
        AuthMode::Session => configured.or(supplied),
        AuthMode::InlineKey => supplied.or(if authenticated { configured } else { None }),
    }
    .map(String::from)
}

/// Client for the Gemini REST API
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
}

impl GeminiClient {
    pub fn new(cfg: &ModelConfig) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder().timeout(cfg.timeout()).build()?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl CodeGenerator for GeminiClient {
    async fn complete(&self, prompt: &str, api_key: &str) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "contents": [
                {"role": "user", "parts": [{"text": prompt}]}
            ]
        });

        let resp = self
            .http
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or(text);
            warn!("Model provider returned status {}", status);
            return Err(GenerationError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let json: serde_json::Value = resp.json().await?;
        let text: String = json
            .pointer("/candidates/0/content/parts")
            .and_then(|v| v.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text)
    }
}
