use super::prompt::ModelTurn;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::error;

/// Failures from the model provider, already classified for the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannerError {
    /// The provider reported a rate-limit condition
    RateLimited,
    /// Anything else; detail is for server-side logs only
    Failure(String),
}

/// Thin call/response seam around the generative-model API
#[async_trait]
pub trait PlannerModel: Send + Sync + 'static {
    /// Send one composed conversation and return the generated reply text
    async fn generate(&self, turns: &[ModelTurn]) -> Result<String, PlannerError>;
}

/// Gemini `generateContent` implementation of [`PlannerModel`]
pub struct GeminiGateway {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiGateway {
    pub fn new(client: Client, base_url: String, model: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            model,
            api_key,
        }
    }
}

#[async_trait]
impl PlannerModel for GeminiGateway {
    async fn generate(&self, turns: &[ModelTurn]) -> Result<String, PlannerError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key,
        );

        let body = json!({ "contents": turns });

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            let detail = e.to_string();
            if detail.contains("429") {
                PlannerError::RateLimited
            } else {
                error!("Model request failed: {}", detail);
                PlannerError::Failure(detail)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            if status.as_u16() == 429 || error_body.contains("429") {
                return Err(PlannerError::RateLimited);
            }
            error!("Model provider returned HTTP {} - {}", status, error_body);
            return Err(PlannerError::Failure(format!(
                "Model provider returned HTTP {}",
                status
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| PlannerError::Failure(format!("Failed to parse model response: {}", e)))?;

        let mut reply = String::new();
        if let Some(parts) = data["candidates"][0]["content"]["parts"].as_array() {
            for part in parts {
                if let Some(text) = part["text"].as_str() {
                    if !reply.is_empty() {
                        reply.push('\n');
                    }
                    reply.push_str(text);
                }
            }
        }

        if reply.is_empty() {
            error!("Model response contained no text parts: {}", data);
            return Err(PlannerError::Failure(
                "Model response contained no text".to_string(),
            ));
        }

        Ok(reply)
    }
}
