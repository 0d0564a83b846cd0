//! Ollama backend, using the non-streaming generate endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ExplainConfig, ExplainError, Explainer};

/// Added to the per-call limit so the pool's own timeout fires first.
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct OllamaExplainer {
    url: String,
    model: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaExplainer {
    pub fn new(config: &ExplainConfig) -> Result<Self, ExplainError> {
        let client = Client::builder()
            .timeout(config.timeout + CLIENT_TIMEOUT_SLACK)
            .build()
            .map_err(|e| ExplainError::Unavailable(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client,
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.url)
    }
}

#[async_trait]
impl Explainer for OllamaExplainer {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn explain(&self, prompt: &str) -> Result<String, ExplainError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        log::debug!("Sending Ollama request: model={}", self.model);

        let response = self.client.post(self.generate_url()).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("Ollama error: {} - {}", status, body);
            return Err(ExplainError::Http { status: status.as_u16(), body });
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ExplainError::InvalidResponse(e.to_string()))?;

        Ok(generated.response.trim().to_string())
    }
}
