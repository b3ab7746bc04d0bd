//! Local Ollama backend (uses `/api/generate`).

use super::{log_preview, LanguageModel, Prompt};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub struct OllamaClient {
    client: Client,
    endpoint: String,
    model: String,
    label: String,
}

impl OllamaClient {
    pub fn new(client: Client, base_url: &str, model: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model: model.to_string(),
            label: format!("ollama:{}", model),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[async_trait::async_trait]
impl LanguageModel for OllamaClient {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, prompt: &Prompt, expect_json: bool) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: &prompt.user,
            system: &prompt.system,
            stream: false,
            format: expect_json.then_some("json"),
        };

        debug!("OllamaClient: calling {} (model={})", self.endpoint, self.model);

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach Ollama at {}", self.endpoint))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error ({}): {}", status, text);
        }

        let generated: GenerateResponse = resp
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        if let Some(tokens) = generated.eval_count {
            info!("{} response: {} completion tokens", self.label, tokens);
        }
        debug!(
            "Raw model response ({} chars): {}",
            generated.response.len(),
            log_preview(&generated.response)
        );

        Ok(generated.response.trim().to_string())
    }
}
