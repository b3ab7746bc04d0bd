//! OpenAI-compatible chat completions client (OpenAI, OpenRouter, gateways).

use super::{log_preview, LanguageModel, LlmSettings, Prompt};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Chat completions client bound to one endpoint and model.
#[derive(Clone)]
pub struct ChatCompletionsClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    provider: String,
    label: String,
}

impl ChatCompletionsClient {
    pub fn new(
        client: Client,
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        provider: &str,
    ) -> Self {
        let model = model.into();
        Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            label: format!("{}:{}", provider, model),
            provider: provider.to_string(),
            model,
        }
    }

    pub fn from_settings(settings: &LlmSettings, client: Client) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .with_context(|| format!("No API key configured for {}", settings.provider.as_str()))?;

        Ok(Self::new(
            client,
            &settings.base_url,
            api_key,
            settings.model.clone(),
            settings.provider.as_str(),
        ))
    }

    /// Same endpoint and credentials, different model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self.label = format!("{}:{}", self.provider, self.model);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a chat completion request, optionally in JSON mode.
    pub async fn chat(&self, messages: Vec<Message>, json_mode: bool) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(4096),
            response_format: json_mode.then_some(ResponseFormat::JsonObject),
        };

        self.send_request(request).await
    }

    async fn send_request(&self, request: ChatCompletionRequest) -> Result<String> {
        debug!("Sending chat completion request: model={}", request.model);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat completion API error ({}): {}", status, error_text);
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        if let Some(usage) = &response.usage {
            info!(
                "{} response: {} tokens (prompt: {}, completion: {})",
                self.label, usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        debug!("Raw model response ({} chars): {}", content.len(), log_preview(&content));
        Ok(content)
    }
}

#[async_trait::async_trait]
impl LanguageModel for ChatCompletionsClient {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, prompt: &Prompt, expect_json: bool) -> Result<String> {
        let messages = vec![
            Message::system(prompt.system.clone()),
            Message::user(prompt.user.clone()),
        ];
        self.chat(messages, expect_json).await
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseFormat {
    JsonObject,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a user message with text and one image sent as a base64 data URL.
    pub fn user_with_image(text: impl Into<String>, image: &[u8], mime_type: &str) -> Self {
        let data_url = format!("data:{};base64,{}", mime_type, BASE64.encode(image));
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                },
            ]),
        }
    }
}
