//! Language model backends.
//!
//! Defines the [`LanguageModel`] trait used by the structuring and recipe
//! stages. One implementation per provider family, chosen at start-up.

pub mod ollama;
pub mod openai;

use std::sync::Arc;

/// A single-turn prompt: fixed instructions plus the request payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Async trait implemented by each language model backend.
///
/// Implementations are stateless request/response clients and are shared
/// across concurrent requests.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider and model, e.g. `openai:gpt-4o-mini`.
    fn name(&self) -> &str;

    /// Run one completion. With `expect_json` the backend asks the provider
    /// for a JSON-only reply where the API supports it.
    async fn complete(&self, prompt: &Prompt, expect_json: bool) -> anyhow::Result<String>;
}

/// Known provider identifiers used for configuration lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmProviderKind {
    OpenAi,
    OpenRouter,
    Ollama,
}

impl LlmProviderKind {
    /// Parse a configuration string into a provider kind.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "openai" => Some(Self::OpenAi),
            "openrouter" => Some(Self::OpenRouter),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::OpenRouter => "openrouter",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::OpenRouter => "openai/gpt-4o-mini",
            Self::Ollama => "llama3",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::Ollama => "http://localhost:11434",
        }
    }

    /// Environment variable holding the API key, if the provider needs one.
    pub fn api_key_var(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::Ollama => None,
        }
    }
}

/// Resolved language model settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProviderKind,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
}

/// Build the configured backend on a shared HTTP client.
pub fn from_settings(
    settings: &LlmSettings,
    http: reqwest::Client,
) -> anyhow::Result<Arc<dyn LanguageModel>> {
    let model: Arc<dyn LanguageModel> = match settings.provider {
        LlmProviderKind::OpenAi | LlmProviderKind::OpenRouter => {
            Arc::new(openai::ChatCompletionsClient::from_settings(settings, http)?)
        }
        LlmProviderKind::Ollama => Arc::new(ollama::OllamaClient::new(
            http,
            &settings.base_url,
            &settings.model,
        )),
    };
    Ok(model)
}

/// Shorten a model reply for debug logs.
pub(crate) fn log_preview(text: &str) -> &str {
    let mut end = text.len().min(500);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
