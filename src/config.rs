//! Service configuration.
//!
//! Read once from the environment (after `.env` is loaded) and validated
//! before the listener binds, so a missing key or unknown backend aborts
//! start-up instead of failing the first request.

use crate::food::FoodItemPolicy;
use crate::llm::{LlmProviderKind, LlmSettings};
use crate::ocr::OcrBackendKind;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Credentials for the Cloud Vision backend.
#[derive(Debug, Clone)]
pub enum VisionCredentials {
    ApiKey(String),
    /// Service account key file contents.
    ServiceAccountJson(String),
}

#[derive(Debug, Clone)]
pub enum OcrSettings {
    Tesseract { command: String, lang: String, psm: u32 },
    GoogleVision(VisionCredentials),
    LlmVision { model: String },
}

impl OcrSettings {
    pub fn kind(&self) -> OcrBackendKind {
        match self {
            OcrSettings::Tesseract { .. } => OcrBackendKind::Tesseract,
            OcrSettings::GoogleVision(_) => OcrBackendKind::GoogleVision,
            OcrSettings::LlmVision { .. } => OcrBackendKind::LlmVision,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub max_upload_bytes: usize,
    pub request_timeout: Duration,
    pub ocr: OcrSettings,
    pub llm: LlmSettings,
    pub food_policy: FoodItemPolicy,
    pub diagnostics_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let max_upload_bytes = parse_or(get("MAX_UPLOAD_BYTES"), "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let timeout_secs = parse_or(get("REQUEST_TIMEOUT_SECS"), "REQUEST_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            bail!("REQUEST_TIMEOUT_SECS must be greater than zero");
        }

        let llm = load_llm(&get)?;

        let ocr_name = get("OCR_BACKEND").unwrap_or_else(|| "tesseract".to_string());
        let ocr_kind = OcrBackendKind::from_str(&ocr_name).with_context(|| {
            format!(
                "Unknown OCR_BACKEND '{}'. Available: tesseract, google_vision, llm_vision",
                ocr_name
            )
        })?;

        let ocr = match ocr_kind {
            OcrBackendKind::Tesseract => OcrSettings::Tesseract {
                command: get("TESSERACT_CMD").unwrap_or_else(|| "tesseract".to_string()),
                lang: get("TESSERACT_LANG").unwrap_or_else(|| "eng".to_string()),
                psm: parse_or(get("TESSERACT_PSM"), "TESSERACT_PSM", 6)?,
            },
            OcrBackendKind::GoogleVision => OcrSettings::GoogleVision(load_vision_credentials(&get)?),
            OcrBackendKind::LlmVision => {
                if llm.provider == LlmProviderKind::Ollama {
                    bail!("OCR_BACKEND=llm_vision needs LLM_PROVIDER openai or openrouter");
                }
                OcrSettings::LlmVision {
                    model: get("VISION_MODEL").unwrap_or_else(|| llm.model.clone()),
                }
            }
        };

        let policy_name = get("FOOD_ITEM_POLICY").unwrap_or_else(|| "item_flag".to_string());
        let food_policy = FoodItemPolicy::from_str(&policy_name).with_context(|| {
            format!(
                "Unknown FOOD_ITEM_POLICY '{}'. Available: item_flag, keyword",
                policy_name
            )
        })?;

        Ok(Self {
            bind_addr,
            max_upload_bytes,
            request_timeout: Duration::from_secs(timeout_secs),
            ocr,
            llm,
            food_policy,
            diagnostics_dir: get("DIAGNOSTICS_DIR").map(PathBuf::from),
        })
    }
}

fn load_llm(get: &dyn Fn(&str) -> Option<String>) -> Result<LlmSettings> {
    let provider_name = get("LLM_PROVIDER").unwrap_or_else(|| "openai".to_string());
    let provider = LlmProviderKind::from_str(&provider_name).with_context(|| {
        format!(
            "Unknown LLM_PROVIDER '{}'. Available: openai, openrouter, ollama",
            provider_name
        )
    })?;

    let api_key = match provider.api_key_var() {
        Some(var) => Some(
            get(var).with_context(|| format!("{} environment variable not set", var))?,
        ),
        None => None,
    };

    Ok(LlmSettings {
        provider,
        model: get("LLM_MODEL").unwrap_or_else(|| provider.default_model().to_string()),
        base_url: get("LLM_BASE_URL").unwrap_or_else(|| provider.default_base_url().to_string()),
        api_key,
    })
}

fn load_vision_credentials(get: &dyn Fn(&str) -> Option<String>) -> Result<VisionCredentials> {
    if let Some(key) = get("GOOGLE_VISION_API_KEY") {
        return Ok(VisionCredentials::ApiKey(key));
    }
    if let Some(json) = get("GOOGLE_CREDENTIALS") {
        return Ok(VisionCredentials::ServiceAccountJson(json));
    }
    if let Some(path) = get("GOOGLE_APPLICATION_CREDENTIALS") {
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read service account key: {:?}", path))?;
        return Ok(VisionCredentials::ServiceAccountJson(json));
    }
    bail!(
        "OCR_BACKEND=google_vision needs GOOGLE_VISION_API_KEY, GOOGLE_CREDENTIALS \
         or GOOGLE_APPLICATION_CREDENTIALS"
    )
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}
