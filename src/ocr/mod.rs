//! Modular text extraction abstraction.
//!
//! Defines the [`TextExtractor`] trait so OCR backends (local tesseract,
//! Google Cloud Vision, a vision-capable chat model) can be swapped by
//! configuration. The backend is fixed at start-up; nothing here checks for
//! availability at request time.

pub mod google_vision;
pub mod llm_vision;
pub mod tesseract;

use crate::error::PipelineError;
use crate::preprocess::{PreprocessedImage, RawImage};

/// Both renditions of the receipt; each backend reads the one it needs.
#[derive(Clone, Copy)]
pub struct ExtractionInput<'a> {
    pub original: &'a RawImage,
    pub preprocessed: &'a PreprocessedImage,
}

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// Extract the receipt text. No text at all is `ExtractionFailed`,
    /// never an empty `Ok`.
    async fn extract(&self, input: ExtractionInput<'_>) -> Result<String, PipelineError>;
}

/// Known backend identifiers used for configuration lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrBackendKind {
    Tesseract,
    GoogleVision,
    LlmVision,
}

impl OcrBackendKind {
    /// Parse a configuration string into a backend kind.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tesseract" => Some(Self::Tesseract),
            "google_vision" => Some(Self::GoogleVision),
            "llm_vision" => Some(Self::LlmVision),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tesseract => "tesseract",
            Self::GoogleVision => "google_vision",
            Self::LlmVision => "llm_vision",
        }
    }
}

/// Reject output with no visible characters.
pub(crate) fn require_text(text: String, backend: &str) -> Result<String, PipelineError> {
    if text.trim().is_empty() {
        Err(PipelineError::ExtractionFailed(format!(
            "{} recognized no text",
            backend
        )))
    } else {
        Ok(text)
    }
}
