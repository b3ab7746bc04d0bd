//! Error taxonomy for the receipt pipeline.
//!
//! Backend adapters work with `anyhow` internally; every stage converts its
//! failures into a [`PipelineError`] before returning, so nothing
//! backend-specific crosses a stage boundary.

use axum::http::StatusCode;
use std::fmt;
use thiserror::Error;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Upload,
    Preprocessing,
    Extraction,
    Structuring,
    RecipeSuggestion,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Upload => "upload",
            Stage::Preprocessing => "preprocessing",
            Stage::Extraction => "extraction",
            Stage::Structuring => "structuring",
            Stage::RecipeSuggestion => "recipe_suggestion",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing file, wrong extension or bytes that are not an image.
    #[error("{0}")]
    UploadInvalid(String),

    /// The OCR backend ran but recognized no text.
    #[error("No text found in image: {0}")]
    ExtractionFailed(String),

    /// Model response could not be parsed, even after the repair pass.
    #[error("Failed to structure receipt text: {0}")]
    StructuringFailed(String),

    /// Non-fatal; the orchestrator drops the recipes and keeps the record.
    #[error("Recipe generation failed: {0}")]
    RecipeGenerationFailed(String),

    /// Network failure, bad credentials or a backend process that would not run.
    #[error("{stage} backend unavailable: {reason}")]
    BackendUnavailable { stage: Stage, reason: String },
}

impl PipelineError {
    /// Wrap a backend failure, keeping the full `anyhow` context chain.
    pub fn backend(stage: Stage, err: anyhow::Error) -> Self {
        PipelineError::BackendUnavailable {
            stage,
            reason: format!("{:#}", err),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::UploadInvalid(_) => Stage::Upload,
            PipelineError::ExtractionFailed(_) => Stage::Extraction,
            PipelineError::StructuringFailed(_) => Stage::Structuring,
            PipelineError::RecipeGenerationFailed(_) => Stage::RecipeSuggestion,
            PipelineError::BackendUnavailable { stage, .. } => *stage,
        }
    }

    /// HTTP status the upload endpoint answers with for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::UploadInvalid(_) => StatusCode::BAD_REQUEST,
            PipelineError::ExtractionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::StructuringFailed(_) => StatusCode::BAD_GATEWAY,
            PipelineError::RecipeGenerationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}
