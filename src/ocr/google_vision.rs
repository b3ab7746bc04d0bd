//! Google Cloud Vision provider (uses the `images:annotate` REST API).
//!
//! Sends the original, unprocessed upload; the first text annotation is the
//! full page text and the per-word annotations are discarded.

use super::{require_text, ExtractionInput, TextExtractor};
use crate::error::{PipelineError, Stage};
use crate::google_auth::ServiceAccountAuth;
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const VISION_ANNOTATE_URL: &str = "https://vision.googleapis.com/v1/images:annotate";

pub enum VisionAuth {
    ApiKey(String),
    ServiceAccount(ServiceAccountAuth),
}

pub struct GoogleVisionExtractor {
    client: reqwest::Client,
    auth: VisionAuth,
}

impl GoogleVisionExtractor {
    pub fn new(client: reqwest::Client, auth: VisionAuth) -> Self {
        Self { client, auth }
    }

    async fn annotate(&self, image: &[u8]) -> anyhow::Result<AnnotateImageResponse> {
        let body = AnnotateRequest {
            requests: vec![AnnotateImageRequest {
                image: ImageContent {
                    content: BASE64.encode(image),
                },
                features: vec![Feature {
                    feature_type: "TEXT_DETECTION",
                }],
            }],
        };

        let request = match &self.auth {
            VisionAuth::ApiKey(key) => self
                .client
                .post(VISION_ANNOTATE_URL)
                .query(&[("key", key.as_str())]),
            VisionAuth::ServiceAccount(sa) => {
                let token = sa.access_token(&self.client).await?;
                self.client.post(VISION_ANNOTATE_URL).bearer_auth(token)
            }
        };

        let resp = request
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Cloud Vision")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Cloud Vision API error ({}): {}", status, text);
        }

        let annotated: AnnotateResponse = resp
            .json()
            .await
            .context("Failed to parse Cloud Vision response")?;

        annotated
            .responses
            .into_iter()
            .next()
            .context("Cloud Vision returned no per-image response")
    }
}

// ── Cloud Vision API request/response types ─────────────────────────────────

#[derive(Serialize)]
struct AnnotateRequest {
    requests: Vec<AnnotateImageRequest>,
}

#[derive(Serialize)]
struct AnnotateImageRequest {
    image: ImageContent,
    features: Vec<Feature>,
}

#[derive(Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Serialize)]
struct Feature {
    #[serde(rename = "type")]
    feature_type: &'static str,
}

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    text_annotations: Vec<EntityAnnotation>,
    #[serde(default)]
    error: Option<RpcStatus>,
}

#[derive(Deserialize)]
struct EntityAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct RpcStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

/// Pick the full-text annotation out of a per-image response.
fn primary_text(response: AnnotateImageResponse) -> Result<String, PipelineError> {
    if let Some(status) = response.error {
        return Err(PipelineError::BackendUnavailable {
            stage: Stage::Extraction,
            reason: format!("Cloud Vision error {}: {}", status.code, status.message),
        });
    }

    let text = response
        .text_annotations
        .into_iter()
        .next()
        .map(|annotation| annotation.description)
        .unwrap_or_default();

    require_text(text, "google_vision")
}

// ── Provider implementation ─────────────────────────────────────────────────

#[async_trait::async_trait]
impl TextExtractor for GoogleVisionExtractor {
    fn name(&self) -> &str {
        "google_vision"
    }

    async fn extract(&self, input: ExtractionInput<'_>) -> Result<String, PipelineError> {
        info!(
            "GoogleVisionExtractor: annotating {} ({} bytes)",
            input.original.filename,
            input.original.bytes.len()
        );

        let response = self
            .annotate(&input.original.bytes)
            .await
            .map_err(|e| PipelineError::backend(Stage::Extraction, e))?;

        debug!(
            "GoogleVisionExtractor: {} text annotations",
            response.text_annotations.len()
        );
        primary_text(response)
    }
}
