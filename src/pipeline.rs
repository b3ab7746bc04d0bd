//! Receipt processing orchestrator.
//!
//! `Received → Preprocessed → Extracted → Structured → [RecipesGenerated] →
//! Completed`. The first failing stage ends the run with no partial record,
//! except recipe suggestion, whose failure only leaves `recipe_suggestions`
//! absent. The orchestrator never retries.

use crate::config::{AppConfig, OcrSettings, VisionCredentials};
use crate::error::{PipelineError, Stage};
use crate::food::FoodClassifier;
use crate::google_auth::{ServiceAccountAuth, CLOUD_VISION_SCOPE};
use crate::llm::{self, openai::ChatCompletionsClient, LanguageModel};
use crate::ocr::google_vision::{GoogleVisionExtractor, VisionAuth};
use crate::ocr::llm_vision::LlmVisionExtractor;
use crate::ocr::tesseract::TesseractExtractor;
use crate::ocr::{ExtractionInput, TextExtractor};
use crate::preprocess::{self, DiagnosticSink, DirectorySink, PreprocessSettings, RawImage};
use crate::receipt::ReceiptRecord;
use crate::recipes::RecipeSuggester;
use crate::structuring::Structurer;
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Received,
    Preprocessed,
    Extracted,
    Structured,
    RecipesGenerated,
    Completed,
}

/// Shared, immutable pipeline. One instance serves all requests.
pub struct Pipeline {
    preprocess: PreprocessSettings,
    extractor: Arc<dyn TextExtractor>,
    structurer: Structurer,
    recipes: RecipeSuggester,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    model_name: String,
}

impl Pipeline {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        model: Arc<dyn LanguageModel>,
        food: FoodClassifier,
        diagnostics: Option<Arc<dyn DiagnosticSink>>,
    ) -> Self {
        Self {
            preprocess: PreprocessSettings::default(),
            extractor,
            model_name: model.name().to_string(),
            structurer: Structurer::new(model.clone(), food),
            recipes: RecipeSuggester::new(model),
            diagnostics,
        }
    }

    /// Build every backend named in the configuration.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let model = llm::from_settings(&config.llm, http.clone())?;

        let extractor: Arc<dyn TextExtractor> = match &config.ocr {
            OcrSettings::Tesseract { command, lang, psm } => Arc::new(TesseractExtractor::new(
                command.clone(),
                lang.clone(),
                *psm,
                config.request_timeout,
            )),
            OcrSettings::GoogleVision(credentials) => {
                let auth = match credentials {
                    VisionCredentials::ApiKey(key) => VisionAuth::ApiKey(key.clone()),
                    VisionCredentials::ServiceAccountJson(json) => {
                        let sa = ServiceAccountAuth::from_json(json, CLOUD_VISION_SCOPE)?;
                        info!("Cloud Vision authenticating as {}", sa.client_email());
                        VisionAuth::ServiceAccount(sa)
                    }
                };
                Arc::new(GoogleVisionExtractor::new(http.clone(), auth))
            }
            OcrSettings::LlmVision { model: vision_model } => {
                let chat = ChatCompletionsClient::from_settings(&config.llm, http.clone())?
                    .with_model(vision_model.clone());
                Arc::new(LlmVisionExtractor::new(chat))
            }
        };

        let diagnostics = match &config.diagnostics_dir {
            Some(dir) => {
                let sink: Arc<dyn DiagnosticSink> = Arc::new(DirectorySink::new(dir.clone())?);
                Some(sink)
            }
            None => None,
        };

        let food = FoodClassifier::new(config.food_policy)?;

        Ok(Self::new(extractor, model, food, diagnostics))
    }

    pub fn extractor_name(&self) -> &str {
        self.extractor.name()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Run one receipt through every stage.
    pub async fn process(&self, image: RawImage) -> Result<ReceiptRecord, PipelineError> {
        let request_id = Uuid::new_v4().simple().to_string();
        let span = info_span!("receipt", request_id = %request_id, filename = %image.filename);

        async move {
            let result = self.run(image, &request_id).await;
            if let Err(e) = &result {
                warn!(stage = %e.stage(), "Pipeline failed: {}", e);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, image: RawImage, request_id: &str) -> Result<ReceiptRecord, PipelineError> {
        let mut state = RunState::Received;
        info!("Received {} bytes", image.bytes.len());

        let image = Arc::new(image);
        let preprocessed = {
            let image = image.clone();
            let settings = self.preprocess;
            let sink = self.diagnostics.clone();
            let label = format!("{}_{}", request_id, image.filename);
            tokio::task::spawn_blocking(move || {
                let out = preprocess::preprocess(&image, settings)?;
                if let Some(sink) = sink {
                    sink.save(&out.luma, &label);
                }
                Ok::<_, PipelineError>(out)
            })
            .await
            .map_err(|e| PipelineError::backend(Stage::Preprocessing, e.into()))??
        };
        advance(&mut state, RunState::Preprocessed);

        let text = self
            .extractor
            .extract(ExtractionInput {
                original: &image,
                preprocessed: &preprocessed,
            })
            .await?;
        info!("{} extracted {} chars", self.extractor.name(), text.len());
        advance(&mut state, RunState::Extracted);

        let mut record = self.structurer.structure(&text).await?;
        advance(&mut state, RunState::Structured);

        if !record.food_items.is_empty() {
            match self.recipes.suggest_recipes(&record.food_items).await {
                Ok(recipes) => {
                    record.recipe_suggestions = Some(recipes);
                    advance(&mut state, RunState::RecipesGenerated);
                }
                Err(e) => warn!("Continuing without recipes: {}", e),
            }
        }

        advance(&mut state, RunState::Completed);
        Ok(record)
    }
}

fn advance(state: &mut RunState, next: RunState) {
    info!("{:?} -> {:?}", state, next);
    *state = next;
}
