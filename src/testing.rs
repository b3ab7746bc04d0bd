//! Test doubles for the OCR and language model seams.

use crate::error::PipelineError;
use crate::llm::{LanguageModel, Prompt};
use crate::ocr::{require_text, ExtractionInput, TextExtractor};
use image::{GrayImage, ImageOutputFormat, Luma};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Mutex;

/// Replies with canned responses in order and records every prompt.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(Prompt, bool)>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn json_flags(&self) -> Vec<bool> {
        self.calls.lock().unwrap().iter().map(|(_, json)| *json).collect()
    }
}

#[async_trait::async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &Prompt, expect_json: bool) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push((prompt.clone(), expect_json));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("scripted model has no response left"))
    }
}

/// Simulates a network outage on every call.
pub struct FailingModel;

#[async_trait::async_trait]
impl LanguageModel for FailingModel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _prompt: &Prompt, _expect_json: bool) -> anyhow::Result<String> {
        Err(anyhow::anyhow!("connection refused").context("Failed to send request"))
    }
}

/// Returns fixed text regardless of the image.
pub struct FixedTextExtractor {
    pub text: String,
}

#[async_trait::async_trait]
impl TextExtractor for FixedTextExtractor {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn extract(&self, input: ExtractionInput<'_>) -> Result<String, PipelineError> {
        assert!(!input.original.bytes.is_empty());
        require_text(self.text.clone(), self.name())
    }
}

/// 64x48 light PNG with a few thick dark strokes.
pub fn receipt_png() -> Vec<u8> {
    let img = GrayImage::from_fn(64, 48, |x, y| {
        let on_line = (10..14).contains(&y) || (26..30).contains(&y);
        if on_line && (8..56).contains(&x) && x % 8 < 5 {
            Luma([30])
        } else {
            Luma([220])
        }
    });
    let mut png = Cursor::new(Vec::new());
    img.write_to(&mut png, ImageOutputFormat::Png).unwrap();
    png.into_inner()
}
