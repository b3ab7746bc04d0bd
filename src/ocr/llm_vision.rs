//! Transcription by a vision-capable chat model.

use super::{require_text, ExtractionInput, TextExtractor};
use crate::error::{PipelineError, Stage};
use crate::llm::openai::{ChatCompletionsClient, Message};
use tracing::info;

const TRANSCRIBE_PROMPT: &str = "This is a photo of a retail receipt. Transcribe all of the text \
on it exactly as printed, one receipt line per output line, keeping prices next to their items. \
Do not summarize, translate or add commentary. If the image contains no legible text, reply \
with exactly NO_TEXT.";

const NO_TEXT_MARKER: &str = "NO_TEXT";

pub struct LlmVisionExtractor {
    chat: ChatCompletionsClient,
    label: String,
}

impl LlmVisionExtractor {
    pub fn new(chat: ChatCompletionsClient) -> Self {
        let label = format!("llm_vision:{}", chat.model());
        Self { chat, label }
    }
}

#[async_trait::async_trait]
impl TextExtractor for LlmVisionExtractor {
    fn name(&self) -> &str {
        &self.label
    }

    async fn extract(&self, input: ExtractionInput<'_>) -> Result<String, PipelineError> {
        let original = input.original;
        info!(
            "LlmVisionExtractor: transcribing {} ({} bytes)",
            original.filename,
            original.bytes.len()
        );

        let messages = vec![Message::user_with_image(
            TRANSCRIBE_PROMPT,
            &original.bytes,
            original.mime_type(),
        )];

        let reply = self
            .chat
            .chat(messages, false)
            .await
            .map_err(|e| PipelineError::backend(Stage::Extraction, e))?;

        strip_no_text_marker(reply).and_then(|text| require_text(text, &self.label))
    }
}

fn strip_no_text_marker(reply: String) -> Result<String, PipelineError> {
    if reply.trim() == NO_TEXT_MARKER {
        Err(PipelineError::ExtractionFailed(
            "vision model reported no legible text".to_string(),
        ))
    } else {
        Ok(reply)
    }
}
