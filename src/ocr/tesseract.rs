//! Local OCR via the `tesseract` executable.

use super::{require_text, ExtractionInput, TextExtractor};
use crate::error::{PipelineError, Stage};
use anyhow::Context;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

pub struct TesseractExtractor {
    command: String,
    lang: String,
    psm: u32,
    timeout: Duration,
}

impl TesseractExtractor {
    pub fn new(command: impl Into<String>, lang: impl Into<String>, psm: u32, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            lang: lang.into(),
            psm,
            timeout,
        }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            self.lang.clone(),
            "--psm".to_string(),
            self.psm.to_string(),
        ]
    }

    /// Pipe a PNG through tesseract and return stdout.
    async fn run(&self, png: &[u8]) -> anyhow::Result<String> {
        let mut child = Command::new(&self.command)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to start '{}'. Is tesseract-ocr installed and on PATH?",
                    self.command
                )
            })?;

        let mut stdin = child
            .stdin
            .take()
            .context("tesseract stdin was not captured")?;
        let feed = async move {
            let written = stdin.write_all(png).await;
            // Closing stdin signals end of image.
            drop(stdin);
            written
        };

        // The write and the wait share one deadline. On timeout the child is
        // dropped with the future and killed.
        let (written, output) = tokio::time::timeout(self.timeout, async {
            tokio::join!(feed, child.wait_with_output())
        })
        .await
        .with_context(|| format!("tesseract timed out after {:?}", self.timeout))?;
        let output = output.context("Failed to wait for tesseract")?;

        // Checked before the write result: an early exit breaks the pipe, and
        // stderr names the real cause.
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tesseract exited with {}: {}", output.status, stderr.trim());
        }
        written.context("Failed to pipe image to tesseract stdin")?;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait::async_trait]
impl TextExtractor for TesseractExtractor {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn extract(&self, input: ExtractionInput<'_>) -> Result<String, PipelineError> {
        let png = input
            .preprocessed
            .to_png()
            .map_err(|e| PipelineError::backend(Stage::Extraction, e))?;

        info!(
            "TesseractExtractor: recognizing {} ({} byte PNG, lang={}, psm={})",
            input.original.filename,
            png.len(),
            self.lang,
            self.psm
        );

        let text = self
            .run(&png)
            .await
            .map_err(|e| PipelineError::backend(Stage::Extraction, e))?;

        debug!("TesseractExtractor: {} chars recognized", text.len());
        require_text(text, self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::{PreprocessedImage, RawImage};
    use image::{GrayImage, Luma};
    use std::path::PathBuf;
    use std::time::Instant;

    /// Write an executable shell script standing in for tesseract.
    #[cfg(unix)]
    fn fake_tesseract(script: &str) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("receipt-chef-tess-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tesseract");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, path)
    }

    /// Noise compresses badly, so the PNG is far larger than a pipe buffer.
    fn noisy_image() -> PreprocessedImage {
        let mut state: u32 = 0x2545_f491;
        let luma = GrayImage::from_fn(600, 600, |_, _| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            Luma([(state >> 24) as u8])
        });
        PreprocessedImage { luma }
    }

    async fn extract_with(tess: &TesseractExtractor, preprocessed: &PreprocessedImage) -> PipelineError {
        let original = RawImage::new("r.png", vec![1]);
        tess.extract(ExtractionInput {
            original: &original,
            preprocessed,
        })
        .await
        .unwrap_err()
    }

    #[test]
    fn test_args() {
        let tess = TesseractExtractor::new("tesseract", "eng", 6, Duration::from_secs(5));
        assert_eq!(tess.args(), vec!["stdin", "stdout", "-l", "eng", "--psm", "6"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_backend_unavailable() {
        let tess = TesseractExtractor::new(
            "/nonexistent/receipt-chef-tesseract",
            "eng",
            6,
            Duration::from_secs(5),
        );
        let original = RawImage::new("r.png", Vec::new());
        let preprocessed = PreprocessedImage {
            luma: GrayImage::new(8, 8),
        };

        let err = tess
            .extract(ExtractionInput {
                original: &original,
                preprocessed: &preprocessed,
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::BackendUnavailable {
                stage: Stage::Extraction,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_covers_stalled_image_write() {
        let (dir, script) = fake_tesseract("exec sleep 20");
        let tess = TesseractExtractor::new(
            script.to_string_lossy(),
            "eng",
            6,
            Duration::from_secs(1),
        );
        let image = noisy_image();
        assert!(image.to_png().unwrap().len() > 256 * 1024);

        let started = Instant::now();
        let err = extract_with(&tess, &image).await;
        let elapsed = started.elapsed();
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(elapsed < Duration::from_secs(10), "took {:?}", elapsed);
        match err {
            PipelineError::BackendUnavailable { stage, reason } => {
                assert_eq!(stage, Stage::Extraction);
                assert!(reason.contains("timed out"), "{}", reason);
            }
            other => panic!("expected BackendUnavailable, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_reports_stderr() {
        let (dir, script) =
            fake_tesseract("echo \"Failed loading language 'zzz'\" >&2\nexit 1");
        let tess = TesseractExtractor::new(
            script.to_string_lossy(),
            "zzz",
            6,
            Duration::from_secs(10),
        );

        let err = extract_with(&tess, &noisy_image()).await;
        std::fs::remove_dir_all(&dir).unwrap();

        match err {
            PipelineError::BackendUnavailable { reason, .. } => {
                assert!(reason.contains("Failed loading language"), "{}", reason);
            }
            other => panic!("expected BackendUnavailable, got {:?}", other),
        }
    }
}
