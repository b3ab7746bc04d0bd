//! Receipt image normalization ahead of OCR.
//!
//! Grayscale, then a Gaussian-weighted local threshold to binarize against
//! uneven lighting, then a median filter to clear speckle left by the
//! threshold. No resizing, deskewing or rotation correction is done; heavily
//! skewed photos will OCR poorly.

use crate::error::PipelineError;
use image::{GrayImage, ImageFormat, ImageOutputFormat, Luma};
use imageproc::filter::{gaussian_blur_f32, median_filter};
use std::io::Cursor;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Neighbourhood size (pixels) used for the local threshold.
pub const THRESHOLD_WINDOW: u32 = 21;
/// Amount subtracted from the local mean before comparing.
pub const THRESHOLD_BIAS: i16 = 10;
pub const DENOISE_RADIUS: u32 = 1;

/// Uploaded receipt photo. Owned by a single pipeline run.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl RawImage {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// MIME type sniffed from the magic bytes, falling back to the extension.
    pub fn mime_type(&self) -> &'static str {
        let format = image::guess_format(&self.bytes)
            .ok()
            .or_else(|| ImageFormat::from_path(&self.filename).ok());
        match format {
            Some(ImageFormat::Png) => "image/png",
            _ => "image/jpeg",
        }
    }
}

/// Single-channel binarized image produced by [`preprocess`].
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    pub luma: GrayImage,
}

impl PreprocessedImage {
    /// Encode as PNG in memory.
    pub fn to_png(&self) -> anyhow::Result<Vec<u8>> {
        let mut png = Cursor::new(Vec::new());
        self.luma.write_to(&mut png, ImageOutputFormat::Png)?;
        Ok(png.into_inner())
    }
}

/// Fixed preprocessing parameters.
#[derive(Debug, Clone, Copy)]
pub struct PreprocessSettings {
    pub window: u32,
    pub bias: i16,
    pub denoise_radius: u32,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            window: THRESHOLD_WINDOW,
            bias: THRESHOLD_BIAS,
            denoise_radius: DENOISE_RADIUS,
        }
    }
}

/// Decode the upload and run grayscale → adaptive threshold → denoise.
///
/// CPU bound; callers on the async runtime should run it on the blocking pool.
pub fn preprocess(
    image: &RawImage,
    settings: PreprocessSettings,
) -> Result<PreprocessedImage, PipelineError> {
    let decoded = image::load_from_memory(&image.bytes).map_err(|e| {
        PipelineError::UploadInvalid(format!("Could not decode {} as an image: {}", image.filename, e))
    })?;

    let gray = decoded.to_luma8();
    debug!(
        "Preprocessing {} ({}x{})",
        image.filename,
        gray.width(),
        gray.height()
    );

    let binary = adaptive_threshold(&gray, settings.window, settings.bias);
    let denoised = median_filter(&binary, settings.denoise_radius, settings.denoise_radius);

    Ok(PreprocessedImage { luma: denoised })
}

/// Gaussian-weighted local threshold.
///
/// A pixel turns white when it is brighter than its weighted neighbourhood
/// mean minus `bias`, black otherwise. Sigma follows the usual derivation
/// from the window size.
fn adaptive_threshold(gray: &GrayImage, window: u32, bias: i16) -> GrayImage {
    let sigma = (0.3 * ((window as f32 - 1.0) * 0.5 - 1.0) + 0.8).max(0.5);
    let local_mean = gaussian_blur_f32(gray, sigma);

    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let pixel = gray.get_pixel(x, y)[0] as i16;
        let mean = local_mean.get_pixel(x, y)[0] as i16;
        if pixel > mean - bias {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

// ============================================================================
// Diagnostic sink
// ============================================================================

/// Out-of-band destination for intermediate images. Failures are swallowed.
pub trait DiagnosticSink: Send + Sync {
    fn save(&self, image: &GrayImage, label: &str);
}

/// Writes `preprocessed_<label>.png` files into a directory.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| anyhow::anyhow!("Cannot create diagnostics dir {:?}: {}", dir, e))?;
        Ok(Self { dir })
    }

    fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!("preprocessed_{}.png", sanitize_label(label)))
    }
}

impl DiagnosticSink for DirectorySink {
    fn save(&self, image: &GrayImage, label: &str) {
        let path = self.path_for(label);
        match image.save_with_format(&path, ImageFormat::Png) {
            Ok(()) => debug!("Saved diagnostic image {:?}", path),
            Err(e) => warn!("Could not save diagnostic image {:?}: {}", path, e),
        }
    }
}

/// Keep a filename-safe subset of `label` and drop the original extension.
fn sanitize_label(label: &str) -> String {
    let stem = match label.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => label,
    };
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "receipt".to_string()
    } else {
        cleaned
    }
}
