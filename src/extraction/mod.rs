//! Best-effort text extraction for any uploaded file.
//!
//! Raster images go to the vision model first. Model failures and every other format use the
//! deterministic [`fallback`] extractor, and if that fails too the result is a failure notice.
//! [`DocumentExtractor::extract`] therefore always yields an [`Extraction`].

pub mod fallback;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::vision::VisionModel;

pub use fallback::{ExtractorError, is_raster_image};

/// Confidence reported for text transcribed by the vision model.
pub const MODEL_CONFIDENCE: f32 = 0.95;
/// Confidence reported for deterministic extraction.
pub const FALLBACK_CONFIDENCE: f32 = 0.5;
/// Confidence reported when nothing could be extracted.
pub const ERROR_FALLBACK_CONFIDENCE: f32 = 0.1;

/// Which branch produced an extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionKind {
    /// Vision model transcription.
    Model,
    /// Deterministic extractor.
    Fallback,
    /// Failure notice; no content was recovered.
    ErrorFallback,
}

impl ExtractionKind {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Fallback => "fallback",
            Self::ErrorFallback => "error-fallback",
        }
    }
}

/// Text recovered from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    /// Extracted text or a human-readable notice.
    pub text: String,
    /// Confidence in `text`, between `0.0` and `1.0`.
    pub confidence: f32,
    /// Branch that produced the result.
    pub extraction_kind: ExtractionKind,
}

impl Extraction {
    /// Safety-net result naming the file and its size.
    pub fn error_fallback(file_name: &str, size_bytes: u64, reason: &str) -> Self {
        Self {
            text: format!(
                "Document {file_name} ({size_bytes} bytes) could not be processed automatically: \
                 {reason}. Manual review required."
            ),
            confidence: ERROR_FALLBACK_CONFIDENCE,
            extraction_kind: ExtractionKind::ErrorFallback,
        }
    }

    /// Whether a degraded branch produced this result.
    pub fn is_degraded(&self) -> bool {
        self.extraction_kind != ExtractionKind::Model
    }
}

/// Extraction policy combining the optional vision model with the fallback extractor.
#[derive(Clone, Default)]
pub struct DocumentExtractor {
    vision: Option<Arc<dyn VisionModel>>,
}

impl DocumentExtractor {
    /// Build an extractor; without a vision model every file uses the fallback path.
    pub fn new(vision: Option<Arc<dyn VisionModel>>) -> Self {
        Self { vision }
    }

    /// Extract text from `bytes`. Never fails.
    pub async fn extract(&self, file_name: &str, bytes: Bytes) -> Extraction {
        if is_raster_image(file_name)
            && let Some(vision) = &self.vision
        {
            match vision.extract_text(file_name, &bytes).await {
                Ok(output) => {
                    return Extraction {
                        text: output.text,
                        confidence: MODEL_CONFIDENCE,
                        extraction_kind: ExtractionKind::Model,
                    };
                }
                Err(error) => {
                    tracing::warn!(file_name, error = %error, "Vision model failed; using fallback extractor");
                }
            }
        }

        let size = bytes.len() as u64;
        let name = file_name.to_string();
        let outcome =
            tokio::task::spawn_blocking(move || fallback::extract(&name, &bytes)).await;

        match outcome {
            Ok(Ok(text)) => Extraction {
                text,
                confidence: FALLBACK_CONFIDENCE,
                extraction_kind: ExtractionKind::Fallback,
            },
            Ok(Err(error)) => {
                tracing::warn!(file_name, error = %error, "Fallback extractor failed");
                Extraction::error_fallback(file_name, size, &error.to_string())
            }
            Err(join_error) => {
                tracing::error!(file_name, error = %join_error, "Fallback extractor task aborted");
                Extraction::error_fallback(file_name, size, "extractor task aborted")
            }
        }
    }
}
