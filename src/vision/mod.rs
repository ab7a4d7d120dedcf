//! Vision/OCR model invocation.
//!
//! Raster images are sent to an Ollama multimodal model through `/api/generate` with the image
//! attached as base64. An empty transcription counts as a failure so the extractor falls back.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

const OCR_PROMPT: &str = "Extract all text visible in this image. Return only the text, \
preserving line breaks. Do not describe the image.";

/// Errors surfaced by vision model providers.
#[derive(Debug, Error)]
pub enum VisionError {
    /// Provider could not be reached or the model is missing.
    #[error("Vision provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Vision extraction failed: {0}")]
    ExtractionFailed(String),
    /// Provider response could not be parsed or was empty.
    #[error("Malformed vision response: {0}")]
    InvalidResponse(String),
}

/// Text recognized in an image.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionOutput {
    /// Transcribed text.
    pub text: String,
}

/// Interface implemented by OCR/vision backends.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Transcribe the text contained in `bytes`.
    async fn extract_text(&self, file_name: &str, bytes: &[u8]) -> Result<VisionOutput, VisionError>;
}

/// Vision model served by Ollama.
pub struct OllamaVisionClient {
    http: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    #[serde(default)]
    done: bool,
}

impl OllamaVisionClient {
    /// Construct a client for the multimodal `model` served at `base_url`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, VisionError> {
        let http = Client::builder()
            .user_agent("rusty-docs/vision")
            .build()
            .map_err(|error| VisionError::ProviderUnavailable(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl VisionModel for OllamaVisionClient {
    async fn extract_text(&self, file_name: &str, bytes: &[u8]) -> Result<VisionOutput, VisionError> {
        let payload = json!({
            "model": self.model,
            "prompt": OCR_PROMPT,
            "images": [STANDARD.encode(bytes)],
            "stream": false,
            "options": { "temperature": 0.0 }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                VisionError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(VisionError::ProviderUnavailable(format!(
                "model {} is not available at {}",
                self.model,
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::ExtractionFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaGenerateResponse = response.json().await.map_err(|error| {
            VisionError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(VisionError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        let text = body.response.trim().to_string();
        if text.is_empty() {
            return Err(VisionError::InvalidResponse(format!(
                "no text recognized in {file_name}"
            )));
        }

        tracing::debug!(file_name, chars = text.len(), "Vision model transcribed image");
        Ok(VisionOutput { text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn sends_base64_image_and_returns_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"model":"llava","images":["AQID"],"stream":false}"#);
                then.status(200).json_body(json!({
                    "response": "  Loan amount: 250,000 \n",
                    "done": true
                }));
            })
            .await;

        let client = OllamaVisionClient::new(server.base_url(), "llava").expect("client");
        let output = client
            .extract_text("scan.png", &[1, 2, 3])
            .await
            .expect("text");

        mock.assert_async().await;
        assert_eq!(output.text, "Loan amount: 250,000");
    }

    #[tokio::test]
    async fn empty_transcription_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).json_body(json!({ "response": "   ", "done": true }));
            })
            .await;

        let client = OllamaVisionClient::new(server.base_url(), "llava").expect("client");
        let error = client
            .extract_text("blank.png", &[0])
            .await
            .expect_err("empty");
        assert!(matches!(error, VisionError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn error_status_maps_to_extraction_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("boom");
            })
            .await;

        let client = OllamaVisionClient::new(server.base_url(), "llava").expect("client");
        let error = client
            .extract_text("scan.png", &[0])
            .await
            .expect_err("500");
        assert!(matches!(error, VisionError::ExtractionFailed(message) if message.contains("500")));
    }
}
