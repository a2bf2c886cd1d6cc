//! Request/response types and helpers shared between CLI and server modes.

use crate::config::EngineConfig;
use serde::Serialize;
use textgrab::pipeline::engine::{TesseractConfig, TesseractEngine};
use textgrab::{ExtractError, ExtractionResult};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("failed to download image: {0}")]
    Download(String),

    #[error("failed to read file: {0}")]
    FileRead(String),
}

/// A recognized word span in an API response.
#[derive(Debug, Serialize)]
pub struct SpanResponse {
    pub text: String,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One line of text in an API response.
#[derive(Debug, Serialize)]
pub struct BlockResponse {
    pub text: String,
    pub spans: Vec<SpanResponse>,
}

/// Response from text extraction.
#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub success: bool,
    pub text: String,
    pub text_blocks: Vec<BlockResponse>,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl ExtractResponse {
    pub fn success(result: &ExtractionResult) -> Self {
        let text_blocks = result
            .text_blocks
            .iter()
            .map(|block| BlockResponse {
                text: block.text.clone(),
                spans: block
                    .spans
                    .iter()
                    .map(|span| SpanResponse {
                        text: span.text.to_string(),
                        confidence: span.confidence,
                        x: span.region.x,
                        y: span.region.y,
                        width: span.region.width,
                        height: span.region.height,
                    })
                    .collect(),
            })
            .collect();

        Self {
            success: true,
            text: result.full_text(),
            text_blocks,
            confidence: result.confidence,
            duration_ms: Some(result.duration.as_millis() as u64),
            error: None,
            code: None,
        }
    }

    pub fn error(err: &ExtractError) -> Self {
        Self {
            success: false,
            text: String::new(),
            text_blocks: Vec::new(),
            confidence: 0.0,
            duration_ms: None,
            error: Some(err.to_string()),
            code: Some(err.code()),
        }
    }
}

/// Builds the production recognition engine, probing the binary.
pub fn build_engine(config: &EngineConfig) -> Result<TesseractEngine, ExtractError> {
    TesseractEngine::new(TesseractConfig {
        binary: config.binary.clone(),
        page_segmentation_mode: config.page_segmentation_mode,
    })
}


/// Downloads bytes from a URL, along with the reported content type.
pub async fn download_bytes(url: &str) -> Result<(Vec<u8>, Option<String>), AppError> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| AppError::Download(format!("failed to fetch URL: {e}")))?;

    if !response.status().is_success() {
        return Err(AppError::Download(format!(
            "HTTP error: {}",
            response.status()
        )));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AppError::Download(format!("failed to read response body: {e}")))?;

    Ok((bytes.to_vec(), content_type))
}
