//! Result types produced by the recognition and aggregation stages.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Axis-aligned source location of a recognized span, in pixels of the
/// preprocessed raster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpanRegion {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width.
    pub width: f32,
    /// Height.
    pub height: f32,
}

impl SpanRegion {
    /// Builds a region from its left/top corner and extent.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Vertical center, the coordinate line banding clusters on.
    pub fn y_center(&self) -> f32 {
        self.y + self.height / 2.0
    }
}

/// A contiguous recognized text fragment. Produced only by the recognition
/// engine; immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionSpan {
    /// Where in the raster the text was found.
    pub region: SpanRegion,
    /// The recognized text.
    pub text: Arc<str>,
    /// Engine confidence in [0, 1].
    pub confidence: f32,
}

impl RecognitionSpan {
    /// Builds a span, clamping confidence into [0, 1].
    pub fn new(region: SpanRegion, text: impl Into<Arc<str>>, confidence: f32) -> Self {
        Self {
            region,
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// One line band of spans in reading order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    /// Spans left-to-right within the band.
    pub spans: Vec<RecognitionSpan>,
    /// Whitespace-normalized text of the band.
    pub text: String,
}

/// Terminal artifact of the pipeline, returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Line bands in reading order (top-to-bottom).
    pub text_blocks: Vec<TextBlock>,
    /// Length-weighted mean confidence of retained spans; 0.0 when nothing
    /// was retained ("no legible text" is a valid outcome).
    pub confidence: f32,
    /// Wall-clock time the pipeline spent on this request.
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl ExtractionResult {
    /// An empty result: no legible text, confidence zero.
    pub fn empty(duration: Duration) -> Self {
        Self {
            text_blocks: Vec::new(),
            confidence: 0.0,
            duration,
        }
    }

    /// All block text joined with newlines.
    pub fn full_text(&self) -> String {
        self.text_blocks
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
