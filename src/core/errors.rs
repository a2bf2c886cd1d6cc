//! Error types for the extraction pipeline.
//!
//! One taxonomy enum, [`ExtractError`], covers every failure the pipeline or
//! the coordinator can surface, and [`PipelineStage`] names where it happened.
//! The pair gives callers enough structure to tell "fix your input" apart
//! from "try again later" and from "service fault".

use thiserror::Error;

/// Stage of the extraction pipeline an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Input validation and image decoding.
    Decode,
    /// Grayscale/deskew/binarization.
    Preprocess,
    /// The external recognition engine call.
    Recognition,
    /// Span ordering and result assembly.
    Aggregation,
    /// Queue admission and worker scheduling.
    Coordination,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Decode => write!(f, "decode"),
            PipelineStage::Preprocess => write!(f, "preprocess"),
            PipelineStage::Recognition => write!(f, "recognition"),
            PipelineStage::Aggregation => write!(f, "aggregation"),
            PipelineStage::Coordination => write!(f, "coordination"),
        }
    }
}

/// Errors surfaced by the extraction pipeline and the request coordinator.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The uploaded bytes are empty, truncated, or not a parseable image.
    /// Never retried: the caller's input is malformed.
    #[error("invalid image: {message}")]
    InvalidImage {
        /// What failed to parse or validate.
        message: String,
    },

    /// The image's decoded dimensions or byte size exceed the configured
    /// ceiling. Checked before the pixel buffer is allocated.
    #[error("image too large: {actual} exceeds limit {limit} ({unit})")]
    ImageTooLarge {
        /// The offending measurement.
        actual: u64,
        /// The configured ceiling.
        limit: u64,
        /// What was measured ("bytes", "pixels per side").
        unit: &'static str,
    },

    /// The requested language profile is not installed in the engine.
    #[error("unsupported language profile '{language}'")]
    UnsupportedLanguage {
        /// The ISO language code the caller asked for.
        language: String,
    },

    /// The external recognition engine reported an internal fault.
    #[error("recognition engine fault: {message}")]
    Engine {
        /// Engine-provided detail.
        message: String,
        /// Whether the fault looks transient (engine crash rather than a
        /// deterministic rejection of the input). Transient faults are
        /// retried once inside the pipeline.
        transient: bool,
    },

    /// The queue is full; the request was rejected at admission rather than
    /// queued unboundedly.
    #[error("service at capacity, retry after {retry_after_ms}ms")]
    Backpressure {
        /// Hint for the caller's retry schedule.
        retry_after_ms: u64,
    },

    /// The per-request timeout elapsed while the request was running. The
    /// in-flight engine call was cancelled; no partial result exists.
    #[error("request timed out after {timeout_ms}ms")]
    TimedOut {
        /// The configured budget that elapsed.
        timeout_ms: u64,
    },

    /// The request was accepted but no worker delivered a result: the
    /// service shut down, or the worker was lost mid-request.
    #[error("request cancelled before completion")]
    Cancelled,

    /// Wrapper for stage errors that carry an underlying cause.
    #[error("{stage} failed: {context}")]
    Stage {
        /// Where in the pipeline the error occurred.
        stage: PipelineStage,
        /// Human-readable context.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ExtractError {
    /// Builds an [`ExtractError::InvalidImage`] from anything printable.
    pub fn invalid_image(message: impl Into<String>) -> Self {
        Self::InvalidImage {
            message: message.into(),
        }
    }

    /// Builds a non-transient [`ExtractError::Engine`].
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
            transient: false,
        }
    }

    /// Builds a transient [`ExtractError::Engine`], eligible for one
    /// internal retry.
    pub fn engine_transient(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
            transient: true,
        }
    }

    /// Wraps an underlying error with stage context.
    pub fn stage(
        stage: PipelineStage,
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Stage {
            stage,
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether retrying the same request later could succeed.
    ///
    /// Drives the HTTP layer's status mapping: `false` for caller mistakes
    /// (4xx), `true` for capacity and transient faults (5xx).
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Backpressure { .. }
                | Self::TimedOut { .. }
                | Self::Cancelled
                | Self::Engine {
                    transient: true,
                    ..
                }
        )
    }

    /// Short machine-readable code for response payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidImage { .. } => "invalid_image",
            Self::ImageTooLarge { .. } => "image_too_large",
            Self::UnsupportedLanguage { .. } => "unsupported_language",
            Self::Engine { .. } => "engine_error",
            Self::Backpressure { .. } => "backpressure",
            Self::TimedOut { .. } => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Stage { .. } => "internal_error",
        }
    }
}

impl From<image::ImageError> for ExtractError {
    fn from(error: image::ImageError) -> Self {
        match error {
            image::ImageError::Limits(limits) => Self::invalid_image(limits.to_string()),
            other => Self::invalid_image(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_partition() {
        assert!(!ExtractError::invalid_image("x").retryable());
        assert!(!ExtractError::UnsupportedLanguage {
            language: "xx".into()
        }
        .retryable());
        assert!(!ExtractError::engine("deterministic rejection").retryable());
        assert!(ExtractError::engine_transient("crash").retryable());
        assert!(ExtractError::Backpressure { retry_after_ms: 100 }.retryable());
        assert!(ExtractError::TimedOut { timeout_ms: 500 }.retryable());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ExtractError::invalid_image("x").code(), "invalid_image");
        assert_eq!(
            ExtractError::ImageTooLarge {
                actual: 10,
                limit: 5,
                unit: "bytes"
            }
            .code(),
            "image_too_large"
        );
        assert_eq!(
            ExtractError::Backpressure { retry_after_ms: 1 }.code(),
            "backpressure"
        );
    }

    #[test]
    fn stage_wrapper_is_an_internal_fault() {
        let err = ExtractError::stage(
            PipelineStage::Preprocess,
            "blocking stage task failed",
            std::io::Error::other("worker gone"),
        );
        assert_eq!(err.code(), "internal_error");
        assert!(!err.retryable());
        assert!(err.to_string().contains("preprocess failed"));
    }

    #[test]
    fn stage_display() {
        assert_eq!(PipelineStage::Recognition.to_string(), "recognition");
        let err = ExtractError::stage(
            PipelineStage::Decode,
            "header parse",
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"),
        );
        assert!(err.to_string().contains("decode failed"));
    }
}
