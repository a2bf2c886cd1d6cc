//! # textgrab
//!
//! Image-to-text extraction pipeline with bounded-concurrency request
//! handling. The crate is organised as a chain of owned pipeline stages:
//!
//! ```text
//! bytes -> decode -> preprocess -> recognize -> aggregate -> ExtractionResult
//! ```
//!
//! with [`coordinator::RequestCoordinator`] multiplexing many such pipelines
//! across a fixed worker pool behind a bounded FIFO queue.
//!
//! The recognition engine itself is a black box behind the
//! [`pipeline::engine::RecognitionEngine`] trait; the production
//! implementation shells out to the system `tesseract` binary, and tests
//! substitute deterministic doubles.

pub mod coordinator;
pub mod core;
pub mod pipeline;
pub mod utils;

pub use coordinator::{CoordinatorSnapshot, RequestCoordinator};
pub use core::config::{ParallelPolicy, PipelineConfig, ServiceLimits, ThresholdStrategy};
pub use core::errors::{ExtractError, PipelineStage};
pub use pipeline::result::{ExtractionResult, RecognitionSpan, SpanRegion, TextBlock};
pub use pipeline::Pipeline;
