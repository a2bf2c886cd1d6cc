//! Core types shared across the pipeline: configuration and errors.

pub mod config;
pub mod errors;

pub use config::{ParallelPolicy, PipelineConfig, ServiceLimits, ThresholdStrategy};
pub use errors::{ExtractError, PipelineStage};
