//! The extraction pipeline: decode → preprocess → recognize → aggregate.
//!
//! Each request's data is exclusively owned by its pipeline run and handed
//! from stage to stage by value; nothing here is shared across requests
//! except the engine handle itself.

pub mod aggregate;
pub mod decode;
pub mod engine;
pub mod preprocess;
pub mod raster;
pub mod result;

use crate::core::config::{ParallelPolicy, PipelineConfig, ServiceLimits};
use crate::core::errors::{ExtractError, PipelineStage};
use engine::RecognitionEngine;
use preprocess::Preprocessor;
use raster::RawImage;
use result::ExtractionResult;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// A configured extraction pipeline.
///
/// Cheap to share behind an [`Arc`]; per-request state lives entirely in the
/// [`extract`](Pipeline::extract) call.
#[derive(Debug)]
pub struct Pipeline {
    engine: Arc<dyn RecognitionEngine>,
    preprocessor: Preprocessor,
    limits: ServiceLimits,
}

impl Pipeline {
    /// Builds a pipeline around a recognition engine.
    pub fn new(engine: Arc<dyn RecognitionEngine>, limits: ServiceLimits) -> Self {
        Self {
            engine,
            preprocessor: Preprocessor::new(ParallelPolicy::default()),
            limits,
        }
    }

    /// Replaces the preprocessor's parallelism policy.
    pub fn with_parallel_policy(mut self, policy: ParallelPolicy) -> Self {
        self.preprocessor = Preprocessor::new(policy);
        self
    }

    /// The service limits this pipeline enforces.
    pub fn limits(&self) -> &ServiceLimits {
        &self.limits
    }

    /// Runs one request through every stage.
    ///
    /// CPU-heavy decoding and preprocessing run on the blocking pool so the
    /// async worker driving this future stays responsive; the engine call is
    /// awaited directly and is the cancellation point for timeouts.
    pub async fn extract(
        &self,
        raw: RawImage,
        config: &PipelineConfig,
    ) -> Result<ExtractionResult, ExtractError> {
        let started = Instant::now();

        let limits = self.limits.clone();
        let preprocessor = self.preprocessor.clone();
        let stage_config = config.clone();
        let prepared = tokio::task::spawn_blocking(move || {
            let decoded = decode::decode(raw, &limits)?;
            preprocessor.prepare(decoded, &stage_config)
        })
        .await
        .map_err(|e| ExtractError::stage(PipelineStage::Preprocess, "blocking stage task failed", e))??;

        if prepared.blank {
            debug!("blank raster, skipping recognition");
            return Ok(ExtractionResult::empty(started.elapsed()));
        }

        let spans = match self.engine.recognize(&prepared, &config.language).await {
            Ok(spans) => spans,
            Err(ExtractError::Engine {
                message,
                transient: true,
            }) => {
                // One internal retry for what looks like an engine crash;
                // deterministic rejections are surfaced immediately.
                warn!(%message, "transient engine fault, retrying once");
                self.engine.recognize(&prepared, &config.language).await?
            }
            Err(other) => return Err(other),
        };

        debug!(spans = spans.len(), "recognition complete");
        Ok(aggregate::aggregate(spans, config, started.elapsed()))
    }
}
