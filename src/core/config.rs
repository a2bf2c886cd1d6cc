//! Configuration types for the extraction pipeline and the coordinator.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Strategy for reducing a grayscale raster to two intensity levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "strategy", content = "value")]
pub enum ThresholdStrategy {
    /// Single global threshold applied to every pixel.
    Fixed(u8),
    /// Local mean thresholding over a square window; robust to uneven
    /// illumination. The window edge is in pixels.
    Adaptive {
        /// Square window edge length, forced odd and >= 3 when applied.
        window: u32,
        /// Subtracted from the local mean before comparison.
        bias: i16,
    },
}

impl Default for ThresholdStrategy {
    fn default() -> Self {
        ThresholdStrategy::Adaptive {
            window: 25,
            bias: 10,
        }
    }
}

/// Per-request pipeline options. Immutable once a request begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// ISO language code for the recognition engine profile.
    #[serde(default = "PipelineConfig::default_language")]
    pub language: String,

    /// Binarization strategy.
    #[serde(default)]
    pub threshold: ThresholdStrategy,

    /// Spans below this confidence are dropped during aggregation.
    #[serde(default = "PipelineConfig::default_min_confidence")]
    pub min_confidence: f32,

    /// Budget for the running request; elapsing cancels the engine call.
    #[serde(default = "PipelineConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    /// Whether to attempt skew estimation and correction.
    #[serde(default = "PipelineConfig::default_deskew")]
    pub deskew: bool,
}

impl PipelineConfig {
    fn default_language() -> String {
        "eng".to_string()
    }

    fn default_min_confidence() -> f32 {
        0.0
    }

    fn default_timeout_ms() -> u64 {
        30_000
    }

    fn default_deskew() -> bool {
        true
    }

    /// Sets the language profile.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Sets the binarization strategy.
    pub fn with_threshold(mut self, threshold: ThresholdStrategy) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the minimum span confidence, clamped to [0, 1].
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence.clamp(0.0, 1.0);
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Enables or disables deskew.
    pub fn with_deskew(mut self, deskew: bool) -> Self {
        self.deskew = deskew;
        self
    }

    /// The per-request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            language: Self::default_language(),
            threshold: ThresholdStrategy::default(),
            min_confidence: Self::default_min_confidence(),
            timeout_ms: Self::default_timeout_ms(),
            deskew: Self::default_deskew(),
        }
    }
}

/// Service-wide resource ceilings, fixed at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceLimits {
    /// Maximum accepted upload size in bytes, checked before parsing.
    #[serde(default = "ServiceLimits::default_max_image_bytes")]
    pub max_image_bytes: u64,

    /// Maximum decoded width or height in pixels, checked against the image
    /// header before the pixel buffer is allocated.
    #[serde(default = "ServiceLimits::default_max_dimension")]
    pub max_dimension: u32,

    /// Worker pool size. `None` uses the number of available CPU cores;
    /// recognition is CPU-bound so more workers than cores only adds
    /// contention.
    #[serde(default)]
    pub workers: Option<usize>,

    /// Bounded queue depth; submissions beyond it are rejected immediately.
    #[serde(default = "ServiceLimits::default_queue_depth")]
    pub queue_depth: usize,
}

impl ServiceLimits {
    fn default_max_image_bytes() -> u64 {
        20 * 1024 * 1024
    }

    fn default_max_dimension() -> u32 {
        10_000
    }

    fn default_queue_depth() -> usize {
        32
    }

    /// Effective worker count.
    pub fn effective_workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Sets the upload byte ceiling.
    pub fn with_max_image_bytes(mut self, bytes: u64) -> Self {
        self.max_image_bytes = bytes;
        self
    }

    /// Sets the decoded dimension ceiling.
    pub fn with_max_dimension(mut self, pixels: u32) -> Self {
        self.max_dimension = pixels;
        self
    }

    /// Sets the worker pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Sets the queue depth.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            max_image_bytes: Self::default_max_image_bytes(),
            max_dimension: Self::default_max_dimension(),
            workers: None,
            queue_depth: Self::default_queue_depth(),
        }
    }
}

/// Tuning for data-parallel pixel work inside the preprocessor.
///
/// Small rasters binarize faster sequentially than they would schedule onto
/// rayon, so parallel row processing only kicks in above a pixel threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelPolicy {
    /// Maximum rayon threads. `None` keeps rayon's default pool size.
    #[serde(default)]
    pub max_threads: Option<usize>,

    /// Rasters with at most this many pixels are processed sequentially.
    #[serde(default = "ParallelPolicy::default_pixel_threshold")]
    pub pixel_threshold: usize,
}

impl ParallelPolicy {
    fn default_pixel_threshold() -> usize {
        64_000
    }

    /// Sets the maximum thread count.
    pub fn with_max_threads(mut self, max_threads: Option<usize>) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Installs the global rayon pool when `max_threads` is set. Call once at
    /// startup, before any parallel work runs.
    pub fn install_global_thread_pool(&self) -> Result<bool, rayon::ThreadPoolBuildError> {
        if let Some(num_threads) = self.max_threads {
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Whether a raster of `pixels` total pixels should be processed in
    /// parallel.
    pub fn should_parallelize(&self, pixels: usize) -> bool {
        pixels > self.pixel_threshold
    }
}

impl Default for ParallelPolicy {
    fn default() -> Self {
        Self {
            max_threads: None,
            pixel_threshold: Self::default_pixel_threshold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.language, "eng");
        assert_eq!(config.min_confidence, 0.0);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.deskew);
        assert!(matches!(
            config.threshold,
            ThresholdStrategy::Adaptive { .. }
        ));
    }

    #[test]
    fn min_confidence_is_clamped() {
        let config = PipelineConfig::default().with_min_confidence(1.5);
        assert_eq!(config.min_confidence, 1.0);
        let config = PipelineConfig::default().with_min_confidence(-0.2);
        assert_eq!(config.min_confidence, 0.0);
    }

    #[test]
    fn limits_effective_workers_explicit() {
        let limits = ServiceLimits::default().with_workers(3);
        assert_eq!(limits.effective_workers(), 3);
    }

    #[test]
    fn parallel_policy_threshold() {
        let policy = ParallelPolicy::default();
        assert!(!policy.should_parallelize(100));
        assert!(policy.should_parallelize(1_000_000));
    }

    #[test]
    fn global_pool_install_is_a_noop_without_max_threads() {
        let policy = ParallelPolicy::default();
        assert_eq!(policy.max_threads, None);
        assert!(!policy.install_global_thread_pool().unwrap());

        let policy = policy.with_max_threads(Some(2));
        assert_eq!(policy.max_threads, Some(2));
    }

    #[test]
    fn threshold_strategy_roundtrips_through_serde() {
        let fixed: ThresholdStrategy = serde_json::from_str(
            r#"{"strategy":"fixed","value":128}"#,
        )
        .unwrap();
        assert_eq!(fixed, ThresholdStrategy::Fixed(128));

        let adaptive: ThresholdStrategy = serde_json::from_str(
            r#"{"strategy":"adaptive","value":{"window":31,"bias":7}}"#,
        )
        .unwrap();
        assert_eq!(
            adaptive,
            ThresholdStrategy::Adaptive {
                window: 31,
                bias: 7
            }
        );
    }
}
