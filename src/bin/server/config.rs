//! Configuration types for the extraction server and CLI.

use std::path::PathBuf;
use textgrab::{ParallelPolicy, ServiceLimits};

/// Configuration for the recognition engine subprocess.
#[derive(Clone)]
pub struct EngineConfig {
    pub binary: PathBuf,
    pub page_segmentation_mode: u8,
}

/// Configuration for the HTTP server.
#[derive(Clone)]
pub struct ServerConfig {
    pub engine: EngineConfig,
    pub host: String,
    pub port: u16,
    pub limits: ServiceLimits,
    pub parallel: ParallelPolicy,
}
