//! Textgrab Server and CLI
//!
//! A binary for image-to-text extraction via CLI or HTTP server.
//!
//! # Usage
//!
//! ## CLI Mode
//! ```bash
//! textgrab-server extract --file scan.png
//! textgrab-server extract --url "https://example.com/receipt.jpg" --language deu --output json
//! ```
//!
//! ## Server Mode
//! ```bash
//! textgrab-server serve --port 8080 --workers 4 --queue-depth 32
//! ```

mod cli;
mod config;
mod extract;
mod server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use textgrab::{ParallelPolicy, PipelineConfig, ServiceLimits};
use tracing::info;

#[derive(Parser)]
#[command(name = "textgrab-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Image-to-text extraction via CLI or HTTP server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract text from a single image via CLI
    Extract {
        /// URL of the image to process
        #[arg(long, conflicts_with = "file")]
        url: Option<String>,

        /// Local file path of the image to process
        #[arg(long, conflicts_with = "url")]
        file: Option<PathBuf>,

        /// ISO language code for the recognition profile
        #[arg(long, default_value = "eng", env = "TEXTGRAB_LANGUAGE")]
        language: String,

        /// Minimum span confidence, 0.0 to 1.0
        #[arg(long, default_value_t = 0.0)]
        min_confidence: f32,

        /// Per-request timeout in milliseconds
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,

        /// Skip skew estimation and correction
        #[arg(long)]
        no_deskew: bool,

        /// Output format (json, text, pretty)
        #[arg(long, default_value = "pretty")]
        output: String,

        /// Path to the tesseract executable
        #[arg(long, default_value = "tesseract", env = "TEXTGRAB_TESSERACT")]
        tesseract: PathBuf,
    },
    /// Start the HTTP server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0", env = "TEXTGRAB_HOST")]
        host: String,

        /// Port to listen on
        #[arg(long, short, default_value = "8080", env = "TEXTGRAB_PORT")]
        port: u16,

        /// Number of extraction workers (defaults to number of CPUs)
        #[arg(long, env = "TEXTGRAB_WORKERS")]
        workers: Option<usize>,

        /// Bounded request queue depth
        #[arg(long, default_value_t = 32, env = "TEXTGRAB_QUEUE_DEPTH")]
        queue_depth: usize,

        /// Maximum rayon threads for pixel work (defaults to rayon's pool)
        #[arg(long, env = "TEXTGRAB_MAX_THREADS")]
        max_threads: Option<usize>,

        /// Maximum accepted upload size in bytes
        #[arg(long, default_value_t = 20 * 1024 * 1024, env = "TEXTGRAB_MAX_IMAGE_BYTES")]
        max_image_bytes: u64,

        /// Maximum decoded image width or height in pixels
        #[arg(long, default_value_t = 10_000, env = "TEXTGRAB_MAX_DIMENSION")]
        max_dimension: u32,

        /// Path to the tesseract executable
        #[arg(long, default_value = "tesseract", env = "TEXTGRAB_TESSERACT")]
        tesseract: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    textgrab::utils::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            url,
            file,
            language,
            min_confidence,
            timeout_ms,
            no_deskew,
            output,
            tesseract,
        } => {
            let engine = config::EngineConfig {
                binary: tesseract,
                page_segmentation_mode: 6,
            };
            let pipeline = PipelineConfig::default()
                .with_language(language)
                .with_min_confidence(min_confidence)
                .with_timeout_ms(timeout_ms)
                .with_deskew(!no_deskew);

            if let Some(url) = url {
                info!("Processing URL: {}", url);
                cli::process_url(&url, &engine, pipeline, &output).await?;
            } else if let Some(file) = file {
                info!("Processing file: {}", file.display());
                cli::process_file(&file, &engine, pipeline, &output).await?;
            } else {
                eprintln!("Error: Either --url or --file must be provided");
                std::process::exit(1);
            }
        }
        Commands::Serve {
            host,
            port,
            workers,
            queue_depth,
            max_threads,
            max_image_bytes,
            max_dimension,
            tesseract,
        } => {
            let mut limits = ServiceLimits::default()
                .with_queue_depth(queue_depth)
                .with_max_image_bytes(max_image_bytes)
                .with_max_dimension(max_dimension);
            if let Some(workers) = workers {
                limits = limits.with_workers(workers);
            }

            let config = config::ServerConfig {
                engine: config::EngineConfig {
                    binary: tesseract,
                    page_segmentation_mode: 6,
                },
                host,
                port,
                limits,
                parallel: ParallelPolicy::default().with_max_threads(max_threads),
            };

            info!("Starting server on {}:{}", config.host, config.port);
            server::run_server(config).await?;
        }
    }

    Ok(())
}
