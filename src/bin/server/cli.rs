//! CLI mode: extract text from a single image, local or remote.

use crate::config::EngineConfig;
use crate::extract::{build_engine, download_bytes, AppError, ExtractResponse};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use textgrab::pipeline::raster::RawImage;
use textgrab::{ExtractionResult, Pipeline, PipelineConfig, ServiceLimits};
use tracing::info;

/// Extracts text from an image fetched over HTTP.
pub async fn process_url(
    url: &str,
    engine: &EngineConfig,
    config: PipelineConfig,
    output_format: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();

    info!("Downloading image...");
    let (bytes, content_type) = download_bytes(url).await?;
    info!(
        "Downloaded {} bytes in {:.2}ms",
        bytes.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    let raw = RawImage::new(bytes, content_type);
    run_extract(raw, engine, config, output_format).await
}

/// Extracts text from a local image file.
pub async fn process_file(
    path: &Path,
    engine: &EngineConfig,
    config: PipelineConfig,
    output_format: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Reading image from file...");
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::FileRead(format!("{}: {e}", path.display())))?;

    // Local files carry no declared type; the decoder sniffs the format.
    let raw = RawImage::new(bytes, None);
    run_extract(raw, engine, config, output_format).await
}

async fn run_extract(
    raw: RawImage,
    engine: &EngineConfig,
    config: PipelineConfig,
    output_format: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Initializing recognition engine...");
    let engine = build_engine(engine)?;
    let pipeline = Pipeline::new(Arc::new(engine), ServiceLimits::default());

    info!("Extracting text...");
    let start = Instant::now();
    let result = pipeline.extract(raw, &config).await?;
    info!(
        "Extraction completed in {:.2}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );

    output_result(&result, output_format);
    Ok(())
}

/// Prints the extraction result in the requested format.
fn output_result(result: &ExtractionResult, format: &str) {
    match format {
        "json" => {
            let response = ExtractResponse::success(result);
            match serde_json::to_string(&response) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("Error: failed to serialize result: {e}"),
            }
        }
        "text" => {
            println!("{}", result.full_text());
        }
        _ => {
            println!("\n=== Extraction Results ===");
            println!("Confidence: {:.1}%", result.confidence * 100.0);
            println!("Duration: {}ms", result.duration.as_millis());
            println!("Lines: {}", result.text_blocks.len());
            println!();

            if result.text_blocks.is_empty() {
                println!("No text detected.");
            } else {
                println!("--- Detected Text ---");
                for (idx, block) in result.text_blocks.iter().enumerate() {
                    println!("[{}] \"{}\"", idx + 1, block.text);
                    for span in &block.spans {
                        println!(
                            "    \"{}\" ({:.1}%) at [{:.0}, {:.0}] {}x{}",
                            span.text,
                            span.confidence * 100.0,
                            span.region.x,
                            span.region.y,
                            span.region.width,
                            span.region.height
                        );
                    }
                }
                println!();
                println!("--- Full Text ---");
                println!("{}", result.full_text());
            }
        }
    }
}
