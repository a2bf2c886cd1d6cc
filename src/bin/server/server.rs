//! HTTP server for text extraction.

use crate::config::ServerConfig;
use crate::extract::{build_engine, ExtractResponse};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use textgrab::pipeline::raster::RawImage;
use textgrab::{
    CoordinatorSnapshot, ExtractError, Pipeline, PipelineConfig, RequestCoordinator,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
struct AppState {
    coordinator: RequestCoordinator,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    requests: CoordinatorSnapshot,
}

/// Per-request pipeline overrides, taken from the query string.
#[derive(Debug, Deserialize)]
struct ExtractParams {
    language: Option<String>,
    min_confidence: Option<f32>,
    timeout_ms: Option<u64>,
    deskew: Option<bool>,
}

impl ExtractParams {
    fn into_config(self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        if let Some(language) = self.language {
            config = config.with_language(language);
        }
        if let Some(min_confidence) = self.min_confidence {
            config = config.with_min_confidence(min_confidence);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config = config.with_timeout_ms(timeout_ms);
        }
        if let Some(deskew) = self.deskew {
            config = config.with_deskew(deskew);
        }
        config
    }
}

/// Runs the HTTP server until a shutdown signal arrives, then drains.
pub async fn run_server(
    config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Initializing recognition engine...");
    let engine = build_engine(&config.engine)?;
    info!("Recognition engine initialized");

    if config.parallel.install_global_thread_pool()? {
        info!(threads = ?config.parallel.max_threads, "rayon thread pool configured");
    }

    let pipeline = Arc::new(
        Pipeline::new(Arc::new(engine), config.limits.clone())
            .with_parallel_policy(config.parallel.clone()),
    );
    let coordinator = RequestCoordinator::new(pipeline, &config.limits);
    let state = Arc::new(AppState { coordinator });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/extract", post(extract_handler))
        .route("/api/v1/extract", post(extract_handler))
        // The pipeline enforces its own byte ceiling with a typed error;
        // axum's limit sits above it so callers over the ceiling get the
        // `image_too_large` payload, not a bare framework rejection.
        .layer(DefaultBodyLimit::max(
            (config.limits.max_image_bytes as usize).saturating_mul(2),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {e}"))?;

    info!("Server listening on http://{}", addr);
    info!("Endpoints:");
    info!("  GET  /health          - Health check and counters");
    info!("  POST /extract         - Text extraction");
    info!("  POST /api/v1/extract  - Text extraction (versioned API)");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining in-flight requests...");
    state.coordinator.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Health check endpoint.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        requests: state.coordinator.snapshot(),
    })
}

/// Text extraction endpoint. The image goes in the request body; pipeline
/// options ride the query string.
async fn extract_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExtractParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let declared_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let config = params.into_config();

    info!(
        request_id = %request_id,
        bytes = body.len(),
        language = %config.language,
        "extraction request"
    );

    let raw = RawImage::new(body.to_vec(), declared_type);
    match state.coordinator.submit(raw, config).await {
        Ok(result) => {
            info!(
                request_id = %request_id,
                lines = result.text_blocks.len(),
                confidence = result.confidence,
                duration_ms = result.duration.as_millis() as u64,
                "extraction completed"
            );
            (StatusCode::OK, Json(ExtractResponse::success(&result))).into_response()
        }
        Err(err) => {
            error!(
                request_id = %request_id,
                code = err.code(),
                error = %err,
                "extraction failed"
            );
            error_response(err)
        }
    }
}

/// Maps the error taxonomy onto HTTP statuses. Backpressure rejections get
/// a Retry-After hint so well-behaved clients back off.
fn error_response(err: ExtractError) -> Response {
    let status = match &err {
        ExtractError::InvalidImage { .. }
        | ExtractError::ImageTooLarge { .. }
        | ExtractError::UnsupportedLanguage { .. } => StatusCode::BAD_REQUEST,
        ExtractError::Backpressure { .. } | ExtractError::Cancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ExtractError::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
        ExtractError::Engine { .. } | ExtractError::Stage { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let mut response = (status, Json(ExtractResponse::error(&err))).into_response();
    if let ExtractError::Backpressure { retry_after_ms } = err {
        let seconds = retry_after_ms.div_ceil(1000).max(1);
        if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses_follow_the_api_contract() {
        // Invalid input, including an over-ceiling image, is the caller's
        // mistake: 400 with a taxonomy code.
        assert_eq!(
            error_response(ExtractError::invalid_image("truncated")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(ExtractError::ImageTooLarge {
                actual: 2,
                limit: 1,
                unit: "bytes",
            })
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(ExtractError::UnsupportedLanguage {
                language: "xx".to_string(),
            })
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(ExtractError::TimedOut { timeout_ms: 5 }).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            error_response(ExtractError::engine("fault")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn backpressure_carries_a_retry_after_hint() {
        let response = error_response(ExtractError::Backpressure {
            retry_after_ms: 1_500,
        });
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        // 1500ms rounds up to the next whole second.
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "2");
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
