//! Admission control and bounded-concurrency request scheduling.
//!
//! A fixed pool of worker tasks drains a bounded FIFO queue. Submission is
//! the only caller-facing operation and it never blocks on capacity: a full
//! queue rejects the request immediately with
//! [`ExtractError::Backpressure`]. Each request moves through
//! `Queued → Running → {Completed, Failed, TimedOut, Cancelled}`; the
//! per-request timeout starts at the `Running` transition and cancels the
//! in-flight engine call by dropping its future.
//!
//! The queue and the aggregate counters are the only shared mutable state;
//! every request's data is owned by exactly one worker at a time.

use crate::core::config::{PipelineConfig, ServiceLimits};
use crate::core::errors::ExtractError;
use crate::pipeline::raster::RawImage;
use crate::pipeline::result::ExtractionResult;
use crate::pipeline::Pipeline;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Retry hint returned with backpressure rejections.
const DEFAULT_RETRY_AFTER_MS: u64 = 1_000;

/// Lifecycle of a submitted request. Terminal states are logged with the
/// request id; callers observe them through the submit result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Accepted and waiting for a worker slot.
    Queued,
    /// A worker is executing the pipeline.
    Running,
    /// The pipeline produced an [`ExtractionResult`].
    Completed,
    /// A pipeline stage failed.
    Failed,
    /// The per-request budget elapsed; the engine call was cancelled.
    TimedOut,
    /// The service shut down before a worker produced a result.
    Cancelled,
}

struct Job {
    id: u64,
    raw: RawImage,
    config: PipelineConfig,
    reply: oneshot::Sender<Result<ExtractionResult, ExtractError>>,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time view of the coordinator's aggregate counters, the only
/// state that outlives individual requests.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorSnapshot {
    /// Requests accepted into the queue.
    pub submitted: u64,
    /// Requests that produced a result.
    pub completed: u64,
    /// Requests that failed in a pipeline stage.
    pub failed: u64,
    /// Requests cancelled by their timeout.
    pub timed_out: u64,
    /// Submissions rejected at admission.
    pub rejected: u64,
    /// Configured queue depth.
    pub queue_depth: usize,
    /// Configured worker count.
    pub workers: usize,
}

/// The concurrency core: accepts extraction requests, bounds in-flight work,
/// applies per-request timeouts, and returns results or typed failures.
pub struct RequestCoordinator {
    queue: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    draining: Arc<AtomicBool>,
    next_id: AtomicU64,
    queue_depth: usize,
    worker_count: usize,
}

impl RequestCoordinator {
    /// Starts the worker pool around a shared pipeline.
    pub fn new(pipeline: Arc<Pipeline>, limits: &ServiceLimits) -> Self {
        let worker_count = limits.effective_workers().max(1);
        let queue_depth = limits.queue_depth.max(1);

        let (tx, rx) = mpsc::channel::<Job>(queue_depth);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let workers = (0..worker_count)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let pipeline = Arc::clone(&pipeline);
                let counters = Arc::clone(&counters);
                tokio::spawn(worker_loop(worker, rx, pipeline, counters))
            })
            .collect();

        info!(workers = worker_count, queue_depth, "coordinator started");

        Self {
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            counters,
            draining: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(0),
            queue_depth,
            worker_count,
        }
    }

    /// Submits a request and waits for its terminal state.
    ///
    /// Returns immediately with [`ExtractError::Backpressure`] when the
    /// queue is full or the service is draining; otherwise resolves when a
    /// worker finishes the request.
    pub async fn submit(
        &self,
        raw: RawImage,
        config: PipelineConfig,
    ) -> Result<ExtractionResult, ExtractError> {
        if self.draining.load(Ordering::Acquire) {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(ExtractError::Backpressure {
                retry_after_ms: DEFAULT_RETRY_AFTER_MS,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, result) = oneshot::channel();
        let job = Job {
            id,
            raw,
            config,
            reply,
        };

        {
            let queue = self.queue.lock().expect("queue lock poisoned");
            let Some(tx) = queue.as_ref() else {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(ExtractError::Cancelled);
            };
            match tx.try_send(job) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(ExtractError::Backpressure {
                        retry_after_ms: DEFAULT_RETRY_AFTER_MS,
                    });
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(ExtractError::Cancelled);
                }
            }
        }

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(request = id, state = ?RequestState::Queued, "request accepted");

        match result.await {
            Ok(outcome) => outcome,
            // The worker never delivered: either the pool is draining or the
            // worker task was lost mid-request.
            Err(_) => {
                debug!(request = id, state = ?RequestState::Cancelled, "request cancelled");
                Err(ExtractError::Cancelled)
            }
        }
    }

    /// Aggregate counters.
    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            queue_depth: self.queue_depth,
            workers: self.worker_count,
        }
    }

    /// Drains and stops the worker pool.
    ///
    /// New submissions are rejected from this point on; requests already
    /// accepted (queued or running) are finished, then the workers exit.
    pub async fn shutdown(&self) {
        self.draining.store(true, Ordering::Release);
        // Dropping the sender closes the queue once in-flight jobs drain.
        let sender = self.queue.lock().expect("queue lock poisoned").take();
        drop(sender);

        let workers = std::mem::take(&mut *self.workers.lock().expect("worker lock poisoned"));
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "worker task panicked during drain");
            }
        }
        info!("coordinator drained");
    }
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("queue_depth", &self.queue_depth)
            .field("workers", &self.worker_count)
            .field("draining", &self.draining.load(Ordering::Relaxed))
            .finish()
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    pipeline: Arc<Pipeline>,
    counters: Arc<Counters>,
) {
    loop {
        // Hold the receiver lock only while dequeueing so other workers can
        // pick up jobs concurrently; FIFO order comes from the channel.
        let job = { rx.lock().await.recv().await };
        let Some(Job {
            id,
            raw,
            config,
            reply,
        }) = job
        else {
            debug!(worker, "queue closed, worker exiting");
            return;
        };

        debug!(worker, request = id, state = ?RequestState::Running, "request started");
        let timeout = config.timeout();
        let outcome = tokio::time::timeout(timeout, pipeline.extract(raw, &config)).await;

        let (state, result) = match outcome {
            Ok(Ok(result)) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                (RequestState::Completed, Ok(result))
            }
            Ok(Err(err)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                (RequestState::Failed, Err(err))
            }
            Err(_elapsed) => {
                // Dropping the extract future cancels the engine call; no
                // partial result survives.
                counters.timed_out.fetch_add(1, Ordering::Relaxed);
                (
                    RequestState::TimedOut,
                    Err(ExtractError::TimedOut {
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                )
            }
        };

        debug!(worker, request = id, state = ?state, "request finished");
        // The caller may have gone away; that's not the worker's problem.
        let _ = reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ExtractError;
    use crate::pipeline::engine::RecognitionEngine;
    use crate::pipeline::raster::PreprocessedRaster;
    use crate::pipeline::result::{RecognitionSpan, SpanRegion};
    use async_trait::async_trait;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::time::{Duration, Instant};

    fn text_page_png() -> Vec<u8> {
        let img = RgbImage::from_fn(60, 40, |_, y| {
            if y % 10 < 2 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        });
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("encode png");
        buf
    }

    fn raw() -> RawImage {
        RawImage::new(text_page_png(), None)
    }

    #[derive(Debug)]
    struct InstantEngine;

    #[async_trait]
    impl RecognitionEngine for InstantEngine {
        fn name(&self) -> &'static str {
            "instant"
        }

        fn supports_language(&self, _language: &str) -> bool {
            true
        }

        async fn recognize(
            &self,
            _raster: &PreprocessedRaster,
            _language: &str,
        ) -> Result<Vec<RecognitionSpan>, ExtractError> {
            Ok(vec![RecognitionSpan::new(
                SpanRegion::new(0.0, 0.0, 20.0, 10.0),
                "ok",
                0.9,
            )])
        }
    }

    /// Engine whose calls never return; cancelled only by being dropped.
    #[derive(Debug)]
    struct NeverEngine;

    #[async_trait]
    impl RecognitionEngine for NeverEngine {
        fn name(&self) -> &'static str {
            "never"
        }

        fn supports_language(&self, _language: &str) -> bool {
            true
        }

        async fn recognize(
            &self,
            _raster: &PreprocessedRaster,
            _language: &str,
        ) -> Result<Vec<RecognitionSpan>, ExtractError> {
            std::future::pending().await
        }
    }

    fn coordinator(
        engine: Arc<dyn RecognitionEngine>,
        workers: usize,
        queue_depth: usize,
    ) -> Arc<RequestCoordinator> {
        let limits = ServiceLimits::default()
            .with_workers(workers)
            .with_queue_depth(queue_depth);
        let pipeline = Arc::new(Pipeline::new(engine, limits.clone()));
        Arc::new(RequestCoordinator::new(pipeline, &limits))
    }

    #[tokio::test]
    async fn completed_request_returns_result() {
        let coordinator = coordinator(Arc::new(InstantEngine), 2, 4);
        let result = coordinator
            .submit(raw(), PipelineConfig::default())
            .await
            .unwrap();
        assert_eq!(result.full_text(), "ok");
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.submitted, 1);
        assert_eq!(snapshot.completed, 1);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn full_queue_rejects_immediately_with_backpressure() {
        // One worker, queue depth one. The first request occupies the
        // worker forever, the second fills the queue, the third must be
        // rejected without waiting.
        let coordinator = coordinator(Arc::new(NeverEngine), 1, 1);

        let c1 = Arc::clone(&coordinator);
        tokio::spawn(async move {
            let _ = c1
                .submit(raw(), PipelineConfig::default().with_timeout_ms(60_000))
                .await;
        });
        // Let the worker dequeue the first request.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let c2 = Arc::clone(&coordinator);
        tokio::spawn(async move {
            let _ = c2
                .submit(raw(), PipelineConfig::default().with_timeout_ms(60_000))
                .await;
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let err = coordinator
            .submit(raw(), PipelineConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Backpressure { .. }));
        // Fast rejection is the contract; nothing to wait on.
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(coordinator.snapshot().rejected, 1);
    }

    #[tokio::test]
    async fn hung_engine_call_times_out_at_the_configured_budget() {
        let coordinator = coordinator(Arc::new(NeverEngine), 1, 4);
        let started = Instant::now();
        let err = coordinator
            .submit(raw(), PipelineConfig::default().with_timeout_ms(300))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        match err {
            ExtractError::TimedOut { timeout_ms } => assert_eq!(timeout_ms, 300),
            other => panic!("expected TimedOut, got {other:?}"),
        }
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(5), "timeout fired late");
        assert_eq!(coordinator.snapshot().timed_out, 1);
        // Worker is free again after the cancellation.
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_requests_all_complete() {
        let coordinator = coordinator(Arc::new(InstantEngine), 2, 8);
        let mut handles = Vec::new();
        for _ in 0..6 {
            let c = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                c.submit(raw(), PipelineConfig::default()).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.completed, 6);
        assert_eq!(snapshot.rejected, 0);
        coordinator.shutdown().await;
    }

    /// Engine whose worker dies mid-request, dropping the reply channel.
    #[derive(Debug)]
    struct CrashingEngine;

    #[async_trait]
    impl RecognitionEngine for CrashingEngine {
        fn name(&self) -> &'static str {
            "crashing"
        }

        fn supports_language(&self, _language: &str) -> bool {
            true
        }

        async fn recognize(
            &self,
            _raster: &PreprocessedRaster,
            _language: &str,
        ) -> Result<Vec<RecognitionSpan>, ExtractError> {
            panic!("engine took the worker down");
        }
    }

    #[tokio::test]
    async fn lost_worker_surfaces_as_cancelled() {
        let coordinator = coordinator(Arc::new(CrashingEngine), 1, 2);
        let err = coordinator
            .submit(raw(), PipelineConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Cancelled));
    }

    #[tokio::test]
    async fn shutdown_rejects_new_submissions() {
        let coordinator = coordinator(Arc::new(InstantEngine), 1, 2);
        coordinator.shutdown().await;
        let err = coordinator
            .submit(raw(), PipelineConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Backpressure { .. }));
    }

    #[tokio::test]
    async fn pipeline_failures_are_counted_and_surfaced() {
        let coordinator = coordinator(Arc::new(InstantEngine), 1, 2);
        let err = coordinator
            .submit(
                RawImage::new(b"garbage".to_vec(), None),
                PipelineConfig::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidImage { .. }));
        assert_eq!(coordinator.snapshot().failed, 1);
        coordinator.shutdown().await;
    }
}
