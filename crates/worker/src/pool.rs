//! Worker pool
//!
//! N worker tasks share one job store. Each worker drains claimable jobs,
//! sleeps on the store's notifier with a poll-interval fallback (backoff
//! timestamps become claimable without a notification), and exits on the
//! shutdown signal. Retry delays are exponential with full jitter,
//! capped by configuration.

use crate::classify::{classify, FailureKind};
use crate::pipeline::AnalysisPipeline;
use rand::Rng;
use resumatch_common::config::WorkerConfig;
use resumatch_common::metrics;
use resumatch_common::models::AnalysisJob;
use resumatch_common::store::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    store: Arc<dyn JobStore>,
}

impl WorkerPool {
    /// Spawn the configured number of worker tasks
    pub fn spawn(
        store: Arc<dyn JobStore>,
        pipeline: Arc<AnalysisPipeline>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(config.count);

        for worker_id in 0..config.count {
            let store = store.clone();
            let pipeline = pipeline.clone();
            let config = config.clone();
            let shutdown_rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, store, pipeline, config, shutdown_rx).await;
            }));
        }

        info!(workers = config.count, "Worker pool started");
        Self {
            handles,
            shutdown_tx,
            store,
        }
    }

    /// Signal shutdown and wait for all workers to finish their current
    /// job and exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.store.notifier().notify_waiters();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked during shutdown");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    store: Arc<dyn JobStore>,
    pipeline: Arc<AnalysisPipeline>,
    config: WorkerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(worker_id, "Worker started");
    let notify = store.notifier();
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match store.claim_next().await {
            Ok(Some(job)) => {
                run_job(&store, &pipeline, &config, job).await;
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                error!(worker_id, error = %e, "Claim failed");
            }
        }

        tokio::select! {
            _ = notify.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    }

    info!(worker_id, "Worker stopped");
}

async fn run_job(
    store: &Arc<dyn JobStore>,
    pipeline: &Arc<AnalysisPipeline>,
    config: &WorkerConfig,
    job: AnalysisJob,
) {
    let started = std::time::Instant::now();

    match pipeline.process(&job).await {
        Ok(report) => {
            if let Err(e) = store.complete(job.id, report).await {
                error!(job_id = %job.id, error = %e, "Failed to persist result");
                return;
            }
            metrics::record_job_succeeded(started.elapsed().as_secs_f64());
        }
        Err(pipeline_error) => match classify(&pipeline_error) {
            FailureKind::Cancelled => {
                if let Err(e) = store.mark_cancelled(job.id).await {
                    error!(job_id = %job.id, error = %e, "Failed to record cancellation");
                    return;
                }
                metrics::record_job_cancelled();
            }
            FailureKind::Retryable(classified) => {
                let delay = retry_delay(config, job.attempt_count);
                warn!(
                    job_id = %job.id,
                    attempt = job.attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %classified.message,
                    "Job attempt failed"
                );
                if let Err(e) = store.fail(job.id, classified, true, Some(delay)).await {
                    error!(job_id = %job.id, error = %e, "Failed to record retryable failure");
                    return;
                }
                if job.attempt_count < config.max_attempts {
                    metrics::record_job_retry();
                } else {
                    metrics::record_job_failed();
                }
            }
            FailureKind::Fatal(classified) => {
                warn!(
                    job_id = %job.id,
                    error = %classified.message,
                    "Job failed permanently"
                );
                if let Err(e) = store.fail(job.id, classified, false, None).await {
                    error!(job_id = %job.id, error = %e, "Failed to record fatal failure");
                    return;
                }
                metrics::record_job_failed();
            }
        },
    }
}

/// Exponential backoff with full jitter: delay for attempt n is drawn
/// from [base * 2^(n-1) / 2, base * 2^(n-1)], capped
fn retry_delay(config: &WorkerConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let raw = config
        .retry_base_ms
        .saturating_mul(1u64 << exponent)
        .min(config.retry_cap_ms);
    let low = (raw / 2).max(1);
    let jittered = rand::thread_rng().gen_range(low..=raw.max(1));
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use resumatch_common::config::RagConfig;
    use resumatch_common::embeddings::{FallbackEmbedder, MockEmbedder};
    use resumatch_common::errors::{AppError, Result};
    use resumatch_common::models::{AnalysisPayload, AnalysisReport, JobState};
    use resumatch_common::scorer::{MockScorer, ScoreRequest, Scorer};
    use resumatch_common::store::MemoryJobStore;
    use resumatch_rag::IndexPool;

    const RESUME: &str = "EXPERIENCE\nBuilt Rust services with Postgres and Kubernetes for four years, owning deployment and on-call.\n";
    const JOB: &str = "Hiring a Rust engineer with Kubernetes experience.";

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            count: 2,
            max_attempts: 3,
            retry_base_ms: 1,
            retry_cap_ms: 4,
            poll_interval_ms: 10,
        }
    }

    fn build_pipeline(store: Arc<MemoryJobStore>, scorer: Arc<dyn Scorer>) -> Arc<AnalysisPipeline> {
        Arc::new(AnalysisPipeline::new(
            store,
            Arc::new(FallbackEmbedder::new(Arc::new(MockEmbedder::new(32)))),
            scorer,
            Arc::new(IndexPool::new(4)),
            RagConfig {
                chunk_size: 60,
                chunk_overlap: 12,
                top_k: 3,
                max_context_length: 400,
                index_capacity: 4,
            },
        ))
    }

    async fn wait_for_state(store: &MemoryJobStore, id: uuid::Uuid, state: JobState) -> AnalysisJob {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = store.get(id).await.unwrap().unwrap();
                if job.state == state {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not reach expected state")
    }

    #[tokio::test]
    async fn test_pool_processes_job_to_success() {
        let store = Arc::new(MemoryJobStore::new(3));
        let pipeline = build_pipeline(store.clone(), Arc::new(MockScorer::new()));
        let pool = WorkerPool::spawn(store.clone(), pipeline, test_config());

        let out = store
            .submit(
                "fp-success".into(),
                AnalysisPayload {
                    resume_text: RESUME.into(),
                    job_text: JOB.into(),
                },
            )
            .await
            .unwrap();

        let job = wait_for_state(&store, out.job.id, JobState::Succeeded).await;
        assert!(job.result.is_some());
        assert!(job.error.is_none());
        pool.shutdown().await;
    }

    struct AlwaysFailingScorer;

    #[async_trait]
    impl Scorer for AlwaysFailingScorer {
        async fn score(&self, _request: &ScoreRequest) -> Result<AnalysisReport> {
            Err(AppError::ExternalService {
                service: "scorer".into(),
                message: "persistent outage".into(),
            })
        }

        fn model_name(&self) -> &str {
            "always-failing"
        }
    }

    #[tokio::test]
    async fn test_retryable_failure_exhausts_attempts() {
        let store = Arc::new(MemoryJobStore::new(3));
        let pipeline = build_pipeline(store.clone(), Arc::new(AlwaysFailingScorer));
        let pool = WorkerPool::spawn(store.clone(), pipeline, test_config());

        let out = store
            .submit(
                "fp-retry".into(),
                AnalysisPayload {
                    resume_text: RESUME.into(),
                    job_text: JOB.into(),
                },
            )
            .await
            .unwrap();

        let job = wait_for_state(&store, out.job.id, JobState::Failed).await;
        assert_eq!(job.attempt_count, 3);
        assert!(job.error.is_some());
        assert!(job.result.is_none());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_fatal_failure_single_attempt() {
        let store = Arc::new(MemoryJobStore::new(3));
        let pipeline = build_pipeline(store.clone(), Arc::new(MockScorer::new()));
        let pool = WorkerPool::spawn(store.clone(), pipeline, test_config());

        let out = store
            .submit(
                "fp-fatal".into(),
                AnalysisPayload {
                    resume_text: "   ".into(),
                    job_text: JOB.into(),
                },
            )
            .await
            .unwrap();

        let job = wait_for_state(&store, out.job.id, JobState::Failed).await;
        assert_eq!(job.attempt_count, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_graceful() {
        let store = Arc::new(MemoryJobStore::new(3));
        let pipeline = build_pipeline(store.clone(), Arc::new(MockScorer::new()));
        let pool = WorkerPool::spawn(store.clone(), pipeline, test_config());

        // Shutdown with idle workers returns promptly
        tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("shutdown timed out");
    }

    #[test]
    fn test_retry_delay_capped() {
        let config = WorkerConfig {
            count: 1,
            max_attempts: 10,
            retry_base_ms: 500,
            retry_cap_ms: 2_000,
            poll_interval_ms: 100,
        };
        for attempt in 1..=10 {
            let delay = retry_delay(&config, attempt);
            assert!(delay.as_millis() as u64 <= config.retry_cap_ms);
            assert!(delay.as_millis() > 0);
        }
    }

    #[test]
    fn test_retry_delay_grows() {
        let config = WorkerConfig {
            count: 1,
            max_attempts: 10,
            retry_base_ms: 1_000,
            retry_cap_ms: 60_000,
            poll_interval_ms: 100,
        };
        // Minimum possible delay for attempt 3 exceeds the maximum for
        // attempt 1
        let later = retry_delay(&config, 3);
        assert!(later.as_millis() as u64 >= 2_000);
        let early = retry_delay(&config, 1);
        assert!(early.as_millis() as u64 <= 1_000);
    }
}
