//! Job store and state machine
//!
//! Durable record of each analysis job's lifecycle, keyed by content
//! fingerprint for idempotency. The `JobStore` trait is the persistence
//! collaborator seam; `MemoryJobStore` implements it in-process with a
//! single mutex, which makes `claim_next` an atomic conditional state
//! transition (no two workers can claim the same job).

use crate::errors::{AppError, Result};
use crate::models::{AnalysisJob, AnalysisPayload, AnalysisReport, ClassifiedError, JobState};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};
use uuid::Uuid;

/// Outcome of a submission: the job plus whether it was newly created
#[derive(Clone, Debug)]
pub struct SubmitOutcome {
    pub job: AnalysisJob,
    pub created: bool,
}

/// Persistence collaborator for analysis jobs.
///
/// `claim_next` is the sole Pending -> Running transition and must be
/// exclusive per job. All other operations act on a single record.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Submit a job, idempotent on fingerprint. While a job with this
    /// fingerprint is Pending, Running, or Succeeded the existing job is
    /// returned. A Failed job is resubmitted in place (back to Pending)
    /// until the overall resubmission budget is spent; a Cancelled job
    /// starts a fresh attempt cycle.
    async fn submit(&self, fingerprint: String, payload: AnalysisPayload)
        -> Result<SubmitOutcome>;

    /// Claim the oldest claimable Pending job, moving it to Running and
    /// incrementing its attempt count. Returns None when nothing is
    /// claimable.
    async fn claim_next(&self) -> Result<Option<AnalysisJob>>;

    /// Persist a successful result. Rejected unless the job is Running.
    /// If a cancel was requested in the meantime the job becomes
    /// Cancelled and the result is discarded: a job may never be both
    /// Cancelled and holding a Succeeded result.
    async fn complete(&self, job_id: Uuid, result: AnalysisReport) -> Result<()>;

    /// Record a classified failure. With `retryable` and attempts
    /// remaining the job returns to Pending with a backoff-eligible
    /// timestamp; otherwise it transitions to Failed.
    async fn fail(
        &self,
        job_id: Uuid,
        error: ClassifiedError,
        retryable: bool,
        retry_delay: Option<Duration>,
    ) -> Result<()>;

    /// Request cancellation. A Pending job becomes Cancelled immediately;
    /// a Running job gets its cancel flag set for the orchestrator's next
    /// checkpoint. Terminal jobs are rejected with Conflict.
    async fn cancel(&self, job_id: Uuid) -> Result<AnalysisJob>;

    /// Transition a Running job whose cancel flag was observed to
    /// Cancelled. No result or error payload is persisted.
    async fn mark_cancelled(&self, job_id: Uuid) -> Result<()>;

    async fn get(&self, job_id: Uuid) -> Result<Option<AnalysisJob>>;

    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<Option<AnalysisJob>>;

    /// Most recent jobs first, bounded by `limit`
    async fn list_recent(&self, limit: usize) -> Result<Vec<AnalysisJob>>;

    /// Notifier pinged whenever a job becomes claimable
    fn notifier(&self) -> Arc<Notify>;
}

struct StoreInner {
    jobs: HashMap<Uuid, AnalysisJob>,
    by_fingerprint: HashMap<String, Uuid>,
    /// Insertion order, oldest first; drives claim fairness and listing
    order: Vec<Uuid>,
}

/// In-memory job store
pub struct MemoryJobStore {
    inner: Mutex<StoreInner>,
    notify: Arc<Notify>,
    max_attempts: u32,
}

impl MemoryJobStore {
    /// `max_attempts` bounds execution attempts per cycle; the overall
    /// resubmission budget for Failed jobs is twice that.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                jobs: HashMap::new(),
                by_fingerprint: HashMap::new(),
                order: Vec::new(),
            }),
            notify: Arc::new(Notify::new()),
            max_attempts,
        }
    }

    fn resubmit_budget(&self) -> u32 {
        self.max_attempts * 2
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn submit(
        &self,
        fingerprint: String,
        payload: AnalysisPayload,
    ) -> Result<SubmitOutcome> {
        let mut inner = self.inner.lock().await;

        if let Some(&id) = inner.by_fingerprint.get(&fingerprint) {
            let job = inner
                .jobs
                .get_mut(&id)
                .ok_or_else(|| AppError::Internal {
                    message: format!("fingerprint index points at missing job {id}"),
                })?;

            match job.state {
                // Idempotent replay
                JobState::Pending | JobState::Running | JobState::Succeeded => {
                    debug!(job_id = %job.id, state = %job.state, "Submission matched existing job");
                    return Ok(SubmitOutcome {
                        job: job.clone(),
                        created: false,
                    });
                }
                // Explicit resubmission: same record, new attempt
                JobState::Failed => {
                    if job.attempt_count >= self.resubmit_budget() {
                        return Err(AppError::RetriesExhausted {
                            fingerprint,
                            attempts: job.attempt_count,
                        });
                    }
                    job.state = JobState::Pending;
                    job.error = None;
                    job.next_retry_at = None;
                    job.completed_at = None;
                    job.updated_at = Utc::now();
                    info!(job_id = %job.id, attempts = job.attempt_count, "Failed job resubmitted");
                    let out = SubmitOutcome {
                        job: job.clone(),
                        created: false,
                    };
                    drop(inner);
                    self.notify.notify_one();
                    return Ok(out);
                }
                // Cancellation is not a failure: fresh cycle
                JobState::Cancelled => {
                    job.state = JobState::Pending;
                    job.attempt_count = 0;
                    job.cancel_requested = false;
                    job.error = None;
                    job.result = None;
                    job.next_retry_at = None;
                    job.started_at = None;
                    job.completed_at = None;
                    job.updated_at = Utc::now();
                    let out = SubmitOutcome {
                        job: job.clone(),
                        created: false,
                    };
                    drop(inner);
                    self.notify.notify_one();
                    return Ok(out);
                }
            }
        }

        let job = AnalysisJob::new(fingerprint.clone(), payload);
        let id = job.id;
        inner.by_fingerprint.insert(fingerprint, id);
        inner.order.push(id);
        inner.jobs.insert(id, job.clone());
        info!(job_id = %id, "Analysis job created");
        drop(inner);
        self.notify.notify_one();

        Ok(SubmitOutcome { job, created: true })
    }

    async fn claim_next(&self) -> Result<Option<AnalysisJob>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let claim_id = inner
            .order
            .iter()
            .find(|&id| {
                inner
                    .jobs
                    .get(id)
                    .map(|j| j.is_claimable(now))
                    .unwrap_or(false)
            })
            .copied();

        let Some(id) = claim_id else {
            return Ok(None);
        };

        let job = inner.jobs.get_mut(&id).ok_or_else(|| AppError::Internal {
            message: format!("claim scan found missing job {id}"),
        })?;
        job.state = JobState::Running;
        job.attempt_count += 1;
        job.started_at = Some(now);
        job.updated_at = now;
        debug!(job_id = %id, attempt = job.attempt_count, "Job claimed");

        Ok(Some(job.clone()))
    }

    async fn complete(&self, job_id: Uuid, result: AnalysisReport) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::JobNotFound {
                id: job_id.to_string(),
            })?;

        if job.state != JobState::Running {
            return Err(AppError::Conflict {
                message: format!("cannot complete job in state {}", job.state),
            });
        }

        let now = Utc::now();
        if job.cancel_requested {
            // The cancel won the race; the computed result is dropped
            job.state = JobState::Cancelled;
            job.completed_at = Some(now);
            job.updated_at = now;
            info!(job_id = %job_id, "Cancel observed at completion, result discarded");
            return Ok(());
        }

        job.state = JobState::Succeeded;
        job.result = Some(result);
        job.completed_at = Some(now);
        job.updated_at = now;
        info!(job_id = %job_id, "Job succeeded");
        Ok(())
    }

    async fn fail(
        &self,
        job_id: Uuid,
        error: ClassifiedError,
        retryable: bool,
        retry_delay: Option<Duration>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::JobNotFound {
                id: job_id.to_string(),
            })?;

        if job.state != JobState::Running {
            return Err(AppError::Conflict {
                message: format!("cannot fail job in state {}", job.state),
            });
        }

        let now = Utc::now();
        job.updated_at = now;

        if job.cancel_requested {
            job.state = JobState::Cancelled;
            job.completed_at = Some(now);
            info!(job_id = %job_id, "Cancel observed at failure, job cancelled");
            return Ok(());
        }

        if retryable && job.attempt_count < self.max_attempts {
            let delay = retry_delay.unwrap_or(Duration::ZERO);
            job.state = JobState::Pending;
            job.next_retry_at = Some(
                now + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::zero()),
            );
            info!(
                job_id = %job_id,
                attempt = job.attempt_count,
                delay_ms = delay.as_millis() as u64,
                error = %error.message,
                "Retryable failure, job re-queued"
            );
            drop(inner);
            self.notify.notify_one();
            return Ok(());
        }

        job.state = JobState::Failed;
        job.completed_at = Some(now);
        job.error = Some(error.clone());
        info!(
            job_id = %job_id,
            attempts = job.attempt_count,
            kind = ?error.kind,
            "Job failed"
        );
        Ok(())
    }

    async fn cancel(&self, job_id: Uuid) -> Result<AnalysisJob> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::JobNotFound {
                id: job_id.to_string(),
            })?;

        match job.state {
            JobState::Pending => {
                let now = Utc::now();
                job.state = JobState::Cancelled;
                job.completed_at = Some(now);
                job.updated_at = now;
                info!(job_id = %job_id, "Pending job cancelled");
            }
            JobState::Running => {
                // Cooperative: the orchestrator observes this at its next
                // checkpoint; in-flight external calls are not killed.
                job.cancel_requested = true;
                job.updated_at = Utc::now();
                info!(job_id = %job_id, "Cancel requested for running job");
            }
            state => {
                return Err(AppError::Conflict {
                    message: format!("cannot cancel job in terminal state {state}"),
                });
            }
        }

        Ok(job.clone())
    }

    async fn mark_cancelled(&self, job_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::JobNotFound {
                id: job_id.to_string(),
            })?;

        if job.state != JobState::Running {
            return Err(AppError::Conflict {
                message: format!("cannot mark-cancel job in state {}", job.state),
            });
        }

        let now = Utc::now();
        job.state = JobState::Cancelled;
        job.completed_at = Some(now);
        job.updated_at = now;
        info!(job_id = %job_id, "Job cancelled at checkpoint");
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<AnalysisJob>> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&job_id).cloned())
    }

    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<Option<AnalysisJob>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_fingerprint
            .get(fingerprint)
            .and_then(|id| inner.jobs.get(id))
            .cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<AnalysisJob>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| inner.jobs.get(id))
            .cloned()
            .collect())
    }

    fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    fn payload() -> AnalysisPayload {
        AnalysisPayload {
            resume_text: "Rust engineer, five years".into(),
            job_text: "Senior Rust engineer wanted".into(),
        }
    }

    fn transient() -> ClassifiedError {
        ClassifiedError {
            kind: ErrorCode::ExternalServiceError,
            message: "scorer timeout".into(),
        }
    }

    #[tokio::test]
    async fn test_submit_is_idempotent() {
        let store = MemoryJobStore::new(3);
        let a = store.submit("fp".into(), payload()).await.unwrap();
        let b = store.submit("fp".into(), payload()).await.unwrap();
        assert!(a.created);
        assert!(!b.created);
        assert_eq!(a.job.id, b.job.id);
    }

    #[tokio::test]
    async fn test_concurrent_submit_creates_one_job() {
        let store = Arc::new(MemoryJobStore::new(3));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.submit("fp".into(), payload()).await.unwrap()
            }));
        }
        let mut created = 0;
        let mut ids = std::collections::HashSet::new();
        for h in handles {
            let out = h.await.unwrap();
            if out.created {
                created += 1;
            }
            ids.insert(out.job.id);
        }
        assert_eq!(created, 1);
        assert_eq!(ids.len(), 1);
        assert_eq!(store.list_recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryJobStore::new(3);
        store.submit("fp".into(), payload()).await.unwrap();

        let first = store.claim_next().await.unwrap();
        let second = store.claim_next().await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(first.unwrap().state, JobState::Running);
    }

    #[tokio::test]
    async fn test_retry_bound_exact() {
        let max_attempts = 3;
        let store = MemoryJobStore::new(max_attempts);
        store.submit("fp".into(), payload()).await.unwrap();

        let mut attempts = 0;
        loop {
            let Some(job) = store.claim_next().await.unwrap() else {
                break;
            };
            attempts += 1;
            store
                .fail(job.id, transient(), true, Some(Duration::ZERO))
                .await
                .unwrap();
        }

        assert_eq!(attempts, max_attempts);
        let job = store.get_by_fingerprint("fp").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt_count, max_attempts);
        assert!(job.error.is_some());
    }

    #[tokio::test]
    async fn test_fatal_failure_skips_retries() {
        let store = MemoryJobStore::new(3);
        store.submit("fp".into(), payload()).await.unwrap();

        let job = store.claim_next().await.unwrap().unwrap();
        store
            .fail(
                job.id,
                ClassifiedError {
                    kind: ErrorCode::ValidationError,
                    message: "empty input".into(),
                },
                false,
                None,
            )
            .await
            .unwrap();

        let job = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_cancel_pending() {
        let store = MemoryJobStore::new(3);
        let out = store.submit("fp".into(), payload()).await.unwrap();
        store.cancel(out.job.id).await.unwrap();

        let job = store.get(out.job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_running_sets_flag() {
        let store = MemoryJobStore::new(3);
        store.submit("fp".into(), payload()).await.unwrap();
        let job = store.claim_next().await.unwrap().unwrap();

        let cancelled = store.cancel(job.id).await.unwrap();
        assert_eq!(cancelled.state, JobState::Running);
        assert!(cancelled.cancel_requested);
    }

    #[tokio::test]
    async fn test_cancel_terminal_conflicts() {
        let store = MemoryJobStore::new(3);
        store.submit("fp".into(), payload()).await.unwrap();
        let job = store.claim_next().await.unwrap().unwrap();
        store
            .complete(job.id, AnalysisReport::default())
            .await
            .unwrap();

        assert!(matches!(
            store.cancel(job.id).await,
            Err(AppError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_race_never_yields_cancelled_with_result() {
        let store = MemoryJobStore::new(3);
        store.submit("fp".into(), payload()).await.unwrap();
        let job = store.claim_next().await.unwrap().unwrap();

        // Cancel lands after claim but before completion
        store.cancel(job.id).await.unwrap();
        store
            .complete(job.id, AnalysisReport::default())
            .await
            .unwrap();

        let job = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_failed_job_resubmits_in_place() {
        let store = MemoryJobStore::new(1);
        store.submit("fp".into(), payload()).await.unwrap();
        let job = store.claim_next().await.unwrap().unwrap();
        store
            .fail(job.id, transient(), true, Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(
            store.get(job.id).await.unwrap().unwrap().state,
            JobState::Failed
        );

        let out = store.submit("fp".into(), payload()).await.unwrap();
        assert!(!out.created);
        assert_eq!(out.job.id, job.id);
        assert_eq!(out.job.state, JobState::Pending);

        // Budget: one more cycle, then resubmission is refused
        let job = store.claim_next().await.unwrap().unwrap();
        store
            .fail(job.id, transient(), true, Some(Duration::ZERO))
            .await
            .unwrap();
        assert!(matches!(
            store.submit("fp".into(), payload()).await,
            Err(AppError::RetriesExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_backoff_delays_claim() {
        let store = MemoryJobStore::new(3);
        store.submit("fp".into(), payload()).await.unwrap();
        let job = store.claim_next().await.unwrap().unwrap();
        store
            .fail(job.id, transient(), true, Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        // Pending again, but not claimable until the backoff elapses
        let job = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_recent_is_bounded_and_newest_first() {
        let store = MemoryJobStore::new(3);
        for i in 0..5 {
            store
                .submit(format!("fp-{i}"), payload())
                .await
                .unwrap();
        }
        let recent = store.list_recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].fingerprint, "fp-4");
        assert_eq!(recent[2].fingerprint, "fp-2");
    }
}
