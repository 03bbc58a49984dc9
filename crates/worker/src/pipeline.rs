//! Analysis pipeline
//!
//! One job flows through chunking, embedding, retrieval, and scoring:
//! the job description is chunked and indexed, the resume drives the
//! queries, and the retrieved job-description context goes to the
//! scorer. Cancellation is cooperative: the cancel flag is observed at a
//! checkpoint before embedding and again before scoring, so an in-flight
//! external call is never killed mid-request.

use resumatch_common::config::RagConfig;
use resumatch_common::embeddings::FallbackEmbedder;
use resumatch_common::errors::{AppError, Result};
use resumatch_common::models::{AnalysisJob, AnalysisReport};
use resumatch_common::scorer::{ScoreRequest, Scorer};
use resumatch_common::store::JobStore;
use resumatch_common::text;
use resumatch_rag::{chunk_text, context_bundle, retrieve, IndexPool, VectorIndex};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

pub struct AnalysisPipeline {
    store: Arc<dyn JobStore>,
    embedder: Arc<FallbackEmbedder>,
    scorer: Arc<dyn Scorer>,
    index_pool: Arc<IndexPool>,
    rag: RagConfig,
}

impl AnalysisPipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        embedder: Arc<FallbackEmbedder>,
        scorer: Arc<dyn Scorer>,
        index_pool: Arc<IndexPool>,
        rag: RagConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            scorer,
            index_pool,
            rag,
        }
    }

    /// Run the full analysis for a claimed job
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn process(&self, job: &AnalysisJob) -> Result<AnalysisReport> {
        let resume_text = job.payload.resume_text.trim();
        let job_text = job.payload.job_text.trim();
        if resume_text.is_empty() {
            return Err(AppError::Validation {
                message: "resume text is empty".to_string(),
                field: Some("resume_text".to_string()),
            });
        }
        if job_text.is_empty() {
            return Err(AppError::Validation {
                message: "job description is empty".to_string(),
                field: Some("job_text".to_string()),
            });
        }

        self.checkpoint(job.id).await?;

        let chunks = chunk_text(
            &job.fingerprint,
            job_text,
            self.rag.chunk_size,
            self.rag.chunk_overlap,
        )?;

        // Queries: the resume itself, plus its skills as a focused
        // second query when any are recognized
        let mut query_texts = vec![resume_text.to_string()];
        let skills = text::extract_skills(resume_text);
        if !skills.is_empty() {
            query_texts.push(skills.join(" "));
        }
        let query_batch = self.embedder.embed_batch(&query_texts).await?;

        let index_key = format!("{}:{}", job.fingerprint, query_batch.model_version);
        let embedder = self.embedder.clone();
        let chunk_texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let index = self
            .index_pool
            .get_or_build(&index_key, move || async move {
                let batch = embedder.embed_batch(&chunk_texts).await?;
                VectorIndex::build(chunks, batch.vectors, batch.model_version)
            })
            .await?;

        if index.model_version() != query_batch.model_version {
            // The provider flipped between the query batch and the chunk
            // batch. Drop the mixed-version index so the retry rebuilds
            // it on whichever side the provider has settled.
            self.index_pool.remove(&index_key).await;
            return Err(AppError::EmbeddingUnavailable {
                message: "embedding provider changed mid-job".to_string(),
            });
        }
        let degraded = query_batch.degraded;

        let scored = retrieve(
            &index,
            &query_batch.vectors,
            self.rag.top_k,
            &query_batch.model_version,
        )?;
        let bundle = context_bundle(scored, self.rag.max_context_length);
        debug!(
            context_chars = bundle.text.chars().count(),
            chunks = bundle.chunks.len(),
            degraded,
            "Retrieval context assembled"
        );

        self.checkpoint(job.id).await?;

        let mut report = self
            .scorer
            .score(&ScoreRequest {
                resume_text: resume_text.to_string(),
                job_text: job_text.to_string(),
                retrieved_context: bundle.text,
            })
            .await?;

        self.enrich(&mut report, resume_text, job_text, degraded);
        Ok(report)
    }

    /// Fill in the locally computed fields of the report
    fn enrich(&self, report: &mut AnalysisReport, resume_text: &str, job_text: &str, degraded: bool) {
        report.degraded_retrieval = degraded;
        report.resume_stats = Some(text::resume_stats(resume_text));
        report.keyword_overlap = Some(text::keyword_overlap(resume_text, job_text));
        if report.missing_keywords.is_empty() {
            report.missing_keywords = text::missing_keywords(resume_text, job_text);
        }
        report.missing_keywords_count = report.missing_keywords.len();
    }

    async fn checkpoint(&self, job_id: Uuid) -> Result<()> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| AppError::JobNotFound {
                id: job_id.to_string(),
            })?;
        if job.cancel_requested {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resumatch_common::embeddings::{Embedder, MockEmbedder};
    use resumatch_common::models::AnalysisPayload;
    use resumatch_common::scorer::MockScorer;
    use resumatch_common::store::MemoryJobStore;

    const RESUME: &str = "SUMMARY\nSystems engineer who ships Rust services.\n\nEXPERIENCE\nBuilt a distributed job scheduler in Rust on Kubernetes, owned the Postgres storage layer, and led incident response for the ingestion fleet across two years of on-call rotations.\n\nSKILLS\nRust, PostgreSQL, Docker, Kubernetes, gRPC\n";
    const JOB: &str = "We are hiring a senior Rust engineer with Kubernetes and Terraform experience to build distributed systems.";

    fn pipeline(store: Arc<MemoryJobStore>) -> AnalysisPipeline {
        AnalysisPipeline::new(
            store,
            Arc::new(FallbackEmbedder::new(Arc::new(MockEmbedder::new(32)))),
            Arc::new(MockScorer::new()),
            Arc::new(IndexPool::new(4)),
            RagConfig {
                chunk_size: 80,
                chunk_overlap: 16,
                top_k: 3,
                max_context_length: 600,
                index_capacity: 4,
            },
        )
    }

    async fn claimed_job(store: &MemoryJobStore, resume: &str, job: &str) -> AnalysisJob {
        store
            .submit(
                format!("fp-{}", uuid::Uuid::new_v4()),
                AnalysisPayload {
                    resume_text: resume.to_string(),
                    job_text: job.to_string(),
                },
            )
            .await
            .unwrap();
        store.claim_next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_process_produces_enriched_report() {
        let store = Arc::new(MemoryJobStore::new(3));
        let pipeline = pipeline(store.clone());
        let job = claimed_job(&store, RESUME, JOB).await;

        let report = pipeline.process(&job).await.unwrap();
        assert!(!report.degraded_retrieval);
        let stats = report.resume_stats.unwrap();
        assert_eq!(stats.section_count, 3);
        let overlap = report.keyword_overlap.unwrap();
        assert!(overlap.total_job_keywords > 0);
        assert_eq!(report.missing_keywords_count, report.missing_keywords.len());
    }

    #[tokio::test]
    async fn test_empty_resume_is_fatal() {
        let store = Arc::new(MemoryJobStore::new(3));
        let pipeline = pipeline(store.clone());
        let job = claimed_job(&store, "   ", JOB).await;

        let err = pipeline.process(&job).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(matches!(err, AppError::Validation { .. }));
    }

    /// Fails exactly one batch call, healthy before and after
    struct FlakyEmbedder {
        inner: MockEmbedder,
        calls: std::sync::atomic::AtomicUsize,
        fail_on: usize,
    }

    #[async_trait::async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, text: &str) -> resumatch_common::errors::Result<Vec<f32>> {
            self.inner.embed(text).await
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> resumatch_common::errors::Result<Vec<Vec<f32>>> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                + 1;
            if call == self.fail_on {
                return Err(AppError::EmbeddingUnavailable {
                    message: "connection reset".to_string(),
                });
            }
            self.inner.embed_batch(texts).await
        }

        fn model_version(&self) -> &str {
            self.inner.model_version()
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    #[tokio::test]
    async fn test_retry_rebuilds_index_after_provider_recovers() {
        let store = Arc::new(MemoryJobStore::new(3));
        // Call 1 is the query batch, call 2 the chunk batch: the chunk
        // batch degrades to lexical vectors while the queries carry the
        // primary model version
        let flaky = Arc::new(FlakyEmbedder {
            inner: MockEmbedder::new(32),
            calls: std::sync::atomic::AtomicUsize::new(0),
            fail_on: 2,
        });
        let pipeline = AnalysisPipeline::new(
            store.clone(),
            Arc::new(FallbackEmbedder::new(flaky)),
            Arc::new(MockScorer::new()),
            Arc::new(IndexPool::new(4)),
            RagConfig {
                chunk_size: 80,
                chunk_overlap: 16,
                top_k: 3,
                max_context_length: 600,
                index_capacity: 4,
            },
        );
        let job = claimed_job(&store, RESUME, JOB).await;

        let err = pipeline.process(&job).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, AppError::EmbeddingUnavailable { .. }));

        // The mixed-version index was invalidated, so the retry rebuilds
        // it with the recovered provider instead of replaying the failure
        let report = pipeline.process(&job).await.unwrap();
        assert!(!report.degraded_retrieval);
    }

    #[tokio::test]
    async fn test_checkpoint_observes_cancel() {
        let store = Arc::new(MemoryJobStore::new(3));
        let pipeline = pipeline(store.clone());
        let job = claimed_job(&store, RESUME, JOB).await;

        store.cancel(job.id).await.unwrap();
        let err = pipeline.process(&job).await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }
}
