//! Metric names and recording helpers
//!
//! All metrics carry the `resumatch_` prefix. `register_metrics` is
//! called once at startup so descriptions show up even before the first
//! recording.

use metrics::{counter, describe_counter, describe_histogram, histogram};

pub const JOBS_SUBMITTED: &str = "resumatch_jobs_submitted_total";
pub const JOBS_SUCCEEDED: &str = "resumatch_jobs_succeeded_total";
pub const JOBS_FAILED: &str = "resumatch_jobs_failed_total";
pub const JOBS_CANCELLED: &str = "resumatch_jobs_cancelled_total";
pub const JOB_RETRIES: &str = "resumatch_job_retries_total";
pub const JOB_DURATION_SECONDS: &str = "resumatch_job_duration_seconds";

pub const EMBEDDING_CACHE_HITS: &str = "resumatch_embedding_cache_hits_total";
pub const EMBEDDING_CACHE_MISSES: &str = "resumatch_embedding_cache_misses_total";
pub const EMBEDDING_CACHE_EVICTIONS: &str = "resumatch_embedding_cache_evictions_total";
pub const EMBEDDING_FALLBACKS: &str = "resumatch_embedding_fallbacks_total";

pub const INDEX_BUILDS: &str = "resumatch_index_builds_total";
pub const INDEX_EVICTIONS: &str = "resumatch_index_evictions_total";

/// Register metric descriptions
pub fn register_metrics() {
    describe_counter!(JOBS_SUBMITTED, "Analysis jobs accepted for processing");
    describe_counter!(JOBS_SUCCEEDED, "Analysis jobs that completed successfully");
    describe_counter!(JOBS_FAILED, "Analysis jobs that exhausted their attempts");
    describe_counter!(JOBS_CANCELLED, "Analysis jobs cancelled before completion");
    describe_counter!(JOB_RETRIES, "Retryable failures that re-queued a job");
    describe_histogram!(
        JOB_DURATION_SECONDS,
        "Wall-clock seconds from claim to terminal state"
    );

    describe_counter!(EMBEDDING_CACHE_HITS, "Embedding cache lookups served locally");
    describe_counter!(EMBEDDING_CACHE_MISSES, "Embedding cache lookups sent upstream");
    describe_counter!(
        EMBEDDING_CACHE_EVICTIONS,
        "Embedding cache entries evicted by the LRU bound"
    );
    describe_counter!(
        EMBEDDING_FALLBACKS,
        "Batches embedded with the lexical fallback"
    );

    describe_counter!(INDEX_BUILDS, "Session vector indexes built");
    describe_counter!(
        INDEX_EVICTIONS,
        "Session vector indexes evicted by the pool's LRU bound"
    );
}

pub fn record_job_submitted() {
    counter!(JOBS_SUBMITTED).increment(1);
}

pub fn record_job_succeeded(duration_secs: f64) {
    counter!(JOBS_SUCCEEDED).increment(1);
    histogram!(JOB_DURATION_SECONDS).record(duration_secs);
}

pub fn record_job_failed() {
    counter!(JOBS_FAILED).increment(1);
}

pub fn record_job_cancelled() {
    counter!(JOBS_CANCELLED).increment(1);
}

pub fn record_job_retry() {
    counter!(JOB_RETRIES).increment(1);
}

pub fn record_embedding_cache_hit() {
    counter!(EMBEDDING_CACHE_HITS).increment(1);
}

pub fn record_embedding_cache_miss() {
    counter!(EMBEDDING_CACHE_MISSES).increment(1);
}

pub fn record_embedding_cache_eviction() {
    counter!(EMBEDDING_CACHE_EVICTIONS).increment(1);
}

pub fn record_embedding_fallback() {
    counter!(EMBEDDING_FALLBACKS).increment(1);
}

pub fn record_index_build() {
    counter!(INDEX_BUILDS).increment(1);
}

pub fn record_index_eviction() {
    counter!(INDEX_EVICTIONS).increment(1);
}
