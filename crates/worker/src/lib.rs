//! ResuMatch analysis worker
//!
//! Claims analysis jobs from the shared store and runs them through the
//! retrieval and scoring pipeline, with classified failure handling,
//! jittered retry backoff, and cooperative cancellation.

pub mod classify;
pub mod pipeline;
pub mod pool;

pub use classify::{classify, FailureKind};
pub use pipeline::AnalysisPipeline;
pub use pool::WorkerPool;
