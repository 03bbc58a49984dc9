//! ResuMatch Common Library
//!
//! Shared code for the ResuMatch services including:
//! - Analysis job model and state machine
//! - Job store abstraction and in-memory implementation
//! - Embedding provider abstraction with caching and lexical fallback
//! - Scoring service client
//! - Document text extraction and job-posting scraping
//! - Error types, configuration, and metrics

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod extract;
pub mod fingerprint;
pub mod metrics;
pub mod models;
pub mod scorer;
pub mod scrape;
pub mod store;
pub mod text;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use fingerprint::job_fingerprint;
pub use models::{AnalysisJob, AnalysisReport, JobState};
pub use store::{JobStore, MemoryJobStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
