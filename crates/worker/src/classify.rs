//! Failure classification
//!
//! Every pipeline error is classified before it reaches the job store:
//! retryable failures re-queue the job with backoff, fatal ones fail it
//! immediately, and an observed cancellation is terminal without being a
//! failure. Raw error values never land on a job record.

use resumatch_common::errors::AppError;
use resumatch_common::models::ClassifiedError;

/// Disposition of a pipeline failure
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient; the job returns to Pending with backoff
    Retryable(ClassifiedError),
    /// Permanent; the job fails without further attempts
    Fatal(ClassifiedError),
    /// The cancel flag was observed at a checkpoint
    Cancelled,
}

/// Classify a pipeline error
pub fn classify(error: &AppError) -> FailureKind {
    if matches!(error, AppError::Cancelled) {
        return FailureKind::Cancelled;
    }

    let classified = ClassifiedError {
        kind: error.code(),
        message: error.to_string(),
    };

    if error.is_retryable() {
        FailureKind::Retryable(classified)
    } else {
        FailureKind::Fatal(classified)
    }
}
