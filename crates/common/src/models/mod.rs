//! Core domain types: analysis jobs and analysis reports

use crate::errors::ErrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Analysis job lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    /// Terminal states accept no further transitions (Failed may be
    /// explicitly resubmitted, which is a new attempt cycle, not a
    /// transition).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A failure that has been through the orchestrator's classifier.
///
/// The job store only ever receives these; raw errors never reach a job
/// record, and polling clients only ever see the kind plus a
/// human-readable message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifiedError {
    pub kind: ErrorCode,
    pub message: String,
}

/// The submitted input pair an analysis job runs on
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub resume_text: String,
    pub job_text: String,
}

/// Durable record of one analysis job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: Uuid,

    /// Idempotency key: hash of (resume_text, job_text, model_version)
    pub fingerprint: String,

    pub payload: AnalysisPayload,

    pub state: JobState,

    pub attempt_count: u32,

    /// Set by `cancel` on a Running job; observed by the orchestrator at
    /// its next pipeline checkpoint.
    pub cancel_requested: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Earliest claim time after a retryable failure
    pub next_retry_at: Option<DateTime<Utc>>,

    pub started_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Present only when state is Succeeded; immutable thereafter
    pub result: Option<AnalysisReport>,

    /// Present only when state is Failed
    pub error: Option<ClassifiedError>,
}

impl AnalysisJob {
    pub fn new(fingerprint: String, payload: AnalysisPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            fingerprint,
            payload,
            state: JobState::Pending,
            attempt_count: 0,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            next_retry_at: None,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// A Pending job is claimable once its retry backoff (if any) elapsed
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending
            && self.next_retry_at.map(|t| t <= now).unwrap_or(true)
    }
}

/// Structured gap analysis produced by the scoring service.
///
/// Every field defaults so a sparse scorer response still parses; the
/// enrichment step fills `resume_stats` and `keyword_overlap` locally.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub match_score: u8,

    #[serde(default = "default_rating")]
    pub overall_rating: String,

    #[serde(default)]
    pub missing_keywords: Vec<String>,

    #[serde(default)]
    pub missing_keywords_count: usize,

    #[serde(default)]
    pub strengths: Vec<String>,

    #[serde(default)]
    pub improvements: Vec<Improvement>,

    /// True when the retrieval context was built from lexical-fallback
    /// embeddings rather than model embeddings
    #[serde(default)]
    pub degraded_retrieval: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_stats: Option<ResumeStats>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_overlap: Option<KeywordOverlap>,
}

fn default_rating() -> String {
    "Fair".to_string()
}

/// One recommended improvement in the gap analysis
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Improvement {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub suggestion: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub section: String,
}

/// Simple size statistics about the analyzed resume
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResumeStats {
    pub word_count: usize,
    pub character_count: usize,
    pub section_count: usize,
}

/// Keyword overlap between the resume and the job description
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeywordOverlap {
    pub total_job_keywords: usize,
    pub matching_keywords: usize,
    pub overlap_percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn test_new_job_is_claimable() {
        let job = AnalysisJob::new(
            "fp".into(),
            AnalysisPayload {
                resume_text: "r".into(),
                job_text: "j".into(),
            },
        );
        assert_eq!(job.state, JobState::Pending);
        assert!(job.is_claimable(Utc::now()));
    }

    #[test]
    fn test_backoff_gates_claim() {
        let mut job = AnalysisJob::new(
            "fp".into(),
            AnalysisPayload {
                resume_text: "r".into(),
                job_text: "j".into(),
            },
        );
        job.next_retry_at = Some(Utc::now() + chrono::Duration::seconds(60));
        assert!(!job.is_claimable(Utc::now()));
    }

    #[test]
    fn test_sparse_report_parses() {
        let report: AnalysisReport = serde_json::from_str(r#"{"match_score": 72}"#).unwrap();
        assert_eq!(report.match_score, 72);
        assert_eq!(report.overall_rating, "Fair");
        assert!(report.improvements.is_empty());
    }
}
