//! Scoring service client
//!
//! The `Scorer` trait is the seam to the LLM that turns a resume, a job
//! description, and the retrieved context bundle into a structured gap
//! analysis. `HttpScorer` speaks a chat-completions wire format;
//! `MockScorer` returns a canned report for tests.

use crate::config::ScorerConfig;
use crate::errors::{AppError, Result};
use crate::models::AnalysisReport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Input to a scoring call
#[derive(Clone, Debug)]
pub struct ScoreRequest {
    pub resume_text: String,
    pub job_text: String,
    /// Rendered retrieval context, already bounded in length
    pub retrieved_context: String,
}

/// Trait for gap-analysis scoring providers
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, request: &ScoreRequest) -> Result<AnalysisReport>;

    fn model_name(&self) -> &str;
}

const SYSTEM_PROMPT: &str = "You are an expert resume reviewer. Compare the resume against the \
job description and respond with a single JSON object containing: match_score (integer 0-100), \
overall_rating (one of Excellent, Good, Fair, Poor), missing_keywords (array of strings), \
missing_keywords_count (integer), strengths (array of strings), improvements (array of objects \
with category, issue, suggestion, priority, section). Respond with JSON only.";

pub struct HttpScorer {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize, Serialize)]
struct ChatMessage {
    content: String,
}

impl HttpScorer {
    pub fn new(config: &ScorerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta/openai".to_string()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn build_user_prompt(request: &ScoreRequest) -> String {
        format!(
            "Most relevant job description excerpts:\n{}\n\nResume:\n{}\n\nFull job description:\n{}",
            request.retrieved_context, request.resume_text, request.job_text
        )
    }
}

/// Strip a markdown code fence if the model wrapped its JSON in one
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n'])
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

/// Parse a scorer response body into a report.
///
/// A malformed body is a fatal validation failure, not a transient one:
/// resending the same prompt is unlikely to change a structurally broken
/// answer, and retries would just burn the budget.
pub fn parse_report(content: &str) -> Result<AnalysisReport> {
    let body = strip_code_fence(content);
    let mut report: AnalysisReport =
        serde_json::from_str(body).map_err(|e| AppError::Validation {
            message: format!("scorer returned malformed analysis JSON: {e}"),
            field: None,
        })?;
    report.match_score = report.match_score.min(100);
    report.missing_keywords_count = report.missing_keywords.len();
    Ok(report)
}

#[async_trait]
impl Scorer for HttpScorer {
    async fn score(&self, request: &ScoreRequest) -> Result<AnalysisReport> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::build_user_prompt(request)},
            ],
            "response_format": {"type": "json_object"},
        });

        let mut http_request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request.send().await.map_err(|e| AppError::ExternalService {
            service: "scorer".to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService {
                service: "scorer".to_string(),
                message: format!("scoring service returned {status}: {text}"),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| AppError::ExternalService {
            service: "scorer".to_string(),
            message: format!("unreadable scorer response: {e}"),
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::ExternalService {
                service: "scorer".to_string(),
                message: "scorer response contained no choices".to_string(),
            })?;

        debug!(model = %self.model, "Scoring response received");
        parse_report(&content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Canned scorer for tests
pub struct MockScorer {
    report: AnalysisReport,
}

impl MockScorer {
    pub fn new() -> Self {
        Self {
            report: AnalysisReport {
                match_score: 70,
                overall_rating: "Good".to_string(),
                missing_keywords: vec!["kubernetes".to_string()],
                missing_keywords_count: 1,
                strengths: vec!["Strong systems background".to_string()],
                ..Default::default()
            },
        }
    }

    pub fn with_report(report: AnalysisReport) -> Self {
        Self { report }
    }
}

impl Default for MockScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scorer for MockScorer {
    async fn score(&self, _request: &ScoreRequest) -> Result<AnalysisReport> {
        Ok(self.report.clone())
    }

    fn model_name(&self) -> &str {
        "mock-scorer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let report = parse_report(r#"{"match_score": 85, "overall_rating": "Good"}"#).unwrap();
        assert_eq!(report.match_score, 85);
        assert_eq!(report.overall_rating, "Good");
    }

    #[test]
    fn test_parse_fenced_json() {
        let content = "```json\n{\"match_score\": 40, \"missing_keywords\": [\"go\", \"grpc\"]}\n```";
        let report = parse_report(content).unwrap();
        assert_eq!(report.match_score, 40);
        assert_eq!(report.missing_keywords_count, 2);
    }

    #[test]
    fn test_parse_clamps_score() {
        let report = parse_report(r#"{"match_score": 250}"#).unwrap();
        assert_eq!(report.match_score, 100);
    }

    #[test]
    fn test_malformed_json_is_fatal_validation() {
        let err = parse_report("I think the resume is fine").unwrap_err();
        assert!(!err.is_retryable());
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_mock_scorer() {
        let scorer = MockScorer::new();
        let report = scorer
            .score(&ScoreRequest {
                resume_text: "r".into(),
                job_text: "j".into(),
                retrieved_context: "ctx".into(),
            })
            .await
            .unwrap();
        assert_eq!(report.match_score, 70);
    }
}
