//! Analysis submission and lifecycle handlers

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use resumatch_common::{
    errors::{AppError, Result},
    extract::extract_text,
    fingerprint::job_fingerprint,
    metrics,
    models::{AnalysisJob, AnalysisPayload, AnalysisReport, ClassifiedError, JobState},
    scrape::fetch_posting,
    store::JobStore,
};

/// Request to analyze a resume against a job description
#[derive(Debug, Deserialize, Validate)]
pub struct CreateAnalysisRequest {
    #[validate(length(min = 1))]
    pub resume_text: String,

    #[validate(length(min = 1))]
    pub job_text: String,
}

/// Response after submitting an analysis
#[derive(Serialize)]
pub struct CreateAnalysisResponse {
    pub job_id: Uuid,
    pub fingerprint: String,
    pub status: String,
    pub poll_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_degraded: Option<bool>,
}

/// Full job status response
#[derive(Serialize)]
pub struct AnalysisResponse {
    pub job_id: Uuid,
    pub fingerprint: String,
    pub status: String,
    pub attempt_count: u32,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ClassifiedError>,
}

impl AnalysisResponse {
    fn from_job(job: AnalysisJob) -> Self {
        // A result is only exposed once the job has actually succeeded,
        // and an error only once it has finally failed
        let result = (job.state == JobState::Succeeded)
            .then_some(job.result)
            .flatten();
        let error = (job.state == JobState::Failed).then_some(job.error).flatten();

        Self {
            job_id: job.id,
            fingerprint: job.fingerprint,
            status: job.state.to_string(),
            attempt_count: job.attempt_count,
            created_at: job.created_at.to_rfc3339(),
            started_at: job.started_at.map(|dt| dt.to_rfc3339()),
            completed_at: job.completed_at.map(|dt| dt.to_rfc3339()),
            result,
            error,
        }
    }
}

fn check_limits(state: &AppState, resume_text: &str, job_text: &str) -> Result<()> {
    let limits = &state.config.limits;
    if resume_text.len() > limits.max_resume_bytes {
        return Err(AppError::PayloadTooLarge {
            size: resume_text.len(),
            limit: limits.max_resume_bytes,
        });
    }
    if job_text.len() > limits.max_job_bytes {
        return Err(AppError::PayloadTooLarge {
            size: job_text.len(),
            limit: limits.max_job_bytes,
        });
    }
    Ok(())
}

async fn submit(
    state: &AppState,
    resume_text: String,
    job_text: String,
    extraction_degraded: Option<bool>,
) -> Result<(StatusCode, Json<CreateAnalysisResponse>)> {
    check_limits(state, &resume_text, &job_text)?;

    let fingerprint = job_fingerprint(&resume_text, &job_text, &state.model_version);
    let outcome = state
        .store
        .submit(
            fingerprint.clone(),
            AnalysisPayload {
                resume_text,
                job_text,
            },
        )
        .await?;

    let status_code = if outcome.created {
        metrics::record_job_submitted();
        tracing::info!(
            job_id = %outcome.job.id,
            fingerprint = %fingerprint,
            "Analysis job submitted"
        );
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };

    Ok((
        status_code,
        Json(CreateAnalysisResponse {
            job_id: outcome.job.id,
            fingerprint,
            status: outcome.job.state.to_string(),
            poll_url: format!("/v1/analysis/{}", outcome.job.id),
            extraction_degraded,
        }),
    ))
}

/// Submit a resume and job description for analysis
pub async fn create_analysis(
    State(state): State<AppState>,
    Json(request): Json<CreateAnalysisRequest>,
) -> Result<(StatusCode, Json<CreateAnalysisResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    submit(&state, request.resume_text, request.job_text, None).await
}

/// Submit a resume document plus a job description (or posting URL)
pub async fn create_analysis_from_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<CreateAnalysisResponse>)> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut job_text: Option<String> = None;
    let mut job_url: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::Validation {
        message: format!("malformed multipart body: {e}"),
        field: None,
    })? {
        match field.name().unwrap_or_default() {
            "file" => {
                let filename = field.file_name().unwrap_or("resume.txt").to_string();
                let bytes = field.bytes().await.map_err(|e| AppError::Validation {
                    message: format!("failed to read uploaded file: {e}"),
                    field: Some("file".to_string()),
                })?;
                file = Some((filename, bytes.to_vec()));
            }
            "job_text" => {
                job_text = Some(field.text().await.map_err(|e| AppError::Validation {
                    message: format!("failed to read job_text: {e}"),
                    field: Some("job_text".to_string()),
                })?);
            }
            "job_url" => {
                job_url = Some(field.text().await.map_err(|e| AppError::Validation {
                    message: format!("failed to read job_url: {e}"),
                    field: Some("job_url".to_string()),
                })?);
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| AppError::Validation {
        message: "multipart field 'file' is required".to_string(),
        field: Some("file".to_string()),
    })?;

    if bytes.len() > state.config.limits.max_file_bytes {
        return Err(AppError::PayloadTooLarge {
            size: bytes.len(),
            limit: state.config.limits.max_file_bytes,
        });
    }

    let job_text = match (job_text.filter(|t| !t.trim().is_empty()), job_url) {
        (Some(text), _) => text,
        (None, Some(url)) => fetch_posting(&url).await?,
        (None, None) => {
            return Err(AppError::Validation {
                message: "either job_text or job_url is required".to_string(),
                field: None,
            });
        }
    };

    let extracted = extract_text(&bytes, &filename)?;
    tracing::info!(
        filename = %filename,
        bytes = bytes.len(),
        degraded = extracted.degraded,
        "Resume document extracted"
    );

    submit(&state, extracted.text, job_text, Some(extracted.degraded)).await
}

/// Get the status (and result, once succeeded) of an analysis job
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<AnalysisResponse>> {
    let job = state
        .store
        .get(job_id)
        .await?
        .ok_or_else(|| AppError::JobNotFound {
            id: job_id.to_string(),
        })?;

    Ok(Json(AnalysisResponse::from_job(job)))
}

/// Cancellation response
#[derive(Serialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub status: String,
}

/// Request cancellation of an analysis job
pub async fn cancel_analysis(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<CancelResponse>)> {
    let job = state.store.cancel(job_id).await?;

    // A Running job keeps running until the next pipeline checkpoint;
    // the worker records that cancellation when it observes the flag
    let status = if job.state == JobState::Running {
        "cancelling".to_string()
    } else {
        metrics::record_job_cancelled();
        job.state.to_string()
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            job_id: job.id,
            status,
        }),
    ))
}

#[derive(Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct AnalysisSummary {
    pub job_id: Uuid,
    pub fingerprint: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct ListAnalysesResponse {
    pub jobs: Vec<AnalysisSummary>,
}

const MAX_LIST_LIMIT: usize = 100;

/// List recent analysis jobs, newest first
pub async fn list_analyses(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListAnalysesResponse>> {
    let limit = params.limit.unwrap_or(20).min(MAX_LIST_LIMIT);
    let jobs = state
        .store
        .list_recent(limit)
        .await?
        .into_iter()
        .map(|job| AnalysisSummary {
            job_id: job.id,
            fingerprint: job.fingerprint,
            status: job.state.to_string(),
            created_at: job.created_at.to_rfc3339(),
        })
        .collect();

    Ok(Json(ListAnalysesResponse { jobs }))
}
