//! Job posting scraping handler

use axum::Json;
use resumatch_common::{
    errors::{AppError, Result},
    scrape::fetch_posting,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct ScrapeJobRequest {
    #[validate(url)]
    pub url: String,
}

#[derive(Serialize)]
pub struct ScrapeJobResponse {
    pub url: String,
    pub job_text: String,
}

/// Fetch a job posting URL and return its readable text
pub async fn scrape_job(
    Json(request): Json<ScrapeJobRequest>,
) -> Result<Json<ScrapeJobResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("url".to_string()),
    })?;

    let job_text = fetch_posting(&request.url).await?;

    Ok(Json(ScrapeJobResponse {
        url: request.url,
        job_text,
    }))
}
