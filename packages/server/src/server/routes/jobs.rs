//! Job create and status endpoints.

use axum::{
    extract::{Extension, Path},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::kernel::jobs::{Job, JobError, JobStatus};
use crate::server::app::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedJob {
    pub id: i64,
    pub description: String,
    pub status: JobStatus,
}

impl From<Job> for CreatedJob {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            description: job.description,
            status: job.status,
        }
    }
}

/// Maps store failures to status codes. Storage details never leave the
/// process; they are logged instead.
pub struct ApiError(pub JobError);

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            JobError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            JobError::NotFound(_) => (StatusCode::NOT_FOUND, "Job not found".to_string()),
            JobError::Conflict { .. } => (StatusCode::CONFLICT, self.0.to_string()),
            JobError::InvalidTransition { .. } | JobError::RetriesExhausted { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.0.to_string())
            }
            JobError::Storage(e) => {
                tracing::error!(error = %e, "job store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// POST /api/jobs
pub async fn create_job(
    Extension(state): Extension<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreatedJob>), ApiError> {
    let job = state
        .job_store
        .enqueue(request.description.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(CreatedJob::from(job))))
}

/// GET /api/jobs/:id
///
/// Always read through to the store and tell intermediaries not to cache:
/// callers poll this until the job reaches a terminal state.
pub async fn get_job(Extension(state): Extension<AppState>, Path(id): Path<i64>) -> Response {
    let result = state.job_store.find_by_id(id).await;

    let response = match result {
        Ok(job) => Json(job).into_response(),
        Err(e) => ApiError(e).into_response(),
    };

    ([(header::CACHE_CONTROL, "no-store")], response).into_response()
}

/// GET /api
pub async fn api_root() -> &'static str {
    "API is running"
}
