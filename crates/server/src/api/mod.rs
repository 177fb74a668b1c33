use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use server_api::{
    execute_notebook, job_status, list_jobs, list_notebooks, render_notebook, submit_execution,
};
use shared::{
    domain::JobId,
    error::{ApiError, ErrorCode},
    protocol::{JobList, JobRecord},
};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::app_state::AppState;

pub(crate) fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/execute/:filename", get(http_execute_notebook))
        .route("/notebook/*path", get(view_notebook))
        .route("/jobs", get(http_list_jobs))
        .route("/jobs/:id", get(http_job_status).post(http_submit_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error shown to browsers. Execution faults keep the engine's message.
pub(crate) struct PageError(ApiError);

impl From<ApiError> for PageError {
    fn from(value: ApiError) -> Self {
        Self(value)
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.code);
        let body = match self.0.code {
            ErrorCode::NotFound => "Not Found".to_string(),
            ErrorCode::ExecutionFailed => format!("Error executing notebook: {}", self.0.message),
            ErrorCode::Validation => format!("Bad Request: {}", self.0.message),
            ErrorCode::Internal => format!("Internal Server Error: {}", self.0.message),
        };
        (status, body).into_response()
    }
}

type JsonError = (StatusCode, Json<ApiError>);

fn json_error(err: ApiError) -> JsonError {
    (status_for(err.code), Json(err))
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::ExecutionFailed | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn template_error(err: minijinja::Error) -> PageError {
    error!(%err, "page template failed");
    PageError(ApiError::internal(err.to_string()))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn index(State(state): State<Arc<AppState>>) -> Result<Html<String>, PageError> {
    let notebooks = list_notebooks(&state.api).await?;
    let page = state.pages.index(&notebooks).map_err(template_error)?;
    Ok(Html(page))
}

async fn http_execute_notebook(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Redirect, PageError> {
    let outcome = execute_notebook(&state.api, &filename).await?;
    info!(
        notebook = %filename,
        output = %outcome.relative_output,
        duration_ms = outcome.duration.as_millis() as u64,
        "notebook executed"
    );
    Ok(Redirect::to(&outcome.view_url))
}

async fn view_notebook(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Html<String>, PageError> {
    let rendered = render_notebook(&state.api, &path).await?;
    let page = state
        .pages
        .notebook(&rendered.title, &rendered.html)
        .map_err(template_error)?;
    Ok(Html(page))
}

async fn http_submit_job(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<(StatusCode, Json<JobRecord>), JsonError> {
    let job = submit_execution(&state.api, &filename)
        .await
        .map_err(json_error)?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn http_job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobRecord>, JsonError> {
    let job_id: JobId = job_id.parse().map_err(|_| {
        json_error(ApiError::new(ErrorCode::Validation, "invalid job id"))
    })?;
    let job = job_status(&state.api, job_id).await.map_err(json_error)?;
    Ok(Json(job))
}

async fn http_list_jobs(State(state): State<Arc<AppState>>) -> Json<JobList> {
    Json(JobList {
        jobs: list_jobs(&state.api).await,
    })
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
