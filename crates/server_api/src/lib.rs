use std::{sync::Arc, time::Duration};

use chrono::Utc;
use notebook_engine::{ExecutionEngine, ExecutionReport, ExecutionRequest, HtmlExporter};
use shared::{
    domain::{
        execute_route, executed_view_route, view_route, JobId, JobState, DATASET_PARAMETER,
    },
    error::{ApiError, ErrorCode},
    protocol::{JobRecord, NotebookSummary},
};
use storage::{ExecutionTarget, NotebookStore};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

mod jobs;
mod locks;

pub use jobs::{JobRegistry, DEFAULT_JOB_HISTORY};
pub use locks::ExecutionLocks;

#[derive(Clone)]
pub struct ApiContext {
    pub store: NotebookStore,
    pub engine: Arc<dyn ExecutionEngine>,
    pub exporter: Arc<dyn HtmlExporter>,
    pub workers: Arc<Semaphore>,
    pub locks: ExecutionLocks,
    pub jobs: JobRegistry,
}

impl ApiContext {
    pub fn new(
        store: NotebookStore,
        engine: Arc<dyn ExecutionEngine>,
        exporter: Arc<dyn HtmlExporter>,
        max_concurrent_executions: usize,
    ) -> Self {
        Self {
            store,
            engine,
            exporter,
            workers: Arc::new(Semaphore::new(max_concurrent_executions.max(1))),
            locks: ExecutionLocks::new(),
            jobs: JobRegistry::new(),
        }
    }

    /// Keeps at most `history` finished jobs for `list_jobs`/`job_status`.
    pub fn with_job_history(mut self, history: usize) -> Self {
        self.jobs = JobRegistry::with_history(history);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub relative_output: String,
    pub view_url: String,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct RenderedNotebook {
    pub relative_path: String,
    pub title: String,
    pub html: String,
}

pub async fn list_notebooks(ctx: &ApiContext) -> Result<Vec<NotebookSummary>, ApiError> {
    let names = ctx.store.list_notebooks().await.map_err(internal)?;
    Ok(names
        .into_iter()
        .map(|name| NotebookSummary {
            execute_url: execute_route(&name),
            view_url: view_route(&name),
            name,
        })
        .collect())
}

/// Runs `filename` to completion and reports where the executed copy landed.
pub async fn execute_notebook(
    ctx: &ApiContext,
    filename: &str,
) -> Result<ExecutionOutcome, ApiError> {
    let target = locate_source(ctx, filename).await?;
    let report = run_execution(ctx, &target, || async {}).await?;
    Ok(ExecutionOutcome {
        view_url: executed_view_route(&target.source_name),
        relative_output: target.relative_output,
        duration: report.duration,
    })
}

/// Queues `filename` for execution in the background and returns the job.
pub async fn submit_execution(ctx: &ApiContext, filename: &str) -> Result<JobRecord, ApiError> {
    let target = locate_source(ctx, filename).await?;
    let record = JobRecord {
        job_id: JobId::new(),
        notebook: target.source_name.clone(),
        output: target.relative_output.clone(),
        view_url: executed_view_route(&target.source_name),
        state: JobState::Queued,
        error: None,
        created_at: Utc::now(),
        started_at: None,
        finished_at: None,
    };
    let job_id = record.job_id;
    ctx.jobs.insert(record.clone()).await;
    info!(%job_id, notebook = %target.source_name, "execution job queued");

    let worker_ctx = ctx.clone();
    let jobs = ctx.jobs.clone();
    tokio::spawn(async move {
        let running = jobs.clone();
        // A panicking engine must still leave the job in a terminal state.
        let work = tokio::spawn(async move {
            run_execution(&worker_ctx, &target, || running.mark_running(job_id)).await
        });
        match work.await {
            Ok(Ok(_)) => jobs.mark_succeeded(job_id).await,
            Ok(Err(err)) => jobs.mark_failed(job_id, err.message).await,
            Err(join_err) => {
                error!(%job_id, error = %join_err, "execution task aborted");
                jobs.mark_failed(job_id, format!("execution task aborted: {join_err}"))
                    .await
            }
        }
    });

    Ok(record)
}

pub async fn job_status(ctx: &ApiContext, job_id: JobId) -> Result<JobRecord, ApiError> {
    ctx.jobs
        .get(job_id)
        .await
        .ok_or_else(|| ApiError::not_found("job not found"))
}

pub async fn list_jobs(ctx: &ApiContext) -> Vec<JobRecord> {
    ctx.jobs.list().await
}

/// Converts the notebook at `relative_path` (below the notebook directory)
/// to an HTML fragment. Nothing is cached.
pub async fn render_notebook(
    ctx: &ApiContext,
    relative_path: &str,
) -> Result<RenderedNotebook, ApiError> {
    let path = ctx
        .store
        .locate_notebook(relative_path)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("notebook not found"))?;

    let html = ctx.exporter.export(&path).await.map_err(|err| {
        error!(path = %path.display(), exporter = ctx.exporter.name(), %err, "notebook export failed");
        ApiError::internal(err.to_string())
    })?;

    let title = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| relative_path.to_string());
    Ok(RenderedNotebook {
        relative_path: relative_path.to_string(),
        title,
        html,
    })
}

async fn locate_source(ctx: &ApiContext, filename: &str) -> Result<ExecutionTarget, ApiError> {
    ctx.store
        .locate_source(filename)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("notebook not found"))
}

/// Waits for the output path lock and a worker slot, calls `on_start`, then
/// runs the engine.
async fn run_execution<F, Fut>(
    ctx: &ApiContext,
    target: &ExecutionTarget,
    on_start: F,
) -> Result<ExecutionReport, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let _path_guard = ctx.locks.lock(&target.output).await;
    let _permit = ctx
        .workers
        .acquire()
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    on_start().await;

    let request = ExecutionRequest {
        source: target.source.clone(),
        output: target.output.clone(),
        parameters: vec![(
            DATASET_PARAMETER.to_string(),
            ctx.store.dirs().dataset_dir.display().to_string(),
        )],
    };
    ctx.engine.execute(&request).await.map_err(|err| {
        warn!(
            notebook = %target.source_name,
            engine = ctx.engine.name(),
            %err,
            "notebook execution failed"
        );
        ApiError::new(ErrorCode::ExecutionFailed, err.to_string())
    })
}

fn internal(err: anyhow::Error) -> ApiError {
    error!(error = %format!("{err:#}"), "internal error");
    ApiError::internal(format!("{err:#}"))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
