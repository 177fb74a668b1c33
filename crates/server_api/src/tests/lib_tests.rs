use super::*;
use async_trait::async_trait;
use notebook_engine::{EngineError, ExportError, NativeHtmlExporter};
use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Instant,
};
use storage::NotebookDirs;
use tempfile::TempDir;

const MINIMAL_NOTEBOOK: &str =
    r#"{"cells":[{"cell_type":"code","source":"print(DATASET_DIR)","execution_count":null,"outputs":[]}],"metadata":{},"nbformat":4,"nbformat_minor":5}"#;

/// Copies the source to the output and records what it was asked to do.
#[derive(Default)]
struct CopyEngine {
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    requests: Mutex<Vec<ExecutionRequest>>,
}

impl CopyEngine {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ExecutionEngine for CopyEngine {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionReport, EngineError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.requests.lock().expect("requests").push(request.clone());
        let started = Instant::now();
        tokio::time::sleep(self.delay).await;
        let result = tokio::fs::copy(&request.source, &request.output).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result.map_err(|source| EngineError::Io {
            program: "copy".into(),
            source,
        })?;
        Ok(ExecutionReport {
            output: request.output.clone(),
            duration: started.elapsed(),
        })
    }

    fn name(&self) -> &'static str {
        "copy"
    }
}

struct FailingEngine;

#[async_trait]
impl ExecutionEngine for FailingEngine {
    async fn execute(&self, _request: &ExecutionRequest) -> Result<ExecutionReport, EngineError> {
        Err(EngineError::Failed {
            program: "papermill".into(),
            status: "exit status: 1".into(),
            stderr: "NameError: name 'DATASET_DIR' is not defined".into(),
        })
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

struct PanickingEngine;

#[async_trait]
impl ExecutionEngine for PanickingEngine {
    async fn execute(&self, _request: &ExecutionRequest) -> Result<ExecutionReport, EngineError> {
        panic!("kernel bridge crashed");
    }

    fn name(&self) -> &'static str {
        "panicking"
    }
}

struct BrokenExporter;

#[async_trait]
impl HtmlExporter for BrokenExporter {
    async fn export(&self, _path: &Path) -> Result<String, ExportError> {
        Err(ExportError::UnsupportedVersion(3))
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

struct Fixture {
    _temp: TempDir,
    dirs: NotebookDirs,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().expect("temp");
        let dirs = NotebookDirs::new(temp.path().join("notebooks"), temp.path().join("datasets"));
        fs::create_dir_all(&dirs.notebook_dir).expect("notebook dir");
        fs::create_dir_all(&dirs.dataset_dir).expect("dataset dir");
        Self { _temp: temp, dirs }
    }

    fn write(&self, name: &str, contents: &str) {
        fs::write(self.dirs.notebook_dir.join(name), contents).expect("write notebook");
    }

    fn context(&self, engine: Arc<dyn ExecutionEngine>) -> ApiContext {
        self.context_with(engine, Arc::new(NativeHtmlExporter::new().expect("exporter")), 2)
    }

    fn context_with(
        &self,
        engine: Arc<dyn ExecutionEngine>,
        exporter: Arc<dyn HtmlExporter>,
        workers: usize,
    ) -> ApiContext {
        let store = NotebookStore::new(self.dirs.clone());
        store.prepare_directories().expect("prepare");
        ApiContext::new(store, engine, exporter, workers)
    }
}

async fn wait_for_terminal(ctx: &ApiContext, job_id: JobId) -> JobRecord {
    for _ in 0..200 {
        let job = job_status(ctx, job_id).await.expect("job");
        if job.state.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not finish");
}

#[tokio::test]
async fn listing_builds_routes_for_each_notebook() {
    let fixture = Fixture::new();
    fixture.write("b report.ipynb", MINIMAL_NOTEBOOK);
    fixture.write("a.ipynb", MINIMAL_NOTEBOOK);
    fixture.write("executed_a.ipynb", MINIMAL_NOTEBOOK);
    let ctx = fixture.context(Arc::new(CopyEngine::default()));

    let listed = list_notebooks(&ctx).await.expect("list");
    let names: Vec<_> = listed.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, ["a.ipynb", "b report.ipynb"]);
    assert_eq!(listed[1].execute_url, "/execute/b%20report.ipynb");
    assert_eq!(listed[1].view_url, "/notebook/b%20report.ipynb");
}

#[tokio::test]
async fn execute_writes_deterministic_output_and_passes_dataset_dir() {
    let fixture = Fixture::new();
    fixture.write("X.ipynb", MINIMAL_NOTEBOOK);
    let engine = Arc::new(CopyEngine::default());
    let ctx = fixture.context(engine.clone());

    let outcome = execute_notebook(&ctx, "X.ipynb").await.expect("execute");
    assert_eq!(outcome.relative_output, "executed/X_executed.ipynb");
    assert_eq!(outcome.view_url, "/notebook/executed/X_executed.ipynb");
    assert!(fixture.dirs.executed_dir.join("X_executed.ipynb").is_file());

    let requests = engine.requests.lock().expect("requests");
    assert_eq!(
        requests[0].parameters,
        vec![(
            "DATASET_DIR".to_string(),
            fixture.dirs.dataset_dir.display().to_string()
        )]
    );
}

#[tokio::test]
async fn execute_missing_notebook_is_not_found() {
    let fixture = Fixture::new();
    let ctx = fixture.context(Arc::new(CopyEngine::default()));
    let err = execute_notebook(&ctx, "ghost.ipynb").await.expect_err("missing");
    assert_eq!(err.code, ErrorCode::NotFound);

    let err = execute_notebook(&ctx, "../notebooks/ghost.ipynb")
        .await
        .expect_err("traversal");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn execution_fault_carries_engine_message() {
    let fixture = Fixture::new();
    fixture.write("bad.ipynb", MINIMAL_NOTEBOOK);
    let ctx = fixture.context(Arc::new(FailingEngine));

    let err = execute_notebook(&ctx, "bad.ipynb").await.expect_err("fault");
    assert_eq!(err.code, ErrorCode::ExecutionFailed);
    assert!(err.message.contains("NameError"));
}

#[tokio::test]
async fn re_execution_overwrites_the_same_artifact() {
    let fixture = Fixture::new();
    fixture.write("X.ipynb", MINIMAL_NOTEBOOK);
    let ctx = fixture.context(Arc::new(CopyEngine::default()));
    execute_notebook(&ctx, "X.ipynb").await.expect("first");

    let updated = MINIMAL_NOTEBOOK.replace("print(DATASET_DIR)", "print('v2')");
    fixture.write("X.ipynb", &updated);
    execute_notebook(&ctx, "X.ipynb").await.expect("second");

    let executed: Vec<_> = fs::read_dir(&fixture.dirs.executed_dir)
        .expect("read executed")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(executed, ["X_executed.ipynb"]);
    let contents =
        fs::read_to_string(fixture.dirs.executed_dir.join("X_executed.ipynb")).expect("read");
    assert_eq!(contents, updated);
}

#[tokio::test]
async fn concurrent_executions_of_one_notebook_are_serialised() {
    let fixture = Fixture::new();
    fixture.write("X.ipynb", MINIMAL_NOTEBOOK);
    let engine = Arc::new(CopyEngine::slow(Duration::from_millis(30)));
    let ctx = fixture.context_with(
        engine.clone(),
        Arc::new(NativeHtmlExporter::new().expect("exporter")),
        4,
    );

    let (a, b, c) = tokio::join!(
        execute_notebook(&ctx, "X.ipynb"),
        execute_notebook(&ctx, "X.ipynb"),
        execute_notebook(&ctx, "X.ipynb"),
    );
    a.expect("a");
    b.expect("b");
    c.expect("c");
    assert_eq!(engine.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(engine.requests.lock().expect("requests").len(), 3);
}

#[tokio::test]
async fn different_notebooks_execute_in_parallel_up_to_worker_limit() {
    let fixture = Fixture::new();
    for name in ["a.ipynb", "b.ipynb", "c.ipynb"] {
        fixture.write(name, MINIMAL_NOTEBOOK);
    }
    let engine = Arc::new(CopyEngine::slow(Duration::from_millis(50)));
    let ctx = fixture.context_with(
        engine.clone(),
        Arc::new(NativeHtmlExporter::new().expect("exporter")),
        2,
    );

    let (a, b, c) = tokio::join!(
        execute_notebook(&ctx, "a.ipynb"),
        execute_notebook(&ctx, "b.ipynb"),
        execute_notebook(&ctx, "c.ipynb"),
    );
    a.expect("a");
    b.expect("b");
    c.expect("c");
    assert_eq!(engine.max_active.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn submitted_job_runs_to_success() {
    let fixture = Fixture::new();
    fixture.write("X.ipynb", MINIMAL_NOTEBOOK);
    let ctx = fixture.context(Arc::new(CopyEngine::default()));

    let job = submit_execution(&ctx, "X.ipynb").await.expect("submit");
    assert_eq!(job.state, JobState::Queued);
    assert_eq!(job.view_url, "/notebook/executed/X_executed.ipynb");

    let finished = wait_for_terminal(&ctx, job.job_id).await;
    assert_eq!(finished.state, JobState::Succeeded);
    assert!(finished.started_at.is_some());
    assert!(finished.finished_at.is_some());
    assert!(fixture.dirs.executed_dir.join("X_executed.ipynb").is_file());
}

#[tokio::test]
async fn submitted_job_records_failure() {
    let fixture = Fixture::new();
    fixture.write("bad.ipynb", MINIMAL_NOTEBOOK);
    let ctx = fixture.context(Arc::new(FailingEngine));

    let job = submit_execution(&ctx, "bad.ipynb").await.expect("submit");
    let finished = wait_for_terminal(&ctx, job.job_id).await;
    assert_eq!(finished.state, JobState::Failed);
    assert!(finished.error.expect("error").contains("NameError"));
}

#[tokio::test]
async fn panicking_engine_fails_the_job_and_frees_the_worker() {
    let fixture = Fixture::new();
    fixture.write("X.ipynb", MINIMAL_NOTEBOOK);
    let ctx = fixture.context_with(
        Arc::new(PanickingEngine),
        Arc::new(NativeHtmlExporter::new().expect("exporter")),
        1,
    );

    let job = submit_execution(&ctx, "X.ipynb").await.expect("submit");
    let finished = wait_for_terminal(&ctx, job.job_id).await;
    assert_eq!(finished.state, JobState::Failed);
    assert!(finished.error.expect("error").contains("execution task aborted"));
    assert!(finished.finished_at.is_some());
    assert_eq!(ctx.workers.available_permits(), 1);
}

#[tokio::test]
async fn job_history_keeps_only_the_latest_finished_jobs() {
    let fixture = Fixture::new();
    fixture.write("X.ipynb", MINIMAL_NOTEBOOK);
    let ctx = fixture
        .context(Arc::new(CopyEngine::default()))
        .with_job_history(2);

    let mut ids = Vec::new();
    for _ in 0..5 {
        let job = submit_execution(&ctx, "X.ipynb").await.expect("submit");
        wait_for_terminal(&ctx, job.job_id).await;
        ids.push(job.job_id);
    }

    let kept: Vec<JobId> = list_jobs(&ctx).await.iter().map(|job| job.job_id).collect();
    assert_eq!(kept.len(), 2);
    assert!(kept.contains(&ids[3]));
    assert!(kept.contains(&ids[4]));
    let err = job_status(&ctx, ids[0]).await.expect_err("evicted");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn submit_missing_notebook_is_not_found_and_unknown_job_too() {
    let fixture = Fixture::new();
    let ctx = fixture.context(Arc::new(CopyEngine::default()));
    let err = submit_execution(&ctx, "ghost.ipynb").await.expect_err("missing");
    assert_eq!(err.code, ErrorCode::NotFound);
    assert!(list_jobs(&ctx).await.is_empty());

    let err = job_status(&ctx, JobId::new()).await.expect_err("unknown");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn render_executed_notebook_after_execution() {
    let fixture = Fixture::new();
    fixture.write("X.ipynb", MINIMAL_NOTEBOOK);
    let ctx = fixture.context(Arc::new(CopyEngine::default()));
    let outcome = execute_notebook(&ctx, "X.ipynb").await.expect("execute");

    let rendered = render_notebook(&ctx, &outcome.relative_output)
        .await
        .expect("render");
    assert_eq!(rendered.title, "X_executed.ipynb");
    assert!(rendered.html.contains("jp-Notebook"));
    assert!(rendered.html.contains("print(DATASET_DIR)"));
}

#[tokio::test]
async fn render_missing_or_escaping_path_is_not_found() {
    let fixture = Fixture::new();
    let ctx = fixture.context(Arc::new(CopyEngine::default()));
    for path in ["ghost.ipynb", "../notebooks/ghost.ipynb", "executed"] {
        let err = render_notebook(&ctx, path).await.expect_err(path);
        assert_eq!(err.code, ErrorCode::NotFound, "{path}");
    }
}

#[tokio::test]
async fn export_failure_is_internal() {
    let fixture = Fixture::new();
    fixture.write("X.ipynb", MINIMAL_NOTEBOOK);
    let ctx = fixture.context_with(Arc::new(CopyEngine::default()), Arc::new(BrokenExporter), 1);
    let err = render_notebook(&ctx, "X.ipynb").await.expect_err("broken");
    assert_eq!(err.code, ErrorCode::Internal);
}
