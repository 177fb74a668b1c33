use std::sync::Arc;

use anyhow::Context;
use notebook_engine::{
    ExecutionEngine, HtmlExporter, NativeHtmlExporter, NbconvertExporter, PapermillEngine,
};
use server_api::ApiContext;
use storage::{NotebookDirs, NotebookStore};
use tracing::info;

use crate::{
    config::{ExporterKind, Settings},
    pages::Pages,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) pages: Arc<Pages>,
}

impl AppState {
    pub(crate) fn new(api: ApiContext) -> anyhow::Result<Self> {
        let pages = Pages::new().context("failed to load page templates")?;
        Ok(Self {
            api,
            pages: Arc::new(pages),
        })
    }

    /// Builds every collaborator from `settings` and creates the executed
    /// notebook directory.
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let store = NotebookStore::new(NotebookDirs::new(
            &settings.notebook_dir,
            &settings.dataset_dir,
        ));
        store.prepare_directories()?;

        let engine: Arc<dyn ExecutionEngine> = Arc::new(
            PapermillEngine::new(&settings.papermill_bin).with_timeout(settings.execution_timeout()),
        );
        let exporter: Arc<dyn HtmlExporter> = match settings.exporter {
            ExporterKind::Native => Arc::new(
                NativeHtmlExporter::new().context("failed to load notebook fragment template")?,
            ),
            ExporterKind::Nbconvert => Arc::new(
                NbconvertExporter::new(&settings.jupyter_bin)
                    .with_timeout(settings.render_timeout()),
            ),
        };
        info!(
            notebook_dir = %store.dirs().notebook_dir.display(),
            executed_dir = %store.dirs().executed_dir.display(),
            dataset_dir = %store.dirs().dataset_dir.display(),
            engine = engine.name(),
            exporter = exporter.name(),
            max_concurrent_executions = settings.max_concurrent_executions,
            job_history = settings.job_history,
            "notebook runner configured"
        );

        Self::new(
            ApiContext::new(store, engine, exporter, settings.max_concurrent_executions)
                .with_job_history(settings.job_history),
        )
    }
}
