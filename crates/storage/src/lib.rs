use anyhow::{Context, Result};
use std::{
    fs,
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

use shared::domain::{executed_file_name, executed_relative_path, is_listable_notebook, EXECUTED_SUBDIR};

/// Directory layout every request resolves paths against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookDirs {
    pub notebook_dir: PathBuf,
    pub executed_dir: PathBuf,
    pub dataset_dir: PathBuf,
}

impl NotebookDirs {
    pub fn new(notebook_dir: impl Into<PathBuf>, dataset_dir: impl Into<PathBuf>) -> Self {
        let notebook_dir = notebook_dir.into();
        Self {
            executed_dir: notebook_dir.join(EXECUTED_SUBDIR),
            notebook_dir,
            dataset_dir: dataset_dir.into(),
        }
    }
}

/// A source notebook and the artifact executing it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTarget {
    pub source_name: String,
    pub source: PathBuf,
    pub output: PathBuf,
    /// Output path relative to the notebook directory, `/`-separated.
    pub relative_output: String,
}

#[derive(Debug, Clone)]
pub struct NotebookStore {
    dirs: Arc<NotebookDirs>,
}

impl NotebookStore {
    pub fn new(dirs: NotebookDirs) -> Self {
        Self {
            dirs: Arc::new(dirs),
        }
    }

    pub fn dirs(&self) -> &NotebookDirs {
        &self.dirs
    }

    /// Creates the executed-artifact directory. Called once at startup.
    pub fn prepare_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.dirs.executed_dir).with_context(|| {
            format!(
                "failed to create executed notebook directory '{}'",
                self.dirs.executed_dir.display()
            )
        })?;
        Ok(())
    }

    pub async fn list_notebooks(&self) -> Result<Vec<String>> {
        let dir = &self.dirs.notebook_dir;
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("failed to read notebook directory '{}'", dir.display()))?;

        let mut notebooks = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("failed to read entry in '{}'", dir.display()))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_listable_notebook(&name) {
                continue;
            }
            if is_file(&entry.path()).await? {
                notebooks.push(name);
            }
        }
        notebooks.sort();
        debug!(count = notebooks.len(), "listed notebooks");
        Ok(notebooks)
    }

    /// Paths for executing `filename`. `None` when the name is not a plain
    /// file name inside the notebook directory or the source does not exist.
    pub async fn locate_source(&self, filename: &str) -> Result<Option<ExecutionTarget>> {
        let Some(target) = self.execution_target(filename) else {
            return Ok(None);
        };
        if !is_file(&target.source).await? {
            return Ok(None);
        }
        Ok(Some(target))
    }

    pub fn execution_target(&self, filename: &str) -> Option<ExecutionTarget> {
        if !is_plain_file_name(filename) {
            return None;
        }
        Some(ExecutionTarget {
            source_name: filename.to_string(),
            source: self.dirs.notebook_dir.join(filename),
            output: self.dirs.executed_dir.join(executed_file_name(filename)),
            relative_output: executed_relative_path(filename),
        })
    }

    /// Resolves a `/`-separated path below the notebook directory for viewing.
    pub async fn locate_notebook(&self, relative_path: &str) -> Result<Option<PathBuf>> {
        let Some(path) = self.resolve_relative(relative_path) else {
            return Ok(None);
        };
        if !is_file(&path).await? {
            return Ok(None);
        }
        Ok(Some(path))
    }

    fn resolve_relative(&self, relative_path: &str) -> Option<PathBuf> {
        let relative = Path::new(relative_path);
        let mut resolved = self.dirs.notebook_dir.clone();
        let mut depth = 0usize;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        (depth > 0).then_some(resolved)
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == name
    )
}

async fn is_file(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(error) => {
            Err(error).with_context(|| format!("failed to stat '{}'", path.display()))
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
