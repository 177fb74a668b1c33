use std::{fs, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Context};
use server_api::DEFAULT_JOB_HISTORY;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_CONFIG_FILE: &str = "server.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExporterKind {
    Native,
    Nbconvert,
}

impl FromStr for ExporterKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "nbconvert" => Ok(Self::Nbconvert),
            other => bail!("unknown exporter '{other}', expected 'native' or 'nbconvert'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_bind: String,
    pub notebook_dir: PathBuf,
    pub dataset_dir: PathBuf,
    pub papermill_bin: PathBuf,
    pub jupyter_bin: PathBuf,
    pub exporter: ExporterKind,
    pub max_concurrent_executions: usize,
    /// Limit for one papermill run.
    pub execution_timeout_secs: Option<u64>,
    /// Limit for one `jupyter nbconvert` export; unused by the native exporter.
    pub render_timeout_secs: Option<u64>,
    /// Finished jobs kept in memory for `GET /jobs`.
    pub job_history: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:5000".into(),
            notebook_dir: PathBuf::from("notebooks"),
            dataset_dir: PathBuf::from("datasets"),
            papermill_bin: PathBuf::from("papermill"),
            jupyter_bin: PathBuf::from("jupyter"),
            exporter: ExporterKind::Native,
            max_concurrent_executions: 2,
            execution_timeout_secs: None,
            render_timeout_secs: None,
            job_history: DEFAULT_JOB_HISTORY,
        }
    }
}

/// Keys accepted in `server.toml`; all optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    bind_addr: Option<String>,
    notebook_dir: Option<PathBuf>,
    dataset_dir: Option<PathBuf>,
    papermill_bin: Option<PathBuf>,
    jupyter_bin: Option<PathBuf>,
    exporter: Option<ExporterKind>,
    max_concurrent_executions: Option<usize>,
    execution_timeout_secs: Option<u64>,
    render_timeout_secs: Option<u64>,
    job_history: Option<usize>,
}

fn timeout(secs: Option<u64>) -> Option<Duration> {
    secs.filter(|secs| *secs > 0).map(Duration::from_secs)
}

impl Settings {
    pub fn execution_timeout(&self) -> Option<Duration> {
        timeout(self.execution_timeout_secs)
    }

    pub fn render_timeout(&self) -> Option<Duration> {
        timeout(self.render_timeout_secs)
    }

    fn apply_file(&mut self, raw: &str) -> anyhow::Result<()> {
        let file_cfg: FileSettings = toml::from_str(raw)?;
        if let Some(v) = file_cfg.bind_addr {
            self.server_bind = v;
        }
        if let Some(v) = file_cfg.notebook_dir {
            self.notebook_dir = v;
        }
        if let Some(v) = file_cfg.dataset_dir {
            self.dataset_dir = v;
        }
        if let Some(v) = file_cfg.papermill_bin {
            self.papermill_bin = v;
        }
        if let Some(v) = file_cfg.jupyter_bin {
            self.jupyter_bin = v;
        }
        if let Some(v) = file_cfg.exporter {
            self.exporter = v;
        }
        if let Some(v) = file_cfg.max_concurrent_executions {
            self.max_concurrent_executions = v;
        }
        if let Some(v) = file_cfg.execution_timeout_secs {
            self.execution_timeout_secs = Some(v);
        }
        if let Some(v) = file_cfg.render_timeout_secs {
            self.render_timeout_secs = Some(v);
        }
        if let Some(v) = file_cfg.job_history {
            self.job_history = v;
        }
        Ok(())
    }

    /// Later names in each list win, so `APP__*` overrides the short form.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        let last = |names: &[&str]| names.iter().filter_map(|name| lookup(name)).last();

        if let Some(v) = last(&["SERVER_BIND", "APP__BIND_ADDR"]) {
            self.server_bind = v;
        }
        if let Some(v) = last(&["NOTEBOOK_DIR", "APP__NOTEBOOK_DIR"]) {
            self.notebook_dir = PathBuf::from(v);
        }
        if let Some(v) = last(&["DATASET_DIR", "APP__DATASET_DIR"]) {
            self.dataset_dir = PathBuf::from(v);
        }
        if let Some(v) = last(&["APP__PAPERMILL_BIN"]) {
            self.papermill_bin = PathBuf::from(v);
        }
        if let Some(v) = last(&["APP__JUPYTER_BIN"]) {
            self.jupyter_bin = PathBuf::from(v);
        }
        if let Some(v) = last(&["APP__EXPORTER"]) {
            self.exporter = v.parse()?;
        }
        if let Some(v) = last(&["APP__MAX_CONCURRENT_EXECUTIONS"]) {
            self.max_concurrent_executions = v
                .parse()
                .with_context(|| format!("invalid APP__MAX_CONCURRENT_EXECUTIONS '{v}'"))?;
        }
        if let Some(v) = last(&["APP__EXECUTION_TIMEOUT_SECS"]) {
            self.execution_timeout_secs = Some(
                v.parse()
                    .with_context(|| format!("invalid APP__EXECUTION_TIMEOUT_SECS '{v}'"))?,
            );
        }
        if let Some(v) = last(&["APP__RENDER_TIMEOUT_SECS"]) {
            self.render_timeout_secs = Some(
                v.parse()
                    .with_context(|| format!("invalid APP__RENDER_TIMEOUT_SECS '{v}'"))?,
            );
        }
        if let Some(v) = last(&["APP__JOB_HISTORY"]) {
            self.job_history = v
                .parse()
                .with_context(|| format!("invalid APP__JOB_HISTORY '{v}'"))?;
        }
        Ok(())
    }
}

/// Defaults, then `server.toml` (or the file named by `APP__CONFIG`) when
/// present, then environment variables.
pub fn load_settings() -> anyhow::Result<Settings> {
    let path = std::env::var("APP__CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => Some(raw),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => None,
        Err(error) => {
            return Err(error).with_context(|| format!("failed to read config file '{path}'"))
        }
    };
    load_settings_from(raw.as_deref(), |name| std::env::var(name).ok())
        .with_context(|| format!("invalid configuration (config file '{path}')"))
}

pub(crate) fn load_settings_from(
    file: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();
    if let Some(raw) = file {
        settings.apply_file(raw)?;
    }
    settings.apply_env(lookup)?;
    if settings.max_concurrent_executions == 0 {
        bail!("max_concurrent_executions must be at least 1");
    }
    debug!(?settings, "configuration loaded");
    Ok(settings)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
