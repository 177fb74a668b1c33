use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

pub const NOTEBOOK_EXTENSION: &str = "ipynb";
pub const EXECUTED_PREFIX: &str = "executed";
pub const EXECUTED_SUFFIX: &str = "_executed";
pub const EXECUTED_SUBDIR: &str = "executed";

/// Parameter name the execution engine receives the dataset directory under.
pub const DATASET_PARAMETER: &str = "DATASET_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// `analysis.ipynb` -> `analysis_executed.ipynb`. Only the last extension is
/// dropped, and the result always carries the notebook extension.
pub fn executed_file_name(source_name: &str) -> String {
    let stem = match source_name.rfind('.') {
        Some(idx) if idx > 0 => &source_name[..idx],
        _ => source_name,
    };
    format!("{stem}{EXECUTED_SUFFIX}.{NOTEBOOK_EXTENSION}")
}

/// Whether a directory entry belongs in the catalog listing.
pub fn is_listable_notebook(file_name: &str) -> bool {
    file_name.ends_with(&format!(".{NOTEBOOK_EXTENSION}")) && !file_name.starts_with(EXECUTED_PREFIX)
}

/// Path of the executed artifact relative to the notebook directory.
pub fn executed_relative_path(source_name: &str) -> String {
    format!("{EXECUTED_SUBDIR}/{}", executed_file_name(source_name))
}

pub fn execute_route(source_name: &str) -> String {
    encoded_route(&["execute", source_name])
}

/// `relative_path` uses `/` between directories, as in the view route itself.
pub fn view_route(relative_path: &str) -> String {
    let mut segments = vec!["notebook"];
    segments.extend(relative_path.split('/').filter(|s| !s.is_empty()));
    encoded_route(&segments)
}

/// Route the rendered view of an executed notebook lives under.
pub fn executed_view_route(source_name: &str) -> String {
    view_route(&executed_relative_path(source_name))
}

fn encoded_route(segments: &[&str]) -> String {
    let Ok(mut url) = Url::parse("http://localhost/") else {
        return format!("/{}", segments.join("/"));
    };
    if let Ok(mut path) = url.path_segments_mut() {
        path.clear().extend(segments);
    }
    url.path().to_string()
}
