use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("'{program}' did not finish within {timeout_secs}s")]
    Timeout { program: String, timeout_secs: u64 },
    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("failed waiting for '{program}': {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to read notebook '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("'{path}' is not a valid notebook: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("nbformat {0} is not supported, expected 4")]
    UnsupportedVersion(u32),
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),
    #[error(transparent)]
    Process(#[from] EngineError),
    #[error("exporter produced non UTF-8 output")]
    Utf8(#[from] std::string::FromUtf8Error),
}
