//! Adapters around the external tools that execute notebooks and export them
//! to HTML.

mod error;
mod export;
mod notebook;
mod papermill;
mod process;

pub use error::{EngineError, ExportError};
pub use export::{HtmlExporter, NativeHtmlExporter, NbconvertExporter};
pub use notebook::{Cell, MultilineText, Notebook, Output};
pub use papermill::{ExecutionEngine, ExecutionReport, ExecutionRequest, PapermillEngine};
