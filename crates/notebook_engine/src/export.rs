use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use minijinja::{context, Environment};
use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag};
use serde::Serialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::{
    error::ExportError,
    notebook::{bundle_text, Cell, Notebook, Output},
    process::run_to_completion,
};

const FRAGMENT_TEMPLATE: &str = "fragment.html";

#[async_trait]
pub trait HtmlExporter: Send + Sync {
    /// Converts the notebook at `path` into an HTML fragment.
    async fn export(&self, path: &Path) -> Result<String, ExportError>;
    fn name(&self) -> &'static str;
}

/// Renders nbformat 4 notebooks in-process with JupyterLab class names.
pub struct NativeHtmlExporter {
    env: Environment<'static>,
}

impl NativeHtmlExporter {
    pub fn new() -> Result<Self, ExportError> {
        let mut env = Environment::new();
        env.add_template(FRAGMENT_TEMPLATE, include_str!("../templates/fragment.html"))?;
        Ok(Self { env })
    }

    pub fn render(&self, notebook: &Notebook) -> Result<String, ExportError> {
        let cells: Vec<CellView> = notebook.cells.iter().filter_map(CellView::from_cell).collect();
        let template = self.env.get_template(FRAGMENT_TEMPLATE)?;
        Ok(template.render(context! {
            cells => cells,
            nbformat => format!("{}.{}", notebook.nbformat, notebook.nbformat_minor),
            language => notebook.kernel_language(),
        })?)
    }
}

#[async_trait]
impl HtmlExporter for NativeHtmlExporter {
    async fn export(&self, path: &Path) -> Result<String, ExportError> {
        let label = path.display().to_string();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ExportError::Read {
                path: label.clone(),
                source,
            })?;
        let notebook = Notebook::parse(&label, &text)?;
        debug!(path = %path.display(), cells = notebook.cells.len(), "rendering notebook");
        self.render(&notebook)
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

/// Delegates to `jupyter nbconvert --to html --template <template> --stdout`.
#[derive(Debug, Clone)]
pub struct NbconvertExporter {
    program: PathBuf,
    template: String,
    timeout: Option<Duration>,
}

impl NbconvertExporter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            template: "lab".to_string(),
            timeout: None,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, path: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["nbconvert", "--to", "html", "--template"])
            .arg(&self.template)
            .arg("--stdout")
            .arg(path);
        command
    }
}

#[async_trait]
impl HtmlExporter for NbconvertExporter {
    async fn export(&self, path: &Path) -> Result<String, ExportError> {
        let program = self.program.display().to_string();
        let output = run_to_completion(self.command(path), &program, self.timeout).await?;
        Ok(String::from_utf8(output.stdout)?)
    }

    fn name(&self) -> &'static str {
        "nbconvert"
    }
}

#[derive(Debug, Serialize)]
struct CellView {
    kind: &'static str,
    prompt: Option<u32>,
    source: String,
    /// Rendered HTML for markdown cells.
    rendered: Option<String>,
    outputs: Vec<OutputView>,
}

impl CellView {
    fn from_cell(cell: &Cell) -> Option<Self> {
        let view = match cell {
            Cell::Code {
                source,
                execution_count,
                outputs,
            } => CellView {
                kind: "code",
                prompt: *execution_count,
                source: source.joined(),
                rendered: None,
                outputs: outputs.iter().filter_map(OutputView::from_output).collect(),
            },
            Cell::Markdown { source } => {
                let source = source.joined();
                CellView {
                    kind: "markdown",
                    prompt: None,
                    rendered: Some(render_markdown(&source)),
                    source,
                    outputs: Vec::new(),
                }
            }
            Cell::Raw { source } => CellView {
                kind: "raw",
                prompt: None,
                source: source.joined(),
                rendered: None,
                outputs: Vec::new(),
            },
            Cell::Unknown => return None,
        };
        Some(view)
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum OutputView {
    Stream { stream: String, text: String },
    Html { html: String },
    Image { mime: &'static str, data: String },
    Text { text: String },
    Error {
        ename: String,
        evalue: String,
        traceback: String,
    },
}

/// Richest representation first, as JupyterLab picks it.
const IMAGE_MIME_TYPES: [&str; 2] = ["image/png", "image/jpeg"];

impl OutputView {
    fn from_output(output: &Output) -> Option<Self> {
        match output {
            Output::Stream { name, text } => Some(OutputView::Stream {
                stream: name.clone(),
                text: text.joined(),
            }),
            Output::ExecuteResult { data, .. } | Output::DisplayData { data } => {
                Self::from_bundle(data)
            }
            Output::Error {
                ename,
                evalue,
                traceback,
            } => Some(OutputView::Error {
                ename: ename.clone(),
                evalue: evalue.clone(),
                traceback: strip_ansi(&traceback.join("\n")),
            }),
            Output::Unknown => None,
        }
    }

    fn from_bundle(data: &std::collections::BTreeMap<String, Value>) -> Option<Self> {
        if let Some(html) = data.get("text/html").and_then(bundle_text) {
            return Some(OutputView::Html { html });
        }
        for mime in IMAGE_MIME_TYPES {
            if let Some(encoded) = data.get(mime).and_then(bundle_text) {
                let data = encoded.split_whitespace().collect();
                return Some(OutputView::Image { mime, data });
            }
        }
        data.get("text/plain")
            .and_then(bundle_text)
            .map(|text| OutputView::Text { text })
    }
}

/// CommonMark plus GFM tables and strikethrough. Raw HTML in the cell is shown
/// as text and `javascript:` link targets are neutralised.
fn render_markdown(source: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    let events = Parser::new_ext(source, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) if is_script_url(&dest_url) => Event::Start(Tag::Link {
            link_type,
            dest_url: CowStr::Borrowed("#"),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) if is_script_url(&dest_url) => Event::Start(Tag::Image {
            link_type,
            dest_url: CowStr::Borrowed(""),
            title,
            id,
        }),
        other => other,
    });
    let mut out = String::with_capacity(source.len() * 3 / 2);
    html::push_html(&mut out, events);
    out
}

fn is_script_url(url: &str) -> bool {
    let scheme: String = url
        .trim_start()
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .take(11)
        .collect();
    scheme.eq_ignore_ascii_case("javascript:")
}

/// Drops terminal colour sequences (`ESC [ ... letter`) from kernel tracebacks.
fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
#[path = "tests/export_tests.rs"]
mod tests;
