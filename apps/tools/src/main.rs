use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use notebook_engine::{
    ExecutionEngine, HtmlExporter, NativeHtmlExporter, NbconvertExporter, PapermillEngine,
};
use server_api::ApiContext;
use storage::{NotebookDirs, NotebookStore};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "List, execute and render notebooks without starting the server")]
struct Cli {
    #[arg(long, env = "NOTEBOOK_DIR", default_value = "notebooks")]
    notebook_dir: PathBuf,
    #[arg(long, env = "DATASET_DIR", default_value = "datasets")]
    dataset_dir: PathBuf,
    #[arg(long, default_value = "papermill")]
    papermill_bin: PathBuf,
    #[arg(long, default_value = "jupyter")]
    jupyter_bin: PathBuf,
    #[arg(long, value_enum, default_value_t = Exporter::Native)]
    exporter: Exporter,
    /// Seconds before a papermill or nbconvert run is killed; unlimited when omitted.
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Exporter {
    Native,
    Nbconvert,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the notebooks the index page would show.
    List,
    Execute {
        filename: String,
    },
    Render {
        /// Path below the notebook directory, e.g. `executed/report_executed.ipynb`.
        path: String,
        /// Write the HTML fragment here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let store = NotebookStore::new(NotebookDirs::new(&cli.notebook_dir, &cli.dataset_dir));
    store.prepare_directories()?;
    let timeout = cli.timeout_secs.map(Duration::from_secs);
    let engine: Arc<dyn ExecutionEngine> =
        Arc::new(PapermillEngine::new(&cli.papermill_bin).with_timeout(timeout));
    let exporter: Arc<dyn HtmlExporter> = match cli.exporter {
        Exporter::Native => Arc::new(NativeHtmlExporter::new()?),
        Exporter::Nbconvert => {
            Arc::new(NbconvertExporter::new(&cli.jupyter_bin).with_timeout(timeout))
        }
    };
    let ctx = ApiContext::new(store, engine, exporter, 1);

    match cli.command {
        Command::List => {
            for notebook in server_api::list_notebooks(&ctx).await? {
                println!("{}", notebook.name);
            }
        }
        Command::Execute { filename } => {
            let outcome = server_api::execute_notebook(&ctx, &filename).await?;
            println!(
                "executed {filename} -> {} in {:.1}s",
                outcome.relative_output,
                outcome.duration.as_secs_f64()
            );
        }
        Command::Render { path, output } => {
            let rendered = server_api::render_notebook(&ctx, &path).await?;
            match output {
                Some(output) => {
                    tokio::fs::write(&output, rendered.html)
                        .await
                        .with_context(|| format!("failed to write '{}'", output.display()))?;
                    println!("wrote {}", output.display());
                }
                None => println!("{}", rendered.html),
            }
        }
    }

    Ok(())
}
