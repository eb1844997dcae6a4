use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use discovery_pipeline::config::{PipelineSettings, APP_NAME, APP_VERSION};
use discovery_pipeline::session_store::{InMemorySessionStore, SessionStore};
use discovery_pipeline::{JobSnapshot, JobStatus, PipelineService, UploadedFile};

#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = APP_VERSION, about = "Extract and analyze discovery requests from a PDF")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline on one PDF and print the session as JSON
    Run {
        pdf: PathBuf,
        /// Stop after request extraction
        #[arg(long)]
        skip_analysis: bool,
        /// Objection preset to analyze with
        #[arg(long, default_value = "default")]
        preset: String,
        /// Override ANALYSIS_CHUNK_SIZE
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Give up waiting on a job after this many seconds
        #[arg(long, default_value_t = 900)]
        timeout_secs: u64,
    },
}

fn main() -> Result<()> {
    discovery_pipeline::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            pdf,
            skip_analysis,
            preset,
            chunk_size,
            timeout_secs,
        } => run(pdf, skip_analysis, preset, chunk_size, Duration::from_secs(timeout_secs)),
    }
}

fn run(pdf: PathBuf, skip_analysis: bool, preset: String, chunk_size: Option<usize>, timeout: Duration) -> Result<()> {
    let mut settings = PipelineSettings::from_env();
    if let Some(size) = chunk_size {
        settings.chunk_size = size.max(1);
    }

    let bytes = std::fs::read(&pdf).with_context(|| format!("reading {}", pdf.display()))?;
    let filename = pdf
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.pdf".to_string());

    let store = Arc::new(InMemorySessionStore::new());
    let mut session = store.create()?;
    session.objection_preset_id = preset;
    store.update(session.clone())?;

    let service = PipelineService::from_settings(&settings, store.clone())?;
    tracing::info!(session_id = %session.id, backend = service.backend_name(), "Session created");

    let job = service.start_pipeline(&session.id, UploadedFile::new(filename, bytes))?;
    let extracted = service.wait(job, Duration::from_millis(250), timeout, print_progress)?;
    if extracted.status == JobStatus::Failed {
        bail!(extracted.error.unwrap_or_else(|| "pipeline failed".to_string()));
    }

    let analysis = if skip_analysis {
        None
    } else {
        let job = service.analyze_with_preset(&session.id)?;
        let done = service.wait(job, Duration::from_millis(250), timeout, print_progress)?;
        if done.status == JobStatus::Failed {
            bail!(done.error.unwrap_or_else(|| "analysis failed".to_string()));
        }
        Some(done)
    };

    let session = store
        .get(&session.id)?
        .context("session disappeared during the run")?;
    let output = json!({
        "session": session,
        "pipeline": extracted.result,
        "analysis": analysis.as_ref().map(|a| json!({
            "degraded": a.degraded,
            "result": a.result,
        })),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_progress(snapshot: &JobSnapshot) {
    eprintln!("[{:>3}%] {} {}", snapshot.progress, snapshot.kind, snapshot.message);
}
