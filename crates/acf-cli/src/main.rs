mod bundle;

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use acf_adapters::{adapter_for_university, UniversityAdapter};
use acf_core::Lexicon;
use acf_extract::{load_document, NameValidator};
use acf_fusion::{FacultyInput, FacultyOutcome, FusionConfig, FusionEngine, RunContext};
use acf_storage::{DocumentSource, DocumentStore, InMemoryDocuments};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::bundle::Bundle;

const DOCUMENT_LOAD_CONCURRENCY: usize = 8;

#[derive(Debug, Parser)]
#[command(name = "acf-cli")]
#[command(about = "Admissions catalog fusion command-line interface")]
struct Cli {
    /// Keyword tables for the heuristics; built-in defaults when the file is absent.
    #[arg(long, global = true, default_value = "rules/lexicon.yaml")]
    lexicon: PathBuf,
    /// Directory holding per-institution `<slug>.yaml` rules.
    #[arg(long, global = true, default_value = "rules")]
    rules: PathBuf,
    /// Hash-addressed document store root.
    #[arg(long, global = true, default_value = "data/documents")]
    store: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fuse faculty bundles and emit one JSON outcome per faculty.
    Fuse {
        #[arg(required = true)]
        bundles: Vec<PathBuf>,
        /// Write `<out>/<run_id>/<faculty>.json` instead of printing.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Put a downloaded document into the store under its url.
    Ingest {
        #[arg(long)]
        url: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Score a single program name.
    Validate { name: String },
    /// Rank a bundle's candidates, inspecting every document that is available.
    Rank { bundle: PathBuf },
}

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    run_id: String,
    started_at: String,
    faculties: usize,
    failed: Vec<FailedFaculty>,
    outcomes: &'a [FacultyOutcome],
}

#[derive(Debug, Serialize)]
struct FailedFaculty {
    faculty_slug: String,
    error: String,
}

impl FailedFaculty {
    fn new(faculty_slug: String, err: &anyhow::Error) -> Self {
        warn!(faculty = %faculty_slug, error = %format!("{err:#}"), "faculty skipped");
        Self {
            faculty_slug,
            error: format!("{err:#}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let lexicon = load_lexicon(&cli.lexicon)?;

    match &cli.command {
        Commands::Fuse { bundles, out } => fuse(&cli, &lexicon, bundles, out.as_deref()).await?,
        Commands::Ingest { url, file } => {
            let bytes = tokio::fs::read(file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let stored = DocumentStore::new(&cli.store).store_document(url, &bytes).await?;
            println!(
                "stored {} -> {} ({} bytes{})",
                url,
                stored.absolute_path.display(),
                stored.byte_size,
                if stored.deduplicated { ", unchanged" } else { "" }
            );
        }
        Commands::Validate { name } => {
            let verdict = NameValidator::new(&lexicon).validate_program_name(name);
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        }
        Commands::Rank { bundle } => rank(&cli, &lexicon, bundle).await?,
    }

    Ok(())
}

fn load_lexicon(path: &Path) -> Result<Lexicon> {
    if path.exists() {
        Lexicon::from_path(path)
    } else {
        warn!(path = %path.display(), "lexicon file not found, using built-in tables");
        Ok(Lexicon::default())
    }
}

fn load_adapter(rules: &Path, lexicon: &Lexicon, university: &str) -> Result<Box<dyn UniversityAdapter>> {
    adapter_for_university(university, lexicon, rules)?
        .with_context(|| format!("no adapter for university `{university}`"))
}

fn build_engine(lexicon: &Lexicon) -> Result<FusionEngine> {
    let config = FusionConfig::from_env().context("reading fusion configuration")?;
    FusionEngine::new(config, lexicon).context("building fusion engine")
}

async fn fuse(cli: &Cli, lexicon: &Lexicon, bundles: &[PathBuf], out: Option<&Path>) -> Result<()> {
    let engine = Arc::new(build_engine(lexicon)?);
    let store = DocumentStore::new(&cli.store);
    let run = RunContext::start();
    info!(run_id = %run.run_id, bundles = bundles.len(), "fusion run started");

    let (outcomes, failed) = run_fusion(engine, lexicon, &cli.rules, &store, bundles, run).await;
    info!(
        run_id = %run.run_id,
        fused = outcomes.len(),
        failed = failed.len(),
        "fusion run finished"
    );

    let report = RunReport {
        run_id: run.run_id.to_string(),
        started_at: run.now.to_rfc3339(),
        faculties: bundles.len(),
        failed,
        outcomes: &outcomes,
    };
    match out {
        Some(dir) => write_reports(dir, &report).await?,
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

/// Fuses every bundle it can. A bundle that cannot be read or prepared, or whose
/// fusion errors or panics, is reported in the failed list and the others carry on.
async fn run_fusion(
    engine: Arc<FusionEngine>,
    lexicon: &Lexicon,
    rules: &Path,
    store: &DocumentStore,
    bundles: &[PathBuf],
    run: RunContext,
) -> (Vec<FacultyOutcome>, Vec<FailedFaculty>) {
    let mut failed = Vec::new();
    let mut tasks = JoinSet::new();
    for path in bundles {
        let bundle = match Bundle::from_path(path) {
            Ok(bundle) => bundle,
            Err(err) => {
                failed.push(FailedFaculty::new(path.display().to_string(), &err));
                continue;
            }
        };
        let faculty_slug = bundle.faculty_slug.clone();
        let (input, documents) = match prepare_faculty(&engine, lexicon, rules, store, bundle, &run).await {
            Ok(prepared) => prepared,
            Err(err) => {
                failed.push(FailedFaculty::new(faculty_slug, &err));
                continue;
            }
        };

        let engine = Arc::clone(&engine);
        tasks.spawn_blocking(move || {
            let outcome = catch_panic(|| engine.process_faculty(input, &documents, &run));
            (faculty_slug, outcome)
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(outcome))) => outcomes.push(outcome),
            Ok((faculty_slug, Err(error))) => {
                warn!(faculty = %faculty_slug, error = %error, "faculty aborted");
                failed.push(FailedFaculty { faculty_slug, error });
            }
            // panics are caught inside the task, so only cancellation lands here
            Err(err) => warn!(error = %err, "fusion task cancelled"),
        }
    }
    outcomes.sort_by(|a, b| a.faculty_slug.cmp(&b.faculty_slug));
    (outcomes, failed)
}

async fn prepare_faculty(
    engine: &FusionEngine,
    lexicon: &Lexicon,
    rules: &Path,
    store: &DocumentStore,
    bundle: Bundle,
    run: &RunContext,
) -> Result<(FacultyInput, InMemoryDocuments)> {
    let adapter = load_adapter(rules, lexicon, &bundle.university)?;
    let prepared = bundle.prepare(adapter.as_ref(), engine.config().admission_year, run.now)?;
    let documents = prepared.load_documents(store, DOCUMENT_LOAD_CONCURRENCY).await;
    Ok((prepared.into_input(adapter.as_ref(), &documents), documents))
}

/// Runs `f`, turning its error or a panic into a message.
fn catch_panic<T, E: Display>(f: impl FnOnce() -> Result<T, E>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(|err| err.to_string()),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("fusion panicked: {message}"))
        }
    }
}

async fn write_reports(out: &Path, report: &RunReport<'_>) -> Result<()> {
    let run_dir = out.join(&report.run_id);
    tokio::fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;
    for outcome in report.outcomes {
        let path = run_dir.join(format!("{}.json", outcome.faculty_slug));
        let bytes = serde_json::to_vec_pretty(outcome).context("serializing faculty outcome")?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
    }
    let path = run_dir.join("run_summary.json");
    let summary = serde_json::json!({
        "run_id": report.run_id,
        "started_at": report.started_at,
        "faculties": report.faculties,
        "failed": report.failed,
        "summaries": report
            .outcomes
            .iter()
            .map(|o| (o.faculty_slug.clone(), &o.summary))
            .collect::<std::collections::BTreeMap<_, _>>(),
    });
    tokio::fs::write(&path, serde_json::to_vec_pretty(&summary)?)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    println!("wrote {} faculty outcomes to {}", report.outcomes.len(), run_dir.display());
    Ok(())
}

async fn rank(cli: &Cli, lexicon: &Lexicon, path: &Path) -> Result<()> {
    let engine = build_engine(lexicon)?;
    let bundle = Bundle::from_path(path)?;
    let adapter = load_adapter(&cli.rules, lexicon, &bundle.university)?;
    let prepared = bundle.prepare(adapter.as_ref(), engine.config().admission_year, chrono::Utc::now())?;
    let documents = prepared
        .load_documents(&DocumentStore::new(&cli.store), DOCUMENT_LOAD_CONCURRENCY)
        .await;

    let mut ranked = engine.ranker().rank(prepared.input.candidates);
    for candidate in &mut ranked {
        let Ok(bytes) = documents.fetch(&candidate.url) else {
            continue;
        };
        match load_document(&bytes) {
            Ok(document) => candidate.metrics = Some(engine.ranker().evaluate_content(&document)),
            Err(err) => warn!(url = %candidate.url, error = %err, "document unreadable"),
        }
    }
    println!("{}", serde_json::to_string_pretty(&ranked)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
    }

    #[tokio::test]
    async fn broken_bundles_do_not_stop_the_run() {
        let root = workspace_root();
        let dir = tempdir().unwrap();
        let unknown = dir.path().join("unknown_university.json");
        std::fs::write(&unknown, r#"{"faculty_slug":"drept","university":"nowhere"}"#).unwrap();
        let bundles = vec![
            root.join("fixtures/bundles/ace.json"),
            unknown,
            dir.path().join("missing.json"),
        ];

        let lexicon = Lexicon::default();
        let engine = Arc::new(build_engine(&lexicon).unwrap());
        let store = DocumentStore::new(dir.path().join("store"));
        let (outcomes, failed) =
            run_fusion(engine, &lexicon, &root.join("rules"), &store, &bundles, RunContext::start()).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].faculty_slug, "ace");
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].faculty_slug, "drept");
        assert!(failed[0].error.contains("nowhere"));
        assert!(failed[1].faculty_slug.ends_with("missing.json"));
    }

    #[test]
    fn panicking_fusion_becomes_an_error() {
        let outcome: Result<(), String> = catch_panic(|| -> Result<(), String> { panic!("bad table") });
        assert_eq!(outcome.unwrap_err(), "fusion panicked: bad table");

        let formatted: Result<u32, String> = catch_panic(|| -> Result<u32, String> { panic!("row {}", 7) });
        assert_eq!(formatted.unwrap_err(), "fusion panicked: row 7");

        let failed: Result<u32, String> = catch_panic(|| Err::<u32, _>("contract violated"));
        assert_eq!(failed.unwrap_err(), "contract violated");
    }
}
