use anyhow::Context;
use clap::Parser;
use facts_normalizer::config::{FileConfig, RunOverrides};
use facts_normalizer::observability::{init_logging, metrics};
use facts_normalizer::{run_pipeline, CancellationToken, RunConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "facts_normalizer")]
#[command(about = "Normalize SEC company-facts documents into columnar tables and a sentence index")]
#[command(version)]
struct Cli {
    /// Directory holding CIK##########.json documents
    #[arg(long)]
    input_dir: Option<PathBuf>,
    /// Directory receiving sec/ and rag/ output
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Optional TOML file with a [run] table of defaults
    #[arg(long)]
    config: Option<PathBuf>,
    /// Replace existing output instead of refusing to run
    #[arg(long)]
    force: bool,
    /// Abort on the first per-document failure
    #[arg(long)]
    fail_fast: bool,
    /// Per-document diagnostics
    #[arg(short, long)]
    verbose: bool,
    /// Maximum documents processed at once
    #[arg(long)]
    concurrency: Option<usize>,
    /// Per-document processing timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let _log_guard = init_logging(cli.verbose);
    metrics::init();

    let file_config = match &cli.config {
        Some(path) => FileConfig::load(path)
            .with_context(|| format!("loading config file {}", path.display()))?,
        None => FileConfig::default(),
    };
    let overrides = RunOverrides {
        input_dir: cli.input_dir,
        output_dir: cli.output_dir,
        force: cli.force,
        fail_fast: cli.fail_fast,
        verbose: cli.verbose,
        concurrency: cli.concurrency,
        document_timeout_secs: cli.timeout_secs,
    };
    let config = RunConfig::from_sources(file_config, overrides).context("invalid run configuration")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let summary = run_pipeline(&config, cancel)
        .await
        .context("normalization run failed")?;
    let manifest = &summary.manifest;

    println!("\n📊 Normalization results ({})", manifest.run_id);
    println!("   Documents: {}", manifest.outcomes.total_documents);
    println!("   Valid: {}", manifest.outcomes.valid);
    println!("   Repaired: {}", manifest.outcomes.repaired);
    println!("   Skipped (empty): {}", manifest.outcomes.skipped_empty);
    println!("   Failed: {}", manifest.outcomes.failed);
    println!("   Record defects: {}", manifest.outcomes.record_defects);
    println!(
        "   Facts: {} ({} preferred), sentences: {}",
        manifest.tables.facts, manifest.tables.preferred_facts, manifest.tables.sentences
    );
    println!("   Output: {}", summary.output_dir.display());

    if manifest.has_failures() {
        println!("\n⚠️  Failures were recorded; see sec/manifest.json");
        return Ok(ExitCode::FAILURE);
    }
    info!("Run completed without failures");
    Ok(ExitCode::SUCCESS)
}
