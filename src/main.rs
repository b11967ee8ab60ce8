//! scene-consensus - command line entry point
//!
//! Runs the consensus pipeline over a question file, reports gaps in the
//! result directory and exports the final answers.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scene_consensus::evidence::FrameDirectory;
use scene_consensus::gaps::{export_answers, scan_gaps};
use scene_consensus::llm::OpenAiClient;
use scene_consensus::source::load_tasks;
use scene_consensus::store::{AttemptStore, FileResultStore};
use scene_consensus::util::parse_id_list;
use scene_consensus::{Config, Pipeline, RunMode, RunSelection};

#[derive(Parser)]
#[command(name = "scene-consensus")]
#[command(about = "Multi-attempt consensus answering for driving-scene questions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sample attempts and reason over them
    Run(RunArgs),
    /// Sample attempts only and store them
    Sample(RunArgs),
    /// Reason over stored attempts
    Reason(RunArgs),
    /// List expected ids without a labelled result
    Gaps,
    /// Write labelled results to the answers CSV
    Export {
        /// Output path (defaults to ANSWERS_CSV)
        #[arg(long)]
        output: Option<std::path::PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Only process these ids (comma separated)
    #[arg(long, conflicts_with = "gaps")]
    only: Option<String>,

    /// Only process expected ids that have no labelled result yet
    #[arg(long)]
    gaps: bool,

    /// Sampling attempts per task
    #[arg(long)]
    attempts: Option<usize>,

    /// Maximum concurrent remote calls
    #[arg(long)]
    max_concurrent: Option<usize>,
}

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scene_consensus=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;

    match cli.command {
        Command::Run(args) => run(&mut config, args, RunMode::Full).await,
        Command::Sample(args) => run(&mut config, args, RunMode::SampleOnly).await,
        Command::Reason(args) => run(&mut config, args, RunMode::ReasonOnly).await,
        Command::Gaps => gaps(&config).await,
        Command::Export { output } => export(&config, output).await,
    }
}

async fn run(config: &mut Config, args: RunArgs, mode: RunMode) -> Result<()> {
    if let Some(attempts) = args.attempts {
        config.attempts_per_task = attempts;
    }
    if let Some(limit) = args.max_concurrent {
        config.max_concurrent_requests = limit;
        config.task_parallelism = config.task_parallelism.max(limit);
    }
    config.validate()?;
    let api_key = config.require_api_key()?.to_string();

    let results = FileResultStore::open(&config.paths.results_dir)
        .await
        .context("Failed to open result directory")?;
    let _lock = results.lock()?;
    let attempts = AttemptStore::open(&config.paths.attempts_dir)
        .await
        .context("Failed to open attempt directory")?;

    let selection = if args.gaps {
        let report = scan_gaps(&results, config.expected_ids.clone()).await?;
        for warning in &report.warnings {
            warn!("{}", warning);
        }
        report.selection(config.id_width)
    } else if let Some(raw) = args.only {
        RunSelection::Only(parse_id_list(&raw))
    } else if let Some(ids) = config.only_ids.clone() {
        RunSelection::Only(ids)
    } else {
        RunSelection::All
    };
    if selection.is_empty() {
        info!("Nothing selected, every expected id already has an answer");
        return Ok(());
    }

    let tasks = load_tasks(&config.paths.questions_csv)?;
    info!(
        "Loaded {} tasks from {} (sampler={}, reasoner={})",
        tasks.len(),
        config.paths.questions_csv.display(),
        config.sampler_model,
        config.reasoner_model
    );

    let client = OpenAiClient::new(config.api_url.clone(), api_key, config.call_timeout)?;
    let evidence = FrameDirectory::new(&config.paths.frames_dir, config.frames_per_task);
    let pipeline = Pipeline::new(
        config.pipeline_settings(),
        Arc::new(client),
        Arc::new(evidence),
        attempts,
        Arc::new(results),
    );

    let report = pipeline.run(&tasks, &selection, mode).await;
    println!("{}", report);
    Ok(())
}

async fn gaps(config: &Config) -> Result<()> {
    let results = FileResultStore::open(&config.paths.results_dir).await?;
    let report = scan_gaps(&results, config.expected_ids.clone()).await?;

    for warning in &report.warnings {
        println!("warning: {}", warning);
    }
    if report.is_complete() {
        println!("No gaps: all {} expected ids have an answer", report.succeeded.len());
    } else {
        let ids: Vec<String> = report
            .missing
            .iter()
            .map(|n| format!("{:0width$}", n, width = config.id_width))
            .collect();
        println!("{} missing: {}", ids.len(), ids.join(","));
    }
    Ok(())
}

async fn export(config: &Config, output: Option<std::path::PathBuf>) -> Result<()> {
    let results = FileResultStore::open(&config.paths.results_dir).await?;
    let path = output.unwrap_or_else(|| config.paths.answers_csv.clone());
    let report = export_answers(&results, config.expected_ids.clone(), config.id_width, &path)
        .await
        .with_context(|| format!("Failed to export answers to {}", path.display()))?;
    println!(
        "Wrote {} answers to {} ({} missing)",
        report.succeeded.len(),
        path.display(),
        report.missing.len()
    );
    Ok(())
}
