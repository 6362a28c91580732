//! dgm CLI - Darwinian evolution of specialist agents
//!
//! Usage:
//!   dgm init [path]                 Write default config to .dgm/config.toml
//!   dgm run --seed-agent <file> ... Evolve an agent against a dataset
//!   dgm archive show [--agent <id>] Print the lineage forest, or one agent
//!   dgm archive best                Print (and optionally export) the champion

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dgm_agent::{
    AgentRunner, CommandRunner, ExactMatch, FinalAnswerMatch, HttpOracle, RetryPolicy,
    RetryingRunner, Scorer,
};
use dgm_core::dataset::{load_jsonl, DEFAULT_PARTITION_SEED};
use dgm_core::{AgentCode, AgentId, DatasetSplits, FieldNames, RunConfig, SplitSizes};
use dgm_evolution::{Archive, ArchiveLog};
use dgm_orchestrator::{EvolutionDriver, RunReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const ARCHIVE_LOG: &str = "archive.jsonl";

#[derive(Parser)]
#[command(name = "dgm")]
#[command(author, version, about = "Darwinian evolution of specialist agents")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    Init {
        /// Project directory (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Run the generational loop
    Run(RunArgs),

    /// Inspect a run's archive
    Archive {
        #[command(subcommand)]
        action: ArchiveCommands,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Generation-0 agent program
    #[arg(long, value_name = "FILE")]
    seed_agent: PathBuf,

    /// Config file (defaults to <root>/.dgm/config.toml, then built-in defaults)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Project directory holding .dgm/
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Single JSONL file partitioned into train/validation/test
    #[arg(long, value_name = "FILE", conflicts_with_all = ["train", "validation", "test"])]
    data: Option<PathBuf>,

    /// Partition sizes for --data as train,validation,test
    #[arg(long, default_value = "185,15,50")]
    split: SplitSizes,

    /// Seed for partitioning --data
    #[arg(long, default_value_t = DEFAULT_PARTITION_SEED)]
    split_seed: u64,

    /// Training split (JSONL)
    #[arg(long, value_name = "FILE", requires_all = ["validation", "test"])]
    train: Option<PathBuf>,

    /// Validation split (JSONL)
    #[arg(long, value_name = "FILE")]
    validation: Option<PathBuf>,

    /// Test split (JSONL)
    #[arg(long, value_name = "FILE")]
    test: Option<PathBuf>,

    /// JSON field holding the example input
    #[arg(long, default_value = "question")]
    input_field: String,

    /// JSON field holding the expected answer
    #[arg(long, default_value = "answer")]
    answer_field: String,

    /// How answers are compared with labels
    #[arg(long, value_enum, default_value_t = ScorerKind::FinalAnswer)]
    scorer: ScorerKind,

    /// Override the configured iteration count
    #[arg(short = 'n', long)]
    iterations: Option<usize>,

    /// Override the configured random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Directory for the archive log, journal and exported agents
    #[arg(long, default_value = "dgm_run")]
    run_dir: PathBuf,

    /// Continue from the run directory's archive log
    #[arg(long)]
    resume: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScorerKind {
    /// Whitespace-trimmed string equality
    Exact,
    /// Compare the final number of each answer
    FinalAnswer,
}

#[derive(Subcommand)]
enum ArchiveCommands {
    /// Print the lineage forest, or one agent's lineage and code
    Show {
        #[arg(long, default_value = "dgm_run")]
        run_dir: PathBuf,

        /// Agent to show, e.g. v3
        #[arg(long)]
        agent: Option<AgentId>,
    },

    /// Print the best agent by validation score
    Best {
        #[arg(long, default_value = "dgm_run")]
        run_dir: PathBuf,

        /// Also write the champion's code to this file
        #[arg(long, value_name = "FILE")]
        export: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { path } => cmd_init(path),
        Commands::Run(args) => cmd_run(args).await,
        Commands::Archive { action } => match action {
            ArchiveCommands::Show { run_dir, agent } => cmd_archive_show(run_dir, agent).await,
            ArchiveCommands::Best { run_dir, export } => cmd_archive_best(run_dir, export).await,
        },
    }
}

fn cmd_init(path: PathBuf) -> Result<()> {
    info!("Initializing dgm in {:?}", path);
    let config_path = RunConfig::write_default(&path)
        .with_context(|| format!("Failed to write config under {}", path.display()))?;

    println!("Initialized dgm in {:?}", path);
    println!("Created:");
    println!("  {}", config_path.display());
    Ok(())
}

fn load_config(args: &RunArgs) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RunConfig::load_or_default(&args.root).context("Failed to load .dgm/config.toml")?,
    };
    if let Some(iterations) = args.iterations {
        config.iterations = iterations;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_splits(args: &RunArgs) -> Result<DatasetSplits> {
    let fields = FieldNames {
        input: args.input_field.clone(),
        expected: args.answer_field.clone(),
    };

    if let Some(data) = &args.data {
        let examples = load_jsonl(data, &fields)?;
        let splits = DatasetSplits::partition(examples, args.split, args.split_seed)
            .with_context(|| format!("Failed to partition {}", data.display()))?;
        return Ok(splits);
    }

    match (&args.train, &args.validation, &args.test) {
        (Some(train), Some(validation), Some(test)) => {
            Ok(DatasetSplits::from_files(train, validation, test, &fields)?)
        }
        _ => bail!("Provide either --data or all of --train, --validation and --test"),
    }
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    let splits = load_splits(&args)?;
    let seed_code = tokio::fs::read_to_string(&args.seed_agent)
        .await
        .with_context(|| format!("Failed to read seed agent {}", args.seed_agent.display()))?;

    tokio::fs::create_dir_all(&args.run_dir).await?;
    let log = ArchiveLog::new(args.run_dir.join(ARCHIVE_LOG));
    let archive = if args.resume {
        let archive = log
            .replay()
            .await
            .with_context(|| format!("Failed to replay {}", log.path().display()))?;
        info!("Resuming from {} archived agents", archive.len());
        archive
    } else {
        if !log.load_entries().await?.is_empty() {
            bail!(
                "{} already holds a run; pass --resume or choose another --run-dir",
                log.path().display()
            );
        }
        Archive::new()
    };

    let oracle = HttpOracle::from_config(&config.oracle)
        .context("Failed to configure the mutation oracle")?;
    info!("Mutation oracle model: {}", oracle.model());
    let usage = oracle.usage();

    let runner: Arc<dyn AgentRunner> = Arc::new(RetryingRunner::new(
        CommandRunner::from_config(&config.runner, args.run_dir.join("workspace")),
        RetryPolicy::from(&config.retry),
    ));
    let scorer: Arc<dyn Scorer> = match args.scorer {
        ScorerKind::Exact => Arc::new(ExactMatch),
        ScorerKind::FinalAnswer => Arc::new(FinalAnswerMatch),
    };
    let mut driver = EvolutionDriver::new(
        config,
        splits,
        runner,
        scorer,
        Arc::new(oracle),
        args.run_dir.join("checks"),
    )?
    .with_archive(archive)
    .with_archive_log(log)
    .with_activity_logging(&args.run_dir);

    let report = driver.run(AgentCode::new(seed_code)).await?;

    let report_path = args.run_dir.join("report.json");
    if let Err(e) = tokio::fs::write(&report_path, serde_json::to_string_pretty(&report)?).await {
        warn!("Failed to write {}: {}", report_path.display(), e);
    }

    print_report(&report, driver.archive());
    println!("\n{}", usage.report());
    Ok(())
}

fn print_report(report: &RunReport, archive: &Archive) {
    println!("\n=== Run {} ===", report.run_id);
    println!(
        "Iterations: {} ({} skipped), archive size: {}",
        report.iterations.len(),
        report.skipped_iterations(),
        report.archive_size
    );
    println!("\n--- Final Archive ---");
    print_forest(archive);
    println!(
        "\nChampion: {} (validation {:.4})",
        report.champion, report.champion_validation_score
    );
    println!(
        "Test score: {:.4} ({}/{})",
        report.test.score, report.test.correct, report.test.total
    );
}

fn print_forest(archive: &Archive) {
    fn print_node(archive: &Archive, id: AgentId, depth: usize) {
        let Ok(record) = archive.get(id) else {
            return;
        };
        println!(
            "{}{}  score={}  children={}  gen={}",
            "  ".repeat(depth),
            record.id(),
            record
                .score()
                .map_or_else(|| "unscored".to_string(), |s| format!("{:.4}", s)),
            record.children_count(),
            record.generation()
        );
        for child in archive.children_of(id) {
            print_node(archive, child.id(), depth + 1);
        }
    }

    for root in archive.roots() {
        print_node(archive, root.id(), 0);
    }
}

async fn replay_run(run_dir: &Path) -> Result<Archive> {
    let log = ArchiveLog::new(run_dir.join(ARCHIVE_LOG));
    if !log.exists() {
        bail!("No archive log at {}", log.path().display());
    }
    log.replay()
        .await
        .with_context(|| format!("Failed to replay {}", log.path().display()))
}

async fn cmd_archive_show(run_dir: PathBuf, agent: Option<AgentId>) -> Result<()> {
    let archive = replay_run(&run_dir).await?;
    let Some(id) = agent else {
        println!("Archive: {} agents", archive.len());
        print_forest(&archive);
        return Ok(());
    };

    let record = archive.get(id)?;
    println!(
        "Agent {} (score {}, generation {}, {} children)",
        record.id(),
        record
            .score()
            .map_or_else(|| "unscored".to_string(), |s| format!("{:.4}", s)),
        record.generation(),
        record.children_count()
    );
    if record.is_root() {
        println!("Lineage: root");
    } else {
        println!("Lineage: {}", format_lineage(&archive.lineage(id)?));
    }
    println!("\n{}", record.code().text());
    Ok(())
}

fn format_lineage(lineage: &[AgentId]) -> String {
    lineage
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" <- ")
}

async fn cmd_archive_best(run_dir: PathBuf, export: Option<PathBuf>) -> Result<()> {
    let archive = replay_run(&run_dir).await?;
    let Some(best) = archive.best() else {
        bail!("Archive holds no scored agent");
    };

    let lineage = archive.lineage(best.id())?;
    println!(
        "Best agent: {} (score {:.4}, generation {})",
        best.id(),
        best.score().unwrap_or(0.0),
        best.generation()
    );
    println!("Lineage: {}", format_lineage(&lineage));

    if let Some(path) = export {
        tokio::fs::write(&path, best.code().text())
            .await
            .with_context(|| format!("Failed to export to {}", path.display()))?;
        println!("Exported code to {}", path.display());
    }
    Ok(())
}
