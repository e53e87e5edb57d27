//! hervat CLI - inspect and manage checkpointed ingest runs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hervat::{CheckpointStore, Config, HervatError, LoaderStatus, RunRegistry, RunStatus};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "hervat")]
#[command(version)]
#[command(about = "Checkpoint management for resumable ingest runs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Checkpoint directory (overrides the config file)
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List all runs, most recent first
    List,

    /// Show detailed progress for a run
    Show {
        /// Run ID to inspect
        run_id: String,
    },

    /// Delete a run and all of its loader records
    Delete {
        /// Run ID to delete
        run_id: String,
    },

    /// Delete old runs, keeping the most recent ones
    Cleanup {
        /// Number of runs to keep (defaults to the configured retention)
        #[arg(short, long)]
        keep: Option<usize>,
    },

    /// Validate the configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# hervat configuration file

[checkpoint]
# Directory holding run and loader records (${ENV_VAR} expansion supported)
dir = "checkpoints"
# Successfully processed items between periodic flushes
interval = 25
# Runs kept by `cleanup` when --keep is not given
keep_runs = 5
"#;
    println!("{example}");
}

fn status_tag(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
    }
}

fn loader_tag(status: LoaderStatus) -> &'static str {
    match status {
        LoaderStatus::InProgress => "in_progress",
        LoaderStatus::Completed => "completed",
        LoaderStatus::Failed => "failed",
    }
}

fn list_runs(registry: &RunRegistry) -> Result<()> {
    let runs = registry.list_runs()?;
    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("Available runs:");
    for summary in runs {
        println!(
            "  {}  [{}]  created {}  loaders: {}",
            summary.id,
            status_tag(summary.status),
            summary.created_at.format("%Y-%m-%d %H:%M:%S"),
            if summary.loaders.is_empty() {
                "-".to_string()
            } else {
                summary.loaders.join(", ")
            }
        );
        if !summary.label.is_empty() {
            println!("      {}", summary.label);
        }
    }
    Ok(())
}

fn show_run(registry: &RunRegistry, run_id: &str) -> Result<()> {
    let (run, loaders) = registry.run_detail(run_id)?;

    println!("Run {}", run.id);
    println!("  Status:  {}", status_tag(run.status));
    println!("  Created: {}", run.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated: {}", run.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if !run.label.is_empty() {
        println!("  Label:   {}", run.label);
    }
    println!("  Config:  {}", run.config.summary());
    if let Some(error) = &run.error {
        println!("  Error:   {error}");
    }

    if loaders.is_empty() {
        println!("\nNo loader records yet");
        return Ok(());
    }

    println!("\nLoaders ({}):", loaders.len());
    for (name, progress) in &loaders {
        let stats = progress.stats();
        println!("  {} [{}]", name, loader_tag(progress.status));
        if stats.total_items > 0 {
            println!(
                "    Progress: {}/{} ({:.1}%)",
                stats.processed_count, stats.total_items, stats.completion_pct
            );
        } else {
            println!("    Processed: {}", stats.processed_count);
        }
        println!(
            "    Last checkpoint: {}",
            progress.last_checkpoint_at.format("%Y-%m-%d %H:%M:%S")
        );
        if stats.failed_count > 0 {
            println!("    Failures: {}", stats.failed_count);
            for (item_id, reason) in progress.failed_ids.iter().take(5) {
                let reason: String = reason.chars().take(120).collect();
                println!("      - {item_id}: {reason}");
            }
            if stats.failed_count > 5 {
                println!("      ... and {} more", stats.failed_count - 5);
            }
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("Failed to load config from {:?}", cli.config))?
    } else {
        Config::default()
    };

    if let Commands::Example = cli.command {
        print_example_config();
        return Ok(());
    }
    if let Commands::Validate = cli.command {
        info!("Configuration is valid");
        info!("  Checkpoint dir: {:?}", config.checkpoint.dir);
        info!("  Flush interval: {} items", config.checkpoint.interval);
        info!("  Retention:      {} runs", config.checkpoint.keep_runs);
        return Ok(());
    }

    let dir = cli.dir.unwrap_or(config.checkpoint.dir.clone());
    let store = Arc::new(CheckpointStore::new(&dir)?);
    let registry = RunRegistry::new(store);

    match cli.command {
        Commands::List => list_runs(&registry)?,

        Commands::Show { run_id } => show_run(&registry, &run_id)?,

        Commands::Delete { run_id } => {
            registry.delete_run(&run_id)?;
            println!("Deleted run {run_id}");
        }

        Commands::Cleanup { keep } => {
            let keep = keep.unwrap_or(config.checkpoint.keep_runs);
            let deleted = registry.cleanup(keep)?;
            if deleted.is_empty() {
                println!("Nothing to clean up, {keep} most recent runs kept");
            } else {
                println!("Deleted {} old runs, kept the {keep} most recent", deleted.len());
            }
        }

        Commands::Validate | Commands::Example => unreachable!(),
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e
                .downcast_ref::<HervatError>()
                .map(HervatError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}
