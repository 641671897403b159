//! Crawl-Grid main entry point
//!
//! This is the command-line interface for inspecting and steering a crawl
//! grid's persistent state.

use clap::{Parser, Subcommand};
use crawl_grid::config::{load_config_with_hash, Config};
use crawl_grid::storage::{get_schema_version, is_reserved, StorageEngine};
use crawl_grid::Grid;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Crawl-Grid: durable job and pipeline orchestration for crawl sessions
///
/// Inspects the grid store of a crawl host, requests pipeline stops, resets
/// once-jobs and wipes crawl state between sessions.
#[derive(Parser, Debug)]
#[command(name = "crawl-grid")]
#[command(version = "1.0.0")]
#[command(about = "Inspect and steer a crawl grid", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show collections, job states and the session pipeline's progress
    Status,

    /// Delete every collection and the on-disk store
    Clean,

    /// Ask a running pipeline to stop at its next stage boundary
    Stop {
        /// Pipeline to stop (defaults to the configured session pipeline)
        pipeline: Option<String>,
    },

    /// Reset every record of a job so a once-job can run again
    ResetJob {
        /// Job name, e.g. "crawl-session.init"
        job: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let grid = Grid::from_config(&config)?;

    let result = match cli.command {
        Command::Status => handle_status(&grid, &config),
        Command::Clean => handle_clean(&grid),
        Command::Stop { pipeline } => handle_stop(&grid, &config, pipeline),
        Command::ResetJob { job } => handle_reset_job(&grid, &job),
    };

    grid.close()?;
    result
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("crawl_grid=info,warn"),
            1 => EnvFilter::new("crawl_grid=debug,info"),
            2 => EnvFilter::new("crawl_grid=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the status command: prints the store's collections and progress
fn handle_status(grid: &Grid, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let storage = grid.storage();
    let pipeline_name = &config.session.pipeline_name;

    println!("=== Crawl-Grid Status ===\n");
    println!("Work directory: {}", config.grid.work_dir);
    println!("Schema version: {}", get_schema_version());
    println!("Node: {}", grid.node_name());

    let names = storage.collection_names()?;
    println!("\nCollections ({}):", names.len());
    for name in &names {
        let size = storage.engine().count(name)?;
        match storage.collection_info(name)? {
            Some(info) => println!(
                "  - {} [{} of {}] {} entries",
                name, info.kind, info.value_type, size
            ),
            None => println!("  - {} {} entries", name, size),
        }
    }

    let jobs = grid.compute().list_job_states()?;
    println!("\nJobs ({}):", jobs.len());
    for (key, state) in &jobs {
        match &state.error {
            Some(error) => println!("  - {}: {} ({})", key, state.status, error),
            None => println!("  - {}: {}", key, state.status),
        }
    }

    println!("\nSession pipeline '{}':", pipeline_name);
    match grid.pipeline().get_active_stage(pipeline_name)? {
        Some(stage) => println!("  Active stage: {}", stage),
        None => println!("  Active stage: none"),
    }
    if grid.pipeline().is_stop_requested(pipeline_name)? {
        println!("  Stop requested");
    }

    Ok(())
}

/// Handles the clean command: deletes all crawl state
fn handle_clean(grid: &Grid) -> Result<(), Box<dyn std::error::Error>> {
    let crawl_collections = count_crawl_collections(grid)?;

    tracing::info!("Cleaning grid store...");
    grid.clean()?;
    if crawl_collections > 0 {
        println!(
            "✓ Grid store cleaned ({} crawl collections dropped)",
            crawl_collections
        );
    } else {
        println!("✓ Grid store cleaned (no crawl collections, job and pipeline state reset)");
    }
    Ok(())
}

/// Counts the collections a clean would drop, leaving out the grid's own
fn count_crawl_collections(grid: &Grid) -> crawl_grid::GridResult<usize> {
    Ok(grid
        .storage()
        .collection_names()?
        .iter()
        .filter(|name| !is_reserved(name))
        .count())
}

/// Handles the stop command: flags a pipeline to stop
fn handle_stop(
    grid: &Grid,
    config: &Config,
    pipeline: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let name = pipeline.unwrap_or_else(|| config.session.pipeline_name.clone());
    grid.pipeline().stop(Some(&name))?;

    match grid.pipeline().get_active_stage(&name)? {
        Some(stage) => println!("✓ Stop requested for '{}' (active stage: {})", name, stage),
        None => println!("✓ Stop requested for '{}'", name),
    }
    Ok(())
}

/// Handles the reset-job command: removes a job's records
fn handle_reset_job(grid: &Grid, job: &str) -> Result<(), Box<dyn std::error::Error>> {
    let reset = grid.compute().reset_job(job)?;
    println!("✓ Reset {} records of job '{}'", reset, job);
    Ok(())
}
