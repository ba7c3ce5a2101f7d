//! tracegraph CLI
//!
//! Postprocesses an analysis run into the trace store and inspects stored
//! runs, issues and frames.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tracegraph_core::models::RunMetadata;
use tracegraph_core::parser::{AnalysisInputs, AnalysisOutput, PreviousInput};
use tracegraph_core::query::{self, guards::DEFAULT_LIST_LIMIT};
use tracegraph_core::store::Database;
use tracegraph_core::summary::RunSummary;
use tracegraph_core::{analyze, AnalyzeConfig};

#[derive(Parser)]
#[command(name = "tracegraph")]
#[command(about = "Trace-graph postprocessing for static analysis runs", long_about = None)]
struct Cli {
    /// SQLite store path
    #[arg(long, global = true, default_value = "./tracegraph.db")]
    database: PathBuf,

    /// Increase log verbosity (-v info, -vv debug). RUST_LOG wins when set.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse, build, trim, key and save one analysis run
    Analyze(AnalyzeArgs),

    /// List stored runs, newest first
    Runs {
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: i64,
    },

    /// List the issues of a run (latest run when omitted)
    Issues {
        #[arg(long)]
        run_id: Option<i64>,
    },

    /// Show one issue by handle
    Issue { handle: String },

    /// Walk continuation frames from a stored frame
    Frontier {
        frame_id: i64,

        #[arg(long, default_value_t = 4)]
        depth: i64,
    },
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Analysis output: one JSON document or a directory of shards
    input: PathBuf,

    #[arg(long)]
    run_kind: Option<String>,

    #[arg(long)]
    repository: Option<String>,

    #[arg(long)]
    branch: Option<String>,

    #[arg(long)]
    commit_hash: Option<String>,

    #[arg(long)]
    job_id: Option<String>,

    #[arg(long)]
    differential_id: Option<i64>,

    /// Previous run's analysis output to diff issues against
    #[arg(long, conflicts_with = "previous_issue_handles")]
    previous_input: Option<PathBuf>,

    /// JSON list of previous issue handles to diff issues against
    #[arg(long)]
    previous_issue_handles: Option<PathBuf>,

    /// Line map translating current locations to the previous revision
    #[arg(long)]
    linemap: Option<PathBuf>,

    /// Keep frames no issue can reach
    #[arg(long)]
    retain_all_models: bool,

    /// Delete rows that dropped out of this run instead of marking them
    #[arg(long)]
    no_retain_history: bool,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Queries never create a store.
fn connect_existing(db: &Database) -> Result<rusqlite::Connection> {
    if !db.path().exists() {
        bail!("No store at {}", db.path().display());
    }
    Ok(db.connect()?)
}

fn run_analyze(db: &Database, args: AnalyzeArgs) -> Result<()> {
    let current = AnalysisOutput::from_path(&args.input)
        .with_context(|| format!("Failed to read analysis output {}", args.input.display()))?;
    let mut inputs = AnalysisInputs::new(current);
    if let Some(path) = args.previous_issue_handles {
        inputs = inputs.with_previous(PreviousInput::IssueHandles(path));
    } else if let Some(path) = args.previous_input {
        let previous = AnalysisOutput::from_path(&path)
            .with_context(|| format!("Failed to read previous output {}", path.display()))?;
        inputs = inputs.with_previous(PreviousInput::Output(previous));
    }
    if let Some(path) = args.linemap {
        inputs = inputs.with_linemap(path);
    }

    let summary = RunSummary::new(RunMetadata {
        run_kind: args.run_kind,
        repository: args.repository,
        branch: args.branch,
        commit_hash: args.commit_hash,
        job_id: args.job_id,
        differential_id: args.differential_id,
    })
    .with_retain_all_models(args.retain_all_models);

    let mut config = AnalyzeConfig::from_env();
    if args.no_retain_history {
        config.saver.retain_history = false;
    }

    let summary = analyze(db, inputs, summary, config).context("Analysis run failed")?;
    info!(run_id = ?summary.run_id, "run saved");
    print_json(&summary)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let db = Database::new(&cli.database)
        .with_context(|| format!("Failed to open store {}", cli.database.display()))?;

    match cli.command {
        Commands::Analyze(args) => run_analyze(&db, args)?,

        Commands::Runs { limit } => {
            let conn = connect_existing(&db)?;
            print_json(&query::list_runs(&conn, limit)?)?;
        }

        Commands::Issues { run_id } => {
            let conn = connect_existing(&db)?;
            let run_id = match run_id {
                Some(id) => id,
                None => match query::latest_run(&conn)? {
                    Some(run) => run.id,
                    None => bail!("Store {} has no runs", cli.database.display()),
                },
            };
            print_json(&query::list_issues(&conn, run_id)?)?;
        }

        Commands::Issue { handle } => {
            let conn = connect_existing(&db)?;
            match query::issue_by_handle(&conn, &handle)? {
                Some(issue) => print_json(&issue)?,
                None => bail!("No issue with handle {handle}"),
            }
        }

        Commands::Frontier { frame_id, depth } => {
            let conn = connect_existing(&db)?;
            match query::frames_from_frontier(&conn, frame_id, depth)? {
                Some(frontier) => print_json(&frontier)?,
                None => bail!("No frame with id {frame_id}"),
            }
        }
    }

    Ok(())
}
