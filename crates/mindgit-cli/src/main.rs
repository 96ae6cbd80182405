//! mindgit - command-line front end
//!
//! Inspect and demo checkpoint sessions stored in a file-tree backend:
//!
//! ```text
//! mindgit demo                  # run a canned seven-step session
//! mindgit log [--branch B] [--limit N]
//! mindgit tree
//! mindgit branches
//! mindgit diff <id_a> <id_b>
//! mindgit inspect <id>
//! mindgit metrics
//! ```
//!
//! The session lives under `.mindgit/` (override with `--dir` or
//! `MINDGIT_DIR`). Unknown checkpoint ids exit with status 2.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use mindgit_checkpoint::{CheckpointStatus, CheckpointStore, FileTreeStore, StateMap};
use mindgit_core::{EngineError, MergeStrategy, Session};
use serde_json::json;

const DEMO_AGENT: &str = "demo-agent";

#[derive(Parser)]
#[command(name = "mindgit", version, about = "Version control for AI reasoning state")]
struct Cli {
    /// Session directory
    #[arg(long, global = true, env = "MINDGIT_DIR", default_value = ".mindgit")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a canned seven-step demo session
    Demo,
    /// Print checkpoint history
    Log {
        /// Restrict to one branch
        #[arg(long)]
        branch: Option<String>,
        /// Maximum entries
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Render the checkpoint DAG
    Tree,
    /// List branches
    Branches,
    /// Compare two checkpoints
    Diff { id_a: String, id_b: String },
    /// Print one checkpoint in full
    Inspect { id: String },
    /// Print the session metrics snapshot
    Metrics,
}

fn state_of(pairs: &[(&str, serde_json::Value)]) -> StateMap {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

async fn open_session(dir: &PathBuf) -> Result<Session, Box<dyn std::error::Error>> {
    let store = Arc::new(FileTreeStore::open(dir).await?);
    Ok(Session::open(DEMO_AGENT, store).await?)
}

fn status_line(status: CheckpointStatus) -> colored::ColoredString {
    match status {
        CheckpointStatus::Active => "active".green(),
        CheckpointStatus::RolledBack => "rolled_back".yellow(),
        CheckpointStatus::Merged => "merged".blue(),
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match cli.command {
        Command::Demo => {
            run_demo(&cli.dir).await?;
        }
        Command::Log { branch, limit } => {
            let session = open_session(&cli.dir).await?;
            for cp in session.history(limit, branch.as_deref()).await {
                println!(
                    "{} {:<12} {} {:<10} {}",
                    cp.short_id().bold(),
                    status_line(cp.status),
                    cp.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    cp.branch,
                    if cp.description.is_empty() {
                        &cp.logic_step
                    } else {
                        &cp.description
                    },
                );
            }
        }
        Command::Tree => {
            let session = open_session(&cli.dir).await?;
            println!("{}", session.visualize_tree().await);
        }
        Command::Branches => {
            let session = open_session(&cli.dir).await?;
            for row in session.list_branches_info().await {
                let marker = if row.is_current { "*" } else { " " };
                println!(
                    "{marker} {} ({} checkpoints){}",
                    row.name.bold(),
                    row.checkpoint_count,
                    if row.is_current { " ← current" } else { "" },
                );
            }
        }
        Command::Diff { id_a, id_b } => {
            let session = open_session(&cli.dir).await?;
            match session.diff(&id_a, &id_b).await {
                Ok(diff) => println!("{}", serde_json::to_string_pretty(&diff)?),
                Err(EngineError::NotFound(id)) => {
                    eprintln!("{} checkpoint '{id}' not found", "error:".red());
                    return Ok(ExitCode::from(2));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Inspect { id } => {
            let session = open_session(&cli.dir).await?;
            match session.get_checkpoint(&id).await {
                Some(cp) => println!("{}", serde_json::to_string_pretty(&cp)?),
                None => {
                    eprintln!("{} checkpoint '{id}' not found", "error:".red());
                    return Ok(ExitCode::from(2));
                }
            }
        }
        Command::Metrics => {
            let session = open_session(&cli.dir).await?;
            println!("{}", serde_json::to_string_pretty(&session.metrics().await)?);
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// A scripted session: intake, plan, a failed retrieval, rollback, an
/// alternative branch, a successful retry, a confidence-based merge, and a
/// final summary.
async fn run_demo(dir: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "mindgit demo — version control for AI reasoning".bold());

    let store = Arc::new(FileTreeStore::open(dir).await?);
    store.clear().await?;
    let store = Arc::new(FileTreeStore::open(dir).await?);
    let session = Session::open(DEMO_AGENT, store).await?;

    println!("\n[1/7] task received");
    session
        .checkpoint(
            state_of(&[
                ("task", json!("Summarize quarterly earnings")),
                ("status", json!("received")),
            ]),
            state_of(&[("confidence", json!(1.0)), ("tokens_used", json!(0))]),
            "Task received",
            "task_intake",
        )
        .await?;

    println!("[2/7] plan created");
    let plan = session
        .checkpoint(
            state_of(&[
                ("task", json!("Summarize quarterly earnings")),
                (
                    "plan",
                    json!([
                        "retrieve earnings document",
                        "extract key metrics",
                        "compare with previous quarter",
                        "write executive summary",
                    ]),
                ),
                ("current_step", json!(1)),
            ]),
            state_of(&[("confidence", json!(0.9)), ("tokens_used", json!(150))]),
            "Plan created",
            "planning",
        )
        .await?;

    println!("[3/7] document retrieval failed (503), checkpointing the error");
    session
        .checkpoint(
            state_of(&[
                ("task", json!("Summarize quarterly earnings")),
                ("current_step", json!(1)),
                ("error", json!("API 503 - Service Unavailable")),
            ]),
            state_of(&[("confidence", json!(0.3)), ("tokens_used", json!(200))]),
            "Document retrieval failed",
            "retrieve_doc:failed",
        )
        .await?;

    println!("[4/7] rolling back to the plan");
    let restored = session.rollback_to(&plan.id).await?;
    println!("      restored {}", restored.short_id().bold());

    println!("[5/7] branching to a cached-data approach");
    session.branch("cached-data-approach").await?;
    session
        .checkpoint(
            state_of(&[
                ("task", json!("Summarize quarterly earnings")),
                ("data_source", json!("local_cache")),
                (
                    "metrics",
                    json!({"revenue": "$12.4B", "net_income": "$3.1B", "yoy_growth": "15%"}),
                ),
            ]),
            state_of(&[("confidence", json!(0.75)), ("tokens_used", json!(100))]),
            "Using cached data",
            "use_cached_data",
        )
        .await?;

    println!("[6/7] retrying live retrieval on main");
    session.switch_branch("main").await?;
    session
        .checkpoint(
            state_of(&[
                ("task", json!("Summarize quarterly earnings")),
                ("data_source", json!("live_api")),
                (
                    "metrics",
                    json!({"revenue": "$12.5B", "net_income": "$3.2B", "yoy_growth": "16%", "eps": "$2.45"}),
                ),
            ]),
            state_of(&[("confidence", json!(0.95)), ("tokens_used", json!(350))]),
            "Document retrieved on retry",
            "retrieve_doc:success",
        )
        .await?;

    println!("[7/7] merging and summarizing");
    let merged = session
        .merge("cached-data-approach", MergeStrategy::PreferHigherConfidence)
        .await?;
    println!("      merge checkpoint {}", merged.short_id().bold());

    session
        .checkpoint(
            state_of(&[
                ("task", json!("Summarize quarterly earnings")),
                ("status", json!("completed")),
                (
                    "summary",
                    json!("Q4 revenue reached $12.5B, up 16% YoY. Net income of $3.2B with EPS of $2.45."),
                ),
            ]),
            state_of(&[("confidence", json!(0.95)), ("tokens_used", json!(500))]),
            "Summary generated",
            "generate_summary",
        )
        .await?;

    println!("\n{}", "history (main):".bold());
    for cp in session.history(10, Some("main")).await {
        println!(
            "  {} {:<12} {}",
            cp.short_id(),
            status_line(cp.status),
            cp.description,
        );
    }

    println!("\n{}", "tree:".bold());
    println!("{}", session.visualize_tree().await);

    println!("\n{}", "metrics:".bold());
    println!("{}", serde_json::to_string_pretty(&session.metrics().await)?);

    println!(
        "\nsession stored under {}; try `mindgit log`, `mindgit tree`, `mindgit branches`",
        dir.display(),
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e}", "error:".red());
            ExitCode::FAILURE
        }
    }
}
