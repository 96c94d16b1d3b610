use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;

use buff::replay::{replay_verify, ReplaySummary};
use buff::snapshot::load_snapshot;
use buff::strategy::builtin_registry;

/// Standalone verification utility for decision record streams and
/// replay snapshots.
///
/// Re-executes recorded decisions and proves byte-for-byte equivalence
/// without requiring the recording application.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Output format (human or json)
    #[arg(long, global = true, default_value = "human")]
    format: OutputFormat,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a decision record stream and verify determinism.
    Replay {
        /// Path to a run directory or a single decision_records shard
        #[arg(long)]
        records: PathBuf,
    },
    /// Verify a snapshot file against its content address.
    Snapshot {
        /// Path to the snapshot file
        #[arg(long)]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Replay { records } => {
            let summary = replay_verify(&records, builtin_registry())
                .with_context(|| format!("replay failed for {}", records.display()))?;
            match cli.format {
                OutputFormat::Human => print_human_summary(&summary),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
            }
            if summary.ok() {
                Ok(())
            } else {
                std::process::exit(1);
            }
        }
        Command::Snapshot { path } => {
            let stored = load_snapshot(&path)
                .with_context(|| format!("snapshot verification failed for {}", path.display()))?;
            match cli.format {
                OutputFormat::Human => {
                    println!("{} {}", "VERIFIED".green().bold(), stored.snapshot_ref);
                    println!("  hash: {}", stored.snapshot_hash);
                    println!("  decision_id: {}", stored.snapshot.decision_id);
                }
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({
                            "snapshot_ref": stored.snapshot_ref,
                            "snapshot_hash": stored.snapshot_hash,
                            "decision_id": stored.snapshot.decision_id,
                            "verified": true,
                        }))?
                    );
                }
            }
            Ok(())
        }
    }
}

fn print_human_summary(summary: &ReplaySummary) {
    println!("TOTAL: {}", summary.total);
    println!("MATCHED: {}", format!("{}", summary.matched).green());
    let mismatched = format!("{}", summary.mismatched);
    println!(
        "MISMATCHED: {}",
        if summary.mismatched == 0 {
            mismatched.green()
        } else {
            mismatched.red().bold()
        }
    );
    let hash_mismatch = format!("{}", summary.hash_mismatch);
    println!(
        "HASH_MISMATCH: {}",
        if summary.hash_mismatch == 0 {
            hash_mismatch.green()
        } else {
            hash_mismatch.red().bold()
        }
    );
    println!("ERRORS: {}", summary.errors);
}
