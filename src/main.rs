//! # seqfeed CLI
//!
//! Long-running loader that reconciles a bucket of FASTA files against a
//! neighbor server. Commands:
//!
//! | Command | Description |
//! |---------|-------------|
//! | `seqfeed init` | Create the SQLite ledger and its schema |
//! | `seqfeed run` | Poll the bucket forever, loading new sequences |
//! | `seqfeed sync` | Run exactly one reconciliation pass |
//! | `seqfeed status` | Summarise ledger contents |
//! | `seqfeed reset` | Delete all ledger rows (bring-up/testing only) |
//!
//! All commands accept `--config` pointing to a TOML configuration file;
//! see `config/seqfeed.example.toml`.
//!
//! Once `run` is launched the process never terminates on its own: faults
//! are logged and retried, and liveness is visible through ledger writes.
//! It only exits early on startup configuration errors.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use seqfeed::bucket::BucketClient;
use seqfeed::config;
use seqfeed::ledger::Ledger;
use seqfeed::neighbor::NeighborClient;
use seqfeed::reconcile::Reconciler;

#[derive(Parser)]
#[command(
    name = "seqfeed",
    about = "Feeds FASTA files from an object-store bucket into a neighbor server, exactly once each",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/seqfeed.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the ledger database schema.
    ///
    /// Idempotent; running it repeatedly is safe.
    Init,

    /// Watch the bucket and load new sequences forever.
    ///
    /// Drains greedily while passes find candidates and sleeps the
    /// configured idle interval when one finds none. Stop with a signal.
    Run,

    /// Run a single reconciliation pass and print a summary.
    Sync {
        /// Compute and report the candidate set without fetching,
        /// submitting, or writing the ledger.
        #[arg(long)]
        dry_run: bool,

        /// Process at most N candidates this pass.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print ledger statistics: attempt counts, outcomes, last checkpoint.
    Status,

    /// Delete every row from the ledger.
    ///
    /// For test and bring-up only; normal operation never deletes.
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let ledger = Ledger::open(&cfg.ledger).await?;
            ledger.close().await;
            println!("Ledger initialized at {}", cfg.ledger.path.display());
        }
        Commands::Run => {
            let ledger = Ledger::open(&cfg.ledger).await?;
            let bucket = BucketClient::new(&cfg.bucket)?;
            let server = NeighborClient::new(&cfg.server)?;
            let reconciler = Reconciler::new(
                &bucket,
                &server,
                &ledger,
                &cfg.server.base_url,
                host_name(),
                &cfg.bucket.identity_tag,
                Duration::from_secs(cfg.poll.idle_secs),
            );
            reconciler.run_forever().await?;
        }
        Commands::Sync { dry_run, limit } => {
            let ledger = Ledger::open(&cfg.ledger).await?;
            let bucket = BucketClient::new(&cfg.bucket)?;
            let server = NeighborClient::new(&cfg.server)?;
            let reconciler = Reconciler::new(
                &bucket,
                &server,
                &ledger,
                &cfg.server.base_url,
                host_name(),
                &cfg.bucket.identity_tag,
                Duration::from_secs(cfg.poll.idle_secs),
            );

            if dry_run {
                let summary = reconciler.preview_pass().await?;
                println!("sync (dry-run)");
                println!("  objects listed:   {}", summary.listed);
                println!("  already in server: {}", summary.in_server);
                println!("  candidates:       {}", summary.candidates);
            } else {
                let summary = reconciler.run_pass(limit).await?;
                println!("sync");
                println!("  objects listed:   {}", summary.listed);
                println!("  already in server: {}", summary.in_server);
                println!("  candidates:       {}", summary.candidates);
                println!("  accepted:         {}", summary.accepted);
                println!("  rejected:         {}", summary.rejected);
                println!("  failed:           {}", summary.failed);
                println!("  retryable:        {}", summary.retryable);
            }
            println!("ok");
            ledger.close().await;
        }
        Commands::Status => {
            let ledger = Ledger::open(&cfg.ledger).await?;
            let stats = ledger.stats().await?;

            println!("seqfeed — Ledger Status");
            println!("=======================");
            println!();
            println!("  Ledger:     {}", cfg.ledger.path.display());
            println!("  Attempts:   {}", stats.attempts);
            println!("  Completed:  {}", stats.completed);

            if !stats.by_status.is_empty() {
                println!();
                println!("  {:<24} {:>8}", "PARSE STATUS", "COUNT");
                for (status, n) in &stats.by_status {
                    println!("  {:<24} {:>8}", status, n);
                }
            }

            println!();
            match &stats.last_check {
                Some(check) => println!(
                    "  Last pass: {} ({} candidates, {} in server)",
                    check.check_time.format("%Y-%m-%d %H:%M:%S"),
                    check.batch_size,
                    check.number_in_server
                ),
                None => println!("  Last pass: never"),
            }

            ledger.close().await;
        }
        Commands::Reset => {
            let ledger = Ledger::open(&cfg.ledger).await?;
            ledger.reset().await?;
            ledger.close().await;
            println!("Ledger cleared.");
        }
    }

    Ok(())
}

fn host_name() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}
