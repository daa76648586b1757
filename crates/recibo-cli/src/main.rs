use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use recibo::broadcast::CategorizeProgressBroadcaster;
use recibo::db::{self, prediction_repo, queue_repo, receipt_repo, Database};
use recibo::pipeline::{NoopProgress, Orchestrator};
use recibo::worker::{drain_queue, WorkerPool};
use recibo::{builtin_config, load_config, Config, LineItem, Receipt};

#[derive(Parser, Debug)]
#[command(name = "recibo", version, about = "Receipt categorization engine")]
struct Cli {
    /// Path to a categorization config JSON (defaults to the built-in tables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the SQLite database (defaults to ~/.recibo/data/recibo.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest extracted receipts from a JSON file and enqueue them
    Ingest {
        /// Path to a JSON file: one receipt object or an array of them
        path: PathBuf,
    },

    /// Categorize one receipt and print the full stage trace
    Categorize {
        receipt_id: String,

        /// Print the outcome as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show a receipt and its prediction audit log
    Show { receipt_id: String },

    /// Drain the categorization queue with a worker pool
    Worker {
        /// Worker thread count (default: from config)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// List dead-lettered queue entries
    Dlq,
}

/// Receipt fields as produced by the extraction service.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptDraft {
    #[serde(default = "default_owner")]
    owner_id: String,
    #[serde(default)]
    merchant: String,
    #[serde(default)]
    total: f64,
    #[serde(default)]
    subtotal: f64,
    #[serde(default)]
    tax: f64,
    #[serde(default)]
    receipt_date: Option<String>,
    #[serde(default)]
    raw_text: Option<String>,
    #[serde(default)]
    line_items: Vec<LineItem>,
}

fn default_owner() -> String {
    "local".to_string()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = load_config_or_builtin(cli.config.as_deref())?;
    let database = open_database(cli.db.as_deref())?;

    match cli.command {
        Command::Ingest { path } => ingest(&database, &path),
        Command::Categorize { receipt_id, json } => {
            categorize(&database, &config, &receipt_id, json)
        }
        Command::Show { receipt_id } => show(&database, &receipt_id),
        Command::Worker { workers } => worker(&database, &config, workers),
        Command::Dlq => dlq(&database),
    }
}

fn load_config_or_builtin(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => {
            load_config(path).with_context(|| format!("loading config {}", path.display()))
        }
        None => builtin_config().context("loading built-in config"),
    }
}

fn open_database(path: Option<&std::path::Path>) -> Result<Database> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => db::default_database_path().context("cannot determine home directory")?,
    };
    Database::open(&path).with_context(|| format!("opening database {}", path.display()))
}

fn ingest(database: &Database, path: &PathBuf) -> Result<()> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    // Accept a single object or an array.
    let drafts: Vec<ReceiptDraft> = if content.trim_start().starts_with('[') {
        serde_json::from_str(&content)?
    } else {
        vec![serde_json::from_str(&content)?]
    };

    if drafts.is_empty() {
        bail!("no receipts in {}", path.display());
    }

    for draft in drafts {
        let receipt = Receipt::extracted(
            &draft.owner_id,
            &draft.merchant,
            draft.total,
            draft.subtotal,
            draft.tax,
            draft.receipt_date,
            draft.raw_text,
            draft.line_items,
        );
        receipt_repo::insert(database, &receipt)?;

        let now = chrono::Utc::now().to_rfc3339();
        let enqueued = queue_repo::enqueue(database, &receipt.id, &now)?;
        println!(
            "{}  {}  {}",
            receipt.id,
            receipt.merchant,
            if enqueued { "queued" } else { "already queued" }
        );
    }

    Ok(())
}

fn categorize(database: &Database, config: &Config, receipt_id: &str, json: bool) -> Result<()> {
    let orchestrator = Orchestrator::from_config(database.clone(), config)?;
    let outcome = orchestrator.categorize(receipt_id, &NoopProgress)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    for stage in &outcome.trace {
        println!("stage {:<9} {}", stage.stage.to_string(), stage.outcome);
    }

    if outcome.already_categorized {
        println!(
            "Already categorized as {} (confidence {:.2}, method {})",
            outcome.category.as_deref().unwrap_or("?"),
            outcome.confidence.unwrap_or(0.0),
            outcome.method.map(|m| m.to_string()).unwrap_or_default(),
        );
    } else if outcome.ok {
        println!(
            "Categorized as {} (confidence {:.2}, method {})",
            outcome.category.as_deref().unwrap_or("?"),
            outcome.confidence.unwrap_or(0.0),
            outcome.method.map(|m| m.to_string()).unwrap_or_default(),
        );
    } else {
        println!(
            "Not categorized (reason: {})",
            outcome.reason.as_deref().unwrap_or("unknown")
        );
    }

    Ok(())
}

fn show(database: &Database, receipt_id: &str) -> Result<()> {
    let receipt = receipt_repo::find_by_id(database, receipt_id)?
        .with_context(|| format!("receipt not found: {}", receipt_id))?;

    println!("id:       {}", receipt.id);
    println!("merchant: {}", receipt.merchant);
    println!("total:    {:.2} (subtotal {:.2}, tax {:.2})", receipt.total, receipt.subtotal, receipt.tax);
    println!("status:   {}", receipt.status);
    match receipt.category_id {
        Some(category) => println!(
            "category: {} (confidence {:.2}, method {})",
            category.name(),
            receipt.category_confidence.unwrap_or(0.0),
            receipt
                .category_method
                .map(|m| m.to_string())
                .unwrap_or_default(),
        ),
        None => println!("category: (none)"),
    }

    let predictions = prediction_repo::list_by_subject(database, receipt_id)?;
    if predictions.is_empty() {
        println!("predictions: (none)");
    } else {
        println!("predictions:");
        for p in predictions {
            println!(
                "  {}  {:<9} {:<16} {}",
                p.created_at,
                p.method.to_string(),
                p.category_id.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
                p.details,
            );
        }
    }

    Ok(())
}

fn worker(database: &Database, config: &Config, workers: Option<usize>) -> Result<()> {
    let pending = queue_repo::pending_count(database)?;
    if pending == 0 {
        println!("Queue is empty");
        return Ok(());
    }

    let worker_count = workers.unwrap_or(config.worker_count).max(1);
    let orchestrator = Arc::new(Orchestrator::from_config(database.clone(), config)?);

    // Stream per-receipt progress while the pool drains.
    let broadcaster = CategorizeProgressBroadcaster::default();
    let mut events = broadcaster.subscribe();
    let printer = std::thread::spawn(move || loop {
        match events.blocking_recv() {
            Ok(event) => println!("  {}  {}  {}", event.receipt_id, event.phase, event.message),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    });

    let pool =
        WorkerPool::with_progress_sender(orchestrator, worker_count, Some(broadcaster.sender()));

    println!("Draining {} queued receipts with {} workers", pending, worker_count);
    let stats = drain_queue(database, &pool, config.policy.max_attempts);

    pool.shutdown();
    pool.wait();

    // All worker-held senders are gone after wait(); dropping ours closes
    // the channel and lets the printer finish.
    drop(broadcaster);
    let _ = printer.join();

    let stats = stats?;
    println!(
        "Done: {} categorized, {} already categorized, {} retried, {} dead-lettered",
        stats.categorized, stats.already_categorized, stats.retried, stats.dead_lettered
    );

    Ok(())
}

fn dlq(database: &Database) -> Result<()> {
    let entries = queue_repo::list_dlq(database)?;
    if entries.is_empty() {
        println!("Dead-letter queue is empty");
        return Ok(());
    }

    for entry in entries {
        println!(
            "{}  {}  attempts={}  {}",
            entry.failed_at,
            entry.receipt_id,
            entry.attempts,
            entry.last_error.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}
