//! takeoff: command-line front end for pattern aggregation, batch
//! classification and suggestion review.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use takeoff_aggregate::PatternAggregator;
use takeoff_cache::CacheHierarchy;
use takeoff_classify::{
    BatchItem, CancellationToken, ClassificationOrchestrator, OrchestratorConfig, SuggestionStore,
};
use takeoff_core::{
    ClassificationSuggestion, ElementStore, ElementView, EventBus, GenerationBackend,
    SuggestionRepository,
};
use takeoff_db::{Database, MemoryElementStore, MemorySuggestionRepository, PoolConfig};
use takeoff_inference::{OllamaBackend, TEMPLATE_VERSION};

#[derive(Parser)]
#[command(name = "takeoff")]
#[command(author, version, about = "BIM pattern aggregation and classification")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate JSONL elements into patterns and print them as JSON
    Aggregate {
        /// JSONL file, one element per line
        #[arg(short, long)]
        input: PathBuf,

        /// Fold chunks on all cores
        #[arg(long)]
        parallel: bool,
    },

    /// Classify patterns, generating suggestions for cache misses
    Classify {
        /// JSONL element file (default: bim_element table via DATABASE_URL)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Fingerprints to classify (default: every pattern)
        #[arg(short, long, num_args = 1..)]
        fingerprint: Vec<String>,

        /// Restrict pattern refreshes to one project
        #[arg(long)]
        project: Option<Uuid>,

        /// Use the scripted mock backend instead of Ollama
        #[cfg(feature = "mock")]
        #[arg(long)]
        mock: bool,
    },

    /// Approve or reject a suggestion (requires DATABASE_URL)
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },

    /// Print every suggestion for a fingerprint, oldest first (requires DATABASE_URL)
    History {
        fingerprint: String,
    },

    /// Apply database migrations (requires DATABASE_URL)
    Migrate,
}

#[derive(Subcommand)]
enum ReviewAction {
    Approve {
        #[arg(long)]
        id: Uuid,

        /// Reviewer name
        #[arg(long, env = "TAKEOFF_REVIEWER")]
        by: String,
    },
    Reject {
        #[arg(long)]
        id: Uuid,

        /// Reviewer name
        #[arg(long, env = "TAKEOFF_REVIEWER")]
        by: String,

        #[arg(long)]
        reason: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Aggregate { input, parallel } => cmd_aggregate(&input, parallel)?,
        Commands::Classify {
            input,
            fingerprint,
            project,
            #[cfg(feature = "mock")]
            mock,
        } => {
            #[cfg(not(feature = "mock"))]
            let mock = false;
            cmd_classify(input.as_deref(), fingerprint, project, mock).await?
        }
        Commands::Review { action } => cmd_review(action).await?,
        Commands::History { fingerprint } => cmd_history(&fingerprint).await?,
        Commands::Migrate => {
            let db = connect_database().await?;
            db.migrate().await?;
            info!("Migrations applied");
        }
    }
    Ok(())
}

/// Initialize tracing.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, daily rotation)
///   RUST_LOG    - standard env filter (default: "takeoff=info")
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "takeoff=info,takeoff_classify=info,takeoff_cache=info,takeoff_aggregate=info".into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let path = Path::new(path);
        let file_dir = path.parent().unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("takeoff.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
        }
        Some(guard)
    } else {
        // Logs go to stderr; stdout carries command output
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
        None
    }
}

/// Read JSONL elements. Unparseable lines are logged and skipped.
fn read_elements(path: &Path) -> anyhow::Result<impl Iterator<Item = ElementView>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let source = path.display().to_string();
    Ok(BufReader::new(file)
        .lines()
        .enumerate()
        .filter_map(move |(n, line)| {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(file = %source, line = n + 1, error = %e, "Read error");
                    return None;
                }
            };
            if line.trim().is_empty() {
                return None;
            }
            match serde_json::from_str::<ElementView>(&line) {
                Ok(element) => Some(element),
                Err(e) => {
                    warn!(file = %source, line = n + 1, error = %e, "Unparseable element");
                    None
                }
            }
        }))
}

fn cmd_aggregate(input: &Path, parallel: bool) -> anyhow::Result<()> {
    let aggregator = PatternAggregator::from_env();
    let elements = read_elements(input)?;
    let outcome = if parallel {
        aggregator.aggregate_parallel(elements)
    } else {
        aggregator.aggregate(elements)
    };
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn connect_database() -> anyhow::Result<Database> {
    let url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    Ok(Database::connect_with_config(&url, PoolConfig::from_env()).await?)
}

async fn optional_database() -> anyhow::Result<Option<Database>> {
    if std::env::var("DATABASE_URL").is_err() {
        return Ok(None);
    }
    connect_database().await.map(Some)
}

fn backend(mock: bool) -> Arc<dyn GenerationBackend> {
    #[cfg(feature = "mock")]
    if mock {
        return Arc::new(takeoff_inference::mock::MockGenerationBackend::new());
    }
    let _ = mock;
    Arc::new(OllamaBackend::from_env())
}

async fn build_orchestrator(
    input: Option<&Path>,
    db: Option<&Database>,
    mock: bool,
) -> anyhow::Result<ClassificationOrchestrator> {
    let elements: Arc<dyn ElementStore> = match (input, db) {
        (Some(path), _) => Arc::new(MemoryElementStore::new(read_elements(path)?.collect())),
        (None, Some(db)) => Arc::new(db.elements.clone()),
        (None, None) => bail!("no element source: pass --input or set DATABASE_URL"),
    };
    let repo: Arc<dyn SuggestionRepository> = match db {
        Some(db) => Arc::new(db.suggestions.clone()),
        None => {
            warn!("DATABASE_URL not set, suggestions are kept in memory for this run only");
            Arc::new(MemorySuggestionRepository::new())
        }
    };

    let cache = Arc::new(CacheHierarchy::from_env(TEMPLATE_VERSION).await);
    let store = SuggestionStore::new(repo, EventBus::default());
    Ok(
        ClassificationOrchestrator::new(cache, store, elements, backend(mock))
            .with_config(OrchestratorConfig::from_env()),
    )
}

fn suggestion_json(s: &ClassificationSuggestion) -> serde_json::Value {
    serde_json::to_value(s).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

fn item_json(item: &BatchItem) -> serde_json::Value {
    match &item.outcome {
        Ok(classified) => json!({
            "fingerprint": item.fingerprint,
            "ok": true,
            "source": format!("{:?}", classified.source),
            "cache_warnings": classified.cache_warnings,
            "suggestion": suggestion_json(&classified.suggestion),
        }),
        Err(e) => json!({
            "fingerprint": item.fingerprint,
            "ok": false,
            "error": e.to_string(),
        }),
    }
}

async fn cmd_classify(
    input: Option<&Path>,
    fingerprints: Vec<String>,
    project: Option<Uuid>,
    mock: bool,
) -> anyhow::Result<()> {
    let db = optional_database().await?;
    let mut orchestrator = build_orchestrator(input, db.as_ref(), mock).await?;
    if let Some(project) = project {
        let config = orchestrator.config().clone().with_project(project);
        orchestrator = orchestrator.with_config(config);
    }

    let fingerprints = if fingerprints.is_empty() {
        let all = match (input, db.as_ref()) {
            (Some(path), _) => {
                let outcome = PatternAggregator::from_env().aggregate_parallel(read_elements(path)?);
                orchestrator.cache().refresh_patterns(outcome);
                orchestrator.cache().pattern_fingerprints()
            }
            (None, Some(db)) => {
                let outcome = db.elements.aggregate_patterns(project).await?;
                orchestrator.cache().refresh_patterns(outcome);
                orchestrator.cache().pattern_fingerprints()
            }
            (None, None) => Vec::new(),
        };
        info!(pattern_count = all.len(), "Classifying every pattern");
        all
    } else {
        fingerprints
    };

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight items");
            ctrl_c.cancel();
        }
    });

    let report = orchestrator.classify_batch(fingerprints, &token).await;
    for item in &report.items {
        println!("{}", item_json(item));
    }

    if let Some(db) = &db {
        db.health().log();
    }
    let stats = orchestrator.cache().stats();
    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        l1_hits = stats.l1_hits,
        l2_hits = stats.l2_hits,
        l3_hits = stats.l3_hits,
        l4_hits = stats.l4_hits,
        "Classification finished"
    );
    if report.cancelled {
        bail!("batch cancelled");
    }
    Ok(())
}

async fn cmd_review(action: ReviewAction) -> anyhow::Result<()> {
    let db = connect_database().await?;
    let orchestrator = build_orchestrator(None, Some(&db), false).await?;
    let reviewed = match action {
        ReviewAction::Approve { id, by } => orchestrator.approve(id, &by).await?,
        ReviewAction::Reject { id, by, reason } => orchestrator.reject(id, &by, &reason).await?,
    };
    let output = json!({
        "suggestion": suggestion_json(&reviewed.suggestion),
        "cache_warnings": reviewed.cache_warnings,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_history(fingerprint: &str) -> anyhow::Result<()> {
    let db = connect_database().await?;
    let store = SuggestionStore::new(Arc::new(db.suggestions.clone()), EventBus::default());
    let history = store.history(fingerprint).await?;
    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}
