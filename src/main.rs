//! # Legal Grounding CLI Driver
//!
//! ## Purpose
//! Command line entry point for the grounding engine: seeds the corpus,
//! builds retrieval context bundles, verifies generated text and runs one
//! change-detection pass.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration file, command line arguments, environment
//!   variables
//! - **Output**: Human-readable command results on stdout, structured logs
//!
//! ## Architecture Flow
//! 1. Parse command line arguments and load configuration
//! 2. Initialize logging and tracing
//! 3. Open the corpus store and build the requested component
//! 4. Execute the subcommand and print its result

use anyhow::Context as _;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use legal_grounding::alias::AliasResolver;
use legal_grounding::config::Config;
use legal_grounding::corpus::CorpusStore;
use legal_grounding::embedding::{Embedder, HashingEmbedder, RemoteEmbedder};
use legal_grounding::errors::{GroundingError, Result};
use legal_grounding::ingest::CorpusIngestor;
use legal_grounding::retrieval::RetrievalEngine;
use legal_grounding::verify::{CitationVerifier, FailureReason};
use legal_grounding::watcher::{
    ChangeWatcher, HttpSourceFetcher, JsonArticleParser, SledNotificationSink,
    StaticActivityIndex,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = Command::new("grounding-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Grounds generated legal content in a versioned corpus of articles")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("ingest").about("Seed the corpus from a JSON article file").arg(
                Arg::new("file")
                    .short('f')
                    .long("file")
                    .value_name("FILE")
                    .help("Seed file with a JSON array of articles")
                    .required(true),
            ),
        )
        .subcommand(
            Command::new("context")
                .about("Build a grounding context bundle for a topic/query")
                .arg(
                    Arg::new("topic")
                        .short('t')
                        .long("topic")
                        .value_name("TOPIC_ID")
                        .help("Topic identifier"),
                )
                .arg(
                    Arg::new("query")
                        .short('q')
                        .long("query")
                        .value_name("TEXT")
                        .help("Free-text query")
                        .default_value(""),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify the citations in a generated text file")
                .arg(
                    Arg::new("file")
                        .short('f')
                        .long("file")
                        .value_name("FILE")
                        .help("Text file to verify")
                        .required(true),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the full report as JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Run one change-detection pass over the configured sources"),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config.toml");
    // Anything logged during config loading predates the subscriber, so the
    // defaults fallback is re-announced once logging is up
    let config_file_exists = std::path::Path::new(config_path).exists();
    let config = Config::from_file(config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    init_logging(&config)?;
    if !config_file_exists {
        tracing::warn!(config = config_path, "Configuration file not found, using defaults");
    }
    info!(config = config_path, "Starting grounding engine");

    let store = Arc::new(CorpusStore::open(config.corpus.clone()).await?);
    let embedder = build_embedder(&config)?;

    match matches.subcommand() {
        Some(("ingest", sub)) => run_ingest(sub, store, embedder).await?,
        Some(("context", sub)) => run_context(sub, &config, store, embedder).await?,
        Some(("verify", sub)) => run_verify(sub, &config, store).await?,
        Some(("watch", _)) => run_watch(&config, store, embedder).await?,
        _ => unreachable!("subcommand is required"),
    }
    Ok(())
}

/// Initialize logging and tracing
fn init_logging(config: &Config) -> Result<()> {
    let log_level: tracing::Level =
        config
            .logging
            .level
            .parse()
            .map_err(|_| GroundingError::Config {
                message: format!("Invalid log level: {}", config.logging.level),
            })?;
    let filter = tracing_subscriber::filter::LevelFilter::from_level(log_level);

    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);
    let layer = if config.logging.json_format {
        layer.json().with_filter(filter).boxed()
    } else {
        layer.with_filter(filter).boxed()
    };
    tracing_subscriber::registry().with(layer).init();

    Ok(())
}

fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match &config.embedding.service_url {
        Some(url) => Ok(Arc::new(RemoteEmbedder::new(
            &config.embedding,
            url.clone(),
        )?)),
        None => Ok(Arc::new(HashingEmbedder::new(config.embedding.dimension))),
    }
}

async fn run_ingest(
    matches: &ArgMatches,
    store: Arc<CorpusStore>,
    embedder: Arc<dyn Embedder>,
) -> Result<()> {
    let file = matches
        .get_one::<String>("file")
        .ok_or_else(|| GroundingError::Config {
            message: "Missing --file argument".to_string(),
        })?;

    let ingestor = CorpusIngestor::new(store, embedder);
    let stats = ingestor.ingest_file(file).await?;

    println!(
        "Ingested {} articles ({} unchanged, {} rejected)",
        stats.ingested, stats.skipped_unchanged, stats.rejected
    );
    Ok(())
}

async fn run_context(
    matches: &ArgMatches,
    config: &Config,
    store: Arc<CorpusStore>,
    embedder: Arc<dyn Embedder>,
) -> Result<()> {
    let topic = matches.get_one::<String>("topic").map(String::as_str);
    let query = matches
        .get_one::<String>("query")
        .map(String::as_str)
        .unwrap_or("");

    let engine = RetrievalEngine::new(config.retrieval.clone(), store.reader(), embedder);
    let bundle = engine.build_context(topic, query).await?;

    println!(
        "Strategy: {:?} — {} articles, {}/{} chars",
        bundle.strategy,
        bundle.entries.len(),
        bundle.chars_used,
        bundle.budget_chars
    );
    println!();
    println!("{}", bundle.render());
    Ok(())
}

async fn run_verify(
    matches: &ArgMatches,
    config: &Config,
    store: Arc<CorpusStore>,
) -> Result<()> {
    let file = matches
        .get_one::<String>("file")
        .ok_or_else(|| GroundingError::Config {
            message: "Missing --file argument".to_string(),
        })?;
    let text = tokio::fs::read_to_string(file).await?;

    let resolver = AliasResolver::with_extra_aliases(&config.verifier.extra_aliases);
    let verifier = CitationVerifier::new(resolver, store.reader());
    let report = verifier.verify_all(&text).await?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for result in &report.results {
        let status = if result.verified {
            "OK"
        } else {
            match result.failure_reason {
                Some(FailureReason::LawNotResolved) => "LAW_NOT_RESOLVED",
                Some(FailureReason::ArticleNotFound) => "ARTICLE_NOT_FOUND",
                Some(FailureReason::TextMismatch) => "TEXT_MISMATCH",
                None => "FAILED",
            }
        };
        println!(
            "{:18} art. {} \"{}\"",
            status, result.citation.article_number, result.citation.raw_law_text
        );
    }
    println!();
    println!(
        "Trust score: {:.2} ({} citations)",
        report.score,
        report.results.len()
    );
    Ok(())
}

async fn run_watch(
    config: &Config,
    store: Arc<CorpusStore>,
    embedder: Arc<dyn Embedder>,
) -> Result<()> {
    let fetcher = Arc::new(HttpSourceFetcher::new(&config.watcher)?);
    let sink = Arc::new(SledNotificationSink::open(
        config.corpus.db_path.with_extension("notifications"),
    )?);
    let activity = match &config.watcher.activity_path {
        Some(path) => Arc::new(StaticActivityIndex::from_file(path).await?),
        None => Arc::new(StaticActivityIndex::empty()),
    };

    let watcher = ChangeWatcher::new(
        config.watcher.clone(),
        store,
        fetcher,
        Arc::new(JsonArticleParser),
        sink,
        activity,
        embedder,
    );

    let report = watcher.run_once().await?;
    println!(
        "Checked {} articles: {} changes, {} notifications, {} laws skipped",
        report.articles_checked,
        report.changes_detected,
        report.notifications_created,
        report.laws_skipped
    );
    // Per-law failures are local; the run itself succeeded
    Ok(())
}
