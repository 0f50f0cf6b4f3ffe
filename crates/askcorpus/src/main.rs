//! # askcorpus CLI (`askc`)
//!
//! The `askc` binary is the primary interface for askcorpus. It provides
//! commands for database initialization, corpus ingestion, question
//! answering, feedback, flag review, cache maintenance, and starting the
//! HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! askc --config ./config/askcorpus.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askc init` | Create the SQLite database and run schema migrations |
//! | `askc load <pages.json>` | Ingest a JSON page export into the corpus |
//! | `askc ask "<question>"` | Answer a question over the corpus |
//! | `askc feedback <positive\|negative>` | Record feedback on an answer |
//! | `askc flags list` | List queries flagged by negative feedback |
//! | `askc flags resolve <query>` | Mark a flagged query as handled |
//! | `askc stats` | Show learning, cache, and analytics counters |
//! | `askc cache clear` | Drop cached responses |
//! | `askc serve` | Start the HTTP API server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use askcorpus::analytics::QueryLogger;
use askcorpus::cache::ResponseCache;
use askcorpus::config::{self, Config};
use askcorpus::feedback::FeedbackLearner;
use askcorpus::ingest;
use askcorpus::llm::OllamaClient;
use askcorpus::pipeline::{AskOptions, RagPipeline};
use askcorpus::server::{self, AppState};
use askcorpus::store::SqliteCorpus;
use askcorpus::{db, migrate};
use askcorpus_core::fusion::FusionConfig;
use askcorpus_core::retriever::HybridRetriever;

/// askcorpus CLI — retrieval-augmented question answering over a private
/// corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/askcorpus.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "askc",
    about = "askcorpus — retrieval-augmented question answering over a private corpus",
    version,
    long_about = "askcorpus combines dense vector search and BM25 keyword ranking over a \
    SQLite-backed corpus, generates answers with a local Ollama model, and learns from \
    user feedback: repeatedly criticized chunks sink, praised ones rise, and problem \
    queries get flagged for review."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askcorpus.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent.
    Init,

    /// Ingest a JSON page export into the corpus.
    ///
    /// The file must be a JSON array of page records with `url`, `title`,
    /// `author`, and `text` fields. Each page is chunked, embedded via
    /// Ollama, and stored; re-loading a page replaces its chunks.
    Load {
        /// Path to the pages JSON file.
        path: PathBuf,
    },

    /// Answer a question over the corpus.
    Ask {
        /// The question to answer.
        question: String,

        /// Number of chunks to retrieve.
        #[arg(long)]
        top_k: Option<usize>,

        /// LLM sampling temperature.
        #[arg(long)]
        temperature: Option<f32>,

        /// Disable query expansion.
        #[arg(long)]
        no_expansion: bool,

        /// Disable hybrid search (dense-only retrieval).
        #[arg(long)]
        no_hybrid: bool,

        /// Search with a hypothetical answer instead of expanded keywords.
        #[arg(long)]
        hyde: bool,
    },

    /// Record feedback on a previous answer.
    ///
    /// Positive feedback boosts the chunks behind the answer and records
    /// the query-chunk mapping. Negative feedback penalizes the chunks,
    /// drops any cached response for the query, and counts toward flagging
    /// the query for review.
    Feedback {
        /// The verdict: `positive` or `negative`.
        verdict: String,

        /// The query the feedback refers to.
        #[arg(long)]
        query: String,

        /// Comma-separated chunk ids behind the answer.
        #[arg(long, value_delimiter = ',')]
        chunks: Vec<String>,

        /// Analytics log id to attach the verdict to.
        #[arg(long)]
        log_id: Option<i64>,
    },

    /// Review queries flagged by repeated negative feedback.
    Flags {
        #[command(subcommand)]
        action: FlagsAction,
    },

    /// Show learning, cache, and analytics counters.
    Stats,

    /// Response cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Start the HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

/// Flag review subcommands.
#[derive(Subcommand)]
enum FlagsAction {
    /// List flagged queries.
    List {
        /// Filter by status: `pending`, `monitoring`, `resolved`, `dismissed`.
        #[arg(long, default_value = "pending")]
        status: String,
    },
    /// Mark a flagged query as resolved.
    Resolve {
        /// The flagged query text.
        query: String,
        /// Dismiss instead of resolving.
        #[arg(long)]
        dismiss: bool,
    },
}

/// Cache maintenance subcommands.
#[derive(Subcommand)]
enum CacheAction {
    /// Drop all cached responses.
    Clear,
    /// Drop only expired cached responses.
    ClearExpired,
    /// Show the most recently cached queries.
    Recent {
        /// Maximum entries to show.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

/// Wire the full pipeline from config. Shared by `ask`, `serve`, and the
/// maintenance commands.
async fn build_state(cfg: &Config) -> anyhow::Result<AppState> {
    let pool = db::connect(&cfg.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let store = Arc::new(SqliteCorpus::new(pool.clone()));
    let ollama = Arc::new(OllamaClient::new(cfg.ollama.clone())?);

    let retriever = Arc::new(HybridRetriever::new(
        store.clone(),
        store.clone(),
        ollama.clone(),
        FusionConfig {
            dense_weight: cfg.retrieval.dense_weight,
            lexical_weight: cfg.retrieval.lexical_weight,
            rrf_k: cfg.retrieval.rrf_k,
        },
    ));

    let learner = Arc::new(FeedbackLearner::new(
        pool.clone(),
        cfg.feedback.flag_threshold,
    ));
    let cache = Arc::new(ResponseCache::new(pool.clone(), cfg.cache.ttl_hours));
    let logger = Arc::new(QueryLogger::new(pool));

    let pipeline = Arc::new(RagPipeline::new(
        retriever,
        ollama.clone(),
        learner.clone(),
        cache.clone(),
        logger.clone(),
        ollama.llm_model().to_string(),
    ));

    Ok(AppState {
        pipeline,
        learner,
        cache,
        logger,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("askcorpus=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load { path } => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            let store = SqliteCorpus::new(pool);
            let ollama = OllamaClient::new(cfg.ollama.clone())?;

            let pages = ingest::load_pages(&path)?;
            let (num_pages, num_chunks) =
                ingest::ingest_pages(&store, &ollama, &cfg.chunking, &pages).await?;
            println!("Ingested {} pages ({} chunks).", num_pages, num_chunks);
        }
        Commands::Ask {
            question,
            top_k,
            temperature,
            no_expansion,
            no_hybrid,
            hyde,
        } => {
            let state = build_state(&cfg).await?;
            let defaults = AskOptions::default();
            let opts = AskOptions {
                top_k: top_k.unwrap_or(cfg.retrieval.top_k),
                temperature: temperature.unwrap_or(defaults.temperature),
                use_expansion: !no_expansion,
                use_hybrid: !no_hybrid,
                use_hyde: hyde,
            };

            let response = state.pipeline.ask(&question, opts).await?;

            println!("{}", response.answer);
            if let Some(sources) = response.sources.as_array() {
                if !sources.is_empty() {
                    println!("\nSources:");
                    for source in sources {
                        println!(
                            "  {} — {}",
                            source["title"].as_str().unwrap_or("Unknown"),
                            source["url"].as_str().unwrap_or("")
                        );
                    }
                }
            }
            if response.cached {
                println!("\n(cached response)");
            } else if let Some(log_id) = response.log_id {
                println!(
                    "\n(log id {}; chunks: {})",
                    log_id,
                    response.chunk_ids.join(",")
                );
            }
        }
        Commands::Feedback {
            verdict,
            query,
            chunks,
            log_id,
        } => {
            let is_positive = match verdict.as_str() {
                "positive" => true,
                "negative" => false,
                other => anyhow::bail!("verdict must be 'positive' or 'negative', got '{}'", other),
            };
            let state = build_state(&cfg).await?;
            let actions = state
                .pipeline
                .feedback(&query, is_positive, &chunks, log_id)
                .await?;

            println!("Adjusted {} chunk(s).", actions.chunks_adjusted.len());
            if actions.cache_invalidated {
                println!("Cached response invalidated.");
            }
            if actions.query_learned {
                println!("Query-chunk mapping recorded.");
            }
            if let Some(reason) = actions.flag_reason {
                println!("Query flagged for review: {}", reason);
            }
        }
        Commands::Flags { action } => {
            let state = build_state(&cfg).await?;
            match action {
                FlagsAction::List { status } => {
                    let flags = state.learner.get_flagged_queries(&status).await?;
                    if flags.is_empty() {
                        println!("No flagged queries with status '{}'.", status);
                    }
                    for flag in flags {
                        println!(
                            "{} negatives — {:?} — {}",
                            flag.negative_count, flag.flag_reason, flag.query
                        );
                    }
                }
                FlagsAction::Resolve { query, dismiss } => {
                    let resolution = if dismiss { "dismissed" } else { "resolved" };
                    if state.learner.resolve_flag(&query, resolution).await? {
                        println!("Flag {}.", resolution);
                    } else {
                        println!("No flag found for that query.");
                    }
                }
            }
        }
        Commands::Stats => {
            let state = build_state(&cfg).await?;
            let learning = state.learner.get_stats().await?;
            let cache = state.cache.stats().await?;
            let analytics = state.logger.get_stats().await?;

            println!(
                "Chunks adjusted: {} ({} boosted, {} penalized)",
                learning.chunks_adjusted, learning.chunks_boosted, learning.chunks_penalized
            );
            println!(
                "Mapped queries: {} ({} positive signals)",
                learning.mapped_queries, learning.positive_signals
            );
            for (status, count) in &learning.flags_by_status {
                println!("Flags {}: {}", status, count);
            }
            println!(
                "Cache: {} entries, {} hits ({:.2} avg)",
                cache.total_entries, cache.total_hits, cache.avg_hits_per_entry
            );
            println!(
                "Queries answered: {} (avg score {:.3}, avg {:.0} ms, +{} / -{})",
                analytics.total_queries,
                analytics.avg_retrieval_score,
                analytics.avg_response_time_ms,
                analytics.positive_feedback,
                analytics.negative_feedback
            );
        }
        Commands::Cache { action } => {
            let state = build_state(&cfg).await?;
            match action {
                CacheAction::Clear => {
                    let deleted = state.cache.clear().await?;
                    println!("Cleared {} cached response(s).", deleted);
                }
                CacheAction::ClearExpired => {
                    let deleted = state.cache.clear_expired().await?;
                    println!("Cleared {} expired response(s).", deleted);
                }
                CacheAction::Recent { limit } => {
                    for entry in state.cache.get_recent(limit).await? {
                        println!("{:>4} hits — {}", entry.hit_count, entry.query);
                    }
                }
            }
        }
        Commands::Serve => {
            let state = build_state(&cfg).await?;
            server::run_server(&cfg.server.bind, state).await?;
        }
    }

    Ok(())
}
