mod code_samples;

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use dr_common::{
    DeveloperRecord,
    code_metrics::HeuristicAnalyzer,
    db::{
        DbPoolError, DeveloperStorageError, PgRecordStore, RankingCorpus, create_pool_from_url,
        fetch_developer_snapshot, fetch_ranking_corpus,
    },
    logging::{init_tracing_subscriber, install_tracing_panic_hook},
    ranking::{EMBEDDING_DIMENSION, Embedding, EmbeddingRanker, RankingError, SimilarityResult},
    scoring::{
        CodeCollection, CodeSampleSource, NoCodeSamples, RunReport, ScoringConfig, ScoringError,
        ScoringOrchestrator,
    },
};
use serde_json::json;
use tracing::{info, warn};

use crate::code_samples::FsCodeSampleSource;

const APP_NAME: &str = "dr-scorer";

#[derive(Parser, Debug)]
#[command(
    name = "dr-scorer",
    about = "Train developer scoring models and score or rank the corpus"
)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    db_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Train on the current corpus and score every developer
    Score {
        /// Index of the first record to score (resume point of an earlier run)
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Directory holding `<github_username>/*.py` code samples
        #[arg(long, env = "DR_CODE_SAMPLES_DIR")]
        code_samples_dir: Option<PathBuf>,

        /// How many records to analyze for code-regressor training data
        #[arg(long, default_value_t = 200)]
        code_training_limit: usize,
    },
    /// Rank stored profile embeddings against a query embedding
    Rank {
        /// JSON file containing the query embedding as an array of floats
        #[arg(long)]
        query_file: PathBuf,

        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
}

#[derive(Debug, thiserror::Error)]
enum ScorerError {
    #[error(transparent)]
    Pool(#[from] DbPoolError),
    #[error(transparent)]
    Storage(#[from] DeveloperStorageError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Ranking(#[from] RankingError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn spawn_cancel_listener() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current record");
            flag.store(true, Ordering::SeqCst);
        }
    });
    cancel
}

/// What one `score` invocation got through. `report` is `None` when the run
/// was interrupted while collecting code training data.
struct ScoreOutcome {
    collection: CodeCollection,
    report: Option<RunReport>,
}

struct ScoreJob<'a> {
    snapshot: &'a [DeveloperRecord],
    offset: usize,
    code_training_limit: usize,
    cancel: &'a AtomicBool,
}

impl ScoreJob<'_> {
    async fn run<C: CodeSampleSource>(
        &self,
        config: ScoringConfig,
        store: PgRecordStore,
        source: C,
    ) -> Result<ScoreOutcome, ScorerError> {
        let mut orchestrator = ScoringOrchestrator::new(config, store, source, HeuristicAnalyzer)?;
        let collection = orchestrator
            .collect_code_training(self.snapshot, self.code_training_limit, self.cancel)
            .await;
        if collection.interrupted {
            return Ok(ScoreOutcome {
                collection,
                report: None,
            });
        }

        let training = orchestrator.train(self.snapshot, &collection.samples);
        if let Err(err) = &training.code_quality {
            info!(error = %err, "code regressor untrained; using maintainability proxy");
        }

        let report = orchestrator
            .run(self.snapshot, self.offset, self.cancel)
            .await?;
        Ok(ScoreOutcome {
            collection,
            report: Some(report),
        })
    }
}

fn collection_summary(collection: &CodeCollection) -> serde_json::Value {
    json!({
        "examined": collection.examined,
        "samples": collection.samples.len(),
        "analysis_failures": collection.analysis_failures,
        "retrieval_failures": collection.retrieval_failures,
        "interrupted": collection.interrupted,
    })
}

async fn run_score(
    db_url: &str,
    offset: usize,
    code_samples_dir: Option<PathBuf>,
    code_training_limit: usize,
) -> Result<(), ScorerError> {
    let pool = create_pool_from_url(db_url)?;
    let snapshot = fetch_developer_snapshot(&pool).await?;
    let store = PgRecordStore::new(pool);
    let config = ScoringConfig::from_env();

    let started_at = Utc::now();
    let cancel = spawn_cancel_listener();
    let job = ScoreJob {
        snapshot: &snapshot,
        offset,
        code_training_limit,
        cancel: &cancel,
    };
    let outcome = match code_samples_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "reading code samples from disk");
            job.run(config, store, FsCodeSampleSource::new(dir)).await?
        }
        None => job.run(config, store, NoCodeSamples).await?,
    };

    let summary = json!({
        "started_at": started_at.to_rfc3339(),
        "finished_at": Utc::now().to_rfc3339(),
        "code_training": collection_summary(&outcome.collection),
        "report": outcome.report,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    match outcome.report.and_then(|report| report.resume_from) {
        Some(resume_from) => {
            eprintln!("interrupted; resume with `{APP_NAME} score --offset {resume_from}`");
        }
        None if outcome.collection.interrupted => {
            eprintln!(
                "interrupted before scoring; rerun with `{APP_NAME} score --offset {offset}`"
            );
        }
        None => {}
    }
    Ok(())
}

fn read_query_embedding(path: &PathBuf) -> Result<Embedding, ScorerError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ScorerError::Io {
        path: path.clone(),
        source,
    })?;
    let query: Embedding = serde_json::from_str(&raw)?;
    if query.dimension() != EMBEDDING_DIMENSION {
        warn!(
            dimension = query.dimension(),
            expected = EMBEDDING_DIMENSION,
            "query embedding has unexpected dimension"
        );
    }
    Ok(query)
}

fn rank_line(result: &SimilarityResult<String>, corpus: &RankingCorpus) -> serde_json::Value {
    let stored = corpus.scores_for(&result.owner);
    json!({
        "rank": result.rank,
        "github_username": result.owner,
        "similarity": result.similarity,
        "normalized": result.normalized(),
        "quality_score": stored.quality_score,
        "complexity_score": stored.complexity.map(|level| level.label()),
        "complexity_level": stored.complexity.map(|level| level.name()),
    })
}

async fn run_rank(db_url: &str, query_file: &PathBuf, top_k: usize) -> Result<(), ScorerError> {
    let query = read_query_embedding(query_file)?;
    let pool = create_pool_from_url(db_url)?;
    let corpus = fetch_ranking_corpus(&pool).await?;

    let results = EmbeddingRanker.rank(&query, &corpus.candidates, top_k)?;
    info!(
        candidates = corpus.candidates.len(),
        returned = results.len(),
        "ranked developers"
    );

    for result in &results {
        println!("{}", rank_line(result, &corpus));
    }
    Ok(())
}

async fn run() -> Result<(), ScorerError> {
    dotenv().ok();
    init_tracing_subscriber(APP_NAME);
    install_tracing_panic_hook(APP_NAME);

    let cli = Cli::parse();
    match cli.command {
        Command::Score {
            offset,
            code_samples_dir,
            code_training_limit,
        } => run_score(&cli.db_url, offset, code_samples_dir, code_training_limit).await,
        Command::Rank { query_file, top_k } => run_rank(&cli.db_url, &query_file, top_k).await,
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{APP_NAME} failed: {err}");
        std::process::exit(1);
    }
}
