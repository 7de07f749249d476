use std::collections::HashMap;

use deadpool_postgres::PoolError;
use tokio_postgres::{Error as PgError, Row};
use tracing::{debug, instrument};

use crate::{
    CollaboratorError, DeveloperRecord,
    db::PgPool,
    features::ComplexityLevel,
    ranking::{Candidate, Embedding},
    scoring::{RecordStore, ScoreUpdate},
};

#[derive(Debug, thiserror::Error)]
pub enum DeveloperStorageError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("developer {0} not found")]
    NotFound(i64),
}

impl From<DeveloperStorageError> for CollaboratorError {
    fn from(err: DeveloperStorageError) -> Self {
        CollaboratorError::Storage(err.to_string())
    }
}

const SNAPSHOT_QUERY: &str = "SELECT \
        developer_id::bigint AS developer_id, \
        github_username, \
        name, \
        bio, \
        location, \
        company, \
        total_stars::bigint AS total_stars, \
        public_repos::bigint AS public_repos, \
        followers::bigint AS followers, \
        stars_per_repo::float8 AS stars_per_repo, \
        language_score::float8 AS language_score, \
        bio_relevance_score::float8 AS bio_relevance_score, \
        commit_recency_days::bigint AS commit_recency_days \
    FROM developers \
    ORDER BY total_stars DESC NULLS LAST, developer_id ASC";

// $4 keeps a stored quality score (retrieval failed this time); a NULL $3
// keeps the stored code estimate.
const UPDATE_SCORES: &str = "UPDATE developers SET \
        neural_network_quality_score = CASE \
            WHEN $4::bool AND neural_network_quality_score IS NOT NULL \
                THEN neural_network_quality_score \
            ELSE $1::float8 END, \
        random_forest_complexity_score = $2::int4, \
        code_quality_score = COALESCE($3::float8, code_quality_score) \
    WHERE developer_id = $5::bigint";

const RANKING_QUERY: &str = "SELECT \
        github_username, \
        combined_embedding::real[] AS embedding, \
        neural_network_quality_score::float8 AS quality_score, \
        random_forest_complexity_score::int4 AS complexity_score \
    FROM developers \
    ORDER BY github_username ASC";

fn record_from_row(row: &Row) -> Result<DeveloperRecord, PgError> {
    Ok(DeveloperRecord {
        id: row.try_get("developer_id")?,
        github_username: row.try_get("github_username")?,
        name: row.try_get("name")?,
        bio: row.try_get("bio")?,
        location: row.try_get("location")?,
        company: row.try_get("company")?,
        total_stars: row.try_get("total_stars")?,
        public_repos: row.try_get("public_repos")?,
        followers: row.try_get("followers")?,
        stars_per_repo: row.try_get("stars_per_repo")?,
        language_score: row.try_get("language_score")?,
        bio_relevance_score: row.try_get("bio_relevance_score")?,
        commit_recency_days: row.try_get("commit_recency_days")?,
    })
}

/// Column values written for one update, in statement parameter order.
fn score_params(update: &ScoreUpdate) -> (f64, i32, Option<f64>, bool, i64) {
    (
        update.quality_score,
        i32::from(update.complexity.label()),
        update.code_quality_score,
        update.keeps_stored_quality(),
        update.developer_id,
    )
}

/// Every developer, highest total stars first. The order is stable so a
/// resume offset refers to the same record across runs.
#[instrument(skip(pool))]
pub async fn fetch_developer_snapshot(
    pool: &PgPool,
) -> Result<Vec<DeveloperRecord>, DeveloperStorageError> {
    let client = pool.get().await?;
    let rows = client.query(SNAPSHOT_QUERY, &[]).await?;
    let records = rows.iter().map(record_from_row).collect::<Result<Vec<_>, _>>()?;
    debug!(records = records.len(), "loaded developer snapshot");
    Ok(records)
}

/// Writes one developer's scores in its own statement.
#[instrument(skip(pool, update), fields(developer_id = update.developer_id))]
pub async fn update_developer_scores(
    pool: &PgPool,
    update: &ScoreUpdate,
) -> Result<(), DeveloperStorageError> {
    let client = pool.get().await?;
    let stmt = client.prepare_cached(UPDATE_SCORES).await?;
    let (quality_score, complexity, code_quality_score, keep_quality, developer_id) =
        score_params(update);

    let rows = client
        .execute(
            &stmt,
            &[
                &quality_score,
                &complexity,
                &code_quality_score,
                &keep_quality,
                &developer_id,
            ],
        )
        .await?;
    if rows == 0 {
        return Err(DeveloperStorageError::NotFound(developer_id));
    }
    Ok(())
}

/// Scores a previous run stored for a developer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StoredScores {
    pub quality_score: Option<f64>,
    pub complexity: Option<ComplexityLevel>,
}

impl StoredScores {
    fn from_columns(quality_score: Option<f64>, complexity_score: Option<i32>) -> Self {
        Self {
            quality_score,
            complexity: complexity_score
                .and_then(|raw| u8::try_from(raw).ok())
                .and_then(ComplexityLevel::from_label),
        }
    }
}

/// Ranking candidates plus the scores stored next to each embedding.
#[derive(Debug, Clone, Default)]
pub struct RankingCorpus {
    pub candidates: Vec<Candidate<String>>,
    scores: HashMap<String, StoredScores>,
}

impl RankingCorpus {
    pub fn push(&mut self, owner: String, embedding: Option<Embedding>, scores: StoredScores) {
        self.scores.insert(owner.clone(), scores);
        self.candidates.push(Candidate { owner, embedding });
    }

    pub fn scores_for(&self, github_username: &str) -> StoredScores {
        self.scores
            .get(github_username)
            .copied()
            .unwrap_or_default()
    }
}

/// Stored profile embeddings keyed by username (`None` where none exists
/// yet), with each developer's stored scores.
#[instrument(skip(pool))]
pub async fn fetch_ranking_corpus(pool: &PgPool) -> Result<RankingCorpus, DeveloperStorageError> {
    let client = pool.get().await?;
    let rows = client.query(RANKING_QUERY, &[]).await?;

    let mut corpus = RankingCorpus {
        candidates: Vec::with_capacity(rows.len()),
        scores: HashMap::with_capacity(rows.len()),
    };
    for row in &rows {
        let owner: String = row.try_get("github_username")?;
        let vector: Option<Vec<f32>> = row.try_get("embedding")?;
        let scores = StoredScores::from_columns(
            row.try_get("quality_score")?,
            row.try_get("complexity_score")?,
        );
        corpus.push(owner, vector.map(Embedding::new), scores);
    }
    debug!(candidates = corpus.candidates.len(), "loaded ranking corpus");
    Ok(corpus)
}

/// [`RecordStore`] writing through the connection pool.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl RecordStore for PgRecordStore {
    async fn update_scores(&self, update: &ScoreUpdate) -> Result<(), CollaboratorError> {
        update_developer_scores(&self.pool, update)
            .await
            .map_err(CollaboratorError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{features::QualityLevel, scoring::CodeStatus};

    fn update(code_status: CodeStatus, code_quality_score: Option<f64>) -> ScoreUpdate {
        ScoreUpdate {
            developer_id: 42,
            complexity: ComplexityLevel::Complex,
            quality: QualityLevel::High,
            quality_score: code_quality_score.unwrap_or(0.67),
            code_quality_score,
            code_status,
        }
    }

    #[test]
    fn score_params_follow_statement_order() {
        let analyzed = update(CodeStatus::Analyzed, Some(0.8));

        assert_eq!(score_params(&analyzed), (0.8, 2, Some(0.8), false, 42));
    }

    #[test]
    fn retrieval_failure_keeps_stored_scores() {
        let failed = update(CodeStatus::RetrievalFailed, None);

        let (_, _, code_quality_score, keep_quality, _) = score_params(&failed);

        assert_eq!(code_quality_score, None);
        assert!(keep_quality);
        assert!(UPDATE_SCORES.contains("COALESCE($3::float8, code_quality_score)"));
        assert!(
            UPDATE_SCORES.contains("WHEN $4::bool AND neural_network_quality_score IS NOT NULL")
        );
    }

    #[test]
    fn missing_code_writes_the_class_score() {
        for status in [CodeStatus::NoSamples, CodeStatus::AnalysisFailed] {
            let (quality_score, _, code_quality_score, keep_quality, _) =
                score_params(&update(status, None));

            assert_eq!(quality_score, 0.67, "{status:?}");
            assert_eq!(code_quality_score, None, "{status:?}");
            assert!(!keep_quality, "{status:?}");
        }
    }

    #[test]
    fn stored_scores_ignore_out_of_range_complexity() {
        assert_eq!(
            StoredScores::from_columns(Some(0.5), Some(3)),
            StoredScores {
                quality_score: Some(0.5),
                complexity: Some(ComplexityLevel::Advanced),
            }
        );
        assert_eq!(StoredScores::from_columns(None, Some(9)).complexity, None);
        assert_eq!(StoredScores::from_columns(None, Some(-1)).complexity, None);
        assert_eq!(StoredScores::from_columns(None, None), StoredScores::default());
    }

    #[test]
    fn unknown_owner_has_no_stored_scores() {
        let corpus = RankingCorpus::default();

        assert_eq!(corpus.scores_for("ghost"), StoredScores::default());
    }

    #[test]
    fn snapshot_order_is_deterministic() {
        assert!(SNAPSHOT_QUERY.ends_with("ORDER BY total_stars DESC NULLS LAST, developer_id ASC"));
    }

    #[test]
    fn storage_errors_become_collaborator_failures() {
        let err: CollaboratorError = DeveloperStorageError::NotFound(7).into();

        assert_eq!(err, CollaboratorError::Storage("developer 7 not found".into()));
    }
}
