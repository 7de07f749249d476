pub mod classifier;
pub mod code_metrics;
pub mod db;
pub mod features;
pub mod logging;
pub mod ranking;
pub mod regressor;
pub mod scoring;

/// One developer profile as loaded from storage.
///
/// Numeric fields are optional because the scraper fills them in
/// incrementally; feature extraction substitutes documented defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeveloperRecord {
    pub id: i64,
    pub github_username: String,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub company: Option<String>,
    pub total_stars: Option<i64>,
    pub public_repos: Option<i64>,
    pub followers: Option<i64>,
    pub stars_per_repo: Option<f64>,
    pub language_score: Option<f64>,
    pub bio_relevance_score: Option<f64>,
    pub commit_recency_days: Option<i64>,
}

/// Failure reported by an external collaborator (storage, code retrieval,
/// embedding model). The core never retries these; the caller skips the
/// affected record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("code retrieval failure: {0}")]
    CodeRetrieval(String),
    #[error("embedding failure: {0}")]
    Embedding(String),
}
