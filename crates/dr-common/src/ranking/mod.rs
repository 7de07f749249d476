//! Nearest-neighbour ranking of developer embeddings against a query.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{CollaboratorError, DeveloperRecord};

/// Width of the sentence embeddings stored per profile.
pub const EMBEDDING_DIMENSION: usize = 384;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RankingError {
    #[error("top_k must be at least 1")]
    InvalidTopK,
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub vector: Vec<f32>,
}

impl Embedding {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// Cosine of the angle between `a` and `b`, in `[-1, 1]`
/// (i.e. `1 - cosine_distance`). A zero-norm side yields 0.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> Result<f64, RankingError> {
    if a.dimension() != b.dimension() {
        return Err(RankingError::DimensionMismatch {
            expected: a.dimension(),
            actual: b.dimension(),
        });
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.vector.iter().zip(&b.vector) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// Maps a cosine similarity from `[-1, 1]` onto `[0, 1]`.
pub fn normalize_similarity(similarity: f64) -> f64 {
    ((similarity + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<Id> {
    pub owner: Id,
    /// `None` when no embedding has been stored for the owner yet.
    pub embedding: Option<Embedding>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityResult<Id> {
    pub owner: Id,
    pub similarity: f64,
    /// 1-based position in the ranking.
    pub rank: usize,
}

impl<Id> SimilarityResult<Id> {
    pub fn normalized(&self) -> f64 {
        normalize_similarity(self.similarity)
    }
}

/// Ranks candidates by cosine similarity to a query, highest first, with
/// ties broken by ascending owner.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddingRanker;

impl EmbeddingRanker {
    /// Returns at most `top_k` results. Candidates with no embedding or a
    /// dimension that differs from the query's are left out.
    pub fn rank<Id>(
        &self,
        query: &Embedding,
        candidates: &[Candidate<Id>],
        top_k: usize,
    ) -> Result<Vec<SimilarityResult<Id>>, RankingError>
    where
        Id: Ord + Clone,
    {
        if top_k == 0 {
            return Err(RankingError::InvalidTopK);
        }

        let mut missing = 0usize;
        let mut mismatched = 0usize;
        let mut scored: Vec<(&Id, f64)> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let Some(embedding) = &candidate.embedding else {
                missing += 1;
                continue;
            };
            match cosine_similarity(query, embedding) {
                Ok(similarity) if similarity.is_finite() => {
                    scored.push((&candidate.owner, similarity))
                }
                Ok(_) | Err(_) => mismatched += 1,
            }
        }

        if mismatched > 0 {
            warn!(
                query_dimension = query.dimension(),
                excluded = mismatched,
                "excluded candidates with incompatible embeddings"
            );
        }
        debug!(
            candidates = candidates.len(),
            scored = scored.len(),
            missing,
            top_k,
            "ranked candidate embeddings"
        );

        scored.sort_by(|a, b| match b.1.total_cmp(&a.1) {
            Ordering::Equal => a.0.cmp(b.0),
            other => other,
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(index, (owner, similarity))| SimilarityResult {
                owner: owner.clone(),
                similarity,
                rank: index + 1,
            })
            .collect())
    }
}

/// Boundary to an external text-embedding model.
pub trait TextEmbedder: Send + Sync {
    fn name(&self) -> &'static str;

    fn embed(&self, text: &str) -> Result<Embedding, CollaboratorError>;
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Embedding(#[from] CollaboratorError),
    #[error(transparent)]
    Ranking(#[from] RankingError),
}

/// Embeds a free-text job description and ranks the candidates against it.
pub fn search<E, Id>(
    embedder: &E,
    query_text: &str,
    candidates: &[Candidate<Id>],
    top_k: usize,
) -> Result<Vec<SimilarityResult<Id>>, SearchError>
where
    E: TextEmbedder + ?Sized,
    Id: Ord + Clone,
{
    let query = embedder.embed(query_text)?;
    if query.dimension() != EMBEDDING_DIMENSION {
        warn!(
            embedder = embedder.name(),
            dimension = query.dimension(),
            expected = EMBEDDING_DIMENSION,
            "query embedding has unexpected dimension"
        );
    }
    Ok(EmbeddingRanker.rank(&query, candidates, top_k)?)
}

/// Text rendering of a profile fed to the embedding model.
pub fn profile_text(record: &DeveloperRecord) -> String {
    fn present(value: &Option<String>) -> Option<&str> {
        value.as_deref().filter(|v| !v.trim().is_empty())
    }

    let mut parts = Vec::with_capacity(8);
    if let Some(name) = present(&record.name) {
        parts.push(format!("Name: {name}"));
    }
    if let Some(bio) = present(&record.bio) {
        parts.push(format!("Bio: {bio}"));
    }
    parts.push(format!("Username: {}", record.github_username));
    if let Some(location) = present(&record.location) {
        parts.push(format!("Location: {location}"));
    }
    if let Some(company) = present(&record.company) {
        parts.push(format!("Company: {company}"));
    }
    parts.push(format!("{} repositories", record.public_repos.unwrap_or(0)));
    parts.push(format!("{} total stars", record.total_stars.unwrap_or(0)));
    parts.push(format!("{} followers", record.followers.unwrap_or(0)));

    parts.join(". ")
}
