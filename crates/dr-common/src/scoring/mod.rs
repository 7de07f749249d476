#![allow(async_fn_in_trait)]

//! Batch driver that trains the profile models on a corpus snapshot and
//! scores every record, one self-contained persist per record.

pub mod config;
pub mod orchestrator;

pub use config::ScoringConfig;
pub use orchestrator::{
    Checkpoint, CodeCollection, RecordOutcome, RunReport, RunState, ScoringOrchestrator,
    TrainingReport,
};

use serde::Serialize;
use thiserror::Error;

use crate::{
    CollaboratorError, DeveloperRecord,
    classifier::ClassifierError,
    features::{ComplexityLevel, QualityLevel},
    regressor::RegressorError,
};

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("not enough records to train: need {required}, got {actual}")]
    InsufficientData { required: usize, actual: usize },
    #[error("resume offset {offset} is past the end of a {len}-record snapshot")]
    InvalidOffset { offset: usize, len: usize },
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Regressor(#[from] RegressorError),
}

/// What happened to the code-based estimate for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeStatus {
    Analyzed,
    NoSamples,
    AnalysisFailed,
    RetrievalFailed,
}

/// Scores computed for one developer, handed to the storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreUpdate {
    pub developer_id: i64,
    pub complexity: ComplexityLevel,
    pub quality: QualityLevel,
    /// Code-based estimate when code was analyzed, otherwise the class score.
    pub quality_score: f64,
    /// `None` leaves a previously stored estimate in place.
    pub code_quality_score: Option<f64>,
    pub code_status: CodeStatus,
}

impl ScoreUpdate {
    /// A failed retrieval says nothing about the developer's code, so a
    /// quality score stored by an earlier run is kept instead of being
    /// replaced with the class score.
    pub fn keeps_stored_quality(&self) -> bool {
        self.code_status == CodeStatus::RetrievalFailed
    }
}

/// Storage collaborator; one call per scored record.
pub trait RecordStore {
    async fn update_scores(&self, update: &ScoreUpdate) -> Result<(), CollaboratorError>;
}

/// Code-retrieval collaborator returning raw source texts for a developer.
pub trait CodeSampleSource {
    async fn fetch_samples(
        &self,
        record: &DeveloperRecord,
        max_samples: usize,
    ) -> Result<Vec<String>, CollaboratorError>;

    /// Whether the orchestrator should pause between records.
    fn rate_limited(&self) -> bool {
        true
    }
}

/// Source for runs without code analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCodeSamples;

impl CodeSampleSource for NoCodeSamples {
    async fn fetch_samples(
        &self,
        _record: &DeveloperRecord,
        _max_samples: usize,
    ) -> Result<Vec<String>, CollaboratorError> {
        Ok(Vec::new())
    }

    fn rate_limited(&self) -> bool {
        false
    }
}
