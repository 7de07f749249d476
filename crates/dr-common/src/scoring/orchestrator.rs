use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{CodeSampleSource, CodeStatus, RecordStore, ScoreUpdate, ScoringConfig, ScoringError};
use crate::{
    CollaboratorError, DeveloperRecord,
    classifier::{ClassifierError, ProfilePredictor, TrainingSummary},
    code_metrics::{AggregatedCodeMetrics, StaticAnalyzer, analyze_samples},
    features::{ComplexityLevel, ProfileTask, QualityLevel},
    regressor::{CodeQualityScorer, CodeTrainingSample, FitReport, RegressorError, proxy_score},
};

/// Where the orchestrator is in its run. `Interrupted` keeps the index of
/// the first record that was not scored, or `None` when the run stopped
/// before scoring began.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    CollectingCode { next_index: usize },
    TrainingQuality,
    TrainingComplexity,
    Scoring { next_index: usize },
    Done { processed: usize },
    Interrupted { resume_from: Option<usize> },
}

#[derive(Debug)]
pub struct TrainingReport {
    pub quality: Result<TrainingSummary, ScoringError>,
    pub complexity: Result<TrainingSummary, ScoringError>,
    pub code_quality: Result<FitReport, ScoringError>,
}

impl TrainingReport {
    /// True when both classifiers fell back to heuristic labels.
    pub fn heuristic_mode(&self) -> bool {
        self.quality.is_err() && self.complexity.is_err()
    }
}

/// Regressor training data gathered by
/// [`ScoringOrchestrator::collect_code_training`].
#[derive(Debug, Default)]
pub struct CodeCollection {
    pub samples: Vec<CodeTrainingSample>,
    /// Records whose code was requested.
    pub examined: usize,
    pub analysis_failures: usize,
    pub retrieval_failures: usize,
    /// Cancelled before every record up to the limit was examined.
    pub interrupted: bool,
}

#[derive(Debug)]
pub enum RecordOutcome {
    Scored(ScoreUpdate),
    ClassificationFailed(ClassifierError),
    PersistFailed {
        update: ScoreUpdate,
        error: CollaboratorError,
    },
}

/// Returned after every record; `next_index` is where a resumed run starts.
#[derive(Debug)]
pub struct Checkpoint {
    pub index: usize,
    pub next_index: usize,
    pub outcome: RecordOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub total: usize,
    pub offset: usize,
    pub processed: usize,
    pub scored: usize,
    pub code_analyzed: usize,
    pub no_code_samples: usize,
    pub analysis_failures: usize,
    pub retrieval_failures: usize,
    pub persist_failures: usize,
    pub classification_failures: usize,
    /// Set when the run was cancelled before reaching the end.
    pub resume_from: Option<usize>,
}

impl RunReport {
    fn record(&mut self, outcome: &RecordOutcome) {
        self.processed += 1;
        match outcome {
            RecordOutcome::Scored(update) => {
                self.scored += 1;
                match update.code_status {
                    CodeStatus::Analyzed => self.code_analyzed += 1,
                    CodeStatus::NoSamples => self.no_code_samples += 1,
                    CodeStatus::AnalysisFailed => self.analysis_failures += 1,
                    CodeStatus::RetrievalFailed => self.retrieval_failures += 1,
                }
            }
            RecordOutcome::ClassificationFailed(_) => self.classification_failures += 1,
            RecordOutcome::PersistFailed { .. } => self.persist_failures += 1,
        }
    }

    pub fn failures(&self) -> usize {
        self.classification_failures + self.persist_failures
    }
}

/// Analysis result for one developer's code. Retrieval failures are never
/// kept so a later attempt can succeed.
#[derive(Debug, Clone)]
enum CodeAnalysis {
    Analyzed(AggregatedCodeMetrics),
    NoSamples,
    Failed,
}

/// Trains the profile classifiers and the code regressor, then scores a
/// snapshot record by record.
pub struct ScoringOrchestrator<S, C, A> {
    config: ScoringConfig,
    store: S,
    code_source: C,
    analyzer: A,
    quality: ProfilePredictor,
    complexity: ProfilePredictor,
    code_scorer: CodeQualityScorer,
    /// Keyed by developer id; filled during training collection and reused
    /// while scoring.
    code_cache: HashMap<i64, CodeAnalysis>,
    state: RunState,
}

impl<S, C, A> ScoringOrchestrator<S, C, A>
where
    S: RecordStore,
    C: CodeSampleSource,
    A: StaticAnalyzer,
{
    pub fn new(
        config: ScoringConfig,
        store: S,
        code_source: C,
        analyzer: A,
    ) -> Result<Self, ScoringError> {
        let quality = ProfilePredictor::new(
            ProfileTask::Quality,
            config.forest.clone(),
            config.min_training_corpus,
        );
        let complexity = ProfilePredictor::new(
            ProfileTask::Complexity,
            config.forest.clone(),
            config.min_training_corpus,
        );
        let code_scorer =
            CodeQualityScorer::new(config.regressor.clone(), config.min_training_corpus)?;

        Ok(Self {
            config,
            store,
            code_source,
            analyzer,
            quality,
            complexity,
            code_scorer,
            code_cache: HashMap::new(),
            state: RunState::Idle,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn code_source(&self) -> &C {
        &self.code_source
    }

    pub fn quality_predictor(&self) -> &ProfilePredictor {
        &self.quality
    }

    pub fn complexity_predictor(&self) -> &ProfilePredictor {
        &self.complexity
    }

    pub fn code_scorer(&self) -> &CodeQualityScorer {
        &self.code_scorer
    }

    fn pauses_between_fetches(&self) -> bool {
        !self.config.inter_record_delay.is_zero() && self.code_source.rate_limited()
    }

    /// Trains every model on the full snapshot. Models whose corpus is too
    /// small stay untrained; that is reported, not returned as an error.
    pub fn train(
        &mut self,
        snapshot: &[DeveloperRecord],
        code_training: &[CodeTrainingSample],
    ) -> TrainingReport {
        info!(
            records = snapshot.len(),
            code_samples = code_training.len(),
            "training scoring models"
        );

        self.state = RunState::TrainingQuality;
        let quality = self.quality.train(snapshot).map_err(classifier_outcome);

        self.state = RunState::TrainingComplexity;
        let complexity = self.complexity.train(snapshot).map_err(classifier_outcome);

        let code_quality = self
            .code_scorer
            .train(code_training)
            .map_err(|err| match err {
                RegressorError::InsufficientData { required, actual } => {
                    ScoringError::InsufficientData { required, actual }
                }
                other => ScoringError::Regressor(other),
            });

        let report = TrainingReport {
            quality,
            complexity,
            code_quality,
        };
        if report.heuristic_mode() {
            warn!(records = snapshot.len(), "scoring with heuristic labels only");
        }
        self.state = RunState::Idle;
        report
    }

    /// Fetches and analyzes one developer's code. Failures are logged here
    /// so training collection and scoring report them the same way.
    async fn analyze_code(
        &self,
        record: &DeveloperRecord,
    ) -> Result<CodeAnalysis, CollaboratorError> {
        let samples = self
            .code_source
            .fetch_samples(record, self.config.max_code_samples)
            .await
            .inspect_err(|err| {
                warn!(developer_id = record.id, error = %err, "code retrieval failed");
            })?;
        if samples.is_empty() {
            return Ok(CodeAnalysis::NoSamples);
        }

        Ok(match analyze_samples(&self.analyzer, &samples) {
            Ok(metrics) => CodeAnalysis::Analyzed(metrics),
            Err(err) => {
                warn!(developer_id = record.id, error = %err, "code analysis failed");
                CodeAnalysis::Failed
            }
        })
    }

    /// Analyzes code for up to `limit` records and labels each aggregate with
    /// the record's bootstrap quality class. Results are kept for the scoring
    /// pass, so those records are not fetched again. `cancel` is checked
    /// before each record.
    pub async fn collect_code_training(
        &mut self,
        records: &[DeveloperRecord],
        limit: usize,
        cancel: &AtomicBool,
    ) -> CodeCollection {
        let pause = self.pauses_between_fetches();
        let mut collection = CodeCollection::default();
        self.code_cache.clear();

        for (position, record) in records.iter().take(limit).enumerate() {
            if position > 0 && pause {
                sleep(self.config.inter_record_delay).await;
            }
            if cancel.load(Ordering::SeqCst) {
                self.state = RunState::Interrupted { resume_from: None };
                collection.interrupted = true;
                warn!(
                    examined = collection.examined,
                    collected = collection.samples.len(),
                    "code collection interrupted"
                );
                return collection;
            }
            self.state = RunState::CollectingCode {
                next_index: position,
            };

            collection.examined += 1;
            match self.analyze_code(record).await {
                Ok(CodeAnalysis::Analyzed(metrics)) => {
                    let label = ProfileTask::Quality.heuristic_label(record);
                    collection
                        .samples
                        .push(CodeTrainingSample::from_quality_label(metrics.clone(), label));
                    self.code_cache
                        .insert(record.id, CodeAnalysis::Analyzed(metrics));
                }
                Ok(analysis) => {
                    if matches!(analysis, CodeAnalysis::Failed) {
                        collection.analysis_failures += 1;
                    }
                    self.code_cache.insert(record.id, analysis);
                }
                Err(_) => collection.retrieval_failures += 1,
            }
        }

        self.state = RunState::Idle;
        info!(
            examined = collection.examined,
            collected = collection.samples.len(),
            analysis_failures = collection.analysis_failures,
            retrieval_failures = collection.retrieval_failures,
            "collected code training samples"
        );
        collection
    }

    /// Scores `snapshot[index]` and persists the result. Failures are folded
    /// into the returned outcome; only an out-of-range index is an error.
    pub async fn score_at(
        &mut self,
        snapshot: &[DeveloperRecord],
        index: usize,
    ) -> Result<Checkpoint, ScoringError> {
        let record = snapshot.get(index).ok_or(ScoringError::InvalidOffset {
            offset: index,
            len: snapshot.len(),
        })?;
        self.state = RunState::Scoring { next_index: index };

        let outcome = self.score_record(record).await;
        match &outcome {
            RecordOutcome::Scored(update) => debug!(
                developer_id = update.developer_id,
                complexity = update.complexity.name(),
                quality = update.quality.name(),
                quality_score = update.quality_score,
                code = ?update.code_status,
                "record scored"
            ),
            RecordOutcome::ClassificationFailed(err) => warn!(
                developer_id = record.id,
                error = %err,
                "classification failed; record skipped"
            ),
            RecordOutcome::PersistFailed { error, .. } => warn!(
                developer_id = record.id,
                error = %error,
                "failed to persist scores; record skipped"
            ),
        }

        self.state = RunState::Scoring {
            next_index: index + 1,
        };
        Ok(Checkpoint {
            index,
            next_index: index + 1,
            outcome,
        })
    }

    fn classify(
        &self,
        record: &DeveloperRecord,
    ) -> Result<(ComplexityLevel, QualityLevel), ClassifierError> {
        let complexity = self.complexity.predict(record)?;
        let quality = self.quality.predict(record)?;
        Ok((
            ComplexityLevel::from_label(complexity)
                .ok_or(ClassifierError::LabelOutOfRange(complexity))?,
            QualityLevel::from_label(quality).ok_or(ClassifierError::LabelOutOfRange(quality))?,
        ))
    }

    async fn score_record(&self, record: &DeveloperRecord) -> RecordOutcome {
        let (complexity, quality) = match self.classify(record) {
            Ok(levels) => levels,
            Err(err) => return RecordOutcome::ClassificationFailed(err),
        };

        let (code_quality_score, code_status) = self.code_estimate(record).await;
        let update = ScoreUpdate {
            developer_id: record.id,
            complexity,
            quality,
            quality_score: code_quality_score.unwrap_or_else(|| quality.score()),
            code_quality_score,
            code_status,
        };

        match self.store.update_scores(&update).await {
            Ok(()) => RecordOutcome::Scored(update),
            Err(error) => RecordOutcome::PersistFailed { update, error },
        }
    }

    async fn code_estimate(&self, record: &DeveloperRecord) -> (Option<f64>, CodeStatus) {
        let analysis = match self.code_cache.get(&record.id) {
            Some(cached) => cached.clone(),
            None => match self.analyze_code(record).await {
                Ok(analysis) => analysis,
                Err(_) => return (None, CodeStatus::RetrievalFailed),
            },
        };
        let metrics = match analysis {
            CodeAnalysis::Analyzed(metrics) => metrics,
            CodeAnalysis::NoSamples => return (None, CodeStatus::NoSamples),
            CodeAnalysis::Failed => return (None, CodeStatus::AnalysisFailed),
        };

        let estimate = if self.code_scorer.is_trained() {
            match self.code_scorer.predict(&metrics) {
                Ok(score) => score,
                Err(err) => {
                    warn!(developer_id = record.id, error = %err, "code regressor failed");
                    return (None, CodeStatus::AnalysisFailed);
                }
            }
        } else {
            proxy_score(&metrics)
        };
        (Some(estimate), CodeStatus::Analyzed)
    }

    /// Scores `snapshot[offset..]`, checking `cancel` before each record.
    /// The configured pause runs only before records whose code still has
    /// to be fetched from a rate-limited source.
    pub async fn run(
        &mut self,
        snapshot: &[DeveloperRecord],
        offset: usize,
        cancel: &AtomicBool,
    ) -> Result<RunReport, ScoringError> {
        if offset > snapshot.len() {
            return Err(ScoringError::InvalidOffset {
                offset,
                len: snapshot.len(),
            });
        }

        let mut report = RunReport {
            total: snapshot.len(),
            offset,
            ..RunReport::default()
        };
        let pause = self.pauses_between_fetches();

        info!(
            total = snapshot.len(),
            offset,
            quality_trained = self.quality.is_trained(),
            complexity_trained = self.complexity.is_trained(),
            code_trained = self.code_scorer.is_trained(),
            cached_code = self.code_cache.len(),
            "scoring run started"
        );

        let mut index = offset;
        while index < snapshot.len() {
            if cancel.load(Ordering::SeqCst) {
                self.state = RunState::Interrupted {
                    resume_from: Some(index),
                };
                report.resume_from = Some(index);
                warn!(
                    resume_from = index,
                    processed = report.processed,
                    "scoring run interrupted"
                );
                return Ok(report);
            }

            let checkpoint = self.score_at(snapshot, index).await?;
            report.record(&checkpoint.outcome);
            index = checkpoint.next_index;

            let every = self.config.progress_every;
            if every > 0 && report.processed % every == 0 {
                info!(
                    processed = report.processed,
                    position = index,
                    total = snapshot.len(),
                    scored = report.scored,
                    failures = report.failures(),
                    "scoring progress"
                );
            }

            let next_fetches = snapshot
                .get(index)
                .is_some_and(|next| !self.code_cache.contains_key(&next.id));
            if pause && next_fetches {
                sleep(self.config.inter_record_delay).await;
            }
        }

        self.state = RunState::Done {
            processed: report.processed,
        };
        info!(
            processed = report.processed,
            scored = report.scored,
            code_analyzed = report.code_analyzed,
            no_code_samples = report.no_code_samples,
            analysis_failures = report.analysis_failures,
            retrieval_failures = report.retrieval_failures,
            persist_failures = report.persist_failures,
            classification_failures = report.classification_failures,
            "scoring run finished"
        );
        Ok(report)
    }
}

fn classifier_outcome(err: ClassifierError) -> ScoringError {
    match err {
        ClassifierError::InsufficientData { required, actual } => {
            ScoringError::InsufficientData { required, actual }
        }
        other => ScoringError::Classifier(other),
    }
}
