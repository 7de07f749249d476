pub mod forest;
pub mod predictor;
pub mod tree;

pub use forest::{ForestConfig, TreeEnsemble, majority_vote};
pub use predictor::{ProfilePredictor, TrainingSummary};
pub use tree::{DecisionTree, TreeParams};

use thiserror::Error;

use crate::{
    DeveloperRecord,
    features::{FeatureVector, Label, NUM_CLASSES, ProfileTask},
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassifierError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("not enough records to train: need {required}, got {actual}")]
    InsufficientData { required: usize, actual: usize },
    #[error("feature vector length mismatch: expected {expected}, got {actual}")]
    FeatureLengthMismatch { expected: usize, actual: usize },
    #[error("label {0} is outside the four ordinal classes")]
    LabelOutOfRange(Label),
    #[error("prediction requested from an untrained model")]
    UntrainedModelUse,
}

/// Explicit lifecycle of a trainable model.
#[derive(Debug, Clone, Default)]
pub enum ModelState<M> {
    #[default]
    Untrained,
    Trained(M),
}

impl<M> ModelState<M> {
    pub fn is_trained(&self) -> bool {
        matches!(self, Self::Trained(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub features: FeatureVector,
    pub label: Label,
}

/// Checks the training set shape and returns the shared feature count.
pub(crate) fn validate_examples(examples: &[TrainingExample]) -> Result<usize, ClassifierError> {
    let first = examples.first().ok_or(ClassifierError::EmptyTrainingSet)?;
    let n_features = first.features.len();
    if n_features == 0 {
        return Err(ClassifierError::FeatureLengthMismatch {
            expected: 1,
            actual: 0,
        });
    }

    for example in examples {
        if example.features.len() != n_features {
            return Err(ClassifierError::FeatureLengthMismatch {
                expected: n_features,
                actual: example.features.len(),
            });
        }
        if example.label as usize >= NUM_CLASSES {
            return Err(ClassifierError::LabelOutOfRange(example.label));
        }
    }

    Ok(n_features)
}

/// Strategy that assigns a class label to a developer profile.
pub trait Labeler: Send + Sync {
    /// "heuristic" or "trained"; recorded in logs.
    fn name(&self) -> &'static str;

    fn label(&self, record: &DeveloperRecord) -> Result<Label, ClassifierError>;
}

/// Deterministic threshold rule; used to bootstrap training labels and
/// whenever the model for the task is untrained.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicLabeler {
    task: ProfileTask,
}

impl HeuristicLabeler {
    pub fn new(task: ProfileTask) -> Self {
        Self { task }
    }
}

impl Labeler for HeuristicLabeler {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn label(&self, record: &DeveloperRecord) -> Result<Label, ClassifierError> {
        Ok(self.task.heuristic_label(record))
    }
}

/// Ensemble prediction on the task's feature layout. Only constructible
/// from a trained ensemble.
#[derive(Debug)]
pub struct TrainedClassifier<'a> {
    task: ProfileTask,
    ensemble: &'a TreeEnsemble,
}

impl<'a> TrainedClassifier<'a> {
    pub fn new(task: ProfileTask, ensemble: &'a TreeEnsemble) -> Result<Self, ClassifierError> {
        if !ensemble.is_trained() {
            return Err(ClassifierError::UntrainedModelUse);
        }
        Ok(Self { task, ensemble })
    }
}

impl Labeler for TrainedClassifier<'_> {
    fn name(&self) -> &'static str {
        "trained"
    }

    fn label(&self, record: &DeveloperRecord) -> Result<Label, ClassifierError> {
        self.ensemble.predict(&self.task.features(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_ragged_examples() {
        let examples = vec![
            TrainingExample {
                features: vec![1.0, 2.0],
                label: 0,
            },
            TrainingExample {
                features: vec![1.0],
                label: 1,
            },
        ];

        assert_eq!(
            validate_examples(&examples),
            Err(ClassifierError::FeatureLengthMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn validate_rejects_out_of_range_labels() {
        let examples = vec![TrainingExample {
            features: vec![1.0],
            label: 4,
        }];

        assert_eq!(
            validate_examples(&examples),
            Err(ClassifierError::LabelOutOfRange(4))
        );
    }

    #[test]
    fn trained_classifier_requires_trained_ensemble() {
        let ensemble = TreeEnsemble::new(ForestConfig::default());

        let err = TrainedClassifier::new(ProfileTask::Quality, &ensemble).unwrap_err();

        assert_eq!(err, ClassifierError::UntrainedModelUse);
    }

    #[test]
    fn heuristic_labeler_follows_threshold_rule() {
        let labeler = HeuristicLabeler::new(ProfileTask::Complexity);
        let record = DeveloperRecord {
            total_stars: Some(12_000),
            ..Default::default()
        };

        assert_eq!(labeler.label(&record).unwrap(), 2);
        assert_eq!(labeler.name(), "heuristic");
    }
}
