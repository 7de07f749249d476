use serde::Serialize;
use tracing::{info, warn};

use super::{
    ClassifierError, ForestConfig, HeuristicLabeler, Labeler, TrainedClassifier, TrainingExample,
    TreeEnsemble,
};
use crate::{
    DeveloperRecord,
    features::{Label, NUM_CLASSES, ProfileTask},
};

/// Diagnostics from one training pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingSummary {
    pub task: &'static str,
    pub samples: usize,
    /// Count of bootstrap labels per class, indexed by label.
    pub class_distribution: [usize; NUM_CLASSES],
    /// Share of the training set the ensemble reproduces.
    pub training_accuracy: f64,
}

/// Tree ensemble for one profile task, labelled from the task's threshold
/// rule. Predictions go through a [`Labeler`] picked from the ensemble's
/// lifecycle state.
#[derive(Debug, Clone)]
pub struct ProfilePredictor {
    task: ProfileTask,
    ensemble: TreeEnsemble,
    min_training_corpus: usize,
}

impl ProfilePredictor {
    pub fn new(task: ProfileTask, config: ForestConfig, min_training_corpus: usize) -> Self {
        Self {
            task,
            ensemble: TreeEnsemble::new(config),
            min_training_corpus,
        }
    }

    pub fn task(&self) -> ProfileTask {
        self.task
    }

    pub fn is_trained(&self) -> bool {
        self.ensemble.is_trained()
    }

    pub fn ensemble(&self) -> &TreeEnsemble {
        &self.ensemble
    }

    /// Retrains from scratch on `records`. Below the minimum corpus size the
    /// predictor is left untouched and `InsufficientData` is returned.
    pub fn train(
        &mut self,
        records: &[DeveloperRecord],
    ) -> Result<TrainingSummary, ClassifierError> {
        if records.len() < self.min_training_corpus {
            warn!(
                task = self.task.name(),
                required = self.min_training_corpus,
                actual = records.len(),
                "corpus too small, keeping heuristic labels"
            );
            return Err(ClassifierError::InsufficientData {
                required: self.min_training_corpus,
                actual: records.len(),
            });
        }

        let examples: Vec<TrainingExample> = records
            .iter()
            .map(|record| TrainingExample {
                features: self.task.features(record),
                label: self.task.heuristic_label(record),
            })
            .collect();

        let mut class_distribution = [0usize; NUM_CLASSES];
        for example in &examples {
            class_distribution[example.label as usize] += 1;
        }

        let mut ensemble = TreeEnsemble::new(self.ensemble.config().clone());
        ensemble.fit(&examples)?;
        let training_accuracy = ensemble.accuracy(&examples)?;
        self.ensemble = ensemble;

        let summary = TrainingSummary {
            task: self.task.name(),
            samples: examples.len(),
            class_distribution,
            training_accuracy,
        };

        for (label, count) in summary.class_distribution.iter().enumerate() {
            info!(
                task = summary.task,
                class = label,
                level = self.task.level_name(label as Label),
                count,
                "class distribution"
            );
        }
        info!(
            task = summary.task,
            samples = summary.samples,
            n_trees = self.ensemble.tree_count(),
            training_accuracy = summary.training_accuracy,
            "classifier trained"
        );

        Ok(summary)
    }

    /// Trained ensemble when available, the threshold rule otherwise.
    pub fn labeler(&self) -> Box<dyn Labeler + '_> {
        match TrainedClassifier::new(self.task, &self.ensemble) {
            Ok(trained) => Box::new(trained),
            Err(_) => Box::new(HeuristicLabeler::new(self.task)),
        }
    }

    pub fn predict(&self, record: &DeveloperRecord) -> Result<Label, ClassifierError> {
        self.labeler().label(record)
    }

    pub fn predict_batch(
        &self,
        records: &[DeveloperRecord],
    ) -> Result<Vec<Label>, ClassifierError> {
        let labeler = self.labeler();
        records.iter().map(|record| labeler.label(record)).collect()
    }
}
