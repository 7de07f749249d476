use tracing::warn;

use super::{FeedForwardRegressor, FitReport, RegressionSample, RegressorConfig, RegressorError};
use crate::{
    code_metrics::AggregatedCodeMetrics,
    features::{FeatureVector, Label, NUM_CLASSES},
};

pub const CODE_FEATURE_COUNT: usize = 5;

/// Capped ratios of the aggregated metrics:
/// complexity/10, maintainability/100, loc/1000, functions/50,
/// complexity-per-function/5.
pub fn code_features(metrics: &AggregatedCodeMetrics) -> FeatureVector {
    vec![
        (metrics.avg_complexity / 10.0).min(1.0),
        (metrics.maintainability_index / 100.0).clamp(0.0, 1.0),
        (metrics.lines_of_code as f64 / 1000.0).min(1.0),
        (metrics.num_functions as f64 / 50.0).min(1.0),
        (metrics.complexity_per_function / 5.0).min(1.0),
    ]
}

/// Stand-in estimate for an untrained scorer: maintainability / 100.
pub fn proxy_score(metrics: &AggregatedCodeMetrics) -> f64 {
    (metrics.maintainability_index / 100.0).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeTrainingSample {
    pub metrics: AggregatedCodeMetrics,
    /// Normalized quality in `[0, 1]`.
    pub target: f64,
}

impl CodeTrainingSample {
    /// Target = label / 3, so Low..Excellent spans 0..1.
    pub fn from_quality_label(metrics: AggregatedCodeMetrics, label: Label) -> Self {
        let top = (NUM_CLASSES - 1) as f64;
        Self {
            metrics,
            target: (label as f64 / top).clamp(0.0, 1.0),
        }
    }
}

/// Regressor over the five code features.
#[derive(Debug, Clone)]
pub struct CodeQualityScorer {
    regressor: FeedForwardRegressor,
    min_training_samples: usize,
}

impl CodeQualityScorer {
    pub fn new(
        config: RegressorConfig,
        min_training_samples: usize,
    ) -> Result<Self, RegressorError> {
        Ok(Self {
            regressor: FeedForwardRegressor::new(CODE_FEATURE_COUNT, config)?,
            min_training_samples,
        })
    }

    pub fn is_trained(&self) -> bool {
        self.regressor.is_trained()
    }

    pub fn train(&mut self, samples: &[CodeTrainingSample]) -> Result<FitReport, RegressorError> {
        if samples.len() < self.min_training_samples {
            warn!(
                required = self.min_training_samples,
                actual = samples.len(),
                "too few code samples, regressor stays untrained"
            );
            return Err(RegressorError::InsufficientData {
                required: self.min_training_samples,
                actual: samples.len(),
            });
        }

        let samples: Vec<RegressionSample> = samples
            .iter()
            .map(|sample| RegressionSample {
                features: code_features(&sample.metrics),
                target: sample.target,
            })
            .collect();
        self.regressor.fit(&samples)
    }

    pub fn predict(&self, metrics: &AggregatedCodeMetrics) -> Result<f64, RegressorError> {
        self.regressor.predict(&code_features(metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(avg_complexity: f64, mi: f64, loc: u64) -> AggregatedCodeMetrics {
        AggregatedCodeMetrics {
            files: 1,
            avg_complexity,
            maintainability_index: mi,
            lines_of_code: loc,
            num_functions: 10,
            complexity_per_function: avg_complexity / 10.0,
        }
    }

    #[test]
    fn features_are_capped_ratios() {
        let m = AggregatedCodeMetrics {
            files: 3,
            avg_complexity: 25.0,
            maintainability_index: 64.0,
            lines_of_code: 250,
            num_functions: 120,
            complexity_per_function: 2.5,
        };

        assert_eq!(code_features(&m), vec![1.0, 0.64, 0.25, 1.0, 0.5]);
    }

    #[test]
    fn proxy_is_clamped_maintainability() {
        assert_eq!(proxy_score(&metrics(2.0, 72.0, 10)), 0.72);
        assert_eq!(proxy_score(&metrics(2.0, 130.0, 10)), 1.0);
        assert_eq!(proxy_score(&metrics(2.0, -5.0, 10)), 0.0);
    }

    #[test]
    fn label_targets_span_unit_interval() {
        let m = metrics(1.0, 50.0, 10);

        assert_eq!(CodeTrainingSample::from_quality_label(m.clone(), 0).target, 0.0);
        assert_eq!(CodeTrainingSample::from_quality_label(m.clone(), 3).target, 1.0);
        assert!((CodeTrainingSample::from_quality_label(m, 1).target - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn too_few_samples_keep_scorer_untrained() {
        let mut scorer = CodeQualityScorer::new(RegressorConfig::default(), 20).unwrap();
        let samples: Vec<_> = (0..5)
            .map(|i| CodeTrainingSample::from_quality_label(metrics(i as f64, 60.0, 100), 1))
            .collect();

        assert_eq!(
            scorer.train(&samples),
            Err(RegressorError::InsufficientData {
                required: 20,
                actual: 5
            })
        );
        assert!(!scorer.is_trained());
        assert_eq!(
            scorer.predict(&metrics(1.0, 60.0, 100)),
            Err(RegressorError::UntrainedModelUse)
        );
    }

    #[test]
    fn trained_scorer_predicts_within_bounds() {
        let mut scorer = CodeQualityScorer::new(
            RegressorConfig {
                epochs: 200,
                ..RegressorConfig::default()
            },
            20,
        )
        .unwrap();
        let samples: Vec<_> = (0..24)
            .map(|i| {
                let mi = 40.0 + 2.5 * i as f64;
                CodeTrainingSample::from_quality_label(metrics(3.0, mi, 200), (i / 6) as Label)
            })
            .collect();

        scorer.train(&samples).unwrap();

        let score = scorer.predict(&metrics(3.0, 80.0, 200)).unwrap();
        assert!(scorer.is_trained());
        assert!((0.0..=1.0).contains(&score));
    }
}
