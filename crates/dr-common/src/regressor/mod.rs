//! Single-hidden-layer feed-forward regressor with sigmoid activations.
//!
//! The network maps a fixed-size feature vector to one value in `[0, 1]`
//! and is trained with plain backpropagation on mean squared error.

pub mod code_quality;

pub use code_quality::{
    CODE_FEATURE_COUNT, CodeQualityScorer, CodeTrainingSample, code_features, proxy_score,
};

use rand::{
    SeedableRng,
    distributions::{Distribution, Uniform},
    rngs::StdRng,
    seq::SliceRandom,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::{classifier::ModelState, features::FeatureVector};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegressorError {
    #[error("feature vector length mismatch: expected {expected}, got {actual}")]
    FeatureLengthMismatch { expected: usize, actual: usize },
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("not enough samples to train: need {required}, got {actual}")]
    InsufficientData { required: usize, actual: usize },
    #[error("target {0} is outside [0, 1]")]
    TargetOutOfRange(f64),
    #[error("input contains a non-finite value")]
    NonFiniteInput,
    #[error("prediction requested from an untrained regressor")]
    UntrainedModelUse,
    #[error("invalid regressor config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegressorConfig {
    pub hidden_size: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    /// `None` trains full-batch.
    pub batch_size: Option<usize>,
    pub seed: u64,
}

impl Default for RegressorConfig {
    fn default() -> Self {
        Self {
            hidden_size: 8,
            learning_rate: 0.3,
            epochs: 1000,
            batch_size: None,
            seed: 42,
        }
    }
}

impl RegressorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            hidden_size: std::env::var("DR_NN_HIDDEN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.hidden_size),
            learning_rate: std::env::var("DR_NN_LEARNING_RATE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.learning_rate),
            epochs: std::env::var("DR_NN_EPOCHS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.epochs),
            batch_size: std::env::var("DR_NN_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|size: &usize| *size > 0),
            seed: std::env::var("DR_NN_SEED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.seed),
        }
    }

    fn validate(&self) -> Result<(), RegressorError> {
        if self.hidden_size == 0 {
            return Err(RegressorError::InvalidConfig("hidden_size must be > 0".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(RegressorError::InvalidConfig(
                "learning_rate must be a positive number".into(),
            ));
        }
        if self.batch_size == Some(0) {
            return Err(RegressorError::InvalidConfig("batch_size must be > 0".into()));
        }
        Ok(())
    }
}

/// Overflow-free logistic function.
fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Weights of the two dense layers. Matrices are row-major by destination
/// unit: `hidden[j][i]` connects input `i` to hidden unit `j`.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkWeights {
    pub hidden: Vec<Vec<f64>>,
    pub hidden_bias: Vec<f64>,
    pub output: Vec<Vec<f64>>,
    pub output_bias: Vec<f64>,
}

/// Layer activations from one forward pass.
struct Activations {
    hidden: Vec<f64>,
    output: Vec<f64>,
}

impl NetworkWeights {
    /// Xavier-uniform weights, zero biases.
    pub fn initialize(
        input_size: usize,
        hidden_size: usize,
        output_size: usize,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut layer = |fan_in: usize, fan_out: usize| -> Vec<Vec<f64>> {
            let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
            let dist = Uniform::new_inclusive(-limit, limit);
            (0..fan_out)
                .map(|_| (0..fan_in).map(|_| dist.sample(&mut rng)).collect())
                .collect()
        };

        let hidden = layer(input_size, hidden_size);
        let output = layer(hidden_size, output_size);
        Self {
            hidden,
            hidden_bias: vec![0.0; hidden_size],
            output,
            output_bias: vec![0.0; output_size],
        }
    }

    pub fn input_size(&self) -> usize {
        self.hidden.first().map_or(0, Vec::len)
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden.len()
    }

    pub fn output_size(&self) -> usize {
        self.output.len()
    }

    fn forward(&self, input: &[f64]) -> Activations {
        let dense = |weights: &[Vec<f64>], bias: &[f64], x: &[f64]| -> Vec<f64> {
            weights
                .iter()
                .zip(bias)
                .map(|(row, b)| sigmoid(row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + b))
                .collect()
        };

        let hidden = dense(&self.hidden, &self.hidden_bias, input);
        let output = dense(&self.output, &self.output_bias, &hidden);
        Activations { hidden, output }
    }
}

/// Accumulated gradients for one batch, same shapes as [`NetworkWeights`].
struct Gradients {
    hidden: Vec<Vec<f64>>,
    hidden_bias: Vec<f64>,
    output: Vec<Vec<f64>>,
    output_bias: Vec<f64>,
}

impl Gradients {
    fn zeros_like(weights: &NetworkWeights) -> Self {
        Self {
            hidden: vec![vec![0.0; weights.input_size()]; weights.hidden_size()],
            hidden_bias: vec![0.0; weights.hidden_size()],
            output: vec![vec![0.0; weights.hidden_size()]; weights.output_size()],
            output_bias: vec![0.0; weights.output_size()],
        }
    }

    /// Backpropagates the squared error of one sample; returns that error.
    fn accumulate(&mut self, weights: &NetworkWeights, input: &[f64], target: f64) -> f64 {
        let acts = weights.forward(input);

        let output_delta: Vec<f64> = acts
            .output
            .iter()
            .map(|&y| (y - target) * y * (1.0 - y))
            .collect();

        let hidden_delta: Vec<f64> = acts
            .hidden
            .iter()
            .enumerate()
            .map(|(j, &h)| {
                let back: f64 = output_delta
                    .iter()
                    .zip(&weights.output)
                    .map(|(delta, row)| delta * row[j])
                    .sum();
                back * h * (1.0 - h)
            })
            .collect();

        for (k, delta) in output_delta.iter().enumerate() {
            for (j, h) in acts.hidden.iter().enumerate() {
                self.output[k][j] += delta * h;
            }
            self.output_bias[k] += delta;
        }
        for (j, delta) in hidden_delta.iter().enumerate() {
            for (i, x) in input.iter().enumerate() {
                self.hidden[j][i] += delta * x;
            }
            self.hidden_bias[j] += delta;
        }

        acts.output.iter().map(|y| (y - target).powi(2)).sum()
    }

    fn apply(self, weights: &mut NetworkWeights, step: f64) {
        for (row, grad) in weights.hidden.iter_mut().zip(self.hidden) {
            for (w, g) in row.iter_mut().zip(grad) {
                *w -= step * g;
            }
        }
        for (b, g) in weights.hidden_bias.iter_mut().zip(self.hidden_bias) {
            *b -= step * g;
        }
        for (row, grad) in weights.output.iter_mut().zip(self.output) {
            for (w, g) in row.iter_mut().zip(grad) {
                *w -= step * g;
            }
        }
        for (b, g) in weights.output_bias.iter_mut().zip(self.output_bias) {
            *b -= step * g;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionSample {
    pub features: FeatureVector,
    /// Expected output, already normalized to `[0, 1]`.
    pub target: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitReport {
    pub epochs: usize,
    pub initial_loss: f64,
    pub final_loss: f64,
}

#[derive(Debug, Clone)]
pub struct FeedForwardRegressor {
    input_size: usize,
    config: RegressorConfig,
    state: ModelState<NetworkWeights>,
}

impl FeedForwardRegressor {
    pub fn new(input_size: usize, config: RegressorConfig) -> Result<Self, RegressorError> {
        if input_size == 0 {
            return Err(RegressorError::InvalidConfig("input_size must be > 0".into()));
        }
        config.validate()?;
        Ok(Self {
            input_size,
            config,
            state: ModelState::Untrained,
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn config(&self) -> &RegressorConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.state.is_trained()
    }

    pub fn weights(&self) -> Option<&NetworkWeights> {
        match &self.state {
            ModelState::Trained(weights) => Some(weights),
            ModelState::Untrained => None,
        }
    }

    fn check_input(&self, features: &[f64]) -> Result<(), RegressorError> {
        if features.len() != self.input_size {
            return Err(RegressorError::FeatureLengthMismatch {
                expected: self.input_size,
                actual: features.len(),
            });
        }
        if features.iter().any(|v| !v.is_finite()) {
            return Err(RegressorError::NonFiniteInput);
        }
        Ok(())
    }

    /// Trains fresh weights on `samples`, replacing any previous state.
    pub fn fit(&mut self, samples: &[RegressionSample]) -> Result<FitReport, RegressorError> {
        if samples.is_empty() {
            return Err(RegressorError::EmptyTrainingSet);
        }
        for sample in samples {
            self.check_input(&sample.features)?;
            if !(0.0..=1.0).contains(&sample.target) {
                return Err(RegressorError::TargetOutOfRange(sample.target));
            }
        }

        let mut weights = NetworkWeights::initialize(
            self.input_size,
            self.config.hidden_size,
            1,
            self.config.seed,
        );
        let mut shuffle_rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(1));
        let batch_size = self.config.batch_size.unwrap_or(samples.len()).max(1);
        let mut order: Vec<usize> = (0..samples.len()).collect();

        let mut initial_loss = None;
        let mut epoch_loss = 0.0;
        for epoch in 0..self.config.epochs {
            if batch_size < samples.len() {
                order.shuffle(&mut shuffle_rng);
            }

            epoch_loss = 0.0;
            for batch in order.chunks(batch_size) {
                let mut grads = Gradients::zeros_like(&weights);
                for &idx in batch {
                    let sample = &samples[idx];
                    epoch_loss += grads.accumulate(&weights, &sample.features, sample.target);
                }
                grads.apply(&mut weights, self.config.learning_rate / batch.len() as f64);
            }
            epoch_loss /= samples.len() as f64;
            initial_loss.get_or_insert(epoch_loss);

            if epoch % 100 == 0 {
                debug!(epoch, loss = epoch_loss, "regressor epoch");
            }
        }

        let report = FitReport {
            epochs: self.config.epochs,
            initial_loss: initial_loss.unwrap_or(epoch_loss),
            final_loss: mean_squared_error(&weights, samples),
        };
        info!(
            samples = samples.len(),
            epochs = report.epochs,
            initial_loss = report.initial_loss,
            final_loss = report.final_loss,
            "regressor trained"
        );

        self.state = ModelState::Trained(weights);
        Ok(report)
    }

    /// Forward pass; result is in `[0, 1]`.
    pub fn predict(&self, features: &[f64]) -> Result<f64, RegressorError> {
        let ModelState::Trained(weights) = &self.state else {
            return Err(RegressorError::UntrainedModelUse);
        };
        self.check_input(features)?;
        let output = weights.forward(features).output;
        Ok(output.first().copied().unwrap_or(0.0).clamp(0.0, 1.0))
    }
}

fn mean_squared_error(weights: &NetworkWeights, samples: &[RegressionSample]) -> f64 {
    let total: f64 = samples
        .iter()
        .map(|sample| {
            let y = weights.forward(&sample.features).output[0];
            (y - sample.target).powi(2)
        })
        .sum();
    total / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::OnceLock;

    fn linear_samples() -> Vec<RegressionSample> {
        (0..40)
            .map(|i| {
                let a = (i % 10) as f64 / 10.0;
                let b = (i / 10) as f64 / 4.0;
                RegressionSample {
                    features: vec![a, b],
                    target: 0.1 + 0.4 * a + 0.4 * b,
                }
            })
            .collect()
    }

    fn trained() -> &'static FeedForwardRegressor {
        static MODEL: OnceLock<FeedForwardRegressor> = OnceLock::new();
        MODEL.get_or_init(|| {
            let mut model = FeedForwardRegressor::new(2, RegressorConfig::default()).unwrap();
            model.fit(&linear_samples()).unwrap();
            model
        })
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(-1_000.0) >= 0.0);
        assert!(sigmoid(1_000.0) <= 1.0);
        assert!(sigmoid(-1_000.0).is_finite());
    }

    #[test]
    fn untrained_regressor_refuses_prediction() {
        let model = FeedForwardRegressor::new(5, RegressorConfig::default()).unwrap();

        assert!(!model.is_trained());
        assert_eq!(
            model.predict(&[0.0; 5]),
            Err(RegressorError::UntrainedModelUse)
        );
    }

    #[test]
    fn rejects_invalid_configs() {
        let zero_hidden = RegressorConfig {
            hidden_size: 0,
            ..RegressorConfig::default()
        };
        let bad_rate = RegressorConfig {
            learning_rate: f64::NAN,
            ..RegressorConfig::default()
        };

        assert!(matches!(
            FeedForwardRegressor::new(5, zero_hidden),
            Err(RegressorError::InvalidConfig(_))
        ));
        assert!(matches!(
            FeedForwardRegressor::new(5, bad_rate),
            Err(RegressorError::InvalidConfig(_))
        ));
        assert!(matches!(
            FeedForwardRegressor::new(0, RegressorConfig::default()),
            Err(RegressorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_bad_training_data() {
        let mut model = FeedForwardRegressor::new(2, RegressorConfig::default()).unwrap();

        assert_eq!(model.fit(&[]), Err(RegressorError::EmptyTrainingSet));
        assert_eq!(
            model.fit(&[RegressionSample {
                features: vec![0.5, 0.5],
                target: 1.5,
            }]),
            Err(RegressorError::TargetOutOfRange(1.5))
        );
        assert_eq!(
            model.fit(&[RegressionSample {
                features: vec![0.5],
                target: 0.5,
            }]),
            Err(RegressorError::FeatureLengthMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert!(!model.is_trained());
    }

    #[test]
    fn training_reduces_loss() {
        let mut model = FeedForwardRegressor::new(
            2,
            RegressorConfig {
                epochs: 2_000,
                ..RegressorConfig::default()
            },
        )
        .unwrap();

        let report = model.fit(&linear_samples()).unwrap();

        assert!(report.final_loss < report.initial_loss);
        let low = model.predict(&[0.0, 0.0]).unwrap();
        let high = model.predict(&[0.9, 0.75]).unwrap();
        assert!(low < high);
    }

    #[test]
    fn mini_batch_training_is_reproducible() {
        let config = RegressorConfig {
            epochs: 50,
            batch_size: Some(8),
            ..RegressorConfig::default()
        };
        let mut a = FeedForwardRegressor::new(2, config.clone()).unwrap();
        let mut b = FeedForwardRegressor::new(2, config).unwrap();

        a.fit(&linear_samples()).unwrap();
        b.fit(&linear_samples()).unwrap();

        assert_eq!(a.weights(), b.weights());
    }

    #[test]
    fn weights_have_declared_shapes() {
        let weights = NetworkWeights::initialize(5, 8, 1, 7);

        assert_eq!(weights.input_size(), 5);
        assert_eq!(weights.hidden_size(), 8);
        assert_eq!(weights.output_size(), 1);
        let limit = (6.0f64 / 13.0).sqrt();
        assert!(weights.hidden.iter().flatten().all(|w| w.abs() <= limit));
    }

    #[test]
    fn prediction_rejects_non_finite_input() {
        let model = trained();

        assert_eq!(
            model.predict(&[f64::NAN, 0.0]),
            Err(RegressorError::NonFiniteInput)
        );
    }

    proptest! {
        #[test]
        fn output_is_bounded(a in -1.0e6f64..1.0e6, b in -1.0e6f64..1.0e6) {
            let model = trained();
            let y = model.predict(&[a, b]).unwrap();
            prop_assert!((0.0..=1.0).contains(&y));
        }
    }
}
