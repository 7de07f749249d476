use rand::{
    SeedableRng,
    distributions::{Distribution, Uniform},
    rngs::StdRng,
};
use rayon::prelude::*;
use tracing::debug;

use super::{
    ClassifierError, ModelState, TrainingExample,
    tree::{ClassCounts, DecisionTree, TreeParams, majority_label},
    validate_examples,
};
use crate::features::{Label, NUM_CLASSES};

#[derive(Debug, Clone, PartialEq)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Features sampled per split; `None` uses ceil(sqrt(n_features)).
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 50,
            max_depth: 5,
            min_samples_split: 2,
            max_features: None,
            seed: 42,
        }
    }
}

impl ForestConfig {
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(key: &str, default: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|raw| raw.parse::<T>().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            n_trees: parse("DR_FOREST_TREES", defaults.n_trees).max(1),
            max_depth: parse("DR_FOREST_MAX_DEPTH", defaults.max_depth),
            min_samples_split: parse("DR_FOREST_MIN_SAMPLES_SPLIT", defaults.min_samples_split),
            max_features: std::env::var("DR_FOREST_MAX_FEATURES")
                .ok()
                .and_then(|raw| raw.parse().ok()),
            seed: parse("DR_FOREST_SEED", defaults.seed),
        }
    }

    fn tree_params(&self, n_features: usize) -> TreeParams {
        let sqrt_features = (n_features as f64).sqrt().ceil() as usize;
        TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            max_features: Some(self.max_features.unwrap_or(sqrt_features).max(1)),
        }
    }
}

/// Seed for tree `index`, stream `stream` (0 = bootstrap, 1 = splits).
/// SplitMix64 finalizer so neighbouring indices get unrelated seeds.
fn derive_seed(base: u64, index: usize, stream: u64) -> u64 {
    let mut z = base
        .wrapping_add((index as u64).wrapping_mul(2).wrapping_add(stream))
        .wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn bootstrap_sample(examples: &[TrainingExample], seed: u64) -> Vec<TrainingExample> {
    let dist = Uniform::from(0..examples.len());
    let mut rng = StdRng::seed_from_u64(seed);
    (0..examples.len())
        .map(|_| examples[dist.sample(&mut rng)].clone())
        .collect()
}

/// Label with the most votes; ties go to the smallest label.
pub fn majority_vote(votes: &[Label]) -> Option<Label> {
    if votes.is_empty() {
        return None;
    }
    let mut counts: ClassCounts = [0; NUM_CLASSES];
    for &vote in votes {
        if let Some(slot) = counts.get_mut(vote as usize) {
            *slot += 1;
        }
    }
    Some(majority_label(&counts))
}

/// Bagged ensemble of decision trees. Immutable once trained; retraining
/// replaces every tree.
#[derive(Debug, Clone)]
pub struct TreeEnsemble {
    config: ForestConfig,
    state: ModelState<Vec<DecisionTree>>,
}

impl TreeEnsemble {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            state: ModelState::Untrained,
        }
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.state.is_trained()
    }

    pub fn tree_count(&self) -> usize {
        match &self.state {
            ModelState::Trained(trees) => trees.len(),
            ModelState::Untrained => 0,
        }
    }

    /// Trains every tree on its own bootstrap resample. Trees share nothing
    /// mutable, so they are grown in parallel and collected in index order.
    pub fn fit(&mut self, examples: &[TrainingExample]) -> Result<(), ClassifierError> {
        let n_features = validate_examples(examples)?;
        let params = self.config.tree_params(n_features);
        let base_seed = self.config.seed;

        debug!(
            n_trees = self.config.n_trees,
            n_examples = examples.len(),
            n_features,
            max_features = ?params.max_features,
            "growing tree ensemble"
        );

        let trees = (0..self.config.n_trees.max(1))
            .into_par_iter()
            .map(|index| {
                let resample = bootstrap_sample(examples, derive_seed(base_seed, index, 0));
                DecisionTree::fit(&resample, &params, derive_seed(base_seed, index, 1))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.state = ModelState::Trained(trees);
        Ok(())
    }

    /// Per-class vote counts for one feature vector.
    pub fn votes(&self, features: &[f64]) -> Result<ClassCounts, ClassifierError> {
        let ModelState::Trained(trees) = &self.state else {
            return Err(ClassifierError::UntrainedModelUse);
        };

        let mut counts: ClassCounts = [0; NUM_CLASSES];
        for tree in trees {
            counts[tree.predict(features)? as usize] += 1;
        }
        Ok(counts)
    }

    pub fn predict(&self, features: &[f64]) -> Result<Label, ClassifierError> {
        let ModelState::Trained(trees) = &self.state else {
            return Err(ClassifierError::UntrainedModelUse);
        };

        let votes = trees
            .iter()
            .map(|tree| tree.predict(features))
            .collect::<Result<Vec<_>, _>>()?;
        majority_vote(&votes).ok_or(ClassifierError::UntrainedModelUse)
    }

    /// Fraction of `examples` whose label the ensemble reproduces.
    pub fn accuracy(&self, examples: &[TrainingExample]) -> Result<f64, ClassifierError> {
        if examples.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        let mut correct = 0usize;
        for example in examples {
            if self.predict(&example.features)? == example.label {
                correct += 1;
            }
        }
        Ok(correct as f64 / examples.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Vec<TrainingExample> {
        (0..80)
            .map(|i| {
                let x = i as f64;
                TrainingExample {
                    features: vec![x, (x * 3.0) % 7.0, 100.0 - x],
                    label: (i / 20) as Label,
                }
            })
            .collect()
    }

    fn small_config() -> ForestConfig {
        ForestConfig {
            n_trees: 9,
            max_depth: 4,
            ..ForestConfig::default()
        }
    }

    #[test]
    fn majority_vote_picks_most_common_label() {
        assert_eq!(majority_vote(&[0, 0, 1, 1, 1]), Some(1));
    }

    #[test]
    fn majority_vote_ties_pick_smallest_label() {
        assert_eq!(majority_vote(&[2, 2, 1, 1, 3]), Some(1));
        assert_eq!(majority_vote(&[3, 0]), Some(0));
        assert_eq!(majority_vote(&[]), None);
    }

    #[test]
    fn untrained_ensemble_refuses_prediction() {
        let ensemble = TreeEnsemble::new(small_config());

        assert!(!ensemble.is_trained());
        assert_eq!(
            ensemble.predict(&[1.0, 2.0, 3.0]),
            Err(ClassifierError::UntrainedModelUse)
        );
    }

    #[test]
    fn trains_requested_number_of_trees() {
        let mut ensemble = TreeEnsemble::new(small_config());

        ensemble.fit(&dataset()).unwrap();

        assert!(ensemble.is_trained());
        assert_eq!(ensemble.tree_count(), 9);
        let votes = ensemble.votes(&[5.0, 1.0, 95.0]).unwrap();
        assert_eq!(votes.iter().sum::<usize>(), 9);
    }

    #[test]
    fn fits_separable_data() {
        let mut ensemble = TreeEnsemble::new(small_config());
        let data = dataset();

        ensemble.fit(&data).unwrap();

        assert!(ensemble.accuracy(&data).unwrap() > 0.9);
        assert_eq!(ensemble.predict(&[2.0, 6.0, 98.0]).unwrap(), 0);
        assert_eq!(ensemble.predict(&[77.0, 0.0, 23.0]).unwrap(), 3);
    }

    #[test]
    fn same_seed_is_reproducible_across_parallel_builds() {
        let data = dataset();
        let mut a = TreeEnsemble::new(small_config());
        let mut b = TreeEnsemble::new(small_config());

        a.fit(&data).unwrap();
        b.fit(&data).unwrap();

        for step in 0..120 {
            let x = step as f64 * 0.75;
            let features = [x, x % 7.0, 100.0 - x];
            assert_eq!(a.votes(&features).unwrap(), b.votes(&features).unwrap());
        }
    }

    #[test]
    fn derived_seeds_differ_per_tree_and_stream() {
        let seeds: std::collections::HashSet<u64> = (0..50)
            .flat_map(|i| [derive_seed(42, i, 0), derive_seed(42, i, 1)])
            .collect();
        assert_eq!(seeds.len(), 100);
    }
}
