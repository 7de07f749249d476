use rand::{SeedableRng, rngs::StdRng, seq::index::sample};

use super::{ClassifierError, TrainingExample, validate_examples};
use crate::features::{Label, NUM_CLASSES};

/// Growth limits for a single tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    /// Nodes with fewer examples than this become leaves.
    pub min_samples_split: usize,
    /// Features considered at each split. `None` means all of them.
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 5,
            min_samples_split: 2,
            max_features: None,
        }
    }
}

pub type ClassCounts = [usize; NUM_CLASSES];

#[derive(Debug, Clone, PartialEq)]
enum TreeNode {
    Leaf {
        label: Label,
        counts: ClassCounts,
    },
    Split {
        feature: usize,
        threshold: f64,
        /// feature <= threshold
        left: Box<TreeNode>,
        /// feature > threshold
        right: Box<TreeNode>,
    },
}

/// Binary CART classifier over the four ordinal classes.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    root: TreeNode,
    n_features: usize,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

struct Builder<'a> {
    examples: &'a [TrainingExample],
    params: TreeParams,
    n_features: usize,
    rng: StdRng,
}

impl DecisionTree {
    /// Grows a tree on `examples`. The same examples, params and seed always
    /// yield the same structure.
    pub fn fit(
        examples: &[TrainingExample],
        params: &TreeParams,
        seed: u64,
    ) -> Result<Self, ClassifierError> {
        let n_features = validate_examples(examples)?;
        let mut builder = Builder {
            examples,
            params: *params,
            n_features,
            rng: StdRng::seed_from_u64(seed),
        };

        let indices: Vec<usize> = (0..examples.len()).collect();
        let root = builder.grow(indices, 0);

        Ok(Self { root, n_features })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn predict(&self, features: &[f64]) -> Result<Label, ClassifierError> {
        self.leaf_for(features).map(|(label, _)| label)
    }

    /// Training class counts of the leaf `features` falls into.
    pub fn leaf_distribution(&self, features: &[f64]) -> Result<ClassCounts, ClassifierError> {
        self.leaf_for(features).map(|(_, counts)| counts)
    }

    fn leaf_for(&self, features: &[f64]) -> Result<(Label, ClassCounts), ClassifierError> {
        if features.len() != self.n_features {
            return Err(ClassifierError::FeatureLengthMismatch {
                expected: self.n_features,
                actual: features.len(),
            });
        }

        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { label, counts } => return Ok((*label, *counts)),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if features[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    /// Leaf depth 0; each split adds one level.
    pub fn depth(&self) -> usize {
        fn walk(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        walk(&self.root)
    }

    pub fn leaf_count(&self) -> usize {
        fn walk(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 1,
                TreeNode::Split { left, right, .. } => walk(left) + walk(right),
            }
        }
        walk(&self.root)
    }
}

impl Builder<'_> {
    fn grow(&mut self, indices: Vec<usize>, depth: usize) -> TreeNode {
        let counts = self.class_counts(&indices);
        let distinct = counts.iter().filter(|&&c| c > 0).count();

        if depth >= self.params.max_depth
            || distinct < 2
            || indices.len() < self.params.min_samples_split.max(2)
        {
            return leaf(counts);
        }

        let parent_impurity = gini(&counts, indices.len());
        let Some(split) = self.best_split(&indices) else {
            return leaf(counts);
        };
        if split.impurity >= parent_impurity {
            return leaf(counts);
        }

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&idx| self.examples[idx].features[split.feature] <= split.threshold);

        if left.is_empty() || right.is_empty() {
            return leaf(counts);
        }

        TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.grow(left, depth + 1)),
            right: Box::new(self.grow(right, depth + 1)),
        }
    }

    fn class_counts(&self, indices: &[usize]) -> ClassCounts {
        let mut counts = [0usize; NUM_CLASSES];
        for &idx in indices {
            counts[self.examples[idx].label as usize] += 1;
        }
        counts
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        let k = self
            .params
            .max_features
            .unwrap_or(self.n_features)
            .clamp(1, self.n_features);

        if k == self.n_features {
            return (0..self.n_features).collect();
        }

        let mut chosen = sample(&mut self.rng, self.n_features, k).into_vec();
        chosen.sort_unstable();
        chosen
    }

    /// Lowest weighted child impurity among the sampled features. Ties keep
    /// the earlier feature and the smaller threshold.
    fn best_split(&mut self, indices: &[usize]) -> Option<SplitCandidate> {
        let mut best: Option<SplitCandidate> = None;

        for feature in self.candidate_features() {
            let mut column: Vec<(f64, Label)> = indices
                .iter()
                .map(|&idx| {
                    let example = &self.examples[idx];
                    (example.features[feature], example.label)
                })
                .collect();
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            if let Some(candidate) = sweep_thresholds(feature, &column) {
                let better = best
                    .as_ref()
                    .map(|current| candidate.impurity < current.impurity)
                    .unwrap_or(true);
                if better {
                    best = Some(candidate);
                }
            }
        }

        best
    }
}

/// Walks the sorted column once, evaluating a midpoint threshold between
/// every pair of consecutive distinct values.
fn sweep_thresholds(feature: usize, column: &[(f64, Label)]) -> Option<SplitCandidate> {
    let total = column.len();
    let mut right = [0usize; NUM_CLASSES];
    for &(_, label) in column {
        right[label as usize] += 1;
    }
    let mut left = [0usize; NUM_CLASSES];

    let mut best: Option<SplitCandidate> = None;
    for i in 0..total.saturating_sub(1) {
        let (value, label) = column[i];
        left[label as usize] += 1;
        right[label as usize] -= 1;

        let next = column[i + 1].0;
        if next <= value {
            continue;
        }

        let n_left = i + 1;
        let n_right = total - n_left;
        let impurity = (n_left as f64 * gini(&left, n_left)
            + n_right as f64 * gini(&right, n_right))
            / total as f64;

        let better = best
            .as_ref()
            .map(|current| impurity < current.impurity)
            .unwrap_or(true);
        if better {
            best = Some(SplitCandidate {
                feature,
                threshold: value + (next - value) / 2.0,
                impurity,
            });
        }
    }

    best
}

/// Gini = 1 - Σ p²
pub(crate) fn gini(counts: &ClassCounts, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let n = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / n;
            p * p
        })
        .sum::<f64>()
}

/// Most frequent class; ties go to the smallest label.
pub(crate) fn majority_label(counts: &ClassCounts) -> Label {
    let mut best = 0usize;
    for class in 1..NUM_CLASSES {
        if counts[class] > counts[best] {
            best = class;
        }
    }
    best as Label
}

fn leaf(counts: ClassCounts) -> TreeNode {
    TreeNode::Leaf {
        label: majority_label(&counts),
        counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(features: &[f64], label: Label) -> TrainingExample {
        TrainingExample {
            features: features.to_vec(),
            label,
        }
    }

    fn separable() -> Vec<TrainingExample> {
        vec![
            example(&[1.0, 10.0], 0),
            example(&[2.0, 11.0], 0),
            example(&[3.0, 9.0], 0),
            example(&[7.0, 10.0], 2),
            example(&[8.0, 12.0], 2),
            example(&[9.0, 8.0], 2),
        ]
    }

    #[test]
    fn gini_of_pure_and_mixed_nodes() {
        assert_eq!(gini(&[4, 0, 0, 0], 4), 0.0);
        assert!((gini(&[2, 2, 0, 0], 4) - 0.5).abs() < 1e-12);
        assert!((gini(&[1, 1, 1, 1], 4) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn majority_ties_pick_smallest_label() {
        assert_eq!(majority_label(&[0, 2, 2, 0]), 1);
        assert_eq!(majority_label(&[1, 1, 1, 1]), 0);
        assert_eq!(majority_label(&[0, 0, 1, 3]), 3);
    }

    #[test]
    fn splits_at_midpoint_between_distinct_values() {
        let tree = DecisionTree::fit(&separable(), &TreeParams::default(), 7).unwrap();

        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.predict(&[3.0, 0.0]).unwrap(), 0);
        assert_eq!(tree.predict(&[4.9, 0.0]).unwrap(), 0);
        assert_eq!(tree.predict(&[5.1, 0.0]).unwrap(), 2);
    }

    #[test]
    fn leaf_distribution_reports_training_counts() {
        let tree = DecisionTree::fit(&separable(), &TreeParams::default(), 7).unwrap();

        assert_eq!(tree.leaf_distribution(&[1.0, 0.0]).unwrap(), [3, 0, 0, 0]);
        assert_eq!(tree.leaf_distribution(&[9.0, 0.0]).unwrap(), [0, 0, 3, 0]);
    }

    #[test]
    fn respects_max_depth() {
        let examples: Vec<_> = (0..16)
            .map(|i| example(&[i as f64], (i % 4) as Label))
            .collect();
        let params = TreeParams {
            max_depth: 2,
            ..TreeParams::default()
        };

        let tree = DecisionTree::fit(&examples, &params, 1).unwrap();

        assert!(tree.depth() <= 2);
        assert!(tree.leaf_count() <= 4);
    }

    #[test]
    fn single_class_yields_single_leaf() {
        let examples = vec![example(&[1.0], 3), example(&[2.0], 3), example(&[5.0], 3)];

        let tree = DecisionTree::fit(&examples, &TreeParams::default(), 0).unwrap();

        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.predict(&[100.0]).unwrap(), 3);
    }

    #[test]
    fn min_samples_split_stops_growth() {
        let params = TreeParams {
            min_samples_split: 10,
            ..TreeParams::default()
        };

        let tree = DecisionTree::fit(&separable(), &params, 0).unwrap();

        assert_eq!(tree.leaf_count(), 1);
        // 3 vs 3 tie → smallest label
        assert_eq!(tree.predict(&[9.0, 9.0]).unwrap(), 0);
    }

    #[test]
    fn same_seed_gives_same_predictions() {
        let examples: Vec<_> = (0..60)
            .map(|i| {
                let x = i as f64;
                example(&[x, (x * 7.0) % 13.0, (x * 3.0) % 5.0], ((i / 15) % 4) as Label)
            })
            .collect();
        let params = TreeParams {
            max_depth: 4,
            min_samples_split: 2,
            max_features: Some(2),
        };

        let a = DecisionTree::fit(&examples, &params, 42).unwrap();
        let b = DecisionTree::fit(&examples, &params, 42).unwrap();

        assert_eq!(a, b);
        for step in 0..100 {
            let x = step as f64 * 0.7;
            let features = [x, x % 13.0, x % 5.0];
            assert_eq!(a.predict(&features).unwrap(), b.predict(&features).unwrap());
        }
    }

    #[test]
    fn rejects_wrong_feature_length_at_prediction() {
        let tree = DecisionTree::fit(&separable(), &TreeParams::default(), 0).unwrap();

        let err = tree.predict(&[1.0]).unwrap_err();

        assert_eq!(
            err,
            ClassifierError::FeatureLengthMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn rejects_empty_training_set() {
        let err = DecisionTree::fit(&[], &TreeParams::default(), 0).unwrap_err();
        assert_eq!(err, ClassifierError::EmptyTrainingSet);
    }
}
