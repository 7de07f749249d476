use std::time::Duration;

use crate::{classifier::ForestConfig, regressor::RegressorConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    /// Smallest corpus either classifier (or the code regressor) trains on.
    pub min_training_corpus: usize,
    /// Pause between records when the code-sample source is rate limited.
    pub inter_record_delay: Duration,
    pub max_code_samples: usize,
    /// Emit a progress line every this many records; 0 disables it.
    pub progress_every: usize,
    pub forest: ForestConfig,
    pub regressor: RegressorConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_training_corpus: 20,
            inter_record_delay: Duration::from_secs(2),
            max_code_samples: 5,
            progress_every: 50,
            forest: ForestConfig::default(),
            regressor: RegressorConfig::default(),
        }
    }
}

impl ScoringConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_training_corpus: parse_env_usize("DR_MIN_TRAINING_CORPUS")
                .unwrap_or(defaults.min_training_corpus),
            inter_record_delay: parse_env_u64("DR_INTER_RECORD_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.inter_record_delay),
            max_code_samples: parse_env_usize("DR_MAX_CODE_SAMPLES")
                .unwrap_or(defaults.max_code_samples),
            progress_every: parse_env_usize("DR_PROGRESS_EVERY").unwrap_or(defaults.progress_every),
            forest: ForestConfig::from_env(),
            regressor: RegressorConfig::from_env(),
        }
    }
}

fn parse_env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}

fn parse_env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_env(vars: &[(&str, Option<&str>)], f: impl FnOnce()) {
        use std::sync::Mutex;
        static ENV_GUARD: Mutex<()> = Mutex::new(());
        let _guard = ENV_GUARD.lock().unwrap();

        let prev: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, value)| {
                let previous = std::env::var(key).ok();
                match value {
                    Some(v) => unsafe { std::env::set_var(key, v) },
                    None => unsafe { std::env::remove_var(key) },
                }
                (key.to_string(), previous)
            })
            .collect();

        f();

        for (key, previous) in prev {
            if let Some(v) = previous {
                unsafe { std::env::set_var(&key, v) };
            } else {
                unsafe { std::env::remove_var(&key) };
            }
        }
    }

    #[test]
    fn defaults_match_batch_policy() {
        let config = ScoringConfig::default();

        assert_eq!(config.min_training_corpus, 20);
        assert_eq!(config.inter_record_delay, Duration::from_secs(2));
        assert_eq!(config.max_code_samples, 5);
        assert_eq!(config.progress_every, 50);
        assert_eq!(config.forest.n_trees, 50);
        assert_eq!(config.regressor.hidden_size, 8);
    }

    #[test]
    fn env_overrides_and_bad_values_fall_back() {
        with_env(
            &[
                ("DR_MIN_TRAINING_CORPUS", Some("5")),
                ("DR_INTER_RECORD_DELAY_MS", Some("250")),
                ("DR_MAX_CODE_SAMPLES", Some("not-a-number")),
                ("DR_PROGRESS_EVERY", None),
                ("DR_FOREST_TREES", Some("7")),
                ("DR_NN_EPOCHS", Some("10")),
            ],
            || {
                let config = ScoringConfig::from_env();

                assert_eq!(config.min_training_corpus, 5);
                assert_eq!(config.inter_record_delay, Duration::from_millis(250));
                assert_eq!(config.max_code_samples, 5);
                assert_eq!(config.progress_every, 50);
                assert_eq!(config.forest.n_trees, 7);
                assert_eq!(config.regressor.epochs, 10);
            },
        );
    }
}
