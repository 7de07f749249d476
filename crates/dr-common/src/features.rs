use serde::{Deserialize, Serialize};

use crate::DeveloperRecord;

/// Ordered numeric features consumed by one model.
pub type FeatureVector = Vec<f64>;

/// Ordinal class label in `0..NUM_CLASSES`.
pub type Label = u8;

pub const NUM_CLASSES: usize = 4;

pub const COMPLEXITY_FEATURE_COUNT: usize = 5;
pub const QUALITY_FEATURE_COUNT: usize = 6;

/// Commit recency is inverted against this horizon so that recent = high.
pub const RECENCY_HORIZON_DAYS: i64 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Simple,
    Medium,
    Complex,
    Advanced,
}

impl ComplexityLevel {
    pub fn from_label(label: Label) -> Option<Self> {
        match label {
            0 => Some(Self::Simple),
            1 => Some(Self::Medium),
            2 => Some(Self::Complex),
            3 => Some(Self::Advanced),
            _ => None,
        }
    }

    pub fn label(self) -> Label {
        self as Label
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Simple => "Simple",
            Self::Medium => "Medium",
            Self::Complex => "Complex",
            Self::Advanced => "Advanced",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Low,
    Medium,
    High,
    Excellent,
}

impl QualityLevel {
    pub fn from_label(label: Label) -> Option<Self> {
        match label {
            0 => Some(Self::Low),
            1 => Some(Self::Medium),
            2 => Some(Self::High),
            3 => Some(Self::Excellent),
            _ => None,
        }
    }

    pub fn label(self) -> Label {
        self as Label
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Excellent => "Excellent",
        }
    }

    /// Class → float score used when no code-based estimate exists.
    pub fn score(self) -> f64 {
        match self {
            Self::Low => 0.0,
            Self::Medium => 0.33,
            Self::High => 0.67,
            Self::Excellent => 1.0,
        }
    }
}

/// The two profile classification tasks. Each one fixes a feature layout
/// and a bootstrap labelling rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileTask {
    Complexity,
    Quality,
}

impl ProfileTask {
    pub fn name(self) -> &'static str {
        match self {
            Self::Complexity => "complexity",
            Self::Quality => "quality",
        }
    }

    pub fn feature_count(self) -> usize {
        match self {
            Self::Complexity => COMPLEXITY_FEATURE_COUNT,
            Self::Quality => QUALITY_FEATURE_COUNT,
        }
    }

    pub fn features(self, record: &DeveloperRecord) -> FeatureVector {
        match self {
            Self::Complexity => complexity_features(record),
            Self::Quality => quality_features(record),
        }
    }

    pub fn heuristic_label(self, record: &DeveloperRecord) -> Label {
        match self {
            Self::Complexity => complexity_label(record),
            Self::Quality => quality_label(record),
        }
    }

    pub fn level_name(self, label: Label) -> &'static str {
        let name = match self {
            Self::Complexity => ComplexityLevel::from_label(label).map(ComplexityLevel::name),
            Self::Quality => QualityLevel::from_label(label).map(QualityLevel::name),
        };
        name.unwrap_or("Unknown")
    }
}

fn count(value: Option<i64>) -> f64 {
    value.unwrap_or(0) as f64
}

fn ratio(value: Option<f64>) -> f64 {
    value.unwrap_or(0.0)
}

/// `999 - days`, floored at 0. An absent value counts as the horizon itself.
pub fn recency_feature(commit_recency_days: Option<i64>) -> f64 {
    let days = commit_recency_days.unwrap_or(RECENCY_HORIZON_DAYS);
    RECENCY_HORIZON_DAYS.saturating_sub(days).max(0) as f64
}

/// total_stars, public_repos, followers, stars_per_repo, language_score
pub fn complexity_features(record: &DeveloperRecord) -> FeatureVector {
    vec![
        count(record.total_stars),
        count(record.public_repos),
        count(record.followers),
        ratio(record.stars_per_repo),
        ratio(record.language_score),
    ]
}

/// stars_per_repo, followers, public_repos, language_score,
/// bio_relevance_score, inverted commit recency
pub fn quality_features(record: &DeveloperRecord) -> FeatureVector {
    vec![
        ratio(record.stars_per_repo),
        count(record.followers),
        count(record.public_repos),
        ratio(record.language_score),
        ratio(record.bio_relevance_score),
        recency_feature(record.commit_recency_days),
    ]
}

pub fn complexity_label(record: &DeveloperRecord) -> Label {
    let stars = record.total_stars.unwrap_or(0);
    let repos = record.public_repos.unwrap_or(0);

    if stars >= 100_000 || repos >= 100 {
        3
    } else if stars >= 10_000 || repos >= 50 {
        2
    } else if stars >= 1_000 || repos >= 10 {
        1
    } else {
        0
    }
}

pub fn quality_label(record: &DeveloperRecord) -> Label {
    let stars_per_repo = record.stars_per_repo.unwrap_or(0.0);

    if stars_per_repo >= 200.0 {
        3
    } else if stars_per_repo >= 50.0 {
        2
    } else if stars_per_repo >= 10.0 {
        1
    } else {
        0
    }
}
