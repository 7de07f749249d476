//! Per-developer reduction of per-file static-analysis readings.

pub mod heuristic;

pub use heuristic::HeuristicAnalyzer;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodeMetricsError {
    #[error("no analyzable code samples")]
    NoAnalyzableSamples,
    #[error("analysis failed: {0}")]
    Analysis(String),
}

/// Raw readings a static analyzer reports for one source text.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReadings {
    pub function_complexities: Vec<f64>,
    pub maintainability_index: f64,
    pub lines_of_code: u64,
}

/// Boundary to whatever computes [`FileReadings`] from source text.
pub trait StaticAnalyzer: Send + Sync {
    fn analyze(&self, source: &str) -> Result<FileReadings, CodeMetricsError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetrics {
    pub avg_complexity: f64,
    pub maintainability_index: f64,
    pub lines_of_code: u64,
    pub num_functions: u64,
}

impl FileMetrics {
    /// A file without functions counts as complexity 1.
    pub fn from_readings(readings: &FileReadings) -> Result<Self, CodeMetricsError> {
        let complexities = &readings.function_complexities;
        if complexities.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Err(CodeMetricsError::Analysis(
                "function complexity must be a non-negative number".into(),
            ));
        }
        let mi = readings.maintainability_index;
        if !mi.is_finite() || mi < 0.0 {
            return Err(CodeMetricsError::Analysis(format!(
                "maintainability index {mi} is not a non-negative number"
            )));
        }

        let avg_complexity = if complexities.is_empty() {
            1.0
        } else {
            complexities.iter().sum::<f64>() / complexities.len() as f64
        };

        Ok(Self {
            avg_complexity,
            maintainability_index: mi,
            lines_of_code: readings.lines_of_code,
            num_functions: complexities.len() as u64,
        })
    }

    pub fn complexity_per_function(&self) -> f64 {
        self.avg_complexity / self.num_functions.max(1) as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedCodeMetrics {
    /// Number of files the record was built from; always at least 1.
    pub files: usize,
    pub avg_complexity: f64,
    pub maintainability_index: f64,
    pub lines_of_code: u64,
    pub num_functions: u64,
    pub complexity_per_function: f64,
}

/// Means for complexity, maintainability and complexity-per-function;
/// sums for lines and functions.
pub fn aggregate(files: &[FileMetrics]) -> Result<AggregatedCodeMetrics, CodeMetricsError> {
    if files.is_empty() {
        return Err(CodeMetricsError::NoAnalyzableSamples);
    }

    let n = files.len() as f64;
    let mean = |f: fn(&FileMetrics) -> f64| files.iter().map(f).sum::<f64>() / n;

    Ok(AggregatedCodeMetrics {
        files: files.len(),
        avg_complexity: mean(|m| m.avg_complexity),
        maintainability_index: mean(|m| m.maintainability_index),
        lines_of_code: files.iter().map(|m| m.lines_of_code).sum(),
        num_functions: files.iter().map(|m| m.num_functions).sum(),
        complexity_per_function: mean(FileMetrics::complexity_per_function),
    })
}

/// Runs `analyzer` over every sample and aggregates the ones that analyze
/// cleanly. Malformed samples are logged and skipped.
pub fn analyze_samples<A, S>(
    analyzer: &A,
    samples: &[S],
) -> Result<AggregatedCodeMetrics, CodeMetricsError>
where
    A: StaticAnalyzer + ?Sized,
    S: AsRef<str>,
{
    let mut files = Vec::with_capacity(samples.len());
    for (index, sample) in samples.iter().enumerate() {
        match analyzer
            .analyze(sample.as_ref())
            .and_then(|readings| FileMetrics::from_readings(&readings))
        {
            Ok(metrics) => files.push(metrics),
            Err(err) => warn!(sample = index, error = %err, "skipping unanalyzable code sample"),
        }
    }

    debug!(
        samples = samples.len(),
        analyzed = files.len(),
        "code samples analyzed"
    );
    aggregate(&files)
}
