//! Data types for search trajectory records and run summaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Which baseline produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Online,
    Ascent,
    Reinforce,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Ascent => write!(f, "ascent"),
            Self::Reinforce => write!(f, "reinforce"),
        }
    }
}

impl Variant {
    /// Parse from string. Returns `None` for unrecognized values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "ascent" => Some(Self::Ascent),
            "reinforce" => Some(Self::Reinforce),
            _ => None,
        }
    }
}

/// One candidate at one oracle evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    /// Baseline that produced this candidate.
    pub variant: Variant,
    /// Index of the oracle evaluation (0 = initial designs).
    pub evaluation: u32,
    /// Solver steps (or policy iterations) taken before this evaluation.
    pub step: u64,
    /// Row index of the candidate in the search batch.
    pub candidate: u32,
    /// Surrogate prediction in denormalized score units.
    pub prediction: f64,
    /// Oracle score. `None` when the oracle was not queried for this row.
    pub score: Option<f64>,
    /// L2 distance from the candidate's starting design.
    pub distance: f64,
    /// Gradient norm of the candidate's last solver step (0.0 if none).
    pub grad_norm: f64,
    /// Whether the candidate's step budget or convergence test marked it done.
    pub done: bool,
}

/// Score statistics for a single oracle evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationStats {
    pub evaluation: u32,
    pub step: u64,
    /// Number of rows with an oracle score.
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub max: f64,
    pub mean_prediction: f64,
}

/// Quick statistics from a trajectory file.
#[derive(Debug, Clone, Serialize)]
pub struct TrajectorySummary {
    /// Total number of trajectory records.
    pub total_records: usize,
    /// Number of distinct oracle evaluations.
    pub evaluations: usize,
    /// Number of records carrying an oracle score.
    pub scored_records: usize,
    /// Best oracle score across all records, if any row was scored.
    pub best_score: Option<f64>,
    /// Per-evaluation statistics ordered by evaluation index.
    pub per_evaluation: Vec<EvaluationStats>,
}

/// Final outcome of one run, written as `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub variant: Variant,
    pub task: String,
    pub seed: u64,
    /// Best oracle score observed during the run.
    pub best_score: f64,
    /// Flattened best design in raw (denormalized, materialized) space.
    pub best_design: Vec<f32>,
    /// Largest label in the offline dataset, for reference.
    pub dataset_max: f32,
    pub oracle_evaluations: u32,
    pub solver_steps: u64,
    pub wall_time_ms: u64,
}

impl RunSummary {
    /// Load a run summary from a JSON file.
    pub fn from_json(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let summary: Self = serde_json::from_str(&contents)?;
        Ok(summary)
    }

    /// Write the summary as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), best = self.best_score, "Wrote run summary");
        Ok(())
    }

    /// Improvement of the best found design over the dataset maximum.
    pub fn improvement(&self) -> f64 {
        self.best_score - self.dataset_max as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_display_and_parse() {
        for v in [Variant::Online, Variant::Ascent, Variant::Reinforce] {
            assert_eq!(Variant::parse(&v.to_string()), Some(v));
        }
        assert_eq!(Variant::parse("garbage"), None);
    }

    #[test]
    fn test_run_summary_json_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("summary.json");
        let summary = RunSummary {
            variant: Variant::Ascent,
            task: "Quadratic-v0".into(),
            seed: 3,
            best_score: -0.25,
            best_design: vec![0.5, 0.0],
            dataset_max: -1.0,
            oracle_evaluations: 51,
            solver_steps: 50,
            wall_time_ms: 1200,
        };
        summary.write_json(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"variant\": \"ascent\""));

        let back = RunSummary::from_json(&path).unwrap();
        assert_eq!(back, summary);
        assert!((back.improvement() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_run_summary_missing_file() {
        assert!(RunSummary::from_json(Path::new("/nonexistent/summary.json")).is_err());
    }
}
