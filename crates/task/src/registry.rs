//! Task construction by name.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::synthetic::{CategoryCountTask, QuadraticTask};
use crate::types::{Task, TaskError};

/// Dataset difficulty: how much of the top of the score distribution is
/// hidden from the offline dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const VALID: &'static [&'static str] = &["easy", "medium", "hard"];

    /// Percentile of the score distribution kept in the dataset.
    pub fn split_percentile(self) -> f64 {
        match self {
            Self::Easy => 100.0,
            Self::Medium => 60.0,
            Self::Hard => 30.0,
        }
    }
}

impl FromStr for Difficulty {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(TaskError::UnknownDifficulty {
                name: other.to_string(),
                valid: Self::VALID.join(", "),
            }),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        };
        f.write_str(s)
    }
}

/// Keyword arguments shared by the built-in tasks.
///
/// `split_percentile` overrides the percentile implied by `difficulty`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskKwargs {
    #[serde(default = "default_num_samples")]
    pub num_samples: usize,
    /// Dimensionality of continuous tasks.
    #[serde(default = "default_dim")]
    pub dim: usize,
    /// Sequence length of discrete tasks.
    #[serde(default = "default_length")]
    pub length: usize,
    /// Number of categories per position of discrete tasks.
    #[serde(default = "default_categories")]
    pub categories: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub split_percentile: Option<f64>,
    #[serde(default)]
    pub difficulty: Option<String>,
}

fn default_num_samples() -> usize {
    1000
}
fn default_dim() -> usize {
    8
}
fn default_length() -> usize {
    8
}
fn default_categories() -> usize {
    4
}

impl Default for TaskKwargs {
    fn default() -> Self {
        Self {
            num_samples: default_num_samples(),
            dim: default_dim(),
            length: default_length(),
            categories: default_categories(),
            seed: 0,
            split_percentile: None,
            difficulty: None,
        }
    }
}

impl TaskKwargs {
    /// Resolve the dataset split percentile, validating `difficulty`.
    pub fn resolved_percentile(&self) -> Result<f64, TaskError> {
        if let Some(p) = self.split_percentile {
            if !(0.0..=100.0).contains(&p) {
                return Err(TaskError::InvalidDataset(format!(
                    "split_percentile must be in [0, 100], got {p}"
                )));
            }
            return Ok(p);
        }
        match &self.difficulty {
            Some(name) => Ok(name.parse::<Difficulty>()?.split_percentile()),
            None => Ok(100.0),
        }
    }
}

/// Builds registered tasks by name.
pub struct TaskRegistry;

impl TaskRegistry {
    pub const TASKS: &'static [&'static str] = &[QuadraticTask::NAME, CategoryCountTask::NAME];

    /// Fail fast on unknown task or difficulty keys without building the task.
    pub fn validate(name: &str, kwargs: &TaskKwargs) -> Result<(), TaskError> {
        if !Self::TASKS.contains(&name) {
            return Err(Self::unknown(name));
        }
        kwargs.resolved_percentile().map(|_| ())
    }

    pub fn build(name: &str, kwargs: &TaskKwargs) -> Result<Box<dyn Task>, TaskError> {
        let percentile = kwargs.resolved_percentile()?;
        let task: Box<dyn Task> = match name {
            QuadraticTask::NAME => Box::new(QuadraticTask::new(
                kwargs.dim,
                kwargs.num_samples,
                percentile,
                kwargs.seed,
            )?),
            CategoryCountTask::NAME => Box::new(CategoryCountTask::new(
                kwargs.length,
                kwargs.categories,
                kwargs.num_samples,
                percentile,
                kwargs.seed,
            )?),
            other => return Err(Self::unknown(other)),
        };
        tracing::info!(
            task = name,
            shape = %task.shape(),
            rows = task.dataset().len(),
            percentile,
            "Built task"
        );
        Ok(task)
    }

    fn unknown(name: &str) -> TaskError {
        TaskError::UnknownTask {
            name: name.to_string(),
            valid: Self::TASKS.join(", "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_task_lists_valid() {
        let err = TaskRegistry::build("Nope-v0", &TaskKwargs::default()).err().unwrap();
        let msg = err.to_string();
        assert!(msg.contains("Nope-v0"));
        assert!(msg.contains("Quadratic-v0"));
        assert!(msg.contains("CategoryCount-v0"));
    }

    #[test]
    fn test_unknown_difficulty_fails_validation() {
        let kwargs = TaskKwargs {
            difficulty: Some("extreme".into()),
            ..Default::default()
        };
        let err = TaskRegistry::validate("Quadratic-v0", &kwargs).unwrap_err();
        assert!(matches!(err, TaskError::UnknownDifficulty { .. }));
        assert!(err.to_string().contains("easy, medium, hard"));
    }

    #[test]
    fn test_percentile_resolution() {
        let mut kwargs = TaskKwargs::default();
        assert_eq!(kwargs.resolved_percentile().unwrap(), 100.0);
        kwargs.difficulty = Some("hard".into());
        assert_eq!(kwargs.resolved_percentile().unwrap(), 30.0);
        kwargs.split_percentile = Some(80.0);
        assert_eq!(kwargs.resolved_percentile().unwrap(), 80.0);
        kwargs.split_percentile = Some(150.0);
        assert!(kwargs.resolved_percentile().is_err());
    }

    #[test]
    fn test_build_both_tasks() {
        let kwargs = TaskKwargs {
            num_samples: 50,
            ..Default::default()
        };
        let q = TaskRegistry::build("Quadratic-v0", &kwargs).unwrap();
        assert_eq!(q.input_shape(), vec![8]);
        let c = TaskRegistry::build("CategoryCount-v0", &kwargs).unwrap();
        assert_eq!(c.input_shape(), vec![8, 4]);
        assert_eq!(c.dataset().len(), 50);
    }
}
