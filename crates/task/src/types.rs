//! Core dataset types and the oracle trait.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors raised by tasks, oracles and the data pipeline.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The requested task name is not registered.
    #[error("Task '{name}' is not implemented; valid tasks are: {valid}")]
    UnknownTask { name: String, valid: String },
    /// The requested difficulty key is not recognized.
    #[error("Difficulty '{name}' is not implemented; valid difficulty levels are: {valid}")]
    UnknownDifficulty { name: String, valid: String },
    /// A design row does not match the task's input shape.
    #[error("Design has {got} features, expected {expected}")]
    ShapeMismatch { expected: usize, got: usize },
    /// The oracle failed to score a batch.
    #[error("Oracle error: {0}")]
    Oracle(String),
    /// Dataset construction or pipeline configuration is invalid.
    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),
}

/// Shape of a single design.
///
/// Continuous designs are vectors of `dim` reals. Discrete designs are
/// `length` positions, each a probability simplex over `categories`
/// classes, flattened position-major into `length * categories` features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DesignShape {
    Continuous { dim: usize },
    Discrete { length: usize, categories: usize },
}

impl DesignShape {
    /// Number of flattened features per design.
    pub fn num_features(&self) -> usize {
        match *self {
            Self::Continuous { dim } => dim,
            Self::Discrete { length, categories } => length * categories,
        }
    }

    /// Per-example input shape, e.g. `[d]` or `[L, C]`.
    pub fn input_shape(&self) -> Vec<usize> {
        match *self {
            Self::Continuous { dim } => vec![dim],
            Self::Discrete { length, categories } => vec![length, categories],
        }
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::Discrete { .. })
    }
}

impl fmt::Display for DesignShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continuous { dim } => write!(f, "continuous[{dim}]"),
            Self::Discrete { length, categories } => write!(f, "discrete[{length}x{categories}]"),
        }
    }
}

/// A static dataset of designs and their observed scores.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// One flattened design per row.
    pub x: Vec<Vec<f32>>,
    /// One scalar label per design.
    pub y: Vec<f32>,
    /// Shape shared by every design.
    pub shape: DesignShape,
}

impl Dataset {
    /// Build a dataset, checking that every row matches `shape`.
    pub fn new(x: Vec<Vec<f32>>, y: Vec<f32>, shape: DesignShape) -> Result<Self, TaskError> {
        if x.len() != y.len() {
            return Err(TaskError::InvalidDataset(format!(
                "{} designs but {} labels",
                x.len(),
                y.len()
            )));
        }
        let expected = shape.num_features();
        if let Some(row) = x.iter().find(|row| row.len() != expected) {
            return Err(TaskError::ShapeMismatch {
                expected,
                got: row.len(),
            });
        }
        Ok(Self { x, y, shape })
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Gather the rows at `indices` into a new dataset.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            x: indices.iter().map(|&i| self.x[i].clone()).collect(),
            y: indices.iter().map(|&i| self.y[i]).collect(),
            shape: self.shape,
        }
    }

    /// Append labeled designs (e.g. oracle-relabeled search candidates).
    pub fn extend(&mut self, x: Vec<Vec<f32>>, y: Vec<f32>) -> Result<(), TaskError> {
        let extra = Self::new(x, y, self.shape)?;
        self.x.extend(extra.x);
        self.y.extend(extra.y);
        Ok(())
    }

    /// Largest observed label, or `None` for an empty dataset.
    pub fn max_y(&self) -> Option<f32> {
        self.y.iter().copied().reduce(f32::max)
    }
}

/// A design-optimization task backed by an (expensive) oracle.
///
/// The oracle always receives designs in the task's raw (unnormalized)
/// space; discrete designs are passed as one-hot or simplex rows.
pub trait Task: Send + Sync {
    /// Registry name, e.g. `"Quadratic-v0"`.
    fn name(&self) -> &str;

    /// Shape of a single design.
    fn shape(&self) -> DesignShape;

    /// The static offline dataset.
    fn dataset(&self) -> &Dataset;

    /// Score a batch of designs with the true oracle.
    fn score(&self, x: &[Vec<f32>]) -> Result<Vec<f32>, TaskError>;

    fn input_shape(&self) -> Vec<usize> {
        self.shape().input_shape()
    }

    fn is_discrete(&self) -> bool {
        self.shape().is_discrete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_rejects_mismatched_rows() {
        let shape = DesignShape::Continuous { dim: 2 };
        let err = Dataset::new(vec![vec![0.0, 1.0], vec![1.0]], vec![0.0, 1.0], shape).unwrap_err();
        assert!(matches!(err, TaskError::ShapeMismatch { expected: 2, got: 1 }));

        let err = Dataset::new(vec![vec![0.0, 1.0]], vec![0.0, 1.0], shape).unwrap_err();
        assert!(matches!(err, TaskError::InvalidDataset(_)));
    }

    #[test]
    fn test_discrete_shape_features() {
        let shape = DesignShape::Discrete {
            length: 8,
            categories: 4,
        };
        assert_eq!(shape.num_features(), 32);
        assert_eq!(shape.input_shape(), vec![8, 4]);
        assert!(shape.is_discrete());
        assert_eq!(shape.to_string(), "discrete[8x4]");
    }

    #[test]
    fn test_select_and_extend() {
        let shape = DesignShape::Continuous { dim: 1 };
        let mut data = Dataset::new(
            vec![vec![0.0], vec![1.0], vec![2.0]],
            vec![0.5, 1.5, 2.5],
            shape,
        )
        .unwrap();
        let sub = data.select(&[2, 0]);
        assert_eq!(sub.x, vec![vec![2.0], vec![0.0]]);
        assert_eq!(sub.y, vec![2.5, 0.5]);

        data.extend(vec![vec![3.0]], vec![3.5]).unwrap();
        assert_eq!(data.len(), 4);
        assert_eq!(data.max_y(), Some(3.5));
    }

    #[test]
    fn test_shape_serde_roundtrip() {
        let shape = DesignShape::Discrete {
            length: 3,
            categories: 5,
        };
        let json = serde_json::to_string(&shape).unwrap();
        assert!(json.contains("\"kind\":\"discrete\""));
        let back: DesignShape = serde_json::from_str(&json).unwrap();
        assert_eq!(back, shape);
    }
}
