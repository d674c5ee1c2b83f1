//! Synthetic benchmark tasks with closed-form oracles.
//!
//! Both tasks generate their offline dataset from a seeded generator and
//! can hide the top of the score distribution (`split_percentile`) so that
//! the optimum is never present in the data, as in the standard offline
//! benchmarks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::encoding::{map_to_integers, one_hot};
use crate::types::{Dataset, DesignShape, Task, TaskError};

/// Keep only rows whose label is at or below the `percentile`-th percentile.
fn split_by_percentile(x: Vec<Vec<f32>>, y: Vec<f32>, percentile: f64) -> (Vec<Vec<f32>>, Vec<f32>) {
    if percentile >= 100.0 || y.is_empty() {
        return (x, y);
    }
    let mut sorted = y.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    let threshold = sorted[rank.min(sorted.len() - 1)];

    x.into_iter()
        .zip(y)
        .filter(|(_, label)| *label <= threshold)
        .unzip()
}

fn check_rows(shape: DesignShape, x: &[Vec<f32>]) -> Result<(), TaskError> {
    let expected = shape.num_features();
    match x.iter().find(|row| row.len() != expected) {
        Some(row) => Err(TaskError::ShapeMismatch {
            expected,
            got: row.len(),
        }),
        None => Ok(()),
    }
}

/// Continuous task: `y = -||x||^2` with `x ~ N(0, I_d)`. Optimum at the origin.
pub struct QuadraticTask {
    dataset: Dataset,
}

impl QuadraticTask {
    pub const NAME: &'static str = "Quadratic-v0";

    pub fn new(dim: usize, num_samples: usize, split_percentile: f64, seed: u64) -> Result<Self, TaskError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let x: Vec<Vec<f32>> = (0..num_samples)
            .map(|_| (0..dim).map(|_| rng.sample::<f32, _>(StandardNormal)).collect())
            .collect();
        let y = x.iter().map(|row| Self::objective(row)).collect();
        let (x, y) = split_by_percentile(x, y, split_percentile);
        let dataset = Dataset::new(x, y, DesignShape::Continuous { dim })?;
        Ok(Self { dataset })
    }

    fn objective(row: &[f32]) -> f32 {
        -row.iter().map(|v| v * v).sum::<f32>()
    }
}

impl Task for QuadraticTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn shape(&self) -> DesignShape {
        self.dataset.shape
    }

    fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    fn score(&self, x: &[Vec<f32>]) -> Result<Vec<f32>, TaskError> {
        check_rows(self.shape(), x)?;
        Ok(x.iter().map(|row| Self::objective(row)).collect())
    }
}

/// Discrete task: sequences of `length` positions over `categories` classes,
/// scored by the number of positions whose argmax is category 0.
pub struct CategoryCountTask {
    dataset: Dataset,
    categories: usize,
}

impl CategoryCountTask {
    pub const NAME: &'static str = "CategoryCount-v0";

    pub fn new(
        length: usize,
        categories: usize,
        num_samples: usize,
        split_percentile: f64,
        seed: u64,
    ) -> Result<Self, TaskError> {
        if categories < 2 {
            return Err(TaskError::InvalidDataset(format!(
                "discrete tasks need at least 2 categories, got {categories}"
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = Vec::with_capacity(num_samples);
        let mut y = Vec::with_capacity(num_samples);
        for _ in 0..num_samples {
            let seq: Vec<usize> = (0..length).map(|_| rng.gen_range(0..categories)).collect();
            y.push(seq.iter().filter(|&&c| c == 0).count() as f32);
            x.push(one_hot(&seq, categories));
        }
        let (x, y) = split_by_percentile(x, y, split_percentile);
        let dataset = Dataset::new(x, y, DesignShape::Discrete { length, categories })?;
        Ok(Self { dataset, categories })
    }
}

impl Task for CategoryCountTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn shape(&self) -> DesignShape {
        self.dataset.shape
    }

    fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    fn score(&self, x: &[Vec<f32>]) -> Result<Vec<f32>, TaskError> {
        check_rows(self.shape(), x)?;
        Ok(x.iter()
            .map(|row| {
                map_to_integers(row, self.categories)
                    .into_iter()
                    .filter(|&c| c == 0)
                    .count() as f32
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadratic_dataset_and_oracle() {
        let task = QuadraticTask::new(4, 200, 100.0, 0).unwrap();
        assert_eq!(task.dataset().len(), 200);
        assert_eq!(task.input_shape(), vec![4]);
        assert!(!task.is_discrete());

        let scores = task.score(&[vec![0.0; 4], vec![1.0, 2.0, 0.0, 0.0]]).unwrap();
        assert_eq!(scores, vec![0.0, -5.0]);

        // Oracle agrees with dataset labels
        let relabeled = task.score(&task.dataset().x[..10]).unwrap();
        assert_eq!(relabeled, task.dataset().y[..10].to_vec());
    }

    #[test]
    fn test_quadratic_rejects_wrong_width() {
        let task = QuadraticTask::new(3, 10, 100.0, 0).unwrap();
        assert!(matches!(
            task.score(&[vec![0.0; 2]]),
            Err(TaskError::ShapeMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_split_percentile_hides_top() {
        let full = QuadraticTask::new(2, 500, 100.0, 3).unwrap();
        let split = QuadraticTask::new(2, 500, 50.0, 3).unwrap();
        assert!(split.dataset().len() < full.dataset().len());
        assert!(split.dataset().max_y().unwrap() < full.dataset().max_y().unwrap());
    }

    #[test]
    fn test_category_count_labels() {
        let task = CategoryCountTask::new(8, 4, 300, 100.0, 1).unwrap();
        assert_eq!(task.input_shape(), vec![8, 4]);
        assert!(task.is_discrete());
        for (row, &label) in task.dataset().x.iter().zip(&task.dataset().y) {
            let zeros = map_to_integers(row, 4).iter().filter(|&&c| c == 0).count();
            assert_eq!(zeros as f32, label);
            // each position is a valid simplex
            for probs in row.chunks(4) {
                assert_eq!(probs.iter().sum::<f32>(), 1.0);
            }
        }
        let best = one_hot(&[0; 8], 4);
        assert_eq!(task.score(&[best]).unwrap(), vec![8.0]);
    }

    #[test]
    fn test_category_count_needs_two_classes() {
        assert!(CategoryCountTask::new(4, 1, 10, 100.0, 0).is_err());
    }
}
