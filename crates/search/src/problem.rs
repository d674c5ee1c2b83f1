//! A task seen through fixed normalization statistics.
//!
//! Surrogates and solvers work on normalized designs and labels. The oracle
//! always receives raw designs: continuous rows are denormalized, discrete
//! simplex rows are snapped to the one-hot vertex of each position's argmax.

use task::{encoding::to_one_hot_argmax, Dataset, DesignShape, NormalizationStats, Task, TaskError};

pub struct Problem<'a> {
    task: &'a dyn Task,
    dataset: Dataset,
    x_stats: NormalizationStats,
    y_stats: NormalizationStats,
}

impl<'a> Problem<'a> {
    /// Fit statistics on the task's dataset. Discrete designs are never
    /// normalized.
    pub fn new(task: &'a dyn Task, normalize_xs: bool, normalize_ys: bool) -> Result<Self, TaskError> {
        let raw = task.dataset();
        let shape = task.shape();
        let x_stats = if normalize_xs && !shape.is_discrete() {
            NormalizationStats::fit(&raw.x)
        } else {
            NormalizationStats::identity(shape.num_features())
        };
        let y_stats = if normalize_ys {
            NormalizationStats::fit_scalar(&raw.y)
        } else {
            NormalizationStats::identity(1)
        };
        let dataset = Dataset::new(x_stats.apply(&raw.x), y_stats.apply_scalar(&raw.y), shape)?;
        tracing::info!(
            task = task.name(),
            shape = %shape,
            rows = dataset.len(),
            normalize_xs,
            normalize_ys,
            "Prepared problem"
        );
        Ok(Self {
            task,
            dataset,
            x_stats,
            y_stats,
        })
    }

    pub fn task(&self) -> &dyn Task {
        self.task
    }

    pub fn shape(&self) -> DesignShape {
        self.task.shape()
    }

    /// Normalized dataset.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Largest raw label in the offline data.
    pub fn dataset_max(&self) -> f32 {
        self.task.dataset().max_y().unwrap_or(f32::NEG_INFINITY)
    }

    /// Map normalized (materialized) designs into the oracle's input space.
    pub fn to_raw_designs(&self, x: &[Vec<f32>]) -> Vec<Vec<f32>> {
        match self.shape() {
            DesignShape::Continuous { .. } => self.x_stats.invert(x),
            DesignShape::Discrete { categories, .. } => x
                .iter()
                .map(|row| to_one_hot_argmax(row, categories))
                .collect(),
        }
    }

    /// Score normalized designs with the oracle. Returns raw scores.
    pub fn score(&self, x: &[Vec<f32>]) -> Result<Vec<f32>, TaskError> {
        self.task.score(&self.to_raw_designs(x))
    }

    /// Surrogate predictions back in raw score units.
    pub fn denormalize_y(&self, y: &[f32]) -> Vec<f32> {
        self.y_stats.invert_scalar(y)
    }

    /// Raw scores into normalized label units.
    pub fn normalize_y(&self, y: &[f32]) -> Vec<f32> {
        self.y_stats.apply_scalar(y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use task::{CategoryCountTask, QuadraticTask};

    #[test]
    fn test_continuous_normalization_round_trip() {
        let task = QuadraticTask::new(3, 100, 100.0, 0).unwrap();
        let problem = Problem::new(&task, true, true).unwrap();
        let x = &problem.dataset().x[..5];
        let raw = problem.to_raw_designs(x);
        for (a, b) in raw.iter().flatten().zip(task.dataset().x[..5].iter().flatten()) {
            assert!((a - b).abs() <= 1e-5 * b.abs().max(1.0));
        }
        let scores = problem.score(x).unwrap();
        for (s, y) in scores.iter().zip(&task.dataset().y[..5]) {
            assert!((s - y).abs() < 1e-4);
        }
        let y = problem.denormalize_y(&problem.dataset().y[..5]);
        for (a, b) in y.iter().zip(&task.dataset().y[..5]) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_discrete_designs_are_not_normalized() {
        let task = CategoryCountTask::new(4, 3, 50, 100.0, 0).unwrap();
        let problem = Problem::new(&task, true, false).unwrap();
        assert_eq!(problem.dataset().x, task.dataset().x);
        // Soft rows are snapped to their argmax before scoring
        let soft = vec![vec![0.6, 0.2, 0.2, 0.5, 0.3, 0.2, 0.1, 0.8, 0.1, 0.4, 0.3, 0.3]];
        assert_eq!(problem.score(&soft).unwrap(), vec![3.0]);
    }
}
