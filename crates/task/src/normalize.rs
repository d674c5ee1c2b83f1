//! Mean/std normalization for designs and scores.
//!
//! Statistics are fitted once from the dataset and never refitted for the
//! lifetime of a run. Features with exactly zero standard deviation get a
//! std of 1 so normalization stays finite.

use serde::{Deserialize, Serialize};

/// Per-feature mean and standard deviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl NormalizationStats {
    /// Identity statistics (mean 0, std 1) for `dim` features.
    pub fn identity(dim: usize) -> Self {
        Self {
            mean: vec![0.0; dim],
            std: vec![1.0; dim],
        }
    }

    /// Fit per-feature statistics over the rows of `data`.
    ///
    /// Uses the population standard deviation. An empty input yields
    /// identity statistics of width 0.
    pub fn fit(data: &[Vec<f32>]) -> Self {
        let Some(first) = data.first() else {
            return Self::identity(0);
        };
        let dim = first.len();
        let n = data.len() as f64;

        let mut mean = vec![0.0_f64; dim];
        for row in data {
            for (m, &v) in mean.iter_mut().zip(row) {
                *m += v as f64;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut var = vec![0.0_f64; dim];
        for row in data {
            for ((acc, &v), &m) in var.iter_mut().zip(row).zip(&mean) {
                let d = v as f64 - m;
                *acc += d * d;
            }
        }

        let std = var
            .into_iter()
            .map(|v| {
                let s = (v / n).sqrt() as f32;
                if s == 0.0 {
                    1.0
                } else {
                    s
                }
            })
            .collect();

        Self {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            std,
        }
    }

    /// Fit scalar statistics over a label vector.
    pub fn fit_scalar(values: &[f32]) -> Self {
        let rows: Vec<Vec<f32>> = values.iter().map(|&v| vec![v]).collect();
        Self::fit(&rows)
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Normalize one row: `(x - mean) / std`.
    pub fn apply_row(&self, row: &[f32]) -> Vec<f32> {
        row.iter()
            .zip(&self.mean)
            .zip(&self.std)
            .map(|((&v, &m), &s)| (v - m) / s)
            .collect()
    }

    /// Undo [`apply_row`](Self::apply_row): `x * std + mean`.
    pub fn invert_row(&self, row: &[f32]) -> Vec<f32> {
        row.iter()
            .zip(&self.mean)
            .zip(&self.std)
            .map(|((&v, &m), &s)| v * s + m)
            .collect()
    }

    pub fn apply(&self, batch: &[Vec<f32>]) -> Vec<Vec<f32>> {
        batch.iter().map(|row| self.apply_row(row)).collect()
    }

    pub fn invert(&self, batch: &[Vec<f32>]) -> Vec<Vec<f32>> {
        batch.iter().map(|row| self.invert_row(row)).collect()
    }

    /// Normalize scalar labels using the first feature's statistics.
    pub fn apply_scalar(&self, values: &[f32]) -> Vec<f32> {
        let (m, s) = (self.mean[0], self.std[0]);
        values.iter().map(|&v| (v - m) / s).collect()
    }

    /// Denormalize scalar labels using the first feature's statistics.
    pub fn invert_scalar(&self, values: &[f32]) -> Vec<f32> {
        let (m, s) = (self.mean[0], self.std[0]);
        values.iter().map(|&v| v * s + m).collect()
    }
}
