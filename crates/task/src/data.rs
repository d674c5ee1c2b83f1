//! Train/validation split and minibatch pipeline.
//!
//! The dataset is shuffled once with the run's generator, the first
//! `val_size` rows become the validation split, and the remainder forms the
//! training split. With `bootstraps > 0`, each ensemble member gets its own
//! resample (with replacement) of the training split. Training batches are
//! reshuffled every epoch; validation batches keep a fixed order so repeated
//! validation passes are reproducible.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::types::{Dataset, TaskError};

/// A minibatch of designs and labels.
#[derive(Debug, Clone)]
pub struct Batch {
    pub x: Vec<Vec<f32>>,
    pub y: Vec<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }
}

/// Split dataset plus batching parameters.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// One training split per bootstrap (a single split when bootstraps = 0).
    pub train: Vec<Dataset>,
    /// Shared validation split.
    pub val: Dataset,
    pub batch_size: usize,
}

/// Build the train/validation pipeline.
///
/// Fails if the dataset is too small to hold `val_size` validation rows and
/// at least one training row.
pub fn build_pipeline(
    dataset: &Dataset,
    batch_size: usize,
    val_size: usize,
    bootstraps: usize,
    rng: &mut impl Rng,
) -> Result<Pipeline, TaskError> {
    if batch_size == 0 {
        return Err(TaskError::InvalidDataset("batch_size must be > 0".into()));
    }
    if val_size >= dataset.len() {
        return Err(TaskError::InvalidDataset(format!(
            "val_size {val_size} leaves no training data out of {} rows",
            dataset.len()
        )));
    }

    let mut indices: Vec<usize> = (0..dataset.len()).collect();
    indices.shuffle(rng);
    let (val_idx, train_idx) = indices.split_at(val_size);

    let val = dataset.select(val_idx);
    let base = dataset.select(train_idx);

    let train = if bootstraps == 0 {
        vec![base]
    } else {
        (0..bootstraps)
            .map(|_| {
                let resampled: Vec<usize> = (0..base.len())
                    .map(|_| rng.gen_range(0..base.len()))
                    .collect();
                base.select(&resampled)
            })
            .collect()
    };

    tracing::debug!(
        train = train[0].len(),
        val = val.len(),
        bootstraps,
        batch_size,
        "Built data pipeline"
    );

    Ok(Pipeline {
        train,
        val,
        batch_size,
    })
}

impl Pipeline {
    /// Number of training minibatches per epoch.
    pub fn batches_per_epoch(&self) -> usize {
        self.train[0].len().div_ceil(self.batch_size)
    }

    /// Shuffled training minibatches of split `member` for one epoch.
    pub fn train_batches(&self, member: usize, rng: &mut impl Rng) -> Vec<Batch> {
        let split = &self.train[member];
        let mut order: Vec<usize> = (0..split.len()).collect();
        order.shuffle(rng);
        batches_in_order(split, &order, self.batch_size)
    }

    /// Validation minibatches in fixed order.
    pub fn val_batches(&self) -> Vec<Batch> {
        let order: Vec<usize> = (0..self.val.len()).collect();
        batches_in_order(&self.val, &order, self.batch_size)
    }

    /// Append freshly labeled rows to every training split.
    pub fn extend_train(&mut self, x: Vec<Vec<f32>>, y: Vec<f32>) -> Result<(), TaskError> {
        for split in &mut self.train {
            split.extend(x.clone(), y.clone())?;
        }
        Ok(())
    }
}

fn batches_in_order(data: &Dataset, order: &[usize], batch_size: usize) -> Vec<Batch> {
    order
        .chunks(batch_size)
        .map(|chunk| Batch {
            x: chunk.iter().map(|&i| data.x[i].clone()).collect(),
            y: chunk.iter().map(|&i| data.y[i]).collect(),
        })
        .collect()
}
