//! Bootstrapped ensembles of conservative trainers.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::Rng;
use task::Pipeline;
use trajectory::MetricsLogger;

use crate::model::forward_model::{ForwardModelConfig, Prediction};
use crate::space::DesignSpace;
use crate::training::checkpoint::{CheckpointError, CheckpointManager, Checkpointable, TrainerState};
use crate::training::metrics::MetricsHistory;
use crate::training::trainer::{ConservativeTrainer, TrainError, TrainerConfig};

/// A fixed-size, ordered set of independently initialized trainers.
///
/// Member `i` trains on bootstrap split `i % pipeline.train.len()`.
pub struct Ensemble<B: AutodiffBackend> {
    members: Vec<ConservativeTrainer<B>>,
}

impl<B: AutodiffBackend> Ensemble<B> {
    /// # Panics
    /// Panics if `size` is zero.
    pub fn new(
        size: usize,
        model_config: &ForwardModelConfig,
        config: &TrainerConfig,
        space: DesignSpace,
        device: &B::Device,
    ) -> Self {
        assert!(size > 0, "ensemble needs at least one member");
        let members = (0..size)
            .map(|_| ConservativeTrainer::new(model_config, config, space, device))
            .collect();
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[ConservativeTrainer<B>] {
        &self.members
    }

    pub fn member(&self, index: usize) -> &ConservativeTrainer<B> {
        &self.members[index]
    }

    pub fn space(&self) -> &DesignSpace {
        self.members[0].space()
    }

    /// Train every member for `epochs` epochs, logging under `oracle_{i}/`.
    pub fn fit(
        &mut self,
        pipeline: &Pipeline,
        epochs: usize,
        rng: &mut impl Rng,
        logger: &mut dyn MetricsLogger,
    ) -> Result<Vec<MetricsHistory>, TrainError> {
        let splits = pipeline.train.len();
        if splits > 1 && splits != self.members.len() {
            tracing::warn!(
                splits,
                members = self.members.len(),
                "Bootstrap count differs from ensemble size; members will share splits"
            );
        }
        let mut histories = Vec::with_capacity(self.members.len());
        for (i, member) in self.members.iter_mut().enumerate() {
            tracing::info!(member = i, split = i % splits, epochs, "Fitting ensemble member");
            let header = format!("oracle_{i}/");
            histories.push(member.fit(pipeline, i % splits, epochs, rng, logger, &header)?);
        }
        Ok(histories)
    }

    /// Aggregated predictive distribution.
    ///
    /// The mean is the average of member means; the variance adds the
    /// spread of member means to the average member variance. A single
    /// member's prediction is returned as is.
    pub fn predict(&self, x: Tensor<B, 2>) -> Prediction<B> {
        if self.members.len() == 1 {
            return self.members[0].predict(x);
        }
        let (means, stds): (Vec<_>, Vec<_>) = self
            .members
            .iter()
            .map(|m| {
                let p = m.predict(x.clone());
                (p.mean, p.std)
            })
            .unzip();
        let means = Tensor::stack::<2>(means, 0);
        let variances = Tensor::stack::<2>(stds, 0).powf_scalar(2.0);

        let mean = means.clone().mean_dim(0);
        let spread = (means - mean.clone()).powf_scalar(2.0).mean_dim(0);
        let std = (spread + variances.mean_dim(0)).sqrt();
        Prediction {
            mean: mean.squeeze::<1>(0),
            std: std.squeeze::<1>(0),
        }
    }

    /// Differentiable average of member means.
    pub fn mean_prediction(&self, x: Tensor<B, 2>) -> Tensor<B, 1> {
        let means: Vec<Tensor<B, 1>> = self.members.iter().map(|m| m.mean(x.clone())).collect();
        Tensor::stack::<2>(means, 0).mean_dim(0).squeeze::<1>(0)
    }

    /// Uniformly chosen member index.
    pub fn sample_member(&self, rng: &mut impl Rng) -> usize {
        rng.gen_range(0..self.members.len())
    }

    /// Import the checkpoint under `manager` if there is one. Returns whether
    /// state was restored.
    pub fn restore_or_initialize(&mut self, manager: &CheckpointManager) -> Result<bool, TrainError> {
        let arch = self.members[0].arch();
        match manager.restore_or_initialize(&arch, self.members.len())? {
            Some(states) => {
                self.import_state(states)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<B: AutodiffBackend> Checkpointable for Ensemble<B> {
    fn export_state(&self) -> Result<Vec<TrainerState>, CheckpointError> {
        self.members.iter().map(|m| m.export_trainer_state()).collect()
    }

    fn import_state(&mut self, states: Vec<TrainerState>) -> Result<(), CheckpointError> {
        if states.len() != self.members.len() {
            return Err(CheckpointError::Incompatible(format!(
                "{} states for an ensemble of {}",
                states.len(),
                self.members.len()
            )));
        }
        if let Some(state) = states.iter().find(|s| s.meta.arch != self.members[0].arch()) {
            return Err(CheckpointError::Incompatible(format!(
                "checkpoint architecture {:?} does not match {:?}",
                state.meta.arch,
                self.members[0].arch()
            )));
        }
        // Decode into scratch copies so one bad record leaves every member intact
        let mut restored = Vec::with_capacity(states.len());
        for (member, state) in self.members.iter().zip(states) {
            let mut scratch = member.clone();
            scratch.import_trainer_state(state)?;
            restored.push(scratch);
        }
        self.members = restored;
        Ok(())
    }
}
