//! Conservative surrogate training with a dual-ascended Lagrange multiplier.
//!
//! Each train step fits the forward model to labels and, in the same update,
//! penalizes the *conservatism gap*: how much higher the model scores designs
//! that were adversarially perturbed through its own gradient than the
//! clean designs. The penalty weight `alpha` lives in log space and is
//! trained by a second Adam optimizer so that the gap is driven toward
//! `target_gap`:
//!
//! ```text
//! gap            = mean f(x̃) - mean f(x)
//! model loss     = primary + stopgrad(alpha) * gap
//! multiplier loss = alpha * (target_gap - stopgrad(gap))
//! ```
//!
//! With `perturb.num_steps = 0` the perturbed designs equal the clean ones,
//! the gap is identically zero, and training reduces to plain supervised
//! regression.

use burn::module::{AutodiffModule, Param};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{Distribution, TensorData};
use rand::Rng;
use task::{Batch, Pipeline};
use trajectory::MetricsLogger;

use crate::model::bridge::{rows_to_tensor, tensor_to_f64, tensor_to_vec, values_to_tensor};
use crate::model::forward_model::{ForwardModel, ForwardModelConfig, Prediction};
use crate::perturb::{PerturbConfig, PerturbationEngine};
use crate::space::DesignSpace;
use crate::training::checkpoint::{
    ArchSignature, CheckpointError, CheckpointManager, CheckpointMeta, Checkpointable,
    TrainerState,
};
use crate::training::loss::{supervised_loss, SupervisedLoss};
use crate::training::metrics::{spearman, EpochMetrics, MetricsHistory, RunningAvg, StepMetrics};

#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("non-finite {name} at step {step}")]
    NonFinite { step: u64, name: &'static str },
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Configuration for conservative training.
#[derive(Config, Debug)]
pub struct TrainerConfig {
    /// Adam learning rate of the forward model.
    #[config(default = 3e-4)]
    pub forward_model_lr: f64,
    /// Starting value of the Lagrange multiplier.
    #[config(default = 1.0)]
    pub initial_alpha: f64,
    /// Adam learning rate of `log_alpha`. Zero freezes the multiplier.
    #[config(default = 0.01)]
    pub alpha_lr: f64,
    /// Gap the multiplier drives toward; negative values ask the model to
    /// underestimate perturbed designs.
    #[config(default = -2.0)]
    pub target_gap: f64,
    #[config(default = "SupervisedLoss::Nll")]
    pub loss: SupervisedLoss,
    /// Adversarial perturbation used to build the gap.
    #[config(default = "PerturbConfig::new()")]
    pub perturb: PerturbConfig,
    /// Std of Gaussian noise added to continuous training inputs.
    #[config(default = 0.0)]
    pub continuous_noise_std: f64,
}

/// Penalty weight `alpha = exp(log_alpha)`.
#[derive(Module, Debug)]
pub struct LagrangeMultiplier<B: Backend> {
    log_alpha: Param<Tensor<B, 1>>,
}

impl<B: Backend> LagrangeMultiplier<B> {
    pub fn new(initial_alpha: f64, device: &B::Device) -> Self {
        let log_alpha = initial_alpha.max(1e-8).ln() as f32;
        Self {
            log_alpha: Param::from_tensor(Tensor::from_data(
                TensorData::new(vec![log_alpha], [1]),
                device,
            )),
        }
    }

    /// Current alpha, shape `(1,)`.
    pub fn alpha(&self) -> Tensor<B, 1> {
        self.log_alpha.val().exp()
    }
}

type ModelOptimizer<B> = OptimizerAdaptor<Adam, ForwardModel<B>, B>;
type MultiplierOptimizer<B> = OptimizerAdaptor<Adam, LagrangeMultiplier<B>, B>;

fn check_finite(value: f64, step: u64, name: &'static str) -> Result<f64, TrainError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(TrainError::NonFinite { step, name })
    }
}

/// One forward model, its multiplier, and their optimizers.
#[derive(Clone)]
pub struct ConservativeTrainer<B: AutodiffBackend> {
    config: TrainerConfig,
    model_config: ForwardModelConfig,
    model: ForwardModel<B>,
    model_optim: ModelOptimizer<B>,
    multiplier: LagrangeMultiplier<B>,
    multiplier_optim: MultiplierOptimizer<B>,
    engine: PerturbationEngine,
    device: B::Device,
    step: u64,
    epoch: usize,
}

impl<B: AutodiffBackend> ConservativeTrainer<B> {
    /// Build a freshly initialized trainer. The model's input width is taken
    /// from `space`.
    pub fn new(
        model_config: &ForwardModelConfig,
        config: &TrainerConfig,
        space: DesignSpace,
        device: &B::Device,
    ) -> Self {
        let mut model_config = model_config.clone();
        model_config.input_dim = space.design_dim();
        Self {
            model: model_config.init(device),
            model_optim: AdamConfig::new().init(),
            multiplier: LagrangeMultiplier::new(config.initial_alpha, device),
            multiplier_optim: AdamConfig::new().init(),
            engine: PerturbationEngine::new(&config.perturb, space),
            config: config.clone(),
            model_config,
            device: device.clone(),
            step: 0,
            epoch: 0,
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn model(&self) -> &ForwardModel<B> {
        &self.model
    }

    pub fn space(&self) -> &DesignSpace {
        self.engine.space()
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Optimizer steps taken so far.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Completed epochs.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn alpha(&self) -> f64 {
        tensor_to_f64(self.multiplier.alpha())
    }

    pub fn arch(&self) -> ArchSignature {
        ArchSignature::from(&self.model_config)
    }

    pub fn predict(&self, x: Tensor<B, 2>) -> Prediction<B> {
        self.model.predict(x)
    }

    /// Differentiable predicted mean.
    pub fn mean(&self, x: Tensor<B, 2>) -> Tensor<B, 1> {
        self.model.mean(x)
    }

    /// Adversarial designs: `x` ascended through the current model's mean.
    fn perturbed(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let model = &self.model;
        self.engine.perturb_designs(x, &|d| model.mean(d))
    }

    /// One conservative update on `batch`.
    ///
    /// `negatives` are extra designs (e.g. current search candidates) that
    /// join the perturbed set when computing the gap.
    pub fn train_step(
        &mut self,
        batch: &Batch,
        negatives: Option<Tensor<B, 2>>,
    ) -> Result<StepMetrics, TrainError> {
        let step = self.step;
        let mut x = rows_to_tensor::<B>(&batch.x, &self.device);
        let y = values_to_tensor::<B>(&batch.y, &self.device);

        if !self.space().is_discrete() && self.config.continuous_noise_std > 0.0 {
            let noise = Tensor::random(
                x.shape(),
                Distribution::Normal(0.0, self.config.continuous_noise_std),
                &self.device,
            );
            x = x + noise;
        }

        let mut x_tilde = self.perturbed(x.clone());
        if let Some(neg) = negatives {
            x_tilde = Tensor::cat(vec![x_tilde, neg.detach()], 0);
        }

        let pred = self.model.predict(x);
        let pred_mean = tensor_to_vec(pred.mean.clone().detach());
        let gap = self.model.mean(x_tilde).mean() - pred.mean.clone().mean();
        let primary = supervised_loss(self.config.loss, pred, y);

        let alpha = self.multiplier.alpha();
        let model_loss = primary.clone() + alpha.clone().detach() * gap.clone();

        let loss_val = check_finite(tensor_to_f64(primary), step, "loss")?;
        check_finite(tensor_to_f64(model_loss.clone()), step, "model loss")?;
        let gap_val = tensor_to_f64(gap.clone().detach());
        let alpha_val = tensor_to_f64(alpha.clone().detach());

        let grads = GradientsParams::from_grads(model_loss.backward(), &self.model);
        self.model = self
            .model_optim
            .step(self.config.forward_model_lr, self.model.clone(), grads);

        let multiplier_loss = alpha * gap.detach().neg().add_scalar(self.config.target_gap);
        let multiplier_val =
            check_finite(tensor_to_f64(multiplier_loss.clone()), step, "multiplier loss")?;
        if self.config.alpha_lr > 0.0 {
            let grads = GradientsParams::from_grads(multiplier_loss.backward(), &self.multiplier);
            self.multiplier =
                self.multiplier_optim
                    .step(self.config.alpha_lr, self.multiplier.clone(), grads);
        }

        self.step += 1;
        Ok(StepMetrics {
            loss: loss_val,
            rank_correlation: spearman(&pred_mean, &batch.y),
            gap: gap_val,
            alpha: alpha_val,
            multiplier_loss: multiplier_val,
        })
    }

    /// The same quantities as [`train_step`](Self::train_step) without
    /// touching any parameter. Outer forwards use the inference-mode model.
    pub fn validate_step(&self, batch: &Batch) -> Result<StepMetrics, TrainError> {
        let x = rows_to_tensor::<B>(&batch.x, &self.device);
        let x_tilde = self.perturbed(x.clone()).inner();
        let x = x.inner();
        let y = values_to_tensor::<B::InnerBackend>(&batch.y, &self.device);

        let model = self.model.valid();
        let pred = model.predict(x);
        let pred_mean = tensor_to_vec(pred.mean.clone());
        let gap = model.mean(x_tilde).mean() - pred.mean.clone().mean();
        let loss = supervised_loss(self.config.loss, pred, y);

        let alpha = self.alpha();
        let gap_val = tensor_to_f64(gap);
        Ok(StepMetrics {
            loss: check_finite(tensor_to_f64(loss), self.step, "validation loss")?,
            rank_correlation: spearman(&pred_mean, &batch.y),
            gap: gap_val,
            alpha,
            multiplier_loss: alpha * (self.config.target_gap - gap_val),
        })
    }

    /// Train on one epoch of `pipeline`'s split `member`.
    pub fn train_epoch(
        &mut self,
        pipeline: &Pipeline,
        member: usize,
        rng: &mut impl Rng,
    ) -> Result<Vec<StepMetrics>, TrainError> {
        let batches = pipeline.train_batches(member, rng);
        let mut metrics = Vec::with_capacity(batches.len());
        for batch in &batches {
            metrics.push(self.train_step(batch, None)?);
        }
        self.epoch += 1;
        Ok(metrics)
    }

    /// Validation metrics for every validation batch.
    pub fn validate(&self, pipeline: &Pipeline) -> Result<Vec<StepMetrics>, TrainError> {
        pipeline
            .val_batches()
            .iter()
            .map(|batch| self.validate_step(batch))
            .collect()
    }

    /// Mark an externally driven epoch as complete.
    pub fn finish_epoch(&mut self) {
        self.epoch += 1;
    }

    /// Run `epochs` epochs on split `member`, logging per-epoch aggregates
    /// under `{header}train/...` and `{header}validate/...`.
    pub fn fit(
        &mut self,
        pipeline: &Pipeline,
        member: usize,
        epochs: usize,
        rng: &mut impl Rng,
        logger: &mut dyn MetricsLogger,
        header: &str,
    ) -> Result<MetricsHistory, TrainError> {
        let mut history = MetricsHistory::new();
        for _ in 0..epochs {
            let train = self.train_epoch(pipeline, member, rng)?;
            let val = self.validate(pipeline)?;
            let epoch = self.epoch;

            let train_avg = log_split(logger, &format!("{header}train"), &train, epoch as u64);
            let val_avg = log_split(logger, &format!("{header}validate"), &val, epoch as u64);

            let train_m = train_avg.average().unwrap_or_default();
            let val_m = val_avg.average().unwrap_or_default();
            let warnings = train_m.health_check();
            if !warnings.is_empty() {
                tracing::warn!(epoch, member, "Health check warnings: {:?}", warnings);
            }
            tracing::info!(
                epoch,
                member,
                "train({}) {} | val({}) {}",
                train_avg.count(),
                train_avg.display(),
                val_avg.count(),
                val_avg.display()
            );
            history.push(EpochMetrics {
                epoch,
                train: train_m,
                val: val_m,
            });
        }
        if let Some(best) = history.best_val_rank() {
            tracing::debug!(
                member,
                epoch = best.epoch,
                rank = best.val.rank_correlation,
                "Best validation rank correlation so far in this fit"
            );
        }
        Ok(history)
    }

    /// Serialize model, multiplier and both optimizers.
    pub fn export_trainer_state(&self) -> Result<TrainerState, CheckpointError> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let encode = |what: &str, e: burn::record::RecorderError| {
            CheckpointError::Encode(format!("{what}: {e}"))
        };
        Ok(TrainerState {
            meta: CheckpointMeta {
                arch: self.arch(),
                step: self.step,
                epoch: self.epoch,
                alpha: self.alpha(),
            },
            model: Recorder::<B>::record(&recorder, self.model.clone().into_record(), ())
                .map_err(|e| encode("model", e))?,
            model_optim: Recorder::<B>::record(&recorder, self.model_optim.to_record(), ())
                .map_err(|e| encode("model optimizer", e))?,
            multiplier: Recorder::<B>::record(&recorder, self.multiplier.clone().into_record(), ())
                .map_err(|e| encode("multiplier", e))?,
            multiplier_optim: Recorder::<B>::record(
                &recorder,
                self.multiplier_optim.to_record(),
                (),
            )
            .map_err(|e| encode("multiplier optimizer", e))?,
        })
    }

    /// Restore from `state`. All records are decoded before any is applied.
    pub fn import_trainer_state(&mut self, state: TrainerState) -> Result<(), CheckpointError> {
        if state.meta.arch != self.arch() {
            return Err(CheckpointError::Incompatible(format!(
                "checkpoint architecture {:?} does not match {:?}",
                state.meta.arch,
                self.arch()
            )));
        }
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let corrupt = |what: &str, e: burn::record::RecorderError| {
            CheckpointError::Corrupt(format!("{what}: {e}"))
        };

        let model_record = Recorder::<B>::load(&recorder, state.model, &self.device)
            .map_err(|e| corrupt("model", e))?;
        let model_optim_record = Recorder::<B>::load(&recorder, state.model_optim, &self.device)
            .map_err(|e| corrupt("model optimizer", e))?;
        let multiplier_record = Recorder::<B>::load(&recorder, state.multiplier, &self.device)
            .map_err(|e| corrupt("multiplier", e))?;
        let multiplier_optim_record =
            Recorder::<B>::load(&recorder, state.multiplier_optim, &self.device)
                .map_err(|e| corrupt("multiplier optimizer", e))?;

        self.model = self.model.clone().load_record(model_record);
        self.model_optim = self.model_optim.clone().load_record(model_optim_record);
        self.multiplier = self.multiplier.clone().load_record(multiplier_record);
        self.multiplier_optim = self.multiplier_optim.clone().load_record(multiplier_optim_record);
        self.step = state.meta.step;
        self.epoch = state.meta.epoch;
        Ok(())
    }

    /// Import the checkpoint under `manager` if there is one. Returns whether
    /// state was restored.
    pub fn restore_or_initialize(&mut self, manager: &CheckpointManager) -> Result<bool, TrainError> {
        match manager.restore_or_initialize(&self.arch(), 1)? {
            Some(states) => {
                self.import_state(states)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<B: AutodiffBackend> Checkpointable for ConservativeTrainer<B> {
    fn export_state(&self) -> Result<Vec<TrainerState>, CheckpointError> {
        Ok(vec![self.export_trainer_state()?])
    }

    fn import_state(&mut self, states: Vec<TrainerState>) -> Result<(), CheckpointError> {
        let mut states = states.into_iter();
        match (states.next(), states.next()) {
            (Some(state), None) => self.import_trainer_state(state),
            _ => Err(CheckpointError::Incompatible(
                "a single trainer needs exactly one state".into(),
            )),
        }
    }
}

/// Record every metric of `steps` under `{prefix}/...` and return the
/// running average.
fn log_split(
    logger: &mut dyn MetricsLogger,
    prefix: &str,
    steps: &[StepMetrics],
    epoch: u64,
) -> RunningAvg {
    let mut avg = RunningAvg::new();
    for m in steps {
        avg.update(m);
    }
    let series: [(&str, fn(&StepMetrics) -> f64); 5] = [
        ("loss", |m| m.loss),
        ("rank_correlation", |m| m.rank_correlation),
        ("gap", |m| m.gap),
        ("alpha", |m| m.alpha),
        ("multiplier_loss", |m| m.multiplier_loss),
    ];
    for (name, get) in series {
        let values: Vec<f32> = steps.iter().map(|m| get(m) as f32).collect();
        logger.record(&format!("{prefix}/{name}"), &values, epoch, false);
    }
    avg
}
