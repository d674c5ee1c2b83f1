//! REINFORCE over a design marginal fitted to the top of the dataset.
//!
//! Each iteration samples a batch from the marginal, scores it with the
//! ensemble mean (or the oracle when `optimize_ground_truth` is set), and
//! takes one Adam step on `-mean(log_prob(x) * (y - ȳ) / σ_y)` with the
//! standardized scores held constant. The updated marginal is then sampled
//! again and scored by the oracle for evaluation.

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use rand::Rng;
use search::engine::build_records;
use search::{BestTracker, Problem, SearchOutcome};
use serde::{Deserialize, Serialize};
use surrogate::model::bridge::{rows_to_tensor, tensor_to_f64, tensor_to_vec, values_to_tensor};
use surrogate::Ensemble;
use task::{top_k_indices, DesignShape, TaskError};
use trajectory::{MetricsLogger, Variant};

use crate::marginal::{ContinuousMarginal, DiscreteMarginal, Marginal};
use crate::render::Renderer;

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Task error: {0}")]
    Task(#[from] TaskError),
    #[error("Non-finite policy loss at iteration {iteration}")]
    NonFinite { iteration: usize },
    #[error("Cannot sample from marginal: {0}")]
    Distribution(String),
    #[error("Render failed: {0}")]
    Render(String),
    #[error("Invalid reinforce configuration: {0}")]
    Config(String),
}

/// Policy-gradient search, loaded from the `[reinforce]` TOML section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinforceConfig {
    #[serde(default = "default_iterations")]
    pub iterations: usize,

    #[serde(default = "default_reinforce_lr")]
    pub reinforce_lr: f64,

    /// Samples per policy-gradient estimate.
    #[serde(default = "default_reinforce_batch_size")]
    pub reinforce_batch_size: usize,

    /// Size of the top-K set the marginal is fitted to, and of each
    /// oracle-scored evaluation batch.
    #[serde(default = "default_solver_samples")]
    pub solver_samples: usize,

    /// Score samples with the oracle instead of the ensemble.
    #[serde(default)]
    pub optimize_ground_truth: bool,

    /// Pseudo-counts per category in the initial discrete marginal.
    #[serde(default = "default_marginal_smoothing")]
    pub marginal_smoothing: f32,

    /// Floor on the initial Gaussian standard deviation.
    #[serde(default = "default_min_std")]
    pub min_std: f32,
}

fn default_iterations() -> usize {
    200
}
fn default_reinforce_lr() -> f64 {
    0.01
}
fn default_reinforce_batch_size() -> usize {
    256
}
fn default_solver_samples() -> usize {
    128
}
fn default_marginal_smoothing() -> f32 {
    0.1
}
fn default_min_std() -> f32 {
    0.1
}

impl Default for ReinforceConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            reinforce_lr: default_reinforce_lr(),
            reinforce_batch_size: default_reinforce_batch_size(),
            solver_samples: default_solver_samples(),
            optimize_ground_truth: false,
            marginal_smoothing: default_marginal_smoothing(),
            min_std: default_min_std(),
        }
    }
}

impl ReinforceConfig {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.reinforce_batch_size < 2 {
            return Err(PolicyError::Config(
                "reinforce.reinforce_batch_size must be >= 2 to standardize scores".into(),
            ));
        }
        if self.solver_samples == 0 {
            return Err(PolicyError::Config("reinforce.solver_samples must be > 0".into()));
        }
        if self.marginal_smoothing <= 0.0 || self.min_std <= 0.0 {
            return Err(PolicyError::Config(
                "reinforce.marginal_smoothing and reinforce.min_std must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// `(y - mean) / std` with the population std; all zeros when the scores
/// are constant.
pub fn standardize(y: &[f32]) -> Vec<f32> {
    let n = y.len().max(1) as f32;
    let mean = y.iter().sum::<f32>() / n;
    let std = (y.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt();
    if std <= f32::EPSILON {
        return vec![0.0; y.len()];
    }
    y.iter().map(|v| (v - mean) / std).collect()
}

pub struct Reinforce {
    config: ReinforceConfig,
}

impl Reinforce {
    pub fn new(config: ReinforceConfig) -> Result<Self, PolicyError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ReinforceConfig {
        &self.config
    }

    /// Fit the marginal matching the task's design shape and run every
    /// iteration. The best design of the final evaluation batch is handed to
    /// `renderer`.
    pub fn run<B: AutodiffBackend>(
        &self,
        problem: &Problem,
        ensemble: &Ensemble<B>,
        rng: &mut impl Rng,
        logger: &mut dyn MetricsLogger,
        renderer: &mut dyn Renderer,
    ) -> Result<SearchOutcome, PolicyError> {
        let data = problem.dataset();
        if data.is_empty() {
            return Err(PolicyError::Config("dataset is empty; nothing to fit".into()));
        }
        let device = ensemble.member(0).device().clone();
        let top: Vec<Vec<f32>> = top_k_indices(&data.y, self.config.solver_samples)
            .into_iter()
            .map(|i| data.x[i].clone())
            .collect();

        match problem.shape() {
            DesignShape::Continuous { .. } => {
                let marginal =
                    ContinuousMarginal::<B>::from_designs(&top, self.config.min_std, &device);
                self.optimize(problem, ensemble, marginal, rng, logger, renderer)
            }
            DesignShape::Discrete { length, categories } => {
                let marginal = DiscreteMarginal::<B>::from_designs(
                    &top,
                    length,
                    categories,
                    self.config.marginal_smoothing,
                    &device,
                );
                self.optimize(problem, ensemble, marginal, rng, logger, renderer)
            }
        }
    }

    fn optimize<B, M>(
        &self,
        problem: &Problem,
        ensemble: &Ensemble<B>,
        mut marginal: M,
        rng: &mut impl Rng,
        logger: &mut dyn MetricsLogger,
        renderer: &mut dyn Renderer,
    ) -> Result<SearchOutcome, PolicyError>
    where
        B: AutodiffBackend,
        M: Marginal<B> + AutodiffModule<B>,
    {
        let cfg = &self.config;
        let device = ensemble.member(0).device().clone();
        let mut optim = AdamConfig::new().init::<B, M>();
        let mut best = BestTracker::new();
        let mut outcome = SearchOutcome::default();

        tracing::info!(
            iterations = cfg.iterations,
            batch = cfg.reinforce_batch_size,
            ground_truth = cfg.optimize_ground_truth,
            "Starting REINFORCE"
        );

        for iteration in 0..cfg.iterations {
            let step = iteration as u64;
            let xs = marginal.sample(cfg.reinforce_batch_size, rng)?;
            let predictions = if cfg.optimize_ground_truth {
                problem.task().score(&problem.to_raw_designs(&xs))?
            } else {
                let x = rows_to_tensor::<B>(&xs, &device);
                problem.denormalize_y(&tensor_to_vec(ensemble.mean_prediction(x).detach()))
            };

            let advantages = values_to_tensor::<B>(&standardize(&predictions), &device);
            let log_prob = marginal.log_prob(rows_to_tensor::<B>(&xs, &device));
            let loss = (log_prob * advantages).mean().neg();
            let loss_val = tensor_to_f64(loss.clone().detach());
            if !loss_val.is_finite() {
                return Err(PolicyError::NonFinite { iteration });
            }

            logger.record("reinforce/prediction", &predictions, step, true);
            logger.scalar("reinforce/loss", loss_val as f32, step);

            let grads = GradientsParams::from_grads(loss.backward(), &marginal);
            marginal = optim.step(cfg.reinforce_lr, marginal, grads);

            let solution = marginal.sample(cfg.solver_samples, rng)?;
            let raw = problem.to_raw_designs(&solution);
            let scores = problem.task().score(&raw)?;
            outcome.oracle_calls += 1;
            let solution_pred = problem.denormalize_y(&tensor_to_vec(
                ensemble
                    .mean_prediction(rows_to_tensor::<B>(&solution, &device))
                    .detach(),
            ));
            logger.record("score", &scores, step, true);

            let evaluation = iteration as u32;
            best.update(&scores, &raw, evaluation);
            outcome.records.extend(build_records(
                Variant::Reinforce,
                evaluation,
                step,
                &solution_pred,
                Some(&scores),
                &[],
                &[],
                &[],
            ));

            let mean_score = scores.iter().sum::<f32>() / scores.len() as f32;
            tracing::info!(iteration, loss = loss_val, mean_score, "REINFORCE iteration");

            if iteration + 1 == cfg.iterations {
                let top = scores
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                renderer.render(&raw[top], &problem.shape().input_shape(), scores[top])?;
                outcome.final_designs = raw;
            }
            outcome.scores.push(scores);
            outcome.predictions.push(solution_pred);
            outcome.evaluations += 1;
        }

        outcome.solver_steps = cfg.iterations as u64;
        outcome.best = best.into_best();
        Ok(outcome)
    }
}
