//! TOML experiment config for the baselines CLI.
//!
//! One file describes a whole trial: `[task]`, `[model]`, `[trainer]`,
//! `[ensemble]` and one section per search variant (`[online]`, `[ascent]`,
//! `[reinforce]`). Every option has a default, so an empty file is a valid
//! config. CLI flags are applied on top: defaults < TOML < CLI.

use std::path::{Path, PathBuf};

use anyhow::Context;
use policy::ReinforceConfig;
use search::{AscentConfig, OnlineConfig};
use serde::{Deserialize, Serialize};
use surrogate::space::DEFAULT_DISCRETE_CLIP;
use surrogate::training::loss::SupervisedLoss;
use surrogate::{
    Activation, DesignSpace, ForwardModelConfig, PerturbConfig, PerturbMode, Relaxation,
    TrainerConfig,
};
use task::{DesignShape, TaskKwargs, TaskRegistry};

/// Top-level structure of an experiment TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Directory for checkpoints, artifacts, trajectory and summary.
    #[serde(default = "default_logging_dir")]
    pub logging_dir: PathBuf,
    /// Seeds dataset shuffling, bootstraps, backend init and sampling.
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub task: TaskSection,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub trainer: TrainerSection,
    #[serde(default)]
    pub ensemble: EnsembleSection,
    #[serde(default)]
    pub online: OnlineConfig,
    #[serde(default)]
    pub ascent: AscentConfig,
    #[serde(default)]
    pub reinforce: ReinforceConfig,
}

fn default_logging_dir() -> PathBuf {
    PathBuf::from("runs/default")
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            logging_dir: default_logging_dir(),
            seed: 0,
            task: TaskSection::default(),
            model: ModelSection::default(),
            trainer: TrainerSection::default(),
            ensemble: EnsembleSection::default(),
            online: OnlineConfig::default(),
            ascent: AscentConfig::default(),
            reinforce: ReinforceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSection {
    /// Registry name, e.g. `"Quadratic-v0"`.
    #[serde(default = "default_task_name")]
    pub name: String,
    #[serde(default)]
    pub kwargs: TaskKwargs,
    #[serde(default = "default_true")]
    pub normalize_xs: bool,
    #[serde(default = "default_true")]
    pub normalize_ys: bool,
}

fn default_task_name() -> String {
    "Quadratic-v0".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for TaskSection {
    fn default() -> Self {
        Self {
            name: default_task_name(),
            kwargs: TaskKwargs::default(),
            normalize_xs: true,
            normalize_ys: true,
        }
    }
}

/// Forward model architecture. The input dimension comes from the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,
    #[serde(default = "default_activation")]
    pub activation: Activation,
    #[serde(default = "default_min_std")]
    pub min_std: f64,
    #[serde(default = "default_max_std")]
    pub max_std: f64,
}

fn default_hidden_size() -> usize {
    64
}
fn default_num_layers() -> usize {
    2
}
fn default_activation() -> Activation {
    Activation::LeakyRelu
}
fn default_min_std() -> f64 {
    0.1
}
fn default_max_std() -> f64 {
    0.2
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            hidden_size: default_hidden_size(),
            num_layers: default_num_layers(),
            activation: default_activation(),
            min_std: default_min_std(),
            max_std: default_max_std(),
        }
    }
}

/// Conservative training. `perturbation_steps = 0` with `alpha_lr = 0`
/// gives a vanilla (non-conservative) model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerSection {
    #[serde(default = "default_forward_model_lr")]
    pub forward_model_lr: f64,
    #[serde(default = "default_initial_alpha")]
    pub initial_alpha: f64,
    #[serde(default = "default_alpha_lr")]
    pub alpha_lr: f64,
    #[serde(default = "default_target_gap")]
    pub target_gap: f64,
    #[serde(default = "default_loss")]
    pub loss: SupervisedLoss,
    #[serde(default = "default_perturbation_steps")]
    pub perturbation_steps: usize,
    #[serde(default = "default_perturbation_lr")]
    pub perturbation_lr: f64,
    #[serde(default = "default_perturbation_mode")]
    pub perturbation_mode: PerturbMode,
    /// Std of Gaussian noise added to continuous training inputs.
    #[serde(default)]
    pub continuous_noise_std: f64,
    /// Smoothing weight applied to discrete simplices before taking logs.
    #[serde(default = "default_discrete_clip")]
    pub discrete_clip: f32,
    #[serde(default = "default_relaxation")]
    pub relaxation: Relaxation,
}

fn default_forward_model_lr() -> f64 {
    3e-4
}
fn default_initial_alpha() -> f64 {
    1.0
}
fn default_alpha_lr() -> f64 {
    0.01
}
fn default_target_gap() -> f64 {
    -2.0
}
fn default_loss() -> SupervisedLoss {
    SupervisedLoss::Nll
}
fn default_perturbation_steps() -> usize {
    50
}
fn default_perturbation_lr() -> f64 {
    0.05
}
fn default_perturbation_mode() -> PerturbMode {
    PerturbMode::Gradient
}
fn default_discrete_clip() -> f32 {
    DEFAULT_DISCRETE_CLIP
}
fn default_relaxation() -> Relaxation {
    Relaxation::LogOdds
}

impl Default for TrainerSection {
    fn default() -> Self {
        Self {
            forward_model_lr: default_forward_model_lr(),
            initial_alpha: default_initial_alpha(),
            alpha_lr: default_alpha_lr(),
            target_gap: default_target_gap(),
            loss: default_loss(),
            perturbation_steps: default_perturbation_steps(),
            perturbation_lr: default_perturbation_lr(),
            perturbation_mode: default_perturbation_mode(),
            continuous_noise_std: 0.0,
            discrete_clip: default_discrete_clip(),
            relaxation: default_relaxation(),
        }
    }
}

/// Data pipeline and ensemble training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleSection {
    /// Number of members (ascent and reinforce; online trains one model).
    #[serde(default = "default_size")]
    pub size: usize,
    /// Bootstrap resamples of the training split; 0 shares one split.
    #[serde(default)]
    pub bootstraps: usize,
    /// Training epochs for ascent and reinforce.
    #[serde(default = "default_ensemble_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_val_size")]
    pub val_size: usize,
}

fn default_size() -> usize {
    1
}
fn default_ensemble_epochs() -> usize {
    100
}
fn default_batch_size() -> usize {
    128
}
fn default_val_size() -> usize {
    200
}

impl Default for EnsembleSection {
    fn default() -> Self {
        Self {
            size: default_size(),
            bootstraps: 0,
            epochs: default_ensemble_epochs(),
            batch_size: default_batch_size(),
            val_size: default_val_size(),
        }
    }
}

/// CLI flags that take priority over the TOML file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub task: Option<String>,
    pub seed: Option<u64>,
    pub logging_dir: Option<PathBuf>,
    /// Applies to both ensemble and online epochs.
    pub epochs: Option<usize>,
}

impl ExperimentConfig {
    /// Load and deserialize an experiment config from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded experiment config");
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(task) = &overrides.task {
            self.task.name = task.clone();
        }
        if let Some(seed) = overrides.seed {
            self.seed = seed;
        }
        if let Some(dir) = &overrides.logging_dir {
            self.logging_dir = dir.clone();
        }
        if let Some(epochs) = overrides.epochs {
            self.ensemble.epochs = epochs;
            self.online.epochs = epochs;
        }
    }

    /// Check every section before anything is built or trained.
    pub fn validate(&self) -> anyhow::Result<()> {
        TaskRegistry::validate(&self.task.name, &self.task.kwargs)?;
        self.online.validate()?;
        self.ascent.validate()?;
        self.reinforce.validate()?;

        let e = &self.ensemble;
        anyhow::ensure!(e.size > 0, "ensemble.size must be > 0");
        anyhow::ensure!(e.batch_size > 0, "ensemble.batch_size must be > 0");
        anyhow::ensure!(
            e.bootstraps == 0 || e.bootstraps == e.size,
            "ensemble.bootstraps ({}) must be 0 or equal to ensemble.size ({})",
            e.bootstraps,
            e.size
        );
        anyhow::ensure!(
            e.val_size < self.task.kwargs.num_samples,
            "ensemble.val_size ({}) must be smaller than task.kwargs.num_samples ({})",
            e.val_size,
            self.task.kwargs.num_samples
        );

        let m = &self.model;
        anyhow::ensure!(m.hidden_size > 0, "model.hidden_size must be > 0");
        anyhow::ensure!(
            0.0 < m.min_std && m.min_std < m.max_std,
            "model std bounds must satisfy 0 < min_std < max_std"
        );

        let t = &self.trainer;
        anyhow::ensure!(
            t.forward_model_lr > 0.0 && t.alpha_lr >= 0.0 && t.initial_alpha > 0.0,
            "trainer learning rates must be non-negative and initial_alpha positive"
        );
        anyhow::ensure!(
            t.discrete_clip > 0.0 && t.discrete_clip < 1.0,
            "trainer.discrete_clip must be in (0, 1) so one-hot rows keep finite logits, got {}",
            t.discrete_clip
        );
        Ok(())
    }

    pub fn model_config(&self) -> ForwardModelConfig {
        let m = &self.model;
        ForwardModelConfig::new(0)
            .with_hidden_size(m.hidden_size)
            .with_num_layers(m.num_layers)
            .with_activation(m.activation)
            .with_min_std(m.min_std)
            .with_max_std(m.max_std)
    }

    pub fn trainer_config(&self) -> TrainerConfig {
        let t = &self.trainer;
        TrainerConfig::new()
            .with_forward_model_lr(t.forward_model_lr)
            .with_initial_alpha(t.initial_alpha)
            .with_alpha_lr(t.alpha_lr)
            .with_target_gap(t.target_gap)
            .with_loss(t.loss)
            .with_perturb(
                PerturbConfig::new()
                    .with_num_steps(t.perturbation_steps)
                    .with_step_size(t.perturbation_lr)
                    .with_mode(t.perturbation_mode),
            )
            .with_continuous_noise_std(t.continuous_noise_std)
    }

    pub fn design_space(&self, shape: DesignShape) -> DesignSpace {
        DesignSpace::new(shape, self.trainer.relaxation, self.trainer.discrete_clip)
    }
}
