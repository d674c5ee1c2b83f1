//! Conservative surrogate models for offline design optimization.
//!
//! Provides a probabilistic MLP forward model (mean and std per design), a
//! gradient-ascent perturbation engine that works in continuous space or in
//! an unconstrained relaxation of discrete simplices, a conservative trainer
//! that penalizes overestimation on perturbed designs with a dual-ascended
//! Lagrange multiplier, and bootstrapped ensembles of such trainers.

pub mod ensemble;
pub mod model;
pub mod perturb;
pub mod space;
pub mod training;

pub use ensemble::Ensemble;
pub use model::forward_model::{Activation, ForwardModel, ForwardModelConfig, Prediction};
pub use perturb::{PerturbConfig, PerturbMode, PerturbOutput, PerturbationEngine};
pub use space::{DesignSpace, Relaxation};
pub use training::checkpoint::{CheckpointError, CheckpointManager, Checkpointable, TrainerState};
pub use training::trainer::{ConservativeTrainer, TrainError, TrainerConfig};
