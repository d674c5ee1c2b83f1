use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use surrogate::PerturbMode;

use crate::engine::SearchError;

/// Online conservative search, loaded from the `[online]` TOML section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineConfig {
    /// Maximum number of training epochs.
    #[serde(default = "default_epochs")]
    pub epochs: usize,

    /// Number of candidate designs, taken from the top of the dataset.
    #[serde(default = "default_num_candidates")]
    pub num_candidates: usize,

    /// Solver period in epochs, converted to a minibatch count.
    #[serde(default = "default_solver_interval")]
    pub solver_interval: f64,

    /// Epochs of plain training before the first solver step.
    #[serde(default)]
    pub solver_warmup: f64,

    /// Gradient steps per solver phase.
    #[serde(default = "default_solver_steps")]
    pub solver_steps: usize,

    /// Base solver step size, scaled by `sqrt(dim)`.
    #[serde(default = "default_solver_lr")]
    pub solver_lr: f64,

    #[serde(default = "default_solver_mode")]
    pub solver_mode: PerturbMode,

    /// Per-candidate step budget. Unlimited when absent.
    #[serde(default)]
    pub max_solver_steps: Option<u64>,

    /// Candidates whose last update norm falls below this are done.
    /// Zero disables the test.
    #[serde(default)]
    pub convergence_tol: f64,

    /// Evaluation indices (1-based) at which the oracle is queried. Empty
    /// means every evaluation.
    #[serde(default)]
    pub evaluate_steps: Vec<u32>,

    /// Feed current candidates to the trainer as extra negatives.
    #[serde(default = "default_true")]
    pub online_negatives: bool,

    /// Append oracle-labeled candidates to the training data.
    #[serde(default)]
    pub relabel: bool,

    /// Checkpoint directory of an offline-trained single model to start
    /// from. Ignored when the run's own `online` checkpoint exists.
    #[serde(default)]
    pub pretrained: Option<PathBuf>,
}

fn default_epochs() -> usize {
    50
}
fn default_num_candidates() -> usize {
    128
}
fn default_solver_interval() -> f64 {
    1.0
}
fn default_solver_steps() -> usize {
    1
}
fn default_solver_lr() -> f64 {
    0.01
}
fn default_solver_mode() -> PerturbMode {
    PerturbMode::Gradient
}
fn default_true() -> bool {
    true
}

impl Default for OnlineConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            num_candidates: default_num_candidates(),
            solver_interval: default_solver_interval(),
            solver_warmup: 0.0,
            solver_steps: default_solver_steps(),
            solver_lr: default_solver_lr(),
            solver_mode: default_solver_mode(),
            max_solver_steps: None,
            convergence_tol: 0.0,
            evaluate_steps: Vec::new(),
            online_negatives: true,
            relabel: false,
            pretrained: None,
        }
    }
}

impl OnlineConfig {
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.num_candidates == 0 {
            return Err(SearchError::Config("online.num_candidates must be > 0".into()));
        }
        if self.solver_interval <= 0.0 {
            return Err(SearchError::Config(format!(
                "online.solver_interval must be > 0, got {}",
                self.solver_interval
            )));
        }
        if self.solver_warmup < 0.0 || self.convergence_tol < 0.0 {
            return Err(SearchError::Config(
                "online.solver_warmup and online.convergence_tol must be >= 0".into(),
            ));
        }
        if self.solver_steps == 0 {
            tracing::warn!("online.solver_steps = 0: candidates will never move");
        }
        Ok(())
    }
}

/// How the ascent picks the gradient source at each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberSelection {
    /// Gradient of one uniformly chosen member per step.
    Random,
    /// Gradient of the ensemble mean.
    Mean,
}

/// Offline ensemble ascent, loaded from the `[ascent]` TOML section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AscentConfig {
    /// Number of starting designs, taken from the top of the dataset.
    #[serde(default = "default_solver_samples")]
    pub solver_samples: usize,

    /// Gradient steps; the oracle is queried after every step.
    #[serde(default = "default_ascent_steps")]
    pub solver_steps: usize,

    /// Base step size, scaled by `sqrt(dim)`.
    #[serde(default = "default_solver_lr")]
    pub solver_lr: f64,

    #[serde(default = "default_solver_mode")]
    pub solver_mode: PerturbMode,

    #[serde(default = "default_member_selection")]
    pub member_selection: MemberSelection,
}

fn default_solver_samples() -> usize {
    128
}
fn default_ascent_steps() -> usize {
    50
}
fn default_member_selection() -> MemberSelection {
    MemberSelection::Random
}

impl Default for AscentConfig {
    fn default() -> Self {
        Self {
            solver_samples: default_solver_samples(),
            solver_steps: default_ascent_steps(),
            solver_lr: default_solver_lr(),
            solver_mode: default_solver_mode(),
            member_selection: default_member_selection(),
        }
    }
}

impl AscentConfig {
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.solver_samples == 0 {
            return Err(SearchError::Config("ascent.solver_samples must be > 0".into()));
        }
        if self.solver_lr < 0.0 {
            return Err(SearchError::Config(format!(
                "ascent.solver_lr must be >= 0, got {}",
                self.solver_lr
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_defaults() {
        let cfg = OnlineConfig::default();
        assert_eq!(cfg.epochs, 50);
        assert_eq!(cfg.num_candidates, 128);
        assert_eq!(cfg.solver_steps, 1);
        assert!(cfg.online_negatives);
        assert!(!cfg.relabel);
        assert!(cfg.evaluate_steps.is_empty());
        assert!(cfg.max_solver_steps.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
            epochs = 5
            solver_lr = 0.5
            evaluate_steps = [1, 10]
            max_solver_steps = 20
            solver_mode = { kind = "clip", max = 0.5 }
        "#;
        let cfg: OnlineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.epochs, 5);
        assert!((cfg.solver_lr - 0.5).abs() < 1e-12);
        assert_eq!(cfg.evaluate_steps, vec![1, 10]);
        assert_eq!(cfg.max_solver_steps, Some(20));
        assert_eq!(cfg.solver_mode, PerturbMode::Clip { max: 0.5 });
        // Defaults for unspecified fields
        assert_eq!(cfg.num_candidates, 128);
        assert!(cfg.online_negatives);
    }

    #[test]
    fn test_invalid_online_config() {
        let cfg = OnlineConfig {
            solver_interval: 0.0,
            ..OnlineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(SearchError::Config(_))));
    }

    #[test]
    fn test_ascent_toml() {
        let cfg: AscentConfig = toml::from_str(
            r#"
            solver_samples = 16
            member_selection = "mean"
        "#,
        )
        .unwrap();
        assert_eq!(cfg.solver_samples, 16);
        assert_eq!(cfg.member_selection, MemberSelection::Mean);
        assert_eq!(cfg.solver_steps, 50);
        assert!(cfg.validate().is_ok());
        assert!(AscentConfig {
            solver_samples: 0,
            ..AscentConfig::default()
        }
        .validate()
        .is_err());
    }
}
