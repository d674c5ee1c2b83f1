//! Gradient-ascent perturbation of designs through a differentiable score.
//!
//! Used in two places: the conservative trainer ascends the current model to
//! find overestimated designs, and the search loops ascend the surrogate to
//! improve candidates. Updates happen in the relaxed space of a
//! [`DesignSpace`]; the scoring function always sees materialized designs.
//!
//! The configured step size is scaled by `sqrt(relaxed_dim)` once, when the
//! engine is built, so the per-coordinate step stays comparable across
//! design dimensionalities.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::space::DesignSpace;

/// How the raw gradient is turned into an update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PerturbMode {
    /// `x + η·g`
    Gradient,
    /// `x + η·sign(g)`
    Sign,
    /// `x + η·clamp(g, -max, max)`
    Clip { max: f32 },
}

#[derive(Config, Debug)]
pub struct PerturbConfig {
    /// Number of ascent steps. Zero disables the perturbation.
    #[config(default = 50)]
    pub num_steps: usize,
    /// Base step size before dimensional scaling.
    #[config(default = 0.05)]
    pub step_size: f64,
    #[config(default = "PerturbMode::Gradient")]
    pub mode: PerturbMode,
}

/// Result of a perturbation run. All tensors are detached.
#[derive(Debug, Clone)]
pub struct PerturbOutput<B: Backend> {
    /// Final relaxed rows.
    pub relaxed: Tensor<B, 2>,
    /// Per-row L2 norm of the raw gradient at the last step (zeros when no
    /// step was taken).
    pub grad_norm: Tensor<B, 1>,
    /// Per-row L2 norm of the last applied update (zero for masked rows).
    pub update_norm: Tensor<B, 1>,
}

#[derive(Debug, Clone)]
pub struct PerturbationEngine {
    space: DesignSpace,
    num_steps: usize,
    mode: PerturbMode,
    /// Effective step size: `step_size * sqrt(relaxed_dim)`.
    eta: f64,
}

fn row_norm<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 1> {
    x.powf_scalar(2.0).sum_dim(1).sqrt().squeeze::<1>(1)
}

impl PerturbationEngine {
    pub fn new(config: &PerturbConfig, space: DesignSpace) -> Self {
        let eta = config.step_size * (space.relaxed_dim() as f64).sqrt();
        Self {
            space,
            num_steps: config.num_steps,
            mode: config.mode,
            eta,
        }
    }

    pub fn space(&self) -> &DesignSpace {
        &self.space
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn eta(&self) -> f64 {
        self.eta
    }

    /// Ascend `score_fn` from relaxed rows `z0` for the configured number of
    /// steps.
    pub fn perturb<B: AutodiffBackend>(
        &self,
        z0: Tensor<B, 2>,
        score_fn: &dyn Fn(Tensor<B, 2>) -> Tensor<B, 1>,
    ) -> PerturbOutput<B> {
        self.perturb_masked(z0, score_fn, None)
    }

    /// Like [`perturb`](Self::perturb), but rows whose `done` entry is 1.0
    /// are left untouched.
    pub fn perturb_masked<B: AutodiffBackend>(
        &self,
        z0: Tensor<B, 2>,
        score_fn: &dyn Fn(Tensor<B, 2>) -> Tensor<B, 1>,
        done: Option<Tensor<B, 1>>,
    ) -> PerturbOutput<B> {
        let [n, _] = z0.dims();
        let device = z0.device();
        let mut z = z0.detach();
        let mut grad_norm = Tensor::<B, 1>::zeros([n], &device);
        let mut update_norm = Tensor::<B, 1>::zeros([n], &device);
        let active = done.map(|d| d.detach().neg().add_scalar(1.0).unsqueeze_dim::<2>(1));

        for _ in 0..self.num_steps {
            let leaf = z.clone().require_grad();
            let score = score_fn(self.space.materialize(leaf.clone())).sum();
            let grads = score.backward();
            let g = match leaf.grad(&grads) {
                Some(g) => Tensor::<B, 2>::from_inner(g),
                None => z.zeros_like(),
            };

            let mut update = match self.mode {
                PerturbMode::Gradient => g.clone(),
                PerturbMode::Sign => g.clone().sign(),
                PerturbMode::Clip { max } => g.clone().clamp(-max, max),
            }
            .mul_scalar(self.eta);
            if let Some(mask) = &active {
                update = update * mask.clone();
            }

            grad_norm = row_norm(g);
            update_norm = row_norm(update.clone());
            z = (z + update).detach();
        }

        PerturbOutput {
            relaxed: z,
            grad_norm: grad_norm.detach(),
            update_norm: update_norm.detach(),
        }
    }

    /// Perturb materialized designs and return materialized, detached designs.
    pub fn perturb_designs<B: AutodiffBackend>(
        &self,
        x: Tensor<B, 2>,
        score_fn: &dyn Fn(Tensor<B, 2>) -> Tensor<B, 1>,
    ) -> Tensor<B, 2> {
        if self.num_steps == 0 {
            return x.detach();
        }
        let z = self.space.to_relaxed(x.detach());
        let out = self.perturb(z, score_fn);
        self.space.materialize(out.relaxed).detach()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::bridge::{tensor_to_rows, tensor_to_vec};
    use crate::space::Relaxation;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::tensor::TensorData;
    use task::DesignShape;

    type B = Autodiff<NdArray<f32>>;

    /// Concave objective with its maximum at `target`.
    fn concave(x: Tensor<B, 2>) -> Tensor<B, 1> {
        let target = Tensor::<B, 2>::from_data(TensorData::from([[1.0_f32, -2.0, 0.5]]), &x.device());
        (x - target).powf_scalar(2.0).sum_dim(1).neg().squeeze::<1>(1)
    }

    fn start() -> Tensor<B, 2> {
        Tensor::from_data(
            TensorData::from([[0.0_f32, 0.0, 0.0], [3.0, 3.0, 3.0]]),
            &Default::default(),
        )
    }

    fn engine(steps: usize, step_size: f64, mode: PerturbMode) -> PerturbationEngine {
        let config = PerturbConfig::new()
            .with_num_steps(steps)
            .with_step_size(step_size)
            .with_mode(mode);
        PerturbationEngine::new(&config, DesignSpace::Continuous { dim: 3 })
    }

    #[test]
    fn test_eta_scales_with_sqrt_dim() {
        let e = engine(1, 0.1, PerturbMode::Gradient);
        assert!((e.eta() - 0.1 * 3f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_zero_steps_is_identity() {
        let x0 = start();
        let e = engine(0, 0.1, PerturbMode::Gradient);
        let out = e.perturb(x0.clone(), &concave);
        assert_eq!(tensor_to_rows(out.relaxed), tensor_to_rows(x0.clone()));
        assert_eq!(tensor_to_vec(out.grad_norm), vec![0.0, 0.0]);
        assert_eq!(tensor_to_rows(e.perturb_designs(x0.clone(), &concave)), tensor_to_rows(x0));
    }

    #[test]
    fn test_ascent_is_monotone_on_concave() {
        let x0 = start();
        let mut prev = tensor_to_vec(concave(x0.clone()));
        let mut z = x0;
        let e = engine(1, 0.05, PerturbMode::Gradient);
        for _ in 0..20 {
            z = e.perturb(z, &concave).relaxed;
            let now = tensor_to_vec(concave(z.clone()));
            for (a, b) in now.iter().zip(&prev) {
                assert!(a >= b, "score decreased from {b} to {a}");
            }
            prev = now;
        }
        assert!(prev.iter().all(|&s| s > -0.5));
    }

    #[test]
    fn test_modes_move_uphill() {
        for mode in [PerturbMode::Sign, PerturbMode::Clip { max: 0.5 }] {
            let x0 = start();
            let before = tensor_to_vec(concave(x0.clone()));
            let out = engine(5, 0.02, mode).perturb(x0, &concave);
            let after = tensor_to_vec(concave(out.relaxed));
            for (a, b) in after.iter().zip(&before) {
                assert!(a > b, "{mode:?} did not improve: {b} -> {a}");
            }
        }
    }

    #[test]
    fn test_done_rows_are_frozen() {
        let x0 = start();
        let done = Tensor::<B, 1>::from_data(TensorData::from([0.0_f32, 1.0]), &Default::default());
        let out = engine(3, 0.05, PerturbMode::Gradient).perturb_masked(x0.clone(), &concave, Some(done));
        let rows = tensor_to_rows(out.relaxed);
        assert_eq!(rows[1], vec![3.0, 3.0, 3.0]);
        assert_ne!(rows[0], vec![0.0, 0.0, 0.0]);
        let update = tensor_to_vec(out.update_norm);
        assert_eq!(update[1], 0.0);
        assert!(update[0] > 0.0);
    }

    #[test]
    fn test_input_is_not_mutated() {
        let x0 = start();
        let snapshot = tensor_to_rows(x0.clone());
        let _ = engine(5, 0.1, PerturbMode::Gradient).perturb(x0.clone(), &concave);
        assert_eq!(tensor_to_rows(x0), snapshot);
    }

    #[test]
    fn test_discrete_perturbation_increases_target_category() {
        let device = Default::default();
        let space = DesignSpace::new(
            DesignShape::Discrete {
                length: 3,
                categories: 3,
            },
            Relaxation::LogOdds,
            0.6,
        );
        // Objective: total probability mass on category 0
        let mass0 = |x: Tensor<B, 2>| {
            let [n, _] = x.dims();
            x.reshape([n, 3, 3]).slice([0..n, 0..3, 0..1]).sum_dim(1).reshape([n])
        };
        let x = Tensor::<B, 2>::from_data(
            TensorData::new(task::one_hot(&[1, 2, 1], 3), [1, 9]),
            &device,
        );
        let config = PerturbConfig::new().with_num_steps(10).with_step_size(0.5);
        let engine = PerturbationEngine::new(&config, space);
        let before = tensor_to_vec(mass0(space.materialize(space.to_relaxed(x.clone()))))[0];
        let after = tensor_to_vec(mass0(engine.perturb_designs(x, &mass0)))[0];
        assert!(after > before, "mass on category 0 went from {before} to {after}");
    }
}
