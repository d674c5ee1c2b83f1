//! Parametric sampling distributions over designs.
//!
//! Samples are returned in the surrogate's row format: continuous rows of
//! reals, or flattened one-hot rows for discrete designs. `log_prob` takes
//! the same rows back as a tensor and is differentiable in the parameters.

use burn::module::Param;
use burn::prelude::*;
use burn::tensor::activation::{log_softmax, softmax};
use burn::tensor::TensorData;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rand_distr::StandardNormal;
use surrogate::model::bridge::{tensor_to_rows, tensor_to_vec};

use crate::reinforce::PolicyError;

/// `0.5 * ln(2π)`
const HALF_LN_2PI: f32 = 0.918_938_5;

/// A distribution over design rows with differentiable log-density.
pub trait Marginal<B: Backend>: Module<B> + Clone {
    /// Draw `n` design rows.
    fn sample(&self, n: usize, rng: &mut impl Rng) -> Result<Vec<Vec<f32>>, PolicyError>;

    /// Log-probability of each row of `x`, shape `(n,)`.
    fn log_prob(&self, x: Tensor<B, 2>) -> Tensor<B, 1>;
}

/// Independent categorical per position, parameterized by logits of shape
/// `(length, categories)`.
#[derive(Module, Debug)]
pub struct DiscreteMarginal<B: Backend> {
    logits: Param<Tensor<B, 2>>,
}

impl<B: Backend> DiscreteMarginal<B> {
    pub fn from_logits(logits: Tensor<B, 2>) -> Self {
        Self {
            logits: Param::from_tensor(logits),
        }
    }

    /// Marginal of the one-hot `designs`, Laplace-smoothed by `smoothing`
    /// pseudo-counts per category so that no category has zero mass.
    pub fn from_designs(
        designs: &[Vec<f32>],
        length: usize,
        categories: usize,
        smoothing: f32,
        device: &B::Device,
    ) -> Self {
        let mut counts = vec![0.0f32; length * categories];
        for row in designs {
            for (pos, chunk) in row.chunks(categories).enumerate().take(length) {
                let argmax = chunk
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                counts[pos * categories + argmax] += 1.0;
            }
        }
        let total = designs.len() as f32 + categories as f32 * smoothing;
        let logits: Vec<f32> = counts
            .into_iter()
            .map(|c| ((c + smoothing) / total).ln())
            .collect();
        Self::from_logits(Tensor::from_data(
            TensorData::new(logits, [length, categories]),
            device,
        ))
    }

    /// Per-position category probabilities, shape `(length, categories)`.
    pub fn probs(&self) -> Tensor<B, 2> {
        softmax(self.logits.val(), 1)
    }
}

impl<B: Backend> Marginal<B> for DiscreteMarginal<B> {
    fn sample(&self, n: usize, rng: &mut impl Rng) -> Result<Vec<Vec<f32>>, PolicyError> {
        let probs = tensor_to_rows(self.probs());
        let categories = probs.first().map_or(0, Vec::len);
        let samplers = probs
            .iter()
            .map(|p| WeightedIndex::new(p).map_err(|e| PolicyError::Distribution(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        Ok((0..n)
            .map(|_| {
                let mut row = vec![0.0; samplers.len() * categories];
                for (pos, sampler) in samplers.iter().enumerate() {
                    row[pos * categories + sampler.sample(rng)] = 1.0;
                }
                row
            })
            .collect())
    }

    fn log_prob(&self, x: Tensor<B, 2>) -> Tensor<B, 1> {
        let [n, _] = x.dims();
        let [length, categories] = self.logits.val().dims();
        let log_p = log_softmax(self.logits.val(), 1).unsqueeze::<3>();
        (x.reshape([n, length, categories]) * log_p)
            .sum_dim(2)
            .sum_dim(1)
            .reshape([n])
    }
}

/// Diagonal Gaussian with learned mean and log-std.
#[derive(Module, Debug)]
pub struct ContinuousMarginal<B: Backend> {
    mean: Param<Tensor<B, 1>>,
    logstd: Param<Tensor<B, 1>>,
}

impl<B: Backend> ContinuousMarginal<B> {
    pub fn new(mean: Tensor<B, 1>, logstd: Tensor<B, 1>) -> Self {
        Self {
            mean: Param::from_tensor(mean),
            logstd: Param::from_tensor(logstd),
        }
    }

    /// Mean and standard deviation of `designs`, the latter floored at
    /// `min_std`.
    pub fn from_designs(designs: &[Vec<f32>], min_std: f32, device: &B::Device) -> Self {
        let dim = designs.first().map_or(0, Vec::len);
        let n = designs.len().max(1) as f32;
        let mean: Vec<f32> = (0..dim)
            .map(|j| designs.iter().map(|r| r[j]).sum::<f32>() / n)
            .collect();
        let logstd: Vec<f32> = (0..dim)
            .map(|j| {
                let var = designs.iter().map(|r| (r[j] - mean[j]).powi(2)).sum::<f32>() / n;
                var.sqrt().max(min_std).ln()
            })
            .collect();
        Self::new(
            Tensor::from_data(TensorData::new(mean, [dim]), device),
            Tensor::from_data(TensorData::new(logstd, [dim]), device),
        )
    }

    pub fn mean(&self) -> Tensor<B, 1> {
        self.mean.val()
    }

    pub fn std(&self) -> Tensor<B, 1> {
        self.logstd.val().exp()
    }
}

impl<B: Backend> Marginal<B> for ContinuousMarginal<B> {
    fn sample(&self, n: usize, rng: &mut impl Rng) -> Result<Vec<Vec<f32>>, PolicyError> {
        let mean = tensor_to_vec(self.mean());
        let std = tensor_to_vec(self.std());
        if std.iter().chain(&mean).any(|v| !v.is_finite()) {
            return Err(PolicyError::Distribution(
                "non-finite Gaussian parameters".into(),
            ));
        }
        Ok((0..n)
            .map(|_| {
                mean.iter()
                    .zip(&std)
                    .map(|(m, s)| m + s * rng.sample::<f32, _>(StandardNormal))
                    .collect()
            })
            .collect())
    }

    fn log_prob(&self, x: Tensor<B, 2>) -> Tensor<B, 1> {
        let mean = self.mean.val().unsqueeze::<2>();
        let logstd = self.logstd.val().unsqueeze::<2>();
        let z = (x - mean) / logstd.clone().exp();
        (z.powf_scalar(2.0).mul_scalar(-0.5) - logstd)
            .sub_scalar(HALF_LN_2PI)
            .sum_dim(1)
            .squeeze::<1>(1)
    }
}
