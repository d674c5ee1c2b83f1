use burn::module::Ignored;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation;
use serde::{Deserialize, Serialize};

/// Hidden-layer nonlinearity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    LeakyRelu,
    Tanh,
    Silu,
}

impl Activation {
    /// Negative slope used by [`Activation::LeakyRelu`].
    pub const LEAKY_SLOPE: f64 = 0.3;

    fn apply<B: Backend>(self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            Self::Relu => activation::relu(x),
            Self::LeakyRelu => activation::leaky_relu(x, Self::LEAKY_SLOPE),
            Self::Tanh => x.tanh(),
            Self::Silu => activation::silu(x),
        }
    }
}

/// Configuration for the probabilistic forward model.
///
/// ```text
/// (batch, input_dim)
///   → [Linear(→hidden_size) → activation] × num_layers
///   → Linear(hidden_size→2) → (mean, raw_logstd)
///   → logstd soft-clamped into (ln min_std, ln max_std)
///   → Gaussian(mean, exp(logstd)) per design
/// ```
#[derive(Config, Debug)]
pub struct ForwardModelConfig {
    /// Flattened design dimension.
    pub input_dim: usize,
    #[config(default = 64)]
    pub hidden_size: usize,
    /// Number of hidden layers.
    #[config(default = 2)]
    pub num_layers: usize,
    #[config(default = "Activation::LeakyRelu")]
    pub activation: Activation,
    /// Lower bound of the predicted standard deviation.
    #[config(default = 0.1)]
    pub min_std: f64,
    /// Upper bound of the predicted standard deviation.
    #[config(default = 0.2)]
    pub max_std: f64,
}

/// Gaussian predictive distribution for a batch of designs.
#[derive(Debug, Clone)]
pub struct Prediction<B: Backend> {
    pub mean: Tensor<B, 1>,
    pub std: Tensor<B, 1>,
}

impl<B: Backend> Prediction<B> {
    pub fn detach(self) -> Self {
        Self {
            mean: self.mean.detach(),
            std: self.std.detach(),
        }
    }
}

/// MLP mapping a design to the mean and standard deviation of its score.
#[derive(Module, Debug)]
pub struct ForwardModel<B: Backend> {
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
    activation: Ignored<Activation>,
    min_logstd: f64,
    max_logstd: f64,
}

impl ForwardModelConfig {
    /// Initialize a ForwardModel with the given configuration.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ForwardModel<B> {
        let mut hidden = Vec::with_capacity(self.num_layers);
        let mut width = self.input_dim;
        for _ in 0..self.num_layers {
            hidden.push(LinearConfig::new(width, self.hidden_size).init(device));
            width = self.hidden_size;
        }
        ForwardModel {
            hidden,
            output: LinearConfig::new(width, 2).init(device),
            activation: Ignored(self.activation),
            min_logstd: self.min_std.ln(),
            max_logstd: self.max_std.ln(),
        }
    }
}

/// Smooth `ln(1 + exp(x))`, stable for large |x|.
fn softplus<B: Backend>(x: Tensor<B, 1>) -> Tensor<B, 1> {
    activation::relu(x.clone()) + x.abs().neg().exp().add_scalar(1.0).log()
}

impl<B: Backend> ForwardModel<B> {
    /// Forward pass returning `(mean, logstd)`, each of shape `(batch,)`.
    pub fn forward(&self, x: Tensor<B, 2>) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let mut h = x;
        for layer in &self.hidden {
            h = self.activation.0.apply(layer.forward(h));
        }
        let out = self.output.forward(h);
        let [batch, _] = out.dims();

        let mean: Tensor<B, 1> = out.clone().slice([0..batch, 0..1]).squeeze::<1>(1);
        let raw: Tensor<B, 1> = out.slice([0..batch, 1..2]).squeeze::<1>(1);

        // Soft clamp into (min_logstd, max_logstd)
        let logstd = softplus(raw.neg().add_scalar(self.max_logstd))
            .neg()
            .add_scalar(self.max_logstd);
        let logstd = softplus(logstd.sub_scalar(self.min_logstd)).add_scalar(self.min_logstd);
        (mean, logstd)
    }

    /// Predicted mean score, the differentiable objective used by search.
    pub fn mean(&self, x: Tensor<B, 2>) -> Tensor<B, 1> {
        self.forward(x).0
    }

    pub fn predict(&self, x: Tensor<B, 2>) -> Prediction<B> {
        let (mean, logstd) = self.forward(x);
        Prediction {
            mean,
            std: logstd.exp(),
        }
    }
}
