//! Supervised losses for the forward model.
//!
//! Both functions are generic over `B: Backend` and return a scalar tensor of
//! shape `(1,)`.

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::forward_model::Prediction;

/// Which supervised objective the primary loss uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisedLoss {
    /// Gaussian negative log-likelihood of the label under the prediction.
    Nll,
    /// Mean squared error of the predicted mean.
    Mse,
}

impl fmt::Display for SupervisedLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nll => write!(f, "nll"),
            Self::Mse => write!(f, "mse"),
        }
    }
}

const HALF_LN_TWO_PI: f64 = 0.918_938_533_204_672_7;

/// Mean Gaussian negative log-likelihood of `y` under `pred`.
pub fn gaussian_nll<B: Backend>(pred: Prediction<B>, y: Tensor<B, 1>) -> Tensor<B, 1> {
    let z = (y - pred.mean) / pred.std.clone();
    (z.powf_scalar(2.0).mul_scalar(0.5) + pred.std.log())
        .add_scalar(HALF_LN_TWO_PI)
        .mean()
}

/// Mean squared error between the predicted mean and `y`.
pub fn mse<B: Backend>(mean: Tensor<B, 1>, y: Tensor<B, 1>) -> Tensor<B, 1> {
    (mean - y).powf_scalar(2.0).mean()
}

/// Dispatch on [`SupervisedLoss`].
pub fn supervised_loss<B: Backend>(
    kind: SupervisedLoss,
    pred: Prediction<B>,
    y: Tensor<B, 1>,
) -> Tensor<B, 1> {
    match kind {
        SupervisedLoss::Nll => gaussian_nll(pred, y),
        SupervisedLoss::Mse => mse(pred.mean, y),
    }
}
