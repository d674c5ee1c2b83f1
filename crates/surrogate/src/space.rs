//! Design spaces and the continuous relaxation of discrete designs.
//!
//! Search and perturbation always run in the *relaxed* space. For continuous
//! designs that is the (normalized) design itself. For discrete designs each
//! position's probability simplex is mapped to unconstrained logits and
//! materialized back through a softmax, so gradients reach the logits.

use burn::prelude::*;
use burn::tensor::activation::softmax;
use serde::{Deserialize, Serialize};
use task::DesignShape;

/// Unconstrained parameterization of a probability simplex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relaxation {
    /// `z = ln p`, `C` logits per position.
    LogProbs,
    /// `z = ln p[1:] - ln p[0]`, `C - 1` logits per position relative to
    /// category 0.
    LogOdds,
}

/// Default mixing weight of the smoothing applied before taking logs.
pub const DEFAULT_DISCRETE_CLIP: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DesignSpace {
    Continuous {
        dim: usize,
    },
    Discrete {
        length: usize,
        categories: usize,
        relaxation: Relaxation,
        /// Simplices are smoothed as `clip * p + (1 - clip) / C` before
        /// taking logs, keeping one-hot rows finite.
        clip: f32,
    },
}

impl DesignSpace {
    pub fn new(shape: DesignShape, relaxation: Relaxation, clip: f32) -> Self {
        match shape {
            DesignShape::Continuous { dim } => Self::Continuous { dim },
            DesignShape::Discrete { length, categories } => Self::Discrete {
                length,
                categories,
                relaxation,
                clip,
            },
        }
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::Discrete { .. })
    }

    /// Width of a materialized design row.
    pub fn design_dim(&self) -> usize {
        match *self {
            Self::Continuous { dim } => dim,
            Self::Discrete { length, categories, .. } => length * categories,
        }
    }

    /// Width of a relaxed row.
    pub fn relaxed_dim(&self) -> usize {
        match *self {
            Self::Continuous { dim } => dim,
            Self::Discrete {
                length,
                categories,
                relaxation: Relaxation::LogProbs,
                ..
            } => length * categories,
            Self::Discrete {
                length,
                categories,
                relaxation: Relaxation::LogOdds,
                ..
            } => length * (categories - 1),
        }
    }

    /// Map materialized designs `(n, design_dim)` into the relaxed space.
    pub fn to_relaxed<B: Backend>(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let Self::Discrete {
            length,
            categories,
            relaxation,
            clip,
        } = *self
        else {
            return x;
        };
        let [n, _] = x.dims();
        let logp = x
            .mul_scalar(clip)
            .add_scalar((1.0 - clip) / categories as f32)
            .log();
        match relaxation {
            Relaxation::LogProbs => logp,
            Relaxation::LogOdds => {
                let logp = logp.reshape([n, length, categories]);
                let reference = logp.clone().slice([0..n, 0..length, 0..1]);
                let rest = logp.slice([0..n, 0..length, 1..categories]);
                (rest - reference).reshape([n, length * (categories - 1)])
            }
        }
    }

    /// Map relaxed rows `(n, relaxed_dim)` back to designs. Discrete rows
    /// come out as per-position probability simplices.
    pub fn materialize<B: Backend>(&self, z: Tensor<B, 2>) -> Tensor<B, 2> {
        let Self::Discrete {
            length,
            categories,
            relaxation,
            ..
        } = *self
        else {
            return z;
        };
        let [n, _] = z.dims();
        let logits = match relaxation {
            Relaxation::LogProbs => z.reshape([n, length, categories]),
            Relaxation::LogOdds => {
                let z = z.reshape([n, length, categories - 1]);
                let reference = Tensor::zeros([n, length, 1], &z.device());
                Tensor::cat(vec![reference, z], 2)
            }
        };
        softmax(logits, 2).reshape([n, length * categories])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::TensorData;
    use task::{map_to_integers, one_hot};

    type TestBackend = NdArray<f32>;

    fn discrete(relaxation: Relaxation) -> DesignSpace {
        DesignSpace::new(
            DesignShape::Discrete {
                length: 5,
                categories: 4,
            },
            relaxation,
            DEFAULT_DISCRETE_CLIP,
        )
    }

    fn rows(x: Tensor<TestBackend, 2>) -> Vec<Vec<f32>> {
        crate::model::bridge::tensor_to_rows(x)
    }

    #[test]
    fn test_relaxed_dims() {
        assert_eq!(discrete(Relaxation::LogProbs).relaxed_dim(), 20);
        assert_eq!(discrete(Relaxation::LogOdds).relaxed_dim(), 15);
        assert_eq!(discrete(Relaxation::LogOdds).design_dim(), 20);
        let cont = DesignSpace::new(DesignShape::Continuous { dim: 7 }, Relaxation::LogOdds, 0.6);
        assert_eq!(cont.relaxed_dim(), 7);
        assert!(!cont.is_discrete());
    }

    #[test]
    fn test_argmax_survives_relaxation() {
        let device = Default::default();
        let cats = vec![vec![0, 3, 1, 2, 3], vec![2, 2, 0, 1, 0]];
        let designs: Vec<Vec<f32>> = cats.iter().map(|c| one_hot(c, 4)).collect();
        let flat: Vec<f32> = designs.concat();

        for relaxation in [Relaxation::LogProbs, Relaxation::LogOdds] {
            let space = discrete(relaxation);
            let x = Tensor::<TestBackend, 2>::from_data(TensorData::new(flat.clone(), [2, 20]), &device);
            let back = rows(space.materialize(space.to_relaxed(x)));
            for (row, expected) in back.iter().zip(&cats) {
                assert_eq!(&map_to_integers(row, 4), expected);
                for probs in row.chunks(4) {
                    assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_smoothing_values() {
        let device = Default::default();
        let space = discrete(Relaxation::LogProbs);
        let x = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(one_hot(&[1, 1, 1, 1, 1], 4), [1, 20]),
            &device,
        );
        let back = rows(space.materialize(space.to_relaxed(x)));
        // clip 0.6 over 4 classes: 0.6 + 0.1 on the hot entry, 0.1 elsewhere
        assert!((back[0][1] - 0.7).abs() < 1e-5);
        assert!((back[0][0] - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_continuous_is_identity() {
        let device = Default::default();
        let space = DesignSpace::Continuous { dim: 3 };
        let x = Tensor::<TestBackend, 2>::from_data(TensorData::from([[1.0_f32, -2.0, 3.5]]), &device);
        assert_eq!(rows(space.materialize(space.to_relaxed(x))), vec![vec![1.0, -2.0, 3.5]]);
    }
}
