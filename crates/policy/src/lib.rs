//! Policy-gradient design search.
//!
//! Instead of moving designs directly, [`Reinforce`] fits a parametric
//! sampling distribution (a per-position categorical for discrete tasks, a
//! diagonal Gaussian for continuous ones) and ascends its parameters with
//! the REINFORCE estimator on surrogate-predicted scores.
//!
//! # Key types
//!
//! - [`Marginal`]: sampling distribution with a differentiable log-density
//! - [`Reinforce`] / [`ReinforceConfig`]: the policy-gradient loop
//! - [`Renderer`]: receives the final best design

pub mod marginal;
pub mod reinforce;
pub mod render;

pub use marginal::{ContinuousMarginal, DiscreteMarginal, Marginal};
pub use reinforce::{standardize, PolicyError, Reinforce, ReinforceConfig};
pub use render::{JsonRenderer, NullRenderer, Renderer};
