//! Surrogate model components: the probabilistic forward model and the
//! bridge between host rows and burn tensors.

pub mod bridge;
pub mod forward_model;
