//! Surrogate training: supervised losses, rank metrics, the conservative
//! trainer with its Lagrange multiplier, and checkpointing.

pub mod checkpoint;
pub mod loss;
pub mod metrics;
pub mod trainer;
