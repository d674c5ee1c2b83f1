//! Offline model-based optimization baselines.
//!
//! [`config`] loads the experiment TOML; [`pipeline`] wires tasks,
//! surrogates and solvers together for each CLI subcommand.

pub mod config;
pub mod pipeline;
