//! Static design-optimization tasks.
//!
//! Provides the dataset container shared by every baseline, the [`Task`]
//! oracle trait, normalization statistics, discrete encodings, and the
//! shuffled (optionally bootstrapped) minibatch pipeline used for training
//! surrogates.
//!
//! # Key types
//!
//! - [`Dataset`]: designs `x` (one flattened row per design) and labels `y`
//! - [`Task`]: oracle interface: input shape, discreteness, `score()`
//! - [`NormalizationStats`]: per-feature mean/std fitted once per run
//! - [`TaskRegistry`]: builds tasks by name, failing fast on unknown keys

pub mod data;
pub mod encoding;
pub mod normalize;
pub mod registry;
pub mod synthetic;
pub mod types;

pub use data::{build_pipeline, Batch, Pipeline};
pub use encoding::{map_to_integers, one_hot, top_k_indices};
pub use normalize::NormalizationStats;
pub use registry::{Difficulty, TaskKwargs, TaskRegistry};
pub use synthetic::{CategoryCountTask, QuadraticTask};
pub use types::{Dataset, DesignShape, Task, TaskError};
