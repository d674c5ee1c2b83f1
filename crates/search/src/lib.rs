//! Gradient-ascent design search through conservative surrogates.
//!
//! Two drivers share the same candidate bookkeeping:
//!
//! - [`OnlineSearch`] trains one conservative surrogate and, every few
//!   minibatches, moves a fixed batch of candidates up its gradient. The
//!   candidates double as extra negatives for the conservatism penalty.
//! - [`EnsembleAscent`] ascends a pre-trained ensemble, one uniformly chosen
//!   member per step, querying the oracle after every step.
//!
//! Both work on normalized data through a [`Problem`] and hand the oracle
//! raw designs.
//!
//! # Key types
//!
//! - [`Problem`]: task plus fixed normalization statistics
//! - [`SearchState`]: relaxed candidates, done mask, per-row step counts
//! - [`SearchOutcome`]: best design, per-evaluation scores and trajectory records
//! - [`OnlineConfig`] / [`AscentConfig`]: configuration loaded from TOML

pub mod ascent;
pub mod config;
pub mod engine;
pub mod mocks;
pub mod problem;
pub mod state;

pub use ascent::EnsembleAscent;
pub use config::{AscentConfig, MemberSelection, OnlineConfig};
pub use engine::{OnlineSearch, SearchError, SearchOutcome};
pub use problem::Problem;
pub use state::{row_distances, BestDesign, BestTracker, SearchState};
