//! Run outputs for design search: metrics logging, Parquet search
//! trajectories, NumPy artifacts and JSON run summaries.

pub mod artifacts;
pub mod logger;
pub mod reader;
pub mod types;
pub mod writer;

pub use artifacts::ArtifactWriter;
pub use logger::{MemoryLogger, MetricsLogger, Percentiles, TeeLogger, TracingLogger};
pub use reader::{summarize, TrajectoryReader};
pub use types::{EvaluationStats, RunSummary, SearchRecord, TrajectorySummary, Variant};
pub use writer::TrajectoryWriter;
