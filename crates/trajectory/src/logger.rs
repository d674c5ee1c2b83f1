//! Scalar and distribution metrics logging.
//!
//! Trainers and search loops report named tensors (already moved to the
//! host) through [`MetricsLogger`]. Names are slash-separated paths such as
//! `oracle_0/train/gap` or `score/100th`.

use ordered_float::OrderedFloat;
use std::collections::BTreeMap;

/// Summary of a batch of values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Percentiles {
    pub mean: f32,
    pub std: f32,
    pub min: f32,
    pub p10: f32,
    pub p50: f32,
    pub p90: f32,
    pub max: f32,
}

impl Percentiles {
    /// Summarize `values`. Returns `None` for an empty slice.
    ///
    /// Percentiles use nearest-rank on the sorted values.
    pub fn compute(values: &[f32]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by_key(|&v| OrderedFloat(v));
        let n = sorted.len();
        let at = |q: f64| sorted[((q * (n - 1) as f64).round() as usize).min(n - 1)];

        let mean = sorted.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
        let var = sorted
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / n as f64;

        Some(Self {
            mean: mean as f32,
            std: var.sqrt() as f32,
            min: sorted[0],
            p10: at(0.1),
            p50: at(0.5),
            p90: at(0.9),
            max: sorted[n - 1],
        })
    }
}

/// Sink for named metric values.
pub trait MetricsLogger {
    /// Record `values` under `name` at `step`. With `percentile`, the
    /// distribution summary is logged instead of only the mean.
    fn record(&mut self, name: &str, values: &[f32], step: u64, percentile: bool);

    /// Convenience for a single scalar.
    fn scalar(&mut self, name: &str, value: f32, step: u64) {
        self.record(name, &[value], step, false);
    }
}

/// Emits metrics as structured `tracing` events.
#[derive(Debug, Default)]
pub struct TracingLogger;

impl MetricsLogger for TracingLogger {
    fn record(&mut self, name: &str, values: &[f32], step: u64, percentile: bool) {
        let Some(p) = Percentiles::compute(values) else {
            return;
        };
        if percentile && values.len() > 1 {
            tracing::info!(
                metric = name,
                step,
                mean = p.mean,
                std = p.std,
                p10 = p.p10,
                p50 = p.p50,
                p90 = p.p90,
                max = p.max,
                "metric"
            );
        } else {
            tracing::info!(metric = name, step, value = p.mean, "metric");
        }
    }
}

/// Keeps every recorded series in memory. Used by tests and by the CLI to
/// collect per-epoch history.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    series: BTreeMap<String, Vec<(u64, f32)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(step, mean)` pairs recorded under `name`, in insertion order.
    pub fn series(&self, name: &str) -> &[(u64, f32)] {
        self.series.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Most recent mean recorded under `name`.
    pub fn last(&self, name: &str) -> Option<f32> {
        self.series(name).last().map(|&(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }
}

impl MetricsLogger for MemoryLogger {
    fn record(&mut self, name: &str, values: &[f32], step: u64, percentile: bool) {
        let Some(p) = Percentiles::compute(values) else {
            return;
        };
        self.series
            .entry(name.to_string())
            .or_default()
            .push((step, p.mean));
        if percentile && values.len() > 1 {
            for (suffix, v) in [("p10", p.p10), ("p50", p.p50), ("p90", p.p90), ("max", p.max)] {
                self.series
                    .entry(format!("{name}/{suffix}"))
                    .or_default()
                    .push((step, v));
            }
        }
    }
}

/// Forwards to two loggers.
pub struct TeeLogger<'a> {
    pub first: &'a mut dyn MetricsLogger,
    pub second: &'a mut dyn MetricsLogger,
}

impl MetricsLogger for TeeLogger<'_> {
    fn record(&mut self, name: &str, values: &[f32], step: u64, percentile: bool) {
        self.first.record(name, values, step, percentile);
        self.second.record(name, values, step, percentile);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles() {
        let values: Vec<f32> = (0..=100).map(|i| i as f32).collect();
        let p = Percentiles::compute(&values).unwrap();
        assert_eq!(p.mean, 50.0);
        assert_eq!(p.min, 0.0);
        assert_eq!(p.p10, 10.0);
        assert_eq!(p.p50, 50.0);
        assert_eq!(p.p90, 90.0);
        assert_eq!(p.max, 100.0);
        assert!(Percentiles::compute(&[]).is_none());
    }

    #[test]
    fn test_memory_logger_series() {
        let mut logger = MemoryLogger::new();
        logger.scalar("train/loss", 2.0, 0);
        logger.scalar("train/loss", 1.0, 1);
        logger.record("score", &[1.0, 2.0, 3.0], 1, true);
        logger.record("empty", &[], 0, false);

        assert_eq!(logger.series("train/loss"), &[(0, 2.0), (1, 1.0)]);
        assert_eq!(logger.last("score"), Some(2.0));
        assert_eq!(logger.last("score/max"), Some(3.0));
        assert!(logger.series("empty").is_empty());
        assert!(logger.series("missing").is_empty());
    }

    #[test]
    fn test_tee_logger_forwards() {
        let mut a = MemoryLogger::new();
        let mut b = MemoryLogger::new();
        {
            let mut tee = TeeLogger {
                first: &mut a,
                second: &mut b,
            };
            tee.scalar("x", 1.0, 0);
        }
        assert_eq!(a.last("x"), Some(1.0));
        assert_eq!(b.last("x"), Some(1.0));
    }
}
