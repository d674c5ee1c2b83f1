//! Per-step training metrics and running aggregates.

use ordered_float::OrderedFloat;

/// Ordinal ranks of `values`: ties keep their original index order.
fn ordinal_ranks(values: &[f32]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    // sort_by_key is stable
    order.sort_by_key(|&i| OrderedFloat(values[i]));
    let mut ranks = vec![0.0; values.len()];
    for (rank, &i) in order.iter().enumerate() {
        ranks[i] = rank as f64;
    }
    ranks
}

/// Spearman rank correlation between `a` and `b`.
///
/// Returns 0.0 when fewer than two pairs are given or either side has
/// zero rank variance.
pub fn spearman(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let ra = ordinal_ranks(&a[..n]);
    let rb = ordinal_ranks(&b[..n]);
    let mean = (n - 1) as f64 / 2.0;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in ra.iter().zip(&rb) {
        cov += (x - mean) * (y - mean);
        var_a += (x - mean).powi(2);
        var_b += (y - mean).powi(2);
    }
    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    cov / (var_a * var_b).sqrt()
}

/// Metrics of one train or validation step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepMetrics {
    /// Primary supervised loss.
    pub loss: f64,
    /// Spearman correlation between predicted means and labels.
    pub rank_correlation: f64,
    /// Conservatism gap: mean prediction on perturbed minus on clean inputs.
    pub gap: f64,
    /// Lagrange multiplier value used in this step.
    pub alpha: f64,
    pub multiplier_loss: f64,
}

impl StepMetrics {
    /// Warnings for degenerate training signals.
    pub fn health_check(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.rank_correlation < 0.0 {
            warnings.push(format!(
                "negative rank correlation ({:.3}): model ranks designs backwards",
                self.rank_correlation
            ));
        }
        if self.alpha > 1e3 {
            warnings.push(format!(
                "alpha={:.1} is very large: conservatism target may be unreachable",
                self.alpha
            ));
        }
        warnings
    }
}

/// Running average over a sequence of [`StepMetrics`].
#[derive(Debug, Clone, Default)]
pub struct RunningAvg {
    sum: StepMetrics,
    count: usize,
}

impl RunningAvg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, m: &StepMetrics) {
        self.sum.loss += m.loss;
        self.sum.rank_correlation += m.rank_correlation;
        self.sum.gap += m.gap;
        self.sum.alpha += m.alpha;
        self.sum.multiplier_loss += m.multiplier_loss;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn average(&self) -> Option<StepMetrics> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(StepMetrics {
            loss: self.sum.loss / n,
            rank_correlation: self.sum.rank_correlation / n,
            gap: self.sum.gap / n,
            alpha: self.sum.alpha / n,
            multiplier_loss: self.sum.multiplier_loss / n,
        })
    }

    pub fn display(&self) -> String {
        match self.average() {
            Some(m) => format!(
                "loss={:.4} rank={:.3} gap={:.3} alpha={:.3}",
                m.loss, m.rank_correlation, m.gap, m.alpha
            ),
            None => "no data".to_string(),
        }
    }
}

/// Train and validation aggregates for one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train: StepMetrics,
    pub val: StepMetrics,
}

/// History of per-epoch metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsHistory {
    entries: Vec<EpochMetrics>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: EpochMetrics) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[EpochMetrics] {
        &self.entries
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Epoch with the highest validation rank correlation.
    pub fn best_val_rank(&self) -> Option<&EpochMetrics> {
        self.entries
            .iter()
            .max_by_key(|e| OrderedFloat(e.val.rank_correlation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spearman_perfect() {
        let a = [0.1, 0.5, 0.2, 0.9, 0.3];
        let b = [1.0, 5.0, 2.0, 9.0, 3.0];
        assert!((spearman(&a, &b) - 1.0).abs() < 1e-12);
        let rev: Vec<f32> = b.iter().map(|v| -v).collect();
        assert!((spearman(&a, &rev) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_spearman_degenerate() {
        assert_eq!(spearman(&[1.0], &[2.0]), 0.0);
        assert_eq!(spearman(&[], &[]), 0.0);
    }

    #[test]
    fn test_ties_use_index_order() {
        assert_eq!(ordinal_ranks(&[2.0, 1.0, 2.0, 1.0]), vec![2.0, 0.0, 3.0, 1.0]);
        // Constant inputs still get distinct ordinal ranks
        assert!((spearman(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_running_avg() {
        let mut avg = RunningAvg::new();
        assert!(avg.average().is_none());
        assert_eq!(avg.display(), "no data");
        avg.update(&StepMetrics {
            loss: 1.0,
            gap: 2.0,
            ..Default::default()
        });
        avg.update(&StepMetrics {
            loss: 3.0,
            gap: -2.0,
            ..Default::default()
        });
        let m = avg.average().unwrap();
        assert_eq!(avg.count(), 2);
        assert!((m.loss - 2.0).abs() < 1e-12);
        assert!(m.gap.abs() < 1e-12);
    }

    #[test]
    fn test_health_check() {
        let ok = StepMetrics {
            rank_correlation: 0.8,
            alpha: 1.0,
            ..Default::default()
        };
        assert!(ok.health_check().is_empty());
        let bad = StepMetrics {
            rank_correlation: -0.2,
            alpha: 5e3,
            ..Default::default()
        };
        assert_eq!(bad.health_check().len(), 2);
    }

    #[test]
    fn test_history_best() {
        let mut h = MetricsHistory::new();
        for (epoch, rank) in [(0, 0.2), (1, 0.7), (2, 0.5)] {
            h.push(EpochMetrics {
                epoch,
                train: StepMetrics::default(),
                val: StepMetrics {
                    rank_correlation: rank,
                    ..Default::default()
                },
            });
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.best_val_rank().map(|e| e.epoch), Some(1));
        assert_eq!(h.last().map(|e| e.epoch), Some(2));
    }
}
