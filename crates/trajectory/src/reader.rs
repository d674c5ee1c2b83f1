//! Reads SearchRecords from Parquet files.

use crate::types::{EvaluationStats, SearchRecord, TrajectorySummary, Variant};
use arrow::array::*;
use arrow::record_batch::RecordBatch;
use ordered_float::OrderedFloat;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::collections::BTreeMap;
use std::path::Path;

/// Static methods for reading trajectory data from Parquet files.
pub struct TrajectoryReader;

impl TrajectoryReader {
    /// Read all search records from a Parquet file.
    pub fn read_all(path: &Path) -> anyhow::Result<Vec<SearchRecord>> {
        let file = std::fs::File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut records = Vec::new();
        for batch_result in reader {
            let batch = batch_result?;
            let mut batch_records = extract_records_from_batch(&batch)?;
            records.append(&mut batch_records);
        }

        tracing::debug!(
            count = records.len(),
            path = %path.display(),
            "Read trajectory records"
        );

        Ok(records)
    }

    /// Read only the records of one oracle evaluation.
    pub fn read_evaluation(path: &Path, evaluation: u32) -> anyhow::Result<Vec<SearchRecord>> {
        let records = Self::read_all(path)?;
        Ok(records
            .into_iter()
            .filter(|r| r.evaluation == evaluation)
            .collect())
    }

    /// Compute summary statistics from a trajectory Parquet file.
    pub fn read_summary(path: &Path) -> anyhow::Result<TrajectorySummary> {
        let records = Self::read_all(path)?;
        Ok(summarize(&records))
    }
}

/// Group records by evaluation and compute score statistics.
pub fn summarize(records: &[SearchRecord]) -> TrajectorySummary {
    let mut groups: BTreeMap<u32, Vec<&SearchRecord>> = BTreeMap::new();
    for r in records {
        groups.entry(r.evaluation).or_default().push(r);
    }

    let per_evaluation: Vec<EvaluationStats> = groups
        .into_iter()
        .map(|(evaluation, rows)| {
            let mut scores: Vec<f64> = rows.iter().filter_map(|r| r.score).collect();
            scores.sort_by_key(|&s| OrderedFloat(s));
            let count = scores.len();
            let (mean, median, max) = if count == 0 {
                (f64::NAN, f64::NAN, f64::NAN)
            } else {
                let mean = scores.iter().sum::<f64>() / count as f64;
                let median = if count % 2 == 0 {
                    (scores[count / 2 - 1] + scores[count / 2]) / 2.0
                } else {
                    scores[count / 2]
                };
                (mean, median, scores[count - 1])
            };
            let mean_prediction =
                rows.iter().map(|r| r.prediction).sum::<f64>() / rows.len() as f64;
            EvaluationStats {
                evaluation,
                step: rows.iter().map(|r| r.step).max().unwrap_or(0),
                count,
                mean,
                median,
                max,
                mean_prediction,
            }
        })
        .collect();

    let scored: Vec<f64> = records.iter().filter_map(|r| r.score).collect();
    TrajectorySummary {
        total_records: records.len(),
        evaluations: per_evaluation.len(),
        scored_records: scored.len(),
        best_score: scored.into_iter().max_by_key(|&s| OrderedFloat(s)),
        per_evaluation,
    }
}

/// Extract search records from a single Arrow RecordBatch.
fn extract_records_from_batch(batch: &RecordBatch) -> anyhow::Result<Vec<SearchRecord>> {
    let variants = batch
        .column(0)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow::anyhow!("Column 0 (variant) is not StringArray"))?;

    let evaluations = batch
        .column(1)
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| anyhow::anyhow!("Column 1 (evaluation) is not UInt32Array"))?;

    let steps = batch
        .column(2)
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| anyhow::anyhow!("Column 2 (step) is not UInt64Array"))?;

    let candidates = batch
        .column(3)
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| anyhow::anyhow!("Column 3 (candidate) is not UInt32Array"))?;

    let predictions = batch
        .column(4)
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| anyhow::anyhow!("Column 4 (prediction) is not Float64Array"))?;

    let scores = batch
        .column(5)
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| anyhow::anyhow!("Column 5 (score) is not Float64Array"))?;

    let distances = batch
        .column(6)
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| anyhow::anyhow!("Column 6 (distance) is not Float64Array"))?;

    let grad_norms = batch
        .column(7)
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| anyhow::anyhow!("Column 7 (grad_norm) is not Float64Array"))?;

    let done = batch
        .column(8)
        .as_any()
        .downcast_ref::<BooleanArray>()
        .ok_or_else(|| anyhow::anyhow!("Column 8 (done) is not BooleanArray"))?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let variant = Variant::parse(variants.value(i))
            .ok_or_else(|| anyhow::anyhow!("Unknown variant '{}' in row {i}", variants.value(i)))?;
        let score = if scores.is_null(i) {
            None
        } else {
            Some(scores.value(i))
        };

        records.push(SearchRecord {
            variant,
            evaluation: evaluations.value(i),
            step: steps.value(i),
            candidate: candidates.value(i),
            prediction: predictions.value(i),
            score,
            distance: distances.value(i),
            grad_norm: grad_norms.value(i),
            done: done.value(i),
        });
    }

    Ok(records)
}
