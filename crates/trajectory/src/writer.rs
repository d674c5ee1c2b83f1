//! Writes SearchRecords to Parquet files using Arrow.

use crate::types::SearchRecord;
use arrow::array::*;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use std::path::PathBuf;
use std::sync::Arc;

/// Arrow schema for trajectory Parquet files (9 columns).
pub fn trajectory_schema() -> Schema {
    Schema::new(vec![
        Field::new("variant", DataType::Utf8, false),
        Field::new("evaluation", DataType::UInt32, false),
        Field::new("step", DataType::UInt64, false),
        Field::new("candidate", DataType::UInt32, false),
        Field::new("prediction", DataType::Float64, false),
        Field::new("score", DataType::Float64, true),
        Field::new("distance", DataType::Float64, false),
        Field::new("grad_norm", DataType::Float64, false),
        Field::new("done", DataType::Boolean, false),
    ])
}

/// Buffers search records and writes them to a Parquet file.
pub struct TrajectoryWriter {
    records: Vec<SearchRecord>,
    output_path: PathBuf,
}

impl TrajectoryWriter {
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            records: Vec::new(),
            output_path,
        }
    }

    pub fn record(&mut self, record: SearchRecord) {
        self.records.push(record);
    }

    pub fn record_all(&mut self, records: Vec<SearchRecord>) {
        self.records.extend(records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write all buffered records to the Parquet file and return the output path.
    pub fn finish(self) -> anyhow::Result<PathBuf> {
        let schema = Arc::new(trajectory_schema());

        let batch = if self.records.is_empty() {
            RecordBatch::new_empty(schema.clone())
        } else {
            build_record_batch(&self.records)?
        };

        let file = std::fs::File::create(&self.output_path)?;
        let mut writer = ArrowWriter::try_new(file, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;

        tracing::info!(
            records = self.records.len(),
            path = %self.output_path.display(),
            "Wrote trajectory Parquet file"
        );

        Ok(self.output_path)
    }
}

fn build_record_batch(records: &[SearchRecord]) -> anyhow::Result<RecordBatch> {
    let schema = Arc::new(trajectory_schema());

    let variants: StringArray = records.iter().map(|r| Some(r.variant.to_string())).collect();
    let evaluations: UInt32Array = records.iter().map(|r| Some(r.evaluation)).collect();
    let steps: UInt64Array = records.iter().map(|r| Some(r.step)).collect();
    let candidates: UInt32Array = records.iter().map(|r| Some(r.candidate)).collect();
    let predictions: Float64Array = records.iter().map(|r| Some(r.prediction)).collect();

    let mut scores_builder = Float64Builder::new();
    for r in records {
        match r.score {
            Some(v) => scores_builder.append_value(v),
            None => scores_builder.append_null(),
        }
    }
    let scores = scores_builder.finish();

    let distances: Float64Array = records.iter().map(|r| Some(r.distance)).collect();
    let grad_norms: Float64Array = records.iter().map(|r| Some(r.grad_norm)).collect();
    let done: BooleanArray = records.iter().map(|r| Some(r.done)).collect();

    let columns: Vec<Arc<dyn arrow::array::Array>> = vec![
        Arc::new(variants),
        Arc::new(evaluations),
        Arc::new(steps),
        Arc::new(candidates),
        Arc::new(predictions),
        Arc::new(scores),
        Arc::new(distances),
        Arc::new(grad_norms),
        Arc::new(done),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}
