//! Integration tests for the trajectory crate: a simulated search run that
//! logs metrics, writes a Parquet trajectory, `.npy` artifacts and a JSON
//! summary, then reads everything back.

use tempfile::TempDir;

use trajectory::{
    ArtifactWriter, MemoryLogger, MetricsLogger, RunSummary, SearchRecord, TrajectoryReader,
    TrajectoryWriter, Variant,
};

/// Candidates climb toward score 0 over evaluations.
fn simulated_records(evaluations: u32, candidates: u32) -> Vec<SearchRecord> {
    let mut records = Vec::new();
    for e in 0..evaluations {
        for c in 0..candidates {
            let score = -((evaluations - e) as f64) - c as f64 * 0.1;
            records.push(SearchRecord {
                variant: Variant::Online,
                evaluation: e,
                step: e as u64 * 5,
                candidate: c,
                prediction: score + 0.5,
                score: Some(score),
                distance: e as f64 * 0.2,
                grad_norm: 1.0 / (e as f64 + 1.0),
                done: e + 1 == evaluations,
            });
        }
    }
    records
}

#[test]
fn test_full_run_outputs() {
    let tmp = TempDir::new().unwrap();
    let run_dir = tmp.path().join("run");
    let artifacts = ArtifactWriter::new(&run_dir).unwrap();

    let records = simulated_records(6, 4);
    let mut logger = MemoryLogger::new();
    for e in 0..6u32 {
        let scores: Vec<f32> = records
            .iter()
            .filter(|r| r.evaluation == e)
            .filter_map(|r| r.score.map(|s| s as f32))
            .collect();
        logger.record("score", &scores, e as u64, true);
    }
    let means: Vec<f32> = logger.series("score").iter().map(|&(_, v)| v).collect();
    assert!(means.windows(2).all(|w| w[1] > w[0]));

    let mut writer = TrajectoryWriter::new(run_dir.join("trajectory.parquet"));
    writer.record_all(records.clone());
    let path = writer.finish().unwrap();

    let summary = TrajectoryReader::read_summary(&path).unwrap();
    assert_eq!(summary.total_records, 24);
    assert_eq!(summary.evaluations, 6);
    assert_eq!(summary.best_score, Some(-1.0));
    let last = summary.per_evaluation.last().unwrap();
    assert_eq!(last.step, 25);
    assert_eq!(last.count, 4);

    let final_rows: Vec<Vec<f32>> = (0..4).map(|c| vec![c as f32; 3]).collect();
    artifacts.save_designs("solution", &final_rows, &[3]).unwrap();
    artifacts
        .save_vector("score", &[summary.best_score.unwrap() as f32])
        .unwrap();
    let (shape, _) = artifacts.load("solution").unwrap();
    assert_eq!(shape, vec![4, 3]);

    let run = RunSummary {
        variant: Variant::Online,
        task: "Quadratic-v0".into(),
        seed: 0,
        best_score: summary.best_score.unwrap(),
        best_design: vec![0.0; 3],
        dataset_max: -3.0,
        oracle_evaluations: 6,
        solver_steps: 25,
        wall_time_ms: 10,
    };
    run.write_json(&run_dir.join("summary.json")).unwrap();
    let back = RunSummary::from_json(&run_dir.join("summary.json")).unwrap();
    assert_eq!(back.improvement(), 2.0);
}

#[test]
fn test_read_missing_file_errors() {
    let result = TrajectoryReader::read_all(std::path::Path::new("/nonexistent/t.parquet"));
    assert!(result.is_err());
}

#[test]
fn test_variants_survive_parquet() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("mixed.parquet");
    let mut writer = TrajectoryWriter::new(path.clone());
    for (i, variant) in [Variant::Online, Variant::Ascent, Variant::Reinforce]
        .into_iter()
        .enumerate()
    {
        let mut r = simulated_records(1, 1).remove(0);
        r.variant = variant;
        r.candidate = i as u32;
        writer.record(r);
    }
    writer.finish().unwrap();

    let records = TrajectoryReader::read_all(&path).unwrap();
    assert_eq!(records[0].variant, Variant::Online);
    assert_eq!(records[1].variant, Variant::Ascent);
    assert_eq!(records[2].variant, Variant::Reinforce);
}
