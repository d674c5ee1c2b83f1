//! Run drivers behind the CLI subcommands.
//!
//! Every run validates its config, seeds the backend and the shared
//! generator, builds the task, then writes its outputs into `logging_dir`:
//! the effective `config.toml`, checkpoints, `.npy` artifacts (the best
//! design and its 0-d `score`, plus per-evaluation `scores`, `predictions`
//! and the final `candidates`), `metrics.json`, `trajectory.parquet` and
//! `summary.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::prelude::Backend;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;

use policy::{JsonRenderer, Reinforce};
use search::{EnsembleAscent, OnlineSearch, Problem, SearchOutcome};
use surrogate::{CheckpointManager, Checkpointable, ConservativeTrainer, Ensemble};
use task::{build_pipeline, Task, TaskRegistry};
use trajectory::{
    ArtifactWriter, MemoryLogger, MetricsLogger, RunSummary, TeeLogger, TracingLogger,
    TrajectoryReader, TrajectoryWriter, Variant,
};

use crate::config::ExperimentConfig;

type TrainBackend = Autodiff<NdArray<f32>>;

/// Arguments for the `summary` subcommand.
#[derive(Debug)]
pub struct SummaryArgs {
    /// Path to the trajectory Parquet file.
    pub input: PathBuf,
    /// Print JSON instead of a table.
    pub json: bool,
}

/// Validate, seed, persist the effective config and build the task.
fn prepare(cfg: &ExperimentConfig) -> anyhow::Result<(Box<dyn Task>, StdRng)> {
    cfg.validate()?;
    std::fs::create_dir_all(&cfg.logging_dir)
        .with_context(|| format!("Failed to create {}", cfg.logging_dir.display()))?;
    std::fs::write(cfg.logging_dir.join("config.toml"), toml::to_string_pretty(cfg)?)?;

    TrainBackend::seed(cfg.seed);
    let task = TaskRegistry::build(&cfg.task.name, &cfg.task.kwargs)?;
    Ok((task, StdRng::seed_from_u64(cfg.seed)))
}

fn epoch_bar(len: u64, what: &str) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("=> "),
    );
    pb.set_message(what.to_string());
    Ok(pb)
}

/// Train (or resume) the ensemble one epoch at a time, checkpointing after
/// every epoch under `logging_dir/ensemble`.
fn train_ensemble(
    cfg: &ExperimentConfig,
    problem: &Problem,
    rng: &mut StdRng,
    logger: &mut dyn MetricsLogger,
) -> anyhow::Result<Ensemble<TrainBackend>> {
    let pipeline = build_pipeline(
        problem.dataset(),
        cfg.ensemble.batch_size,
        cfg.ensemble.val_size,
        cfg.ensemble.bootstraps,
        rng,
    )?;
    let mut ensemble = Ensemble::<TrainBackend>::new(
        cfg.ensemble.size,
        &cfg.model_config(),
        &cfg.trainer_config(),
        cfg.design_space(problem.shape()),
        &Default::default(),
    );

    let manager = CheckpointManager::new(cfg.logging_dir.join("ensemble"));
    if ensemble.restore_or_initialize(&manager)? {
        tracing::info!(
            epoch = ensemble.member(0).epoch(),
            dir = %manager.dir().display(),
            "Resumed ensemble from checkpoint"
        );
    }

    let remaining = cfg.ensemble.epochs.saturating_sub(ensemble.member(0).epoch());
    let pb = epoch_bar(remaining as u64, "ensemble")?;
    for _ in 0..remaining {
        ensemble.fit(&pipeline, 1, rng, logger)?;
        manager.save(&ensemble.export_state()?)?;
        pb.inc(1);
    }
    pb.finish_with_message("ensemble trained");
    Ok(ensemble)
}

/// Resume the online trainer from this run's own checkpoint, or else from
/// `online.pretrained` when one is configured.
fn restore_online_trainer(
    cfg: &ExperimentConfig,
    trainer: &mut ConservativeTrainer<TrainBackend>,
    own: &CheckpointManager,
) -> anyhow::Result<()> {
    if trainer.restore_or_initialize(own)? {
        tracing::info!(step = trainer.step(), dir = %own.dir().display(), "Resumed online trainer");
        return Ok(());
    }
    if let Some(dir) = &cfg.online.pretrained {
        let pretrained = CheckpointManager::new(dir);
        anyhow::ensure!(
            trainer.restore_or_initialize(&pretrained)?,
            "No usable checkpoint in online.pretrained = {}",
            dir.display()
        );
        tracing::info!(step = trainer.step(), dir = %dir.display(), "Loaded pretrained surrogate");
    }
    Ok(())
}

/// Save equally long rows as a 2-D array.
fn save_matrix(artifacts: &ArtifactWriter, name: &str, rows: &[Vec<f32>]) -> anyhow::Result<()> {
    let cols = rows.first().map_or(0, Vec::len);
    artifacts.save_designs(name, rows, &[cols])?;
    Ok(())
}

fn write_metrics(memory: &MemoryLogger, path: &Path) -> anyhow::Result<()> {
    let series: BTreeMap<&str, &[(u64, f32)]> =
        memory.names().map(|name| (name, memory.series(name))).collect();
    std::fs::write(path, serde_json::to_string_pretty(&series)?)?;
    Ok(())
}

/// Write the trajectory, metrics, terminal artifacts and summary shared by
/// every variant.
///
/// The terminal artifacts are the best oracle-scored design, saved as
/// `<design_name>.npy` with the task's input shape, and its score as a 0-d
/// `score.npy`.
fn finish(
    cfg: &ExperimentConfig,
    variant: Variant,
    problem: &Problem,
    outcome: SearchOutcome,
    memory: &MemoryLogger,
    start: Instant,
    design_name: &str,
) -> anyhow::Result<RunSummary> {
    let mut writer = TrajectoryWriter::new(cfg.logging_dir.join("trajectory.parquet"));
    let record_count = outcome.records.len();
    writer.record_all(outcome.records);
    let trajectory = writer.finish()?;
    write_metrics(memory, &cfg.logging_dir.join("metrics.json"))?;

    let best = outcome
        .best
        .context("Run finished without querying the oracle; check solver_warmup and epochs")?;
    let artifacts = ArtifactWriter::new(&cfg.logging_dir)?;
    artifacts.save_scalar("score", best.score)?;
    artifacts.save(design_name, &problem.shape().input_shape(), &best.design)?;

    let summary = RunSummary {
        variant,
        task: cfg.task.name.clone(),
        seed: cfg.seed,
        best_score: best.score as f64,
        best_design: best.design,
        dataset_max: problem.dataset_max(),
        oracle_evaluations: outcome.oracle_calls,
        solver_steps: outcome.solver_steps,
        wall_time_ms: start.elapsed().as_millis() as u64,
    };
    summary.write_json(&cfg.logging_dir.join("summary.json"))?;

    println!("\n--- {variant} Summary ---");
    println!("Task: {}", summary.task);
    println!("Best score: {:.4}", summary.best_score);
    println!("Dataset max: {:.4}", summary.dataset_max);
    println!("Improvement: {:+.4}", summary.improvement());
    println!("Oracle evaluations: {}", summary.oracle_evaluations);
    println!("Records: {record_count}");
    println!("Trajectory: {}", trajectory.display());
    println!("Elapsed: {:.1}s", start.elapsed().as_secs_f64());
    Ok(summary)
}

/// Online conservative search: one surrogate trained while candidates
/// ascend it.
pub fn run_online(cfg: &ExperimentConfig) -> anyhow::Result<RunSummary> {
    let start = Instant::now();
    let (task, mut rng) = prepare(cfg)?;
    let problem = Problem::new(task.as_ref(), cfg.task.normalize_xs, cfg.task.normalize_ys)?;
    let mut pipeline = build_pipeline(
        problem.dataset(),
        cfg.ensemble.batch_size,
        cfg.ensemble.val_size,
        0,
        &mut rng,
    )?;
    let mut trainer = ConservativeTrainer::<TrainBackend>::new(
        &cfg.model_config(),
        &cfg.trainer_config(),
        cfg.design_space(problem.shape()),
        &Default::default(),
    );

    let manager = CheckpointManager::new(cfg.logging_dir.join("online"));
    restore_online_trainer(cfg, &mut trainer, &manager)?;

    let mut tracing_logger = TracingLogger;
    let mut memory = MemoryLogger::new();
    let outcome = {
        let mut logger = TeeLogger {
            first: &mut tracing_logger,
            second: &mut memory,
        };
        OnlineSearch::new(cfg.online.clone())?.run(
            &problem,
            &mut trainer,
            &mut pipeline,
            &mut rng,
            &mut logger,
        )?
    };

    manager.save(&trainer.export_state()?)?;
    let artifacts = ArtifactWriter::new(&cfg.logging_dir)?;
    save_matrix(&artifacts, "scores", &outcome.scores)?;
    save_matrix(&artifacts, "predictions", &outcome.predictions)?;
    artifacts.save_designs("candidates", &outcome.final_designs, &task.input_shape())?;

    finish(cfg, Variant::Online, &problem, outcome, &memory, start, "solution")
}

/// Offline gradient ascent through a trained ensemble.
pub fn run_ascent(cfg: &ExperimentConfig) -> anyhow::Result<RunSummary> {
    let start = Instant::now();
    let (task, mut rng) = prepare(cfg)?;
    let problem = Problem::new(task.as_ref(), cfg.task.normalize_xs, cfg.task.normalize_ys)?;

    let mut tracing_logger = TracingLogger;
    let mut memory = MemoryLogger::new();
    let outcome = {
        let mut logger = TeeLogger {
            first: &mut tracing_logger,
            second: &mut memory,
        };
        let ensemble = train_ensemble(cfg, &problem, &mut rng, &mut logger)?;
        EnsembleAscent::new(cfg.ascent.clone())?.run(&problem, &ensemble, &mut rng, &mut logger)?
    };

    let artifacts = ArtifactWriter::new(&cfg.logging_dir)?;
    save_matrix(&artifacts, "scores", &outcome.scores)?;
    save_matrix(&artifacts, "predictions", &outcome.predictions)?;
    artifacts.save_designs("candidates", &outcome.final_designs, &task.input_shape())?;

    finish(cfg, Variant::Ascent, &problem, outcome, &memory, start, "design")
}

/// REINFORCE over a design marginal scored by a trained ensemble.
pub fn run_reinforce(cfg: &ExperimentConfig) -> anyhow::Result<RunSummary> {
    let start = Instant::now();
    let (task, mut rng) = prepare(cfg)?;
    let problem = Problem::new(task.as_ref(), cfg.task.normalize_xs, cfg.task.normalize_ys)?;
    let mut renderer = JsonRenderer::new(cfg.logging_dir.join("best_design.json"));

    let mut tracing_logger = TracingLogger;
    let mut memory = MemoryLogger::new();
    let outcome = {
        let mut logger = TeeLogger {
            first: &mut tracing_logger,
            second: &mut memory,
        };
        let ensemble = train_ensemble(cfg, &problem, &mut rng, &mut logger)?;
        Reinforce::new(cfg.reinforce.clone())?.run(
            &problem,
            &ensemble,
            &mut rng,
            &mut logger,
            &mut renderer,
        )?
    };

    let artifacts = ArtifactWriter::new(&cfg.logging_dir)?;
    save_matrix(&artifacts, "scores", &outcome.scores)?;
    save_matrix(&artifacts, "predictions", &outcome.predictions)?;
    artifacts.save_designs("candidates", &outcome.final_designs, &task.input_shape())?;

    finish(cfg, Variant::Reinforce, &problem, outcome, &memory, start, "solution")
}

/// Print per-evaluation score statistics from a trajectory Parquet file.
pub fn run_summary(args: SummaryArgs) -> anyhow::Result<()> {
    let summary = TrajectoryReader::read_summary(&args.input)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("--- Trajectory Summary ---");
    println!("File: {}", args.input.display());
    println!("Total records: {}", summary.total_records);
    println!("Scored records: {}", summary.scored_records);
    println!("Evaluations: {}", summary.evaluations);
    if let Some(best) = summary.best_score {
        println!("Best score: {best:.4}");
    }
    println!(
        "{:>6} {:>8} {:>6} {:>10} {:>10} {:>10} {:>10}",
        "eval", "step", "count", "mean", "median", "max", "pred"
    );
    for e in &summary.per_evaluation {
        println!(
            "{:>6} {:>8} {:>6} {:>10.4} {:>10.4} {:>10.4} {:>10.4}",
            e.evaluation, e.step, e.count, e.mean, e.median, e.max, e.mean_prediction
        );
    }

    let run_summary = args.input.with_file_name("summary.json");
    if run_summary.exists() {
        let run = RunSummary::from_json(&run_summary)?;
        println!(
            "Run: {} on {} (seed {}), improvement over dataset {:+.4}",
            run.variant,
            run.task,
            run.seed,
            run.improvement()
        );
    }
    Ok(())
}
