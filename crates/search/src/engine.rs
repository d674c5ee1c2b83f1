//! Online conservative search: surrogate training interleaved with
//! gradient-ascent solver phases on a fixed batch of candidates.
//!
//! ```text
//! INIT ──▶ TRAIN_SURROGATE ──(every `interval` minibatches, after warmup)──▶ SEARCH_STEP
//!               ▲                                                              │
//!               └──────────────────────────────────────────────────────────────┘
//!          (epochs exhausted, all candidates done, or cancelled) ──▶ TERMINATED
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::Rng;
use surrogate::model::bridge::{rows_to_tensor, tensor_to_rows, tensor_to_vec, values_to_tensor};
use surrogate::training::metrics::{spearman, RunningAvg, StepMetrics};
use surrogate::{ConservativeTrainer, DesignSpace, PerturbConfig, PerturbationEngine, TrainError};
use task::{top_k_indices, Pipeline, TaskError};
use trajectory::{MetricsLogger, SearchRecord, Variant};

use crate::config::OnlineConfig;
use crate::problem::Problem;
use crate::state::{row_distances, BestDesign, BestTracker, SearchState};

/// Errors that can occur during design search.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Error from the oracle or the data pipeline.
    #[error("Task error: {0}")]
    Task(#[from] TaskError),
    /// Error from surrogate training.
    #[error("Training error: {0}")]
    Train(#[from] TrainError),
    #[error("Invalid search configuration: {0}")]
    Config(String),
}

/// Everything a search run produces.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// Best oracle-scored design, `None` if the oracle was never queried.
    pub best: Option<BestDesign>,
    /// One record per candidate per evaluation.
    pub records: Vec<SearchRecord>,
    /// Raw oracle scores per evaluation. Evaluations that skipped the oracle
    /// repeat the most recent scores.
    pub scores: Vec<Vec<f32>>,
    /// Raw surrogate predictions per evaluation.
    pub predictions: Vec<Vec<f32>>,
    pub evaluations: u32,
    /// Number of batched oracle queries.
    pub oracle_calls: u32,
    pub solver_steps: u64,
    /// Final candidates as raw designs.
    pub final_designs: Vec<Vec<f32>>,
}

/// Relaxed rows of the `k` highest-labeled designs.
pub(crate) fn top_k_relaxed<B: Backend>(
    problem: &Problem,
    space: &DesignSpace,
    k: usize,
    device: &B::Device,
) -> Vec<Vec<f32>> {
    let data = problem.dataset();
    let rows: Vec<Vec<f32>> = top_k_indices(&data.y, k)
        .into_iter()
        .map(|i| data.x[i].clone())
        .collect();
    tensor_to_rows(space.to_relaxed(rows_to_tensor::<B>(&rows, device)))
}

/// One trajectory record per candidate. Missing distances, gradient norms
/// and done flags default to zero / false.
#[allow(clippy::too_many_arguments)]
pub fn build_records(
    variant: Variant,
    evaluation: u32,
    step: u64,
    predictions: &[f32],
    scores: Option<&[f32]>,
    distances: &[f32],
    grad_norms: &[f32],
    done: &[bool],
) -> Vec<SearchRecord> {
    (0..predictions.len())
        .map(|i| SearchRecord {
            variant,
            evaluation,
            step,
            candidate: i as u32,
            prediction: predictions[i] as f64,
            score: scores.map(|s| s[i] as f64),
            distance: distances.get(i).copied().unwrap_or(0.0) as f64,
            grad_norm: grad_norms.get(i).copied().unwrap_or(0.0) as f64,
            done: done.get(i).copied().unwrap_or(false),
        })
        .collect()
}

/// Log averaged step metrics under `{prefix}/...`.
pub(crate) fn log_metrics(logger: &mut dyn MetricsLogger, prefix: &str, m: &StepMetrics, step: u64) {
    logger.scalar(&format!("{prefix}/loss"), m.loss as f32, step);
    logger.scalar(&format!("{prefix}/rank_correlation"), m.rank_correlation as f32, step);
    logger.scalar(&format!("{prefix}/gap"), m.gap as f32, step);
    logger.scalar(&format!("{prefix}/alpha"), m.alpha as f32, step);
    logger.scalar(&format!("{prefix}/multiplier_loss"), m.multiplier_loss as f32, step);
}

fn check_problem(problem: &Problem) -> Result<(), SearchError> {
    if problem.dataset().is_empty() {
        return Err(SearchError::Config("dataset is empty; no starting designs".into()));
    }
    Ok(())
}

/// Online conservative search driver.
#[derive(Debug, Clone)]
pub struct OnlineSearch {
    config: OnlineConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl OnlineSearch {
    pub fn new(config: OnlineConfig) -> Result<Self, SearchError> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: None,
        })
    }

    /// Stop between minibatches once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &OnlineConfig {
        &self.config
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Minibatch counts `(interval, warmup)` for a training split of
    /// `n_train` rows.
    pub fn schedule(&self, n_train: usize, batch_size: usize) -> (u64, u64) {
        let per_epoch = n_train as f64 / batch_size as f64;
        let interval = ((self.config.solver_interval * per_epoch) as u64).max(1);
        let warmup = (self.config.solver_warmup * per_epoch) as u64;
        (interval, warmup)
    }

    /// Train `trainer` on split 0 of `pipeline` while ascending the
    /// candidates through it.
    pub fn run<B: AutodiffBackend>(
        &self,
        problem: &Problem,
        trainer: &mut ConservativeTrainer<B>,
        pipeline: &mut Pipeline,
        rng: &mut impl Rng,
        logger: &mut dyn MetricsLogger,
    ) -> Result<SearchOutcome, SearchError> {
        check_problem(problem)?;
        let cfg = &self.config;
        let space = *trainer.space();
        let device = trainer.device().clone();
        let (interval, warmup) = self.schedule(pipeline.train[0].len(), pipeline.batch_size);
        let engine = PerturbationEngine::new(
            &PerturbConfig::new()
                .with_num_steps(1)
                .with_step_size(cfg.solver_lr)
                .with_mode(cfg.solver_mode),
            space,
        );

        let initial = top_k_relaxed::<B>(problem, &space, cfg.num_candidates, &device);
        let mut state = SearchState::new(initial.clone());
        let mut best = BestTracker::new();
        let mut outcome = SearchOutcome::default();
        let mut last_scores: Option<Vec<f32>> = None;
        let mut minibatches: u64 = 0;

        tracing::info!(
            candidates = state.len(),
            interval,
            warmup,
            epochs = cfg.epochs,
            "Starting online search"
        );

        'epochs: for epoch in 0..cfg.epochs {
            let mut train_avg = RunningAvg::new();
            for batch in pipeline.train_batches(0, rng) {
                if self.cancelled() {
                    tracing::warn!(epoch, minibatches, "Online search cancelled");
                    break 'epochs;
                }
                let negatives = cfg
                    .online_negatives
                    .then(|| space.materialize(rows_to_tensor::<B>(&state.candidates, &device)));
                train_avg.update(&trainer.train_step(&batch, negatives)?);
                minibatches += 1;

                if minibatches % interval != 0 || minibatches < warmup {
                    continue;
                }

                state = self.solver_phase(trainer, &engine, state, &device);
                outcome.evaluations += 1;
                let evaluation = outcome.evaluations;
                let step = evaluation as u64;

                let materialized = space.materialize(rows_to_tensor::<B>(&state.candidates, &device));
                let designs = tensor_to_rows(materialized.clone().detach());
                let predictions =
                    problem.denormalize_y(&tensor_to_vec(trainer.mean(materialized).detach()));
                let distances = row_distances(&state.candidates, &initial);
                logger.record("distance/travelled", &distances, step, false);
                logger.record("oracle/prediction", &predictions, step, true);
                logger.record("oracle/grad_norm", &state.grad_norm, step, true);

                let query = cfg.evaluate_steps.is_empty()
                    || cfg.evaluate_steps.contains(&evaluation)
                    || last_scores.is_none();
                let fresh = if query {
                    let raw = problem.to_raw_designs(&designs);
                    let scores = problem.task().score(&raw)?;
                    outcome.oracle_calls += 1;
                    logger.record("score", &scores, step, true);
                    logger.scalar(
                        "rank_corr/model_to_real",
                        spearman(&predictions, &scores) as f32,
                        step,
                    );
                    best.update(&scores, &raw, evaluation);
                    if cfg.relabel {
                        let rows = if space.is_discrete() { raw } else { designs };
                        pipeline.extend_train(rows, problem.normalize_y(&scores))?;
                    }
                    last_scores = Some(scores.clone());
                    Some(scores)
                } else {
                    None
                };

                outcome.records.extend(build_records(
                    Variant::Online,
                    evaluation,
                    state.step_count,
                    &predictions,
                    fresh.as_deref(),
                    &distances,
                    &state.grad_norm,
                    &state.done,
                ));
                outcome.scores.push(last_scores.clone().unwrap_or_default());
                outcome.predictions.push(predictions);

                tracing::info!(
                    epoch,
                    evaluation,
                    solver_steps = state.step_count,
                    queried = query,
                    best = ?best.best().map(|b| b.score),
                    "Online evaluation"
                );
            }

            trainer.finish_epoch();
            if let Some(m) = train_avg.average() {
                log_metrics(logger, "train", &m, epoch as u64);
            }
            let mut val_avg = RunningAvg::new();
            for m in trainer.validate(pipeline)? {
                val_avg.update(&m);
            }
            if let Some(m) = val_avg.average() {
                log_metrics(logger, "validate", &m, epoch as u64);
            }
            tracing::info!(
                epoch,
                "train({}) {} | val({}) {}",
                train_avg.count(),
                train_avg.display(),
                val_avg.count(),
                val_avg.display()
            );

            if state.all_done() {
                tracing::info!(epoch, "All candidates done, stopping early");
                break;
            }
        }

        let materialized = space.materialize(rows_to_tensor::<B>(&state.candidates, &device));
        outcome.final_designs = problem.to_raw_designs(&tensor_to_rows(materialized.detach()));
        outcome.solver_steps = state.step_count;
        outcome.best = best.into_best();
        if outcome.best.is_none() {
            tracing::warn!("Online search finished without querying the oracle");
        }
        Ok(outcome)
    }

    /// Up to `solver_steps` masked ascent steps through the current model.
    fn solver_phase<B: AutodiffBackend>(
        &self,
        trainer: &ConservativeTrainer<B>,
        engine: &PerturbationEngine,
        mut state: SearchState,
        device: &B::Device,
    ) -> SearchState {
        for _ in 0..self.config.solver_steps {
            if state.all_done() {
                break;
            }
            let z = rows_to_tensor::<B>(&state.candidates, device);
            let done = values_to_tensor::<B>(&state.done_mask(), device);
            let out = engine.perturb_masked(z, &|d| trainer.mean(d), Some(done));
            state = state.advance(
                tensor_to_rows(out.relaxed),
                tensor_to_vec(out.grad_norm),
                &tensor_to_vec(out.update_norm),
                self.config.max_solver_steps,
                self.config.convergence_tol,
            );
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_converts_epochs_to_minibatches() {
        let search = OnlineSearch::new(OnlineConfig {
            solver_interval: 0.5,
            solver_warmup: 2.0,
            ..OnlineConfig::default()
        })
        .unwrap();
        assert_eq!(search.schedule(1000, 100), (5, 20));
        // Never zero, even for tiny splits
        assert_eq!(search.schedule(10, 100).0, 1);
    }

    #[test]
    fn test_build_records() {
        let records = build_records(
            Variant::Online,
            3,
            7,
            &[1.0, 2.0],
            Some(&[0.5, 0.25]),
            &[0.1, 0.2],
            &[1.0, 0.0],
            &[false, true],
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].candidate, 1);
        assert_eq!(records[1].score, Some(0.25));
        assert!(records[1].done);
        assert_eq!(records[0].step, 7);

        let unscored = build_records(Variant::Ascent, 0, 0, &[1.0], None, &[], &[], &[]);
        assert_eq!(unscored[0].score, None);
        assert_eq!(unscored[0].distance, 0.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = OnlineSearch::new(OnlineConfig {
            num_candidates: 0,
            ..OnlineConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }
}
