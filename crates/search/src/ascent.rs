//! Offline gradient ascent through a pre-trained ensemble.
//!
//! Starts from the top `solver_samples` designs of the dataset and takes
//! `solver_steps` ascent steps, each through one uniformly chosen member
//! (or the ensemble mean). The oracle is queried before the first step and
//! after every step.

use burn::tensor::backend::AutodiffBackend;
use rand::Rng;
use surrogate::model::bridge::{rows_to_tensor, tensor_to_rows, tensor_to_vec};
use surrogate::training::metrics::spearman;
use surrogate::{Ensemble, PerturbConfig, PerturbationEngine};
use trajectory::{MetricsLogger, Variant};

use crate::config::{AscentConfig, MemberSelection};
use crate::engine::{build_records, top_k_relaxed, SearchError, SearchOutcome};
use crate::problem::Problem;
use crate::state::{row_distances, BestTracker, SearchState};

pub struct EnsembleAscent {
    config: AscentConfig,
}

impl EnsembleAscent {
    pub fn new(config: AscentConfig) -> Result<Self, SearchError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AscentConfig {
        &self.config
    }

    pub fn run<B: AutodiffBackend>(
        &self,
        problem: &Problem,
        ensemble: &Ensemble<B>,
        rng: &mut impl Rng,
        logger: &mut dyn MetricsLogger,
    ) -> Result<SearchOutcome, SearchError> {
        if problem.dataset().is_empty() {
            return Err(SearchError::Config("dataset is empty; no starting designs".into()));
        }
        let cfg = &self.config;
        let space = *ensemble.space();
        let device = ensemble.member(0).device().clone();
        let engine = PerturbationEngine::new(
            &PerturbConfig::new()
                .with_num_steps(1)
                .with_step_size(cfg.solver_lr)
                .with_mode(cfg.solver_mode),
            space,
        );

        let initial = top_k_relaxed::<B>(problem, &space, cfg.solver_samples, &device);
        let mut state = SearchState::new(initial.clone());
        let mut best = BestTracker::new();
        let mut outcome = SearchOutcome::default();

        tracing::info!(
            samples = state.len(),
            steps = cfg.solver_steps,
            members = ensemble.len(),
            selection = ?cfg.member_selection,
            "Starting ensemble ascent"
        );

        for step in 0..=cfg.solver_steps as u64 {
            if step > 0 {
                let z = rows_to_tensor::<B>(&state.candidates, &device);
                let out = match cfg.member_selection {
                    MemberSelection::Random => {
                        let index = ensemble.sample_member(rng);
                        logger.scalar("member", index as f32, step);
                        let member = ensemble.member(index);
                        engine.perturb(z, &|d| member.mean(d))
                    }
                    MemberSelection::Mean => engine.perturb(z, &|d| ensemble.mean_prediction(d)),
                };
                state = state.advance(
                    tensor_to_rows(out.relaxed),
                    tensor_to_vec(out.grad_norm),
                    &tensor_to_vec(out.update_norm),
                    None,
                    0.0,
                );
            }

            let designs = tensor_to_rows(space.materialize(rows_to_tensor::<B>(&state.candidates, &device)));
            let member_preds: Vec<Vec<f32>> = ensemble
                .members()
                .iter()
                .map(|m| {
                    let x = rows_to_tensor::<B>(&designs, &device);
                    problem.denormalize_y(&tensor_to_vec(m.mean(x).detach()))
                })
                .collect();
            let predictions = average_rows(&member_preds);

            let raw = problem.to_raw_designs(&designs);
            let scores = problem.task().score(&raw)?;
            outcome.oracle_calls += 1;
            let distances = row_distances(&state.candidates, &initial);

            logger.record("score", &scores, step, true);
            logger.record("prediction", &predictions, step, true);
            logger.record("gradient_norm", &state.grad_norm, step, true);
            logger.record("distance/travelled", &distances, step, false);
            logger.scalar(
                "rank_corr/ensemble_to_real",
                spearman(&predictions, &scores) as f32,
                step,
            );
            for (k, preds) in member_preds.iter().enumerate() {
                logger.scalar(
                    &format!("rank_corr/member_{k}_to_real"),
                    spearman(preds, &scores) as f32,
                    step,
                );
            }
            if let Some(rho) = mean_pairwise_rank_corr(&member_preds) {
                logger.scalar("rank_corr/member_to_member", rho as f32, step);
            }

            let evaluation = step as u32;
            best.update(&scores, &raw, evaluation);
            outcome.records.extend(build_records(
                Variant::Ascent,
                evaluation,
                step,
                &predictions,
                Some(&scores),
                &distances,
                &state.grad_norm,
                &state.done,
            ));
            outcome.scores.push(scores);
            outcome.predictions.push(predictions);
            outcome.evaluations += 1;
            outcome.final_designs = raw;

            tracing::debug!(
                step,
                best = ?best.best().map(|b| b.score),
                "Ascent evaluation"
            );
        }

        outcome.solver_steps = state.step_count;
        outcome.best = best.into_best();
        Ok(outcome)
    }
}

/// Element-wise mean of equally long rows.
fn average_rows(rows: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let n = rows.len() as f32;
    (0..first.len())
        .map(|i| rows.iter().map(|r| r[i]).sum::<f32>() / n)
        .collect()
}

/// Mean Spearman correlation over all member pairs. `None` with fewer than
/// two members.
fn mean_pairwise_rank_corr(preds: &[Vec<f32>]) -> Option<f64> {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..preds.len() {
        for j in (i + 1)..preds.len() {
            total += spearman(&preds[i], &preds[j]);
            pairs += 1;
        }
    }
    (pairs > 0).then(|| total / pairs as f64)
}
