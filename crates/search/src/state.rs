//! Candidate state carried between solver phases, and best-design tracking.

/// Candidates in the relaxed design space plus per-row bookkeeping.
///
/// Owned by the search loop and replaced by value after every solver step.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchState {
    /// Relaxed candidate rows.
    pub candidates: Vec<Vec<f32>>,
    /// Rows that will not be updated again.
    pub done: Vec<bool>,
    /// Solver steps applied to each row.
    pub row_steps: Vec<u64>,
    /// Gradient norm of each row's last step.
    pub grad_norm: Vec<f32>,
    /// Total solver steps taken (shared by all rows).
    pub step_count: u64,
}

impl SearchState {
    pub fn new(candidates: Vec<Vec<f32>>) -> Self {
        let n = candidates.len();
        Self {
            candidates,
            done: vec![false; n],
            row_steps: vec![0; n],
            grad_norm: vec![0.0; n],
            step_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn all_done(&self) -> bool {
        self.done.iter().all(|&d| d)
    }

    /// Done mask as floats (1.0 = done).
    pub fn done_mask(&self) -> Vec<f32> {
        self.done.iter().map(|&d| if d { 1.0 } else { 0.0 }).collect()
    }

    /// Apply one solver step's results.
    ///
    /// Rows that were active count the step; a row becomes done once it
    /// reaches `max_steps` or its update norm falls below `tol` (`tol > 0`).
    pub fn advance(
        self,
        candidates: Vec<Vec<f32>>,
        grad_norm: Vec<f32>,
        update_norm: &[f32],
        max_steps: Option<u64>,
        tol: f64,
    ) -> Self {
        let mut row_steps = self.row_steps;
        let mut done = self.done;
        for i in 0..done.len() {
            if done[i] {
                continue;
            }
            row_steps[i] += 1;
            let exhausted = max_steps.is_some_and(|m| row_steps[i] >= m);
            let converged = tol > 0.0 && (update_norm[i] as f64) < tol;
            done[i] = exhausted || converged;
        }
        Self {
            candidates,
            done,
            row_steps,
            grad_norm,
            step_count: self.step_count + 1,
        }
    }
}

/// Per-row L2 distance between two sets of rows.
pub fn row_distances(a: &[Vec<f32>], b: &[Vec<f32>]) -> Vec<f32> {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            x.iter()
                .zip(y)
                .map(|(p, q)| (p - q).powi(2))
                .sum::<f32>()
                .sqrt()
        })
        .collect()
}

/// Best oracle-scored design seen so far.
#[derive(Debug, Clone, PartialEq)]
pub struct BestDesign {
    pub score: f32,
    /// Raw design as given to the oracle.
    pub design: Vec<f32>,
    /// Evaluation index at which it was found.
    pub evaluation: u32,
}

/// Running maximum over every oracle evaluation.
#[derive(Debug, Clone, Default)]
pub struct BestTracker {
    best: Option<BestDesign>,
}

impl BestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consider a scored batch. Returns true if the best improved.
    ///
    /// NaN scores are ignored; ties keep the earlier design.
    pub fn update(&mut self, scores: &[f32], designs: &[Vec<f32>], evaluation: u32) -> bool {
        let mut improved = false;
        for (&score, design) in scores.iter().zip(designs) {
            if score.is_nan() {
                continue;
            }
            let better = self.best.as_ref().map_or(true, |b| score > b.score);
            if better {
                self.best = Some(BestDesign {
                    score,
                    design: design.clone(),
                    evaluation,
                });
                improved = true;
            }
        }
        improved
    }

    pub fn best(&self) -> Option<&BestDesign> {
        self.best.as_ref()
    }

    pub fn into_best(self) -> Option<BestDesign> {
        self.best
    }
}
