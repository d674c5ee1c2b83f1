//! Task wrappers for testing search loops against instrumented oracles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use task::{Dataset, DesignShape, Task, TaskError};

/// Forwards to an inner task and records every oracle batch.
pub struct CountingTask<T: Task> {
    inner: T,
    calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
}

impl<T: Task> CountingTask<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Number of `score` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Size of each scored batch, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .map(|sizes| sizes.clone())
            .unwrap_or_default()
    }
}

impl<T: Task> Task for CountingTask<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn shape(&self) -> DesignShape {
        self.inner.shape()
    }

    fn dataset(&self) -> &Dataset {
        self.inner.dataset()
    }

    fn score(&self, x: &[Vec<f32>]) -> Result<Vec<f32>, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sizes) = self.batch_sizes.lock() {
            sizes.push(x.len());
        }
        self.inner.score(x)
    }
}

/// Oracle that succeeds `healthy_calls` times, then fails every call.
pub struct FailingOracle<T: Task> {
    inner: T,
    healthy_calls: usize,
    calls: AtomicUsize,
}

impl<T: Task> FailingOracle<T> {
    pub fn new(inner: T, healthy_calls: usize) -> Self {
        Self {
            inner,
            healthy_calls,
            calls: AtomicUsize::new(0),
        }
    }
}

impl<T: Task> Task for FailingOracle<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn shape(&self) -> DesignShape {
        self.inner.shape()
    }

    fn dataset(&self) -> &Dataset {
        self.inner.dataset()
    }

    fn score(&self, x: &[Vec<f32>]) -> Result<Vec<f32>, TaskError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.healthy_calls {
            return Err(TaskError::Oracle(format!("simulated failure on call {call}")));
        }
        self.inner.score(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use task::QuadraticTask;

    #[test]
    fn test_counting_task_records_batches() {
        let task = CountingTask::new(QuadraticTask::new(2, 10, 100.0, 0).unwrap());
        task.score(&[vec![0.0, 0.0], vec![1.0, 1.0]]).unwrap();
        task.score(&[vec![0.0, 0.0]]).unwrap();
        assert_eq!(task.calls(), 2);
        assert_eq!(task.batch_sizes(), vec![2, 1]);
        assert_eq!(task.dataset().len(), 10);
    }

    #[test]
    fn test_failing_oracle() {
        let task = FailingOracle::new(QuadraticTask::new(2, 10, 100.0, 0).unwrap(), 1);
        assert!(task.score(&[vec![0.0, 0.0]]).is_ok());
        let err = task.score(&[vec![0.0, 0.0]]).unwrap_err();
        assert!(matches!(err, TaskError::Oracle(_)));
    }
}
