//! Batch execution of homogeneous tasks
//!
//! [`run`] applies one async task to every input of a batch, either strictly
//! in order, fully in parallel, or with at most `n` tasks running at once.
//! Every input produces exactly one [`TaskOutcome`]: failures and panics are
//! recorded per task and never abort sibling tasks.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use keel_common::{Error, Result};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::aggregate::Aggregator;

/// How a batch is scheduled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One task at a time, in input order
    Sequential,
    /// One concurrent worker per task
    Parallel,
    /// At most `n` tasks running at once
    BoundedParallel(usize),
}

/// Result of one task in a batch
#[derive(Debug)]
pub struct TaskOutcome<R> {
    /// Position of the task's input in the batch
    pub index: usize,
    /// What the task returned, or why it did not return
    pub result: Result<R>,
    /// Time spent running the task, excluding time queued for a slot
    pub duration: Duration,
}

impl<R> TaskOutcome<R> {
    /// Returns true if the task returned `Ok`
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Every outcome of a batch
///
/// Outcomes are in input order for sequential batches and in completion
/// order otherwise; [`BatchReport::into_ordered`] restores input order.
#[derive(Debug)]
pub struct BatchReport<R> {
    outcomes: Vec<TaskOutcome<R>>,
}

impl<R> BatchReport<R> {
    fn new(outcomes: Vec<TaskOutcome<R>>) -> Self {
        Self { outcomes }
    }

    /// Number of outcomes (always the batch size)
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns true for an empty batch
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// All outcomes
    pub fn outcomes(&self) -> &[TaskOutcome<R>] {
        &self.outcomes
    }

    /// Returns true if no task failed
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(TaskOutcome::is_success)
    }

    /// Number of failed tasks
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }

    /// Values of the tasks that succeeded, with their input index
    pub fn successes(&self) -> impl Iterator<Item = (usize, &R)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|r| (o.index, r)))
    }

    /// Errors of the tasks that failed, with their input index
    pub fn failures(&self) -> impl Iterator<Item = (usize, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.index, e)))
    }

    /// Sort outcomes by input index
    pub fn into_ordered(mut self) -> Self {
        self.outcomes.sort_by_key(|o| o.index);
        self
    }

    /// Consume the report, returning the outcomes in their current order
    pub fn into_outcomes(self) -> Vec<TaskOutcome<R>> {
        self.outcomes
    }

    /// All values in input order, or a summary of the failures
    pub fn into_result(self) -> Result<Vec<R>> {
        let total = self.len();
        let failed = self.failed_count();
        let mut values = Vec::with_capacity(total);
        let mut first = None;
        for outcome in self.into_ordered().outcomes {
            match outcome.result {
                Ok(value) => values.push(value),
                Err(e) if first.is_none() => first = Some(e.to_string()),
                Err(_) => {}
            }
        }
        match first {
            None => Ok(values),
            Some(first) => Err(Error::Batch {
                failed,
                total,
                first,
            }),
        }
    }

    /// Log a PASS/FAIL line per task and a totals line
    pub fn log_summary(&self, batch: &str) {
        info!("========================================");
        info!("  {}", batch.to_uppercase());
        info!("========================================");
        for outcome in &self.outcomes {
            let tag = if outcome.is_success() { "PASS" } else { "FAIL" };
            info!(
                "  {tag}  task {:<4} {:.1}s",
                outcome.index,
                outcome.duration.as_secs_f64()
            );
            if let Err(e) = &outcome.result {
                info!("        -> {e}");
            }
        }
        info!("----------------------------------------");
        info!(
            "  {} passed, {} failed",
            self.len() - self.failed_count(),
            self.failed_count()
        );
        info!("========================================");
    }
}

/// Run `task` on every input according to `mode`.
///
/// Waits for every task before returning; no worker is abandoned. A batch of
/// one input always runs sequentially.
pub async fn run<I, R, F, Fut>(
    inputs: impl IntoIterator<Item = I>,
    mode: ExecutionMode,
    task: F,
) -> BatchReport<R>
where
    I: Send + 'static,
    R: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let inputs: Vec<I> = inputs.into_iter().collect();
    let total = inputs.len();
    if total == 0 {
        return BatchReport::new(Vec::new());
    }

    let mode = if total == 1 {
        ExecutionMode::Sequential
    } else {
        mode
    };
    debug!(total, ?mode, "running batch");

    match mode {
        ExecutionMode::Sequential => run_sequential(inputs, task).await,
        ExecutionMode::Parallel => run_spawned(inputs, task, None).await,
        ExecutionMode::BoundedParallel(limit) => {
            let limit = if limit == 0 {
                warn!("bounded parallelism of 0 requested, running one task at a time");
                1
            } else {
                limit
            };
            run_spawned(inputs, task, Some(Arc::new(Semaphore::new(limit)))).await
        }
    }
}

async fn run_sequential<I, R, F, Fut>(inputs: Vec<I>, task: F) -> BatchReport<R>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let mut outcomes = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.into_iter().enumerate() {
        outcomes.push(run_one(index, async { task(input).await }).await);
    }
    BatchReport::new(outcomes)
}

async fn run_spawned<I, R, F, Fut>(
    inputs: Vec<I>,
    task: F,
    limiter: Option<Arc<Semaphore>>,
) -> BatchReport<R>
where
    I: Send + 'static,
    R: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let total = inputs.len();
    let task = Arc::new(task);
    let outcomes = Arc::new(Aggregator::with_capacity(total));
    let mut handles = Vec::with_capacity(total);

    for (index, input) in inputs.into_iter().enumerate() {
        let task = Arc::clone(&task);
        let outcomes = Arc::clone(&outcomes);
        let limiter = limiter.clone();
        let handle = tokio::spawn(async move {
            // Held until the task finishes; the semaphore is never closed
            let _permit = match limiter {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            let outcome = run_one(index, async move { task(input).await }).await;
            outcomes.append(outcome);
        });
        handles.push((index, handle));
    }

    for (index, handle) in handles {
        if let Err(e) = handle.await {
            error!(index, error = %e, "batch worker did not finish");
            outcomes.append(TaskOutcome {
                index,
                result: Err(Error::TaskAborted {
                    index,
                    message: e.to_string(),
                }),
                duration: Duration::ZERO,
            });
        }
    }

    BatchReport::new(outcomes.take())
}

async fn run_one<R>(index: usize, work: impl Future<Output = Result<R>>) -> TaskOutcome<R> {
    let start = Instant::now();
    let result = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(index, panic = %message, "task panicked");
            Err(Error::TaskPanicked { index, message })
        }
    };
    if let Err(e) = &result {
        debug!(index, error = %e, "task failed");
    }
    TaskOutcome {
        index,
        result,
        duration: start.elapsed(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Tracks how many tasks are running and the highest count ever seen
    #[derive(Default)]
    struct ConcurrencyProbe {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ConcurrencyProbe {
        async fn run_for(&self, duration: Duration) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(duration).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let report = run(Vec::<u32>::new(), ExecutionMode::Parallel, |n| async move {
            Ok(n)
        })
        .await;
        assert!(report.is_empty());
        assert!(report.is_success());
        assert_eq!(report.into_result().unwrap(), Vec::<u32>::new());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_keeps_input_order_past_failures() {
        let probe = Arc::new(ConcurrencyProbe::default());
        let p = Arc::clone(&probe);
        let report = run(0..6u64, ExecutionMode::Sequential, move |n| {
            let p = Arc::clone(&p);
            async move {
                p.run_for(Duration::from_millis(10 * (6 - n))).await;
                if n % 2 == 1 {
                    Err(Error::config(format!("task {n} failed")))
                } else {
                    Ok(n * 10)
                }
            }
        })
        .await;

        let indices: Vec<_> = report.outcomes().iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(report.failed_count(), 3);
        let values: Vec<_> = report.successes().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![0, 20, 40]);
        assert_eq!(probe.peak(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_returns_every_outcome() {
        let probe = Arc::new(ConcurrencyProbe::default());
        let p = Arc::clone(&probe);
        let start = Instant::now();
        // Later inputs finish first
        let report = run(0..8u64, ExecutionMode::Parallel, move |n| {
            let p = Arc::clone(&p);
            async move {
                p.run_for(Duration::from_millis(100 - n * 10)).await;
                Ok(n)
            }
        })
        .await;

        assert_eq!(report.len(), 8);
        assert!(report.is_success());
        assert_eq!(probe.peak(), 8);
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(report.outcomes()[0].index, 7);
        assert_eq!(report.into_result().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_parallel_never_exceeds_limit() {
        let probe = Arc::new(ConcurrencyProbe::default());
        let p = Arc::clone(&probe);
        let report = run(0..5u32, ExecutionMode::BoundedParallel(2), move |n| {
            let p = Arc::clone(&p);
            async move {
                let ms = rand::thread_rng().gen_range(1..50);
                p.run_for(Duration::from_millis(ms)).await;
                Ok(n)
            }
        })
        .await;

        assert_eq!(report.len(), 5);
        assert!(probe.peak() <= 2);
        assert_eq!(probe.peak(), 2);
        let mut indices: Vec<_> = report.outcomes().iter().map(|o| o.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_parallel_zero_runs_one_at_a_time() {
        let probe = Arc::new(ConcurrencyProbe::default());
        let p = Arc::clone(&probe);
        let report = run(0..3u32, ExecutionMode::BoundedParallel(0), move |n| {
            let p = Arc::clone(&p);
            async move {
                p.run_for(Duration::from_millis(5)).await;
                Ok(n)
            }
        })
        .await;
        assert_eq!(report.len(), 3);
        assert_eq!(probe.peak(), 1);
    }

    #[tokio::test]
    async fn test_parallel_panic_is_recorded_and_siblings_finish() {
        let report = run(0..4u32, ExecutionMode::Parallel, |n| async move {
            if n == 2 {
                panic!("restore {n} exploded");
            }
            Ok(n)
        })
        .await;

        assert_eq!(report.len(), 4);
        assert_eq!(report.failed_count(), 1);
        let (index, err) = report.failures().next().unwrap();
        assert_eq!(index, 2);
        assert_eq!(err.task_index(), Some(2));
        assert!(err.to_string().contains("restore 2 exploded"));
    }

    #[tokio::test]
    async fn test_sequential_panic_is_recorded_and_batch_continues() {
        let report = run(
            vec!["a", "boom", "c"],
            ExecutionMode::Sequential,
            |s| async move {
                if s == "boom" {
                    panic!("static panic");
                }
                Ok(s.len())
            },
        )
        .await;

        assert_eq!(report.len(), 3);
        let indices: Vec<_> = report.outcomes().iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(matches!(
            report.outcomes()[1].result,
            Err(Error::TaskPanicked { index: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_into_result_summarizes_failures() {
        let report = run(0..5u32, ExecutionMode::BoundedParallel(3), |n| async move {
            if n >= 3 {
                Err(Error::config(format!("input {n} rejected")))
            } else {
                Ok(n)
            }
        })
        .await;

        match report.into_result().unwrap_err() {
            Error::Batch {
                failed,
                total,
                first,
            } => {
                assert_eq!(failed, 2);
                assert_eq!(total, 5);
                assert!(first.contains("input 3 rejected"));
            }
            other => panic!("expected batch error, got {other:?}"),
        }
    }

    #[test]
    fn test_panic_message_variants() {
        let boxed: Box<dyn Any + Send> = Box::new("literal");
        assert_eq!(panic_message(boxed.as_ref()), "literal");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
