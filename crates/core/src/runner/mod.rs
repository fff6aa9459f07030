//! Concurrency- and rate-bounded execution of independent async tasks.
//!
//! Remote marketplaces constrain clients two ways at once: a cap on
//! simultaneous in-flight requests and a cap on request starts per unit
//! time. [`run`] enforces both independently — a counting semaphore bounds
//! concurrency while a fixed inter-start delay bounds the start rate — so a
//! pure semaphore's inability to express "N requests per second" does not
//! leak into callers. [`batch_process`] covers the simpler wall-clock-window
//! model: N items in parallel, pause, next N.
//!
//! Cancellation is cooperative: the token is consulted at every suspension
//! point (capacity wait, inter-start delay), and a task that is already
//! executing runs to completion.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Boxed unit of work accepted by [`run`].
pub type Task<T> = Pin<Box<dyn Future<Output = std::result::Result<T, TaskError>> + Send>>;

/// Failure of one task in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Ordinary failure, isolated to this task's slot.
    #[error("{0}")]
    Failed(String),

    /// Sentinel: stop the entire batch, not just this task.
    #[error("Batch cancelled: {0}")]
    Cancelled(String),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled(message.into())
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Limits applied to one [`run`] invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum tasks in flight at once.
    pub max_concurrent: usize,
    /// Minimum spacing between task starts; bounds the start rate
    /// independent of task duration.
    pub delay_between_starts: Duration,
    /// Keep launching after an ordinary task failure.
    pub continue_on_error: bool,
    /// Cancellation handle. Callers may pass their own token to abort the
    /// batch externally; the runner also trips it on a sentinel error.
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            delay_between_starts: Duration::from_millis(500),
            continue_on_error: true,
            cancel: CancellationToken::new(),
        }
    }
}

/// Outcome of a batch. `results` and `errors` are full-length and aligned
/// to the input order regardless of completion order; `None` marks an index
/// whose task never ran or produced the other vector's entry.
#[derive(Debug)]
pub struct TaskBatchOutcome<T> {
    pub results: Vec<Option<T>>,
    pub errors: Vec<Option<TaskError>>,
    pub aborted: bool,
}

impl<T> TaskBatchOutcome<T> {
    pub fn first_error(&self) -> Option<&TaskError> {
        self.errors.iter().flatten().next()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().flatten().count()
    }

    pub fn failed(&self) -> usize {
        self.errors.iter().flatten().count()
    }
}

/// Execute `tasks` under the given limits.
///
/// Starts are strictly sequential (index 0, 1, 2, ...) subject to the
/// capacity and pacing gates. Each task's failure lands in its own slot; a
/// [`TaskError::Cancelled`] return, or any error when
/// `continue_on_error=false`, cancels the not-yet-started remainder while
/// in-flight tasks settle. The call resolves only once every launched task
/// has settled.
pub async fn run<T>(tasks: Vec<Task<T>>, options: RunOptions) -> TaskBatchOutcome<T>
where
    T: Send + 'static,
{
    let total = tasks.len();
    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut errors: Vec<Option<TaskError>> = (0..total).map(|_| None).collect();

    let semaphore = Arc::new(Semaphore::new(options.max_concurrent.max(1)));
    let cancel = options.cancel.clone();
    let continue_on_error = options.continue_on_error;
    let mut running: JoinSet<(usize, std::result::Result<T, TaskError>)> = JoinSet::new();

    for (index, task) in tasks.into_iter().enumerate() {
        // Wait for capacity; give up as soon as cancellation is observed.
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => {
                match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                }
            }
        };
        if cancel.is_cancelled() {
            break;
        }

        let cancel_on_error = cancel.clone();
        running.spawn(async move {
            let outcome = task.await;
            if let Err(ref error) = outcome {
                if error.is_cancellation() || !continue_on_error {
                    cancel_on_error.cancel();
                }
            }
            drop(permit);
            (index, outcome)
        });

        if index + 1 < total && !options.delay_between_starts.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep(options.delay_between_starts) => {}
            }
        }
    }

    // Already-launched tasks always settle before the call resolves;
    // cancellation is advisory, never preemptive.
    while let Some(joined) = running.join_next().await {
        match joined {
            Ok((index, Ok(value))) => results[index] = Some(value),
            Ok((index, Err(error))) => {
                debug!("Task {} failed: {}", index, error);
                errors[index] = Some(error);
            }
            Err(join_error) => {
                if join_error.is_panic() {
                    std::panic::resume_unwind(join_error.into_panic());
                }
            }
        }
    }

    TaskBatchOutcome {
        results,
        errors,
        aborted: cancel.is_cancelled(),
    }
}

/// Options for [`batch_process`].
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub delay_between_batches: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 5,
            delay_between_batches: Duration::from_secs(1),
        }
    }
}

/// Outcome of [`batch_process`]: index-aligned results plus per-item
/// failures with their original index.
#[derive(Debug)]
pub struct BatchProcessOutcome<T> {
    pub results: Vec<Option<T>>,
    pub errors: Vec<(usize, TaskError)>,
}

/// Process `items` in windows of `batch_size`: each window runs in
/// parallel, then the runner pauses before the next one. Fits remote
/// systems that rate-limit by wall-clock window rather than concurrency.
/// Item failures are collected with their index; the batch never fails as
/// a whole.
pub async fn batch_process<I, T, F, Fut>(
    items: Vec<I>,
    processor: F,
    options: BatchOptions,
) -> BatchProcessOutcome<T>
where
    F: Fn(usize, I) -> Fut,
    Fut: Future<Output = std::result::Result<T, TaskError>>,
{
    let total = items.len();
    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut errors: Vec<(usize, TaskError)> = Vec::new();

    let batch_size = options.batch_size.max(1);
    let mut remaining: Vec<(usize, I)> = items.into_iter().enumerate().collect();

    while !remaining.is_empty() {
        let take = batch_size.min(remaining.len());
        let window = remaining.drain(..take).collect::<Vec<_>>();

        let settled = futures::future::join_all(window.into_iter().map(|(index, item)| {
            let work = processor(index, item);
            async move { (index, work.await) }
        }))
        .await;

        for (index, outcome) in settled {
            match outcome {
                Ok(value) => results[index] = Some(value),
                Err(error) => errors.push((index, error)),
            }
        }

        if !remaining.is_empty() && !options.delay_between_batches.is_zero() {
            sleep(options.delay_between_batches).await;
        }
    }

    BatchProcessOutcome { results, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn ok_task<T: Send + 'static>(value: T) -> Task<T> {
        Box::pin(async move { Ok(value) })
    }

    fn failing_task<T: Send + 'static>(message: &str) -> Task<T> {
        let error = TaskError::failed(message);
        Box::pin(async move { Err(error) })
    }

    fn immediate_options() -> RunOptions {
        RunOptions {
            max_concurrent: 3,
            delay_between_starts: Duration::ZERO,
            continue_on_error: true,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn results_align_to_input_order() {
        let tasks: Vec<Task<i32>> = vec![ok_task(1), failing_task("boom"), ok_task(3)];
        let outcome = run(tasks, immediate_options()).await;

        assert_eq!(outcome.results, vec![Some(1), None, Some(3)]);
        assert_eq!(
            outcome.errors,
            vec![None, Some(TaskError::failed("boom")), None]
        );
        assert!(!outcome.aborted);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let tasks: Vec<Task<()>> = (0..5)
            .map(|_| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                let release = Arc::clone(&release);
                let task: Task<()> = Box::pin(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    release.notified().await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                });
                task
            })
            .collect();

        let release_loop = {
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                loop {
                    sleep(Duration::from_millis(10)).await;
                    release.notify_one();
                }
            })
        };

        let outcome = run(
            tasks,
            RunOptions {
                max_concurrent: 2,
                delay_between_starts: Duration::ZERO,
                continue_on_error: true,
                cancel: CancellationToken::new(),
            },
        )
        .await;
        release_loop.abort();

        assert_eq!(outcome.succeeded(), 5);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn sentinel_error_aborts_remaining_tasks() {
        let started = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<Task<i32>> = (0..6)
            .map(|index| {
                let started = Arc::clone(&started);
                let task: Task<i32> = Box::pin(async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if index == 1 {
                        Err(TaskError::cancelled("invalid session"))
                    } else {
                        Ok(index)
                    }
                });
                task
            })
            .collect();

        let outcome = run(
            tasks,
            RunOptions {
                max_concurrent: 1,
                delay_between_starts: Duration::ZERO,
                continue_on_error: true,
                cancel: CancellationToken::new(),
            },
        )
        .await;

        assert!(outcome.aborted);
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.results[0], Some(0));
        assert!(outcome.errors[1].as_ref().unwrap().is_cancellation());
        assert_eq!(outcome.results[2..], vec![None, None, None, None]);
    }

    #[tokio::test]
    async fn first_error_stops_batch_when_continue_is_off() {
        let started = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<Task<i32>> = (0..4)
            .map(|index| {
                let started = Arc::clone(&started);
                let task: Task<i32> = Box::pin(async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if index == 0 {
                        Err(TaskError::failed("boom"))
                    } else {
                        Ok(index)
                    }
                });
                task
            })
            .collect();

        let outcome = run(
            tasks,
            RunOptions {
                max_concurrent: 1,
                delay_between_starts: Duration::ZERO,
                continue_on_error: false,
                cancel: CancellationToken::new(),
            },
        )
        .await;

        assert!(outcome.aborted);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.first_error(), Some(&TaskError::failed("boom")));
    }

    #[tokio::test]
    async fn external_cancellation_skips_everything() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let tasks: Vec<Task<i32>> = vec![ok_task(1), ok_task(2)];
        let outcome = run(
            tasks,
            RunOptions {
                cancel,
                ..immediate_options()
            },
        )
        .await;

        assert!(outcome.aborted);
        assert_eq!(outcome.results, vec![None, None]);
    }

    #[tokio::test(start_paused = true)]
    async fn starts_are_paced() {
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));

        let tasks: Vec<Task<()>> = (0..3)
            .map(|_| {
                let stamps = Arc::clone(&stamps);
                let task: Task<()> = Box::pin(async move {
                    stamps.lock().unwrap().push(tokio::time::Instant::now());
                    Ok(())
                });
                task
            })
            .collect();

        run(
            tasks,
            RunOptions {
                max_concurrent: 3,
                delay_between_starts: Duration::from_millis(200),
                continue_on_error: true,
                cancel: CancellationToken::new(),
            },
        )
        .await;

        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 3);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batch_process_collects_indexed_errors() {
        let items = vec![1, 2, 3, 4, 5];
        let outcome = batch_process(
            items,
            |index, item| async move {
                if item % 2 == 0 {
                    Err(TaskError::failed(format!("item {} failed", index)))
                } else {
                    Ok(item * 10)
                }
            },
            BatchOptions {
                batch_size: 2,
                delay_between_batches: Duration::from_millis(100),
            },
        )
        .await;

        assert_eq!(
            outcome.results,
            vec![Some(10), None, Some(30), None, Some(50)]
        );
        let failed: Vec<usize> = outcome.errors.iter().map(|(index, _)| *index).collect();
        assert_eq!(failed, vec![1, 3]);
    }
}
