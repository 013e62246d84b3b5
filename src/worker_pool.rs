//! Worker pool (C5, spec §4.3): a fixed-size pool of parallel transform
//! executors, decoupled from the main I/O context.
//!
//! Grounded on the spec's own design note (§9) — "message-passing worker
//! threads with schema-validated request/response envelopes" — and the
//! teacher's `tokio::spawn` supervisory pattern (the cache-cleanup task
//! spawned in `OddsIngestionService::run`). Each worker is a `tokio` task
//! pulling from a shared queue; a worker that panics mid-transform is
//! caught, its task re-queued up to `max_attempts`, and a replacement
//! worker spawned unless the pool is shutting down.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use crate::errors::{ShutdownError, TransformError};
use crate::models::{RawRaceData, TransformedRace};
use crate::transform::{self, PreviousAmounts};

/// One unit of transform work, carrying a `task_id` as required by spec §4.3.
struct Task {
    task_id: Uuid,
    raw: RawRaceData,
    current_time: DateTime<Utc>,
    previous_amounts: PreviousAmounts,
    attempt: u32,
    max_attempts: u32,
    reply: Option<oneshot::Sender<Result<TransformedRace, TransformError>>>,
}

struct Queue {
    tasks: Mutex<VecDeque<Task>>,
    notify: Notify,
}

impl Queue {
    fn new() -> Self {
        Self { tasks: Mutex::new(VecDeque::new()), notify: Notify::new() }
    }

    async fn push(&self, task: Task) {
        self.tasks.lock().await.push_back(task);
        self.notify.notify_one();
    }

    async fn push_front(&self, task: Task) {
        self.tasks.lock().await.push_front(task);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Task {
        loop {
            if let Some(task) = self.tasks.lock().await.pop_front() {
                return task;
            }
            self.notify.notified().await;
        }
    }

    async fn depth(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerPoolMetrics {
    pub total_workers: usize,
    pub active_workers: usize,
    pub idle_workers: usize,
    pub queue_depth: usize,
}

/// Parallel transform executor (C5).
pub struct WorkerPool {
    queue: Arc<Queue>,
    shutdown: CancellationToken,
    total_workers: usize,
    active_workers: Arc<AtomicUsize>,
    max_attempts: u32,
}

impl WorkerPool {
    pub fn new(size: usize, max_attempts: u32) -> Self {
        let queue = Arc::new(Queue::new());
        let shutdown = CancellationToken::new();
        let active_workers = Arc::new(AtomicUsize::new(0));

        for worker_id in 0..size.max(1) {
            spawn_supervised_worker(worker_id, queue.clone(), shutdown.clone(), active_workers.clone());
        }

        Self { queue, shutdown, total_workers: size.max(1), active_workers, max_attempts }
    }

    /// Submit a raw race payload for transformation and await the result.
    /// Returns `ShutdownError` if the pool has already been told to stop.
    pub async fn exec(
        &self,
        raw: RawRaceData,
        current_time: DateTime<Utc>,
        previous_amounts: PreviousAmounts,
    ) -> Result<Result<TransformedRace, TransformError>, ShutdownError> {
        if self.shutdown.is_cancelled() {
            return Err(ShutdownError);
        }

        let (tx, rx) = oneshot::channel();
        let task = Task {
            task_id: Uuid::new_v4(),
            raw,
            current_time,
            previous_amounts,
            attempt: 1,
            max_attempts: self.max_attempts,
            reply: Some(tx),
        };
        self.queue.push(task).await;

        match rx.await {
            Ok(result) => Ok(result),
            Err(_) => Err(ShutdownError),
        }
    }

    pub async fn metrics(&self) -> WorkerPoolMetrics {
        let active = self.active_workers.load(Ordering::SeqCst);
        WorkerPoolMetrics {
            total_workers: self.total_workers,
            active_workers: active,
            idle_workers: self.total_workers.saturating_sub(active),
            queue_depth: self.queue.depth().await,
        }
    }

    /// Drain outstanding calls with a shutdown error and terminate workers.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

fn spawn_supervised_worker(
    worker_id: usize,
    queue: Arc<Queue>,
    shutdown: CancellationToken,
    active_workers: Arc<AtomicUsize>,
) {
    tokio::spawn(async move {
        loop {
            let result = run_worker(worker_id, queue.clone(), shutdown.clone(), active_workers.clone()).await;
            if shutdown.is_cancelled() {
                return;
            }
            match result {
                Ok(()) => return,
                Err(panic_msg) => {
                    error!(worker_id, %panic_msg, "worker exited unexpectedly, spawning replacement");
                    continue;
                }
            }
        }
    });
}

async fn run_worker(
    _worker_id: usize,
    queue: Arc<Queue>,
    shutdown: CancellationToken,
    active_workers: Arc<AtomicUsize>,
) -> Result<(), String> {
    loop {
        let task = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            task = queue.pop() => task,
        };

        active_workers.fetch_add(1, Ordering::SeqCst);
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            transform::transform_race(&task.raw, task.current_time, &task.previous_amounts)
        }));
        active_workers.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(transformed) => {
                reply(task, Ok(transformed));
            }
            Err(panic) => {
                let message = panic_message(&panic);
                requeue_or_fail(queue.clone(), task, &message).await;
                return Err(message);
            }
        }
    }
}

async fn requeue_or_fail(queue: Arc<Queue>, mut task: Task, panic_message: &str) {
    if task.attempt < task.max_attempts {
        task.attempt += 1;
        warn!(task_id = %task.task_id, attempt = task.attempt, %panic_message, "re-queueing task after worker panic");
        queue.push_front(task).await;
    } else {
        reply(task, Err(TransformError { message: panic_message.to_string(), retriable: false }));
    }
}

fn reply(mut task: Task, result: Result<TransformedRace, TransformError>) {
    if let Some(tx) = task.reply.take() {
        let _ = tx.send(result);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawRaceData;

    fn raw_race(id: &str) -> RawRaceData {
        RawRaceData {
            race_id: id.to_string(),
            meeting_id: "m1".into(),
            country: "NZ".into(),
            category: "Thoroughbred".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn exec_returns_transformed_race() {
        let pool = WorkerPool::new(2, 2);
        let result = pool.exec(raw_race("r1"), Utc::now(), PreviousAmounts::new()).await.unwrap();
        assert!(result.is_ok());
        pool.shutdown();
    }

    #[tokio::test]
    async fn concurrent_execs_all_complete() {
        let pool = WorkerPool::new(3, 2);
        let mut handles = Vec::new();
        for i in 0..10 {
            let raw = raw_race(&format!("r{i}"));
            handles.push(pool.exec(raw, Utc::now(), PreviousAmounts::new()));
        }
        let results = futures::future::join_all(handles).await;
        assert!(results.into_iter().all(|r| r.is_ok()));
        pool.shutdown();
    }

    #[tokio::test]
    async fn metrics_report_queue_depth_and_worker_counts() {
        let pool = WorkerPool::new(2, 2);
        let metrics = pool.metrics().await;
        assert_eq!(metrics.total_workers, 2);
        pool.shutdown();
    }

    #[tokio::test]
    async fn shutdown_rejects_subsequent_submissions() {
        let pool = WorkerPool::new(1, 2);
        pool.shutdown();
        // Give the worker loop a tick to observe the cancellation.
        tokio::task::yield_now().await;
        let result = pool.exec(raw_race("r1"), Utc::now(), PreviousAmounts::new()).await;
        assert!(result.is_err());
    }
}
