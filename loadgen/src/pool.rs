//! Bounded fan-out of upload tasks to a fixed set of workers.
//!
//! Workers are started before the first task is submitted and share a single bounded queue with a
//! capacity equal to the number of workers. Submitting to a full queue waits, which bounds the
//! number of in-flight tasks no matter how many are generated. Closing the queue is the only
//! termination signal: each worker drains what is left and exits, and [`WorkerPool::join`]
//! collects every worker's outcomes.
//!
//! A failed upload is logged and recorded, and the worker moves on to the next task.

use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;

use crate::task::Task;
use crate::upload::{UploadError, UploadKind, Uploader};

/// The result of uploading one task.
#[derive(Debug)]
pub struct TaskOutcome {
    /// Index of the worker that handled the task.
    pub worker: usize,
    /// Key of the uploaded object.
    pub key: String,
    /// Requested size of the object.
    pub size: u64,
    /// Time spent on the upload, including all protocol steps.
    pub elapsed: Duration,
    /// How the upload went.
    pub result: Result<UploadKind, UploadError>,
}

impl TaskOutcome {
    /// Returns `true` if the object was written.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Returns the number of workers to start for a run.
///
/// This never exceeds the number of tasks, and is at least one whenever there is a task to run.
pub fn effective_worker_count(configured: usize, total_tasks: usize) -> usize {
    configured.max(1).min(total_tasks)
}

/// A fixed set of workers consuming tasks from a bounded queue.
#[derive(Debug)]
pub struct WorkerPool {
    sender: Sender<Task>,
    workers: Vec<JoinHandle<Vec<TaskOutcome>>>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers onto the current tokio runtime.
    ///
    /// With zero workers the queue is closed right away and every submission is rejected.
    pub fn start(worker_count: usize, uploader: Uploader) -> Self {
        let (sender, receiver) = async_channel::bounded(worker_count.max(1));

        let workers = (0..worker_count)
            .map(|worker| {
                let receiver = receiver.clone();
                let uploader = uploader.clone();
                tokio::spawn(worker_loop(worker, receiver, uploader))
            })
            .collect();

        Self { sender, workers }
    }

    /// The number of running workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// The maximum number of queued tasks.
    pub fn capacity(&self) -> usize {
        self.sender.capacity().unwrap_or_default()
    }

    /// Enqueues a task, waiting while the queue is full.
    ///
    /// Returns the task back if no worker is left to receive it.
    pub async fn submit(&self, task: Task) -> Result<(), Task> {
        self.sender.send(task).await.map_err(|err| err.into_inner())
    }

    /// Closes the queue and waits for all workers to drain it.
    ///
    /// Outcomes are returned in no particular order. Outcomes of a worker that panicked are lost.
    pub async fn join(self) -> Vec<TaskOutcome> {
        let Self { sender, workers } = self;
        sender.close();
        drop(sender);

        let mut outcomes = Vec::new();
        for (worker, finished) in futures::future::join_all(workers)
            .await
            .into_iter()
            .enumerate()
        {
            match finished {
                Ok(worker_outcomes) => outcomes.extend(worker_outcomes),
                Err(err) => tracing::error!(worker, error = %err, "upload worker panicked"),
            }
        }
        outcomes
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Receiver<Task>,
    uploader: Uploader,
) -> Vec<TaskOutcome> {
    let mut outcomes = Vec::new();

    while let Ok(task) = receiver.recv().await {
        tracing::info!(worker, %task, "upload");

        let start = Instant::now();
        let result = uploader.upload(&task).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(kind) => tracing::debug!(worker, %task, ?kind, ?elapsed, "upload finished"),
            Err(err) => tracing::error!(
                worker,
                %task,
                error = err as &dyn std::error::Error,
                state = %err.failed_in(),
                "upload failed"
            ),
        }

        outcomes.push(TaskOutcome {
            worker,
            key: task.key,
            size: task.size,
            elapsed,
            result,
        });
    }

    tracing::debug!(worker, handled = outcomes.len(), "upload worker exiting");
    outcomes
}

/// Uploads `total_tasks` tasks from `tasks` using at most `worker_count` workers.
///
/// The pool is sized with [`effective_worker_count`]. Individual failures never stop the run; they
/// show up as failed [`TaskOutcome`]s. If `tasks` yields fewer than `total_tasks` items, the run
/// ends early with what was produced.
pub async fn run<I>(
    total_tasks: usize,
    worker_count: usize,
    tasks: I,
    uploader: Uploader,
) -> Vec<TaskOutcome>
where
    I: IntoIterator<Item = Task>,
{
    let worker_count = effective_worker_count(worker_count, total_tasks);
    if worker_count == 0 {
        return Vec::new();
    }

    tracing::info!(total_tasks, worker_count, "starting upload workers");
    let pool = WorkerPool::start(worker_count, uploader);

    for task in tasks.into_iter().take(total_tasks) {
        if let Err(task) = pool.submit(task).await {
            tracing::error!(%task, "upload queue closed unexpectedly");
            break;
        }
    }

    pool.join().await
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::sampler::Sampler;
    use crate::store::InMemoryStore;
    use crate::upload::UploadSettings;

    fn uploader(store: &InMemoryStore) -> Uploader {
        Uploader::new(Arc::new(store.clone()), UploadSettings::default())
    }

    fn tasks(total: usize, size: u64) -> Vec<Task> {
        Sampler::builder("bucket")
            .run_timestamp(100)
            .sizes([size])
            .delete_after_days(["7"])
            .build()
            .tasks(total)
            .collect()
    }

    #[test]
    fn worker_count_is_bounded_by_tasks() {
        assert_eq!(effective_worker_count(10, 5), 5);
        assert_eq!(effective_worker_count(2, 3), 2);
        assert_eq!(effective_worker_count(0, 3), 1);
        assert_eq!(effective_worker_count(4, 0), 0);
    }

    #[tokio::test]
    async fn no_tasks_no_workers() {
        let store = InMemoryStore::new();
        let outcomes = run(0, 8, Vec::new(), uploader(&store)).await;
        assert!(outcomes.is_empty());
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn pool_is_sized_by_workers() {
        let store = InMemoryStore::new();
        let pool = WorkerPool::start(3, uploader(&store));
        assert_eq!(pool.worker_count(), 3);
        assert_eq!(pool.capacity(), 3);
        assert!(pool.join().await.is_empty());
    }

    #[tokio::test]
    async fn empty_pool_rejects_tasks() {
        let store = InMemoryStore::new();
        let pool = WorkerPool::start(0, uploader(&store));
        // the pool's own receiver was dropped, so the queue is already closed
        let task = tasks(1, 1).remove(0);
        assert_eq!(pool.submit(task.clone()).await, Err(task));
        assert!(pool.join().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_workers_three_tasks() {
        let store = InMemoryStore::new();
        let outcomes = run(3, 2, tasks(3, 1024 * 1024), uploader(&store)).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(TaskOutcome::is_success));
        let workers: HashSet<_> = outcomes.iter().map(|o| o.worker).collect();
        assert!(workers.len() <= 2);

        for idx in 0..3 {
            let object = store.object("bucket", &format!("100-{idx}")).unwrap();
            assert_eq!(object.size, 1_048_576);
        }
    }

    #[tokio::test]
    async fn more_workers_than_tasks() {
        let store = InMemoryStore::new();
        let outcomes = run(5, 10, tasks(5, 10), uploader(&store)).await;

        assert_eq!(outcomes.len(), 5);
        assert!(outcomes.iter().all(|o| o.worker < 5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failures_do_not_stop_the_run() {
        let store = InMemoryStore::new();
        store.fail_put("100-1");
        store.fail_put("100-4");

        let outcomes = run(20, 4, tasks(20, 100), uploader(&store)).await;

        assert_eq!(outcomes.len(), 20);
        let failed: HashSet<_> = outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.key.as_str())
            .collect();
        assert_eq!(failed, HashSet::from(["100-1", "100-4"]));
        assert_eq!(store.object_count(), 18);
    }

    #[tokio::test]
    async fn short_task_stream_ends_early() {
        let store = InMemoryStore::new();
        let outcomes = run(10, 2, tasks(4, 1), uploader(&store)).await;
        assert_eq!(outcomes.len(), 4);
    }

    #[tokio::test]
    async fn keys_stay_unique_across_workers() {
        let store = InMemoryStore::new();
        let outcomes = run(50, 8, tasks(50, 1), uploader(&store)).await;

        let keys: HashSet<_> = outcomes.iter().map(|o| o.key.clone()).collect();
        assert_eq!(keys.len(), 50);
        assert_eq!(store.object_count(), 50);
    }
}
