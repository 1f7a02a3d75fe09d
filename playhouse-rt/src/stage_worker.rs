//! A fixed pool of dedicated OS threads, each driving a single-threaded
//! tokio runtime plus a [`tokio::task::LocalSet`], so `!Send` [`crate::stage::Stage`]
//! futures can run without ever crossing a `tokio::spawn`'s `Send` bound.
//!
//! Grounded on tokio's own documented pattern for combining a multi-thread
//! application with `!Send` work: a dedicated thread owning a
//! `current_thread` runtime and a `LocalSet`. This is the one place
//! genuine OS-thread parallelism enters stage scheduling (§5 "parallel
//! across stages, cooperative single-threaded within a stage").

// Layer 1: Standard library imports
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

// Layer 2: Third-party crate imports
use tokio::sync::mpsc;
use tracing::error;

/// A job handed to a worker thread: constructs and spawns whatever `!Send`
/// future it wants entirely on that thread, so the closure itself only
/// needs to be `Send`, not its eventual output.
type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()>>> + Send + 'static>;

/// One worker thread's mailbox.
struct Worker {
    tx: mpsc::UnboundedSender<Job>,
}

/// Round-robin pool of [`Worker`] threads that stage creation is spread
/// across (§4.8 "create stage ... spawn the executor").
pub struct StageWorkerPool {
    workers: Vec<Worker>,
    next: AtomicUsize,
}

impl StageWorkerPool {
    /// Spin up `worker_count` dedicated threads, each running its own
    /// `LocalSet` until the pool (and every clone of its job senders) is
    /// dropped.
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let workers = (0..worker_count).map(|index| spawn_worker(index)).collect();
        Self {
            workers,
            next: AtomicUsize::new(0),
        }
    }

    /// Hand a job to the next worker in round-robin order. The job
    /// constructs and `spawn_local`s its future once it runs on that
    /// worker's thread.
    pub fn spawn<F, Fut>(&self, build: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let job: Job = Box::new(move || Box::pin(build()));
        if self.workers[index].tx.send(job).is_err() {
            error!(worker = index, "stage worker thread gone, job dropped");
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

#[allow(clippy::expect_used)]
fn spawn_worker(index: usize) -> Worker {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    std::thread::Builder::new()
        .name(format!("playhouse-stage-worker-{index}"))
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build stage worker runtime");
            let local = tokio::task::LocalSet::new();
            local.block_on(&runtime, async move {
                while let Some(job) = rx.recv().await {
                    tokio::task::spawn_local(job());
                }
            });
        })
        .expect("failed to spawn stage worker thread");
    Worker { tx }
}
