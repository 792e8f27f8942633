//! Execution contexts for asynchronous renders
//!
//! The pool owns no threads. [`TilePool::render_async`](super::TilePool::render_async)
//! hands its work to whatever [`Executor`] the caller supplies.

use std::sync::Arc;
use std::thread::JoinHandle;

use flume::{Receiver, Sender};
use log::{debug, warn};

/// Unit of work submitted by the pool
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs somewhere, now or later
pub trait Executor {
    fn execute(&self, job: Job);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) {
        (**self).execute(job);
    }
}

impl<E: Executor + ?Sized> Executor for &E {
    fn execute(&self, job: Job) {
        (**self).execute(job);
    }
}

/// Runs each job immediately on the submitting thread
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }
}

impl Executor for rayon::ThreadPool {
    fn execute(&self, job: Job) {
        self.spawn(job);
    }
}

enum Message {
    Run(Job),
    Shutdown,
}

/// Fixed set of threads pulling jobs from one shared queue.
///
/// Dropping the pool asks every worker to stop once the jobs queued before
/// the drop have run, and joins them.
pub struct WorkerPool {
    tx: Sender<Message>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers (at least one)
    #[must_use]
    pub fn new(threads: usize) -> Self {
        // Workers share one receiver, which needs an MPMC channel
        let (tx, rx) = flume::unbounded();

        let workers = (0..threads.max(1))
            .filter_map(|i| {
                let rx: Receiver<Message> = rx.clone();
                std::thread::Builder::new()
                    .name(format!("tessera-worker-{i}"))
                    .spawn(move || worker_loop(&rx))
                    .map_err(|e| warn!("Failed to spawn render worker {i}: {e}"))
                    .ok()
            })
            .collect();

        Self { tx, workers }
    }

    /// Number of live worker threads
    #[must_use]
    pub fn threads(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(rx: &Receiver<Message>) {
    for message in rx.iter() {
        match message {
            Message::Run(job) => job(),
            Message::Shutdown => break,
        }
    }
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) {
        if self.tx.send(Message::Run(job)).is_err() {
            warn!("Render worker queue closed, dropping job");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for _ in 0..self.workers.len() {
            let _ = self.tx.send(Message::Shutdown);
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Render worker panicked");
            }
        }
        debug!("Render workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn inline_runs_before_returning() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        InlineExecutor.execute(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn worker_pool_runs_all_jobs_before_shutdown() {
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(3);
            assert_eq!(pool.threads(), 3);
            for _ in 0..20 {
                let h = hits.clone();
                pool.execute(Box::new(move || {
                    h.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
        assert_eq!(hits.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn rayon_pool_is_an_executor() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .unwrap();
        let (tx, rx) = flume::bounded(1);
        pool.execute(Box::new(move || {
            let _ = tx.send(42);
        }));
        assert_eq!(rx.recv().unwrap(), 42);
    }
}
