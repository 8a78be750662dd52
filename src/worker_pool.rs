//! Generic worker pool, per spec §9 ("a trivially generic primitive"):
//! a bounded job queue drained by a fixed number of workers, with
//! graceful drain-on-stop.
//!
//! `async_channel` is used instead of `tokio::sync::mpsc` because its
//! `Receiver` is `Clone` and can be awaited from many tasks at once —
//! `mpsc::Receiver` cannot, and this pool needs exactly that to share one
//! queue across N workers. Grounded on the worker/channel shape in
//! `other_examples/..atlas-indexer..`.

use async_channel::{bounded, Receiver, Sender};
use tokio::task::JoinSet;

/// A bounded pool of `N` workers pulling jobs of type `J` off a shared
/// queue. `JoinSet` plays the role of a `sync.WaitGroup`: `stop` closes
/// the queue, then awaits every worker's in-flight job to finish.
pub struct Pool<J> {
    sender: Sender<J>,
    workers: JoinSet<()>,
}

impl<J> Pool<J>
where
    J: Send + 'static,
{
    /// Spawns `worker_count` tasks, each looping `handler(job)` until the
    /// queue is closed. `capacity` bounds how many jobs can be queued
    /// ahead of the workers (backpressure on the producer).
    pub fn new<F, Fut>(worker_count: usize, capacity: usize, handler: F) -> Self
    where
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (sender, receiver): (Sender<J>, Receiver<J>) = bounded(capacity);
        let handler = std::sync::Arc::new(handler);

        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            let receiver = receiver.clone();
            let handler = handler.clone();
            workers.spawn(async move {
                while let Ok(job) = receiver.recv().await {
                    handler(job).await;
                }
            });
        }

        Pool { sender, workers }
    }

    /// Enqueues a job, waiting for room if the queue is full.
    pub async fn submit(&self, job: J) -> Result<(), async_channel::SendError<J>> {
        self.sender.send(job).await
    }

    /// Closes the queue and waits for every worker to drain its
    /// in-flight job and exit.
    pub async fn stop(mut self) {
        self.sender.close();
        while self.workers.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn every_submitted_job_runs_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let pool = Pool::new(4, 16, move |job: usize| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(job, Ordering::SeqCst);
            }
        });

        for i in 1..=100usize {
            pool.submit(i).await.unwrap();
        }
        pool.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), (1..=100).sum::<usize>());
    }
}
