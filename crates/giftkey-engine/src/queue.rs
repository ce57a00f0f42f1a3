//! Strictly ordered, single-consumer action queue.
//!
//! `enqueue` never blocks. A consumer task pulls jobs in order and runs each
//! one to completion before starting the next. Each job runs in its own task
//! so an error or a panic is logged and the consumer moves on.
use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use tokio::sync::{mpsc, oneshot};
use tracing::{error, trace, warn};

use crate::{Error, Result};

/// A boxed unit of work.
type Task = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A labelled task.
struct Job {
    /// Short description for logs.
    label: String,
    /// The work.
    task: Task,
}

/// Handle to the queue; cheap to clone.
#[derive(Clone)]
pub struct ActionQueue {
    /// Job submission.
    tx: mpsc::UnboundedSender<Job>,
    /// Jobs submitted but not finished.
    pending: Arc<AtomicUsize>,
}

impl ActionQueue {
    /// Create a queue and spawn its consumer on the current runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let counter = pending.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let Job { label, task } = job;
                trace!(%label, "queue_job_start");
                match tokio::spawn(task).await {
                    Ok(Ok(())) => trace!(%label, "queue_job_done"),
                    Ok(Err(e)) => warn!(%label, error = %e, "queue_job_failed"),
                    Err(e) => error!(%label, error = %e, "queue_job_panicked"),
                }
                counter.fetch_sub(1, Ordering::SeqCst);
            }
            trace!("queue_consumer_exit");
        });
        Self { tx, pending }
    }

    /// Append a task. Returns immediately.
    pub fn enqueue<F>(&self, label: impl Into<String>, fut: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let job = Job {
            label: label.into(),
            task: Box::pin(fut),
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            Error::QueueClosed
        })
    }

    /// Jobs enqueued but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Resolve once every job enqueued before this call has finished.
    pub async fn drained(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        self.enqueue("drain_marker", async move {
            // Receiver may have given up; nothing to do then.
            let _ignored = done_tx.send(());
            Ok(())
        })?;
        done_rx.await.map_err(|_| Error::QueueClosed)
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}
