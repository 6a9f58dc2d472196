//! Observer task dispatcher.
//!
//! Runs observer callbacks on a dedicated task so the receive loop never
//! executes, or waits on, user code.
//!
//! # Scheduling
//!
//! One worker task owns a `FuturesUnordered` of in-flight jobs and a queue
//! of submitted ones. A job that suspends (for example, a callback that
//! issues its own request on the connection) does not hold up jobs queued
//! behind it.
//!
//! Synchronous observers reach the worker already wrapped in
//! `spawn_blocking`, so a blocking callback parks only its own job.
//!
//! Failures are contained at the job boundary: returned errors and panics
//! are logged and never reach the submitter.

// ============================================================================
// Imports
// ============================================================================

use std::panic::AssertUnwindSafe;

use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::error::Result;

// ============================================================================
// Types
// ============================================================================

/// A scheduled observer invocation.
pub(crate) struct Job {
    /// Event method, for log context.
    pub(crate) method: String,
    /// The callback's future.
    pub(crate) task: BoxFuture<'static, Result<()>>,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Owns the worker task running observer callbacks.
///
/// Lifecycle: [`Dispatcher::start`], any number of [`Dispatcher::submit`],
/// then [`Dispatcher::stop`].
pub(crate) struct Dispatcher {
    /// Job queue; `None` after stop.
    queue: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    /// Stop signal for the worker.
    stop: watch::Sender<bool>,
}

impl Dispatcher {
    /// Spawns the worker task.
    ///
    /// Must be called within a tokio runtime.
    pub(crate) fn start() -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        tokio::spawn(Self::run(queue_rx, stop_rx));

        Self {
            queue: Mutex::new(Some(queue_tx)),
            stop: stop_tx,
        }
    }

    /// Queues a job. Never blocks.
    ///
    /// Returns `false` if the dispatcher was stopped and the job dropped.
    pub(crate) fn submit(&self, job: Job) -> bool {
        match self.queue.lock().as_ref() {
            Some(queue) => queue.send(job).is_ok(),
            None => {
                debug!(method = %job.method, "Dispatcher stopped, dropping job");
                false
            }
        }
    }

    /// Stops the worker.
    ///
    /// Queued and in-flight jobs are dropped. Does not wait for the worker,
    /// so it is safe to call from inside a job. Idempotent.
    pub(crate) fn stop(&self) {
        let already_stopped = self.stop.send_replace(true);
        self.queue.lock().take();

        if !already_stopped {
            debug!("Dispatcher stopped");
        }
    }

    /// Returns `true` once [`Dispatcher::stop`] was called.
    pub(crate) fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Worker loop.
    async fn run(mut queue: mpsc::UnboundedReceiver<Job>, mut stop: watch::Receiver<bool>) {
        let mut in_flight = FuturesUnordered::new();

        loop {
            tokio::select! {
                biased;

                _ = stop.wait_for(|stopped| *stopped) => break,

                job = queue.recv() => match job {
                    Some(job) => in_flight.push(Self::contain(job)),
                    None => break,
                },

                Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
            }
        }

        debug!(dropped = in_flight.len(), "Dispatcher worker exited");
    }

    /// Wraps a job so that errors and panics end at the job boundary.
    async fn contain(job: Job) {
        let Job { method, task } = job;

        match AssertUnwindSafe(task).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%method, error = %e, "Observer callback failed"),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(%method, panic = %message, "Observer callback panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================
