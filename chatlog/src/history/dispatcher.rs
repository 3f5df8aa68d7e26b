//! Serialized access to the history store.
//!
//! The [`Dispatcher`] owns the [`Store`] on a dedicated worker thread and
//! runs submitted units one at a time, in submission order. It is the only
//! synchronization point for history data: units never interleave and never
//! observe each other's partial effects.
//!
//! Three submission modes are offered:
//!
//! - [`submit`](Dispatcher::submit): fire and forget. Failures are logged
//!   and dropped.
//! - [`submit_sync`](Dispatcher::submit_sync): block the calling thread
//!   until the unit has run and return its result.
//! - [`submit_async`](Dispatcher::submit_async): await the result from an
//!   async task without blocking a runtime thread.
//!
//! Calling `submit_sync` from inside a unit would wait on the very thread
//! that has to run it. That is detected and reported as
//! [`HistoryError::Reentrant`].
//!
//! Units still queued behind a shutdown request are not run. Each is handed
//! `None` instead of the store, so callers waiting on a result see
//! [`HistoryError::WorkerUnavailable`] and fire-and-forget units are logged.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::HistoryError;
use super::store::Store;

/// A unit of work executed on the history worker. Receives `None` when the
/// worker stopped before reaching it.
type Unit = Box<dyn FnOnce(Option<&mut Store>) + Send>;

enum Job {
    Run(Unit),
    Shutdown,
}

/// Single-worker queue that linearizes every store operation.
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl Dispatcher {
    /// Moves `store` onto a new worker thread and starts processing units.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Spawn`] if the worker thread cannot be started.
    pub fn spawn(store: Store) -> Result<Self, HistoryError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = thread::Builder::new()
            .name("chat-history".to_string())
            .spawn(move || run_worker(store, rx))
            .map_err(HistoryError::Spawn)?;
        let worker_id = handle.thread().id();
        Ok(Self {
            tx,
            worker: Mutex::new(Some(handle)),
            worker_id,
        })
    }

    /// Whether the current thread is the history worker.
    #[must_use]
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Enqueues a unit and returns immediately.
    ///
    /// Errors returned by the unit are logged under `label` and dropped.
    pub fn submit<F>(&self, label: &'static str, unit: F)
    where
        F: FnOnce(&mut Store) -> Result<(), HistoryError> + Send + 'static,
    {
        let job = Box::new(move |store: Option<&mut Store>| match store {
            Some(store) => {
                if let Err(err) = unit(store) {
                    tracing::error!(unit = label, error = %err, "history unit failed");
                }
            }
            None => tracing::warn!(unit = label, "history worker stopped, dropping unit"),
        });
        if self.enqueue(job).is_err() {
            tracing::warn!(unit = label, "history worker stopped, dropping unit");
        }
    }

    /// Runs a unit and blocks until its result is available.
    ///
    /// Must not be called from async code running on a runtime thread; use
    /// [`submit_async`](Self::submit_async) there.
    ///
    /// # Errors
    ///
    /// Returns the unit's own error, [`HistoryError::Reentrant`] when called
    /// from inside another unit, [`HistoryError::WorkerUnavailable`] after
    /// shutdown, or [`HistoryError::UnitPanicked`] if the unit panicked.
    pub fn submit_sync<T, F>(&self, unit: F) -> Result<T, HistoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Store) -> Result<T, HistoryError> + Send + 'static,
    {
        if self.is_worker_thread() {
            tracing::error!("synchronous history call issued from inside a history unit");
            return Err(HistoryError::Reentrant);
        }

        let (reply_tx, reply_rx) = std::sync::mpsc::sync_channel(1);
        self.enqueue(Box::new(move |store: Option<&mut Store>| {
            let result = store.map_or(Err(HistoryError::WorkerUnavailable), unit);
            // The caller may have given up; nothing to do then.
            let _ = reply_tx.send(result);
        }))?;
        reply_rx.recv().map_err(|_| HistoryError::UnitPanicked)?
    }

    /// Runs a unit and resolves to its result without blocking the caller.
    ///
    /// # Errors
    ///
    /// Returns the unit's own error, [`HistoryError::WorkerUnavailable`]
    /// after shutdown, or [`HistoryError::UnitPanicked`] if the unit panicked.
    pub async fn submit_async<T, F>(&self, unit: F) -> Result<T, HistoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Store) -> Result<T, HistoryError> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(Box::new(move |store: Option<&mut Store>| {
            let _ = reply_tx.send(store.map_or(Err(HistoryError::WorkerUnavailable), unit));
        }))?;
        reply_rx.await.map_err(|_| HistoryError::UnitPanicked)?
    }

    /// Lets queued units finish, then stops the worker.
    ///
    /// Later submissions fail with [`HistoryError::WorkerUnavailable`],
    /// including those that race with this call.
    /// Calling this more than once is harmless.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Job::Shutdown);
        if self.is_worker_thread() {
            // Joining ourselves would never return; the worker exits once the
            // current unit completes.
            return;
        }
        if let Some(handle) = self.worker.lock().take()
            && handle.join().is_err()
        {
            tracing::error!("history worker terminated abnormally");
        }
    }

    fn enqueue(&self, unit: Unit) -> Result<(), HistoryError> {
        self.tx
            .send(Job::Run(unit))
            .map_err(|_| HistoryError::WorkerUnavailable)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(mut store: Store, mut rx: mpsc::UnboundedReceiver<Job>) {
    tracing::debug!("history worker started");
    while let Some(job) = rx.blocking_recv() {
        match job {
            Job::Run(unit) => {
                if catch_unwind(AssertUnwindSafe(|| unit(Some(&mut store)))).is_err() {
                    tracing::error!("history unit panicked");
                }
            }
            Job::Shutdown => break,
        }
    }
    rx.close();
    let mut rejected = 0_usize;
    while let Ok(job) = rx.try_recv() {
        if let Job::Run(unit) = job {
            unit(None);
            rejected += 1;
        }
    }
    tracing::debug!(rejected, "history worker stopped");
}
