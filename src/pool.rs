//! Shared execution pool for command handlers.
//!
//! Every handler body runs as one task here. The pool is bounded twice:
//! `max_workers` tasks run at once, and at most `max_workers + max_queued`
//! tasks may be in flight. Submissions past that are rejected instead of
//! queued, so a burst of envelopes cannot exhaust the process.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::error::PoolError;

/// Bounded pool of background tasks with cooperative shutdown.
#[derive(Debug, Clone)]
pub struct ExecutionPool {
    handle: Handle,
    workers: Arc<Semaphore>,
    slots: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<watch::Sender<usize>>,
    cancel: CancellationToken,
}

impl ExecutionPool {
    /// Create a pool bound to the current Tokio runtime.
    ///
    /// The runtime handle is captured here so that `submit` can be called
    /// from any thread, including ones outside the runtime.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let handle = Handle::try_current().context("Execution pool requires a Tokio runtime")?;
        Ok(Self::with_handle(config, handle))
    }

    pub fn with_handle(config: &PoolConfig, handle: Handle) -> Self {
        let max_workers = config.max_workers.max(1);
        let capacity = max_workers + config.max_queued;
        let (in_flight, _) = watch::channel(0);
        Self {
            handle,
            workers: Arc::new(Semaphore::new(max_workers)),
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(in_flight),
            cancel: CancellationToken::new(),
        }
    }

    /// Submit a task without blocking.
    ///
    /// Fails with [`PoolError::Saturated`] when the pool is at capacity and
    /// [`PoolError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub fn submit<F>(&self, label: impl Into<String>, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(PoolError::ShutDown);
        }
        let slot = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => PoolError::Saturated {
                    capacity: self.capacity,
                },
                TryAcquireError::Closed => PoolError::ShutDown,
            })?;

        let label = label.into();
        let workers = Arc::clone(&self.workers);
        let in_flight = InFlight::enter(Arc::clone(&self.in_flight));

        self.handle.spawn(async move {
            let _slot = slot;
            let _in_flight = in_flight;
            match workers.acquire_owned().await {
                Ok(_worker) => {
                    debug!(task = %label, "Task started");
                    task.await;
                    debug!(task = %label, "Task finished");
                }
                Err(_) => warn!(task = %label, "Pool closed before task could start"),
            }
        });
        Ok(())
    }

    /// Token cancelled by [`shutdown`](Self::shutdown). Long-running tasks
    /// select on it to stop early.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Number of tasks queued or running.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resolve once no task is queued or running.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Stop accepting work and cancel running tasks cooperatively.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.slots.close();
        self.workers.close();
    }
}

/// Keeps the in-flight counter accurate even when a task panics.
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn enter(counter: Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|count| *count += 1);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|count| *count = count.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn pool(max_workers: usize, max_queued: usize) -> ExecutionPool {
        ExecutionPool::new(&PoolConfig {
            max_workers,
            max_queued,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn runs_submitted_tasks() {
        let pool = pool(2, 2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            pool.submit("count", async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn rejects_when_saturated() {
        let pool = pool(1, 1);
        assert_eq!(pool.capacity(), 2);

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (second_tx, second_rx) = oneshot::channel::<()>();
        pool.submit("blocker", async move {
            let _ = release_rx.await;
        })
        .unwrap();
        pool.submit("queued", async move {
            let _ = second_rx.await;
        })
        .unwrap();

        let err = pool.submit("overflow", async {}).unwrap_err();
        assert_eq!(err, PoolError::Saturated { capacity: 2 });

        release_tx.send(()).unwrap();
        second_tx.send(()).unwrap();
        pool.wait_idle().await;

        // Capacity is released once the tasks finish.
        pool.submit("after", async {}).unwrap();
        pool.wait_idle().await;
    }

    #[tokio::test]
    async fn limits_concurrency_to_max_workers() {
        let pool = pool(2, 8);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit("busy", async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.wait_idle().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn shutdown_rejects_and_cancels() {
        let pool = pool(1, 0);
        let token = pool.cancellation();
        let (done_tx, done_rx) = oneshot::channel();
        pool.submit("waits-for-cancel", async move {
            token.cancelled().await;
            let _ = done_tx.send(());
        })
        .unwrap();

        pool.shutdown();
        done_rx.await.unwrap();
        assert_eq!(pool.submit("late", async {}), Err(PoolError::ShutDown));
        pool.wait_idle().await;
    }

    #[tokio::test]
    async fn panicking_task_releases_its_slot() {
        let pool = pool(1, 0);
        pool.submit("panics", async { panic!("boom") }).unwrap();
        pool.wait_idle().await;
        pool.submit("next", async {}).unwrap();
        pool.wait_idle().await;
    }
}
