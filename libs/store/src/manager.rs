// [libs/store/src/manager.rs]
//! StoreManager: serialized, two-priority execution of closures against a
//! single-writer embedded store (§4.1). Exactly one closure runs at a time;
//! the high-priority queue starves the low-priority one. This is the only
//! component in the controller permitted to touch a `StoreHandle` directly —
//! everything else (DeltaAggregator, RosterReconciler, LifecycleController,
//! IPStore, the HTTP handlers) submits work here instead of opening its own
//! connection.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as SyncMutex;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::StoreError;
use crate::handle::StoreHandle;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
/// `Fn`, not `FnOnce`: a job may be invoked more than once by the retry loop
/// in `run_job` when it fails with a retryable error (§4.1), so closures
/// submitted to `execute_high`/`execute_low` must not consume their captures.
type JobFn = Box<dyn Fn(StoreHandle) -> BoxFuture<'static, Result<(), StoreError>> + Send>;

struct JobEnvelope {
    job: JobFn,
    result_tx: oneshot::Sender<Result<(), StoreError>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Priority {
    High,
    Low,
}

/// Tuning knobs from §4.1 / §10.3; all have the defaults the spec states.
#[derive(Debug, Clone)]
pub struct StoreManagerConfig {
    pub high_queue_capacity: usize,
    pub low_queue_capacity: usize,
    pub high_send_timeout: Duration,
    pub low_send_timeout: Duration,
    pub high_wait_timeout: Duration,
    pub low_wait_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub shutdown_drain_timeout: Duration,
}

impl Default for StoreManagerConfig {
    fn default() -> Self {
        Self {
            high_queue_capacity: 256,
            low_queue_capacity: 256,
            high_send_timeout: Duration::from_secs(1),
            low_send_timeout: Duration::from_secs(2),
            high_wait_timeout: Duration::from_secs(3),
            low_wait_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            shutdown_drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Serial, priority-ordered access to the store. Cloneable: every clone
/// shares the same queues and the same shutdown state.
#[derive(Clone)]
pub struct StoreManager {
    high_tx: std::sync::Arc<SyncMutex<Option<mpsc::Sender<JobEnvelope>>>>,
    low_tx: std::sync::Arc<SyncMutex<Option<mpsc::Sender<JobEnvelope>>>>,
    closed: std::sync::Arc<AtomicBool>,
    worker: std::sync::Arc<AsyncMutex<Option<JoinHandle<()>>>>,
    config: StoreManagerConfig,
}

impl StoreManager {
    /// Spawns the single worker task that owns `handle` for the lifetime of
    /// the manager. §4.1 mandates a worker count of 1 — the embedded store
    /// requires a single writer lane.
    pub fn spawn(handle: StoreHandle, config: StoreManagerConfig) -> Self {
        let (high_tx, high_rx) = mpsc::channel(config.high_queue_capacity);
        let (low_tx, low_rx) = mpsc::channel(config.low_queue_capacity);

        let max_retries = config.max_retries;
        let retry_backoff = config.retry_backoff;

        let worker = tokio::spawn(run_worker(handle, high_rx, low_rx, max_retries, retry_backoff));

        Self {
            high_tx: std::sync::Arc::new(SyncMutex::new(Some(high_tx))),
            low_tx: std::sync::Arc::new(SyncMutex::new(Some(low_tx))),
            closed: std::sync::Arc::new(AtomicBool::new(false)),
            worker: std::sync::Arc::new(AsyncMutex::new(Some(worker))),
            config,
        }
    }

    /// Submits `job` on the high-priority lane. Starves low-priority work
    /// while the high queue is non-empty.
    pub async fn execute_high<F, Fut>(&self, job: F) -> Result<(), StoreError>
    where
        F: Fn(StoreHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        self.submit(
            Priority::High,
            Box::new(move |handle| Box::pin(job(handle))),
            self.config.high_send_timeout,
            self.config.high_wait_timeout,
        )
        .await
    }

    /// Submits `job` on the low-priority lane (reads, in practice).
    pub async fn execute_low<F, Fut>(&self, job: F) -> Result<(), StoreError>
    where
        F: Fn(StoreHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        self.submit(
            Priority::Low,
            Box::new(move |handle| Box::pin(job(handle))),
            self.config.low_send_timeout,
            self.config.low_wait_timeout,
        )
        .await
    }

    /// Runs a value-returning closure on the low-priority lane. `execute_low`
    /// only reports success/failure because a job may be replayed by the
    /// retry loop; this wraps that contract with a slot the job stashes its
    /// result into on its final (non-retried) success, for read paths like
    /// the HTTP API and test assertions that need data back (§6).
    pub async fn query_low<T, F, Fut>(&self, job: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: Fn(StoreHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        self.query(Priority::Low, job).await
    }

    /// As `query_low`, but on the high-priority lane.
    pub async fn query_high<T, F, Fut>(&self, job: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: Fn(StoreHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        self.query(Priority::High, job).await
    }

    async fn query<T, F, Fut>(&self, priority: Priority, job: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: Fn(StoreHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let slot: std::sync::Arc<SyncMutex<Option<T>>> = std::sync::Arc::new(SyncMutex::new(None));
        let slot_for_job = slot.clone();

        let wrapped = move |handle: StoreHandle| {
            let slot = slot_for_job.clone();
            let fut = job(handle);
            Box::pin(async move {
                let value = fut.await?;
                *slot.lock().unwrap() = Some(value);
                Ok(())
            }) as BoxFuture<'static, Result<(), StoreError>>
        };

        let (send_timeout, wait_timeout) = match priority {
            Priority::High => (self.config.high_send_timeout, self.config.high_wait_timeout),
            Priority::Low => (self.config.low_send_timeout, self.config.low_wait_timeout),
        };

        self.submit(priority, Box::new(wrapped), send_timeout, wait_timeout).await?;

        Ok(slot
            .lock()
            .unwrap()
            .take()
            .expect("query job completed successfully but left no result"))
    }

    async fn submit(
        &self,
        priority: Priority,
        job: JobFn,
        send_timeout: Duration,
        wait_timeout: Duration,
    ) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::ShuttingDown);
        }

        let tx = {
            let guard = match priority {
                Priority::High => self.high_tx.lock().unwrap(),
                Priority::Low => self.low_tx.lock().unwrap(),
            };
            guard.clone()
        }
        .ok_or(StoreError::ShuttingDown)?;

        let (result_tx, result_rx) = oneshot::channel();
        let envelope = JobEnvelope { job, result_tx };

        tokio::time::timeout(send_timeout, tx.send(envelope))
            .await
            .map_err(|_| StoreError::SendTimeout)?
            .map_err(|_| StoreError::ShuttingDown)?;

        tokio::time::timeout(wait_timeout, result_rx)
            .await
            .map_err(|_| StoreError::WaitTimeout)?
            .map_err(|_| StoreError::ChannelClosed)?
    }

    /// Stops accepting new submissions immediately, waits up to the
    /// configured drain timeout for in-flight queues to empty, then forces
    /// channel closure so the worker task can join.
    pub async fn close(&self) {
        info!("store manager shutting down, draining queues");
        self.closed.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + self.config.shutdown_drain_timeout;
        loop {
            if self.queues_drained() || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.high_tx.lock().unwrap().take();
        self.low_tx.lock().unwrap().take();

        if let Some(handle) = self.worker.lock().await.take() {
            if tokio::time::timeout(self.config.shutdown_drain_timeout, handle)
                .await
                .is_err()
            {
                warn!("store worker did not join within the shutdown budget");
            }
        }
        debug!("store manager shutdown complete");
    }

    fn queues_drained(&self) -> bool {
        let high_empty = match self.high_tx.lock().unwrap().as_ref() {
            Some(tx) => tx.capacity() == tx.max_capacity(),
            None => true,
        };
        let low_empty = match self.low_tx.lock().unwrap().as_ref() {
            Some(tx) => tx.capacity() == tx.max_capacity(),
            None => true,
        };
        high_empty && low_empty
    }
}

async fn run_worker(
    handle: StoreHandle,
    mut high_rx: mpsc::Receiver<JobEnvelope>,
    mut low_rx: mpsc::Receiver<JobEnvelope>,
    max_retries: u32,
    retry_backoff: Duration,
) {
    loop {
        if let Ok(envelope) = high_rx.try_recv() {
            run_job(&handle, envelope, max_retries, retry_backoff).await;
            continue;
        }
        if let Ok(envelope) = low_rx.try_recv() {
            run_job(&handle, envelope, max_retries, retry_backoff).await;
            continue;
        }

        tokio::select! {
            biased;
            maybe = high_rx.recv() => {
                match maybe {
                    Some(envelope) => run_job(&handle, envelope, max_retries, retry_backoff).await,
                    None if low_rx.is_closed() => break,
                    None => continue,
                }
            }
            maybe = low_rx.recv() => {
                match maybe {
                    Some(envelope) => run_job(&handle, envelope, max_retries, retry_backoff).await,
                    None if high_rx.is_closed() => break,
                    None => continue,
                }
            }
        }
    }
    debug!("store worker exiting");
}

async fn run_job(handle: &StoreHandle, envelope: JobEnvelope, max_retries: u32, retry_backoff: Duration) {
    let JobEnvelope { job, result_tx } = envelope;

    let mut attempt = 1;
    let result = loop {
        match job(handle.clone()).await {
            Ok(()) => break Ok(()),
            Err(err) if err.is_retryable() && attempt < max_retries => {
                warn!(attempt, "retryable store error, backing off: {}", err);
                tokio::time::sleep(retry_backoff * attempt).await;
                attempt += 1;
            }
            Err(err) => {
                error!("store job failed after {} attempt(s): {}", attempt, err);
                break Err(err);
            }
        }
    };

    let _ = result_tx.send(result);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Notify;

    use super::*;
    use crate::schema::open_hot_database;

    async fn spawn_test_manager() -> StoreManager {
        let (_db, conn) = open_hot_database().await.expect("open hot database");
        StoreManager::spawn(StoreHandle::new(conn), StoreManagerConfig::default())
    }

    #[tokio::test]
    async fn high_priority_jobs_run_before_queued_low_priority_ones() {
        let manager = spawn_test_manager().await;
        let order = Arc::new(SyncMutex::new(Vec::<&'static str>::new()));
        let gate = Arc::new(Notify::new());

        // Submit a low-priority job that blocks the worker on `gate` so every
        // subsequent submission queues up behind it instead of racing ahead.
        {
            let order = order.clone();
            let gate = gate.clone();
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .execute_low(move |_handle| {
                        let order = order.clone();
                        let gate = gate.clone();
                        async move {
                            gate.notified().await;
                            order.lock().unwrap().push("blocker");
                            Ok(())
                        }
                    })
                    .await
                    .unwrap();
            });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Queue more low-priority work, then high-priority work behind it.
        for _ in 0..3 {
            let order = order.clone();
            manager
                .execute_low(move |_handle| {
                    let order = order.clone();
                    async move {
                        order.lock().unwrap().push("low");
                        Ok(())
                    }
                })
                .await
                .unwrap();
        }
        for _ in 0..3 {
            let order = order.clone();
            manager
                .execute_high(move |_handle| {
                    let order = order.clone();
                    async move {
                        order.lock().unwrap().push("high");
                        Ok(())
                    }
                })
                .await
                .unwrap();
        }

        gate.notify_one();
        manager.close().await;

        let order = order.lock().unwrap();
        assert_eq!(order[0], "blocker");
        let high_positions: Vec<_> = order.iter().enumerate().filter(|(_, v)| **v == "high").map(|(i, _)| i).collect();
        let low_positions: Vec<_> = order.iter().enumerate().filter(|(_, v)| **v == "low").map(|(i, _)| i).collect();
        assert!(high_positions.iter().max() < low_positions.iter().min());
    }

    #[tokio::test]
    async fn close_drains_pending_jobs_before_rejecting_new_ones() {
        let manager = spawn_test_manager().await;
        let completed = Arc::new(SyncMutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let completed = completed.clone();
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .execute_high(move |_handle| {
                        let completed = completed.clone();
                        async move {
                            *completed.lock().unwrap() += 1;
                            Ok(())
                        }
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        manager.close().await;
        assert_eq!(*completed.lock().unwrap(), 10);

        let err = manager.execute_high(|_handle| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, StoreError::ShuttingDown));
    }

    #[tokio::test]
    async fn retries_a_retryable_failure_before_giving_up() {
        let manager = spawn_test_manager().await;
        let attempts = Arc::new(SyncMutex::new(0u32));

        let result = {
            let attempts = attempts.clone();
            manager
                .execute_high(move |_handle| {
                    let attempts = attempts.clone();
                    async move {
                        let mut guard = attempts.lock().unwrap();
                        *guard += 1;
                        if *guard < 2 {
                            Err(StoreError::SendTimeout)
                        } else {
                            Ok(())
                        }
                    }
                })
                .await
        };

        assert!(result.is_ok());
        assert_eq!(*attempts.lock().unwrap(), 2);
        manager.close().await;
    }

    #[tokio::test]
    async fn query_low_returns_the_job_result() {
        let manager = spawn_test_manager().await;
        manager
            .execute_high(|handle| async move { handle.insert_new_user("A", "alice", true, "2024-01-01-00").await })
            .await
            .unwrap();

        let exists = manager
            .query_low(|handle| async move { handle.user_exists("A", "alice").await })
            .await
            .unwrap();
        assert!(exists);

        manager.close().await;
    }
}
