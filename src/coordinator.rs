//! Single-flight request coordination.
//!
//! Concurrent callers asking for the same key share one upstream computation.
//! The computation is spawned onto the runtime, so it is owned by no caller:
//! waiters may leave (drop their future or fire their cancellation token)
//! without aborting it for the others. Only [`RequestCoordinator::shutdown`]
//! aborts running producers, which then settle with [`Error::Cancelled`].

use crate::{Error, ErrorContext, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T>>>;
type PendingMap<K, T> = Arc<Mutex<HashMap<K, PendingCall<T>>>>;

/// One in-flight computation for a key.
struct PendingCall<T>
where
    T: Clone,
{
    id: u64,
    outcome: SharedOutcome<T>,
    waiters: Arc<AtomicUsize>,
}

/// Removes the pending entry when the producer task ends, panics included.
struct SettleGuard<K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    pending: PendingMap<K, T>,
    key: Option<K>,
    id: u64,
}

impl<K, T> Drop for SettleGuard<K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        // Only remove our own entry; a newer call may already own the key.
        if pending.get(&key).map(|c| c.id == self.id).unwrap_or(false) {
            pending.remove(&key);
        }
    }
}

struct WaiterGuard(Arc<AtomicUsize>);

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct RequestCoordinator<K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    pending: PendingMap<K, T>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl<K, T> RequestCoordinator<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_shutdown(CancellationToken::new())
    }

    /// Producers are aborted when `shutdown` is cancelled.
    pub fn with_shutdown(shutdown: CancellationToken) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            shutdown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, PendingCall<T>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `producer` for `key` unless a call for `key` is already in flight,
    /// in which case wait for that call's outcome instead.
    ///
    /// `producer` is invoked at most once per admitted call and only builds the
    /// future; it must not call back into this coordinator.
    pub async fn execute<F, Fut>(&self, key: K, producer: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (outcome, waiters) = self.join_or_start(key, producer);
        let _waiter = WaiterGuard(waiters);
        outcome.await
    }

    /// Like [`execute`](Self::execute), but this caller stops waiting with
    /// `Error::Cancelled` once `cancel` fires. The shared call keeps running.
    pub async fn execute_with_cancel<F, Fut>(
        &self,
        key: K,
        producer: F,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("waiter detached from shared call");
                Err(Error::Cancelled)
            }
            result = self.execute(key, producer) => result,
        }
    }

    fn join_or_start<F, Fut>(&self, key: K, producer: F) -> (SharedOutcome<T>, Arc<AtomicUsize>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut pending = self.lock();
        if let Some(call) = pending.get(&key) {
            let waiters = call.waiters.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(call_id = call.id, waiters, "joined in-flight call");
            return (call.outcome.clone(), Arc::clone(&call.waiters));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = SettleGuard {
            pending: Arc::clone(&self.pending),
            key: Some(key.clone()),
            id,
        };
        let shutdown = self.shutdown.clone();
        let work = producer();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => Err(Error::Cancelled),
                result = work => result,
            }
        });

        let outcome = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(Error::Cancelled),
                Err(e) => {
                    warn!(call_id = id, error = %e, "producer task failed");
                    Err(Error::runtime_with_context(
                        format!("producer task failed: {}", e),
                        ErrorContext::new().with_source("request_coordinator"),
                    ))
                }
            }
        }
        .boxed()
        .shared();

        let waiters = Arc::new(AtomicUsize::new(1));
        pending.insert(
            key,
            PendingCall {
                id,
                outcome: outcome.clone(),
                waiters: Arc::clone(&waiters),
            },
        );
        debug!(call_id = id, "started upstream call");
        (outcome, waiters)
    }

    /// Abort every running producer; pending and future calls settle with `Error::Cancelled`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn pending_calls(&self) -> usize {
        self.lock().len()
    }

    /// Callers currently waiting on the in-flight call for `key`.
    pub fn waiters(&self, key: &K) -> usize {
        self.lock()
            .get(key)
            .map(|c| c.waiters.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

impl<K, T> Default for RequestCoordinator<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
