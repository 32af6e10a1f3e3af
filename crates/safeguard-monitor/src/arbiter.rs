//! Exclusive, timeout-bounded access to the detection capability.
//!
//! All cameras share one detector. Workers take a lease before each
//! detection call; if the lease cannot be had within the timeout the worker
//! gives up for this frame and keeps its previous results. Waiters are
//! served in arrival order, but only while they are still within their
//! timeout; a waiter that gives up loses its place.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{MonitorError, MonitorResult};
use crate::metrics;

pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// Single-permit guard around the detection capability.
#[derive(Debug, Clone)]
pub struct DetectionArbiter {
    permit: Arc<Semaphore>,
    timeout: Duration,
}

/// Exclusive right to call the detector. Released on drop.
#[derive(Debug)]
pub struct DetectionLease {
    _permit: OwnedSemaphorePermit,
}

impl DetectionArbiter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether no lease is currently held.
    pub fn is_idle(&self) -> bool {
        self.permit.available_permits() > 0
    }

    /// Wait up to the timeout for the lease.
    pub async fn acquire(&self) -> MonitorResult<DetectionLease> {
        match tokio::time::timeout(self.timeout, Arc::clone(&self.permit).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(DetectionLease { _permit: permit }),
            Ok(Err(_)) => Err(MonitorError::internal("Detection arbiter closed")),
            Err(_) => {
                metrics::record_arbiter_busy();
                Err(MonitorError::DetectionBusy)
            }
        }
    }

    /// Run one detection call while holding the lease.
    ///
    /// The lease is released when `f`'s future completes, whatever it returns.
    pub async fn run_exclusive<F, Fut, T>(&self, f: F) -> MonitorResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _lease = self.acquire().await?;
        Ok(f().await)
    }
}

impl Default for DetectionArbiter {
    fn default() -> Self {
        Self::new(DEFAULT_ACQUIRE_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_caller_times_out() {
        let arbiter = DetectionArbiter::new(Duration::from_millis(20));
        let lease = arbiter.acquire().await.unwrap();
        assert!(!arbiter.is_idle());

        let err = arbiter.acquire().await.unwrap_err();
        assert!(err.is_busy());

        drop(lease);
        assert!(arbiter.is_idle());
        assert!(arbiter.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_lease_released_after_failed_call() {
        let arbiter = DetectionArbiter::new(Duration::from_millis(20));
        let result: Result<(), &str> = arbiter
            .run_exclusive(|| async { Err("detector exploded") })
            .await
            .unwrap();

        assert!(result.is_err());
        assert!(arbiter.is_idle());
    }

    #[tokio::test]
    async fn test_run_exclusive_serializes_callers() {
        let arbiter = DetectionArbiter::new(Duration::from_secs(5));
        let active = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let peak = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let arbiter = arbiter.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                arbiter
                    .run_exclusive(|| async {
                        use std::sync::atomic::Ordering;
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(peak.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_waiters_served_in_arrival_order() {
        let arbiter = DetectionArbiter::new(Duration::from_secs(5));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let lease = arbiter.acquire().await.unwrap();

        let mut tasks = Vec::new();
        for name in ["first", "second", "third"] {
            let arbiter = arbiter.clone();
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                let _lease = arbiter.acquire().await.unwrap();
                order.lock().unwrap().push(name);
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(lease);
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }
}
