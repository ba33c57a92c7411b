//! Bounded task runner.
//!
//! Every provider call goes through [`TaskRunner::run`]: the caller waits
//! at most `timeout` for a worker (a permit on the shared semaphore), then
//! at most `timeout` again for the operation itself. Whatever happens
//! (success, fault, panic, timeout, no worker) comes back as a
//! [`TaskOutcome`].
//!
//! A timed-out operation is *not* cancelled. It keeps running detached,
//! still holding its worker, and its late result is dropped. An operation
//! that never got a worker never ran, and says so via `started`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::provider::ProviderFault;

/// Normalized result of one provider operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    /// `false` on every non-success path.
    pub result: bool,
    pub fault: Option<ProviderFault>,
    /// `false` when no worker freed up in time and the operation was never run.
    pub started: bool,
}

impl TaskOutcome {
    pub fn success(result: bool) -> Self {
        Self {
            result,
            fault: None,
            started: true,
        }
    }

    pub fn fault(fault: ProviderFault) -> Self {
        Self {
            result: false,
            fault: Some(fault),
            started: true,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            result: false,
            fault: None,
            started: true,
        }
    }

    pub fn not_started() -> Self {
        Self {
            result: false,
            fault: None,
            started: false,
        }
    }
}

/// Shared, bounded worker pool for provider operations.
#[derive(Clone)]
pub struct TaskRunner {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl TaskRunner {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Workers not currently running an operation.
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `op` on the pool, waiting at most `timeout` (forever if `None`)
    /// for a worker and again for the operation.
    pub async fn run<F>(&self, op: F, timeout: Option<Duration>) -> TaskOutcome
    where
        F: Future<Output = Result<bool, ProviderFault>> + Send + 'static,
    {
        let acquire = self.permits.clone().acquire_owned();
        let acquired = match timeout {
            Some(limit) => match tokio::time::timeout(limit, acquire).await {
                Ok(acquired) => acquired,
                Err(_) => {
                    debug!(
                        timeout_ms = limit.as_millis() as u64,
                        workers = self.workers,
                        "no worker available, operation not started"
                    );
                    return TaskOutcome::not_started();
                }
            },
            None => acquire.await,
        };
        let permit = match acquired {
            Ok(permit) => permit,
            Err(e) => return TaskOutcome::fault(ProviderFault::Aborted(e.to_string())),
        };

        let handle = tokio::spawn(async move {
            let _permit = permit;
            op.await
        });

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    debug!(timeout_ms = limit.as_millis() as u64, "provider operation timed out");
                    return TaskOutcome::timed_out();
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(result)) => TaskOutcome::success(result),
            Ok(Err(fault)) => TaskOutcome::fault(fault),
            Err(e) => {
                warn!(error = %e, "provider operation aborted");
                TaskOutcome::fault(ProviderFault::Aborted(e.to_string()))
            }
        }
    }

    /// Run a unit-returning operation; success maps to `true`.
    pub async fn run_unit<F>(&self, op: F, timeout: Option<Duration>) -> TaskOutcome
    where
        F: Future<Output = Result<(), ProviderFault>> + Send + 'static,
    {
        self.run(async move { op.await.map(|()| true) }, timeout)
            .await
    }
}
