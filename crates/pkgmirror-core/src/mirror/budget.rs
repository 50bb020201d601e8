//! Admission budget: every network operation passes through here.
//!
//! One semaphore bounds in-flight operations across resolution, dependency
//! fetches and downloads. Each attempt gets its own timeout; transient
//! failures are retried with exponential backoff. Run-aborting failures
//! trip a shared cancellation token so in-flight siblings stop early.

use crate::pkg::error::PkgError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Limits shared by every operation of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetLimits {
    /// Maximum concurrent operations.
    pub width: usize,
    /// Retries after the first attempt, for transient errors only.
    pub retries: u32,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Delay before the first retry; doubles per retry.
    pub backoff: Duration,
}

#[derive(Debug)]
pub struct AdmissionBudget {
    limits: BudgetLimits,
    semaphore: Semaphore,
    cancel: CancellationToken,
    fatal: Mutex<Option<PkgError>>,
    /// Set once any attempt gets an answer from the backend.
    reached_backend: AtomicBool,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    attempts: AtomicU64,
}

impl AdmissionBudget {
    #[must_use]
    pub fn new(limits: BudgetLimits) -> Self {
        Self::with_token(limits, CancellationToken::new())
    }

    /// Use an externally owned token, e.g. one tripped by Ctrl-C.
    #[must_use]
    pub fn with_token(limits: BudgetLimits, cancel: CancellationToken) -> Self {
        let width = limits.width.max(1);
        Self {
            limits: BudgetLimits { width, ..limits },
            semaphore: Semaphore::new(width),
            cancel,
            fatal: Mutex::new(None),
            reached_backend: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            attempts: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn limits(&self) -> BudgetLimits {
        self.limits
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The first run-aborting error, if any.
    #[must_use]
    pub fn fatal(&self) -> Option<PkgError> {
        self.fatal.lock().ok().and_then(|slot| slot.clone())
    }

    /// Highest number of operations observed in flight at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    /// Total attempts issued, retries included.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Run `op` under the budget.
    ///
    /// `what` names the operation in logs (`resolve react@^18`).
    ///
    /// # Errors
    /// Returns the last error once retries are exhausted, the error is not
    /// transient, or the run has been cancelled (`PKG_CANCELLED`).
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, PkgError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PkgError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            let result = self.attempt(what, &mut op).await;

            let err = match result {
                Ok(value) => {
                    self.reached_backend.store(true, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.is_cancelled() {
                return Err(err);
            }

            if !err.is_unreachable() && !err.is_transient() {
                // A definite answer (404, bad JSON, ...) proves the backend is up
                self.reached_backend.store(true, Ordering::Relaxed);
            }

            if err.is_fatal() {
                self.abort(err.clone());
                return Err(err);
            }

            if err.is_transient() && attempt < self.limits.retries {
                let delay = self.limits.backoff.saturating_mul(1 << attempt.min(16));
                attempt += 1;
                debug!(what, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                if !self.sleep_or_cancel(delay).await {
                    return Err(PkgError::cancelled());
                }
                continue;
            }

            if err.is_unreachable() && !self.reached_backend.load(Ordering::Relaxed) {
                self.abort(err.clone());
            }

            return Err(err);
        }
    }

    async fn attempt<T, F, Fut>(&self, what: &str, op: &mut F) -> Result<T, PkgError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PkgError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(PkgError::cancelled());
        }

        let _permit = tokio::select! {
            permit = self.semaphore.acquire() => permit.map_err(|_| PkgError::cancelled())?,
            () = self.cancel.cancelled() => return Err(PkgError::cancelled()),
        };

        self.attempts.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let timeout = self.limits.timeout;
        let result = tokio::select! {
            res = tokio::time::timeout(timeout, op()) => res.unwrap_or_else(|_| {
                Err(PkgError::timeout(format!("{what} timed out after {timeout:?}")))
            }),
            () = self.cancel.cancelled() => Err(PkgError::cancelled()),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn sleep_or_cancel(&self, delay: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = self.cancel.cancelled() => false,
        }
    }

    /// Record a run-aborting error and cancel everything in flight.
    pub fn abort(&self, err: PkgError) {
        if let Ok(mut slot) = self.fatal.lock() {
            if slot.is_none() {
                warn!(code = err.code(), error = %err, "aborting run");
                *slot = Some(err);
            }
        }
        self.cancel.cancel();
    }
}
