//! # Admission Control
//! The only shared mutable state in the engine: a per-key sliding-window
//! rate limiter and a process-wide concurrency budget. Both are meant to
//! be constructed once and passed by reference (`Arc`) into every
//! `Scorer`, so concurrent callers share one quota.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Thread-safe sliding 60-second window of request timestamps per caller
/// key. Entries are pruned lazily on each check; check-and-record happens
/// under one lock so two callers cannot under-count the window.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    inner: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_per_window: usize) -> Self {
        Self::with_window(max_per_window, Duration::from_secs(60))
    }

    pub fn with_window(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request for `key` if the window has room. Returns
    /// `false` (and records nothing) when the window is already full.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut map = self.inner.lock().expect("rate limiter mutex poisoned");
        let stamps = map.entry(key.to_string()).or_default();

        while let Some(front) = stamps.front() {
            if now.duration_since(*front) > self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }

        if stamps.len() >= self.max_per_window {
            return false;
        }
        stamps.push_back(now);
        true
    }

    /// Requests currently counted for `key` (diagnostics only).
    pub fn current_usage(&self, key: &str) -> usize {
        let map = self.inner.lock().expect("rate limiter mutex poisoned");
        map.get(key).map_or(0, VecDeque::len)
    }
}

/// Process-wide cap on in-flight model calls. A thin wrapper over a
/// semaphore: permits are RAII, so release happens on every exit path.
#[derive(Debug, Clone)]
pub struct ConcurrencyBudget {
    sem: Arc<Semaphore>,
}

impl ConcurrencyBudget {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Fail-fast admission check: is at least one permit free right now?
    ///
    /// Best-effort only: nothing is reserved, so a permit seen here may
    /// be gone by the time the caller's sub-batches [`acquire`] theirs —
    /// those acquires then queue. Over-commit is impossible either way;
    /// the semaphore gates the actual calls.
    ///
    /// [`acquire`]: ConcurrencyBudget::acquire
    pub fn has_capacity(&self) -> bool {
        self.sem.available_permits() > 0
    }

    /// Take a permit without waiting; `None` when the budget is spent.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.sem.clone().try_acquire_owned().ok()
    }

    /// Wait for a permit. Used around each sub-batch call so concurrent
    /// callers can never over-commit the budget.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        self.sem
            .clone()
            .acquire_owned()
            .await
            .expect("concurrency budget semaphore closed")
    }
}
