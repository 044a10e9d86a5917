//! Admission control for retrieval workers.
//!
//! [`ConcurrencyGuard`] owns a fixed pool of tokens. A worker holds a
//! [`ConcurrencyToken`] for as long as it performs I/O; the token goes back to
//! the pool when it is released or dropped, so every exit path returns it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::HarvestError;

pub const DEFAULT_CONCURRENCY: usize = 400;

/// Upper bound on how long a waiter sleeps before re-checking cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct PoolState {
    available: usize,
    peak_in_use: usize,
}

#[derive(Debug)]
pub struct ConcurrencyGuard {
    capacity: usize,
    state: Mutex<PoolState>,
    freed: Condvar,
}

impl ConcurrencyGuard {
    pub fn new(capacity: usize) -> Result<Self, HarvestError> {
        if capacity == 0 {
            return Err(HarvestError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(Self::with_capacity(capacity))
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(PoolState {
                available: capacity,
                peak_in_use: 0,
            }),
            freed: Condvar::new(),
        }
    }

    /// Blocks until a token is free. Returns `None` if `cancel` fires first.
    pub fn acquire(&self, cancel: &CancelToken) -> Option<ConcurrencyToken<'_>> {
        let mut state = self.lock();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if state.available > 0 {
                state.available -= 1;
                let in_use = self.capacity - state.available;
                state.peak_in_use = state.peak_in_use.max(in_use);
                return Some(ConcurrencyToken { guard: self });
            }
            let wait = cancel
                .remaining()
                .map(|left| left.min(CANCEL_POLL))
                .unwrap_or(CANCEL_POLL);
            state = match self.freed.wait_timeout(state, wait) {
                Ok((state, _)) => state,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Non-blocking variant of [`acquire`](Self::acquire).
    pub fn try_acquire(&self) -> Option<ConcurrencyToken<'_>> {
        let mut state = self.lock();
        if state.available == 0 {
            return None;
        }
        state.available -= 1;
        let in_use = self.capacity - state.available;
        state.peak_in_use = state.peak_in_use.max(in_use);
        Some(ConcurrencyToken { guard: self })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.lock().available
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.lock().available
    }

    /// Highest number of tokens checked out at once since construction.
    pub fn peak_in_use(&self) -> usize {
        self.lock().peak_in_use
    }

    fn give_back(&self) {
        let mut state = self.lock();
        debug_assert!(state.available < self.capacity);
        state.available += 1;
        drop(state);
        self.freed.notify_one();
    }

    // The state is two counters; a panicking holder cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ConcurrencyGuard {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CONCURRENCY)
    }
}

/// One unit of admission capacity. Not clonable; returned to the pool on drop.
#[derive(Debug)]
#[must_use = "dropping the token releases it immediately"]
pub struct ConcurrencyToken<'g> {
    guard: &'g ConcurrencyGuard,
}

impl ConcurrencyToken<'_> {
    /// Returns the token to the guard it was acquired from.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ConcurrencyToken<'_> {
    fn drop(&mut self) {
        self.guard.give_back();
    }
}

#[derive(Debug)]
struct CancelState {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

/// Broadcast cancellation handle with an optional deadline.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::with_deadline(None)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now().checked_add(timeout))
    }

    pub fn with_deadline(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                deadline,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self
                .inner
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Time left until the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn check(&self) -> Result<(), HarvestError> {
        if self.is_cancelled() {
            Err(HarvestError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
