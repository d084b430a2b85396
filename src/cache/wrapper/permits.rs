//! Counting permits for bounding concurrent resolves.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

struct PermitState {
    available: usize,
    /// Bumped by `interrupt_waiters`; a waiter that sees it change gives up.
    interrupt_generation: u64,
}

/// Counting semaphore whose waiters can be interrupted.
///
/// An interrupted waiter does not fail: it proceeds without a permit, so the
/// bound is temporarily exceeded rather than the call aborted.
pub struct ResolvePermits {
    state: Mutex<PermitState>,
    released: Condvar,
    capacity: usize,
    waits: AtomicU64,
    bypasses: AtomicU64,
}

/// Held permit; released on drop.
#[must_use = "the permit is released as soon as it is dropped"]
pub struct ResolvePermit<'a> {
    permits: &'a ResolvePermits,
}

impl ResolvePermits {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PermitState {
                available: capacity,
                interrupt_generation: 0,
            }),
            released: Condvar::new(),
            capacity,
            waits: AtomicU64::new(0),
            bypasses: AtomicU64::new(0),
        }
    }

    /// Block until a permit is free. Returns `None` if the wait was
    /// interrupted.
    pub fn acquire(&self) -> Option<ResolvePermit<'_>> {
        let mut state = self.state.lock();
        if state.available > 0 {
            state.available -= 1;
            return Some(ResolvePermit { permits: self });
        }

        self.waits.fetch_add(1, Ordering::Relaxed);
        let generation = state.interrupt_generation;
        loop {
            self.released.wait(&mut state);
            if state.interrupt_generation != generation {
                self.bypasses.fetch_add(1, Ordering::Relaxed);
                warn!(
                    capacity = self.capacity,
                    "Resolve permit wait interrupted, proceeding without permit"
                );
                return None;
            }
            if state.available > 0 {
                state.available -= 1;
                return Some(ResolvePermit { permits: self });
            }
        }
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<ResolvePermit<'_>> {
        let mut state = self.state.lock();
        if state.available == 0 {
            return None;
        }
        state.available -= 1;
        Some(ResolvePermit { permits: self })
    }

    /// Wake every current waiter and make it proceed without a permit.
    pub fn interrupt_waiters(&self) {
        let mut state = self.state.lock();
        state.interrupt_generation = state.interrupt_generation.wrapping_add(1);
        self.released.notify_all();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Acquires that had to wait.
    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }

    /// Waits abandoned by interruption.
    pub fn bypasses(&self) -> u64 {
        self.bypasses.load(Ordering::Relaxed)
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.available += 1;
        self.released.notify_one();
    }
}

impl Drop for ResolvePermit<'_> {
    fn drop(&mut self) {
        self.permits.release();
    }
}
