//! Global coordination lock (C5).
//!
//! Mediates task-level mutation of the neighbor list, schedule, and
//! `current_link` against the interrupt-driven slot routine, without an
//! OS mutex. Grounded on `tsch.c`'s `tsch_locked`/`tsch_lock_requested`
//! pair and `tsch_get_lock`/`tsch_release_lock`.
//!
//! There is no real preemptive concurrency in this crate (the slot engine
//! and task-level mutators are both driven cooperatively from `tick()`),
//! but the flag pair is still the correct model: it is what lets a
//! mutator tell the *next* invocation of the slot routine "skip this slot,
//! I'm about to change the schedule", which is the actual race the
//! reference implementation avoids.

use core::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct Lock {
    locked: AtomicBool,
    lock_requested: AtomicBool,
    in_slot: AtomicBool,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            lock_requested: AtomicBool::new(false),
            in_slot: AtomicBool::new(false),
        }
    }

    /// Called by the slot routine prologue. Returns `true` if the slot
    /// must be skipped entirely (no TX, no RX) this round.
    pub fn lock_requested(&self) -> bool {
        self.lock_requested.load(Ordering::Acquire)
    }

    /// Called by the slot routine around its critical section.
    pub fn enter_slot(&self) {
        self.in_slot.store(true, Ordering::Release);
    }

    pub fn leave_slot(&self) {
        self.in_slot.store(false, Ordering::Release);
    }

    /// Attempt to acquire the lock for task-level mutation. Fails (returns
    /// `false`) if already locked, or if the slot routine is currently
    /// mid-slot; the caller is expected to set the request flag first (via
    /// [`Lock::request`]) and retry on a subsequent tick, bounded by one
    /// slot length, exactly as `tsch_get_lock`'s busy-wait is bounded.
    pub fn try_lock(&self) -> bool {
        if self.locked.load(Ordering::Acquire) {
            return false;
        }
        self.lock_requested.store(true, Ordering::Release);
        if self.in_slot.load(Ordering::Acquire) {
            return false;
        }
        self.locked.store(true, Ordering::Release);
        self.lock_requested.store(false, Ordering::Release);
        true
    }

    pub fn release(&self) {
        self.locked.store(false, Ordering::Release);
        self.lock_requested.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lock_fails_while_in_slot() {
        let lock = Lock::new();
        lock.enter_slot();
        assert!(!lock.try_lock());
        assert!(lock.lock_requested());
        lock.leave_slot();
        assert!(lock.try_lock());
    }

    #[test]
    fn lock_fails_while_already_locked() {
        let lock = Lock::new();
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        lock.release();
        assert!(lock.try_lock());
    }
}
