//! Connection admission control.
//!
//! The [`AdmissionController`] tracks how many sessions are open against an
//! adjustable ceiling (`real_max`) which itself is bounded by a hard maximum.
//! An external load monitor may move the ceiling at runtime with
//! [`expand_real_capacity`](AdmissionController::expand_real_capacity) and
//! [`shrink_real_capacity`](AdmissionController::shrink_real_capacity) while
//! sessions are being admitted.
//!
//! Lowering a ceiling never evicts live sessions. `current` may therefore sit
//! above a freshly lowered ceiling for a while, and no admission succeeds
//! until enough sessions have closed.

use crate::error::AdmissionError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

/// Amount removed from the ceiling by one shrink step.
pub const SHRINK_STEP: usize = 5;

/// Default floor for [`AdmissionController::shrink_real_capacity`].
pub const DEFAULT_MIN_CAPACITY: usize = SHRINK_STEP;

/// Snapshot of the admission counters taken under the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionQuota {
    /// Sessions currently holding a slot
    pub current: usize,
    /// Hard upper bound for `real_max`
    pub max: usize,
    /// Ceiling currently enforced by admission
    pub real_max: usize,
}

#[derive(Debug)]
struct QuotaState {
    quota: ConnectionQuota,
    min_capacity: usize,
}

/// Thread-safe admission counters.
///
/// All fields are guarded jointly by one mutex; every critical section is
/// O(1) and never awaits.
#[derive(Debug)]
pub struct AdmissionController {
    state: Mutex<QuotaState>,
}

impl AdmissionController {
    /// Creates a controller whose ceiling starts at `max`.
    pub fn new(max: usize) -> Self {
        Self::with_capacity(max, max, DEFAULT_MIN_CAPACITY)
    }

    /// Creates a controller with an explicit starting ceiling and shrink floor.
    ///
    /// `real_max` is clamped to `max`.
    pub fn with_capacity(max: usize, real_max: usize, min_capacity: usize) -> Self {
        Self {
            state: Mutex::new(QuotaState {
                quota: ConnectionQuota {
                    current: 0,
                    max,
                    real_max: real_max.min(max),
                },
                min_capacity,
            }),
        }
    }

    // A panic while holding this lock cannot leave the counters half-written,
    // so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, QuotaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes a slot if `current < real_max`. Returns `false` with no side
    /// effect otherwise.
    pub fn try_admit(&self) -> bool {
        let mut state = self.lock();
        let quota = &mut state.quota;
        if quota.current >= quota.real_max {
            return false;
        }
        quota.current += 1;
        true
    }

    /// Takes a slot wrapped in a guard that gives it back exactly once.
    pub fn try_acquire(self: &Arc<Self>) -> Option<AdmissionPermit> {
        if self.try_admit() {
            Some(AdmissionPermit {
                controller: Some(self.clone()),
            })
        } else {
            None
        }
    }

    /// Returns one slot.
    ///
    /// Releasing more slots than were admitted is a programming error; it is
    /// logged at error level and reported, and the counter is left at zero.
    pub fn release(&self) -> Result<(), AdmissionError> {
        let mut state = self.lock();
        match state.quota.current.checked_sub(1) {
            Some(current) => {
                state.quota.current = current;
                Ok(())
            }
            None => {
                error!("Admission slot released without a matching admit");
                Err(AdmissionError::ReleaseWithoutAdmit)
            }
        }
    }

    /// Sets the hard maximum, pulling the ceiling down if it now exceeds it.
    pub fn set_max_capacity(&self, max: usize) {
        let mut state = self.lock();
        let quota = &mut state.quota;
        quota.max = max;
        if quota.real_max > quota.max {
            quota.real_max = quota.max;
        }
    }

    /// Sets the ceiling, clamped to the hard maximum.
    pub fn set_real_capacity(&self, real_max: usize) {
        let mut state = self.lock();
        let quota = &mut state.quota;
        quota.real_max = real_max.min(quota.max);
    }

    /// Raises the ceiling by one, up to the hard maximum.
    pub fn expand_real_capacity(&self) {
        let mut state = self.lock();
        let quota = &mut state.quota;
        if quota.real_max < quota.max {
            quota.real_max += 1;
        }
    }

    /// Lowers the ceiling by [`SHRINK_STEP`], never below the configured
    /// floor. No-op once the ceiling is at or below the floor.
    pub fn shrink_real_capacity(&self) {
        let mut state = self.lock();
        let floor = state.min_capacity;
        let quota = &mut state.quota;
        if quota.real_max <= floor {
            return;
        }
        quota.real_max = quota.real_max.saturating_sub(SHRINK_STEP).max(floor);
        debug!("Admission ceiling lowered to {}", quota.real_max);
    }

    pub fn current_count(&self) -> usize {
        self.lock().quota.current
    }

    pub fn real_capacity(&self) -> usize {
        self.lock().quota.real_max
    }

    pub fn max_capacity(&self) -> usize {
        self.lock().quota.max
    }

    pub fn min_capacity(&self) -> usize {
        self.lock().min_capacity
    }

    /// All three counters read atomically.
    pub fn snapshot(&self) -> ConnectionQuota {
        self.lock().quota
    }
}

/// One admission slot held by a session.
///
/// The slot is returned when the permit is released or dropped, whichever
/// happens first, so every exit path of a session gives it back once.
#[derive(Debug)]
pub struct AdmissionPermit {
    controller: Option<Arc<AdmissionController>>,
}

impl AdmissionPermit {
    /// Returns the slot now instead of at drop.
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if let Some(controller) = self.controller.take() {
            // Cannot fail: this permit accounts for one admitted slot.
            let _ = controller.release();
        }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.give_back();
    }
}
