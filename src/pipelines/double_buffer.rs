// SPDX-License-Identifier: GPL-3.0-only

//! Two-slot buffer with an atomic active selector
//!
//! One writer fills the inactive slot, then flips the selector. Readers take
//! a bounded read lock on whichever slot is active. A writer holds only the
//! inactive slot's write lock, so readers of the published slot are never
//! blocked by a fill in progress.

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const READ_RETRY_SLICE: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct Slot<T> {
    /// Generation at which this slot was last published, 0 if never
    generation: u64,
    value: T,
}

/// Double-buffered value
#[derive(Debug)]
pub struct DoubleBuffer<T> {
    slots: [RwLock<Slot<T>>; 2],
    active: AtomicUsize,
    generation: AtomicU64,
    writer: Mutex<()>,
}

/// Read access to the active slot
pub struct ActiveRead<'a, T> {
    guard: RwLockReadGuard<'a, Slot<T>>,
}

impl<T> ActiveRead<'_, T> {
    /// Generation of the slot being read
    pub fn generation(&self) -> u64 {
        self.guard.generation
    }
}

impl<T> Deref for ActiveRead<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard.value
    }
}

impl<T: Default> Default for DoubleBuffer<T> {
    fn default() -> Self {
        Self::new(T::default(), T::default())
    }
}

impl<T> DoubleBuffer<T> {
    pub fn new(first: T, second: T) -> Self {
        Self {
            slots: [
                RwLock::new(Slot {
                    generation: 0,
                    value: first,
                }),
                RwLock::new(Slot {
                    generation: 0,
                    value: second,
                }),
            ],
            active: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            writer: Mutex::new(()),
        }
    }

    /// Index of the slot readers see
    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Number of successful publishes
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Fill the inactive slot and publish it.
    ///
    /// The selector flips only if `fill` returns `Ok`; on error the active
    /// slot keeps the last good value. Returns the new generation.
    pub fn write_inactive<E, F>(&self, fill: F) -> Result<u64, E>
    where
        F: FnOnce(&mut T) -> Result<(), E>,
    {
        let _writer = self.writer.lock();
        let target = 1 - self.active.load(Ordering::Acquire);
        let next = self.generation.load(Ordering::Acquire) + 1;
        {
            let mut slot = self.slots[target].write();
            fill(&mut slot.value)?;
            slot.generation = next;
        }
        self.active.store(target, Ordering::Release);
        self.generation.store(next, Ordering::Release);
        Ok(next)
    }

    /// Read the active slot, giving up after `timeout`.
    ///
    /// Returns `None` on timeout or when nothing has been published yet.
    pub fn read_active(&self, timeout: Duration) -> Option<ActiveRead<'_, T>> {
        let deadline = Instant::now() + timeout;
        loop {
            // The selector may flip while we wait, so re-read it each slice
            let index = self.active.load(Ordering::Acquire);
            let slice = deadline
                .saturating_duration_since(Instant::now())
                .min(READ_RETRY_SLICE);
            if let Some(guard) = self.slots[index].try_read_for(slice) {
                // A flip between the selector load and the lock means this
                // slot may now be mid-fill; while we hold the guard it cannot
                // be written, so a matching selector proves it is published
                if self.active.load(Ordering::Acquire) == index {
                    if guard.generation == 0 {
                        return None;
                    }
                    return Some(ActiveRead { guard });
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
        }
    }

    /// Hold the write lock of a slot for `hold`. Used to simulate a stalled
    /// writer.
    #[cfg(test)]
    pub(crate) fn block_slot(&self, index: usize, hold: Duration) {
        let _guard = self.slots[index].write();
        std::thread::sleep(hold);
    }
}
