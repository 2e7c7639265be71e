//! Reentrancy guard: at most one stepper ticks at a time.
//!
//! Steppers sharing an [`ActiveSlot`] exclude each other. Production code
//! uses the process-wide slot ([`ActiveSlot::process`]); embedders and tests
//! can create independent slots.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::core::types::StepperId;
use crate::error::StepperError;

/// Shared marker naming the stepper that is currently ticking.
#[derive(Debug, Clone, Default)]
pub struct ActiveSlot {
    holder: Arc<Mutex<Option<StepperId>>>,
}

impl ActiveSlot {
    /// A fresh slot, independent of every other slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot shared by the whole process.
    pub fn process() -> Self {
        static PROCESS: OnceLock<ActiveSlot> = OnceLock::new();
        PROCESS.get_or_init(ActiveSlot::new).clone()
    }

    pub fn holder(&self) -> Option<StepperId> {
        *self.lock()
    }

    /// Fail when a stepper other than `id` holds the slot.
    pub fn check(&self, id: StepperId) -> Result<(), StepperError> {
        match *self.lock() {
            Some(holder) if holder != id => Err(StepperError::Reentrancy { holder }),
            _ => Ok(()),
        }
    }

    /// Take the slot for `id` until the returned guard is dropped.
    ///
    /// Acquiring a slot that `id` already holds succeeds; the nested guard
    /// leaves the outer hold in place when dropped.
    pub fn acquire(&self, id: StepperId) -> Result<SlotGuard, StepperError> {
        let mut holder = self.lock();
        let owns = match *holder {
            Some(current) if current != id => {
                return Err(StepperError::Reentrancy { holder: current });
            }
            Some(_) => false,
            None => {
                *holder = Some(id);
                true
            }
        };
        Ok(SlotGuard {
            slot: self.clone(),
            id,
            owns,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<StepperId>> {
        self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped hold on an [`ActiveSlot`].
#[must_use = "the slot is released when the guard is dropped"]
#[derive(Debug)]
pub struct SlotGuard {
    slot: ActiveSlot,
    id: StepperId,
    owns: bool,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.owns {
            return;
        }
        let mut holder = self.slot.lock();
        if *holder == Some(self.id) {
            *holder = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_holder_is_refused() {
        let slot = ActiveSlot::new();
        let first = StepperId::next();
        let second = StepperId::next();

        let _guard = slot.acquire(first).expect("first acquire");
        let err = slot.acquire(second).expect_err("second must fail");
        assert_eq!(err, StepperError::Reentrancy { holder: first });
        assert!(slot.check(second).is_err());
        assert!(slot.check(first).is_ok());
    }

    #[test]
    fn nested_acquire_keeps_outer_hold() {
        let slot = ActiveSlot::new();
        let id = StepperId::next();

        let outer = slot.acquire(id).expect("outer");
        {
            let _inner = slot.acquire(id).expect("inner");
        }
        assert_eq!(slot.holder(), Some(id));
        drop(outer);
        assert_eq!(slot.holder(), None);
    }

    #[test]
    fn release_happens_on_unwind() {
        let slot = ActiveSlot::new();
        let id = StepperId::next();
        let inner = slot.clone();

        let result = std::panic::catch_unwind(move || {
            let _guard = inner.acquire(id).expect("acquire");
            panic!("step blew up");
        });
        assert!(result.is_err());
        assert_eq!(slot.holder(), None);
    }

    #[test]
    fn independent_slots_do_not_interfere() {
        let a = ActiveSlot::new();
        let b = ActiveSlot::new();
        let _held = a.acquire(StepperId::next()).expect("a");
        assert!(b.acquire(StepperId::next()).is_ok());
    }
}
