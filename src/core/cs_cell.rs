//! Critical section protected cell
//!
//! Wrapper for data that must only be touched with interrupts masked.

use core::cell::UnsafeCell;
use crate::critical::CriticalSection;

/// A cell that can only be accessed within a critical section.
pub struct CsCell<T>(UnsafeCell<T>);

// SAFETY: every access goes through a `CriticalSection`, which serializes
// task and interrupt context on a single core.
unsafe impl<T> Sync for CsCell<T> {}

impl<T> CsCell<T> {
    /// Create a new CsCell
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Get a mutable reference to the inner value
    ///
    /// The borrow is tied to the guard, so it cannot outlive the critical
    /// section. Callers must not hold two borrows from the same guard.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn get<'a>(&'a self, _cs: &'a CriticalSection) -> &'a mut T {
        unsafe { &mut *self.0.get() }
    }
}
