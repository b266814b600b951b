//! Counting-semaphore scheduler core
//!
//! A minimal real-time kernel providing:
//! - Priority-based preemptive scheduling (higher value preempts lower)
//! - Tick-driven delays and wake-ups that tolerate tick wraparound
//! - A counting semaphore usable from tasks and from interrupt handlers
//! - Context switching for ARM Cortex-M, isolated behind the `port` module

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(test)]
extern crate std;

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod core;
pub mod sync;
pub mod port;
pub mod app;

// ============ Re-exports ============

pub use self::core::config;
pub use self::core::config::*;
pub use self::core::critical;
pub use self::core::error;
pub use self::core::error::{ErrorKind, OsError, OsResult};
pub use self::core::kernel;
pub use self::core::kernel::{InterruptHandle, Kernel, KERNEL};
pub use self::core::prio;
pub use self::core::types;
pub use self::core::types::*;
pub use self::core::task;
pub use self::core::task::{OsTaskFn, TaskHandle};
pub use self::core::sched;
pub use self::core::time;
pub use self::core::time::ms_to_ticks;

pub use sync::sem;
pub use sync::sem::Pend;

#[cfg(feature = "pac")]
pub use stm32_metapac as pac;
