//! Port layer - CPU-specific implementations
//!
//! The kernel reaches the CPU only through these functions:
//!
//! * `os_task_stk_init` - build a new task's initial frame
//! * `os_start_high_rdy` - hand the CPU to the first task
//! * `os_ctx_sw` / `os_int_ctx_sw` - request a switch from task / interrupt level
//! * `os_cpu_systick_init` - start the tick timer
//! * `os_cpu_idle` - body of the idle loop

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(target_arch = "arm")]
pub use cortex_m4::*;

// Stub implementations for non-ARM targets (for testing)
//
// No register state is switched: the kernel's bookkeeping runs exactly as on
// the target and callers observe the result through `Kernel` queries.
#[cfg(not(target_arch = "arm"))]
pub mod stub {
    use crate::kernel::Kernel;
    use crate::task::{OsTaskFn, OsTcb};
    use crate::types::{OsStkElement, TaskId};

    pub unsafe fn os_start_high_rdy(_first: *mut OsTcb) {
        // Nothing to jump to; `Kernel::start` returns
    }

    pub fn os_ctx_sw(_next: *mut OsTcb) {
        // No-op for testing
    }

    pub fn os_int_ctx_sw(_next: *mut OsTcb) {
        // No-op for testing
    }

    pub unsafe fn os_task_stk_init(
        _entry: OsTaskFn,
        _kernel: *const Kernel,
        _id: TaskId,
        stk_base: *mut OsStkElement,
        stk_size: usize,
    ) -> *mut OsStkElement {
        // Return top of stack for testing
        unsafe { stk_base.add(stk_size) }
    }

    pub fn os_cpu_systick_init(_cnts: u32) {
        // No-op for testing
    }

    pub fn os_cpu_idle() {
        core::hint::spin_loop();
    }
}

#[cfg(not(target_arch = "arm"))]
pub use stub::*;
