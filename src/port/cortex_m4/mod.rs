//! Cortex-M4 port implementation
//!
//! Provides context switching via PendSV exception handler and the tick via
//! SysTick.

#![allow(named_asm_labels)]

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;

use crate::kernel::{Kernel, KERNEL};
use crate::task::{os_task_trampoline, OsTaskFn, OsTcb};
use crate::types::{OsStkElement, TaskId};

/// Switch targets shared with the PendSV handler
///
/// `tcb_cur` must stay the first field: PendSV reads it at offset 0.
#[repr(C)]
pub struct CpuState {
    /// TCB whose context is live on the CPU; null before the first switch
    pub tcb_cur: *mut OsTcb,
    /// TCB to switch to on the next PendSV
    pub tcb_high_rdy: *mut OsTcb,
}

#[no_mangle]
pub static mut CPU_STATE: CpuState = CpuState {
    tcb_cur: core::ptr::null_mut(),
    tcb_high_rdy: core::ptr::null_mut(),
};

/// Interrupt stack for MSP
#[no_mangle]
static mut INTERRUPT_STACK: [u64; 256] = [0xDEADBEEF_DEADBEEF; 256];

/// Initialize SysTick timer for system tick generation
///
/// # Arguments
/// * `cnts` - Reload value
///
/// # Example
/// For 16MHz clock with 1000Hz tick rate: cnts = 16_000_000 / 1000 = 16_000
pub fn os_cpu_systick_init(cnts: u32) {
    let mut p = unsafe { cortex_m::Peripherals::steal() };

    p.SYST.set_reload(cnts - 1);
    p.SYST.clear_current();
    p.SYST.set_clock_source(SystClkSource::Core);
    p.SYST.enable_interrupt();
    p.SYST.enable_counter();
}

/// Start the first task
///
/// Moves the main stack to the interrupt stack and lets PendSV load
/// `first`'s context. Does not return.
#[allow(static_mut_refs)]
pub unsafe fn os_start_high_rdy(first: *mut OsTcb) {
    unsafe {
        let mut scb = cortex_m::Peripherals::steal().SCB;

        // Set PendSV and SysTick priority to lowest
        scb.set_priority(SystemHandler::PendSV, 0xF0);
        scb.set_priority(SystemHandler::SysTick, 0xF0);

        let msp_top = INTERRUPT_STACK.as_ptr() as u32 + core::mem::size_of_val(&INTERRUPT_STACK) as u32;

        asm!("msr msp, {0}", in(reg) msp_top);
        asm!("msr psp, {0}", in(reg) 0);

        CPU_STATE.tcb_cur = core::ptr::null_mut();
        CPU_STATE.tcb_high_rdy = first;

        cortex_m::interrupt::enable();
        cortex_m::peripheral::SCB::set_pendsv();
    }
}

/// Trigger context switch from task level
///
/// Runs inside the kernel's critical section, so PendSV fires once it ends.
#[inline(always)]
pub fn os_ctx_sw(next: *mut OsTcb) {
    unsafe { CPU_STATE.tcb_high_rdy = next };
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Trigger context switch from interrupt level
///
/// PendSV has the lowest priority and tail-chains after the outermost ISR.
#[inline(always)]
pub fn os_int_ctx_sw(next: *mut OsTcb) {
    unsafe { CPU_STATE.tcb_high_rdy = next };
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Idle loop body
#[inline(always)]
pub fn os_cpu_idle() {
    cortex_m::asm::nop();
}

/// Context structure stored on stack
#[repr(C, align(4))]
struct UcStk {
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    exc_return: u32, // LR value for exception return
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}
const CONTEXT_STACK_SIZE: usize = 17;

/// Initialize task stack
///
/// The hardware frame enters `os_task_trampoline(kernel, id, entry)`.
pub unsafe fn os_task_stk_init(
    entry: OsTaskFn,
    kernel: *const Kernel,
    id: TaskId,
    stk_base: *mut OsStkElement,
    stk_size: usize,
) -> *mut OsStkElement {
    unsafe {
        let stk_top = stk_base.add(stk_size);
        let stk_aligned = ((stk_top as usize) & !7) as *mut u32;

        let frame_ptr = stk_aligned.sub(CONTEXT_STACK_SIZE) as *mut UcStk;

        (*frame_ptr) = UcStk {
            r4: 0x04040404,
            r5: 0x05050505,
            r6: 0x06060606,
            r7: 0x07070707,
            r8: 0x08080808,
            r9: 0x09090909,
            r10: 0x10101010,
            r11: 0x11111111,
            exc_return: 0xFFFF_FFFD,
            r0: kernel as u32,
            r1: id.index() as u32,
            r2: entry as usize as u32,
            r3: 0,
            r12: 0,
            lr: os_task_return as *const () as u32,
            pc: (os_task_trampoline as usize as u32) | 1,
            xpsr: 0x0100_0000,
        };

        // Return pointer 4 bytes before frame to match PendSV's "add r0, r0, #4"
        (frame_ptr as *mut u32).sub(1) as *mut OsStkElement
    }
}

/// Helper function called from PendSV to perform TCB switching
/// Returns new task's stack pointer
#[inline(never)]
#[no_mangle]
unsafe extern "C" fn pendsv_switch_context(cur_sp: *mut u32) -> *mut u32 {
    unsafe {
        let cur_tcb_ptr = CPU_STATE.tcb_cur;

        if !cur_tcb_ptr.is_null() {
            (*cur_tcb_ptr).stk_ptr = cur_sp;
        }

        CPU_STATE.tcb_cur = CPU_STATE.tcb_high_rdy;

        let new_tcb_ptr = CPU_STATE.tcb_cur;

        if new_tcb_ptr.is_null() {
            core::ptr::null_mut()
        } else {
            (*new_tcb_ptr).stk_ptr
        }
    }
}

/// PendSV exception handler - performs full context switch
///
/// 1. Save R4-R11, LR to current task's PSP (skip if first task)
/// 2. Call switch_context to swap TCB pointers
/// 3. Restore R4-R11, LR from new task's stack
/// 4. Exception return
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "cpsid i",
        "dsb",
        "isb",

        "mrs r0, psp",

        "ldr r1, ={cpu_state}",
        "ldr r1, [r1]",
        "cbz r1, 1f",

        "stmdb r0!, {{r4-r11, lr}}",

        "sub r0, r0, #4",

        "1:",
        "bl pendsv_switch_context",

        "cbz r0, 2f",
        "add r0, r0, #4",
        "ldmia r0!, {{r4-r11, lr}}",

        "msr psp, r0",

        "2:",
        "cpsie i",
        "dsb",
        "isb",

        "bx lr",

        cpu_state = sym CPU_STATE,
    );
}

/// SysTick interrupt handler
#[no_mangle]
pub extern "C" fn SysTick() {
    KERNEL.interrupt(|isr| isr.tick_advance());
}

/// Task return handler; task entries never return
#[no_mangle]
fn os_task_return() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}
