//! Kernel context and interrupt entry/exit
//!
//! A [`Kernel`] owns every piece of scheduler state: the TCB table, ready
//! lists, the tick list and the semaphore pool. The firmware uses the
//! [`KERNEL`] singleton, constructed at compile time and never rebuilt;
//! tests build their own instances.

use portable_atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::config::{CFG_IDLE_STK_SIZE, CFG_MAX_SEMS, CFG_MAX_TASKS, CFG_PRIO_IDLE, CFG_PRIO_MAX};
use crate::core::cs_cell::CsCell;
use crate::critical::{critical_section, is_isr_context};
use crate::error::{OsError, OsResult};
use crate::prio::PrioTable;
use crate::sched::ReadyList;
use crate::sem::OsSem;
use crate::task::{OsTcb, TaskHandle};
use crate::time::TickList;
use crate::types::{OsNestingCtr, OsPrio, OsSemCtr, OsStkElement, OsTaskState, OsTick, SemId, TaskId};

// ============ Kernel State Structures ============

/// Atomic kernel flags
pub struct KernelFlags {
    initialized: AtomicBool,
    running: AtomicBool,
    int_nesting: AtomicU8,
    sched_lock_nesting: AtomicU8,
    tick_counter: AtomicU32,
    /// A switch asked for by any interrupt level, consumed at the outermost exit
    switch_pending: AtomicBool,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            int_nesting: AtomicU8::new(0),
            sched_lock_nesting: AtomicU8::new(0),
            tick_counter: AtomicU32::new(0),
            switch_pending: AtomicBool::new(false),
        }
    }

    /// Check if the OS is running
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Check if OS is initialized
    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Get current tick count
    #[inline(always)]
    pub fn tick_get(&self) -> OsTick {
        self.tick_counter.load(Ordering::Relaxed)
    }

    /// Get interrupt nesting level
    #[inline(always)]
    pub fn int_nesting(&self) -> OsNestingCtr {
        self.int_nesting.load(Ordering::Relaxed)
    }

    /// Get scheduler lock nesting level
    #[inline(always)]
    pub fn sched_lock_nesting(&self) -> OsNestingCtr {
        self.sched_lock_nesting.load(Ordering::SeqCst)
    }

    /// Increment and return tick count; wraps
    #[inline(always)]
    pub(crate) fn tick_increment(&self) -> OsTick {
        self.tick_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    #[cfg(test)]
    pub(crate) fn tick_set(&self, tick: OsTick) {
        self.tick_counter.store(tick, Ordering::Relaxed);
    }

    /// Enter ISR
    #[inline(always)]
    pub(crate) fn int_enter(&self) {
        let nesting = self.int_nesting.load(Ordering::Relaxed);
        self.int_nesting.store(nesting.saturating_add(1), Ordering::Relaxed);
    }

    /// Decrement int nesting
    #[inline(always)]
    pub(crate) fn int_nesting_dec(&self) -> OsNestingCtr {
        let nesting = self.int_nesting.load(Ordering::Relaxed).saturating_sub(1);
        self.int_nesting.store(nesting, Ordering::Relaxed);
        nesting
    }

    /// Record that an interrupt wants a switch on the way out
    #[inline(always)]
    pub(crate) fn request_switch(&self) {
        self.switch_pending.store(true, Ordering::Relaxed);
    }

    /// Take the pending switch request, clearing it
    #[inline(always)]
    pub(crate) fn take_switch_request(&self) -> bool {
        self.switch_pending.swap(false, Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn set_initialized(&self, val: bool) {
        self.initialized.store(val, Ordering::SeqCst);
    }

    #[inline(always)]
    pub(crate) fn set_running(&self, val: bool) {
        self.running.store(val, Ordering::SeqCst);
    }

    /// Lock scheduler
    pub(crate) fn try_sched_lock(&self) -> OsResult<()> {
        let nesting = self.sched_lock_nesting.load(Ordering::SeqCst);
        if nesting == OsNestingCtr::MAX {
            return Err(OsError::LockNestingOvf);
        }
        self.sched_lock_nesting.store(nesting + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Unlock scheduler
    pub(crate) fn try_sched_unlock(&self) -> OsResult<OsNestingCtr> {
        let nesting = self.sched_lock_nesting.load(Ordering::SeqCst);
        if nesting == 0 {
            return Err(OsError::SchedNotLocked);
        }
        self.sched_lock_nesting.store(nesting - 1, Ordering::SeqCst);
        Ok(nesting - 1)
    }
}

/// Scheduler state, only touched inside critical sections
pub struct SchedState {
    pub(crate) tcbs: [OsTcb; CFG_MAX_TASKS],
    pub(crate) task_cnt: usize,
    pub(crate) prio_tbl: PrioTable,
    pub(crate) rdy_list: [ReadyList; CFG_PRIO_MAX],
    pub(crate) tick_list: TickList,
    pub(crate) sems: [OsSem; CFG_MAX_SEMS],
    pub(crate) sem_cnt: usize,
    /// Task in `Running` state
    pub(crate) cur: Option<TaskId>,
    pub(crate) idle: Option<TaskId>,
    idle_stk: [OsStkElement; CFG_IDLE_STK_SIZE],
}

impl SchedState {
    pub(crate) const fn new() -> Self {
        Self {
            tcbs: [const { OsTcb::new() }; CFG_MAX_TASKS],
            task_cnt: 0,
            prio_tbl: PrioTable::new(),
            rdy_list: [const { ReadyList::new() }; CFG_PRIO_MAX],
            tick_list: TickList::new(),
            sems: [const { OsSem::new() }; CFG_MAX_SEMS],
            sem_cnt: 0,
            cur: None,
            idle: None,
            idle_stk: [0; CFG_IDLE_STK_SIZE],
        }
    }

    #[inline(always)]
    pub(crate) fn tcb(&self, id: TaskId) -> &OsTcb {
        &self.tcbs[id.index()]
    }

    #[inline(always)]
    pub(crate) fn tcb_mut(&mut self, id: TaskId) -> &mut OsTcb {
        &mut self.tcbs[id.index()]
    }

    /// Raw TCB pointer handed to the port for the register-level switch
    #[inline(always)]
    pub(crate) fn tcb_ptr(&mut self, id: TaskId) -> *mut OsTcb {
        &mut self.tcbs[id.index()] as *mut OsTcb
    }

    /// Priority of the running task, if any
    #[inline]
    pub(crate) fn cur_prio(&self) -> Option<OsPrio> {
        self.cur.map(|id| self.tcb(id).prio)
    }

    /// Fail unless `id` is the task that owns the CPU
    #[inline]
    pub(crate) fn check_running(&self, id: TaskId) -> OsResult<()> {
        debug_assert!(!is_isr_context(), "task operation in interrupt context");
        if self.cur == Some(id) && self.tcb(id).is_running() {
            Ok(())
        } else {
            Err(OsError::TaskNotRunning)
        }
    }
}

/// The kernel context object
pub struct Kernel {
    pub(crate) flags: KernelFlags,
    pub(crate) sched: CsCell<SchedState>,
}

/// Global kernel instance used by the firmware and the port layer
pub static KERNEL: Kernel = Kernel::new();

// ============ Initialization ============

/// Internal IDLE task function
fn os_idle_task(_: TaskHandle<'static>) -> ! {
    loop {
        crate::port::os_cpu_idle();
    }
}

impl Kernel {
    pub const fn new() -> Self {
        Kernel {
            flags: KernelFlags::new(),
            sched: CsCell::new(SchedState::new()),
        }
    }

    /// Atomic flags (running, nesting, tick counter)
    #[inline(always)]
    pub fn flags(&self) -> &KernelFlags {
        &self.flags
    }

    /// Run `f` on the scheduler state with interrupts masked
    #[inline]
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut SchedState) -> R) -> R {
        critical_section(|cs| f(self.sched.get(cs)))
    }

    /// Initialize the kernel
    ///
    /// Creates the idle task at [`CFG_PRIO_IDLE`]. Must be called before any
    /// other kernel function; calling it again is a no-op.
    ///
    /// # Returns
    /// * `Ok(())` - Initialization successful
    /// * `Err(OsError::OsRunning)` - OS is already running
    pub fn init(&'static self) -> OsResult<()> {
        if self.flags.is_running() {
            return Err(OsError::OsRunning);
        }
        if self.flags.is_initialized() {
            return Ok(());
        }

        critical_section(|cs| {
            let st = self.sched.get(cs);
            let stk_base = st.idle_stk.as_mut_ptr();
            let idle = self.task_create_locked(
                st,
                "Idle",
                os_idle_task,
                CFG_PRIO_IDLE,
                stk_base,
                CFG_IDLE_STK_SIZE,
            )?;
            st.idle = Some(idle);
            Ok::<(), OsError>(())
        })?;

        self.flags.set_initialized(true);
        crate::info!("kernel initialized");
        Ok(())
    }

    /// Start multitasking
    ///
    /// Makes the highest-priority ready task `Running` and hands the CPU to
    /// it. On the target this does not return; on the host stub port it
    /// returns once the bookkeeping is done.
    ///
    /// # Returns
    /// * `Err(OsError::OsNotInit)` - OS not initialized
    /// * `Err(OsError::OsRunning)` - OS is already running
    pub fn start(&self) -> OsResult<()> {
        if !self.flags.is_initialized() {
            return Err(OsError::OsNotInit);
        }

        if self.flags.is_running() {
            return Err(OsError::OsRunning);
        }

        let first = critical_section(|cs| {
            let st = self.sched.get(cs);
            let first = st.schedule(false)?;
            crate::info!("starting with task {}", st.tcb(first).name);
            Some(st.tcb_ptr(first))
        })
        .ok_or(OsError::OsNotInit)?;

        self.flags.set_running(true);

        crate::port::os_cpu_systick_init(crate::config::CFG_CPU_CLOCK_HZ / crate::config::CFG_TICK_RATE_HZ);

        unsafe { crate::port::os_start_high_rdy(first) };

        Ok(())
    }

    /// Check if the scheduler has been started
    #[inline]
    pub fn is_running(&self) -> bool {
        self.flags.is_running()
    }

    /// Current value of the tick counter; lock-free, callable anywhere
    #[inline]
    pub fn now_ticks(&self) -> OsTick {
        self.flags.tick_get()
    }

    /// Scheduling point from task context
    ///
    /// Picks the next task and asks the port to switch to it. Does nothing
    /// before start or while the scheduler is locked.
    pub(crate) fn sched(&self, st: &mut SchedState, yielding: bool) {
        if !self.flags.is_running() || self.flags.sched_lock_nesting() > 0 {
            return;
        }

        if let Some(next) = st.schedule(yielding) {
            crate::trace!("switch to {}", st.tcb(next).name);
            crate::port::os_ctx_sw(st.tcb_ptr(next));
        }
    }

    // ============ Interrupt entry/exit ============

    /// Run an interrupt body under the entry/exit protocol
    ///
    /// The body gets an [`InterruptHandle`], which only offers non-blocking
    /// operations. Any switch it asks for, at any nesting depth, is deferred
    /// until the outermost interrupt returns, where the scheduler runs once.
    pub fn interrupt<R>(&self, f: impl FnOnce(&mut InterruptHandle<'_>) -> R) -> R {
        self.flags.int_enter();
        crate::trace!("isr enter");

        let mut isr = InterruptHandle {
            kernel: self,
            switch_requested: false,
        };
        let ret = f(&mut isr);

        if isr.switch_requested {
            self.flags.request_switch();
        }
        self.int_exit();
        ret
    }

    /// Exit ISR
    fn int_exit(&self) {
        let nesting = self.flags.int_nesting_dec();
        crate::trace!("isr exit, nesting {}", nesting);

        if nesting > 0 || !self.flags.take_switch_request() {
            return;
        }

        if !self.flags.is_running() || self.flags.sched_lock_nesting() > 0 {
            return;
        }

        critical_section(|cs| {
            let st = self.sched.get(cs);
            if let Some(next) = st.schedule(false) {
                crate::trace!("switch to {} at isr exit", st.tcb(next).name);
                crate::port::os_int_ctx_sw(st.tcb_ptr(next));
            }
        });
    }

    // ============ Introspection ============

    /// Task currently in `Running` state
    pub fn running_task(&self) -> Option<TaskId> {
        self.with_state(|st| st.cur)
    }

    /// The idle task, once initialized
    pub fn idle_task(&self) -> Option<TaskId> {
        self.with_state(|st| st.idle)
    }

    /// State of a task
    pub fn task_state(&self, id: TaskId) -> OsTaskState {
        self.with_state(|st| st.tcb(id).task_state)
    }

    /// Priority of a task
    pub fn task_prio(&self, id: TaskId) -> OsPrio {
        self.with_state(|st| st.tcb(id).prio)
    }

    /// Name of a task
    pub fn task_name(&self, id: TaskId) -> &'static str {
        self.with_state(|st| st.tcb(id).name)
    }

    /// Number of created tasks, idle included
    pub fn task_count(&self) -> usize {
        self.with_state(|st| st.task_cnt)
    }

    /// Ids of all created tasks, idle included, in creation order
    pub fn tasks(&self) -> impl Iterator<Item = TaskId> {
        (0..self.task_count()).map(|i| TaskId(i as u8))
    }

    /// Scheduler lock depth
    pub fn sched_lock_nesting(&self) -> OsNestingCtr {
        self.flags.sched_lock_nesting()
    }

    /// Obtain the task-context capability for `id`.
    ///
    /// Task entry functions receive their handle as an argument; this is
    /// for ports that drive tasks themselves, such as host-side simulation.
    ///
    /// # Safety
    /// The caller must be executing as task `id`, in task context.
    pub unsafe fn task_handle(&self, id: TaskId) -> TaskHandle<'_> {
        TaskHandle::new(self, id)
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Interrupt capability ============

/// Capability held by interrupt bodies run through [`Kernel::interrupt`]
///
/// Only non-blocking operations exist on this type, so a blocking take
/// from interrupt context does not compile.
pub struct InterruptHandle<'k> {
    kernel: &'k Kernel,
    switch_requested: bool,
}

impl<'k> InterruptHandle<'k> {
    /// Give a semaphore from interrupt context
    ///
    /// Never switches by itself. Returns `true` when the give woke a task
    /// whose priority is at least that of the interrupted task; the switch
    /// then happens when the interrupt returns.
    ///
    /// # Returns
    /// * `Ok(woken)` - One waiter woken or the count incremented
    /// * `Err(OsError::Saturated)` - Count already at its maximum; no change
    pub fn give(&mut self, sem: SemId) -> OsResult<bool> {
        self.post(sem).map(|(_, switch)| switch)
    }

    /// Give a semaphore and report where the unit went
    ///
    /// Same as [`give`](Self::give), but returns the task the unit was handed
    /// to, or `None` when it went into the count.
    pub fn give_woken(&mut self, sem: SemId) -> OsResult<Option<TaskId>> {
        self.post(sem).map(|(woken, _)| woken)
    }

    fn post(&mut self, sem: SemId) -> OsResult<(Option<TaskId>, bool)> {
        let (woken, switch) = self.kernel.with_state(|st| {
            let woken = st.sem_post(sem)?;
            let switch = match (woken, st.cur_prio()) {
                (Some(id), Some(cur)) => st.tcb(id).prio >= cur,
                _ => false,
            };
            Ok::<_, OsError>((woken, switch))
        })?;
        self.switch_requested |= switch;
        Ok((woken, switch))
    }

    /// Advance the tick counter and wake expired tasks
    ///
    /// Called once per timer interrupt.
    pub fn tick_advance(&mut self) {
        self.switch_requested |= self.kernel.tick_advance_isr();
    }

    /// Whether any call so far asked for a switch at interrupt return
    #[inline]
    pub fn switch_requested(&self) -> bool {
        self.switch_requested
    }

    /// Current tick count
    #[inline]
    pub fn now_ticks(&self) -> OsTick {
        self.kernel.now_ticks()
    }

    /// Semaphore count, for diagnostics
    pub fn sem_count(&self, sem: SemId) -> OsSemCtr {
        self.kernel.sem_count(sem)
    }
}
