//! Task management module
//!
//! Provides task creation, the task-context capability handle, and
//! suspend/resume.

pub(crate) mod tcb;

pub use tcb::{Links, OsTcb};

use crate::config::{CFG_MAX_TASKS, CFG_PRIO_MAX, CFG_STK_SIZE_MIN};
use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::kernel::{Kernel, SchedState};
use crate::types::{OsPrio, OsStkElement, OsTaskState, OsTick, TaskId};

/// Task entry point function type
///
/// The entry receives the task's own [`TaskHandle`] and never returns.
pub type OsTaskFn = fn(TaskHandle<'static>) -> !;

/// Task-context capability
///
/// Every blocking or scheduling operation is a method on this handle, so
/// interrupt code, which only ever sees an
/// [`InterruptHandle`](crate::InterruptHandle), cannot call them.
pub struct TaskHandle<'k> {
    kernel: &'k Kernel,
    id: TaskId,
}

impl<'k> TaskHandle<'k> {
    #[inline(always)]
    pub(crate) fn new(kernel: &'k Kernel, id: TaskId) -> Self {
        TaskHandle { kernel, id }
    }

    /// The task this handle belongs to
    #[inline(always)]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The kernel this task runs on
    #[inline(always)]
    pub fn kernel(&self) -> &'k Kernel {
        self.kernel
    }

    /// Current tick count
    #[inline]
    pub fn now_ticks(&self) -> OsTick {
        self.kernel.now_ticks()
    }

    /// Suspend a task (the caller itself, or a ready task)
    ///
    /// A suspended task is never scheduled until resumed. Blocked tasks
    /// cannot be suspended.
    pub fn suspend(&self, target: TaskId) -> OsResult<()> {
        let kernel = self.kernel;
        if !kernel.is_running() {
            return Err(OsError::OsNotRunning);
        }

        kernel.with_state(|st| {
            st.check_running(self.id)?;

            if Some(target) == st.idle {
                return Err(OsError::TaskSuspendIdle);
            }

            match st.tcb(target).task_state {
                OsTaskState::Ready => {
                    st.rdy_remove(target);
                    st.tcb_mut(target).task_state = OsTaskState::Suspended;
                }
                OsTaskState::Running => {
                    if kernel.flags.sched_lock_nesting() > 0 {
                        return Err(OsError::SchedLocked);
                    }
                    st.tcb_mut(target).task_state = OsTaskState::Suspended;
                    kernel.sched(st, false);
                }
                OsTaskState::Suspended => {}
                OsTaskState::Blocked { .. } | OsTaskState::Dormant => {
                    return Err(OsError::StateInvalid);
                }
            }

            crate::debug!("task {} suspended", st.tcb(target).name);
            Ok(())
        })
    }

    /// Resume a suspended task
    pub fn resume(&self, target: TaskId) -> OsResult<()> {
        let kernel = self.kernel;
        if !kernel.is_running() {
            return Err(OsError::OsNotRunning);
        }

        kernel.with_state(|st| {
            st.check_running(self.id)?;

            if !st.tcb(target).is_suspended() {
                return Err(OsError::TaskNotSuspended);
            }

            st.rdy_insert(target);
            crate::debug!("task {} resumed", st.tcb(target).name);
            kernel.sched(st, false);
            Ok(())
        })
    }
}

impl Kernel {
    /// Create a new task
    ///
    /// # Arguments
    /// * `name` - Task name for debugging
    /// * `entry` - Task entry point function
    /// * `prio` - Task priority (higher value preempts lower)
    /// * `stack` - Stack region, owned by the task from now on
    ///
    /// # Returns
    /// * `Ok(id)` - Task created and `Ready`
    /// * `Err(OsError::TaskNoMoreTcb)` - TCB table full
    /// * `Err(OsError::PrioInvalid)` - Priority out of range
    /// * `Err(OsError::StkSizeInvalid)` - Stack smaller than [`CFG_STK_SIZE_MIN`]
    ///
    /// # Example
    /// ```ignore
    /// static mut WORKER_STK: [OsStkElement; 256] = [0; 256];
    ///
    /// fn worker(task: TaskHandle<'static>) -> ! {
    ///     loop { let _ = task.delay(100); }
    /// }
    ///
    /// KERNEL.task_create("Worker", worker, 2, unsafe { &mut *(&raw mut WORKER_STK) })?;
    /// ```
    pub fn task_create(
        &'static self,
        name: &'static str,
        entry: OsTaskFn,
        prio: OsPrio,
        stack: &'static mut [OsStkElement],
    ) -> OsResult<TaskId> {
        let stk_size = stack.len();
        let stk_base = stack.as_mut_ptr();

        critical_section(|cs| {
            let st = self.sched.get(cs);
            let id = self.task_create_locked(st, name, entry, prio, stk_base, stk_size)?;
            self.sched(st, false);
            Ok(id)
        })
    }

    /// Fill the next free TCB and make it ready
    pub(crate) fn task_create_locked(
        &'static self,
        st: &mut SchedState,
        name: &'static str,
        entry: OsTaskFn,
        prio: OsPrio,
        stk_base: *mut OsStkElement,
        stk_size: usize,
    ) -> OsResult<TaskId> {
        if prio as usize >= CFG_PRIO_MAX {
            return Err(OsError::PrioInvalid);
        }

        if stk_size < CFG_STK_SIZE_MIN {
            return Err(OsError::StkSizeInvalid);
        }

        if st.task_cnt >= CFG_MAX_TASKS {
            crate::error!("no free TCB for task {}", name);
            return Err(OsError::TaskNoMoreTcb);
        }

        let id = TaskId(st.task_cnt as u8);
        st.task_cnt += 1;

        let stk_ptr = unsafe {
            crate::port::os_task_stk_init(entry, self, id, stk_base, stk_size)
        };

        let tcb = st.tcb_mut(id);
        *tcb = OsTcb::new();
        tcb.id = id;
        tcb.name = name;
        tcb.prio = prio;
        tcb.stk_ptr = stk_ptr;
        tcb.stk_base = stk_base;
        tcb.stk_size = stk_size;

        st.rdy_insert(id);

        crate::debug!("task {} created at prio {}", name, prio);
        Ok(id)
    }
}

/// First code a new task runs; builds its handle and enters the task body
///
/// The port's initial stack frame passes the kernel, the task id and the
/// entry function in the first three argument registers.
#[allow(improper_ctypes_definitions)]
pub(crate) extern "C" fn os_task_trampoline(kernel: *const Kernel, id: u32, entry: OsTaskFn) -> ! {
    // SAFETY: the port only starts a task with the `&'static Kernel` that
    // created it, and the task is running in task context.
    let kernel: &'static Kernel = unsafe { &*kernel };
    entry(TaskHandle::new(kernel, TaskId(id as u8)))
}
