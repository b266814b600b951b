//! Semaphore implementation
//!
//! Counting semaphores for signaling between tasks and from interrupt
//! handlers to tasks. Semaphores live in a fixed pool inside the
//! [`Kernel`] and are addressed by [`SemId`].

use crate::config::CFG_MAX_SEMS;
use crate::error::{OsError, OsResult};
use crate::kernel::{Kernel, SchedState};
use crate::task::tcb::{PendLink, TcbList};
use crate::task::{OsTcb, TaskHandle};
use crate::types::{BlockReason, OsPendStatus, OsSemCtr, OsTaskState, SemId, TaskId, Timeout};

/// Pend list for tasks waiting on a semaphore
///
/// Highest priority first, FIFO among equal priorities.
#[derive(Debug)]
pub struct PendList {
    list: TcbList<PendLink>,
}

impl PendList {
    /// Create a new empty pend list
    pub const fn new() -> Self {
        PendList { list: TcbList::new() }
    }

    /// Check if list is empty
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Get head of list
    #[inline(always)]
    pub fn head(&self) -> Option<TaskId> {
        self.list.head()
    }

    /// Number of waiters
    pub fn len(&self, tcbs: &[OsTcb]) -> usize {
        self.list.len(tcbs)
    }

    /// Insert in priority order, behind waiters of equal priority
    pub(crate) fn insert_by_prio(&mut self, tcbs: &mut [OsTcb], id: TaskId) {
        self.list.insert_ordered(tcbs, id, |new, cur| new.prio > cur.prio);
    }

    /// Remove specific TCB from list
    #[inline]
    pub(crate) fn remove(&mut self, tcbs: &mut [OsTcb], id: TaskId) {
        self.list.remove(tcbs, id);
    }

    /// Remove the first waiter
    #[inline]
    pub(crate) fn pop_head(&mut self, tcbs: &mut [OsTcb]) -> Option<TaskId> {
        self.list.pop_head(tcbs)
    }
}

impl Default for PendList {
    fn default() -> Self {
        Self::new()
    }
}

/// Counting semaphore
#[derive(Debug)]
pub struct OsSem {
    /// Name for debugging
    pub(crate) name: &'static str,
    /// Current count
    pub(crate) count: OsSemCtr,
    /// Upper bound on `count`
    pub(crate) max: OsSemCtr,
    /// Tasks waiting on this semaphore
    pub(crate) pend_list: PendList,
    pub(crate) created: bool,
}

impl OsSem {
    pub const fn new() -> Self {
        OsSem {
            name: "",
            count: 0,
            max: 0,
            pend_list: PendList::new(),
            created: false,
        }
    }
}

impl Default for OsSem {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of the first half of a blocking take
#[cfg_attr(all(feature = "defmt", target_arch = "arm"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pend {
    /// A unit was available and has been consumed
    Acquired,
    /// The caller is now blocked on the semaphore
    Blocked,
}

impl SchedState {
    /// Signal a semaphore
    ///
    /// Hands the unit to the first waiter if there is one, otherwise
    /// increments the count. Never switches context.
    ///
    /// # Returns
    /// * `Ok(Some(id))` - Waiter `id` is now `Ready`
    /// * `Ok(None)` - Count incremented
    /// * `Err(OsError::Saturated)` - Count already at its maximum; no change
    pub(crate) fn sem_post(&mut self, sem: SemId) -> OsResult<Option<TaskId>> {
        debug_assert!(self.sems[sem.index()].created);

        if let Some(id) = self.sems[sem.index()].pend_list.pop_head(&mut self.tcbs) {
            self.tick_remove(id);
            self.tcb_mut(id).pend_status = OsPendStatus::Ok;
            self.rdy_insert(id);
            crate::trace!("sem {} wakes {}", self.sems[sem.index()].name, self.tcb(id).name);
            return Ok(Some(id));
        }

        let s = &mut self.sems[sem.index()];
        if s.count >= s.max {
            return Err(OsError::Saturated);
        }
        s.count += 1;
        Ok(None)
    }
}

impl Kernel {
    /// Create a counting semaphore
    ///
    /// # Arguments
    /// * `name` - Semaphore name
    /// * `initial` - Initial count
    /// * `max` - Maximum count, at least 1
    ///
    /// # Returns
    /// * `Ok(id)` - Semaphore created
    /// * `Err(OsError::SemCountInvalid)` - `max` is 0 or `initial > max`
    /// * `Err(OsError::SemNoMoreObj)` - Semaphore pool is full
    pub fn sem_create(&self, name: &'static str, initial: OsSemCtr, max: OsSemCtr) -> OsResult<SemId> {
        if max == 0 || initial > max {
            return Err(OsError::SemCountInvalid);
        }

        self.with_state(|st| {
            if st.sem_cnt >= CFG_MAX_SEMS {
                crate::error!("no free semaphore for {}", name);
                return Err(OsError::SemNoMoreObj);
            }

            let id = SemId(st.sem_cnt as u8);
            st.sem_cnt += 1;

            let s = &mut st.sems[id.index()];
            *s = OsSem::new();
            s.name = name;
            s.count = initial;
            s.max = max;
            s.created = true;

            crate::debug!("sem {} created, count {}/{}", name, initial, max);
            Ok(id)
        })
    }

    /// Get current semaphore count
    pub fn sem_count(&self, sem: SemId) -> OsSemCtr {
        self.with_state(|st| st.sems[sem.index()].count)
    }

    /// Get the configured maximum count
    pub fn sem_max(&self, sem: SemId) -> OsSemCtr {
        self.with_state(|st| st.sems[sem.index()].max)
    }

    /// Number of tasks blocked on the semaphore
    pub fn sem_waiters(&self, sem: SemId) -> usize {
        self.with_state(|st| st.sems[sem.index()].pend_list.len(&st.tcbs))
    }
}

impl<'k> TaskHandle<'k> {
    /// Wait on (pend) the semaphore
    ///
    /// Consumes one unit, blocking for at most `timeout` when none is
    /// available. Must be called from the running task; the blocking path
    /// relies on the port switching away before this returns.
    ///
    /// # Returns
    /// * `Ok(())` - Semaphore acquired
    /// * `Err(OsError::Timeout)` - Timeout expired, or `Ticks(0)` and none available
    /// * `Err(OsError::SchedLocked)` - Would block while the scheduler is locked
    /// * `Err(OsError::TimeDlyTooLong)` - `Ticks` beyond [`OS_TICK_DLY_MAX`](crate::types::OS_TICK_DLY_MAX)
    /// * `Err(OsError::StillBlocked)` - The port returned without switching
    pub fn take(&self, sem: SemId, timeout: Timeout) -> OsResult<()> {
        match self.begin_take(sem, timeout)? {
            Pend::Acquired => Ok(()),
            Pend::Blocked => self.take_result(),
        }
    }

    /// Take without blocking
    #[inline]
    pub fn try_take(&self, sem: SemId) -> OsResult<()> {
        self.take(sem, Timeout::Ticks(0))
    }

    /// First half of [`take`](Self::take): consume a unit or block
    ///
    /// On `Pend::Blocked` the scheduler has been invoked; the outcome is
    /// read with [`take_result`](Self::take_result) once the task runs again.
    pub fn begin_take(&self, sem: SemId, timeout: Timeout) -> OsResult<Pend> {
        let kernel = self.kernel();
        if !kernel.is_running() {
            return Err(OsError::OsNotRunning);
        }
        if !timeout.is_valid() {
            return Err(OsError::TimeDlyTooLong);
        }

        kernel.with_state(|st| {
            let id = self.id();
            st.check_running(id)?;

            let s = &mut st.sems[sem.index()];
            debug_assert!(s.created);

            if s.count > 0 {
                s.count -= 1;
                return Ok(Pend::Acquired);
            }

            if timeout == Timeout::Ticks(0) {
                return Err(OsError::Timeout);
            }

            if kernel.sched_lock_nesting() > 0 {
                return Err(OsError::SchedLocked);
            }

            let now = kernel.now_ticks();
            let deadline = timeout.deadline(now);

            let tcb = st.tcb_mut(id);
            tcb.pend_status = OsPendStatus::Ok;
            tcb.task_state = OsTaskState::Blocked {
                reason: BlockReason::Semaphore(sem),
                deadline,
            };

            st.sems[sem.index()].pend_list.insert_by_prio(&mut st.tcbs, id);
            if let Some(deadline) = deadline {
                st.tick_list.insert(&mut st.tcbs, id, deadline, now);
            }

            crate::trace!("task {} pends on sem {}", st.tcb(id).name, st.sems[sem.index()].name);
            kernel.sched(st, false);
            Ok(Pend::Blocked)
        })
    }

    /// Second half of [`take`](Self::take): how the pend ended
    ///
    /// # Returns
    /// * `Ok(())` - Woken by a give; the unit is ours
    /// * `Err(OsError::Timeout)` - Deadline passed first
    /// * `Err(OsError::StillBlocked)` - Still waiting
    pub fn take_result(&self) -> OsResult<()> {
        self.kernel().with_state(|st| {
            let tcb = st.tcb(self.id());
            if tcb.is_blocked() {
                return Err(OsError::StillBlocked);
            }

            match tcb.pend_status {
                OsPendStatus::Ok => Ok(()),
                OsPendStatus::Timeout => Err(OsError::Timeout),
            }
        })
    }

    /// Signal (post) the semaphore
    ///
    /// Wakes the highest-priority waiter and reschedules, or increments the
    /// count when nobody waits.
    ///
    /// # Returns
    /// * `Ok(())` - Semaphore signaled
    /// * `Err(OsError::Saturated)` - Count already at its maximum; no change
    pub fn give(&self, sem: SemId) -> OsResult<()> {
        let kernel = self.kernel();

        kernel.with_state(|st| {
            st.check_running(self.id())?;

            match st.sem_post(sem) {
                Ok(Some(_)) => {
                    kernel.sched(st, false);
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(e) => {
                    crate::warn!("sem {} saturated", st.sems[sem.index()].name);
                    Err(e)
                }
            }
        })
    }
}
