//! Scheduler module
//!
//! Priority-based preemptive scheduler. The `Running` task is kept off the
//! ready lists; a scheduling decision compares it against the head of the
//! highest non-empty ready list.

mod rdy_list;

pub use rdy_list::ReadyList;

use crate::error::{OsError, OsResult};
use crate::kernel::SchedState;
use crate::task::TaskHandle;
use crate::types::{OsPrio, OsTaskState, TaskId};

impl SchedState {
    /// Make a task `Ready` and queue it behind every ready task of its priority
    pub(crate) fn rdy_insert(&mut self, id: TaskId) {
        let prio = self.tcb(id).prio;
        self.tcb_mut(id).task_state = OsTaskState::Ready;
        self.rdy_list[prio as usize].insert_tail(&mut self.tcbs, id);
        self.prio_tbl.insert(prio);
    }

    /// Take a `Ready` task off its ready list
    pub(crate) fn rdy_remove(&mut self, id: TaskId) {
        let prio = self.tcb(id).prio;
        let list = &mut self.rdy_list[prio as usize];
        list.remove(&mut self.tcbs, id);
        if list.is_empty() {
            self.prio_tbl.remove(prio);
        }
    }

    /// Pop the longest-waiting task at `prio`
    fn rdy_pop(&mut self, prio: OsPrio) -> Option<TaskId> {
        let list = &mut self.rdy_list[prio as usize];
        let id = list.pop_head(&mut self.tcbs)?;
        if list.is_empty() {
            self.prio_tbl.remove(prio);
        }
        Some(id)
    }

    /// Highest priority among `Ready` tasks
    #[inline]
    pub(crate) fn highest_ready(&self) -> Option<OsPrio> {
        self.prio_tbl.get_highest()
    }

    /// Scheduling decision
    ///
    /// A running task keeps the CPU unless a ready task has strictly higher
    /// priority, or `yielding` is set and a ready task has equal or higher
    /// priority. A preempted task goes to the tail of its ready list. When the
    /// current task has left `Running` (blocked, suspended) the head of the
    /// highest ready list takes over.
    ///
    /// Returns the new running task when the running task changed.
    pub(crate) fn schedule(&mut self, yielding: bool) -> Option<TaskId> {
        let high = self.highest_ready()?;

        if let Some(cur) = self.cur {
            let cur_tcb = self.tcb(cur);
            if cur_tcb.is_running() {
                let keep = if yielding { high < cur_tcb.prio } else { high <= cur_tcb.prio };
                if keep {
                    return None;
                }
                self.rdy_insert(cur);
            }
        }

        let next = self.rdy_pop(high)?;
        self.tcb_mut(next).task_state = OsTaskState::Running;
        self.cur = Some(next);
        Some(next)
    }
}

impl<'k> TaskHandle<'k> {
    /// Give up the CPU to any ready task of equal or higher priority
    ///
    /// Returns immediately when no such task exists.
    pub fn yield_now(&self) -> OsResult<()> {
        let kernel = self.kernel();
        if !kernel.is_running() {
            return Err(OsError::OsNotRunning);
        }

        kernel.with_state(|st| {
            st.check_running(self.id())?;
            kernel.sched(st, true);
            Ok(())
        })
    }

    /// Lock the scheduler
    ///
    /// While locked, no context switch happens and blocking calls fail with
    /// [`OsError::SchedLocked`]. Locks nest.
    pub fn sched_lock(&self) -> OsResult<()> {
        let kernel = self.kernel();
        if !kernel.is_running() {
            return Err(OsError::OsNotRunning);
        }

        kernel.with_state(|st| {
            st.check_running(self.id())?;
            kernel.flags.try_sched_lock()
        })
    }

    /// Unlock the scheduler; the outermost unlock reschedules
    pub fn sched_unlock(&self) -> OsResult<()> {
        let kernel = self.kernel();
        if !kernel.is_running() {
            return Err(OsError::OsNotRunning);
        }

        kernel.with_state(|st| {
            st.check_running(self.id())?;
            let remaining = kernel.flags.try_sched_unlock()?;
            if remaining == 0 {
                kernel.sched(st, false);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CFG_MAX_TASKS;
    use std::boxed::Box;

    /// Scheduler state with `prios.len()` tasks, all ready, nothing running
    fn state(prios: &[OsPrio]) -> Box<SchedState> {
        assert!(prios.len() <= CFG_MAX_TASKS);
        let mut st = Box::new(SchedState::new());
        for (i, &prio) in prios.iter().enumerate() {
            let id = TaskId(i as u8);
            st.tcb_mut(id).id = id;
            st.tcb_mut(id).prio = prio;
            st.rdy_insert(id);
        }
        st.task_cnt = prios.len();
        st
    }

    fn block(st: &mut SchedState, id: TaskId) {
        st.tcb_mut(id).task_state = OsTaskState::Blocked {
            reason: crate::types::BlockReason::Timeout,
            deadline: None,
        };
    }

    #[test]
    fn test_picks_highest_priority() {
        let mut st = state(&[1, 4, 2]);
        assert_eq!(st.schedule(false), Some(TaskId(1)));
        assert_eq!(st.tcb(TaskId(1)).task_state, OsTaskState::Running);
        assert_eq!(st.schedule(false), None);
    }

    #[test]
    fn test_equal_priority_does_not_preempt() {
        let mut st = state(&[3, 3]);
        assert_eq!(st.schedule(false), Some(TaskId(0)));
        assert_eq!(st.schedule(false), None);
        assert_eq!(st.cur, Some(TaskId(0)));
    }

    #[test]
    fn test_yield_round_robins_equal_priorities() {
        let mut st = state(&[3, 3, 3]);
        assert_eq!(st.schedule(false), Some(TaskId(0)));
        assert_eq!(st.schedule(true), Some(TaskId(1)));
        assert_eq!(st.schedule(true), Some(TaskId(2)));
        assert_eq!(st.schedule(true), Some(TaskId(0)));
        assert!(st.tcb(TaskId(1)).is_ready());
    }

    #[test]
    fn test_yield_alone_keeps_running() {
        let mut st = state(&[5, 1]);
        assert_eq!(st.schedule(false), Some(TaskId(0)));
        assert_eq!(st.schedule(true), None);
    }

    #[test]
    fn test_preempted_task_queues_behind_waiters() {
        let mut st = state(&[2, 2]);
        assert_eq!(st.schedule(false), Some(TaskId(0)));

        // A higher priority task appears and preempts task 0
        let hi = TaskId(2);
        st.tcb_mut(hi).id = hi;
        st.tcb_mut(hi).prio = 7;
        st.rdy_insert(hi);
        assert_eq!(st.schedule(false), Some(hi));
        assert!(st.tcb(TaskId(0)).is_ready());

        // Task 1 has been ready longer than task 0
        block(&mut st, hi);
        assert_eq!(st.schedule(false), Some(TaskId(1)));
    }

    #[test]
    fn test_blocked_current_hands_over() {
        let mut st = state(&[6, 2]);
        assert_eq!(st.schedule(false), Some(TaskId(0)));
        block(&mut st, TaskId(0));
        assert_eq!(st.schedule(false), Some(TaskId(1)));
        assert!(st.tcb(TaskId(0)).is_blocked());
        assert!(st.prio_tbl.is_empty());
    }

    #[test]
    fn test_nothing_ready() {
        let mut st = state(&[]);
        assert_eq!(st.schedule(false), None);
    }
}
