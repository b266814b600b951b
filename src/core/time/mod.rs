//! Time management module
//!
//! Provides tick handling, time delays, and timeout management.

use crate::config::CFG_TICK_RATE_HZ;
use crate::error::{OsError, OsResult};
use crate::kernel::{Kernel, SchedState};
use crate::task::tcb::{TcbList, TickLink};
use crate::task::{OsTcb, TaskHandle};
use crate::types::{tick_reached, OS_TICK_DLY_MAX, BlockReason, OsPendStatus, OsTaskState, OsTick, OsTickDiff, TaskId};

/// Delay set: blocked tasks with a deadline, nearest deadline first
///
/// Entries are ordered by their distance from the tick at which they were
/// inserted. All distances shrink at the same rate, so the order stays valid
/// across counter wraparound.
#[derive(Debug)]
pub struct TickList {
    list: TcbList<TickLink>,
}

impl TickList {
    pub const fn new() -> Self {
        TickList { list: TcbList::new() }
    }

    /// Task with the nearest deadline
    #[inline]
    pub fn head(&self) -> Option<TaskId> {
        self.list.head()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn len(&self, tcbs: &[OsTcb]) -> usize {
        self.list.len(tcbs)
    }

    /// Insert `id` to wake at `deadline`; equal deadlines wake in insertion order
    pub(crate) fn insert(&mut self, tcbs: &mut [OsTcb], id: TaskId, deadline: OsTick, now: OsTick) {
        tcbs[id.index()].tick_deadline = deadline;
        let remain = |tcb: &OsTcb| tcb.tick_deadline.wrapping_sub(now) as OsTickDiff;
        self.list.insert_ordered(tcbs, id, |new, cur| remain(new) < remain(cur));
    }

    #[inline]
    pub(crate) fn remove(&mut self, tcbs: &mut [OsTcb], id: TaskId) {
        self.list.remove(tcbs, id);
    }

    /// Pop the head if its deadline has been reached at `now`
    pub(crate) fn pop_expired(&mut self, tcbs: &mut [OsTcb], now: OsTick) -> Option<TaskId> {
        let head = self.list.head()?;
        if !tick_reached(now, tcbs[head.index()].tick_deadline) {
            return None;
        }
        self.list.remove(tcbs, head);
        Some(head)
    }
}

impl Default for TickList {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert milliseconds to ticks at [`CFG_TICK_RATE_HZ`], rounding down
#[inline]
pub const fn ms_to_ticks(ms: u32) -> OsTick {
    ((ms as u64 * CFG_TICK_RATE_HZ as u64) / 1000) as OsTick
}

impl SchedState {
    /// Take `id` off the tick list if it is blocked with a deadline
    pub(crate) fn tick_remove(&mut self, id: TaskId) {
        if let OsTaskState::Blocked { deadline: Some(_), .. } = self.tcb(id).task_state {
            self.tick_list.remove(&mut self.tcbs, id);
        }
    }

    /// Wake every task whose deadline has been reached
    ///
    /// Returns `true` if a woken task has priority at least that of the
    /// running task.
    pub(crate) fn tick_expire(&mut self, now: OsTick) -> bool {
        let mut preempt = false;
        let cur_prio = self.cur_prio();

        while let Some(id) = self.tick_list.pop_expired(&mut self.tcbs, now) {
            match self.tcb(id).task_state {
                OsTaskState::Blocked { reason: BlockReason::Timeout, .. } => {
                    self.tcb_mut(id).pend_status = OsPendStatus::Ok;
                }
                OsTaskState::Blocked { reason: BlockReason::Semaphore(sem), .. } => {
                    self.sems[sem.index()].pend_list.remove(&mut self.tcbs, id);
                    self.tcb_mut(id).pend_status = OsPendStatus::Timeout;
                }
                _ => continue,
            }

            self.rdy_insert(id);
            crate::trace!("task {} deadline reached", self.tcb(id).name);

            if cur_prio.is_some_and(|cur| self.tcb(id).prio >= cur) {
                preempt = true;
            }
        }

        preempt
    }
}

impl Kernel {
    /// Tick handler body
    ///
    /// Increments the tick counter, wraps silently, then wakes expired
    /// tasks. Returns `true` when a switch should happen at interrupt exit.
    pub(crate) fn tick_advance_isr(&self) -> bool {
        let now = self.flags.tick_increment();
        self.with_state(|st| st.tick_expire(now))
    }
}

impl<'k> TaskHandle<'k> {
    /// Time delay in ticks
    ///
    /// Blocks the calling task until `ticks` timer interrupts have passed.
    /// `delay(0)` does not block but still passes through the scheduler, so
    /// every ready task of equal or higher priority runs first.
    ///
    /// # Returns
    /// * `Ok(())` - Delay completed
    /// * `Err(OsError::SchedLocked)` - Scheduler is locked
    /// * `Err(OsError::TaskNotRunning)` - Caller is not the running task
    pub fn delay(&self, ticks: OsTick) -> OsResult<()> {
        let kernel = self.kernel();
        if !kernel.is_running() {
            return Err(OsError::OsNotRunning);
        }

        if ticks > OS_TICK_DLY_MAX {
            return Err(OsError::TimeDlyTooLong);
        }

        if kernel.sched_lock_nesting() > 0 {
            return Err(OsError::SchedLocked);
        }

        if ticks == 0 {
            return self.yield_now();
        }

        kernel.with_state(|st| {
            let id = self.id();
            st.check_running(id)?;

            let now = kernel.now_ticks();
            let deadline = now.wrapping_add(ticks);
            st.tcb_mut(id).task_state = OsTaskState::Blocked {
                reason: BlockReason::Timeout,
                deadline: Some(deadline),
            };
            st.tick_list.insert(&mut st.tcbs, id, deadline, now);

            kernel.sched(st, false);
            Ok(())
        })
    }

    /// Time delay in hours, minutes, seconds, milliseconds
    ///
    /// # Arguments
    /// * `hours` - Hours (0-999)
    /// * `minutes` - Minutes (0-59)
    /// * `seconds` - Seconds (0-59)
    /// * `milliseconds` - Milliseconds (0-999)
    pub fn delay_hmsm(&self, hours: u16, minutes: u8, seconds: u8, milliseconds: u16) -> OsResult<()> {
        if hours > 999 {
            return Err(OsError::TimeInvalidHours);
        }
        if minutes > 59 {
            return Err(OsError::TimeInvalidMinutes);
        }
        if seconds > 59 {
            return Err(OsError::TimeInvalidSeconds);
        }
        if milliseconds > 999 {
            return Err(OsError::TimeInvalidMilliseconds);
        }

        let total_ms = (hours as u64) * 3_600_000
            + (minutes as u64) * 60_000
            + (seconds as u64) * 1000
            + (milliseconds as u64);

        let ticks = (total_ms * CFG_TICK_RATE_HZ as u64) / 1000;
        let ticks = OsTick::try_from(ticks).map_err(|_| OsError::TimeDlyTooLong)?;
        self.delay(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OsStkElement;
    use std::boxed::Box;

    fn parked(_: TaskHandle<'static>) -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn stack() -> &'static mut [OsStkElement] {
        Box::leak(Box::new([0; 128]))
    }

    fn started(prios: &[u8]) -> (&'static Kernel, [TaskId; 4]) {
        let k: &'static Kernel = Box::leak(Box::new(Kernel::new()));
        k.init().unwrap();
        let mut ids = [TaskId(0); 4];
        for (i, &p) in prios.iter().enumerate() {
            ids[i] = k.task_create("t", parked, p, stack()).unwrap();
        }
        k.start().unwrap();
        (k, ids)
    }

    fn tick(k: &Kernel, n: u32) {
        for _ in 0..n {
            k.interrupt(|isr| isr.tick_advance());
        }
    }

    #[test]
    fn test_ms_to_ticks() {
        assert_eq!(ms_to_ticks(500), 500 * CFG_TICK_RATE_HZ / 1000);
        assert_eq!(ms_to_ticks(0), 0);
    }

    #[test]
    fn test_delay_blocks_until_deadline() {
        let (k, [hi, lo, ..]) = started(&[5, 2]);
        let task = unsafe { k.task_handle(hi) };

        task.delay(3).unwrap();
        assert_eq!(k.running_task(), Some(lo));
        assert!(matches!(
            k.task_state(hi),
            OsTaskState::Blocked { reason: BlockReason::Timeout, deadline: Some(3) }
        ));

        tick(k, 2);
        assert_eq!(k.running_task(), Some(lo));

        tick(k, 1);
        assert_eq!(k.running_task(), Some(hi));
        assert_eq!(k.task_state(lo), OsTaskState::Ready);
    }

    #[test]
    fn test_delay_across_tick_wrap() {
        let (k, [hi, lo, ..]) = started(&[5, 2]);
        k.flags().tick_set(OsTick::MAX - 1);

        unsafe { k.task_handle(hi) }.delay(4).unwrap();
        tick(k, 3);
        assert_eq!(k.now_ticks(), 1);
        assert_eq!(k.running_task(), Some(lo));

        tick(k, 1);
        assert_eq!(k.running_task(), Some(hi));
    }

    #[test]
    fn test_nearest_deadline_first() {
        let (k, [a, b, c, ..]) = started(&[6, 5, 4]);

        unsafe { k.task_handle(a) }.delay(30).unwrap();
        unsafe { k.task_handle(b) }.delay(10).unwrap();
        unsafe { k.task_handle(c) }.delay(20).unwrap();

        k.with_state(|st| {
            assert_eq!(st.tick_list.len(&st.tcbs), 3);
            assert_eq!(st.tick_list.head(), Some(b));
        });

        tick(k, 10);
        assert_eq!(k.running_task(), Some(b));
        tick(k, 10);
        assert_eq!(k.task_state(c), OsTaskState::Ready);
        assert_eq!(k.running_task(), Some(b));
        tick(k, 10);
        assert_eq!(k.running_task(), Some(a));
    }

    #[test]
    fn test_delay_zero_yields_to_equal_priority() {
        let (k, [a, b, ..]) = started(&[3, 3]);
        assert_eq!(k.running_task(), Some(a));

        unsafe { k.task_handle(a) }.delay(0).unwrap();
        assert_eq!(k.running_task(), Some(b));
        assert_eq!(k.task_state(a), OsTaskState::Ready);
    }

    #[test]
    fn test_delay_refused_when_locked() {
        let (k, [a, ..]) = started(&[3]);
        let task = unsafe { k.task_handle(a) };
        task.sched_lock().unwrap();
        assert_eq!(task.delay(5), Err(OsError::SchedLocked));
        task.sched_unlock().unwrap();
        assert_eq!(k.running_task(), Some(a));
    }

    #[test]
    fn test_delay_hmsm_validates_fields() {
        let (k, [a, ..]) = started(&[3]);
        let task = unsafe { k.task_handle(a) };
        assert_eq!(task.delay_hmsm(1000, 0, 0, 0), Err(OsError::TimeInvalidHours));
        assert_eq!(task.delay_hmsm(0, 60, 0, 0), Err(OsError::TimeInvalidMinutes));
        assert_eq!(task.delay_hmsm(0, 0, 60, 0), Err(OsError::TimeInvalidSeconds));
        assert_eq!(task.delay_hmsm(0, 0, 0, 1000), Err(OsError::TimeInvalidMilliseconds));
        assert_eq!(OsError::TimeInvalidMinutes.kind(), crate::error::ErrorKind::Config);

        task.delay_hmsm(0, 0, 0, 7).unwrap();
        assert!(matches!(
            k.task_state(a),
            OsTaskState::Blocked { deadline: Some(d), .. } if d == ms_to_ticks(7)
        ));
    }

    #[test]
    fn test_delay_longer_than_half_range_is_refused() {
        let (k, [a, ..]) = started(&[3]);
        let task = unsafe { k.task_handle(a) };

        assert_eq!(task.delay(OS_TICK_DLY_MAX + 1), Err(OsError::TimeDlyTooLong));
        assert_eq!(task.delay(OsTick::MAX), Err(OsError::TimeDlyTooLong));
        // 999 h at 1000 Hz overflows the signed tick difference
        assert_eq!(task.delay_hmsm(999, 0, 0, 0), Err(OsError::TimeDlyTooLong));
        assert_eq!(k.running_task(), Some(a));
    }

    #[test]
    fn test_longest_delay_waits_full_span() {
        let (k, [a, b, ..]) = started(&[5, 2]);
        unsafe { k.task_handle(a) }.delay(OS_TICK_DLY_MAX).unwrap();

        tick(k, 1);
        assert_eq!(k.running_task(), Some(b));

        k.flags().tick_set(OS_TICK_DLY_MAX - 2);
        tick(k, 1);
        assert_eq!(k.running_task(), Some(b));
        tick(k, 1);
        assert_eq!(k.now_ticks(), OS_TICK_DLY_MAX);
        assert_eq!(k.running_task(), Some(a));
    }

    #[test]
    fn test_long_hmsm_delay_stays_blocked() {
        let (k, [a, b, ..]) = started(&[5, 2]);
        unsafe { k.task_handle(a) }.delay_hmsm(596, 0, 0, 0).unwrap();

        tick(k, 1);
        assert_eq!(k.running_task(), Some(b));
        assert!(matches!(
            k.task_state(a),
            OsTaskState::Blocked { reason: BlockReason::Timeout, deadline: Some(d) } if d == 2_145_600_000
        ));
    }
}
