//! Ready list - FIFO of TCBs at a given priority
//!
//! Each priority level has its own ready list. Tasks are added to the tail
//! when they become `Ready` and scheduled from the head, so among equal
//! priorities the one that has been ready longest runs first.

use crate::task::tcb::{RdyLink, TcbList};
use crate::task::OsTcb;
use crate::types::TaskId;

/// Ready list for a single priority level
#[derive(Debug)]
pub struct ReadyList {
    list: TcbList<RdyLink>,
}

impl ReadyList {
    /// Create a new empty ready list
    pub const fn new() -> Self {
        ReadyList { list: TcbList::new() }
    }

    /// Get head of list (first to be scheduled)
    #[inline]
    pub fn head(&self) -> Option<TaskId> {
        self.list.head()
    }

    /// Get tail of list
    #[inline]
    pub fn tail(&self) -> Option<TaskId> {
        self.list.tail()
    }

    /// Check if list is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Number of entries
    pub fn len(&self, tcbs: &[OsTcb]) -> usize {
        self.list.len(tcbs)
    }

    /// Insert TCB at the tail of the list (FIFO order)
    #[inline]
    pub(crate) fn insert_tail(&mut self, tcbs: &mut [OsTcb], id: TaskId) {
        self.list.insert_tail(tcbs, id);
    }

    /// Remove a TCB from the list
    #[inline]
    pub(crate) fn remove(&mut self, tcbs: &mut [OsTcb], id: TaskId) {
        self.list.remove(tcbs, id);
    }

    /// Remove and return the task that has been ready longest
    #[inline]
    pub(crate) fn pop_head(&mut self, tcbs: &mut [OsTcb]) -> Option<TaskId> {
        self.list.pop_head(tcbs)
    }
}

impl Default for ReadyList {
    fn default() -> Self {
        Self::new()
    }
}
