//! Task Control Block (TCB) definition
//!
//! The TCB contains all the information needed to manage a task. TCBs live
//! in a fixed table inside the kernel and refer to each other by [`TaskId`],
//! so the intrusive lists below are index-linked rather than pointer-linked.

use core::marker::PhantomData;

use crate::types::{OsPendStatus, OsPrio, OsStkElement, OsTaskState, OsTick, TaskId};

/// Links for one intrusive list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Links {
    pub next: Option<TaskId>,
    pub prev: Option<TaskId>,
}

impl Links {
    pub const fn new() -> Self {
        Links { next: None, prev: None }
    }
}

/// Task Control Block
#[repr(C)]
#[derive(Debug)]
pub struct OsTcb {
    // ============ Saved context ============
    /// Saved stack pointer; the register frame lives on the task's stack
    pub stk_ptr: *mut OsStkElement,

    // ============ Stack information ============
    /// Base of stack
    pub stk_base: *mut OsStkElement,
    /// Stack size in words
    pub stk_size: usize,

    // ============ Task identification ============
    /// Task name, diagnostic only
    pub name: &'static str,
    /// Own slot index
    pub id: TaskId,

    // ============ Priority ============
    /// Fixed priority
    pub prio: OsPrio,

    // ============ State ============
    /// Current task state
    pub task_state: OsTaskState,
    /// Result of the last pend
    pub pend_status: OsPendStatus,

    // ============ List links ============
    /// Ready list links
    pub(crate) rdy_links: Links,
    /// Semaphore wait set links
    pub(crate) pend_links: Links,
    /// Tick list links
    pub(crate) tick_links: Links,
    /// Wake tick while on the tick list
    pub(crate) tick_deadline: OsTick,
}

impl OsTcb {
    /// Create a new, unused TCB
    pub const fn new() -> Self {
        OsTcb {
            stk_ptr: core::ptr::null_mut(),
            stk_base: core::ptr::null_mut(),
            stk_size: 0,

            name: "",
            id: TaskId(0),

            prio: 0,

            task_state: OsTaskState::Dormant,
            pend_status: OsPendStatus::Ok,

            rdy_links: Links::new(),
            pend_links: Links::new(),
            tick_links: Links::new(),
            tick_deadline: 0,
        }
    }

    /// Check if task is ready to run
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.task_state == OsTaskState::Ready
    }

    /// Check if task owns the CPU
    #[inline]
    pub fn is_running(&self) -> bool {
        self.task_state == OsTaskState::Running
    }

    /// Check if task is blocked on anything
    #[inline]
    pub fn is_blocked(&self) -> bool {
        matches!(self.task_state, OsTaskState::Blocked { .. })
    }

    /// Check if task is suspended
    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.task_state == OsTaskState::Suspended
    }
}

impl Default for OsTcb {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the raw stack pointers are owned by the TCB and only touched by the
// kernel inside critical sections or by the context switch handler.
unsafe impl Send for OsTcb {}
unsafe impl Sync for OsTcb {}

// ============ Intrusive lists ============

/// Selects which pair of links in the TCB a list threads through
pub(crate) trait Linkage {
    fn links(tcb: &OsTcb) -> &Links;
    fn links_mut(tcb: &mut OsTcb) -> &mut Links;
}

#[derive(Debug)]
pub(crate) struct RdyLink;
#[derive(Debug)]
pub(crate) struct PendLink;
#[derive(Debug)]
pub(crate) struct TickLink;

impl Linkage for RdyLink {
    fn links(tcb: &OsTcb) -> &Links { &tcb.rdy_links }
    fn links_mut(tcb: &mut OsTcb) -> &mut Links { &mut tcb.rdy_links }
}

impl Linkage for PendLink {
    fn links(tcb: &OsTcb) -> &Links { &tcb.pend_links }
    fn links_mut(tcb: &mut OsTcb) -> &mut Links { &mut tcb.pend_links }
}

impl Linkage for TickLink {
    fn links(tcb: &OsTcb) -> &Links { &tcb.tick_links }
    fn links_mut(tcb: &mut OsTcb) -> &mut Links { &mut tcb.tick_links }
}

/// Doubly-linked list of TCBs threaded through one [`Linkage`]
///
/// The caller guarantees a TCB is on at most one list per linkage.
#[derive(Debug)]
pub(crate) struct TcbList<L> {
    head: Option<TaskId>,
    tail: Option<TaskId>,
    _link: PhantomData<L>,
}

impl<L: Linkage> TcbList<L> {
    pub const fn new() -> Self {
        TcbList {
            head: None,
            tail: None,
            _link: PhantomData,
        }
    }

    #[inline]
    pub fn head(&self) -> Option<TaskId> {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> Option<TaskId> {
        self.tail
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Next TCB after `id` on this list
    #[inline]
    pub fn next(&self, tcbs: &[OsTcb], id: TaskId) -> Option<TaskId> {
        L::links(&tcbs[id.index()]).next
    }

    /// Insert `id` in front of `before`, or at the tail when `before` is `None`
    pub fn insert_before(&mut self, tcbs: &mut [OsTcb], id: TaskId, before: Option<TaskId>) {
        let prev = match before {
            Some(b) => L::links(&tcbs[b.index()]).prev,
            None => self.tail,
        };

        *L::links_mut(&mut tcbs[id.index()]) = Links { next: before, prev };

        match prev {
            Some(p) => L::links_mut(&mut tcbs[p.index()]).next = Some(id),
            None => self.head = Some(id),
        }

        match before {
            Some(b) => L::links_mut(&mut tcbs[b.index()]).prev = Some(id),
            None => self.tail = Some(id),
        }
    }

    /// Insert at the tail (FIFO order)
    #[inline]
    pub fn insert_tail(&mut self, tcbs: &mut [OsTcb], id: TaskId) {
        self.insert_before(tcbs, id, None);
    }

    /// Insert in front of the first entry for which `goes_before` holds
    pub fn insert_ordered<F>(&mut self, tcbs: &mut [OsTcb], id: TaskId, mut goes_before: F)
    where
        F: FnMut(&OsTcb, &OsTcb) -> bool,
    {
        let mut cursor = self.head;
        while let Some(cur) = cursor {
            if goes_before(&tcbs[id.index()], &tcbs[cur.index()]) {
                break;
            }
            cursor = self.next(tcbs, cur);
        }
        self.insert_before(tcbs, id, cursor);
    }

    /// Remove `id`, which must be on this list
    pub fn remove(&mut self, tcbs: &mut [OsTcb], id: TaskId) {
        let Links { next, prev } = *L::links(&tcbs[id.index()]);

        match prev {
            Some(p) => L::links_mut(&mut tcbs[p.index()]).next = next,
            None => self.head = next,
        }

        match next {
            Some(n) => L::links_mut(&mut tcbs[n.index()]).prev = prev,
            None => self.tail = prev,
        }

        *L::links_mut(&mut tcbs[id.index()]) = Links::new();
    }

    /// Remove and return the head
    pub fn pop_head(&mut self, tcbs: &mut [OsTcb]) -> Option<TaskId> {
        let head = self.head?;
        self.remove(tcbs, head);
        Some(head)
    }

    /// Count entries by walking the list
    pub fn len(&self, tcbs: &[OsTcb]) -> usize {
        let mut n = 0;
        let mut cursor = self.head;
        while let Some(cur) = cursor {
            n += 1;
            cursor = self.next(tcbs, cur);
        }
        n
    }
}

impl<L: Linkage> Default for TcbList<L> {
    fn default() -> Self {
        Self::new()
    }
}
