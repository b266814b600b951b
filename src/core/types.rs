//! Core type definitions
//!
//! These types provide strong typing for kernel primitives.

/// Task priority (higher value preempts lower value, 0 = idle)
pub type OsPrio = u8;

/// Tick counter type
pub type OsTick = u32;

/// Signed tick difference, used for wraparound-safe deadline comparison
pub type OsTickDiff = i32;

/// Longest delay or pend timeout, in ticks
///
/// Deadlines are compared through [`OsTickDiff`], so they must lie within
/// half the counter range of the current tick.
pub const OS_TICK_DLY_MAX: OsTick = OsTickDiff::MAX as OsTick;

/// Semaphore counter type
pub type OsSemCtr = u32;

/// Nesting counter
pub type OsNestingCtr = u8;

/// Stack element type
pub type OsStkElement = u32;

/// Index of a task control block inside a [`Kernel`](crate::Kernel)
#[cfg_attr(all(feature = "defmt", target_arch = "arm"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TaskId(pub(crate) u8);

impl TaskId {
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a semaphore inside a [`Kernel`](crate::Kernel)
#[cfg_attr(all(feature = "defmt", target_arch = "arm"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SemId(pub(crate) u8);

impl SemId {
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Why a task is blocked
#[cfg_attr(all(feature = "defmt", target_arch = "arm"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Sleeping until its deadline
    Timeout,
    /// Waiting on a semaphore, possibly with a deadline as well
    Semaphore(SemId),
}

/// Task state
#[cfg_attr(all(feature = "defmt", target_arch = "arm"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsTaskState {
    /// Slot not in use
    Dormant,
    /// Task is ready to run
    Ready,
    /// Task owns the CPU
    Running,
    /// Task is waiting for a deadline or a semaphore
    Blocked {
        reason: BlockReason,
        deadline: Option<OsTick>,
    },
    /// Task is suspended until resumed
    Suspended,
}

impl OsTaskState {
    /// Whether the task waits on `sem`
    #[inline]
    pub fn is_blocked_on(self, sem: SemId) -> bool {
        matches!(self, OsTaskState::Blocked { reason: BlockReason::Semaphore(s), .. } if s == sem)
    }
}

/// Outcome of the last pend, valid once the task is no longer blocked
#[cfg_attr(all(feature = "defmt", target_arch = "arm"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsPendStatus {
    /// Pend succeeded
    Ok = 0,
    /// Timeout occurred
    Timeout = 3,
}

/// How long a semaphore take may block
#[cfg_attr(all(feature = "defmt", target_arch = "arm"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Block for at most this many ticks; `Ticks(0)` never blocks
    Ticks(OsTick),
    /// Block until given
    Forever,
}

impl Timeout {
    /// Whether the timeout fits within [`OS_TICK_DLY_MAX`]
    #[inline]
    pub fn is_valid(self) -> bool {
        match self {
            Timeout::Ticks(ticks) => ticks <= OS_TICK_DLY_MAX,
            Timeout::Forever => true,
        }
    }

    /// Deadline for a pend starting at `now`, or `None` for [`Timeout::Forever`]
    #[inline]
    pub fn deadline(self, now: OsTick) -> Option<OsTick> {
        match self {
            Timeout::Ticks(ticks) => Some(now.wrapping_add(ticks)),
            Timeout::Forever => None,
        }
    }
}

/// Returns `true` once `now` has reached `deadline`.
///
/// Compares through the signed difference so a deadline stays correct when
/// the tick counter wraps, as long as it lies within half the counter range.
#[inline(always)]
pub fn tick_reached(now: OsTick, deadline: OsTick) -> bool {
    (deadline.wrapping_sub(now) as OsTickDiff) <= 0
}
