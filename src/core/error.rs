//! Error types
//!
//! Uses Rust's Result pattern instead of C-style error pointers.

/// Kernel error type
#[cfg_attr(all(feature = "defmt", target_arch = "arm"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OsError {
    // ============ Lock errors ============
    /// Scheduler lock nesting overflow
    LockNestingOvf = 21001,

    // ============ OS state errors ============
    /// OS is not running
    OsNotRunning = 24201,
    /// OS is already running
    OsRunning = 24202,
    /// OS not initialized
    OsNotInit = 24203,

    // ============ Pend errors ============
    /// A blocking call returned without the caller being switched out
    StillBlocked = 25009,

    // ============ Priority errors ============
    /// Invalid priority
    PrioInvalid = 25203,

    // ============ Scheduler errors ============
    /// Cannot block while the scheduler is locked
    SchedLocked = 28003,
    /// Scheduler is not locked
    SchedNotLocked = 28004,

    // ============ Semaphore errors ============
    /// Count already at its configured maximum
    Saturated = 28101,
    /// Initial count above maximum, or maximum of zero
    SemCountInvalid = 28102,
    /// No more semaphore slots
    SemNoMoreObj = 28103,

    // ============ State errors ============
    /// Task is in a state that does not allow the request
    StateInvalid = 28205,
    /// Invalid stack size
    StkSizeInvalid = 28208,

    // ============ Task errors ============
    /// No more TCBs available
    TaskNoMoreTcb = 29008,
    /// Task is not suspended
    TaskNotSuspended = 29011,
    /// Cannot suspend idle task
    TaskSuspendIdle = 29019,
    /// Task-context call made by a task that does not own the CPU
    TaskNotRunning = 29021,

    // ============ Time errors ============
    /// Delay or timeout longer than the tick list can order
    TimeDlyTooLong = 29311,
    /// Hours argument out of range
    TimeInvalidHours = 29312,
    /// Minutes argument out of range
    TimeInvalidMinutes = 29313,
    /// Seconds argument out of range
    TimeInvalidSeconds = 29314,
    /// Milliseconds argument out of range
    TimeInvalidMilliseconds = 29315,

    // ============ Timeout ============
    /// Operation timed out
    Timeout = 29401,
}

/// Coarse classification of [`OsError`]
#[cfg_attr(all(feature = "defmt", target_arch = "arm"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Static pools exhausted at creation time; fatal at startup
    ResourceExhausted,
    /// A bounded take expired
    Timeout,
    /// Give on a full semaphore with no waiters; tolerated
    Saturated,
    /// API misuse that the handle types could not rule out
    ContractViolation,
    /// Bad argument or call made in the wrong kernel phase
    Config,
}

/// Result type alias for kernel operations
pub type OsResult<T> = Result<T, OsError>;

impl OsError {
    /// Map the error onto its [`ErrorKind`]
    pub fn kind(self) -> ErrorKind {
        match self {
            OsError::TaskNoMoreTcb | OsError::SemNoMoreObj => ErrorKind::ResourceExhausted,
            OsError::Timeout => ErrorKind::Timeout,
            OsError::Saturated => ErrorKind::Saturated,
            OsError::StillBlocked
            | OsError::SchedLocked
            | OsError::StateInvalid
            | OsError::TaskNotRunning
            | OsError::TaskNotSuspended
            | OsError::TaskSuspendIdle => ErrorKind::ContractViolation,
            OsError::LockNestingOvf
            | OsError::OsNotRunning
            | OsError::OsRunning
            | OsError::OsNotInit
            | OsError::PrioInvalid
            | OsError::SchedNotLocked
            | OsError::SemCountInvalid
            | OsError::StkSizeInvalid
            | OsError::TimeDlyTooLong
            | OsError::TimeInvalidHours
            | OsError::TimeInvalidMinutes
            | OsError::TimeInvalidSeconds
            | OsError::TimeInvalidMilliseconds => ErrorKind::Config,
        }
    }

    /// Numeric error code
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Errors the kernel cannot continue from at startup
    #[inline]
    pub fn is_fatal(self) -> bool {
        matches!(self.kind(), ErrorKind::ResourceExhausted | ErrorKind::ContractViolation)
    }
}
