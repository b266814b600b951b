//! Compile-time configuration
//!
//! These constants control the resource limits of the kernel. Everything
//! is allocated statically; nothing here changes after startup.

/// Number of priority levels. Priority 0 is the lowest.
pub const CFG_PRIO_MAX: usize = 32;

/// Number of task control blocks, including the idle task
pub const CFG_MAX_TASKS: usize = 8;

/// Number of semaphores that can be created
pub const CFG_MAX_SEMS: usize = 4;

/// System tick rate in Hz
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Core clock used to derive the SysTick reload value
pub const CFG_CPU_CLOCK_HZ: u32 = 16_000_000;

/// Minimum task stack size in words
pub const CFG_STK_SIZE_MIN: usize = 64;

/// Idle task stack size in words
pub const CFG_IDLE_STK_SIZE: usize = 128;

/// Idle task priority
pub const CFG_PRIO_IDLE: u8 = 0;
