//! Core kernel modules
//!
//! Contains the kernel context, scheduler, task, and time management.

pub mod config;
pub mod critical;
pub mod error;
pub mod kernel;
pub mod prio;
pub mod types;
pub mod task;
pub mod sched;
pub mod time;
pub(crate) mod cs_cell;
