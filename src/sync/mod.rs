//! Synchronization primitives
//!
//! Contains the counting semaphore.

pub mod sem;
