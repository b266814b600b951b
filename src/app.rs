//! Counting semaphore demo
//!
//! A periodic task raises an external event every [`PERIOD_MS`]; the event's
//! interrupt handler gives the semaphore [`GIVES_PER_EVENT`] times and a
//! handler task takes it once per unit of work. The board glue supplies the
//! byte output and the event source through [`OutputSink`] and
//! [`ExternalEvent`].

use crate::error::{OsError, OsResult};
use crate::kernel::{InterruptHandle, Kernel};
use crate::task::{OsTaskFn, TaskHandle};
use crate::time::ms_to_ticks;
use crate::types::{OsPrio, OsSemCtr, OsStkElement, SemId, TaskId, Timeout};

/// Handler task priority
pub const HANDLER_PRIO: OsPrio = 1;
/// Periodic task priority
pub const PERIODIC_PRIO: OsPrio = 3;
/// Stack size of both demo tasks, in words
pub const TASK_STK_SIZE: usize = 200;

pub const SEM_INITIAL: OsSemCtr = 0;
pub const SEM_MAX: OsSemCtr = 10;

/// Gives issued by one run of the event handler
pub const GIVES_PER_EVENT: usize = 5;
/// Period of the periodic task
pub const PERIOD_MS: u32 = 500;

pub const MSG_BANNER: &str = "\r\nCounting Semaphore Demo\r\n";
pub const MSG_HANDLER: &str = "Handler task processing event\r\n";
pub const MSG_PENDING: &str = "Periodic task - Pending the interrupt\r\n";
pub const MSG_RESUMING: &str = "Periodic task - Resuming\r\n";
pub const MSG_EVENT: &str = "==> Button handler\r\n";
pub const MSG_CREATE_FAILED: &str = "Queue or semaphore creation failed\r\n";
pub const MSG_ALLOC_FAILED: &str = "Memory allocation failed\r\n";

/// Ordered byte-stream output, blocking until sent
pub trait OutputSink {
    fn signal_output(&mut self, text: &str);
}

/// Source of the asynchronous event serviced by [`event_isr_body`]
pub trait ExternalEvent {
    fn raise_external_event(&self);
}

/// What one run of [`event_isr_body`] did with its gives
#[cfg_attr(all(feature = "defmt", target_arch = "arm"), derive(defmt::Format))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EventTally {
    /// Gives that handed a unit straight to a waiting task
    pub woken: u8,
    /// Gives that incremented the count
    pub queued: u8,
    /// Gives dropped because the count was at its maximum
    pub saturated: u8,
}

/// Semaphore and task ids set up by [`setup`]
#[derive(Debug, Clone, Copy)]
pub struct Demo {
    pub sem: SemId,
    pub handler: TaskId,
    pub periodic: TaskId,
}

/// Bring up the kernel objects of the demo
///
/// Prints the banner, creates the semaphore and both tasks. Creation
/// failures are reported through `out` and the scheduler must not be
/// started.
pub fn setup(
    kernel: &'static Kernel,
    out: &mut impl OutputSink,
    handler: OsTaskFn,
    handler_stk: &'static mut [OsStkElement],
    periodic: OsTaskFn,
    periodic_stk: &'static mut [OsStkElement],
) -> OsResult<Demo> {
    out.signal_output(MSG_BANNER);

    kernel.init()?;

    let sem = kernel.sem_create("CountingSem", SEM_INITIAL, SEM_MAX).inspect_err(|_| {
        out.signal_output(MSG_CREATE_FAILED);
    })?;

    let handler = kernel
        .task_create("TASK1_HANDLER", handler, HANDLER_PRIO, handler_stk)
        .map_err(|e| task_create_failed(&mut *out, e))?;
    let periodic = kernel
        .task_create("TASK2_PERIODIC", periodic, PERIODIC_PRIO, periodic_stk)
        .map_err(|e| task_create_failed(&mut *out, e))?;

    Ok(Demo { sem, handler, periodic })
}

fn task_create_failed(out: &mut impl OutputSink, e: OsError) -> OsError {
    if e == OsError::TaskNoMoreTcb {
        out.signal_output(MSG_ALLOC_FAILED);
    }
    e
}

/// Interrupt body of the external event
///
/// Reports the event, then gives the semaphore [`GIVES_PER_EVENT`] times.
/// Each give either wakes one waiter or bumps the count; gives past the
/// maximum are tolerated. The switch, if any, happens when the interrupt
/// returns.
pub fn event_isr_body(isr: &mut InterruptHandle<'_>, sem: SemId, out: &mut impl OutputSink) -> EventTally {
    out.signal_output(MSG_EVENT);

    let mut tally = EventTally::default();
    for _ in 0..GIVES_PER_EVENT {
        match isr.give_woken(sem) {
            Ok(Some(_)) => tally.woken += 1,
            Ok(None) => tally.queued += 1,
            Err(_) => tally.saturated += 1,
        }
    }

    crate::trace!("event: {}", tally);
    tally
}

/// Work done by the handler task for each unit taken
#[inline]
pub fn on_event(out: &mut impl OutputSink) {
    out.signal_output(MSG_HANDLER);
}

/// Work done by the periodic task each time its delay elapses
pub fn on_period_elapsed(out: &mut impl OutputSink, event: &impl ExternalEvent) {
    out.signal_output(MSG_PENDING);
    event.raise_external_event();
    out.signal_output(MSG_RESUMING);
}

/// Handler task body: take, report, repeat
pub fn handler_loop(task: &TaskHandle<'_>, sem: SemId, out: &mut impl OutputSink) -> ! {
    loop {
        match task.take(sem, Timeout::Forever) {
            Ok(()) => on_event(out),
            Err(e) => crate::error!("take failed: {}", e),
        }
    }
}

/// Periodic task body: sleep one period, raise the event, repeat
pub fn periodic_loop(task: &TaskHandle<'_>, out: &mut impl OutputSink, event: &impl ExternalEvent) -> ! {
    let period = ms_to_ticks(PERIOD_MS);
    loop {
        if let Err(e) = task.delay(period) {
            crate::error!("delay failed: {}", e);
        }
        on_period_elapsed(out, event);
    }
}
