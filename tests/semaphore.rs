//! Counting semaphore tests
//!
//! Drive a `Kernel` through the host stub port: the test plays whichever
//! task is running, using `begin_take`/`take_result` around the point where
//! a real port would switch away.

use std::cell::RefCell;
use std::rc::Rc;

use quickcheck::TestResult;
use quickcheck_macros::quickcheck;
use semcore::app::{self, EventTally, ExternalEvent, OutputSink};
use semcore::{
    ms_to_ticks, Kernel, OsError, OsStkElement, OsTaskState, Pend, SemId, TaskHandle, TaskId, Timeout,
};

fn parked(_: TaskHandle<'static>) -> ! {
    loop {
        std::hint::spin_loop();
    }
}

fn stack() -> &'static mut [OsStkElement] {
    Box::leak(Box::new([0; 256]))
}

fn kernel() -> &'static Kernel {
    let k: &'static Kernel = Box::leak(Box::new(Kernel::new()));
    k.init().unwrap();
    k
}

fn handle(k: &'static Kernel, id: TaskId) -> TaskHandle<'static> {
    unsafe { k.task_handle(id) }
}

fn current(k: &'static Kernel) -> TaskHandle<'static> {
    handle(k, k.running_task().unwrap())
}

fn tick(k: &Kernel, n: u32) {
    for _ in 0..n {
        k.interrupt(|isr| isr.tick_advance());
    }
}

/// Start `k` and let every task created so far pend on `sem` in the order
/// the scheduler runs them, until `giver` is the one running.
fn block_all_but(k: &'static Kernel, sem: SemId, giver: TaskId) {
    k.start().unwrap();
    while k.running_task() != Some(giver) {
        assert_eq!(current(k).begin_take(sem, Timeout::Forever), Ok(Pend::Blocked));
    }
}

// ============ Count bounds ============

/// Any mix of task gives, interrupt gives and non-blocking takes keeps the
/// count inside `[0, max]` and matches a plain counter model.
#[quickcheck]
fn qc_count_stays_in_bounds(max: u8, initial: u8, ops: Vec<u8>) -> TestResult {
    let max = u32::from(max % 10) + 1;
    let initial = u32::from(initial) % (max + 1);

    let k = kernel();
    let a = k.task_create("a", parked, 3, stack()).unwrap();
    let sem = k.sem_create("s", initial, max).unwrap();
    k.start().unwrap();
    let task = handle(k, a);

    let mut model = initial;
    for op in ops {
        match op % 3 {
            0 => {
                let r = task.give(sem);
                if model < max {
                    assert_eq!(r, Ok(()));
                    model += 1;
                } else {
                    assert_eq!(r, Err(OsError::Saturated));
                }
            }
            1 => {
                let r = k.interrupt(|isr| isr.give(sem));
                if model < max {
                    assert_eq!(r, Ok(false));
                    model += 1;
                } else {
                    assert_eq!(r, Err(OsError::Saturated));
                }
            }
            _ => {
                let r = task.try_take(sem);
                if model > 0 {
                    assert_eq!(r, Ok(()));
                    model -= 1;
                } else {
                    assert_eq!(r, Err(OsError::Timeout));
                }
            }
        }
        let count = k.sem_count(sem);
        if count > max || count != model {
            return TestResult::failed();
        }
    }
    TestResult::passed()
}

// ============ Gives versus waiters ============

/// N interrupt gives against M waiters wake `min(N, M)` tasks, one per
/// give, and put the rest into the count, clipped at the maximum.
#[quickcheck]
fn qc_gives_wake_one_waiter_each(n: u8, m: u8) {
    let n = u32::from(n % 12);
    let m = usize::from(m % 6);
    let max = 8;

    let k = kernel();
    let waiters: Vec<TaskId> = (0..m)
        .map(|i| k.task_create("w", parked, 2 + i as u8, stack()).unwrap())
        .collect();
    let giver = k.task_create("giver", parked, 1, stack()).unwrap();
    let sem = k.sem_create("s", 0, max).unwrap();
    block_all_but(k, sem, giver);
    assert_eq!(k.sem_waiters(sem), m);

    let (woken, saturated) = k.interrupt(|isr| {
        let mut woken = 0;
        let mut saturated = 0;
        for _ in 0..n {
            match isr.give(sem) {
                Ok(true) => woken += 1,
                Ok(false) => {}
                Err(OsError::Saturated) => saturated += 1,
                Err(e) => panic!("unexpected {:?}", e),
            }
        }
        (woken, saturated)
    });

    let expect_woken = (n as usize).min(m);
    let expect_count = (n - expect_woken as u32).min(max);
    assert_eq!(woken, expect_woken);
    assert_eq!(saturated, n - expect_woken as u32 - expect_count);
    assert_eq!(k.sem_count(sem), expect_count);
    assert_eq!(k.sem_waiters(sem), m - expect_woken);

    // Highest-priority waiters are the ones released
    for (i, &w) in waiters.iter().enumerate() {
        let released = i >= m - expect_woken;
        assert_eq!(!k.task_state(w).is_blocked_on(sem), released, "waiter {}", i);
    }
}

#[test]
fn interrupt_gives_wake_in_priority_order() {
    let k = kernel();
    let p6 = k.task_create("p6", parked, 6, stack()).unwrap();
    let p4a = k.task_create("p4a", parked, 4, stack()).unwrap();
    let p4b = k.task_create("p4b", parked, 4, stack()).unwrap();
    let p2 = k.task_create("p2", parked, 2, stack()).unwrap();
    let giver = k.task_create("giver", parked, 1, stack()).unwrap();
    let sem = k.sem_create("s", 0, 10).unwrap();
    block_all_but(k, sem, giver);

    k.interrupt(|isr| {
        assert_eq!(isr.give(sem), Ok(true));
        assert_eq!(k.task_state(p6), OsTaskState::Ready);
        assert!(k.task_state(p4a).is_blocked_on(sem));

        assert_eq!(isr.give(sem), Ok(true));
        assert_eq!(k.task_state(p4a), OsTaskState::Ready);
        assert!(k.task_state(p4b).is_blocked_on(sem));

        assert_eq!(isr.give(sem), Ok(true));
        assert_eq!(k.task_state(p4b), OsTaskState::Ready);

        // Nothing runs before the interrupt returns
        assert_eq!(k.running_task(), Some(giver));
        assert!(isr.switch_requested());
    });

    assert_eq!(k.running_task(), Some(p6));
    assert!(k.task_state(p2).is_blocked_on(sem));
    assert_eq!(k.sem_count(sem), 0);
}

/// An event interrupt preempted by another interrupt still hands the CPU to
/// the woken handler once the outer one returns.
#[test]
fn event_inside_nested_interrupt_switches_on_outer_exit() {
    let k = kernel();
    let handler = k.task_create("handler", parked, 4, stack()).unwrap();
    let worker = k.task_create("worker", parked, 2, stack()).unwrap();
    let sem = k.sem_create("s", 0, app::SEM_MAX).unwrap();
    block_all_but(k, sem, worker);

    let mut out = Console::default();
    k.interrupt(|_tick| {
        let tally = k.interrupt(|isr| app::event_isr_body(isr, sem, &mut out));
        assert_eq!(tally, EventTally { woken: 1, queued: 4, saturated: 0 });
        assert_eq!(k.running_task(), Some(worker));
    });

    assert_eq!(k.running_task(), Some(handler));
    assert_eq!(handle(k, handler).take_result(), Ok(()));
    assert_eq!(k.sem_count(sem), 4);
}

// ============ Take round trips ============

#[test]
fn take_forever_round_trip_consumes_one_unit() {
    let k = kernel();
    let a = k.task_create("a", parked, 5, stack()).unwrap();
    let b = k.task_create("b", parked, 2, stack()).unwrap();
    let sem = k.sem_create("s", 0, 3).unwrap();
    k.start().unwrap();

    let task = handle(k, a);
    assert_eq!(task.begin_take(sem, Timeout::Forever), Ok(Pend::Blocked));
    assert_eq!(k.running_task(), Some(b));

    // Nothing but a give releases a task that waits forever
    tick(k, 10_000);
    assert_eq!(task.take_result(), Err(OsError::StillBlocked));

    handle(k, b).give(sem).unwrap();
    assert_eq!(k.running_task(), Some(a));
    assert_eq!(task.take_result(), Ok(()));
    assert_eq!(k.sem_count(sem), 0);
    assert_eq!(k.sem_waiters(sem), 0);

    // The unit went to `a`; nothing is left for a second take
    assert_eq!(task.try_take(sem), Err(OsError::Timeout));
}

#[test]
fn bounded_take_times_out() {
    let k = kernel();
    let a = k.task_create("a", parked, 5, stack()).unwrap();
    let b = k.task_create("b", parked, 2, stack()).unwrap();
    let sem = k.sem_create("s", 0, 3).unwrap();
    k.start().unwrap();

    let task = handle(k, a);
    assert_eq!(task.begin_take(sem, Timeout::Ticks(50)), Ok(Pend::Blocked));

    tick(k, 49);
    assert_eq!(k.running_task(), Some(b));
    assert_eq!(task.take_result(), Err(OsError::StillBlocked));

    tick(k, 1);
    assert_eq!(k.running_task(), Some(a));
    assert_eq!(task.take_result(), Err(OsError::Timeout));
    assert_eq!(k.sem_waiters(sem), 0);
    assert_eq!(k.sem_count(sem), 0);
}

#[test]
fn available_unit_is_taken_without_blocking() {
    let k = kernel();
    let a = k.task_create("a", parked, 5, stack()).unwrap();
    let sem = k.sem_create("s", 2, 3).unwrap();
    k.start().unwrap();

    let task = handle(k, a);
    assert_eq!(task.take(sem, Timeout::Forever), Ok(()));
    assert_eq!(task.take(sem, Timeout::Ticks(5)), Ok(()));
    assert_eq!(k.sem_count(sem), 0);
    assert_eq!(k.running_task(), Some(a));
}

// ============ Demo scenarios ============

/// Output shared by the tasks and the interrupt, in emission order
#[derive(Clone, Default)]
struct Console(Rc<RefCell<Vec<String>>>);

impl OutputSink for Console {
    fn signal_output(&mut self, text: &str) {
        self.0.borrow_mut().push(text.to_owned());
    }
}

impl Console {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

/// Raises the demo interrupt synchronously and records what it did
struct Button {
    k: &'static Kernel,
    sem: SemId,
    out: Console,
    events: RefCell<Vec<(EventTally, u32)>>,
}

impl ExternalEvent for Button {
    fn raise_external_event(&self) {
        let mut out = self.out.clone();
        let tally = self.k.interrupt(|isr| app::event_isr_body(isr, self.sem, &mut out));
        self.events.borrow_mut().push((tally, self.k.sem_count(self.sem)));
    }
}

/// The demo, played task by task
struct DemoSim {
    k: &'static Kernel,
    demo: app::Demo,
    out: Console,
    button: Button,
    handler_pending: bool,
    periodic_started: bool,
    services: usize,
}

impl DemoSim {
    fn new() -> Self {
        let k: &'static Kernel = Box::leak(Box::new(Kernel::new()));
        let out = Console::default();
        let demo = app::setup(k, &mut out.clone(), parked, stack(), parked, stack()).unwrap();
        let button = Button {
            k,
            sem: demo.sem,
            out: out.clone(),
            events: RefCell::new(Vec::new()),
        };
        k.start().unwrap();
        DemoSim {
            k,
            demo,
            out,
            button,
            handler_pending: false,
            periodic_started: false,
            services: 0,
        }
    }

    /// Step the running task until only idle is left
    fn run_tasks(&mut self) {
        let k = self.k;
        loop {
            let cur = k.running_task().unwrap();
            let task = handle(k, cur);

            if cur == self.demo.periodic {
                if self.periodic_started {
                    app::on_period_elapsed(&mut self.out, &self.button);
                }
                self.periodic_started = true;
                task.delay(ms_to_ticks(app::PERIOD_MS)).unwrap();
            } else if cur == self.demo.handler {
                if self.handler_pending {
                    task.take_result().unwrap();
                    self.handler_pending = false;
                    self.service();
                }
                match task.begin_take(self.demo.sem, Timeout::Forever).unwrap() {
                    Pend::Acquired => self.service(),
                    Pend::Blocked => self.handler_pending = true,
                }
            } else {
                assert_eq!(Some(cur), k.idle_task());
                break;
            }
        }
    }

    fn service(&mut self) {
        app::on_event(&mut self.out);
        self.services += 1;
    }

    fn run_for(&mut self, ticks: u32) {
        self.run_tasks();
        for _ in 0..ticks {
            tick(self.k, 1);
            self.run_tasks();
        }
    }
}

#[test]
fn one_event_wakes_handler_and_queues_the_rest() {
    let k = kernel();
    let handler = k.task_create("handler", parked, app::HANDLER_PRIO, stack()).unwrap();
    let isr_source = k.task_create("periodic", parked, app::PERIODIC_PRIO, stack()).unwrap();
    let sem = k.sem_create("s", app::SEM_INITIAL, app::SEM_MAX).unwrap();
    k.start().unwrap();

    // Periodic sleeps, handler pends
    handle(k, isr_source).delay(10).unwrap();
    assert_eq!(handle(k, handler).begin_take(sem, Timeout::Forever), Ok(Pend::Blocked));

    let mut out = Console::default();
    let tally = k.interrupt(|isr| app::event_isr_body(isr, sem, &mut out));

    assert_eq!(tally, EventTally { woken: 1, queued: 4, saturated: 0 });
    assert_eq!(k.sem_count(sem), 4);
    assert_eq!(k.running_task(), Some(handler));
    assert_eq!(out.take(), [app::MSG_EVENT]);
}

#[test]
fn periodic_demo_over_two_periods() {
    let mut sim = DemoSim::new();
    assert_eq!(sim.out.take(), [app::MSG_BANNER]);

    // First period: nothing has been signaled yet
    sim.run_for(ms_to_ticks(app::PERIOD_MS) - 1);
    assert!(sim.out.take().is_empty());
    assert_eq!(sim.k.task_state(sim.demo.handler), OsTaskState::Blocked {
        reason: semcore::BlockReason::Semaphore(sim.demo.sem),
        deadline: None,
    });

    let cycle = [
        app::MSG_PENDING,
        app::MSG_EVENT,
        app::MSG_RESUMING,
        app::MSG_HANDLER,
        app::MSG_HANDLER,
        app::MSG_HANDLER,
        app::MSG_HANDLER,
        app::MSG_HANDLER,
    ];

    sim.run_for(1);
    assert_eq!(sim.out.take(), cycle);

    sim.run_for(ms_to_ticks(app::PERIOD_MS));
    assert_eq!(sim.out.take(), cycle);
    assert_eq!(sim.k.now_ticks(), 2 * ms_to_ticks(app::PERIOD_MS));

    // Each event: one unit handed to the pending handler, four counted
    let events = sim.button.events.borrow();
    assert_eq!(events.len(), 2);
    for &(tally, count_after) in events.iter() {
        assert_eq!(tally, EventTally { woken: 1, queued: 4, saturated: 0 });
        assert_eq!(count_after, 4);
    }
    let queued: u32 = events.iter().map(|(t, _)| u32::from(t.queued)).sum();
    assert_eq!(queued, 8);

    // Every unit given was serviced exactly once
    assert_eq!(sim.services, 2 * app::GIVES_PER_EVENT);
    assert_eq!(sim.k.sem_count(sim.demo.sem), 0);
    assert!(sim.handler_pending);
    assert_eq!(sim.k.running_task(), sim.k.idle_task());
}
