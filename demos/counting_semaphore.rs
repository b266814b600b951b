//! Counting Semaphore Demo on STM32F401 (NUCLEO-F401RE)
//!
//! TASK2_PERIODIC (prio 3) wakes every 500 ms and pends EXTI15_10 by
//! software; the handler gives the semaphore five times. TASK1_HANDLER
//! (prio 1) prints one line per unit it takes. Pressing the user button
//! (PC13) raises the same interrupt.
//!
//! Output goes to USART2 (PA2/PA3, 19200 8N1, the ST-LINK virtual COM port),
//! or to the debugger console with the `output-semihosting` feature.

#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::cell::Cell;

use cortex_m::peripheral::NVIC;
use cortex_m_rt::entry;
use critical_section::Mutex;
use semcore::app::{self, ExternalEvent, OutputSink, TASK_STK_SIZE};
use semcore::pac;
use semcore::pac::gpio::vals::{Moder, Pupdr};
use semcore::types::{OsStkElement, SemId};
use semcore::{TaskHandle, CFG_CPU_CLOCK_HZ, KERNEL};

const BAUD: u32 = 19200;
const EXTI_PRIO: u8 = 5 << 4;

// ============ Task Storage ============

static mut HANDLER_STK: [OsStkElement; TASK_STK_SIZE] = [0; TASK_STK_SIZE];
static mut PERIODIC_STK: [OsStkElement; TASK_STK_SIZE] = [0; TASK_STK_SIZE];

/// Set once in `main` before the scheduler starts
static SEM: Mutex<Cell<Option<SemId>>> = Mutex::new(Cell::new(None));

fn sem() -> Option<SemId> {
    critical_section::with(|cs| SEM.borrow(cs).get())
}

// ============ Board Glue ============

/// Blocking byte output
struct Console;

impl OutputSink for Console {
    #[cfg(not(feature = "output-semihosting"))]
    fn signal_output(&mut self, text: &str) {
        for b in text.bytes() {
            while !pac::USART2.sr().read().txe() {}
            pac::USART2.dr().write(|w| w.set_dr(b as u16));
        }
    }

    #[cfg(feature = "output-semihosting")]
    fn signal_output(&mut self, text: &str) {
        cortex_m_semihosting::hprint!("{}", text);
    }
}

/// Software-pended EXTI15_10, the button interrupt
struct ButtonIrq;

impl ExternalEvent for ButtonIrq {
    fn raise_external_event(&self) {
        NVIC::pend(pac::Interrupt::EXTI15_10);
    }
}

fn setup_uart() {
    pac::RCC.ahb1enr().modify(|w| w.set_gpioaen(true));
    pac::RCC.apb1enr().modify(|w| w.set_usart2en(true));

    // PA2 = USART2_TX, PA3 = USART2_RX
    pac::GPIOA.moder().modify(|w| {
        w.set_moder(2, Moder::ALTERNATE);
        w.set_moder(3, Moder::ALTERNATE);
    });
    pac::GPIOA.pupdr().modify(|w| {
        w.set_pupdr(2, Pupdr::PULLUP);
        w.set_pupdr(3, Pupdr::PULLUP);
    });
    pac::GPIOA.afr(0).modify(|w| {
        w.set_afr(2, 7);
        w.set_afr(3, 7);
    });

    // APB1 runs from HSI at reset
    let div = (CFG_CPU_CLOCK_HZ + BAUD / 2) / BAUD;
    pac::USART2.brr().write_value(pac::usart::regs::Brr(div));
    pac::USART2.cr1().write(|w| {
        w.set_te(true);
        w.set_re(true);
        w.set_ue(true);
    });
}

fn setup_button() {
    pac::RCC.ahb1enr().modify(|w| w.set_gpiocen(true));
    pac::RCC.apb2enr().modify(|w| w.set_syscfgen(true));

    pac::GPIOC.moder().modify(|w| w.set_moder(13, Moder::INPUT));
    pac::GPIOC.pupdr().modify(|w| w.set_pupdr(13, Pupdr::FLOATING));

    // EXTI13 <- port C, falling edge
    pac::SYSCFG.exticr(3).modify(|w| w.set_exti(1, 2));
    pac::EXTI.imr(0).modify(|w| w.set_line(13, true));
    pac::EXTI.ftsr(0).modify(|w| w.set_line(13, true));

    let mut p = unsafe { cortex_m::Peripherals::steal() };
    unsafe {
        p.NVIC.set_priority(pac::Interrupt::EXTI15_10, EXTI_PRIO);
        NVIC::unmask(pac::Interrupt::EXTI15_10);
    }
}

// ============ Tasks ============

fn handler_task(task: TaskHandle<'static>) -> ! {
    semcore::info!("handler task started");
    let Some(sem) = sem() else {
        semcore::error!("semaphore missing");
        loop {
            cortex_m::asm::wfi();
        }
    };
    app::handler_loop(&task, sem, &mut Console)
}

fn periodic_task(task: TaskHandle<'static>) -> ! {
    semcore::info!("periodic task started");
    app::periodic_loop(&task, &mut Console, &ButtonIrq)
}

// ============ Interrupts ============

#[no_mangle]
pub extern "C" fn EXTI15_10() {
    pac::EXTI.pr(0).write(|w| w.set_line(13, true));

    let Some(sem) = sem() else { return };
    KERNEL.interrupt(|isr| {
        app::event_isr_body(isr, sem, &mut Console);
    });
}

// ============ Main ============

#[entry]
fn main() -> ! {
    setup_uart();
    setup_button();

    let demo = app::setup(
        &KERNEL,
        &mut Console,
        handler_task,
        unsafe { &mut HANDLER_STK },
        periodic_task,
        unsafe { &mut PERIODIC_STK },
    );

    match demo {
        Ok(demo) => {
            critical_section::with(|cs| SEM.borrow(cs).set(Some(demo.sem)));
            semcore::info!("Starting scheduler");
            if let Err(e) = KERNEL.start() {
                semcore::error!("start failed: {}", e);
            }
        }
        Err(e) => semcore::error!("setup failed: {}", e),
    }

    loop {
        cortex_m::asm::wfi();
    }
}
