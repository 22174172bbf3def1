//! Recording fakes for the antenna front end and the delay provider.
//!
//! Both halves append to one shared [`Log`], so a test can assert the exact
//! interleaving of field switches and busy waits that an operation produced.
//! Pins are mocked with `embedded-hal-mock` directly in each test.

use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal_mock::eh1::digital::Mock as PinMock;

use crate::config::LfConfig;
use crate::driver::LfDriver;
use crate::hal::{AcquireRequest, Antenna, FieldMode};

/// One observable step.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub(crate) enum Event {
    Mode(FieldMode),
    Divisor(u8),
    Wait(u32),
    Acquire(usize, AcquireRequest),
    Crossings(usize),
}

pub(crate) type Log = Rc<RefCell<Vec<Event>>>;

#[derive(Debug)]
pub(crate) struct Fault;

/// Antenna that records every call and replays canned captures.
#[derive(Debug)]
pub(crate) struct MockAntenna {
    log: Log,
    samples: Vec<u8>,
    crossings: Vec<u32>,
    fail_acquire: bool,
}

impl MockAntenna {
    /// Makes every acquisition copy `samples` into the destination.
    pub(crate) fn with_samples(mut self, samples: &[u8]) -> Self {
        self.samples = samples.to_vec();
        self
    }

    /// Makes every crossing capture copy `words` into the destination.
    pub(crate) fn with_crossings(mut self, words: &[u32]) -> Self {
        self.crossings = words.to_vec();
        self
    }

    /// Makes every acquisition fail.
    pub(crate) fn failing(mut self) -> Self {
        self.fail_acquire = true;
        self
    }
}

impl Antenna for MockAntenna {
    type Error = Fault;

    fn set_mode(&mut self, mode: FieldMode) -> Result<(), Fault> {
        self.log.borrow_mut().push(Event::Mode(mode));
        Ok(())
    }

    fn set_divisor(&mut self, divisor: u8) -> Result<(), Fault> {
        self.log.borrow_mut().push(Event::Divisor(divisor));
        Ok(())
    }

    fn acquire(&mut self, dest: &mut [u8], request: AcquireRequest) -> Result<usize, Fault> {
        self.log.borrow_mut().push(Event::Acquire(dest.len(), request));
        if self.fail_acquire {
            return Err(Fault);
        }
        let n = self.samples.len().min(dest.len());
        dest[..n].copy_from_slice(&self.samples[..n]);
        Ok(n)
    }

    fn capture_crossings(&mut self, dest: &mut [u32]) -> Result<usize, Fault> {
        self.log.borrow_mut().push(Event::Crossings(dest.len()));
        let n = self.crossings.len().min(dest.len());
        dest[..n].copy_from_slice(&self.crossings[..n]);
        Ok(n)
    }
}

/// Delay that records waits in microseconds instead of sleeping.
#[derive(Debug)]
pub(crate) struct MockDelay {
    log: Log,
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.log.borrow_mut().push(Event::Wait(ns / 1_000));
    }

    fn delay_us(&mut self, us: u32) {
        self.log.borrow_mut().push(Event::Wait(us));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.log.borrow_mut().push(Event::Wait(ms * 1_000));
    }
}

/// An antenna/delay pair sharing one log.
pub(crate) fn rig() -> (MockAntenna, MockDelay, Log) {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let antenna = MockAntenna {
        log: log.clone(),
        samples: Vec::new(),
        crossings: Vec::new(),
        fail_acquire: false,
    };
    let delay = MockDelay { log: log.clone() };
    (antenna, delay, log)
}

pub(crate) type TestDriver = LfDriver<MockAntenna, MockDelay, PinMock, PinMock>;

/// A driver with default configuration whose pins expect no traffic.
pub(crate) fn quiet_driver(antenna: MockAntenna, delay: MockDelay) -> TestDriver {
    driver_with_pins(antenna, delay, PinMock::new(&[]), PinMock::new(&[]))
}

/// A driver with default configuration and the given pin mocks.
pub(crate) fn driver_with_pins(
    antenna: MockAntenna,
    delay: MockDelay,
    modulation: PinMock,
    clock: PinMock,
) -> TestDriver {
    match LfDriver::new(antenna, delay, modulation, clock, LfConfig::default()) {
        Ok(driver) => driver,
        Err(e) => panic!("default configuration rejected: {e:?}"),
    }
}

/// Checks that every pin expectation was met.
pub(crate) fn finish(driver: TestDriver) {
    let (_, _, mut modulation, mut clock) = driver.release();
    modulation.done();
    clock.done();
}

/// Events with the busy waits removed.
pub(crate) fn field_events(log: &Log) -> Vec<Event> {
    log.borrow()
        .iter()
        .copied()
        .filter(|e| !matches!(e, Event::Wait(_)))
        .collect()
}

/// The last event, which every operation expects to be the field going off.
pub(crate) fn last_event(log: &Log) -> Option<Event> {
    log.borrow().last().copied()
}
