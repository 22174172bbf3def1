//! Hardware seams.
//!
//! The codec and protocols never touch registers. They drive an [`Antenna`]
//! (the FPGA front end: field mode, carrier divisor and sample acquisition),
//! an `embedded_hal` delay for busy waits, and `embedded_hal` pins for the
//! modulation line and the carrier clock. Long-running loops poll a [`Cancel`]
//! source between iterations.

use core::cell::Cell;
use core::fmt::Debug;

use critical_section::Mutex;

/// What the front end does with the antenna.
#[derive(PartialEq, Eq, Clone, Copy, Default, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum FieldMode {
    /// Field off, nothing sampled.
    #[default]
    Off,
    /// Reader field on, ADC sampling the antenna.
    Reader,
    /// ADC sampling without driving the reader field (passive listening).
    Listen,
    /// Comparator output routed to the capture port, modulation driven from
    /// the modulation pin (TI tags).
    Passthrough,
    /// Carrier edges routed to the clock pin, coil driven from the
    /// modulation pin (tag simulation).
    EdgeDetect,
}

/// Which signal an acquisition samples.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum SampleSource {
    /// The ADC with the configured decimation and resolution.
    Adc,
    /// Peak-detected COTAG envelope, stored as raw samples.
    CotagRaw,
    /// Peak-detected COTAG envelope, sliced to Manchester bits by the front end.
    CotagManchester,
}

/// Parameters of one acquisition.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct AcquireRequest {
    /// Signal to sample.
    pub source: SampleSource,
    /// Amplitude that starts the capture; 0 captures immediately.
    pub trigger_threshold: u8,
    /// Give up after this many samples without a trigger; 0 waits forever.
    pub cancel_after: usize,
}

impl AcquireRequest {
    /// An untriggered ADC capture.
    pub const fn immediate() -> Self {
        Self {
            source: SampleSource::Adc,
            trigger_threshold: 0,
            cancel_after: 0,
        }
    }

    /// An ADC capture that waits for `threshold`, abandoning after `cancel_after` samples.
    pub const fn triggered(threshold: u8, cancel_after: usize) -> Self {
        Self {
            source: SampleSource::Adc,
            trigger_threshold: threshold,
            cancel_after,
        }
    }
}

/// The LF front end.
///
/// Implementations wrap the FPGA/ADC bring-up of a particular board. Every
/// method is expected to return promptly; timing is handled by the caller's delay.
pub trait Antenna {
    /// Front-end specific failure.
    type Error: Debug;

    /// Switches the antenna to `mode`.
    fn set_mode(&mut self, mode: FieldMode) -> Result<(), Self::Error>;

    /// Sets the carrier divisor (`12 MHz / (divisor + 1)`).
    fn set_divisor(&mut self, divisor: u8) -> Result<(), Self::Error>;

    /// Captures up to `dest.len()` samples and returns how many were stored.
    fn acquire(&mut self, dest: &mut [u8], request: AcquireRequest) -> Result<usize, Self::Error>;

    /// Captures comparator zero-crossing bits, 32 per word, most significant
    /// bit first, and returns how many words were stored.
    fn capture_crossings(&mut self, dest: &mut [u32]) -> Result<usize, Self::Error>;
}

/// A source of cancellation requests (button, host traffic).
pub trait Cancel {
    /// True once the running operation should stop.
    fn is_cancelled(&mut self) -> bool;
}

impl<F: FnMut() -> bool> Cancel for F {
    fn is_cancelled(&mut self) -> bool {
        self()
    }
}

/// Cancellation flag shared with an interrupt handler.
///
/// ```rust
/// use lfprox::hal::{Cancel, CancelFlag};
///
/// static STOP: CancelFlag = CancelFlag::new();
///
/// // in the button ISR
/// STOP.raise();
///
/// // in the operation loop
/// let mut stop = || STOP.take();
/// assert!(stop.is_cancelled());
/// assert!(!stop.is_cancelled());
/// ```
#[derive(Debug)]
pub struct CancelFlag {
    raised: Mutex<Cell<bool>>,
}

impl CancelFlag {
    /// A lowered flag.
    pub const fn new() -> Self {
        Self {
            raised: Mutex::new(Cell::new(false)),
        }
    }

    /// Requests cancellation.
    pub fn raise(&self) {
        critical_section::with(|cs| self.raised.borrow(cs).set(true));
    }

    /// Returns whether the flag was raised and lowers it.
    pub fn take(&self) -> bool {
        critical_section::with(|cs| self.raised.borrow(cs).replace(false))
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}
