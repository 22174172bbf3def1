//! LF reader driver.
//!
//! This module provides the [`LfDriver`] struct, the exclusive owner of every
//! piece of hardware an LF operation touches:
//!
//! - the [`Antenna`] front end (field mode, carrier divisor, acquisitions)
//! - an [`embedded_hal::delay::DelayNs`] used for every protocol timing
//! - the modulation pin (coil short/open during simulation, TI downlink)
//! - the carrier clock input that paces tag simulation
//!
//! Protocol modules ([`t55xx`](crate::t55xx), [`em4x05`](crate::em4x05),
//! [`ti`](crate::ti), [`cotag`](crate::cotag), [`demod`](crate::demod)) add
//! their operations to `LfDriver` in their own `impl` blocks. Every operation
//! takes `&mut self` and, when it samples, the caller's
//! [`SampleBuffer`] by `&mut`, so two operations can never overlap.
//!
//! ## Field discipline
//!
//! An operation returns with the field off whatever the outcome; on an error
//! path the driver switches the field off before handing the error back. The
//! T55xx wake-up is the only operation that leaves the reader field on.
//!
//! ## Example
//!
//! ```rust,ignore
//! use lfprox::buffer::SampleBuffer;
//! use lfprox::cards::HidId;
//! use lfprox::config::LfConfig;
//! use lfprox::driver::LfDriver;
//!
//! let mut driver = LfDriver::new(antenna, delay, coil, ssc_clk, LfConfig::default())?;
//! let mut wave: SampleBuffer<u8, 16_384> = SampleBuffer::new();
//! let id = HidId { hi2: 0, hi: 0x20, lo: 0x0600_0ee5 };
//! driver.simulate_hid(&mut wave, id, &mut || button_pressed())?;
//! ```

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::buffer::SampleBuffer;
use crate::cards::{HidId, encode_hid_waveform};
use crate::config::LfConfig;
use crate::error::Error;
use crate::hal::{AcquireRequest, Antenna, Cancel, FieldMode};
use crate::modulation::{AskEncoding, encode_ask_stream, encode_fsk, encode_psk};

/// Latency of one field switch in bit-bang mode (µs); bit-bang periods are
/// shortened by this much and may not be shorter.
pub const SWITCH_LATENCY_US: u32 = 7;

/// Field off before a raw command, so the tag fully resets (ms).
const RESET_OFF_MS: u32 = 2500;
/// Field on before a raw command, so the tag fully powers up (ms).
const POWER_UP_MS: u32 = 2000;

/// Timing of a raw reader command sent by [`LfDriver::mod_then_acquire`].
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct RawCommand {
    /// Field-off gap before every bit (µs). Zero selects bit-bang mode, where
    /// `0` is field off and `1` is field on.
    pub delay_off: u32,
    /// Duration of a `0` (µs).
    pub period_0: u32,
    /// Duration of a `1` (µs).
    pub period_1: u32,
}

/// Parameters of an FSK simulation.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct FskParams {
    /// Samples per bit.
    pub clock: u8,
    /// Field-clock length of a `1`.
    pub fc_high: u8,
    /// Field-clock length of a `0`.
    pub fc_low: u8,
    /// Swaps the two carriers.
    pub invert: bool,
}

/// Parameters of an ASK, Manchester or biphase simulation.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct AskParams {
    /// Samples per bit.
    pub clock: u8,
    /// Line code.
    pub encoding: AskEncoding,
    /// Inverts every bit.
    pub invert: bool,
    /// Appends the ST separator (Manchester only).
    pub separator: bool,
}

/// Parameters of a PSK simulation.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct PskParams {
    /// Samples per bit.
    pub clock: u8,
    /// Samples per carrier wave (2, 4 or 8).
    pub carrier: u8,
    /// Inverts every bit.
    pub invert: bool,
}

/// Exclusive owner of the LF front end.
///
/// ## Type Parameters
///
/// - `A`: the [`Antenna`] front end
/// - `D`: a delay provider, ideally backed by a hardware tick counter
/// - `M`: the modulation output (coil open when high)
/// - `C`: the carrier clock input used to pace simulation
#[derive(Debug)]
pub struct LfDriver<A, D, M, C>
where
    A: Antenna,
    D: DelayNs,
    M: OutputPin,
    C: InputPin,
{
    antenna: A,
    delay: D,
    modulation: M,
    clock: C,
    config: LfConfig,
    mode: FieldMode,
}

impl<A, D, M, C> LfDriver<A, D, M, C>
where
    A: Antenna,
    D: DelayNs,
    M: OutputPin,
    C: InputPin,
{
    /// Takes ownership of the hardware.
    ///
    /// Nothing is switched here; the field is assumed off.
    ///
    /// # Errors
    /// [`Error::TimingOutOfWindow`] if a T55xx timing lies outside its
    /// datasheet window.
    pub fn new(
        antenna: A,
        delay: D,
        modulation: M,
        clock: C,
        config: LfConfig,
    ) -> Result<Self, Error<A::Error>> {
        if let Some((name, value_us)) = config.t55xx.out_of_window() {
            return Err(Error::TimingOutOfWindow { name, value_us });
        }
        Ok(Self {
            antenna,
            delay,
            modulation,
            clock,
            config,
            mode: FieldMode::Off,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &LfConfig {
        &self.config
    }

    /// The mode the front end was last switched to.
    pub fn mode(&self) -> FieldMode {
        self.mode
    }

    /// Gives the hardware back.
    pub fn release(self) -> (A, D, M, C) {
        (self.antenna, self.delay, self.modulation, self.clock)
    }

    pub(crate) fn set_mode(&mut self, mode: FieldMode) -> Result<(), Error<A::Error>> {
        self.antenna.set_mode(mode).map_err(Error::Antenna)?;
        self.mode = mode;
        Ok(())
    }

    pub(crate) fn set_divisor(&mut self, divisor: u8) -> Result<(), Error<A::Error>> {
        self.antenna.set_divisor(divisor).map_err(Error::Antenna)
    }

    /// Sets the carrier and switches to `mode`.
    pub(crate) fn power_up(&mut self, divisor: u8, mode: FieldMode) -> Result<(), Error<A::Error>> {
        self.set_divisor(divisor)?;
        self.set_mode(mode)
    }

    pub(crate) fn field_off(&mut self) -> Result<(), Error<A::Error>> {
        self.set_mode(FieldMode::Off)
    }

    /// Reader field on, then hold for `us`.
    pub(crate) fn field_on_for(&mut self, us: u32) -> Result<(), Error<A::Error>> {
        self.set_mode(FieldMode::Reader)?;
        self.delay.delay_us(us);
        Ok(())
    }

    /// Field off, then hold for `us`.
    pub(crate) fn field_off_for(&mut self, us: u32) -> Result<(), Error<A::Error>> {
        self.field_off()?;
        self.delay.delay_us(us);
        Ok(())
    }

    pub(crate) fn wait_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }

    pub(crate) fn wait_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    pub(crate) fn set_modulation(&mut self, high: bool) -> Result<(), Error<A::Error>> {
        if high {
            self.modulation.set_high().map_err(|_| Error::Pin)
        } else {
            self.modulation.set_low().map_err(|_| Error::Pin)
        }
    }

    /// Refills `buf` with up to `max` samples.
    pub(crate) fn acquire<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        max: usize,
        request: AcquireRequest,
    ) -> Result<usize, Error<A::Error>> {
        let antenna = &mut self.antenna;
        let n = buf
            .refill(max, |dest| antenna.acquire(dest, request))
            .map_err(Error::Antenna)?;
        trace!("acquired {} samples", n);
        Ok(n)
    }

    /// Fills `words` with comparator crossing bits.
    pub(crate) fn capture_crossings(&mut self, words: &mut [u32]) -> Result<usize, Error<A::Error>> {
        let n = self.antenna.capture_crossings(words).map_err(Error::Antenna)?;
        trace!("captured {} crossing words", n);
        Ok(n.min(words.len()))
    }

    /// Runs `op`, switching the field off if it fails.
    pub(crate) fn guarded<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, Error<A::Error>>,
    ) -> Result<T, Error<A::Error>> {
        let result = op(self);
        if result.is_err() {
            let _ = self.field_off();
        }
        result
    }

    /// Sends a raw reader command and captures the reply into `buf`.
    ///
    /// The tag is reset by 2.5 s without field and powered for 2 s with the
    /// configured divisor. `bits` is then sent either in bit-bang mode
    /// (`delay_off == 0`: field off for a `0`, on for a `1`, switching only on
    /// change) or in gap mode (a `delay_off` gap before every bit and after
    /// the last). Finally the reply is captured with the configured trigger
    /// threshold and the field is switched off.
    ///
    /// # Errors
    /// [`Error::PeriodTooShort`] in bit-bang mode when a period is below
    /// [`SWITCH_LATENCY_US`]; the field is never switched on in that case.
    pub fn mod_then_acquire<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        command: RawCommand,
        bits: &[bool],
    ) -> Result<usize, Error<A::Error>> {
        let bitbang = command.delay_off == 0;
        if bitbang {
            for period_us in [command.period_0, command.period_1] {
                if period_us < SWITCH_LATENCY_US {
                    warn!("bit-bang periods cannot be below {} us", SWITCH_LATENCY_US);
                    return Err(Error::PeriodTooShort {
                        period_us,
                        min_us: SWITCH_LATENCY_US,
                    });
                }
            }
        }

        self.guarded(|d| {
            d.field_off()?;
            d.wait_ms(RESET_OFF_MS);
            buf.clear();
            let divisor = d.config.divisor;
            d.power_up(divisor, FieldMode::Reader)?;
            d.wait_ms(POWER_UP_MS);

            if bitbang {
                let mut off = false;
                for &bit in bits {
                    if bit {
                        if off {
                            d.set_mode(FieldMode::Reader)?;
                            off = false;
                        }
                        d.wait_us(command.period_1 - SWITCH_LATENCY_US);
                    } else {
                        if !off {
                            d.field_off()?;
                            off = true;
                        }
                        d.wait_us(command.period_0 - SWITCH_LATENCY_US);
                    }
                }
            } else {
                for &bit in bits {
                    d.field_off_for(command.delay_off)?;
                    d.set_divisor(divisor)?;
                    d.field_on_for(if bit { command.period_1 } else { command.period_0 })?;
                }
                d.field_off_for(command.delay_off)?;
                d.set_divisor(divisor)?;
            }

            d.set_mode(FieldMode::Reader)?;
            let request = AcquireRequest::triggered(d.config.trigger_threshold, 0);
            let n = d.acquire(buf, N, request)?;
            d.field_off()?;
            Ok(n)
        })
    }

    fn clock_is(&mut self, high: bool) -> nb::Result<(), Error<A::Error>> {
        match self.clock.is_high() {
            Ok(level) if level == high => Ok(()),
            Ok(_) => Err(nb::Error::WouldBlock),
            Err(_) => Err(nb::Error::Other(Error::Pin)),
        }
    }

    /// Waits for the carrier clock to go high; returns `true` if cancelled
    /// first.
    fn wait_rising(&mut self, cancel: &mut impl Cancel) -> Result<bool, Error<A::Error>> {
        loop {
            match self.clock_is(true) {
                Ok(()) => return Ok(false),
                Err(nb::Error::WouldBlock) => {
                    if cancel.is_cancelled() {
                        return Ok(true);
                    }
                }
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
    }

    /// Plays `buf` back as a tag until `cancel` fires.
    ///
    /// The front end is put in edge-detect mode; on every rising edge of the
    /// carrier clock the coil is opened for a `1` sample and shorted for a
    /// `0`. Playback wraps at the end of the buffer, with an optional `gap_us`
    /// of shorted coil between repetitions. Cancellation is polled while
    /// waiting for a rising edge and at every wrap. Once a sample is driven
    /// the loop waits out its falling edge, so a started sample always
    /// completes. Returns with the field off.
    pub fn simulate<const N: usize>(
        &mut self,
        buf: &SampleBuffer<u8, N>,
        gap_us: u32,
        cancel: &mut impl Cancel,
    ) -> Result<(), Error<A::Error>> {
        let samples = buf.as_slice();
        if samples.is_empty() {
            warn!("nothing to simulate");
            return Ok(());
        }
        info!("simulating {} samples, gap {} us", samples.len(), gap_us);

        self.guarded(|d| {
            d.set_mode(FieldMode::EdgeDetect)?;
            'playback: loop {
                for &sample in samples {
                    if d.wait_rising(cancel)? {
                        break 'playback;
                    }
                    d.set_modulation(sample != 0)?;
                    nb::block!(d.clock_is(false))?;
                }
                if gap_us > 0 {
                    d.set_modulation(false)?;
                    d.wait_us(gap_us);
                }
                if cancel.is_cancelled() {
                    break;
                }
            }
            debug!("simulation stopped");
            d.field_off()
        })
    }

    /// Simulates a HID Prox tag.
    pub fn simulate_hid<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        id: HidId,
        cancel: &mut impl Cancel,
    ) -> Result<(), Error<A::Error>> {
        buf.clear();
        let n = encode_hid_waveform(buf, id)?;
        debug!("hid {:x} {:x} {:x}: {} samples", id.hi2, id.hi, id.lo, n);
        self.simulate(buf, 0, cancel)
    }

    /// Simulates an FSK tag sending `bits`.
    pub fn simulate_fsk<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        bits: &[bool],
        params: FskParams,
        cancel: &mut impl Cancel,
    ) -> Result<(), Error<A::Error>> {
        buf.clear();
        let n = encode_fsk(
            buf,
            bits,
            params.clock,
            params.fc_high,
            params.fc_low,
            params.invert,
        )?;
        debug!(
            "fsk fc {}/{} clock {}: {} samples",
            params.fc_high, params.fc_low, params.clock, n
        );
        self.simulate(buf, 0, cancel)
    }

    /// Simulates an ASK, Manchester or biphase tag sending `bits`.
    pub fn simulate_ask<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        bits: &[bool],
        params: AskParams,
        cancel: &mut impl Cancel,
    ) -> Result<(), Error<A::Error>> {
        buf.clear();
        let n = encode_ask_stream(
            buf,
            bits,
            params.clock,
            params.encoding,
            params.invert,
            params.separator,
        )?;
        debug!("ask clock {}: {} samples", params.clock, n);
        self.simulate(buf, 0, cancel)
    }

    /// Simulates a PSK tag sending `bits`.
    pub fn simulate_psk<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        bits: &[bool],
        params: PskParams,
        cancel: &mut impl Cancel,
    ) -> Result<(), Error<A::Error>> {
        buf.clear();
        let n = encode_psk(buf, bits, params.clock, params.carrier, params.invert)?;
        debug!("psk carrier {} clock {}: {} samples", params.carrier, params.clock, n);
        self.simulate(buf, 0, cancel)
    }
}
