//! T55xx/Q5 downlink protocol.
//!
//! The reader talks to a T55x7 or Q5 by gapping its own field. Every command
//! starts with a start gap after the tag has been powered for a few
//! milliseconds, followed by the frame bits. Each bit is a field-on period
//! whose length selects the value, closed by a short write gap. The frame is
//! assembled by [`T55xxCommand::frame`] and goes through these phases:
//!
//! ```text
//! Idle -> StartGap -> Opcode -> [Page] -> [Password] -> Lock -> Data -> [BlockAddress] -> ProgramWindow -> Idle
//! ```
//!
//! Reads, resets and wake-ups use prefixes of the same layout. None of the
//! commands is acknowledged: a write is only confirmed by reading the block back.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use heapless::Vec;

use crate::buffer::SampleBuffer;
use crate::consts::{T55XX_MAX_BLOCK, T55XX_POWER_UP_MS};
use crate::driver::LfDriver;
use crate::error::{EncodeError, Error};
use crate::hal::{AcquireRequest, Antenna, FieldMode};

/// Samples captured after a block read.
pub const READ_SAMPLES: usize = 12_000;

/// Longest frame: opcode, password, lock, data and address.
const MAX_FRAME_BITS: usize = 2 + 32 + 1 + 32 + 3;

/// Protocol phase of the bits being sent.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum T55xxPhase {
    Idle,
    StartGap,
    Opcode,
    Page,
    Password,
    Lock,
    Data,
    BlockAddress,
    ProgramWindow,
}

impl T55xxPhase {
    fn name(self) -> &'static str {
        match self {
            T55xxPhase::Idle => "idle",
            T55xxPhase::StartGap => "start gap",
            T55xxPhase::Opcode => "opcode",
            T55xxPhase::Page => "page",
            T55xxPhase::Password => "password",
            T55xxPhase::Lock => "lock",
            T55xxPhase::Data => "data",
            T55xxPhase::BlockAddress => "block address",
            T55xxPhase::ProgramWindow => "program window",
        }
    }
}

/// A block write.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct T55xxWrite {
    /// Block address, 0..=7.
    pub block: u8,
    /// Block contents.
    pub data: u32,
    /// Password for tags in password mode.
    pub password: Option<u32>,
    /// Selects page 1.
    pub page1: bool,
    /// Sends the test-mode opcode (`01`) with its shorter program window.
    pub test_mode: bool,
}

impl T55xxWrite {
    /// A plain page-0 write.
    pub const fn new(block: u8, data: u32) -> Self {
        Self {
            block,
            data,
            password: None,
            page1: false,
            test_mode: false,
        }
    }
}

/// A downlink command.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum T55xxCommand {
    /// Program one block.
    Write(T55xxWrite),
    /// Read one block, or enter regular read mode when `block` is `None`.
    Read {
        /// Selects page 1.
        page1: bool,
        /// Block address, 0..=7.
        block: Option<u8>,
        /// Password for tags in password mode.
        password: Option<u32>,
    },
    /// Reset (opcode `00`).
    Reset,
    /// AOR wake-up with the password.
    Wake {
        /// Tag password.
        password: u32,
    },
}

/// Frame bits grouped by phase, most significant bit first.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct T55xxFrame {
    bits: Vec<bool, MAX_FRAME_BITS>,
    segments: Vec<(T55xxPhase, usize), 6>,
}

impl T55xxFrame {
    fn new() -> Self {
        Self {
            bits: Vec::new(),
            segments: Vec::new(),
        }
    }

    fn push(&mut self, phase: T55xxPhase, value: u32, width: u32) -> Result<(), EncodeError> {
        self.segments
            .push((phase, self.bits.len()))
            .map_err(|_| EncodeError::BufferFull)?;
        for i in (0..width).rev() {
            self.bits
                .push((value >> i) & 1 == 1)
                .map_err(|_| EncodeError::BufferFull)?;
        }
        Ok(())
    }

    /// All bits in transmission order.
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    /// Phases in transmission order, each with its bits.
    pub fn segments(&self) -> impl Iterator<Item = (T55xxPhase, &[bool])> + '_ {
        self.segments.iter().enumerate().map(|(i, &(phase, start))| {
            let end = self
                .segments
                .get(i + 1)
                .map_or(self.bits.len(), |&(_, next)| next);
            (phase, &self.bits[start..end])
        })
    }
}

fn check_block(block: u8) -> Result<(), EncodeError> {
    if block > T55XX_MAX_BLOCK {
        return Err(EncodeError::InvalidBlock(block));
    }
    Ok(())
}

impl T55xxCommand {
    /// Builds the frame.
    ///
    /// # Errors
    /// [`EncodeError::InvalidBlock`] for a block address above 7.
    pub fn frame(&self) -> Result<T55xxFrame, EncodeError> {
        let mut frame = T55xxFrame::new();
        match *self {
            T55xxCommand::Write(write) => {
                check_block(write.block)?;
                if write.test_mode {
                    frame.push(T55xxPhase::Opcode, 0b01, 2)?;
                } else {
                    frame.push(T55xxPhase::Opcode, 1, 1)?;
                    frame.push(T55xxPhase::Page, u32::from(write.page1), 1)?;
                }
                if let Some(password) = write.password {
                    frame.push(T55xxPhase::Password, password, 32)?;
                }
                frame.push(T55xxPhase::Lock, 0, 1)?;
                frame.push(T55xxPhase::Data, write.data, 32)?;
                frame.push(T55xxPhase::BlockAddress, write.block as u32, 3)?;
            }
            T55xxCommand::Read {
                page1,
                block,
                password,
            } => {
                frame.push(T55xxPhase::Opcode, 1, 1)?;
                frame.push(T55xxPhase::Page, u32::from(page1), 1)?;
                if let Some(password) = password {
                    frame.push(T55xxPhase::Password, password, 32)?;
                }
                frame.push(T55xxPhase::Lock, 0, 1)?;
                if let Some(block) = block {
                    check_block(block)?;
                    frame.push(T55xxPhase::BlockAddress, block as u32, 3)?;
                }
            }
            T55xxCommand::Reset => frame.push(T55xxPhase::Opcode, 0b00, 2)?,
            T55xxCommand::Wake { password } => {
                frame.push(T55xxPhase::Opcode, 1, 1)?;
                frame.push(T55xxPhase::Page, 0, 1)?;
                frame.push(T55xxPhase::Password, password, 32)?;
            }
        }
        Ok(frame)
    }
}

impl<A, D, M, C> LfDriver<A, D, M, C>
where
    A: Antenna,
    D: DelayNs,
    M: OutputPin,
    C: InputPin,
{
    /// Powers the tag, sends the start gap and the frame. Leaves the field off.
    fn t55xx_send(&mut self, frame: &T55xxFrame) -> Result<(), Error<A::Error>> {
        let timing = self.config().t55xx;
        let divisor = self.config().divisor;
        self.power_up(divisor, FieldMode::Reader)?;
        self.wait_ms(T55XX_POWER_UP_MS);

        trace!("t55xx {}", T55xxPhase::StartGap.name());
        self.field_off_for(timing.start_gap)?;
        for (phase, bits) in frame.segments() {
            trace!("t55xx {} ({} bits)", phase.name(), bits.len());
            for &bit in bits {
                self.field_on_for(if bit { timing.write_1 } else { timing.write_0 })?;
                self.field_off_for(timing.write_gap)?;
            }
        }
        Ok(())
    }

    /// Programs one block.
    ///
    /// The field stays on for the program window (20 ms, or 5184 µs in test
    /// mode) and is then switched off.
    pub fn t55xx_write_block(&mut self, write: T55xxWrite) -> Result<(), Error<A::Error>> {
        let frame = T55xxCommand::Write(write).frame()?;
        debug!("t55xx write block {} = {:x}", write.block, write.data);
        self.guarded(|d| {
            d.t55xx_send(&frame)?;
            let timing = d.config().t55xx;
            let window = if write.test_mode {
                timing.test_mode_window
            } else {
                timing.program_window
            };
            trace!("t55xx {}", T55xxPhase::ProgramWindow.name());
            d.field_on_for(window)?;
            d.field_off()?;
            trace!("t55xx {}", T55xxPhase::Idle.name());
            Ok(())
        })
    }

    /// Writes `blocks` to page 0 starting at address `start`.
    ///
    /// Blocks go out highest address first, so block 0 (the configuration)
    /// is always the last one written.
    pub fn t55xx_write_blocks(&mut self, blocks: &[u32], start: u8) -> Result<(), Error<A::Error>> {
        let end = usize::from(start) + blocks.len();
        if end > usize::from(T55XX_MAX_BLOCK) + 1 {
            let block = u8::try_from(end - 1).unwrap_or(u8::MAX);
            return Err(EncodeError::InvalidBlock(block).into());
        }
        for (offset, &data) in blocks.iter().enumerate().rev() {
            self.t55xx_write_block(T55xxWrite::new(start + offset as u8, data))?;
        }
        info!("t55xx wrote {} blocks from {}", blocks.len(), start);
        Ok(())
    }

    /// Reads one block (or, with `block == None`, the regular stream) into `buf`.
    ///
    /// Captures up to [`READ_SAMPLES`] samples once the reply has settled.
    pub fn t55xx_read_block<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        page1: bool,
        block: Option<u8>,
        password: Option<u32>,
    ) -> Result<usize, Error<A::Error>> {
        let frame = T55xxCommand::Read {
            page1,
            block,
            password,
        }
        .frame()?;
        buf.clear();
        self.guarded(|d| {
            d.t55xx_send(&frame)?;
            let settle = d.config().t55xx.read_settle;
            d.field_on_for(settle)?;
            let n = d.acquire(buf, READ_SAMPLES, AcquireRequest::immediate())?;
            d.field_off()?;
            Ok(n)
        })
    }

    /// Sends a reset and captures the restarting stream into the whole of `buf`.
    pub fn t55xx_reset_read<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
    ) -> Result<usize, Error<A::Error>> {
        let frame = T55xxCommand::Reset.frame()?;
        buf.clear();
        self.guarded(|d| {
            d.t55xx_send(&frame)?;
            let gap = d.config().t55xx.read_gap;
            d.field_on_for(gap)?;
            let n = d.acquire(buf, N, AcquireRequest::immediate())?;
            d.field_off()?;
            Ok(n)
        })
    }

    /// Wakes a tag in answer-on-request mode.
    ///
    /// The reader field is left **on** so the tag keeps transmitting; the
    /// caller switches it off with its next operation.
    pub fn t55xx_wake(&mut self, password: u32) -> Result<(), Error<A::Error>> {
        let frame = T55xxCommand::Wake { password }.frame()?;
        self.guarded(|d| {
            d.t55xx_send(&frame)?;
            let hold = d.config().t55xx.wake_hold;
            d.field_on_for(hold)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::T55xxTiming;
    use crate::mock::{Event, Log, field_events, finish, last_event, quiet_driver, rig};

    const PROGRAM_WINDOW: u32 = 20_000;

    /// Recovers (block, data) pairs from the waits of plain page-0 writes.
    fn decode_writes(log: &Log) -> std::vec::Vec<(u8, u32)> {
        let timing = T55xxTiming::default();
        let waits: std::vec::Vec<u32> = log
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Wait(us) => Some(*us),
                _ => None,
            })
            .collect();
        waits
            .split(|&us| us == PROGRAM_WINDOW)
            .filter(|frame| !frame.is_empty())
            .map(|frame| {
                // power-up, start gap, then (on, gap) pairs
                assert_eq!(&frame[..2], &[5_000, timing.start_gap]);
                let bits: std::vec::Vec<bool> = frame[2..]
                    .chunks(2)
                    .map(|pair| pair[0] == timing.write_1)
                    .collect();
                assert_eq!(bits.len(), 38);
                assert_eq!(&bits[..3], &[true, false, false]);
                let data = bits[3..35].iter().fold(0u32, |acc, &b| acc << 1 | b as u32);
                let block = bits[35..].iter().fold(0u8, |acc, &b| acc << 1 | b as u8);
                (block, data)
            })
            .collect()
    }

    #[test]
    fn test_write_frame_layout() {
        let write = T55xxWrite {
            password: Some(0x5131_6B4F),
            ..T55xxWrite::new(5, 0xDEAD_BEEF)
        };
        let frame = T55xxCommand::Write(write).frame().unwrap();
        assert_eq!(frame.bits().len(), 70);
        let phases: std::vec::Vec<T55xxPhase> = frame.segments().map(|(p, _)| p).collect();
        assert_eq!(
            phases,
            vec![
                T55xxPhase::Opcode,
                T55xxPhase::Page,
                T55xxPhase::Password,
                T55xxPhase::Lock,
                T55xxPhase::Data,
                T55xxPhase::BlockAddress
            ]
        );
        let (_, address) = frame.segments().last().unwrap();
        assert_eq!(address, &[true, false, true]);
    }

    #[test]
    fn test_test_mode_opcode() {
        let write = T55xxWrite {
            test_mode: true,
            ..T55xxWrite::new(0, 0)
        };
        let frame = T55xxCommand::Write(write).frame().unwrap();
        assert_eq!(&frame.bits()[..3], &[false, true, false]);
        assert_eq!(frame.bits().len(), 38);
    }

    #[test]
    fn test_read_reset_and_wake_frames() {
        let regular = T55xxCommand::Read {
            page1: true,
            block: None,
            password: None,
        };
        assert_eq!(regular.frame().unwrap().bits(), &[true, true, false]);

        let direct = T55xxCommand::Read {
            page1: false,
            block: Some(3),
            password: Some(0),
        };
        assert_eq!(direct.frame().unwrap().bits().len(), 2 + 32 + 1 + 3);

        assert_eq!(T55xxCommand::Reset.frame().unwrap().bits(), &[false, false]);

        let wake = T55xxCommand::Wake { password: 1 }.frame().unwrap();
        assert_eq!(wake.bits().len(), 34);
        assert_eq!(wake.bits()[..2], [true, false]);
        assert!(wake.bits()[33]);
    }

    #[test]
    fn test_block_address_is_validated() {
        assert_eq!(
            T55xxCommand::Write(T55xxWrite::new(8, 0)).frame(),
            Err(EncodeError::InvalidBlock(8))
        );
    }

    #[test]
    fn test_write_blocks_descends_to_config_block() {
        let (antenna, delay, log) = rig();
        let mut driver = quiet_driver(antenna, delay);
        driver
            .t55xx_write_blocks(&[0x0014_8040, 0xFF80_0000, 0x1234_5678], 0)
            .unwrap();
        assert_eq!(
            decode_writes(&log),
            vec![(2, 0x1234_5678), (1, 0xFF80_0000), (0, 0x0014_8040)]
        );
        assert_eq!(last_event(&log), Some(Event::Mode(FieldMode::Off)));
        finish(driver);
    }

    #[test]
    fn test_write_blocks_rejects_overflowing_range() {
        let (antenna, delay, log) = rig();
        let mut driver = quiet_driver(antenna, delay);
        let result = driver.t55xx_write_blocks(&[0; 3], 6);
        assert!(matches!(
            result,
            Err(Error::Encode(EncodeError::InvalidBlock(8)))
        ));
        assert!(log.borrow().is_empty());
        finish(driver);
    }

    #[test]
    fn test_read_block_captures_after_settle() {
        let (antenna, delay, log) = rig();
        let mut driver = quiet_driver(antenna.with_samples(&[1, 2, 3]), delay);
        let mut buf: SampleBuffer<u8, 64> = SampleBuffer::new();
        let n = driver.t55xx_read_block(&mut buf, false, Some(1), None).unwrap();
        assert_eq!(n, 3);

        let events = log.borrow();
        let acquire = events
            .iter()
            .position(|e| matches!(e, Event::Acquire(..)))
            .unwrap();
        assert_eq!(events[acquire], Event::Acquire(64, AcquireRequest::immediate()));
        assert_eq!(
            &events[acquire - 2..acquire],
            &[Event::Mode(FieldMode::Reader), Event::Wait(1680)]
        );
        assert_eq!(events.last(), Some(&Event::Mode(FieldMode::Off)));
        drop(events);
        finish(driver);
    }

    #[test]
    fn test_reset_read_fills_whole_buffer() {
        let (antenna, delay, log) = rig();
        let mut driver = quiet_driver(antenna, delay);
        let mut buf: SampleBuffer<u8, 32> = SampleBuffer::new();
        let _ = driver.t55xx_reset_read(&mut buf).unwrap();
        let events = field_events(&log);
        assert!(events.contains(&Event::Acquire(32, AcquireRequest::immediate())));
        // power up, start gap, two bits (on/off each), read gap, acquire, off
        assert_eq!(events.len(), 2 + 1 + 4 + 1 + 1 + 1);
        finish(driver);
    }

    #[test]
    fn test_wake_leaves_field_on() {
        let (antenna, delay, log) = rig();
        let mut driver = quiet_driver(antenna, delay);
        driver.t55xx_wake(0x1234_5678).unwrap();
        assert_eq!(last_event(&log), Some(Event::Wait(20_000)));
        assert_eq!(driver.mode(), FieldMode::Reader);
        finish(driver);
    }
}
