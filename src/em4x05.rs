//! EM4205/4305/4469 forward link.
//!
//! Commands are assembled from up to three sub-frames with a
//! [`ForwardFrame`] builder:
//!
//! | Sub-frame | Bits | Content |
//! |-----------|------|---------|
//! | command   | 6    | start `0`, pause `0`, 4 command bits LSB first |
//! | address   | 7    | 6 address bits LSB first, line parity |
//! | data      | 45   | 4 rows of 8 bits LSB first each followed by its row parity, 8 column parities, stop `0` |
//!
//! On air a `1` is a plain field-on period and a `0` a short field-off pulse
//! followed by field on. The first bit of every frame is replaced by a longer
//! start gap. Parity is always even (XOR of the covered bits).

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use heapless::Vec;

use crate::buffer::SampleBuffer;
use crate::consts::{
    EM4X05_CMD_LOGIN, EM4X05_CMD_PROTECT, EM4X05_CMD_READ, EM4X05_CMD_WRITE, EM4X05_FRAME_BITS,
};
use crate::driver::LfDriver;
use crate::error::{EncodeError, Error};
use crate::hal::{AcquireRequest, Antenna, FieldMode};

/// Samples captured for a tag reply.
pub const REPLY_SAMPLES: usize = 6_000;
/// Trigger threshold of the reply capture.
pub const REPLY_THRESHOLD: u8 = 20;
/// Samples after which an untriggered reply capture is abandoned.
pub const REPLY_CANCEL_AFTER: usize = 1_000;

/// Highest address the 6-bit address field can carry.
const MAX_ADDRESS: u8 = 0x3F;

/// A forward-link frame under construction.
#[derive(PartialEq, Eq, Clone, Default, Debug)]
pub struct ForwardFrame {
    bits: Vec<bool, EM4X05_FRAME_BITS>,
}

impl ForwardFrame {
    /// An empty frame.
    pub fn new() -> Self {
        Self { bits: Vec::new() }
    }

    fn push(&mut self, bit: bool) -> Result<(), EncodeError> {
        self.bits.push(bit).map_err(|_| EncodeError::BufferFull)
    }

    /// Appends the command sub-frame.
    pub fn command(mut self, command: u8) -> Result<Self, EncodeError> {
        self.push(false)?;
        self.push(false)?;
        for i in 0..4 {
            self.push((command >> i) & 1 == 1)?;
        }
        Ok(self)
    }

    /// Appends the address sub-frame.
    pub fn address(mut self, address: u8) -> Result<Self, EncodeError> {
        if address > MAX_ADDRESS {
            return Err(EncodeError::InvalidBlock(address));
        }
        for i in 0..6 {
            self.push((address >> i) & 1 == 1)?;
        }
        self.push(address.count_ones() % 2 == 1)?;
        Ok(self)
    }

    /// Appends the data sub-frame for `data`, least significant byte first,
    /// closed by a `0` stop bit.
    pub fn data(mut self, data: u32) -> Result<Self, EncodeError> {
        let mut columns = 0u8;
        for row in data.to_le_bytes() {
            for j in 0..8 {
                self.push((row >> j) & 1 == 1)?;
            }
            self.push(row.count_ones() % 2 == 1)?;
            columns ^= row;
        }
        for j in 0..8 {
            self.push((columns >> j) & 1 == 1)?;
        }
        self.push(false)?;
        Ok(self)
    }

    /// The frame bits in transmission order.
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }
}

impl<A, D, M, C> LfDriver<A, D, M, C>
where
    A: Antenna,
    D: DelayNs,
    M: OutputPin,
    C: InputPin,
{
    /// Powers the tag and sends `frame`. Leaves the field on.
    fn send_forward(&mut self, frame: &ForwardFrame) -> Result<(), Error<A::Error>> {
        let timing = self.config().forward_link;
        let divisor = self.config().divisor;
        self.power_up(divisor, FieldMode::Reader)?;

        // The start gap stands in for the first bit.
        self.field_off_for(timing.start_gap)?;
        self.field_on_for(timing.field_on)?;
        for &bit in frame.bits().iter().skip(1) {
            if bit {
                self.wait_us(timing.write_1);
            } else {
                self.field_off_for(timing.write_0_off)?;
                self.field_on_for(timing.field_on)?;
            }
        }
        trace!("forward link sent {} bits", frame.bits().len());
        Ok(())
    }

    fn forward_login(&mut self, password: u32) -> Result<(), Error<A::Error>> {
        let frame = ForwardFrame::new().command(EM4X05_CMD_LOGIN)?.data(password)?;
        self.send_forward(&frame)?;
        let settle = self.config().forward_link.login_settle;
        self.wait_us(settle);
        Ok(())
    }

    /// Sends `frame` (after a login if `password` is set), waits `settle`
    /// and captures the reply.
    fn forward_exchange<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        frame: &ForwardFrame,
        password: Option<u32>,
        settle: u32,
    ) -> Result<usize, Error<A::Error>> {
        buf.clear();
        self.guarded(|d| {
            if let Some(password) = password {
                d.forward_login(password)?;
            }
            d.send_forward(frame)?;
            d.wait_us(settle);
            let request = AcquireRequest::triggered(REPLY_THRESHOLD, REPLY_CANCEL_AFTER);
            let n = d.acquire(buf, REPLY_SAMPLES, request)?;
            d.field_off()?;
            Ok(n)
        })
    }

    /// Logs in with `password`.
    pub fn em4x05_login(&mut self, password: u32) -> Result<(), Error<A::Error>> {
        self.guarded(|d| {
            d.forward_login(password)?;
            d.field_off()
        })
    }

    /// Reads the word at `address` and captures the reply into `buf`.
    pub fn em4x05_read_word<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        address: u8,
        password: Option<u32>,
    ) -> Result<usize, Error<A::Error>> {
        let frame = ForwardFrame::new()
            .command(EM4X05_CMD_READ)?
            .address(address)?;
        debug!("em4x05 read word {}", address);
        let settle = self.config().forward_link.read_settle;
        self.forward_exchange(buf, &frame, password, settle)
    }

    /// Writes `data` to `address` and captures the acknowledgment, if any, into `buf`.
    pub fn em4x05_write_word<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        address: u8,
        data: u32,
        password: Option<u32>,
    ) -> Result<usize, Error<A::Error>> {
        let frame = ForwardFrame::new()
            .command(EM4X05_CMD_WRITE)?
            .address(address)?
            .data(data)?;
        debug!("em4x05 write word {} = {:x}", address, data);
        let settle = self.config().forward_link.write_settle;
        self.forward_exchange(buf, &frame, password, settle)
    }

    /// Sends a protect command carrying `data` and captures the reply into `buf`.
    ///
    /// The frame has no address sub-frame.
    pub fn em4x05_protect<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        data: u32,
        password: Option<u32>,
    ) -> Result<usize, Error<A::Error>> {
        let frame = ForwardFrame::new()
            .command(EM4X05_CMD_PROTECT)?
            .data(data)?;
        debug!("em4x05 protect {:x}", data);
        let settle = self.config().forward_link.write_settle;
        self.forward_exchange(buf, &frame, password, settle)
    }
}
