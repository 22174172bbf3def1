//! TI 134 kHz transponders.
//!
//! TI tags are charged by the reader and then answer in FSK: a `1` is 16
//! cycles of 123.2 kHz and a `0` is 16 cycles of 134.2 kHz. The comparator
//! output is sampled at 2 MHz, so a bit is recognised by counting the samples
//! spanned by 16 rising zero crossings.
//!
//! A response frame, least significant bit first:
//!
//! ```text
//! bits   0..16   preamble, all zero
//! bits  16..24   start byte (0x7E, or 0xFE on read/write tags)
//! bits  24..88   identifier
//! bits  88..104  CRC16 over the identifier bytes
//! bits 104..112  end byte, equal to the start byte
//! bits 112..128  ident (read/write tags only)
//! ```

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::buffer::SampleBuffer;
use crate::consts::{
    DIVISOR_TI, TI_CAPTURE_WORDS, TI_FREQ_HI_HZ, TI_FREQ_LO_HZ, TI_KEYWORD, TI_PASSWORD,
    TI_SAMPLE_HZ, TI_WRITE_FRAME,
};
use crate::crc::crc16;
use crate::driver::LfDriver;
use crate::error::{EncodeError, Error};
use crate::hal::{Antenna, FieldMode};

/// Samples spanned by 16 cycles of the `1` carrier.
const SAMPLES_LO: usize = ((TI_SAMPLE_HZ << 4) / TI_FREQ_LO_HZ) as usize;
/// Samples spanned by 16 cycles of the `0` carrier.
const SAMPLES_HI: usize = ((TI_SAMPLE_HZ << 4) / TI_FREQ_HI_HZ) as usize;
/// Half-width of each band.
const THRESHOLD: usize = (SAMPLES_LO - SAMPLES_HI + 1) >> 1;

/// Charge time before the tag answers or accepts data (ms).
const CHARGE_MS: u32 = 50;
/// Programming hold after a write frame (ms).
const PROGRAM_MS: u32 = 50;

/// Modulation off/on durations of a written `1` (µs).
const WRITE_1_US: (u32, u32) = (1000, 1000);
/// Modulation off/on durations of a written `0` (µs).
const WRITE_0_US: (u32, u32) = (300, 1700);

/// A decoded TI response.
///
/// Integrity problems do not hide the readout; check [`TiReadout::crc_ok`]
/// and [`TiReadout::ident_valid`].
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct TiReadout {
    /// The 64-bit identifier.
    pub id: u64,
    /// CRC sent by the tag.
    pub crc: u16,
    /// CRC computed over the received identifier.
    pub computed_crc: u16,
    /// The tag reports itself as read/write.
    pub rewritable: bool,
    /// Result of the 15-bit ident cross-check; `None` on read-only tags.
    pub ident_valid: Option<bool>,
}

impl TiReadout {
    /// True if the received CRC matches the identifier.
    pub fn crc_ok(&self) -> bool {
        self.crc == self.computed_crc
    }

    fn from_frame(reg: u128) -> Self {
        let id = (reg >> 24) as u64;
        let crc = (reg >> 88) as u16;
        let rewritable = reg & (1 << 111) != 0;
        // the top ident bit is not valid
        let ident_valid = rewritable.then(|| ((reg >> 112) as u16 ^ id as u16) & 0x7FFF == 0);
        Self {
            id,
            crc,
            computed_crc: ti_crc(id),
            rewritable,
            ident_valid,
        }
    }
}

/// CRC16 of a TI identifier, computed over its bytes least significant first.
pub fn ti_crc(id: u64) -> u16 {
    crc16(&id.to_le_bytes())
}

/// The 14 bytes of a write frame: keyword, password, identifier, CRC and the
/// write-frame trailer.
pub fn write_frame(id: u64, crc: u16) -> [u8; 14] {
    let mut frame = [0u8; 14];
    frame[0] = TI_KEYWORD;
    frame[1] = TI_PASSWORD;
    frame[2..10].copy_from_slice(&id.to_le_bytes());
    frame[10..12].copy_from_slice(&crc.to_le_bytes());
    frame[12..].copy_from_slice(&TI_WRITE_FRAME);
    frame
}

/// Replaces the contents of `buf` with the crossing bits of `words`, most
/// significant bit first, as `1` (set) and `-1` (clear).
pub fn unpack_crossings<const N: usize>(
    words: &[u32],
    buf: &mut SampleBuffer<i8, N>,
) -> Result<usize, EncodeError> {
    buf.clear();
    for &word in words {
        for bit in (0..32).rev() {
            buf.push(if (word >> bit) & 1 == 1 { 1 } else { -1 })?;
        }
    }
    Ok(buf.len())
}

fn in_band(samples: usize, center: usize) -> bool {
    samples > center - THRESHOLD && samples < center + THRESHOLD
}

fn is_frame(reg: u128) -> bool {
    // 17 zeros then six ones, remembering the bits arrive backwards
    (reg as u32) & 0x7F_FFFF == 0x7E_0000 && (reg >> 16) as u8 == (reg >> 104) as u8
}

/// Searches a ±1 comparator stream for a TI response.
///
/// Every 16 rising crossings the elapsed sample count is classified: the
/// 123.2 kHz band shifts in a `1`, the 134.2 kHz band a `0`, and anything
/// else clears the register. Returns the first frame whose sync pattern and
/// start/end bytes line up.
pub fn demodulate(samples: &[i8]) -> Option<TiReadout> {
    let mut reg: u128 = 0;
    let mut cycles = 0;
    let mut last = 0;

    for (i, pair) in samples.windows(2).enumerate() {
        if !(pair[0] < 0 && pair[1] > 0) {
            continue;
        }
        cycles += 1;
        if cycles < 16 {
            continue;
        }
        cycles = 0;
        let elapsed = i - last;
        last = i;

        reg >>= 1;
        reg = if in_band(elapsed, SAMPLES_LO) {
            reg | 1 << 127
        } else if in_band(elapsed, SAMPLES_HI) {
            reg
        } else {
            0
        };

        if is_frame(reg) {
            let readout = TiReadout::from_frame(reg);
            report(&readout);
            return Some(readout);
        }
    }

    info!("no valid TI tag detected");
    None
}

fn report(readout: &TiReadout) {
    info!("TI tag {:x} crc {:x}", readout.id, readout.crc);
    match readout.ident_valid {
        Some(true) => info!("TI tag is rewritable, ident valid"),
        Some(false) => warn!("TI tag is rewritable, ident mismatch"),
        None => info!("TI tag is read-only"),
    }
    if !readout.crc_ok() {
        warn!("TI CRC mismatch, expected {:x}", readout.computed_crc);
    }
}

impl<A, D, M, C> LfDriver<A, D, M, C>
where
    A: Antenna,
    D: DelayNs,
    M: OutputPin,
    C: InputPin,
{
    /// Charges the tag, then captures and unpacks its answer into `buf`.
    fn ti_acquire<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<i8, N>,
    ) -> Result<usize, Error<A::Error>> {
        self.set_modulation(true)?;
        self.wait_ms(CHARGE_MS);
        self.set_modulation(false)?;

        let mut words = [0u32; TI_CAPTURE_WORDS];
        let n = self.capture_crossings(&mut words)?;
        Ok(unpack_crossings(&words[..n], buf)?)
    }

    fn ti_write_byte(&mut self, byte: u8) -> Result<(), Error<A::Error>> {
        for i in 0..8 {
            let (off, on) = if (byte >> i) & 1 == 1 {
                WRITE_1_US
            } else {
                WRITE_0_US
            };
            self.set_modulation(false)?;
            self.wait_us(off);
            self.set_modulation(true)?;
            self.wait_us(on);
        }
        Ok(())
    }

    /// Reads a TI tag.
    ///
    /// The tag is charged for 50 ms at 134.8 kHz in passthrough mode, then its
    /// answer is captured into `buf` and demodulated. `buf` should hold
    /// [`TI_CAPTURE_SAMPLES`](crate::consts::TI_CAPTURE_SAMPLES) samples.
    /// Returns `Ok(None)` if no frame was found.
    pub fn ti_read<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<i8, N>,
    ) -> Result<Option<TiReadout>, Error<A::Error>> {
        self.guarded(|d| {
            d.power_up(DIVISOR_TI, FieldMode::Passthrough)?;
            let _ = d.ti_acquire(buf)?;
            d.field_off()?;
            Ok(demodulate(buf.as_slice()))
        })
    }

    /// Writes `id` to a read/write TI tag.
    ///
    /// A `crc` of zero is replaced by [`ti_crc`] of `id`; any other value is
    /// written verbatim. The frame from [`write_frame`] is sent least
    /// significant bit first after a 50 ms charge and is followed by a 50 ms
    /// programming hold. The tag is then read back into `buf` and the
    /// demodulated readout returned.
    pub fn ti_write<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<i8, N>,
        id: u64,
        crc: u16,
    ) -> Result<Option<TiReadout>, Error<A::Error>> {
        let crc = if crc == 0 { ti_crc(id) } else { crc };
        info!("writing TI tag {:x} crc {:x}", id, crc);

        self.guarded(|d| {
            d.power_up(DIVISOR_TI, FieldMode::Passthrough)?;
            d.set_modulation(true)?;
            d.wait_ms(CHARGE_MS);
            for byte in write_frame(id, crc) {
                d.ti_write_byte(byte)?;
            }
            d.set_modulation(true)?;
            d.wait_ms(PROGRAM_MS);

            let _ = d.ti_acquire(buf)?;
            d.field_off()?;
            Ok(demodulate(buf.as_slice()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::TI_CAPTURE_SAMPLES;
    use crate::mock::{Event, Log, driver_with_pins, field_events, finish, rig};
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };

    const ID: u64 = 0x1234_5678;

    fn frame(id: u64, crc: u16, sync: u8, ident: u16) -> u128 {
        (sync as u128) << 16
            | (id as u128) << 24
            | (crc as u128) << 88
            | (sync as u128) << 104
            | (ident as u128) << 112
    }

    // 16 periods per bit: 16 samples for a 1, 15 for a 0.
    fn push_bit(out: &mut std::vec::Vec<i8>, period: usize) {
        let low = period / 2;
        for _ in 0..16 {
            out.extend(std::iter::repeat_n(-1, low));
            out.extend(std::iter::repeat_n(1, period - low));
        }
    }

    fn stream(frame: u128) -> std::vec::Vec<i8> {
        let mut out = std::vec::Vec::new();
        for _ in 0..8 {
            push_bit(&mut out, 15);
        }
        for k in 0..128 {
            push_bit(&mut out, if (frame >> k) & 1 == 1 { 16 } else { 15 });
        }
        out
    }

    fn pack(samples: &[i8]) -> std::vec::Vec<u32> {
        samples
            .chunks(32)
            .map(|chunk| {
                let word = chunk
                    .iter()
                    .fold(0u32, |w, &s| (w << 1) | u32::from(s > 0));
                word << (32 - chunk.len())
            })
            .collect()
    }

    fn waits(log: &Log) -> std::vec::Vec<u32> {
        log.borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Wait(us) => Some(*us),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_crc_covers_id_bytes_low_first() {
        let mut crc: u16 = 0;
        for b in [0x78u8, 0x56, 0x34, 0x12, 0, 0, 0, 0] {
            crc ^= b as u16;
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ 0x8408 } else { crc >> 1 };
            }
        }
        assert_eq!(ti_crc(ID), crc);
    }

    #[test]
    fn test_band_constants() {
        assert_eq!((SAMPLES_LO, SAMPLES_HI, THRESHOLD), (259, 238, 11));
    }

    #[test]
    fn test_demodulate_read_only_frame() {
        let crc = ti_crc(ID);
        let readout = demodulate(&stream(frame(ID, crc, 0x7E, 0))).unwrap();
        assert_eq!(
            readout,
            TiReadout {
                id: ID,
                crc,
                computed_crc: crc,
                rewritable: false,
                ident_valid: None,
            }
        );
        assert!(readout.crc_ok());
    }

    #[test]
    fn test_rewritable_frame_checks_fifteen_ident_bits() {
        let crc = ti_crc(ID);
        let good = demodulate(&stream(frame(ID, crc, 0xFE, 0x5678 | 0x8000))).unwrap();
        assert!(good.rewritable);
        assert_eq!(good.ident_valid, Some(true));

        let bad = demodulate(&stream(frame(ID, crc, 0xFE, 0x5679))).unwrap();
        assert_eq!(bad.ident_valid, Some(false));
        assert_eq!(bad.id, ID);
    }

    #[test]
    fn test_crc_mismatch_still_surfaces_readout() {
        let readout = demodulate(&stream(frame(ID, 0xBEEF, 0x7E, 0))).unwrap();
        assert_eq!(readout.crc, 0xBEEF);
        assert!(!readout.crc_ok());
    }

    #[test]
    fn test_out_of_band_window_resets_register() {
        let f = frame(ID, ti_crc(ID), 0x7E, 0);
        let mut samples = std::vec::Vec::new();
        for k in 0..128 {
            let period = match k {
                60 => 18,
                _ if (f >> k) & 1 == 1 => 16,
                _ => 15,
            };
            push_bit(&mut samples, period);
        }
        assert_eq!(demodulate(&samples), None);
        assert_eq!(demodulate(&[]), None);
    }

    #[test]
    fn test_unpack_is_msb_first() {
        let mut buf: SampleBuffer<i8, 64> = SampleBuffer::new();
        let n = unpack_crossings(&[0x8000_0001, 0], &mut buf).unwrap();
        assert_eq!(n, 64);
        assert_eq!(buf.as_slice()[0], 1);
        assert_eq!(buf.as_slice()[1], -1);
        assert_eq!(buf.as_slice()[31], 1);
        assert!(buf.as_slice()[32..].iter().all(|&s| s == -1));

        let mut small: SampleBuffer<i8, 16> = SampleBuffer::new();
        assert_eq!(
            unpack_crossings(&[0], &mut small),
            Err(EncodeError::BufferFull)
        );
    }

    #[test]
    fn test_write_frame_layout() {
        assert_eq!(
            write_frame(0x0102_0304_0506_0708, 0xABCD),
            [
                0xBB, 0xEB, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, 0xCD, 0xAB, 0x00,
                0x03
            ]
        );
    }

    #[test]
    fn test_ti_read_charges_then_captures() {
        let (antenna, delay, log) = rig();
        let crc = ti_crc(ID);
        let antenna = antenna.with_crossings(&pack(&stream(frame(ID, crc, 0x7E, 0))));
        let modulation = PinMock::new(&[
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
        ]);
        let mut driver = driver_with_pins(antenna, delay, modulation, PinMock::new(&[]));
        let mut buf: SampleBuffer<i8, TI_CAPTURE_SAMPLES> = SampleBuffer::new();

        let readout = driver.ti_read(&mut buf).unwrap().unwrap();
        assert_eq!(readout.id, ID);
        assert!(readout.crc_ok());
        assert_eq!(
            field_events(&log),
            vec![
                Event::Divisor(DIVISOR_TI),
                Event::Mode(FieldMode::Passthrough),
                Event::Crossings(TI_CAPTURE_WORDS),
                Event::Mode(FieldMode::Off),
            ]
        );
        assert_eq!(waits(&log), vec![50_000]);
        finish(driver);
    }

    fn write_pins(frame: &[u8]) -> PinMock {
        let mut expected = vec![PinTransaction::set(PinState::High)];
        for _ in 0..frame.len() * 8 {
            expected.push(PinTransaction::set(PinState::Low));
            expected.push(PinTransaction::set(PinState::High));
        }
        expected.push(PinTransaction::set(PinState::High));
        expected.push(PinTransaction::set(PinState::High));
        expected.push(PinTransaction::set(PinState::Low));
        PinMock::new(&expected)
    }

    fn written_bytes(waits: &[u32]) -> std::vec::Vec<u8> {
        waits
            .chunks(16)
            .map(|byte| {
                byte.chunks(2).enumerate().fold(0u8, |acc, (i, pair)| match pair {
                    [1000, 1000] => acc | (1 << i),
                    [300, 1700] => acc,
                    other => panic!("unexpected bit timing {other:?}"),
                })
            })
            .collect()
    }

    #[test]
    fn test_ti_write_sends_frame_and_reads_back() {
        let (antenna, delay, log) = rig();
        let crc = ti_crc(ID);
        let antenna = antenna.with_crossings(&pack(&stream(frame(ID, crc, 0x7E, 0))));
        let modulation = write_pins(&write_frame(ID, crc));
        let mut driver = driver_with_pins(antenna, delay, modulation, PinMock::new(&[]));
        let mut buf: SampleBuffer<i8, TI_CAPTURE_SAMPLES> = SampleBuffer::new();

        let readout = driver.ti_write(&mut buf, ID, 0).unwrap().unwrap();
        assert_eq!(readout.id, ID);
        assert_eq!(readout.crc, crc);
        assert!(readout.crc_ok());

        let waits = waits(&log);
        assert_eq!(waits.len(), 1 + 14 * 16 + 2);
        assert_eq!(waits[0], 50_000);
        assert_eq!(written_bytes(&waits[1..225]), write_frame(ID, crc).to_vec());
        assert_eq!(&waits[225..], &[50_000, 50_000]);
        assert_eq!(driver.mode(), FieldMode::Off);
        finish(driver);
    }

    #[test]
    fn test_ti_write_passes_explicit_crc_through() {
        let (antenna, delay, log) = rig();
        let modulation = write_pins(&write_frame(ID, 0xBEEF));
        let mut driver = driver_with_pins(antenna, delay, modulation, PinMock::new(&[]));
        let mut buf: SampleBuffer<i8, 64> = SampleBuffer::new();

        let readout = driver.ti_write(&mut buf, ID, 0xBEEF).unwrap();
        assert_eq!(readout, None);
        let bytes = written_bytes(&waits(&log)[1..225]);
        assert_eq!(&bytes[10..12], &[0xEF, 0xBE]);
        finish(driver);
    }
}
