//! Modulation codec.
//!
//! Turns a logical bitstream into the level sequence (`0` = coil shorted,
//! `1` = coil open) that the simulation loop plays back one sample per
//! carrier cycle. Every encoder appends to the caller's
//! [`SampleBuffer`] and returns the number of samples it appended.
//!
//! ## Encodings
//!
//! - **FSK**: each bit is a run of field-clock waves of one of two lengths.
//!   When the data rate is not a multiple of the field clock the remainder is
//!   spread over the stream: if it divides the field clock evenly an extra
//!   full wave is inserted every `fc / remainder` bits (FSK2), otherwise a
//!   shortened wave closes every bit (FSK1).
//! - **ASK**: raw level runs or Manchester half-bit pairs. A raw stream whose
//!   first and last bits are equal is followed by an inverted copy so that
//!   looped playback stays balanced.
//! - **Biphase**: a `1` toggles mid-bit, a `0` holds the running phase and
//!   flips it. An odd number of zeros is closed with a second identical pass.
//! - **PSK**: square waves of `carrier` samples, with a phase-reversal wave
//!   whenever the bit value differs from the running phase.
//! - **Separator**: the fixed ST marker placed after a Manchester frame.
//!
//! Buffer exhaustion is reported as [`EncodeError::BufferFull`]; a stream that
//! fails half way leaves a partial waveform that must not be played back.

use crate::buffer::SampleBuffer;
use crate::error::EncodeError;

/// How an ASK stream is line coded.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum AskEncoding {
    /// The bit level for the whole clock.
    Raw,
    /// Bit level for the first half clock, complement for the second.
    Manchester,
    /// Biphase with a running phase.
    Biphase,
}

fn level(bit: bool) -> u8 {
    u8::from(bit)
}

fn push_wave<const N: usize>(
    buf: &mut SampleBuffer<u8, N>,
    first: bool,
    first_len: usize,
    second_len: usize,
) -> Result<(), EncodeError> {
    buf.push_run(level(first), first_len)?;
    buf.push_run(level(!first), second_len)
}

/// Appends `waves` field-clock cycles of `fc` samples, high half first.
///
/// This is the building block of the HID waveform: a filler is one fc/8
/// wave, an `fc8` symbol six of them and an `fc10` symbol five fc/10 waves.
pub fn push_field_clock<const N: usize>(
    buf: &mut SampleBuffer<u8, N>,
    fc: u8,
    waves: usize,
) -> Result<usize, EncodeError> {
    if fc == 0 {
        return Err(EncodeError::InvalidClock(fc));
    }
    let start = buf.len();
    let high = (fc / 2) as usize;
    for _ in 0..waves {
        push_wave(buf, true, high, fc as usize - high)?;
    }
    Ok(buf.len() - start)
}

/// FSK-encodes `bits` at `clock` samples per bit.
///
/// A bit equal to `invert` is sent on `fc_low`, any other on `fc_high`.
pub fn encode_fsk<const N: usize>(
    buf: &mut SampleBuffer<u8, N>,
    bits: &[bool],
    clock: u8,
    fc_high: u8,
    fc_low: u8,
    invert: bool,
) -> Result<usize, EncodeError> {
    for c in [clock, fc_high, fc_low] {
        if c == 0 {
            return Err(EncodeError::InvalidClock(c));
        }
    }
    let start = buf.len();
    let mut mod_count: u16 = 0;
    for &bit in bits {
        let fc = if bit == invert { fc_low } else { fc_high };
        fsk_bit(buf, fc, clock, &mut mod_count)?;
    }
    Ok(buf.len() - start)
}

fn fsk_bit<const N: usize>(
    buf: &mut SampleBuffer<u8, N>,
    fc: u8,
    clock: u8,
    mod_count: &mut u16,
) -> Result<(), EncodeError> {
    let low = (fc - fc / 2) as usize;
    let high = (fc / 2) as usize;
    for _ in 0..clock / fc {
        push_wave(buf, false, low, high)?;
    }

    let rem = clock % fc;
    if rem == 0 {
        return Ok(());
    }
    *mod_count = mod_count.wrapping_add(1);
    if fc % rem == 0 {
        if *mod_count % u16::from(fc / rem) == 0 {
            push_wave(buf, false, low, high)?;
        }
    } else {
        push_wave(buf, false, (rem - rem / 2) as usize, (rem / 2) as usize)?;
    }
    Ok(())
}

/// ASK-encodes `bits`, raw or Manchester.
pub fn encode_ask<const N: usize>(
    buf: &mut SampleBuffer<u8, N>,
    bits: &[bool],
    clock: u8,
    invert: bool,
    manchester: bool,
) -> Result<usize, EncodeError> {
    if clock == 0 || (manchester && clock < 2) {
        return Err(EncodeError::InvalidClock(clock));
    }
    let start = buf.len();
    let clock = clock as usize;
    let push_bit = |buf: &mut SampleBuffer<u8, N>, c: bool| {
        if manchester {
            push_wave(buf, c, clock / 2, clock - clock / 2)
        } else {
            buf.push_run(level(c), clock)
        }
    };

    for &bit in bits {
        push_bit(buf, bit ^ invert)?;
    }
    if !manchester && bits.first().is_some() && bits.first() == bits.last() {
        for &bit in bits {
            push_bit(buf, !(bit ^ invert))?;
        }
    }
    Ok(buf.len() - start)
}

/// Biphase-encodes `bits`, repeating the pass once if it leaves the phase at 1.
pub fn encode_biphase<const N: usize>(
    buf: &mut SampleBuffer<u8, N>,
    bits: &[bool],
    clock: u8,
    invert: bool,
) -> Result<usize, EncodeError> {
    if clock < 2 {
        return Err(EncodeError::InvalidClock(clock));
    }
    let start = buf.len();
    let mut phase = false;
    biphase_pass(buf, bits, clock, invert, &mut phase)?;
    if phase {
        biphase_pass(buf, bits, clock, invert, &mut phase)?;
    }
    Ok(buf.len() - start)
}

fn biphase_pass<const N: usize>(
    buf: &mut SampleBuffer<u8, N>,
    bits: &[bool],
    clock: u8,
    invert: bool,
    phase: &mut bool,
) -> Result<(), EncodeError> {
    let clock = clock as usize;
    for &bit in bits {
        if bit ^ invert {
            push_wave(buf, *phase, clock / 2, clock - clock / 2)?;
        } else {
            buf.push_run(level(*phase), clock)?;
            *phase = !*phase;
        }
    }
    Ok(())
}

/// Appends the ST separator: ½ high, ½ low, 1½ high, ½ low, 1 high.
pub fn encode_separator<const N: usize>(
    buf: &mut SampleBuffer<u8, N>,
    clock: u8,
) -> Result<usize, EncodeError> {
    if clock < 2 {
        return Err(EncodeError::InvalidClock(clock));
    }
    let start = buf.len();
    let clock = clock as usize;
    let half = clock / 2;
    push_wave(buf, true, half, clock - half)?;
    push_wave(buf, true, clock + half, clock - half)?;
    buf.push_run(1, clock)?;
    Ok(buf.len() - start)
}

/// PSK-encodes `bits` with `carrier`-sample waves.
///
/// Each bit lasts at least `clock` samples, rounded up to whole waves.
pub fn encode_psk<const N: usize>(
    buf: &mut SampleBuffer<u8, N>,
    bits: &[bool],
    clock: u8,
    carrier: u8,
    invert: bool,
) -> Result<usize, EncodeError> {
    for c in [clock, carrier] {
        if c == 0 {
            return Err(EncodeError::InvalidClock(c));
        }
    }
    let start = buf.len();
    let half = (carrier / 2) as usize;
    let rest = carrier as usize - half;
    let mut phase = false;
    for &bit in bits {
        let mut emitted = 0;
        if bit ^ invert != phase {
            push_wave(buf, !phase, half, rest)?;
            phase = !phase;
            emitted += carrier as usize;
        }
        while emitted < clock as usize {
            push_wave(buf, phase, half, rest)?;
            emitted += carrier as usize;
        }
    }
    Ok(buf.len() - start)
}

/// Encodes an ASK-family stream the way the simulator plays it back.
///
/// `separator` appends the ST marker; it only exists for Manchester and is
/// skipped with a warning for the other encodings.
pub fn encode_ask_stream<const N: usize>(
    buf: &mut SampleBuffer<u8, N>,
    bits: &[bool],
    clock: u8,
    encoding: AskEncoding,
    invert: bool,
    separator: bool,
) -> Result<usize, EncodeError> {
    let start = buf.len();
    let _ = match encoding {
        AskEncoding::Biphase => encode_biphase(buf, bits, clock, invert)?,
        AskEncoding::Raw => encode_ask(buf, bits, clock, invert, false)?,
        AskEncoding::Manchester => encode_ask(buf, bits, clock, invert, true)?,
    };
    if separator {
        if encoding == AskEncoding::Manchester {
            let _ = encode_separator(buf, clock)?;
        } else {
            warn!("separator is only available with manchester encoding");
        }
    }
    Ok(buf.len() - start)
}
