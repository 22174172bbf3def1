//! Continuous scan loops for HID, AWID, IO-Prox and EM410x badges.
//!
//! Bit recovery is done by an external [`Demodulator`]. The loops here keep the
//! antenna listening at 125 kHz, hand every capture to it and turn its output
//! into card fields. A failed decode is not an error: the loop simply captures
//! again until a card is found (`find_one`) or the caller cancels.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::buffer::SampleBuffer;
use crate::cards::HidId;
use crate::consts::DIVISOR_125KHZ;
use crate::driver::LfDriver;
use crate::error::Error;
use crate::hal::{AcquireRequest, Antenna, Cancel, FieldMode};

/// Samples handed to the FSK demodulators, two frames of the longest format.
const FSK_SCAN_SAMPLES: usize = 50 * 128 * 2;
/// Samples handed to the EM410x demodulator.
const ASK_SCAN_SAMPLES: usize = 16_385;

/// Length of an AWID frame in bits.
pub const AWID_FRAME_BITS: usize = 96;
/// Length of an IO-Prox frame in bits.
pub const IO_PROX_FRAME_BITS: usize = 64;

/// Location of a demodulated frame in the sample buffer.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct FskFrame {
    /// Index of the first frame bit.
    pub start: usize,
    /// Number of bits demodulated.
    pub len: usize,
}

/// A decoded EM410x identifier.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct Em410xId {
    /// Upper bits of XL identifiers.
    pub hi: u32,
    /// Identifier.
    pub lo: u64,
    /// Number of identifier bits, above 64 for XL tags.
    pub bits: usize,
}

/// Bit recovery for the supported families.
///
/// Implementations may overwrite `samples`; the FSK methods that return a
/// frame position leave one demodulated bit (0 or 1) per sample in place.
pub trait Demodulator {
    /// Demodulates HID Prox; returns the identifier words and the number of
    /// bits recovered.
    fn hid_fsk(&mut self, samples: &mut [u8]) -> Option<(HidId, usize)>;

    /// Demodulates AWID in place.
    fn awid_fsk(&mut self, samples: &mut [u8]) -> Option<FskFrame>;

    /// Demodulates IO-Prox in place; returns the index of the frame's first bit.
    fn io_fsk(&mut self, samples: &mut [u8]) -> Option<usize>;

    /// Demodulates and decodes an EM410x tag.
    fn em410x(&mut self, samples: &mut [u8]) -> Option<Em410xId>;
}

/// Facility and card number of a Wiegand format.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct Wiegand {
    /// Facility code.
    pub facility: u32,
    /// Card number.
    pub card: u32,
}

/// A HID Prox read.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct HidCard {
    /// Identifier words including the length sentinels.
    pub id: HidId,
    /// Wiegand format length.
    pub bit_length: u8,
    /// Decoded fields for the 26- and 35-bit formats.
    pub wiegand: Option<Wiegand>,
}

fn bit_count(x: u32) -> u8 {
    (32 - x.leading_zeros()) as u8
}

impl HidCard {
    /// Derives the format length from the position of the sentinel bit and
    /// decodes the fields of the formats it knows.
    pub fn from_id(id: HidId) -> Self {
        let bit_length = if id.hi2 & 0xF_FFFF != 0 {
            63 + bit_count(id.hi2 & 0xF_FFFF)
        } else if id.hi >> 6 > 0 {
            31 + bit_count(id.hi)
        } else if (id.hi >> 5) & 1 == 0 {
            37
        } else if id.hi & 0x1F > 0 {
            31 + bit_count(id.hi & 0x1F)
        } else {
            // The length is the sentinel position; the top set bit marks the
            // format and is not itself a data bit.
            bit_count(id.lo).saturating_sub(1)
        };

        let wiegand = match bit_length {
            26 => Some(Wiegand {
                facility: (id.lo >> 17) & 0xFF,
                card: (id.lo >> 1) & 0xFFFF,
            }),
            35 => Some(Wiegand {
                facility: ((id.hi & 1) << 11) | (id.lo >> 21),
                card: (id.lo >> 1) & 0xF_FFFF,
            }),
            _ => None,
        };

        Self {
            id,
            bit_length,
            wiegand,
        }
    }
}

/// An AWID read.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct AwidCard {
    /// The 96 frame bits before parity removal.
    pub raw: [u32; 3],
    /// Wiegand format length.
    pub format_length: u8,
    /// Facility code, 26-bit format only.
    pub facility: Option<u32>,
    /// Card number.
    pub card: u32,
    /// The Wiegand code, when it fits in 64 bits.
    pub wiegand: Option<u64>,
}

/// An IO-Prox read.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct IoProxCard {
    /// The 64 frame bits.
    pub raw: [u32; 2],
    /// Format version.
    pub version: u8,
    /// Facility code.
    pub facility: u8,
    /// Card number.
    pub number: u16,
}

/// Folds bits (one per byte) into an integer, most significant first.
fn bits_to_u64(bits: &[u8]) -> u64 {
    bits.iter().fold(0, |acc, &b| (acc << 1) | u64::from(b & 1))
}

/// Decodes an AWID frame from its demodulated bits.
///
/// After the 8-bit preamble every group of four bits carries three data bits
/// and an odd parity bit. Returns `None` on a short frame or a parity error.
pub fn parse_awid(frame: &[u8]) -> Option<AwidCard> {
    let frame = frame.get(..AWID_FRAME_BITS)?;
    let raw = [
        bits_to_u64(&frame[..32]) as u32,
        bits_to_u64(&frame[32..64]) as u32,
        bits_to_u64(&frame[64..]) as u32,
    ];

    let mut data = [0u8; 66];
    for (group, out) in frame[8..].chunks(4).zip(data.chunks_mut(3)) {
        if group.iter().fold(0, |p, &b| p ^ (b & 1)) != 1 {
            trace!("awid parity error");
            return None;
        }
        out.copy_from_slice(&group[..3]);
    }

    let format_length = bits_to_u64(&data[..8]) as u8;
    let (facility, card) = if format_length == 26 {
        (
            Some(bits_to_u64(&data[9..17]) as u32),
            bits_to_u64(&data[17..33]) as u32,
        )
    } else {
        let start = 8 + usize::from(format_length).saturating_sub(17);
        (None, bits_to_u64(data.get(start..start + 16)?) as u32)
    };
    let wiegand = data
        .get(8..8 + usize::from(format_length))
        .filter(|code| code.len() <= 64)
        .map(bits_to_u64);

    Some(AwidCard {
        raw,
        format_length,
        facility,
        card,
        wiegand,
    })
}

/// Decodes an IO-Prox frame from its demodulated bits.
///
/// ```text
/// 00000000 0 11110000 1 facility 1 version 1 number_hi 1 number_lo 1 checksum 11
/// ```
pub fn parse_io_prox(frame: &[u8]) -> Option<IoProxCard> {
    let frame = frame.get(..IO_PROX_FRAME_BITS)?;
    Some(IoProxCard {
        raw: [
            bits_to_u64(&frame[..32]) as u32,
            bits_to_u64(&frame[32..]) as u32,
        ],
        version: bits_to_u64(&frame[27..35]) as u8,
        facility: bits_to_u64(&frame[18..26]) as u8,
        number: ((bits_to_u64(&frame[36..44]) << 8) | bits_to_u64(&frame[45..53])) as u16,
    })
}

fn window(samples: &mut [u8], max: usize) -> &mut [u8] {
    let n = samples.len().min(max);
    &mut samples[..n]
}

impl<A, D, M, C> LfDriver<A, D, M, C>
where
    A: Antenna,
    D: DelayNs,
    M: OutputPin,
    C: InputPin,
{
    /// Listens at 125 kHz, capturing into `buf` and running `decode` on every
    /// capture until cancelled, or until the first hit with `find_one`.
    /// Returns the last hit.
    fn scan<const N: usize, T>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        find_one: bool,
        cancel: &mut impl Cancel,
        mut decode: impl FnMut(&mut [u8]) -> Option<T>,
    ) -> Result<Option<T>, Error<A::Error>> {
        self.guarded(|d| {
            d.power_up(DIVISOR_125KHZ, FieldMode::Listen)?;
            let mut found = None;
            while !cancel.is_cancelled() {
                let _ = d.acquire(buf, N, AcquireRequest::immediate())?;
                if let Some(hit) = decode(buf.as_mut_slice()) {
                    found = Some(hit);
                    if find_one {
                        break;
                    }
                }
            }
            debug!("scan stopped");
            d.field_off()?;
            Ok(found)
        })
    }

    /// Scans for HID Prox cards.
    ///
    /// Only complete frames (96 or 192 bits with a non-zero low word) count.
    pub fn hid_scan<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        demod: &mut impl Demodulator,
        find_one: bool,
        cancel: &mut impl Cancel,
    ) -> Result<Option<HidCard>, Error<A::Error>> {
        self.scan(buf, find_one, cancel, |samples| {
            let (id, len) = demod.hid_fsk(window(samples, FSK_SCAN_SAMPLES))?;
            if id.lo == 0 || !(len == 96 || len == 192) {
                return None;
            }
            let card = HidCard::from_id(id);
            info!("HID {:x} {:x} {:x}", id.hi2, id.hi, id.lo);
            if let Some(w) = card.wiegand {
                info!(
                    "format {} bits, facility {}, card {}",
                    card.bit_length, w.facility, w.card
                );
            }
            Some(card)
        })
    }

    /// Scans for AWID cards.
    pub fn awid_scan<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        demod: &mut impl Demodulator,
        find_one: bool,
        cancel: &mut impl Cancel,
    ) -> Result<Option<AwidCard>, Error<A::Error>> {
        self.scan(buf, find_one, cancel, |samples| {
            let samples = window(samples, FSK_SCAN_SAMPLES);
            let frame = demod.awid_fsk(samples)?;
            if frame.len != AWID_FRAME_BITS {
                return None;
            }
            let card = parse_awid(samples.get(frame.start..)?)?;
            match card.facility {
                Some(facility) => info!(
                    "AWID {} bits, facility {}, card {}",
                    card.format_length, facility, card.card
                ),
                None => info!(
                    "AWID {} bits (unknown format), card {}",
                    card.format_length, card.card
                ),
            }
            Some(card)
        })
    }

    /// Scans for IO-Prox cards.
    pub fn io_prox_scan<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        demod: &mut impl Demodulator,
        find_one: bool,
        cancel: &mut impl Cancel,
    ) -> Result<Option<IoProxCard>, Error<A::Error>> {
        self.scan(buf, find_one, cancel, |samples| {
            let start = demod.io_fsk(samples)?;
            let card = parse_io_prox(samples.get(start..)?)?;
            info!(
                "IO-Prox XSF({}) {:x}:{}",
                card.version, card.facility, card.number
            );
            Some(card)
        })
    }

    /// Scans for EM410x tags.
    pub fn em410x_scan<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        demod: &mut impl Demodulator,
        find_one: bool,
        cancel: &mut impl Cancel,
    ) -> Result<Option<Em410xId>, Error<A::Error>> {
        self.scan(buf, find_one, cancel, |samples| {
            let id = demod.em410x(window(samples, ASK_SCAN_SAMPLES))?;
            if id.bits > 64 {
                info!("EM XL tag {:x} {:x}", id.hi, id.lo);
            } else {
                info!("EM tag {:x}", id.lo);
            }
            Some(id)
        })
    }
}
