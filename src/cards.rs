//! Card-ID encoders.
//!
//! Two kinds of output are produced here:
//!
//! - **Waveforms** for simulation ([`encode_hid_waveform`]), written into a
//!   [`SampleBuffer`] through the [`modulation`](crate::modulation) primitives.
//! - **Block images** for cloning onto a T55x7 or Q5 blank: the data blocks
//!   of the format plus a configuration word in block 0, built by
//!   [`ConfigWord::encode`].
//!
//! Every encoder checks the identifier against the format's width before it
//! produces anything.

use core::ops::Deref;

use heapless::Vec;

use crate::buffer::SampleBuffer;
use crate::consts::{
    EM410X_DEFAULT_CLOCK, EM410X_HEADER, EM410X_ID_BITS, T55XX_MAX_BLOCK, t5555, t55x7,
};
use crate::error::EncodeError;
use crate::modulation::push_field_clock;

/// Target chip of a clone operation.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Chip {
    /// Atmel T5557/T5567/T5577 and compatibles.
    T55x7,
    /// Q5 / T5555.
    Q5,
}

/// Modulation selected by a configuration word.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Modulation {
    Direct,
    Psk1,
    Psk2,
    Psk3,
    Fsk1,
    Fsk2,
    Fsk1a,
    Fsk2a,
    Manchester,
    Biphase,
    Diphase,
}

/// Block 0 of a T55x7 or Q5: data rate, modulation and last transmitted block.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct ConfigWord {
    /// Chip family, which decides the bit layout.
    pub chip: Chip,
    /// Data rate in field clocks per bit (RF/n).
    pub bit_rate: u8,
    /// Modulation.
    pub modulation: Modulation,
    /// Highest block the tag sends in regular read mode.
    pub max_block: u8,
}

impl ConfigWord {
    /// Builds the configuration word.
    ///
    /// # Errors
    /// - [`EncodeError::InvalidBitRate`] when the chip cannot run at `bit_rate`
    ///   (T55x7 knows eight rates; Q5 takes even rates from 2 to 128).
    /// - [`EncodeError::UnsupportedModulation`] for diphase on a Q5.
    /// - [`EncodeError::InvalidBlock`] when `max_block` exceeds 7.
    pub fn encode(&self) -> Result<u32, EncodeError> {
        if self.max_block > T55XX_MAX_BLOCK {
            return Err(EncodeError::InvalidBlock(self.max_block));
        }
        let max_block = self.max_block as u32;
        match self.chip {
            Chip::T55x7 => {
                let rate = t55x7::BIT_RATES
                    .iter()
                    .find(|(rate, _)| *rate == self.bit_rate)
                    .map(|(_, bits)| *bits)
                    .ok_or(EncodeError::InvalidBitRate(self.bit_rate))?;
                Ok(rate | self.t55x7_modulation() | max_block << t55x7::MAXBLOCK_SHIFT)
            }
            Chip::Q5 => {
                let rate = self.bit_rate;
                if rate < 2 || rate > t5555::MAX_BIT_RATE || rate % 2 != 0 {
                    return Err(EncodeError::InvalidBitRate(rate));
                }
                let rate = (((rate - 2) / 2) as u32) << t5555::BITRATE_SHIFT;
                Ok(rate | self.q5_modulation()? | max_block << t5555::MAXBLOCK_SHIFT)
            }
        }
    }

    fn t55x7_modulation(&self) -> u32 {
        use t55x7::*;
        match self.modulation {
            Modulation::Direct => MODULATION_DIRECT,
            Modulation::Psk1 => MODULATION_PSK1,
            Modulation::Psk2 => MODULATION_PSK2,
            Modulation::Psk3 => MODULATION_PSK3,
            Modulation::Fsk1 => MODULATION_FSK1,
            Modulation::Fsk2 => MODULATION_FSK2,
            Modulation::Fsk1a => MODULATION_FSK1A,
            Modulation::Fsk2a => MODULATION_FSK2A,
            Modulation::Manchester => MODULATION_MANCHESTER,
            Modulation::Biphase => MODULATION_BIPHASE,
            Modulation::Diphase => MODULATION_DIPHASE,
        }
    }

    fn q5_modulation(&self) -> Result<u32, EncodeError> {
        use t5555::*;
        Ok(match self.modulation {
            Modulation::Direct => MODULATION_DIRECT,
            Modulation::Psk1 => MODULATION_PSK1,
            Modulation::Psk2 => MODULATION_PSK2,
            Modulation::Psk3 => MODULATION_PSK3,
            Modulation::Fsk1 => MODULATION_FSK1,
            Modulation::Fsk2 => MODULATION_FSK2,
            Modulation::Fsk1a => MODULATION_FSK1 | INVERT_OUTPUT,
            Modulation::Fsk2a => MODULATION_FSK2 | INVERT_OUTPUT,
            Modulation::Manchester => MODULATION_MANCHESTER,
            Modulation::Biphase => MODULATION_BIPHASE,
            Modulation::Diphase => return Err(EncodeError::UnsupportedModulation),
        })
    }
}

/// Contents of a T55x7/Q5 page: block 0 (configuration) followed by data blocks.
///
/// Dereferences to `[u32]` indexed by block address.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct BlockImage {
    blocks: Vec<u32, 8>,
}

impl BlockImage {
    fn new(config: ConfigWord, data: &[u32]) -> Result<Self, EncodeError> {
        let mut blocks = Vec::new();
        blocks
            .push(config.encode()?)
            .map_err(|_| EncodeError::BufferFull)?;
        blocks
            .extend_from_slice(data)
            .map_err(|_| EncodeError::BufferFull)?;
        Ok(Self { blocks })
    }

    /// The configuration word.
    pub fn config(&self) -> u32 {
        self.blocks[0]
    }
}

impl Deref for BlockImage {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        &self.blocks
    }
}

/// A HID Prox identifier in three 32-bit limbs, most significant first.
#[derive(PartialEq, Eq, Clone, Copy, Default, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct HidId {
    /// Bits 64..96 (only the low 28 bits are transmitted).
    pub hi2: u32,
    /// Bits 32..64.
    pub hi: u32,
    /// Bits 0..32.
    pub lo: u32,
}

const HID_FILLER: (u8, usize) = (8, 1);
const HID_FC8: (u8, usize) = (8, 6);
const HID_FC10: (u8, usize) = (10, 5);

fn hid_symbol<const N: usize>(
    buf: &mut SampleBuffer<u8, N>,
    (fc, waves): (u8, usize),
) -> Result<(), EncodeError> {
    push_field_clock(buf, fc, waves).map(|_| ())
}

fn hid_bits<const N: usize>(
    buf: &mut SampleBuffer<u8, N>,
    value: u32,
    width: u32,
) -> Result<(), EncodeError> {
    for i in (0..width).rev() {
        if i % 4 == 3 {
            hid_symbol(buf, HID_FILLER)?;
        }
        let (first, second) = if (value >> i) & 1 == 1 {
            (HID_FC10, HID_FC8)
        } else {
            (HID_FC8, HID_FC10)
        };
        hid_symbol(buf, first)?;
        hid_symbol(buf, second)?;
    }
    Ok(())
}

/// Writes the FSK waveform of a HID Prox tag.
///
/// The frame starts with a filler and a start marker made of two symbol
/// pairs that are not valid Manchester. Identifiers with `hi2` set or `hi`
/// above 12 bits use the long layout (28 + 32 + 32 bits), the rest the
/// short one (12 + 32 bits).
pub fn encode_hid_waveform<const N: usize>(
    buf: &mut SampleBuffer<u8, N>,
    id: HidId,
) -> Result<usize, EncodeError> {
    if id.hi2 > 0x0FFF_FFFF {
        return Err(EncodeError::IdTooWide {
            format: "HID",
            max_bits: 92,
        });
    }
    let start = buf.len();

    hid_symbol(buf, HID_FILLER)?;
    for symbol in [
        HID_FC8, HID_FC8, HID_FC8, HID_FC10, HID_FC10, HID_FC10, HID_FC8, HID_FC10,
    ] {
        hid_symbol(buf, symbol)?;
    }

    if id.hi2 > 0 || id.hi > 0xFFF {
        hid_bits(buf, id.hi2, 28)?;
        hid_bits(buf, id.hi, 32)?;
    } else {
        hid_bits(buf, id.hi, 12)?;
    }
    hid_bits(buf, id.lo, 32)?;

    Ok(buf.len() - start)
}

/// Spreads 16 bits over 32, bit `1` becoming `10` and bit `0` becoming `01`.
fn manchester_u16(value: u32) -> u32 {
    (0..16).fold(0, |acc, p| acc | 1 << (2 * p + ((value >> p) & 1)))
}

/// Clone image of a HID Prox identifier (RF/50, FSK2a).
///
/// The short format holds 44 bits (`hi <= 0xFFF`), the long one 84
/// (`hi2 <= 0xFFFFF`). `preamble` fills the top byte of block 1.
pub fn hid_blocks(
    id: HidId,
    long_format: bool,
    preamble: u8,
    chip: Chip,
) -> Result<BlockImage, EncodeError> {
    let preamble = (preamble as u32) << 24;
    let data: Vec<u32, 7> = if long_format {
        if id.hi2 > 0xF_FFFF {
            return Err(EncodeError::IdTooWide {
                format: "HID long",
                max_bits: 84,
            });
        }
        Vec::from_slice(&[
            preamble | 0x0096_A900 | (manchester_u16((id.hi2 >> 16) & 0xF) & 0xFF),
            manchester_u16(id.hi2 & 0xFFFF),
            manchester_u16(id.hi >> 16),
            manchester_u16(id.hi & 0xFFFF),
            manchester_u16(id.lo >> 16),
            manchester_u16(id.lo & 0xFFFF),
        ])
    } else {
        if id.hi2 != 0 || id.hi > 0xFFF {
            return Err(EncodeError::IdTooWide {
                format: "HID",
                max_bits: 44,
            });
        }
        Vec::from_slice(&[
            preamble | (manchester_u16(id.hi) & 0x00FF_FFFF),
            manchester_u16(id.lo >> 16),
            manchester_u16(id.lo & 0xFFFF),
        ])
    }
    .map_err(|_| EncodeError::BufferFull)?;

    BlockImage::new(
        ConfigWord {
            chip,
            bit_rate: 50,
            modulation: Modulation::Fsk2a,
            max_block: data.len() as u8,
        },
        &data,
    )
}

/// Clone image of an EM410x identifier (Manchester).
///
/// `clock` is the data rate in field clocks; 0 selects RF/64.
pub fn em410x_blocks(id: u64, clock: u8, chip: Chip) -> Result<BlockImage, EncodeError> {
    if id >> EM410X_ID_BITS != 0 {
        return Err(EncodeError::IdTooWide {
            format: "EM410x",
            max_bits: EM410X_ID_BITS as u8,
        });
    }
    let clock = if clock == 0 { EM410X_DEFAULT_CLOCK } else { clock };

    let mut frame: u64 = EM410X_HEADER;
    let mut columns = [false; 4];
    for row in (0..EM410X_ID_BITS / 4).rev() {
        let nibble = (id >> (row * 4)) & 0xF;
        frame = frame << 4 | nibble;
        frame = frame << 1 | (nibble.count_ones() & 1) as u64;
        for (j, column) in columns.iter_mut().enumerate() {
            *column ^= (nibble >> (3 - j)) & 1 == 1;
        }
    }
    for column in columns {
        frame = frame << 1 | column as u64;
    }
    // stop bit
    frame <<= 1;

    debug!("em410x frame {:x}", frame);
    BlockImage::new(
        ConfigWord {
            chip,
            bit_rate: clock,
            modulation: Modulation::Manchester,
            max_block: 2,
        },
        &[(frame >> 32) as u32, frame as u32],
    )
}

/// Clone image of a 64-bit Indala identifier (RF/32, PSK1).
pub fn indala64_blocks(hi: u32, lo: u32, chip: Chip) -> Result<BlockImage, EncodeError> {
    BlockImage::new(
        ConfigWord {
            chip,
            bit_rate: 32,
            modulation: Modulation::Psk1,
            max_block: 2,
        },
        &[hi, lo],
    )
}

/// Clone image of a 224-bit Indala identifier (RF/32, PSK2).
pub fn indala224_blocks(uid: [u32; 7], chip: Chip) -> Result<BlockImage, EncodeError> {
    BlockImage::new(
        ConfigWord {
            chip,
            bit_rate: 32,
            modulation: Modulation::Psk2,
            max_block: 7,
        },
        &uid,
    )
}

/// Clone image of a Viking tag from its two raw data blocks (RF/32, Manchester).
pub fn viking_blocks(block1: u32, block2: u32, chip: Chip) -> Result<BlockImage, EncodeError> {
    BlockImage::new(
        ConfigWord {
            chip,
            bit_rate: 32,
            modulation: Modulation::Manchester,
            max_block: 2,
        },
        &[block1, block2],
    )
}

/// Clone image of an IO-Prox tag from its two raw data blocks (RF/64, FSK2a).
pub fn io_prox_blocks(hi: u32, lo: u32, chip: Chip) -> Result<BlockImage, EncodeError> {
    BlockImage::new(
        ConfigWord {
            chip,
            bit_rate: 64,
            modulation: Modulation::Fsk2a,
            max_block: 2,
        },
        &[hi, lo],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_t55x7_config_words() {
        assert_eq!(em410x_blocks(0, 0, Chip::T55x7).unwrap().config(), 0x0014_8040);
        assert_eq!(indala64_blocks(0, 0, Chip::T55x7).unwrap().config(), 0x0008_1040);
        assert_eq!(indala224_blocks([0; 7], Chip::T55x7).unwrap().config(), 0x0008_20E0);
        assert_eq!(io_prox_blocks(0, 0, Chip::T55x7).unwrap().config(), 0x0014_7040);
        assert_eq!(
            hid_blocks(HidId::default(), false, 0x1D, Chip::T55x7).unwrap().config(),
            0x0010_7060
        );
    }

    #[test]
    fn test_q5_config_words() {
        let viking = viking_blocks(1, 2, Chip::Q5).unwrap();
        assert_eq!(&viking[..], &[0x0000_F004, 1, 2]);

        let io = io_prox_blocks(0, 0, Chip::Q5).unwrap();
        assert_eq!(io.config(), (31 << 12) | 0x50 | 0x80 | (2 << 1));
    }

    #[test]
    fn test_config_word_rejects_what_the_chip_cannot_do() {
        let word = ConfigWord {
            chip: Chip::T55x7,
            bit_rate: 48,
            modulation: Modulation::Manchester,
            max_block: 2,
        };
        assert_eq!(word.encode(), Err(EncodeError::InvalidBitRate(48)));
        assert_eq!(
            ConfigWord { chip: Chip::Q5, bit_rate: 48, ..word }.encode(),
            Ok((23 << 12) | (2 << 1))
        );
        assert_eq!(
            ConfigWord { chip: Chip::Q5, bit_rate: 33, ..word }.encode(),
            Err(EncodeError::InvalidBitRate(33))
        );
        assert_eq!(
            ConfigWord { chip: Chip::Q5, modulation: Modulation::Diphase, ..word }.encode(),
            Err(EncodeError::UnsupportedModulation)
        );
        assert_eq!(
            ConfigWord { max_block: 8, ..word }.encode(),
            Err(EncodeError::InvalidBlock(8))
        );
    }

    #[test]
    fn test_em410x_zero_id_is_header_only() {
        let image = em410x_blocks(0, 0, Chip::T55x7).unwrap();
        assert_eq!(&image[1..], &[0xFF80_0000, 0x0000_0000]);
    }

    #[test]
    fn test_em410x_row_and_column_parity() {
        // Single id bit: MSB of the first row.
        let image = em410x_blocks(1 << 39, 0, Chip::T55x7).unwrap();
        let frame = (image[1] as u64) << 32 | image[2] as u64;
        let expected = EM410X_HEADER << 55 // header
            | 0b1000_1 << 50 // first row and its parity
            | 0b1000 << 1; // column parity, stop bit 0
        assert_eq!(frame, expected);
    }

    #[test]
    fn test_em410x_validation() {
        assert_eq!(
            em410x_blocks(1 << 40, 0, Chip::T55x7),
            Err(EncodeError::IdTooWide {
                format: "EM410x",
                max_bits: 40
            })
        );
        assert_eq!(
            em410x_blocks(0, 48, Chip::T55x7),
            Err(EncodeError::InvalidBitRate(48))
        );
        assert_eq!(em410x_blocks(0, 32, Chip::T55x7).unwrap().config(), 0x0008_8040);
    }

    #[test]
    fn test_hid_short_blocks() {
        let id = HidId {
            hi2: 0,
            hi: 0,
            lo: 0xFFFF_0000,
        };
        let image = hid_blocks(id, false, 0x1D, Chip::T55x7).unwrap();
        assert_eq!(
            &image[..],
            &[0x0010_7060, 0x1D55_5555, 0xAAAA_AAAA, 0x5555_5555]
        );
    }

    #[test]
    fn test_hid_long_blocks() {
        let id = HidId {
            hi2: 0x1_0000,
            hi: 0,
            lo: 0,
        };
        let image = hid_blocks(id, true, 0x1D, Chip::T55x7).unwrap();
        assert_eq!(image.len(), 7);
        assert_eq!(image[1], 0x1D96_A956);
        assert_eq!(image.config() >> 5 & 0x7, 6);
    }

    #[test]
    fn test_hid_width_validation() {
        let wide = HidId {
            hi2: 0,
            hi: 0x1000,
            lo: 0,
        };
        assert!(matches!(
            hid_blocks(wide, false, 0x1D, Chip::T55x7),
            Err(EncodeError::IdTooWide { max_bits: 44, .. })
        ));
        let wider = HidId {
            hi2: 0x10_0000,
            ..wide
        };
        assert!(matches!(
            hid_blocks(wider, true, 0x1D, Chip::T55x7),
            Err(EncodeError::IdTooWide { max_bits: 84, .. })
        ));
    }

    #[test]
    fn test_hid_waveform_lengths() {
        let mut buf: SampleBuffer<u8, 10_000> = SampleBuffer::new();
        let short = HidId {
            hi2: 0,
            hi: 0x800,
            lo: 0x0600_0001,
        };
        assert_eq!(encode_hid_waveform(&mut buf, short).unwrap(), 4800);
        // filler, then the first payload bit (a 1) starts with fc/10
        assert_eq!(&buf.as_slice()[400..408], &[1, 1, 1, 1, 0, 0, 0, 0]);
        assert_eq!(
            &buf.as_slice()[408..418],
            &[1, 1, 1, 1, 1, 0, 0, 0, 0, 0]
        );

        buf.clear();
        let long = HidId { hi2: 1, ..short };
        assert_eq!(encode_hid_waveform(&mut buf, long).unwrap(), 9600);
    }

    #[test]
    fn test_hid_waveform_rejects_wide_hi2() {
        let mut buf: SampleBuffer<u8, 16> = SampleBuffer::new();
        let id = HidId {
            hi2: 0x1000_0000,
            hi: 0,
            lo: 0,
        };
        assert!(encode_hid_waveform(&mut buf, id).is_err());
        assert!(buf.is_empty());
    }
}
