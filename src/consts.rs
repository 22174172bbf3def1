//! Constants used across the LF codec and protocol implementations.
//!
//! This module gathers the fixed values every component agrees on:
//! carrier divisors, the T55x7 and Q5 configuration-word bit fields,
//! the EM4x05 forward-link command codes and the TI frame constants.
//!
//! ## Key Concepts
//!
//! - **Divisors**: the front end derives the carrier as `12 MHz / (divisor + 1)`.
//! - **Configuration words**: block 0 of a T55x7/Q5 selects bit rate, modulation
//!   and the highest block the tag transmits. The two chip families lay the word
//!   out differently; [`ConfigWord`](crate::cards::ConfigWord) is the only place
//!   that combines these bits.
//! - **Timing**: every protocol duration is in microseconds. One 125 kHz field
//!   clock lasts 8 µs, so many values are written as `cycles * 8`.

/// Front-end clock from which the carrier divisor is derived (Hz).
pub const FRONT_END_CLOCK_HZ: u32 = 12_000_000;

/// Divisor for a 125 kHz carrier.
pub const DIVISOR_125KHZ: u8 = 95;

/// Divisor for the 134.8 kHz carrier used to charge TI tags.
pub const DIVISOR_TI: u8 = 88;

/// Divisor for the ~132 kHz carrier that powers COTAG tags.
pub const DIVISOR_COTAG: u8 = 89;

/// Duration of one 125 kHz field clock in microseconds.
pub const FIELD_CLOCK_US: u32 = 8;

/// Time the field must be on before a T55xx accepts a start gap (ms).
pub const T55XX_POWER_UP_MS: u32 = 5;

/// Highest block address on page 0 of a T55x7/Q5.
pub const T55XX_MAX_BLOCK: u8 = 7;

/// T55x7 configuration word: modulation field (bits 12..=16).
pub mod t55x7 {
    /// Direct (NRZ) modulation.
    pub const MODULATION_DIRECT: u32 = 0x0000_0000;
    /// PSK1, phase change on data change.
    pub const MODULATION_PSK1: u32 = 0x0000_1000;
    /// PSK2, phase change on bit 1.
    pub const MODULATION_PSK2: u32 = 0x0000_2000;
    /// PSK3, phase change on rising edge.
    pub const MODULATION_PSK3: u32 = 0x0000_3000;
    /// FSK1, fc/8 and fc/5.
    pub const MODULATION_FSK1: u32 = 0x0000_4000;
    /// FSK2, fc/8 and fc/10.
    pub const MODULATION_FSK2: u32 = 0x0000_5000;
    /// FSK1a, inverted FSK1.
    pub const MODULATION_FSK1A: u32 = 0x0000_6000;
    /// FSK2a, inverted FSK2.
    pub const MODULATION_FSK2A: u32 = 0x0000_7000;
    /// Manchester.
    pub const MODULATION_MANCHESTER: u32 = 0x0000_8000;
    /// Biphase.
    pub const MODULATION_BIPHASE: u32 = 0x0001_0000;
    /// Differential biphase.
    pub const MODULATION_DIPHASE: u32 = 0x0001_8000;
    /// Shift of the max-block field.
    pub const MAXBLOCK_SHIFT: u32 = 5;

    /// Bit-rate field (bits 18..=20), indexed by data rate in field clocks.
    pub const BIT_RATES: [(u8, u32); 8] = [
        (8, 0x0000_0000),
        (16, 0x0004_0000),
        (32, 0x0008_0000),
        (40, 0x000C_0000),
        (50, 0x0010_0000),
        (64, 0x0014_0000),
        (100, 0x0018_0000),
        (128, 0x001C_0000),
    ];
}

/// Q5 (T5555) configuration word fields.
pub mod t5555 {
    /// Manchester.
    pub const MODULATION_MANCHESTER: u32 = 0x0000_0000;
    /// PSK1.
    pub const MODULATION_PSK1: u32 = 0x0000_0010;
    /// PSK2.
    pub const MODULATION_PSK2: u32 = 0x0000_0020;
    /// PSK3.
    pub const MODULATION_PSK3: u32 = 0x0000_0030;
    /// FSK1.
    pub const MODULATION_FSK1: u32 = 0x0000_0040;
    /// FSK2.
    pub const MODULATION_FSK2: u32 = 0x0000_0050;
    /// Biphase.
    pub const MODULATION_BIPHASE: u32 = 0x0000_0060;
    /// Direct (NRZ).
    pub const MODULATION_DIRECT: u32 = 0x0000_0070;
    /// Inverts the modulated output; turns FSKx into FSKxa.
    pub const INVERT_OUTPUT: u32 = 0x0000_0080;
    /// Shift of the max-block field.
    pub const MAXBLOCK_SHIFT: u32 = 1;
    /// Shift of the bit-rate field, which stores `(rate - 2) / 2`.
    pub const BITRATE_SHIFT: u32 = 12;
    /// Highest data rate the 6-bit rate field can express.
    pub const MAX_BIT_RATE: u8 = 128;
}

/// EM4x05 forward-link command: login (already parity-extended and bit mirrored).
pub const EM4X05_CMD_LOGIN: u8 = 0xC;
/// EM4x05 forward-link command: write word.
pub const EM4X05_CMD_WRITE: u8 = 0xA;
/// EM4x05 forward-link command: read word.
pub const EM4X05_CMD_READ: u8 = 0x9;
/// EM4x05 forward-link command: protect.
pub const EM4X05_CMD_PROTECT: u8 = 0x3;

/// Capacity of one forward-link frame in bits.
pub const EM4X05_FRAME_BITS: usize = 64;

/// Nine-bit EM410x header of consecutive ones.
pub const EM410X_HEADER: u64 = 0x1FF;
/// Width of an EM410x identifier.
pub const EM410X_ID_BITS: u32 = 40;
/// Data rate used for EM410x clones when the caller does not pick one.
pub const EM410X_DEFAULT_CLOCK: u8 = 64;

/// Rate at which the TI comparator output is sampled (Hz).
pub const TI_SAMPLE_HZ: u32 = 2_000_000;
/// TI tags send a `1` as 16 cycles of this frequency (Hz).
pub const TI_FREQ_LO_HZ: u32 = 123_200;
/// TI tags send a `0` as 16 cycles of this frequency (Hz).
pub const TI_FREQ_HI_HZ: u32 = 134_200;
/// Number of 32-bit comparator words captured for one TI response (< 20 ms at 2 MHz).
pub const TI_CAPTURE_WORDS: usize = 1250;
/// Number of ±1 samples a full TI capture unpacks to.
pub const TI_CAPTURE_SAMPLES: usize = TI_CAPTURE_WORDS * 32;
/// First byte of every TI write frame.
pub const TI_KEYWORD: u8 = 0xBB;
/// Second byte of every TI write frame.
pub const TI_PASSWORD: u8 = 0xEB;
/// Trailing "write frame" bytes, sent low byte first.
pub const TI_WRITE_FRAME: [u8; 2] = [0x00, 0x03];

/// Samples the COTAG raw mode captures.
pub const COTAG_RAW_SAMPLES: usize = 50_000;
