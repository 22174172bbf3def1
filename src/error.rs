//! Error types.
//!
//! [`EncodeError`] covers everything that can go wrong while shaping bits and
//! waveforms, before any hardware is touched. [`Error`] wraps it together with
//! the failures of a live operation; `E` is the [`Antenna`](crate::hal::Antenna)
//! driver's own error type.
//!
//! Decode failures are not errors here: demodulators return `None` and
//! integrity mismatches are reported as flags on the decoded value.

use core::fmt::Debug;
use thiserror::Error;

/// Failures while building waveforms, frames or block images.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum EncodeError {
    /// The identifier has bits set beyond the format's capacity.
    #[error("{format} identifiers hold at most {max_bits} bits")]
    IdTooWide {
        /// Name of the card format.
        format: &'static str,
        /// Capacity of the format in bits.
        max_bits: u8,
    },
    /// A clock, field clock or carrier length that cannot produce a waveform.
    #[error("invalid clock length {0}")]
    InvalidClock(u8),
    /// The chip cannot be configured for this data rate.
    #[error("unsupported bit rate RF/{0}")]
    InvalidBitRate(u8),
    /// The chip has no encoding for the requested modulation.
    #[error("modulation not available on this chip")]
    UnsupportedModulation,
    /// A block address outside the tag's memory map.
    #[error("block {0} is out of range")]
    InvalidBlock(u8),
    /// The sample buffer or frame has no room for the requested output.
    #[error("buffer full")]
    BufferFull,
}

/// Failures of a driver operation.
#[derive(Debug, Error)]
pub enum Error<E: Debug> {
    /// Building the waveform or frame failed; nothing was transmitted.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// A bit-bang period is shorter than the field switch-over latency;
    /// the field is never turned on.
    #[error("period of {period_us} us is below the {min_us} us switch-over latency")]
    PeriodTooShort {
        /// Requested period.
        period_us: u32,
        /// Shortest period the front end can produce.
        min_us: u32,
    },
    /// A timing table entry lies outside the chip's datasheet window.
    #[error("{name} of {value_us} us is outside the datasheet window")]
    TimingOutOfWindow {
        /// Name of the timing entry.
        name: &'static str,
        /// Configured value.
        value_us: u32,
    },
    /// The antenna front end reported a fault.
    #[error("antenna driver fault: {0:?}")]
    Antenna(E),
    /// A GPIO line could not be read or driven.
    #[error("pin access failed")]
    Pin,
}
