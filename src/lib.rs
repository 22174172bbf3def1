//! # lfprox
//!
//! A portable, no_std Rust engine for 125 kHz proximity cards: the physical-layer
//! codec that turns logical bits into antenna waveforms, and the bit-serial
//! protocols used to read, write and simulate low-frequency transponders.
//!
//! The crate is built on:
//! - `embedded-hal` traits for the modulation line, carrier clock and busy-wait delays
//! - an [`Antenna`](hal::Antenna) trait standing in for the FPGA front end
//!   (field on/off, carrier divisor, sample acquisition)
//! - fixed-capacity `heapless` storage, so every frame and waveform is sized up front
//!
//! ## Crate features
//! | Feature      | Description |
//! |--------------|-------------|
//! | `std`        | Disables `#![no_std]` and enables the `std` halves of the dependencies |
//! | `log`        | Emits diagnostics through the `log` facade |
//! | `defmt-0-3`  | Emits diagnostics through `defmt` |
//!
//! ## Supported tags
//!
//! - **Simulation** of FSK (HID, AWID, IO-Prox), ASK/Manchester/Biphase and PSK tags
//! - **Cloning** HID, EM410x, Indala 64/224, Viking and IO-Prox IDs onto T55x7 or Q5 blanks
//! - **T55xx/Q5** read, write, reset and wake
//! - **EM4205/4305/4469** login, read, write and protect
//! - **TI** 134.2 kHz read-only and read/write tags, including CRC16 verification
//! - **COTAG** wake sequence and raw capture
//! - **Scanning** HID, AWID, IO-Prox and EM410x cards through a pluggable [`Demodulator`](demod::Demodulator)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lfprox::buffer::SampleBuffer;
//! use lfprox::cards::{Chip, em410x_blocks};
//! use lfprox::config::LfConfig;
//! use lfprox::driver::LfDriver;
//!
//! let mut driver = LfDriver::new(antenna, delay, mod_pin, clk_pin, LfConfig::default())?;
//! let image = em410x_blocks(0x01_2345_6789, 0, Chip::T55x7)?;
//! driver.t55xx_write_blocks(&image, 0)?;
//!
//! let mut samples: SampleBuffer<u8, 12_000> = SampleBuffer::new();
//! driver.t55xx_read_block(&mut samples, false, Some(1), None)?;
//! ```
//!
//! ## Integration Notes
//!
//! - Every operation runs to completion on the calling thread and leaves the
//!   reader field off, whatever the outcome (T55xx wake is the one documented exception).
//! - Write protocols have no acknowledgment: confirm with a follow-up read.
//! - Timing precision matters; the delay provider should be a hardware tick counter.

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
#![cfg_attr(not(feature = "std"), no_std)]

pub use critical_section;
pub use heapless;

#[macro_use]
mod fmt;

pub mod buffer;
pub mod cards;
pub mod config;
pub mod consts;
pub mod cotag;
pub(crate) mod crc;
pub mod demod;
pub mod driver;
pub mod em4x05;
pub mod error;
pub mod hal;
pub mod modulation;
pub mod t55xx;
pub mod ti;

#[cfg(test)]
pub(crate) mod mock;
