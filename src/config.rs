//! Reader configuration and protocol timing tables.
//!
//! [`LfConfig`] is handed to [`LfDriver::new`](crate::driver::LfDriver::new)
//! and validated there. The timing tables default to values that sit inside
//! the datasheet windows of every supported chip; custom tables are checked
//! against those windows, since a write outside them fails silently on the tag.

use libm::round;

use crate::consts::{DIVISOR_125KHZ, FIELD_CLOCK_US, FRONT_END_CLOCK_HZ};

/// An inclusive datasheet window in microseconds.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct Window {
    /// Shortest accepted duration.
    pub min_us: u32,
    /// Longest accepted duration.
    pub max_us: u32,
}

impl Window {
    const fn cycles(min: u32, max: u32) -> Self {
        Self {
            min_us: min * FIELD_CLOCK_US,
            max_us: max * FIELD_CLOCK_US,
        }
    }

    /// True if `us` lies inside the window.
    pub const fn contains(&self, us: u32) -> bool {
        us >= self.min_us && us <= self.max_us
    }
}

/// T55xx/Q5 downlink timings, in microseconds.
///
/// A bit is sent as a field-on period whose length selects the value
/// (`write_0` or `write_1`) followed by a `write_gap` of field off.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct T55xxTiming {
    /// Field-off gap that opens every command (the tag must have been
    /// powered for at least 3 ms).
    pub start_gap: u32,
    /// Field-off gap after every bit.
    pub write_gap: u32,
    /// Field-on period encoding a `0`.
    pub write_0: u32,
    /// Field-on period encoding a `1`.
    pub write_1: u32,
    /// Field-on settle before capturing the reply to a reset.
    pub read_gap: u32,
    /// Field-on settle before capturing the reply to a block read.
    pub read_settle: u32,
    /// Field-on window in which the tag programs a block.
    pub program_window: u32,
    /// Program window for test-mode writes.
    pub test_mode_window: u32,
    /// Field-on hold after a wake-up so the tag starts repeating its data.
    pub wake_hold: u32,
}

impl T55xxTiming {
    /// Start-gap window shared by T5577, T5557 and Q5.
    pub const START_GAP_WINDOW: Window = Window::cycles(8, 50);
    /// Write-gap window (normal mode).
    pub const WRITE_GAP_WINDOW: Window = Window::cycles(8, 20);
    /// Write-0 window (normal mode).
    pub const WRITE_0_WINDOW: Window = Window::cycles(16, 32);
    /// Write-1 window (normal mode).
    pub const WRITE_1_WINDOW: Window = Window::cycles(48, 64);

    /// Returns the name and value of the first entry outside its window.
    pub fn out_of_window(&self) -> Option<(&'static str, u32)> {
        [
            ("start_gap", self.start_gap, Self::START_GAP_WINDOW),
            ("write_gap", self.write_gap, Self::WRITE_GAP_WINDOW),
            ("write_0", self.write_0, Self::WRITE_0_WINDOW),
            ("write_1", self.write_1, Self::WRITE_1_WINDOW),
        ]
        .into_iter()
        .find(|(_, value, window)| !window.contains(*value))
        .map(|(name, value, _)| (name, value))
    }
}

impl Default for T55xxTiming {
    fn default() -> Self {
        // Short write periods and long gaps compensate for antenna fall time.
        Self {
            start_gap: 31 * FIELD_CLOCK_US,
            write_gap: 20 * FIELD_CLOCK_US,
            write_0: 18 * FIELD_CLOCK_US,
            write_1: 50 * FIELD_CLOCK_US,
            read_gap: 15 * FIELD_CLOCK_US,
            read_settle: 210 * FIELD_CLOCK_US,
            program_window: 20_000,
            test_mode_window: 5_184,
            wake_hold: 20_000,
        }
    }
}

/// EM4x05 forward-link timings, in microseconds.
///
/// A `1` is a plain field-on period; a `0` is a field-off pulse followed by
/// field on. The first bit of every frame is replaced by a longer start gap.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct ForwardLinkTiming {
    /// Field-off start gap (EM4305 needs it longer than EM4469).
    pub start_gap: u32,
    /// Field-on period that ends the start gap and every `0`.
    pub field_on: u32,
    /// Field-off pulse of a `0`.
    pub write_0_off: u32,
    /// Field-on period of a `1`.
    pub write_1: u32,
    /// Wait after a login frame.
    pub login_settle: u32,
    /// Wait between a read frame and the capture.
    pub read_settle: u32,
    /// Wait between a write/protect frame and the capture.
    pub write_settle: u32,
}

impl Default for ForwardLinkTiming {
    fn default() -> Self {
        Self {
            start_gap: 55 * FIELD_CLOCK_US,
            field_on: 18 * FIELD_CLOCK_US,
            write_0_off: 23 * FIELD_CLOCK_US,
            write_1: 32 * FIELD_CLOCK_US,
            login_settle: 20_000,
            read_settle: 400,
            write_settle: 6_500,
        }
    }
}

/// Reader-wide settings.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct LfConfig {
    /// Carrier divisor for 125 kHz operations.
    pub divisor: u8,
    /// Trigger threshold for untimed acquisitions; 0 captures immediately.
    pub trigger_threshold: u8,
    /// T55xx/Q5 downlink timing.
    pub t55xx: T55xxTiming,
    /// EM4x05 forward-link timing.
    pub forward_link: ForwardLinkTiming,
}

impl Default for LfConfig {
    fn default() -> Self {
        Self {
            divisor: DIVISOR_125KHZ,
            trigger_threshold: 0,
            t55xx: T55xxTiming::default(),
            forward_link: ForwardLinkTiming::default(),
        }
    }
}

/// Divisor that brings the carrier closest to `carrier_hz`.
pub fn divisor_for(carrier_hz: u32) -> u8 {
    let ratio = round(FRONT_END_CLOCK_HZ as f64 / carrier_hz.max(1) as f64);
    (ratio as u32).saturating_sub(1).min(u8::MAX as u32) as u8
}

/// Carrier frequency produced by `divisor`, in Hz.
pub const fn carrier_hz(divisor: u8) -> u32 {
    FRONT_END_CLOCK_HZ / (divisor as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{DIVISOR_COTAG, DIVISOR_TI};

    #[test]
    fn test_default_t55xx_timing_is_inside_datasheet_windows() {
        assert_eq!(T55xxTiming::default().out_of_window(), None);
    }

    #[test]
    fn test_out_of_window_reports_first_offender() {
        let timing = T55xxTiming {
            write_1: 70 * 8,
            ..T55xxTiming::default()
        };
        assert_eq!(timing.out_of_window(), Some(("write_1", 560)));
    }

    #[test]
    fn test_divisor_for_125khz() {
        assert_eq!(divisor_for(125_000), DIVISOR_125KHZ);
        assert_eq!(carrier_hz(DIVISOR_125KHZ), 125_000);
    }

    #[test]
    fn test_divisor_for_134khz() {
        assert_eq!(divisor_for(134_200), DIVISOR_TI);
        assert_eq!(carrier_hz(DIVISOR_COTAG), 133_333);
    }
}
