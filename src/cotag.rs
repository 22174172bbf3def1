//! COTAG wake-up and capture.
//!
//! COTAG tags answer only after a fixed start sequence of reader bursts and
//! then send at a very slow rate. Bit recovery is left to the host; this module
//! wakes the tag and samples the answer in one of three ways.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::buffer::SampleBuffer;
use crate::consts::{COTAG_RAW_SAMPLES, DIVISOR_COTAG};
use crate::driver::LfDriver;
use crate::error::Error;
use crate::hal::{AcquireRequest, Antenna, SampleSource};

/// Field-off gap between wake bursts (µs).
const WAKE_GAP_US: u32 = 2035;
/// Wake burst lengths (µs); the last one runs straight into the capture.
const WAKE_BURSTS_US: [u32; 4] = [740, 3330, 740, 1000];

/// How the tag's answer is sampled.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum CotagMode {
    /// Peak-detected envelope, 50 000 samples.
    Raw,
    /// Envelope sliced to Manchester bits by the front end, full buffer.
    Manchester,
    /// Plain ADC capture with the configured trigger, full buffer.
    Config,
}

impl CotagMode {
    fn request(self, trigger_threshold: u8) -> (AcquireRequest, usize) {
        let request = |source| AcquireRequest {
            source,
            trigger_threshold: 0,
            cancel_after: 0,
        };
        match self {
            CotagMode::Raw => (request(SampleSource::CotagRaw), COTAG_RAW_SAMPLES),
            CotagMode::Manchester => (request(SampleSource::CotagManchester), usize::MAX),
            CotagMode::Config => (AcquireRequest::triggered(trigger_threshold, 0), usize::MAX),
        }
    }
}

impl<A, D, M, C> LfDriver<A, D, M, C>
where
    A: Antenna,
    D: DelayNs,
    M: OutputPin,
    C: InputPin,
{
    /// Wakes a COTAG tag and captures its answer into `buf`.
    ///
    /// The field runs at ~132 kHz; the wake sequence is bursts of 740, 3330
    /// and 740 µs, each followed by 2035 µs without field, and a final 1000 µs
    /// burst. Returns the number of samples captured, with the field off.
    pub fn cotag_read<const N: usize>(
        &mut self,
        buf: &mut SampleBuffer<u8, N>,
        mode: CotagMode,
    ) -> Result<usize, Error<A::Error>> {
        buf.clear();
        let (request, max) = mode.request(self.config().trigger_threshold);
        debug!("cotag wake-up");

        self.guarded(|d| {
            d.set_divisor(DIVISOR_COTAG)?;
            for (i, &burst) in WAKE_BURSTS_US.iter().enumerate() {
                d.field_on_for(burst)?;
                if i + 1 < WAKE_BURSTS_US.len() {
                    d.field_off_for(WAKE_GAP_US)?;
                }
            }

            let n = d.acquire(buf, max, request)?;
            d.field_off()?;
            Ok(n)
        })
    }
}
