//! Fixed-capacity sample storage.
//!
//! A [`SampleBuffer`] is the explicit context every waveform producer and
//! acquisition writes into. It is sized at compile time and borrowed mutably by
//! exactly one operation at a time, so two operations can never interleave their
//! samples.

use heapless::Vec;

use crate::error::EncodeError;

/// Ordered samples with a compile-time capacity of `N`.
///
/// `T` is `u8` for generated waveforms (levels 0/1) and raw ADC captures, and
/// `i8` for the ±1 comparator stream of TI tags.
#[derive(Debug, Clone)]
pub struct SampleBuffer<T, const N: usize> {
    samples: Vec<T, N>,
}

impl<T: Copy + Default, const N: usize> SampleBuffer<T, N> {
    /// Creates an empty buffer.
    pub const fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    /// Total number of samples the buffer can hold.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if no samples are held.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drops every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// The held samples, oldest first.
    pub fn as_slice(&self) -> &[T] {
        &self.samples
    }

    /// The held samples, mutable.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.samples
    }

    /// Appends one sample.
    pub fn push(&mut self, sample: T) -> Result<(), EncodeError> {
        self.samples.push(sample).map_err(|_| EncodeError::BufferFull)
    }

    /// Appends `count` copies of `sample`.
    ///
    /// Either all samples are appended or none are.
    pub fn push_run(&mut self, sample: T, count: usize) -> Result<(), EncodeError> {
        if self.samples.len() + count > N {
            return Err(EncodeError::BufferFull);
        }
        for _ in 0..count {
            self.samples.push(sample).map_err(|_| EncodeError::BufferFull)?;
        }
        Ok(())
    }

    /// Clears the buffer, then lets `fill` write up to `max` samples into it.
    ///
    /// `fill` returns how many samples it produced; the buffer keeps exactly that many.
    pub fn refill<E>(
        &mut self,
        max: usize,
        fill: impl FnOnce(&mut [T]) -> Result<usize, E>,
    ) -> Result<usize, E> {
        let max = max.min(N);
        self.samples.clear();
        // `max <= N`, so the resize cannot fail.
        let _ = self.samples.resize(max, T::default());
        match fill(&mut self.samples) {
            Ok(n) => {
                self.samples.truncate(n.min(max));
                Ok(self.samples.len())
            }
            Err(e) => {
                self.samples.clear();
                Err(e)
            }
        }
    }
}

impl<T: Copy + Default, const N: usize> Default for SampleBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
