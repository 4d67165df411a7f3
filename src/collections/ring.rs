//! Fixed-size ring of recent transmission-quality samples.

/// Number of samples kept per neighbor.
pub const TQ_RING_SIZE: usize = 10;

/// Ring buffer of the last [`TQ_RING_SIZE`] TQ values received from a
/// neighbor.
///
/// Empty slots hold zero and are ignored by [`QualityRing::average`], so a
/// freshly created ring averages only the samples seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QualityRing {
    samples: [u8; TQ_RING_SIZE],
    next: usize,
}

impl QualityRing {
    /// Empty ring.
    pub const fn new() -> Self {
        Self {
            samples: [0; TQ_RING_SIZE],
            next: 0,
        }
    }

    /// Overwrite the oldest sample.
    pub fn push(&mut self, tq: u8) {
        self.samples[self.next] = tq;
        self.next = (self.next + 1) % TQ_RING_SIZE;
    }

    /// Mean of the non-zero samples, or zero when there are none.
    pub fn average(&self) -> u8 {
        let (sum, count) = self
            .samples
            .iter()
            .filter(|&&tq| tq != 0)
            .fold((0u32, 0u32), |(sum, count), &tq| (sum + tq as u32, count + 1));
        if count == 0 {
            0
        } else {
            (sum / count) as u8
        }
    }
}
