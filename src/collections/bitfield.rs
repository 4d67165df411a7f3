//! Sliding sequence-number window.
//!
//! A fixed-width bit vector that remembers which of the last `RANGE`
//! sequence numbers have been received from a neighbor. Bit 0 is always the
//! most recent sequence number (the reference position); higher bits are
//! older. Moving the reference forward shifts the whole window towards the
//! high end and drops whatever falls off it.
//!
//! # Sequence arithmetic
//!
//! Sequence numbers are 16 bit and wrap. Every comparison goes through
//! [`seq_diff`], which interprets `curr - last` as a signed 16-bit value.
//! A packet is therefore "newer" when it is at most 32767 numbers ahead of
//! the reference, regardless of wraparound.

/// Bits per storage word.
pub const WORD_BITS: usize = 32;

/// Signed distance from `last` to `curr` in the 16-bit sequence space.
///
/// Positive values mean `curr` is newer than `last`.
pub fn seq_diff(curr: u16, last: u16) -> i32 {
    curr.wrapping_sub(last) as i16 as i32
}

/// Window over the last `WORDS * 32` sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqWindow<const WORDS: usize> {
    words: [u32; WORDS],
}

/// The 64-entry window used for link-quality accounting.
pub type LinkWindow = SeqWindow<2>;

impl<const WORDS: usize> Default for SeqWindow<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const WORDS: usize> SeqWindow<WORDS> {
    /// Number of sequence numbers the window covers.
    pub const RANGE: i32 = (WORDS * WORD_BITS) as i32;

    /// Empty window.
    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Set the bit `bit` positions behind the reference.
    ///
    /// Offsets outside `0..RANGE` are too old (or invalid) and are ignored.
    pub fn mark(&mut self, bit: i32) {
        if bit < 0 || bit >= Self::RANGE {
            return;
        }
        let bit = bit as usize;
        self.words[bit / WORD_BITS] |= 1 << (bit % WORD_BITS);
    }

    /// Whether the bit `bit` positions behind the reference is set.
    pub fn is_set(&self, bit: i32) -> bool {
        if bit < 0 || bit >= Self::RANGE {
            return false;
        }
        let bit = bit as usize;
        self.words[bit / WORD_BITS] & (1 << (bit % WORD_BITS)) != 0
    }

    /// Move the reference forward by `n` sequence numbers.
    ///
    /// Bits move towards the old end, crossing word boundaries in order.
    /// `n <= 0` leaves the window untouched; `n >= RANGE` empties it.
    pub fn shift(&mut self, n: i32) {
        if n <= 0 {
            return;
        }
        if n >= Self::RANGE {
            self.clear();
            return;
        }

        let n = n as usize;
        let word_num = n / WORD_BITS;
        let word_offset = n % WORD_BITS;

        // Walk from the oldest word down so sources are read before they are
        // overwritten.
        for i in (0..WORDS).rev() {
            if i < word_num {
                self.words[i] = 0;
                continue;
            }
            let src = i - word_num;
            let mut word = self.words[src] << word_offset;
            if word_offset != 0 && src > 0 {
                word |= self.words[src - 1] >> (WORD_BITS - word_offset);
            }
            self.words[i] = word;
        }
    }

    /// Clear every bit.
    pub fn clear(&mut self) {
        self.words = [0; WORDS];
    }

    /// Number of set bits, i.e. how many of the last `RANGE` sequence
    /// numbers were received.
    pub fn popcount(&self) -> u32 {
        let mut count = 0;
        for &word in &self.words {
            let mut w = word;
            // Kernighan: each iteration clears the lowest set bit.
            while w != 0 {
                w &= w - 1;
                count += 1;
            }
        }
        count
    }

    /// Classify a received sequence number by its distance from the
    /// current reference and update the window accordingly.
    ///
    /// Returns `true` when the packet is new (the reference moved or was
    /// reset), `false` when it is old but still inside the window. With
    /// `mark` unset the window is only moved, which is how competing
    /// neighbor records are kept aligned to the same reference.
    pub fn record(&mut self, seq_diff: i32, mark: bool) -> bool {
        if seq_diff <= 0 && seq_diff >= -Self::RANGE {
            if mark {
                self.mark(-seq_diff);
            }
            return false;
        }

        if seq_diff > Self::RANGE || seq_diff < -Self::RANGE {
            if seq_diff > Self::RANGE {
                tracing::trace!(gap = seq_diff, "large sequence gap, resetting window");
            } else {
                tracing::trace!(gap = seq_diff, "sender probably restarted, resetting window");
            }
            self.clear();
            if mark {
                self.mark(0);
            }
        } else {
            self.shift(seq_diff);
            if mark {
                self.mark(0);
            }
        }
        true
    }

    /// Whether `curr_seqno` was already received, given that the window's
    /// reference is `last_seqno`.
    pub fn bit_status(&self, last_seqno: u16, curr_seqno: u16) -> bool {
        let diff = seq_diff(last_seqno, curr_seqno);
        if diff < 0 || diff >= Self::RANGE {
            return false;
        }
        self.is_set(diff)
    }
}
