//! Container primitives used by the routing core
//!
//! - [`bitfield`]: sliding sequence-number windows for link-quality counting
//! - [`hash`]: chained hash table that tolerates removal during iteration
//! - [`ring`]: small ring buffer averaging recent TQ samples

pub mod bitfield;
pub mod hash;
pub mod ring;

pub use bitfield::{seq_diff, LinkWindow, SeqWindow};
pub use hash::{BucketKey, Cursor, Duplicate, HashTable};
pub use ring::QualityRing;
