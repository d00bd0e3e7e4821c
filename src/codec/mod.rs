//! Block-compressed postings codec.
//!
//! Postings for each term are split across up to three streams:
//!
//! - `terms.doc` — doc-id deltas and term frequencies
//! - `terms.pos` — position deltas (plus inline payload/offset data in
//!   vInt tails)
//! - `terms.pay` — payload bytes and offset blocks for full blocks
//!
//! Runs of 128 integers are bit-packed ([`block`]); trailing partial runs
//! fall back to vInt encoding. Per-term skip lists ([`skip`]) allow seeking
//! to a target doc id without decoding every block, and the term dictionary
//! ([`dict`]) maps terms to their [`BlockTermState`] metadata.

pub mod block;
pub mod dict;
pub mod reader;
pub mod skip;
pub mod term_state;
pub mod writer;

pub use reader::{Postings, PostingsFlags, SegmentPostingsReader};
pub use term_state::BlockTermState;
pub use writer::PostingsWriter;

use serde::{Deserialize, Serialize};

/// Number of integers per packed block.
pub const BLOCK_SIZE: usize = 128;

/// A level-L skip entry is recorded every `SKIP_INTERVAL^L` doc blocks.
pub const SKIP_INTERVAL: u64 = 8;

/// Upper bound on skip levels; in practice df caps the useful depth long
/// before this.
pub const MAX_SKIP_LEVELS: usize = 10;

/// Terms per dictionary block; the first entry of each block carries
/// absolute metadata, the rest are delta-encoded.
pub const TERM_DICT_BLOCK_SIZE: usize = 64;

/// Sentinel returned by enumerators once the posting list is exhausted.
pub const NO_MORE_DOCS: u32 = u32::MAX;

/// What a field records in its postings, from cheapest to fullest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default, Hash,
)]
pub enum IndexOptions {
    /// Doc ids only; term frequency is reported as 1.
    Docs,
    #[default]
    DocsAndFreqs,
    DocsAndFreqsAndPositions,
    DocsAndFreqsAndPositionsAndOffsets,
}

impl IndexOptions {
    #[inline]
    pub fn has_freqs(self) -> bool {
        self >= IndexOptions::DocsAndFreqs
    }

    #[inline]
    pub fn has_positions(self) -> bool {
        self >= IndexOptions::DocsAndFreqsAndPositions
    }

    #[inline]
    pub fn has_offsets(self) -> bool {
        self >= IndexOptions::DocsAndFreqsAndPositionsAndOffsets
    }
}

/// Capability flags for one field, consulted by the codec instead of any
/// per-field type dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FieldCaps {
    pub options: IndexOptions,
    pub payloads: bool,
}

impl FieldCaps {
    pub fn new(options: IndexOptions, payloads: bool) -> Self {
        // Payloads ride on positions; a field without positions cannot carry them.
        debug_assert!(!payloads || options.has_positions());
        Self { options, payloads }
    }

    #[inline]
    pub fn has_freqs(&self) -> bool {
        self.options.has_freqs()
    }

    #[inline]
    pub fn has_positions(&self) -> bool {
        self.options.has_positions()
    }

    #[inline]
    pub fn has_offsets(&self) -> bool {
        self.options.has_offsets()
    }

    /// True when the field writes to the `pay` stream at all.
    #[inline]
    pub fn has_pay_stream(&self) -> bool {
        self.payloads || self.has_offsets()
    }
}
