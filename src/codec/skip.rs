//! Multi-level skip lists over the doc stream.
//!
//! One skip entry is buffered per completed 128-doc block; level L receives
//! an entry every `SKIP_INTERVAL^L` blocks, so each level is strictly
//! sparser than the one below it. Entries are delta-encoded against the
//! previous entry of the *same* level, which lets a level's chain be read
//! without reconstructing lower levels. Entries above level 0 additionally
//! carry an absolute offset into the child level so the reader can drop
//! down mid-chain.
//!
//! On-stream layout, appended to the doc stream after a term's postings:
//!
//! ```text
//! [u8 level count] then per level, highest first: [vlong len][entries]
//! ```

use crate::codec::{BLOCK_SIZE, MAX_SKIP_LEVELS, NO_MORE_DOCS, SKIP_INTERVAL};
use crate::error::Result;
use crate::store::{IndexInput, IndexOutput, encode_varint, encode_varint_u64};

/// Everything a skip entry snapshots about one block boundary.
#[derive(Debug, Clone, Copy, Default)]
struct SkipState {
    doc: u32,
    doc_fp: u64,
    pos_fp: u64,
    pay_fp: u64,
    pos_buffer_upto: u32,
    payload_byte_upto: u32,
    /// Byte offset into the child level's data, absolute from that level's
    /// start. Meaningless at level 0.
    child_ptr: u64,
}

struct LevelBuf {
    buf: Vec<u8>,
    last: SkipState,
}

/// Accumulates skip entries for one term and serializes them.
pub struct SkipWriter {
    levels: Vec<LevelBuf>,
    block_count: u64,
    has_positions: bool,
    has_payloads: bool,
    has_offsets: bool,
    base: SkipState,
}

impl SkipWriter {
    pub fn new() -> Self {
        Self {
            levels: Vec::new(),
            block_count: 0,
            has_positions: false,
            has_payloads: false,
            has_offsets: false,
            base: SkipState::default(),
        }
    }

    /// Set per-field capability flags; entry shape depends on them.
    pub fn set_field(&mut self, has_positions: bool, has_payloads: bool, has_offsets: bool) {
        self.has_positions = has_positions;
        self.has_payloads = has_payloads;
        self.has_offsets = has_offsets;
    }

    /// Start a new term. Deltas of the first entry on every level are taken
    /// against the term's stream start pointers.
    pub fn reset(&mut self, doc_fp: u64, pos_fp: u64, pay_fp: u64) {
        self.levels.clear();
        self.block_count = 0;
        self.base = SkipState {
            doc_fp,
            pos_fp,
            pay_fp,
            ..SkipState::default()
        };
    }

    /// Record one completed doc block. `doc` is the last doc id of the
    /// block; the file pointers are the stream positions where the *next*
    /// block starts.
    #[allow(clippy::too_many_arguments)]
    pub fn buffer_skip(
        &mut self,
        doc: u32,
        doc_fp: u64,
        pos_fp: u64,
        pay_fp: u64,
        pos_buffer_upto: u32,
        payload_byte_upto: u32,
    ) {
        self.block_count += 1;
        let state = SkipState {
            doc,
            doc_fp,
            pos_fp,
            pay_fp,
            pos_buffer_upto,
            payload_byte_upto,
            child_ptr: 0,
        };
        self.append(0, state);
        let mut interval = SKIP_INTERVAL;
        let mut level = 1;
        while level < MAX_SKIP_LEVELS && self.block_count.is_multiple_of(interval) {
            self.append(level, state);
            interval *= SKIP_INTERVAL;
            level += 1;
        }
    }

    fn append(&mut self, level: usize, state: SkipState) {
        let child_len = if level > 0 {
            self.levels[level - 1].buf.len() as u64
        } else {
            0
        };
        if self.levels.len() <= level {
            self.levels.push(LevelBuf {
                buf: Vec::new(),
                last: self.base,
            });
        }
        let has_positions = self.has_positions;
        let has_payloads = self.has_payloads;
        let has_offsets = self.has_offsets;
        let lb = &mut self.levels[level];
        encode_varint(state.doc - lb.last.doc, &mut lb.buf);
        encode_varint_u64(state.doc_fp - lb.last.doc_fp, &mut lb.buf);
        if has_positions {
            encode_varint_u64(state.pos_fp - lb.last.pos_fp, &mut lb.buf);
            encode_varint(state.pos_buffer_upto, &mut lb.buf);
            if has_payloads {
                encode_varint(state.payload_byte_upto, &mut lb.buf);
            }
            if has_payloads || has_offsets {
                encode_varint_u64(state.pay_fp - lb.last.pay_fp, &mut lb.buf);
            }
        }
        if level > 0 {
            encode_varint_u64(child_len, &mut lb.buf);
        }
        lb.last = state;
    }

    /// Serialize all buffered levels, highest first. Returns the file
    /// pointer where the skip data starts.
    pub fn write_skip(&mut self, out: &mut IndexOutput) -> Result<u64> {
        let start = out.file_pointer();
        out.write_u8(self.levels.len() as u8)?;
        for lb in self.levels.iter().rev() {
            out.write_vlong(lb.buf.len() as u64)?;
            out.write_bytes(&lb.buf)?;
        }
        Ok(start)
    }
}

impl Default for SkipWriter {
    fn default() -> Self {
        Self::new()
    }
}

struct LevelReader {
    input: IndexInput,
    start: u64,
    end: u64,
    /// State after the read-ahead entry (valid when `has_next`).
    read: SkipState,
    /// State at the last consumed entry: the caller's resumption point.
    consumed: SkipState,
    has_next: bool,
    /// Docs represented by consumed entries at this level. Overwritten
    /// with the parent's count when the parent seeks this level, so it is
    /// always the absolute ordinal of this level's resumption boundary.
    num_skipped: u64,
}

impl LevelReader {
    fn load_next(&mut self, has_positions: bool, has_payloads: bool, has_offsets: bool, level: usize) -> Result<()> {
        if self.input.position() >= self.end {
            self.has_next = false;
            return Ok(());
        }
        self.read.doc += self.input.read_vint()?;
        self.read.doc_fp += self.input.read_vlong()?;
        if has_positions {
            self.read.pos_fp += self.input.read_vlong()?;
            self.read.pos_buffer_upto = self.input.read_vint()?;
            if has_payloads {
                self.read.payload_byte_upto = self.input.read_vint()?;
            }
            if has_payloads || has_offsets {
                self.read.pay_fp += self.input.read_vlong()?;
            }
        }
        if level > 0 {
            self.read.child_ptr = self.input.read_vlong()?;
        }
        self.has_next = true;
        Ok(())
    }
}

/// Walks a term's skip data to find the last block boundary before a target
/// doc id.
pub struct SkipReader {
    levels: Vec<LevelReader>,
    has_positions: bool,
    has_payloads: bool,
    has_offsets: bool,
}

impl SkipReader {
    pub fn new(has_positions: bool, has_payloads: bool, has_offsets: bool) -> Self {
        Self {
            levels: Vec::new(),
            has_positions,
            has_payloads,
            has_offsets,
        }
    }

    /// Position on a term's skip data. `input` must be a clone of the doc
    /// stream; base pointers seed the delta chains exactly as the writer's
    /// `reset` did.
    pub fn init(
        &mut self,
        mut input: IndexInput,
        skip_fp: u64,
        doc_base_fp: u64,
        pos_base_fp: u64,
        pay_base_fp: u64,
        doc_freq: u32,
    ) -> Result<()> {
        debug_assert!(doc_freq as usize > BLOCK_SIZE);
        self.levels.clear();
        input.seek(skip_fp);
        let num_levels = input.read_u8()? as usize;
        // Levels are stored highest first; figure out each level's extent.
        let mut extents = Vec::with_capacity(num_levels);
        for _ in 0..num_levels {
            let len = input.read_vlong()?;
            let start = input.position();
            extents.push((start, start + len));
            input.skip(len);
        }
        let base = SkipState {
            doc: 0,
            doc_fp: doc_base_fp,
            pos_fp: pos_base_fp,
            pay_fp: pay_base_fp,
            pos_buffer_upto: 0,
            payload_byte_upto: 0,
            child_ptr: 0,
        };
        // Reverse so index 0 is the lowest level.
        for (level, &(start, end)) in extents.iter().rev().enumerate() {
            let mut cursor = input.clone();
            cursor.seek(start);
            let mut lr = LevelReader {
                input: cursor,
                start,
                end,
                read: base,
                consumed: base,
                has_next: false,
                num_skipped: 0,
            };
            lr.load_next(self.has_positions, self.has_payloads, self.has_offsets, level)?;
            self.levels.push(lr);
        }
        Ok(())
    }

    /// Advance past every skip point whose doc id is strictly below
    /// `target`, descending levels as they run out of useful entries.
    ///
    /// Returns the number of documents skipped past minus one (the caller
    /// adds one to get the resumption ordinal), or −1 when no skip point
    /// applied. Targets must be monotonically increasing across calls.
    pub fn skip_to(&mut self, target: u32) -> Result<i64> {
        let top = self.levels.len() - 1;
        for level in (0..=top).rev() {
            let mut advanced = false;
            loop {
                let lr = &self.levels[level];
                if !lr.has_next || lr.read.doc >= target {
                    break;
                }
                self.consume(level)?;
                advanced = true;
            }
            if level > 0 && advanced {
                self.seek_child(level)?;
            }
        }
        Ok(self.levels[0].num_skipped as i64 - 1)
    }

    fn consume(&mut self, level: usize) -> Result<()> {
        let lr = &mut self.levels[level];
        lr.consumed = lr.read;
        lr.num_skipped += BLOCK_SIZE as u64 * SKIP_INTERVAL.pow(level as u32);
        lr.load_next(self.has_positions, self.has_payloads, self.has_offsets, level)
    }

    fn seek_child(&mut self, level: usize) -> Result<()> {
        let parent_state = self.levels[level].consumed;
        let parent_skipped = self.levels[level].num_skipped;
        let child = &mut self.levels[level - 1];
        child.input.seek(child.start + parent_state.child_ptr);
        // The child's entry at this boundary snapshots the same block as
        // the parent entry, so the parent's consumed state seeds both the
        // delta chain and the resumption point.
        child.read = parent_state;
        child.consumed = parent_state;
        child.num_skipped = parent_skipped;
        child.load_next(self.has_positions, self.has_payloads, self.has_offsets, level - 1)
    }

    /// Doc id of the next unconsumed level-0 skip point, or `NO_MORE_DOCS`.
    pub fn next_skip_doc(&self) -> u32 {
        let lr = &self.levels[0];
        if lr.has_next { lr.read.doc } else { NO_MORE_DOCS }
    }

    pub fn doc(&self) -> u32 {
        self.levels[0].consumed.doc
    }

    pub fn doc_fp(&self) -> u64 {
        self.levels[0].consumed.doc_fp
    }

    pub fn pos_fp(&self) -> u64 {
        self.levels[0].consumed.pos_fp
    }

    pub fn pay_fp(&self) -> u64 {
        self.levels[0].consumed.pay_fp
    }

    pub fn pos_buffer_upto(&self) -> u32 {
        self.levels[0].consumed.pos_buffer_upto
    }

    pub fn payload_byte_upto(&self) -> u32 {
        self.levels[0].consumed.payload_byte_upto
    }
}
