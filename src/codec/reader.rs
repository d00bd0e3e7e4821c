//! Postings reader: enumerators over the doc/pos/pay streams.
//!
//! Three variants keep I/O proportional to what the caller asked for:
//!
//! - [`BlockDocsIterator`] decodes only the doc stream and can seek past
//!   frequency blocks without decoding them.
//! - [`BlockPostingsIterator`] adds positions, for fields that carry
//!   neither payloads nor offsets.
//! - [`BlockEverythingIterator`] adds payloads and offsets.
//!
//! All variants share the two-phase `advance`: a coarse jump through the
//! skip list to the right block, then a linear scan identical to repeated
//! `next_doc` calls.

use roaring::RoaringBitmap;
use std::path::Path;
use std::sync::Arc;

use crate::codec::block::{self, read_block};
use crate::codec::skip::SkipReader;
use crate::codec::writer::{DOC_CODEC, PAY_CODEC, POS_CODEC, POSTINGS_VERSION};
use crate::codec::{BLOCK_SIZE, BlockTermState, FieldCaps, NO_MORE_DOCS};
use crate::error::Result;
use crate::store::IndexInput;
use crate::store::format;

/// What the caller wants back from an enumerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PostingsFlags {
    pub freqs: bool,
    pub positions: bool,
    pub payloads: bool,
    pub offsets: bool,
}

impl PostingsFlags {
    pub const DOCS: Self = Self {
        freqs: false,
        positions: false,
        payloads: false,
        offsets: false,
    };
    pub const FREQS: Self = Self {
        freqs: true,
        ..Self::DOCS
    };
    pub const POSITIONS: Self = Self {
        freqs: true,
        positions: true,
        ..Self::DOCS
    };
    pub const ALL: Self = Self {
        freqs: true,
        positions: true,
        payloads: true,
        offsets: true,
    };
}

/// Open handles on one segment's postings streams.
///
/// Stream acquisition is all-or-nothing: any failure while opening drops
/// the handles acquired so far.
pub struct SegmentPostingsReader {
    doc_in: IndexInput,
    pos_in: Option<IndexInput>,
    pay_in: Option<IndexInput>,
}

impl SegmentPostingsReader {
    pub fn open(
        doc_path: &Path,
        pos_path: Option<&Path>,
        pay_path: Option<&Path>,
    ) -> Result<Self> {
        let mut doc_in = IndexInput::open(doc_path)?;
        format::check_header(&mut doc_in, DOC_CODEC, POSTINGS_VERSION, POSTINGS_VERSION)?;
        let pos_in = match pos_path {
            Some(p) => {
                let mut input = IndexInput::open(p)?;
                format::check_header(&mut input, POS_CODEC, POSTINGS_VERSION, POSTINGS_VERSION)?;
                Some(input)
            }
            None => None,
        };
        let pay_in = match pay_path {
            Some(p) => {
                let mut input = IndexInput::open(p)?;
                format::check_header(&mut input, PAY_CODEC, POSTINGS_VERSION, POSTINGS_VERSION)?;
                Some(input)
            }
            None => None,
        };
        Ok(Self {
            doc_in,
            pos_in,
            pay_in,
        })
    }

    /// Verify stored checksums over the full streams.
    pub fn check_integrity(&self) -> Result<()> {
        format::verify_footer(&mut self.doc_in.clone())?;
        if let Some(pos_in) = &self.pos_in {
            format::verify_footer(&mut pos_in.clone())?;
        }
        if let Some(pay_in) = &self.pay_in {
            format::verify_footer(&mut pay_in.clone())?;
        }
        Ok(())
    }

    /// Build the cheapest enumerator that can satisfy `flags` for a field
    /// with capabilities `caps`.
    pub fn postings(
        &self,
        caps: FieldCaps,
        state: &BlockTermState,
        flags: PostingsFlags,
        deleted: Option<Arc<RoaringBitmap>>,
    ) -> Result<Postings> {
        if !caps.has_positions() || !flags.positions {
            return Ok(Postings::Docs(BlockDocsIterator::new(
                self.doc_in.clone(),
                caps,
                state,
                flags.freqs,
                deleted,
            )));
        }
        let pos_in = self
            .pos_in
            .as_ref()
            .expect("field indexes positions but segment has no pos stream")
            .clone();
        if !caps.has_pay_stream() {
            return Ok(Postings::Positions(BlockPostingsIterator::new(
                self.doc_in.clone(),
                pos_in,
                caps,
                state,
                deleted,
            )));
        }
        let pay_in = self
            .pay_in
            .as_ref()
            .expect("field has payloads/offsets but segment has no pay stream")
            .clone();
        Ok(Postings::Everything(BlockEverythingIterator::new(
            self.doc_in.clone(),
            pos_in,
            pay_in,
            caps,
            state,
            deleted,
        )))
    }
}

/// Enumerator variant chosen by [`SegmentPostingsReader::postings`].
pub enum Postings {
    Docs(BlockDocsIterator),
    Positions(BlockPostingsIterator),
    Everything(BlockEverythingIterator),
}

impl Postings {
    pub fn doc(&self) -> u32 {
        match self {
            Postings::Docs(it) => it.doc(),
            Postings::Positions(it) => it.doc(),
            Postings::Everything(it) => it.doc(),
        }
    }

    pub fn freq(&self) -> u32 {
        match self {
            Postings::Docs(it) => it.freq(),
            Postings::Positions(it) => it.freq(),
            Postings::Everything(it) => it.freq(),
        }
    }

    pub fn next_doc(&mut self) -> Result<u32> {
        match self {
            Postings::Docs(it) => it.next_doc(),
            Postings::Positions(it) => it.next_doc(),
            Postings::Everything(it) => it.next_doc(),
        }
    }

    pub fn advance(&mut self, target: u32) -> Result<u32> {
        match self {
            Postings::Docs(it) => it.advance(target),
            Postings::Positions(it) => it.advance(target),
            Postings::Everything(it) => it.advance(target),
        }
    }

    /// Next position of the current document. Callers must not consume
    /// more than `freq()` positions per document.
    pub fn next_position(&mut self) -> Result<u32> {
        match self {
            Postings::Docs(_) => panic!("positions were not requested for this enumerator"),
            Postings::Positions(it) => it.next_position(),
            Postings::Everything(it) => it.next_position(),
        }
    }

    /// Payload of the last returned position; `None` when absent.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Postings::Everything(it) => it.payload(),
            _ => None,
        }
    }

    pub fn start_offset(&self) -> Option<u32> {
        match self {
            Postings::Everything(it) => it.start_offset(),
            _ => None,
        }
    }

    pub fn end_offset(&self) -> Option<u32> {
        match self {
            Postings::Everything(it) => it.end_offset(),
            _ => None,
        }
    }
}

/// Where a coarse skip landed; positions iterators reset their stream
/// cursors from this.
struct SkipResume {
    pos_fp: u64,
    pay_fp: u64,
    pos_buffer_upto: u32,
    payload_byte_upto: u32,
}

/// Doc-stream decoding shared by all three enumerator variants.
struct DocCursor {
    doc_in: IndexInput,
    caps: FieldCaps,
    /// Decode frequency blocks instead of seeking past them.
    needs_freq: bool,
    state: BlockTermState,

    delta_buffer: [u32; BLOCK_SIZE],
    freq_buffer: [u32; BLOCK_SIZE],
    buffered: usize,
    buffer_upto: usize,
    doc_upto: u32,
    accum: u32,
    doc: u32,

    skipper: Option<SkipReader>,
    skipped: bool,
    next_skip_doc: u32,
}

impl DocCursor {
    fn new(mut doc_in: IndexInput, caps: FieldCaps, needs_freq: bool, state: &BlockTermState) -> Self {
        if state.singleton_doc_id.is_none() {
            doc_in.seek(state.doc_start_fp);
        }
        Self {
            doc_in,
            caps,
            needs_freq,
            state: state.clone(),
            delta_buffer: [0; BLOCK_SIZE],
            freq_buffer: [1; BLOCK_SIZE],
            buffered: 0,
            buffer_upto: 0,
            doc_upto: 0,
            accum: 0,
            doc: 0,
            skipper: None,
            skipped: false,
            // Forces the first advance past one block to consult the skip
            // data; updated from the skipper afterwards.
            next_skip_doc: 0,
        }
    }

    fn refill(&mut self) -> Result<()> {
        let left = self.state.doc_freq - self.doc_upto;
        if left as usize >= BLOCK_SIZE {
            read_block(&mut self.doc_in, &mut self.delta_buffer)?;
            if self.caps.has_freqs() {
                if self.needs_freq {
                    read_block(&mut self.doc_in, &mut self.freq_buffer)?;
                } else {
                    block::skip_block(&mut self.doc_in)?;
                }
            }
            self.buffered = BLOCK_SIZE;
        } else if let Some(doc) = self.state.singleton_doc_id {
            self.delta_buffer[0] = doc;
            self.freq_buffer[0] = self.state.total_term_freq as u32;
            self.buffered = 1;
        } else {
            // vInt tail; bit 0 of the shifted delta flags freq == 1.
            for i in 0..left as usize {
                if self.caps.has_freqs() {
                    let code = self.doc_in.read_vint()?;
                    self.delta_buffer[i] = code >> 1;
                    self.freq_buffer[i] = if code & 1 == 1 {
                        1
                    } else {
                        self.doc_in.read_vint()?
                    };
                } else {
                    self.delta_buffer[i] = self.doc_in.read_vint()?;
                }
            }
            self.buffered = left as usize;
        }
        self.buffer_upto = 0;
        Ok(())
    }

    /// Decode the next posting with no live-docs filtering. Returns
    /// `(doc, freq)` or `None` when the term is exhausted.
    fn next_raw(&mut self) -> Result<Option<(u32, u32)>> {
        if self.doc_upto == self.state.doc_freq {
            self.doc = NO_MORE_DOCS;
            return Ok(None);
        }
        if self.buffer_upto == self.buffered {
            self.refill()?;
        }
        self.accum += self.delta_buffer[self.buffer_upto];
        let freq = if self.needs_freq {
            self.freq_buffer[self.buffer_upto]
        } else {
            1
        };
        self.buffer_upto += 1;
        self.doc_upto += 1;
        self.doc = self.accum;
        Ok(Some((self.accum, freq)))
    }

    /// Coarse phase of `advance`: jump through the skip list when the
    /// target lies beyond the current block. Returns the resume point when
    /// the cursor actually moved.
    fn try_skip(&mut self, target: u32) -> Result<Option<SkipResume>> {
        if self.state.doc_freq as usize <= BLOCK_SIZE || target <= self.next_skip_doc {
            return Ok(None);
        }
        if self.skipper.is_none() {
            self.skipper = Some(SkipReader::new(
                self.caps.has_positions(),
                self.caps.payloads,
                self.caps.has_offsets(),
            ));
        }
        let skipper = self.skipper.as_mut().unwrap();
        if !self.skipped {
            // Lazy init: the skip data lives after this term's doc blocks.
            skipper.init(
                self.doc_in.clone(),
                self.state.doc_start_fp + self.state.skip_offset.expect("df > block implies skip"),
                self.state.doc_start_fp,
                self.state.pos_start_fp,
                self.state.pay_start_fp,
                self.state.doc_freq,
            )?;
            self.skipped = true;
        }
        let new_doc_upto = (skipper.skip_to(target)? + 1) as u32;
        let mut resume = None;
        if new_doc_upto > self.doc_upto {
            debug_assert_eq!(new_doc_upto as usize % BLOCK_SIZE, 0);
            self.doc_upto = new_doc_upto;
            self.accum = skipper.doc();
            self.doc_in.seek(skipper.doc_fp());
            self.buffered = 0;
            self.buffer_upto = 0;
            resume = Some(SkipResume {
                pos_fp: skipper.pos_fp(),
                pay_fp: skipper.pay_fp(),
                pos_buffer_upto: skipper.pos_buffer_upto(),
                payload_byte_upto: skipper.payload_byte_upto(),
            });
        }
        self.next_skip_doc = skipper.next_skip_doc();
        Ok(resume)
    }
}

fn is_deleted(deleted: &Option<Arc<RoaringBitmap>>, doc: u32) -> bool {
    deleted.as_ref().is_some_and(|d| d.contains(doc))
}

/// Docs (and optionally frequencies) only.
pub struct BlockDocsIterator {
    cursor: DocCursor,
    deleted: Option<Arc<RoaringBitmap>>,
    freq: u32,
}

impl BlockDocsIterator {
    fn new(
        doc_in: IndexInput,
        caps: FieldCaps,
        state: &BlockTermState,
        needs_freq: bool,
        deleted: Option<Arc<RoaringBitmap>>,
    ) -> Self {
        Self {
            cursor: DocCursor::new(doc_in, caps, needs_freq && caps.has_freqs(), state),
            deleted,
            freq: 1,
        }
    }

    pub fn doc(&self) -> u32 {
        self.cursor.doc
    }

    pub fn freq(&self) -> u32 {
        self.freq
    }

    pub fn next_doc(&mut self) -> Result<u32> {
        while let Some((doc, freq)) = self.cursor.next_raw()? {
            if is_deleted(&self.deleted, doc) {
                continue;
            }
            self.freq = freq;
            return Ok(doc);
        }
        Ok(NO_MORE_DOCS)
    }

    pub fn advance(&mut self, target: u32) -> Result<u32> {
        self.cursor.try_skip(target)?;
        loop {
            let doc = self.next_doc()?;
            if doc >= target {
                return Ok(doc);
            }
        }
    }
}

/// Docs, frequencies and positions; used only for fields without payloads
/// or offsets, so the pos stream holds bare position deltas.
pub struct BlockPostingsIterator {
    cursor: DocCursor,
    deleted: Option<Arc<RoaringBitmap>>,
    pos_in: IndexInput,
    freq: u32,

    pos_delta_buffer: [u32; BLOCK_SIZE],
    pos_buffered: usize,
    pos_buffer_upto: usize,
    /// Positions owed before the current document's can be returned.
    pos_pending_count: u32,
    /// Deferred seek: resolved on the first `next_position` after a skip.
    pos_pending_fp: Option<u64>,
    position: u32,
    /// Start of the vInt position tail, `None` when the term has no tail.
    last_pos_block_fp: Option<u64>,
}

impl BlockPostingsIterator {
    fn new(
        doc_in: IndexInput,
        pos_in: IndexInput,
        caps: FieldCaps,
        state: &BlockTermState,
        deleted: Option<Arc<RoaringBitmap>>,
    ) -> Self {
        let last_pos_block_fp = tail_fp(state);
        Self {
            cursor: DocCursor::new(doc_in, caps, true, state),
            deleted,
            pos_in,
            freq: 1,
            pos_delta_buffer: [0; BLOCK_SIZE],
            pos_buffered: 0,
            pos_buffer_upto: 0,
            pos_pending_count: 0,
            pos_pending_fp: Some(state.pos_start_fp),
            position: 0,
            last_pos_block_fp,
        }
    }

    pub fn doc(&self) -> u32 {
        self.cursor.doc
    }

    pub fn freq(&self) -> u32 {
        self.freq
    }

    pub fn next_doc(&mut self) -> Result<u32> {
        while let Some((doc, freq)) = self.cursor.next_raw()? {
            self.pos_pending_count += freq;
            if is_deleted(&self.deleted, doc) {
                continue;
            }
            self.freq = freq;
            self.position = 0;
            return Ok(doc);
        }
        Ok(NO_MORE_DOCS)
    }

    pub fn advance(&mut self, target: u32) -> Result<u32> {
        if let Some(resume) = self.cursor.try_skip(target)? {
            self.pos_pending_fp = Some(resume.pos_fp);
            self.pos_pending_count = resume.pos_buffer_upto;
            self.pos_buffered = 0;
            self.pos_buffer_upto = 0;
        }
        loop {
            let doc = self.next_doc()?;
            if doc >= target {
                return Ok(doc);
            }
        }
    }

    fn refill_positions(&mut self) -> Result<()> {
        if Some(self.pos_in.position()) == self.last_pos_block_fp {
            let ttf = self.cursor.state.total_term_freq;
            let count = if ttf <= BLOCK_SIZE as u64 {
                ttf as usize
            } else {
                (ttf % BLOCK_SIZE as u64) as usize
            };
            for i in 0..count {
                self.pos_delta_buffer[i] = self.pos_in.read_vint()?;
            }
            self.pos_buffered = count;
        } else {
            read_block(&mut self.pos_in, &mut self.pos_delta_buffer)?;
            self.pos_buffered = BLOCK_SIZE;
        }
        self.pos_buffer_upto = 0;
        Ok(())
    }

    fn skip_positions(&mut self, count: u32) -> Result<()> {
        let mut to_skip = count as usize;
        let left_in_buffer = self.pos_buffered - self.pos_buffer_upto;
        if to_skip < left_in_buffer {
            self.pos_buffer_upto += to_skip;
        } else {
            to_skip -= left_in_buffer;
            self.pos_buffer_upto = self.pos_buffered;
            while to_skip >= BLOCK_SIZE {
                block::skip_block(&mut self.pos_in)?;
                to_skip -= BLOCK_SIZE;
            }
            self.refill_positions()?;
            self.pos_buffer_upto = to_skip;
        }
        Ok(())
    }

    pub fn next_position(&mut self) -> Result<u32> {
        if let Some(fp) = self.pos_pending_fp.take() {
            self.pos_in.seek(fp);
            self.pos_buffered = 0;
            self.pos_buffer_upto = 0;
        }
        if self.pos_pending_count > self.freq {
            self.skip_positions(self.pos_pending_count - self.freq)?;
            self.pos_pending_count = self.freq;
            self.position = 0;
        }
        if self.pos_buffer_upto == self.pos_buffered {
            self.refill_positions()?;
        }
        self.position += self.pos_delta_buffer[self.pos_buffer_upto];
        self.pos_buffer_upto += 1;
        self.pos_pending_count -= 1;
        Ok(self.position)
    }
}

/// Everything: docs, freqs, positions, payloads and offsets.
pub struct BlockEverythingIterator {
    cursor: DocCursor,
    deleted: Option<Arc<RoaringBitmap>>,
    pos_in: IndexInput,
    pay_in: IndexInput,
    freq: u32,

    pos_delta_buffer: [u32; BLOCK_SIZE],
    payload_length_buffer: [u32; BLOCK_SIZE],
    offset_start_delta_buffer: [u32; BLOCK_SIZE],
    offset_length_buffer: [u32; BLOCK_SIZE],
    payload_bytes: Vec<u8>,
    payload_byte_upto: usize,
    payload_length: u32,

    pos_buffered: usize,
    pos_buffer_upto: usize,
    pos_pending_count: u32,
    pos_pending_fp: Option<u64>,
    pay_pending_fp: Option<u64>,
    position: u32,
    start_offset: u32,
    end_offset: u32,
    last_start_offset: u32,
    last_pos_block_fp: Option<u64>,
}

impl BlockEverythingIterator {
    fn new(
        doc_in: IndexInput,
        pos_in: IndexInput,
        pay_in: IndexInput,
        caps: FieldCaps,
        state: &BlockTermState,
        deleted: Option<Arc<RoaringBitmap>>,
    ) -> Self {
        let last_pos_block_fp = tail_fp(state);
        Self {
            cursor: DocCursor::new(doc_in, caps, true, state),
            deleted,
            pos_in,
            pay_in,
            freq: 1,
            pos_delta_buffer: [0; BLOCK_SIZE],
            payload_length_buffer: [0; BLOCK_SIZE],
            offset_start_delta_buffer: [0; BLOCK_SIZE],
            offset_length_buffer: [0; BLOCK_SIZE],
            payload_bytes: Vec::new(),
            payload_byte_upto: 0,
            payload_length: 0,
            pos_buffered: 0,
            pos_buffer_upto: 0,
            pos_pending_count: 0,
            pos_pending_fp: Some(state.pos_start_fp),
            pay_pending_fp: Some(state.pay_start_fp),
            position: 0,
            start_offset: 0,
            end_offset: 0,
            last_start_offset: 0,
            last_pos_block_fp,
        }
    }

    fn caps(&self) -> FieldCaps {
        self.cursor.caps
    }

    pub fn doc(&self) -> u32 {
        self.cursor.doc
    }

    pub fn freq(&self) -> u32 {
        self.freq
    }

    pub fn next_doc(&mut self) -> Result<u32> {
        while let Some((doc, freq)) = self.cursor.next_raw()? {
            self.pos_pending_count += freq;
            if is_deleted(&self.deleted, doc) {
                continue;
            }
            self.freq = freq;
            self.position = 0;
            self.last_start_offset = 0;
            return Ok(doc);
        }
        Ok(NO_MORE_DOCS)
    }

    pub fn advance(&mut self, target: u32) -> Result<u32> {
        if let Some(resume) = self.cursor.try_skip(target)? {
            self.pos_pending_fp = Some(resume.pos_fp);
            self.pay_pending_fp = Some(resume.pay_fp);
            self.pos_pending_count = resume.pos_buffer_upto;
            self.payload_byte_upto = resume.payload_byte_upto as usize;
            self.pos_buffered = 0;
            self.pos_buffer_upto = 0;
        }
        loop {
            let doc = self.next_doc()?;
            if doc >= target {
                return Ok(doc);
            }
        }
    }

    fn refill_positions(&mut self) -> Result<()> {
        if Some(self.pos_in.position()) == self.last_pos_block_fp {
            // vInt tail with payloads and offsets inline.
            let ttf = self.cursor.state.total_term_freq;
            let count = if ttf <= BLOCK_SIZE as u64 {
                ttf as usize
            } else {
                (ttf % BLOCK_SIZE as u64) as usize
            };
            self.payload_bytes.clear();
            let mut last_payload_length = 0u32;
            let mut last_offset_length = 0u32;
            for i in 0..count {
                if self.caps().payloads {
                    let code = self.pos_in.read_vint()?;
                    self.pos_delta_buffer[i] = code >> 1;
                    if code & 1 == 1 {
                        last_payload_length = self.pos_in.read_vint()?;
                    }
                    self.payload_length_buffer[i] = last_payload_length;
                    if last_payload_length > 0 {
                        let start = self.payload_bytes.len();
                        self.payload_bytes
                            .resize(start + last_payload_length as usize, 0);
                        self.pos_in.read_bytes(&mut self.payload_bytes[start..])?;
                    }
                } else {
                    self.pos_delta_buffer[i] = self.pos_in.read_vint()?;
                }
                if self.caps().has_offsets() {
                    let code = self.pos_in.read_vint()?;
                    self.offset_start_delta_buffer[i] = code >> 1;
                    if code & 1 == 1 {
                        last_offset_length = self.pos_in.read_vint()?;
                    }
                    self.offset_length_buffer[i] = last_offset_length;
                }
            }
            self.pos_buffered = count;
        } else {
            read_block(&mut self.pos_in, &mut self.pos_delta_buffer)?;
            if self.caps().payloads {
                if let Some(fp) = self.pay_pending_fp.take() {
                    self.pay_in.seek(fp);
                }
                read_block(&mut self.pay_in, &mut self.payload_length_buffer)?;
                let num_bytes = self.pay_in.read_vint()? as usize;
                self.payload_bytes.resize(num_bytes, 0);
                self.pay_in.read_bytes(&mut self.payload_bytes)?;
            }
            if self.caps().has_offsets() {
                if let Some(fp) = self.pay_pending_fp.take() {
                    self.pay_in.seek(fp);
                }
                read_block(&mut self.pay_in, &mut self.offset_start_delta_buffer)?;
                read_block(&mut self.pay_in, &mut self.offset_length_buffer)?;
            }
            self.pos_buffered = BLOCK_SIZE;
        }
        self.pos_buffer_upto = 0;
        self.payload_byte_upto = 0;
        Ok(())
    }

    fn skip_positions(&mut self, count: u32) -> Result<()> {
        let mut to_skip = count as usize;
        let left_in_buffer = self.pos_buffered - self.pos_buffer_upto;
        if to_skip < left_in_buffer {
            if self.caps().payloads {
                for i in self.pos_buffer_upto..self.pos_buffer_upto + to_skip {
                    self.payload_byte_upto += self.payload_length_buffer[i] as usize;
                }
            }
            self.pos_buffer_upto += to_skip;
        } else {
            to_skip -= left_in_buffer;
            self.pos_buffer_upto = self.pos_buffered;
            while to_skip >= BLOCK_SIZE {
                block::skip_block(&mut self.pos_in)?;
                if self.caps().payloads {
                    if let Some(fp) = self.pay_pending_fp.take() {
                        self.pay_in.seek(fp);
                    }
                    block::skip_block(&mut self.pay_in)?;
                    let num_bytes = self.pay_in.read_vint()? as u64;
                    self.pay_in.skip(num_bytes);
                }
                if self.caps().has_offsets() {
                    if let Some(fp) = self.pay_pending_fp.take() {
                        self.pay_in.seek(fp);
                    }
                    block::skip_block(&mut self.pay_in)?;
                    block::skip_block(&mut self.pay_in)?;
                }
                to_skip -= BLOCK_SIZE;
            }
            self.refill_positions()?;
            for i in 0..to_skip {
                if self.caps().payloads {
                    self.payload_byte_upto += self.payload_length_buffer[i] as usize;
                }
            }
            self.pos_buffer_upto = to_skip;
        }
        Ok(())
    }

    pub fn next_position(&mut self) -> Result<u32> {
        if let Some(fp) = self.pos_pending_fp.take() {
            self.pos_in.seek(fp);
            self.pos_buffered = 0;
            self.pos_buffer_upto = 0;
        }
        if self.pos_pending_count > self.freq {
            self.skip_positions(self.pos_pending_count - self.freq)?;
            self.pos_pending_count = self.freq;
            self.position = 0;
            self.last_start_offset = 0;
        }
        if self.pos_buffer_upto == self.pos_buffered {
            self.refill_positions()?;
        }
        self.position += self.pos_delta_buffer[self.pos_buffer_upto];
        if self.caps().payloads {
            self.payload_length = self.payload_length_buffer[self.pos_buffer_upto];
            // Record where this position's payload starts; the accessor
            // slices out of payload_bytes.
            self.payload_byte_upto += self.payload_length as usize;
        }
        if self.caps().has_offsets() {
            self.start_offset =
                self.last_start_offset + self.offset_start_delta_buffer[self.pos_buffer_upto];
            self.end_offset = self.start_offset + self.offset_length_buffer[self.pos_buffer_upto];
            self.last_start_offset = self.start_offset;
        }
        self.pos_buffer_upto += 1;
        self.pos_pending_count -= 1;
        Ok(self.position)
    }

    pub fn payload(&self) -> Option<&[u8]> {
        if !self.caps().payloads || self.payload_length == 0 {
            return None;
        }
        let end = self.payload_byte_upto;
        let start = end - self.payload_length as usize;
        Some(&self.payload_bytes[start..end])
    }

    pub fn start_offset(&self) -> Option<u32> {
        self.caps().has_offsets().then_some(self.start_offset)
    }

    pub fn end_offset(&self) -> Option<u32> {
        self.caps().has_offsets().then_some(self.end_offset)
    }
}

/// File pointer of the vInt position tail for a term, or `None` when the
/// term has no tail (total term freq is exactly one full block, or a
/// multiple of it).
fn tail_fp(state: &BlockTermState) -> Option<u64> {
    let ttf = state.total_term_freq;
    if ttf < BLOCK_SIZE as u64 {
        Some(state.pos_start_fp)
    } else if ttf == BLOCK_SIZE as u64 {
        None
    } else {
        state
            .last_pos_block_offset
            .map(|off| state.pos_start_fp + off)
    }
}
