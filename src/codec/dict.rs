//! Term dictionary: maps each field's terms to their [`BlockTermState`].
//!
//! Terms are written in sorted order, grouped into blocks of
//! [`TERM_DICT_BLOCK_SIZE`]. The first entry of a block carries absolute
//! metadata, later entries are delta-encoded against their predecessor, so
//! a lookup binary-searches the in-memory block index and then linearly
//! scans at most one block.

use rustc_hash::FxHashMap;
use std::path::Path;

use crate::codec::{BlockTermState, FieldCaps, IndexOptions, TERM_DICT_BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::store::format::{self, FOOTER_LEN};
use crate::store::{IndexInput, IndexOutput};

const DICT_CODEC: &str = "strata.dict";
const DICT_VERSION: u32 = 1;

fn encode_caps(caps: FieldCaps) -> u8 {
    let opts = match caps.options {
        IndexOptions::Docs => 0,
        IndexOptions::DocsAndFreqs => 1,
        IndexOptions::DocsAndFreqsAndPositions => 2,
        IndexOptions::DocsAndFreqsAndPositionsAndOffsets => 3,
    };
    opts | if caps.payloads { 1 << 2 } else { 0 }
}

fn decode_caps(byte: u8) -> Result<FieldCaps> {
    let options = match byte & 0b11 {
        0 => IndexOptions::Docs,
        1 => IndexOptions::DocsAndFreqs,
        2 => IndexOptions::DocsAndFreqsAndPositions,
        3 => IndexOptions::DocsAndFreqsAndPositionsAndOffsets,
        _ => unreachable!(),
    };
    if byte & !0b111 != 0 {
        return Err(Error::CorruptIndex(format!(
            "bad field capability byte {byte:#x}"
        )));
    }
    Ok(FieldCaps {
        options,
        payloads: byte & (1 << 2) != 0,
    })
}

struct FieldSection {
    name: String,
    caps: FieldCaps,
    num_terms: u64,
    /// (first term, dictionary file offset) per term block.
    block_index: Vec<(Vec<u8>, u64)>,
}

/// Streaming dictionary writer; terms must arrive in sorted order per
/// field, fields in sorted order.
pub struct TermDictWriter {
    out: IndexOutput,
    done: Vec<FieldSection>,
    current: Option<FieldSection>,
    count_in_block: usize,
    last_state: BlockTermState,
}

impl TermDictWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let mut out = IndexOutput::create(path)?;
        format::write_header(&mut out, DICT_CODEC, DICT_VERSION)?;
        Ok(Self {
            out,
            done: Vec::new(),
            current: None,
            count_in_block: 0,
            last_state: BlockTermState::default(),
        })
    }

    pub fn start_field(&mut self, name: &str, caps: FieldCaps) {
        debug_assert!(self.current.is_none());
        self.current = Some(FieldSection {
            name: name.to_string(),
            caps,
            num_terms: 0,
            block_index: Vec::new(),
        });
        self.count_in_block = 0;
        self.last_state = BlockTermState::default();
    }

    pub fn add_term(&mut self, term: &[u8], state: &BlockTermState) -> Result<()> {
        let absolute = self.count_in_block == 0;
        let fp = self.out.file_pointer();
        let caps = {
            let section = self.current.as_mut().expect("start_field not called");
            if absolute {
                section.block_index.push((term.to_vec(), fp));
            }
            section.num_terms += 1;
            section.caps
        };
        self.out.write_string(term)?;
        state.encode(&mut self.out, &self.last_state, absolute, caps)?;
        // Mirror the decoder: singleton terms do not move the doc pointer chain.
        let mut next = state.clone();
        if next.singleton_doc_id.is_some() {
            next.doc_start_fp = self.last_state.doc_start_fp;
        }
        self.last_state = next;
        self.count_in_block = (self.count_in_block + 1) % TERM_DICT_BLOCK_SIZE;
        Ok(())
    }

    pub fn finish_field(&mut self) {
        let section = self.current.take().expect("start_field not called");
        self.done.push(section);
    }

    pub fn finish(mut self) -> Result<()> {
        debug_assert!(self.current.is_none());
        let trailer_fp = self.out.file_pointer();
        self.out.write_vint(self.done.len() as u32)?;
        for section in &self.done {
            self.out.write_string(section.name.as_bytes())?;
            self.out.write_u8(encode_caps(section.caps))?;
            self.out.write_vlong(section.num_terms)?;
            self.out.write_vint(section.block_index.len() as u32)?;
            for (first_term, fp) in &section.block_index {
                self.out.write_string(first_term)?;
                self.out.write_vlong(*fp)?;
            }
        }
        self.out.write_u64(trailer_fp)?;
        format::write_footer(&mut self.out)?;
        self.out.close()
    }
}

/// One field's term index, loaded at open.
pub struct FieldTerms {
    pub caps: FieldCaps,
    pub num_terms: u64,
    blocks: Vec<(Vec<u8>, u64)>,
}

/// Read handle over a `terms.dict` stream.
pub struct TermDict {
    input: IndexInput,
    fields: FxHashMap<String, FieldTerms>,
}

impl TermDict {
    pub fn open(path: &Path) -> Result<Self> {
        let mut input = IndexInput::open(path)?;
        format::check_header(&mut input, DICT_CODEC, DICT_VERSION, DICT_VERSION)?;
        if input.len() < FOOTER_LEN + 8 {
            return Err(Error::CorruptIndex("term dict too short".to_string()));
        }
        input.seek(input.len() - FOOTER_LEN - 8);
        let trailer_fp = input.read_u64()?;
        input.seek(trailer_fp);
        let num_fields = input.read_vint()?;
        let mut fields = FxHashMap::default();
        for _ in 0..num_fields {
            let name = String::from_utf8_lossy(&input.read_string()?).into_owned();
            let caps = decode_caps(input.read_u8()?)?;
            let num_terms = input.read_vlong()?;
            let num_blocks = input.read_vint()?;
            let mut blocks = Vec::with_capacity(num_blocks as usize);
            for _ in 0..num_blocks {
                let first_term = input.read_string()?;
                let fp = input.read_vlong()?;
                blocks.push((first_term, fp));
            }
            fields.insert(
                name,
                FieldTerms {
                    caps,
                    num_terms,
                    blocks,
                },
            );
        }
        Ok(Self { input, fields })
    }

    pub fn field(&self, name: &str) -> Option<&FieldTerms> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|s| s.as_str())
    }

    /// Verify the stream checksum.
    pub fn check_integrity(&self) -> Result<()> {
        format::verify_footer(&mut self.input.clone())
    }

    fn block_len(field: &FieldTerms, block_idx: usize) -> usize {
        let before = block_idx as u64 * TERM_DICT_BLOCK_SIZE as u64;
        (field.num_terms - before).min(TERM_DICT_BLOCK_SIZE as u64) as usize
    }

    /// Find a term's metadata, or `None` if the field or term is absent.
    pub fn lookup(&self, field_name: &str, term: &[u8]) -> Result<Option<BlockTermState>> {
        let Some(field) = self.fields.get(field_name) else {
            return Ok(None);
        };
        let idx = field.blocks.partition_point(|(first, _)| first.as_slice() <= term);
        if idx == 0 {
            return Ok(None);
        }
        let block_idx = idx - 1;
        let mut cursor = self.input.clone();
        cursor.seek(field.blocks[block_idx].1);
        let mut prev = BlockTermState::default();
        for i in 0..Self::block_len(field, block_idx) {
            let entry_term = cursor.read_string()?;
            let state = BlockTermState::decode(&mut cursor, &prev, i == 0, field.caps)?;
            match entry_term.as_slice().cmp(term) {
                std::cmp::Ordering::Equal => return Ok(Some(state)),
                std::cmp::Ordering::Greater => return Ok(None),
                std::cmp::Ordering::Less => prev = state,
            }
        }
        Ok(None)
    }

    /// Sequential iterator over every term of a field.
    pub fn terms(&self, field_name: &str) -> Option<TermsIter<'_>> {
        let field = self.fields.get(field_name)?;
        Some(TermsIter {
            dict: self,
            field,
            block_idx: 0,
            in_block: 0,
            cursor: self.input.clone(),
            prev: BlockTermState::default(),
            emitted: 0,
        })
    }
}

pub struct TermsIter<'a> {
    dict: &'a TermDict,
    field: &'a FieldTerms,
    block_idx: usize,
    in_block: usize,
    cursor: IndexInput,
    prev: BlockTermState,
    emitted: u64,
}

impl TermsIter<'_> {
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, BlockTermState)>> {
        if self.emitted >= self.field.num_terms {
            return Ok(None);
        }
        if self.in_block == 0 {
            self.cursor.seek(self.field.blocks[self.block_idx].1);
            self.prev = BlockTermState::default();
        }
        let term = self.cursor.read_string()?;
        let state =
            BlockTermState::decode(&mut self.cursor, &self.prev, self.in_block == 0, self.field.caps)?;
        self.prev = state.clone();
        self.emitted += 1;
        self.in_block += 1;
        if self.in_block == TermDict::block_len(self.field, self.block_idx) {
            self.block_idx += 1;
            self.in_block = 0;
        }
        Ok(Some((term, state)))
    }
}
