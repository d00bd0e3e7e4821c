//! In-memory indexing chain: buffers postings per field and term, then
//! drains them through the postings codec at flush.
//!
//! Buffered postings are varint-encoded byte runs rather than structs, so
//! RAM accounting follows actual buffer growth.

use rustc_hash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::dict::TermDictWriter;
use crate::codec::{BlockTermState, FieldCaps, PostingsWriter};
use crate::error::{Error, Result};
use crate::segment::{FieldInfo, SegmentMeta};
use crate::store::{decode_varint, encode_varint};
use crate::writer::document::Document;

/// Longest accepted term, in bytes. Oversized terms reject the document
/// rather than aborting the segment.
pub const MAX_TERM_BYTES: usize = 32_766;

/// Why one document could not be indexed.
pub enum ChainFailure {
    /// This document alone is bad; siblings are unaffected. The caller
    /// converts this into a delete-by-id.
    Rejected(String),
    /// The whole in-memory segment is compromised.
    Aborted(Error),
}

/// Narrow boundary between the writer pipeline and field processing.
pub trait IndexingChain: Send {
    fn process_document(
        &mut self,
        doc: &Document,
        doc_id: u32,
    ) -> std::result::Result<(), ChainFailure>;

    /// Serialize all buffered state into segment files under `dir`.
    fn flush(&mut self, dir: &Path, segment_name: &str, max_doc: u32) -> Result<SegmentMeta>;

    /// Best-effort discard of buffered state.
    fn abort(&mut self);

    fn bytes_used(&self) -> u64;
}

struct TermBuffer {
    /// Completed (delta, freq) pairs, varint-encoded.
    docs: Vec<u8>,
    /// Per-occurrence position data, varint-encoded.
    prox: Vec<u8>,
    doc_freq: u32,
    last_written_doc: u32,
    /// Doc currently accumulating occurrences; `pending_freq == 0` means
    /// nothing is pending.
    pending_doc: u32,
    pending_freq: u32,
    last_pos: u32,
    last_start_offset: u32,
}

impl TermBuffer {
    fn new() -> Self {
        Self {
            docs: Vec::new(),
            prox: Vec::new(),
            doc_freq: 0,
            last_written_doc: 0,
            pending_doc: 0,
            pending_freq: 0,
            last_pos: 0,
            last_start_offset: 0,
        }
    }

    fn commit_pending(&mut self) {
        if self.pending_freq == 0 {
            return;
        }
        encode_varint(self.pending_doc - self.last_written_doc, &mut self.docs);
        encode_varint(self.pending_freq, &mut self.docs);
        self.last_written_doc = self.pending_doc;
        self.doc_freq += 1;
        self.pending_freq = 0;
    }
}

struct FieldState {
    number: u32,
    caps: FieldCaps,
    terms: FxHashMap<Vec<u8>, TermBuffer>,
}

/// Default indexing chain: per-field term hash over varint posting buffers.
#[derive(Default)]
pub struct TermsHashChain {
    fields: FxHashMap<String, FieldState>,
    bytes_used: u64,
}

/// Rough allocation overhead per new hash entry.
const TERM_ENTRY_OVERHEAD: u64 = 64;

impl TermsHashChain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexingChain for TermsHashChain {
    fn process_document(
        &mut self,
        doc: &Document,
        doc_id: u32,
    ) -> std::result::Result<(), ChainFailure> {
        for field_value in &doc.fields {
            let next_number = self.fields.len() as u32;
            let field = self
                .fields
                .entry(field_value.name.clone())
                .or_insert_with(|| FieldState {
                    number: next_number,
                    caps: field_value.caps,
                    terms: FxHashMap::default(),
                });
            // Buffered prox data is encoded under the caps in force when a
            // token arrived, so a field's caps are fixed for the segment.
            if field.caps != field_value.caps {
                return Err(ChainFailure::Rejected(format!(
                    "field {:?} indexed with different options than before",
                    field_value.name
                )));
            }
            let caps = field.caps;

            let mut last_pos_seen = 0u32;
            for token in &field_value.tokens {
                if token.term.is_empty() {
                    return Err(ChainFailure::Rejected(format!(
                        "empty term in field {:?}",
                        field_value.name
                    )));
                }
                if token.term.len() > MAX_TERM_BYTES {
                    return Err(ChainFailure::Rejected(format!(
                        "term longer than {MAX_TERM_BYTES} bytes in field {:?}",
                        field_value.name
                    )));
                }
                if token.position < last_pos_seen {
                    return Err(ChainFailure::Rejected(format!(
                        "positions went backwards in field {:?}: {} after {}",
                        field_value.name, token.position, last_pos_seen
                    )));
                }
                last_pos_seen = token.position;

                let mut added = token.term.len() as u64;
                let buffer = field.terms.entry(token.term.clone()).or_insert_with(|| {
                    added += TERM_ENTRY_OVERHEAD;
                    TermBuffer::new()
                });

                if buffer.pending_freq > 0 && buffer.pending_doc != doc_id {
                    buffer.commit_pending();
                }
                if buffer.pending_freq == 0 {
                    buffer.pending_doc = doc_id;
                    buffer.last_pos = 0;
                    buffer.last_start_offset = 0;
                }
                buffer.pending_freq += 1;

                if caps.has_positions() {
                    let before = buffer.prox.len();
                    let delta = token.position - buffer.last_pos;
                    if caps.payloads {
                        let payload = token.payload.as_deref().unwrap_or(&[]);
                        encode_varint(
                            (delta << 1) | (!payload.is_empty()) as u32,
                            &mut buffer.prox,
                        );
                        if !payload.is_empty() {
                            encode_varint(payload.len() as u32, &mut buffer.prox);
                            buffer.prox.extend_from_slice(payload);
                        }
                    } else {
                        encode_varint(delta, &mut buffer.prox);
                    }
                    if caps.has_offsets() {
                        let (start, end) = token
                            .offsets
                            .unwrap_or((buffer.last_start_offset, buffer.last_start_offset));
                        encode_varint(start - buffer.last_start_offset, &mut buffer.prox);
                        encode_varint(end - start, &mut buffer.prox);
                        buffer.last_start_offset = start;
                    }
                    buffer.last_pos = token.position;
                    added += (buffer.prox.len() - before) as u64;
                }
                // Account ~2 bytes for the eventual (delta, freq) pair.
                self.bytes_used += added + 2;
            }
        }
        Ok(())
    }

    fn flush(&mut self, dir: &Path, segment_name: &str, max_doc: u32) -> Result<SegmentMeta> {
        let seg_dir = dir.join("segments").join(segment_name);
        fs::create_dir_all(&seg_dir)?;

        let has_positions = self.fields.values().any(|f| f.caps.has_positions());
        let has_payloads = self.fields.values().any(|f| f.caps.has_pay_stream());

        let doc_path = seg_dir.join("terms.doc");
        let pos_path: Option<PathBuf> = has_positions.then(|| seg_dir.join("terms.pos"));
        let pay_path: Option<PathBuf> = has_payloads.then(|| seg_dir.join("terms.pay"));
        let mut postings =
            PostingsWriter::create(&doc_path, pos_path.as_deref(), pay_path.as_deref())?;
        let mut dict = TermDictWriter::create(&seg_dir.join("terms.dict"))?;

        let mut field_names: Vec<&String> = self.fields.keys().collect();
        field_names.sort();
        let mut field_infos = Vec::with_capacity(field_names.len());

        for name in field_names {
            let field = &self.fields[name];
            let caps = field.caps;
            field_infos.push(FieldInfo {
                name: name.clone(),
                number: field.number,
                caps,
            });
            postings.set_field(caps);
            dict.start_field(name, caps);

            let mut terms: Vec<&Vec<u8>> = field.terms.keys().collect();
            terms.sort_unstable();

            for term in terms {
                // Safe: term keys are not mutated while flushing.
                let buffer = &field.terms[term];
                let mut docs = buffer.docs.clone();
                let mut doc_freq = buffer.doc_freq;
                if buffer.pending_freq > 0 {
                    encode_varint(buffer.pending_doc - buffer.last_written_doc, &mut docs);
                    encode_varint(buffer.pending_freq, &mut docs);
                    doc_freq += 1;
                }

                postings.start_term();
                let mut doc_cursor = 0usize;
                let mut prox_cursor = 0usize;
                let mut doc = 0u32;
                for _ in 0..doc_freq {
                    let (delta, used) = decode_varint(&docs[doc_cursor..])
                        .ok_or_else(|| Error::CorruptIndex("bad buffered doc delta".into()))?;
                    doc_cursor += used;
                    let (freq, used) = decode_varint(&docs[doc_cursor..])
                        .ok_or_else(|| Error::CorruptIndex("bad buffered freq".into()))?;
                    doc_cursor += used;
                    doc += delta;

                    postings.start_doc(doc, if caps.has_freqs() { freq } else { 1 })?;
                    if caps.has_positions() {
                        let mut position = 0u32;
                        let mut start_offset = 0u32;
                        for _ in 0..freq {
                            let prox = &buffer.prox;
                            let (code, used) = decode_varint(&prox[prox_cursor..])
                                .ok_or_else(|| Error::CorruptIndex("bad buffered position".into()))?;
                            prox_cursor += used;
                            let mut payload: Option<&[u8]> = None;
                            if caps.payloads {
                                position += code >> 1;
                                if code & 1 == 1 {
                                    let (len, used) = decode_varint(&prox[prox_cursor..])
                                        .ok_or_else(|| {
                                            Error::CorruptIndex("bad buffered payload length".into())
                                        })?;
                                    prox_cursor += used;
                                    payload =
                                        Some(&prox[prox_cursor..prox_cursor + len as usize]);
                                    prox_cursor += len as usize;
                                }
                            } else {
                                position += code;
                            }
                            let mut offsets = None;
                            if caps.has_offsets() {
                                let (start_delta, used) = decode_varint(&prox[prox_cursor..])
                                    .ok_or_else(|| {
                                        Error::CorruptIndex("bad buffered offset".into())
                                    })?;
                                prox_cursor += used;
                                let (length, used) = decode_varint(&prox[prox_cursor..])
                                    .ok_or_else(|| {
                                        Error::CorruptIndex("bad buffered offset length".into())
                                    })?;
                                prox_cursor += used;
                                start_offset += start_delta;
                                offsets = Some((start_offset, start_offset + length));
                            }
                            postings.add_position(position, payload, offsets)?;
                        }
                    }
                    postings.finish_doc();
                }
                let mut state = BlockTermState::default();
                postings.finish_term(&mut state)?;
                dict.add_term(term, &state)?;
            }
            dict.finish_field();
        }

        postings.close()?;
        dict.finish()?;

        field_infos.sort_by_key(|f| f.number);
        Ok(SegmentMeta {
            name: segment_name.to_string(),
            max_doc,
            has_positions,
            has_payloads,
            fields: field_infos,
        })
    }

    fn abort(&mut self) {
        self.fields.clear();
        self.bytes_used = 0;
    }

    fn bytes_used(&self) -> u64 {
        self.bytes_used
    }
}
