//! Postings writer: per-term state machine emitting the doc/pos/pay streams.
//!
//! Call sequence per term:
//! `start_term` → (`start_doc` → `add_position`* → `finish_doc`)+ →
//! `finish_term`. Doc ids must be strictly increasing within a term; a
//! violation is fatal to the whole segment because delta encoding cannot
//! represent it.

use std::path::Path;

use crate::codec::block::write_block;
use crate::codec::skip::SkipWriter;
use crate::codec::{BLOCK_SIZE, BlockTermState, FieldCaps};
use crate::error::{Error, Result};
use crate::store::IndexOutput;
use crate::store::format;

pub const DOC_CODEC: &str = "strata.doc";
pub const POS_CODEC: &str = "strata.pos";
pub const PAY_CODEC: &str = "strata.pay";
pub const POSTINGS_VERSION: u32 = 1;

pub struct PostingsWriter {
    doc_out: IndexOutput,
    pos_out: Option<IndexOutput>,
    pay_out: Option<IndexOutput>,
    caps: FieldCaps,
    skip_writer: SkipWriter,
    scratch: Vec<u8>,

    doc_delta_buffer: [u32; BLOCK_SIZE],
    freq_buffer: [u32; BLOCK_SIZE],
    doc_buffer_upto: usize,
    doc_count: u32,
    last_doc_id: u32,
    total_term_freq: u64,
    doc_start_fp: u64,
    pos_start_fp: u64,
    pay_start_fp: u64,

    pos_delta_buffer: [u32; BLOCK_SIZE],
    payload_length_buffer: [u32; BLOCK_SIZE],
    offset_start_delta_buffer: [u32; BLOCK_SIZE],
    offset_length_buffer: [u32; BLOCK_SIZE],
    pos_buffer_upto: usize,
    payload_bytes: Vec<u8>,
    last_position: u32,
    last_start_offset: u32,

    // Skip points are registered one block in arrears: a block's entry is
    // buffered when the *next* document starts, because only then is the
    // block known to be complete.
    last_block_doc_id: i64,
    last_block_pos_fp: u64,
    last_block_pay_fp: u64,
    last_block_pos_buffer_upto: u32,
    last_block_payload_byte_upto: u32,
}

impl PostingsWriter {
    /// Create the output streams. `pos_path`/`pay_path` are `None` when no
    /// field in the segment indexes positions / payload-or-offset data.
    pub fn create(
        doc_path: &Path,
        pos_path: Option<&Path>,
        pay_path: Option<&Path>,
    ) -> Result<Self> {
        let mut doc_out = IndexOutput::create(doc_path)?;
        format::write_header(&mut doc_out, DOC_CODEC, POSTINGS_VERSION)?;
        let pos_out = match pos_path {
            Some(p) => {
                let mut out = IndexOutput::create(p)?;
                format::write_header(&mut out, POS_CODEC, POSTINGS_VERSION)?;
                Some(out)
            }
            None => None,
        };
        let pay_out = match pay_path {
            Some(p) => {
                let mut out = IndexOutput::create(p)?;
                format::write_header(&mut out, PAY_CODEC, POSTINGS_VERSION)?;
                Some(out)
            }
            None => None,
        };
        Ok(Self {
            doc_out,
            pos_out,
            pay_out,
            caps: FieldCaps::default(),
            skip_writer: SkipWriter::new(),
            scratch: Vec::new(),
            doc_delta_buffer: [0; BLOCK_SIZE],
            freq_buffer: [0; BLOCK_SIZE],
            doc_buffer_upto: 0,
            doc_count: 0,
            last_doc_id: 0,
            total_term_freq: 0,
            doc_start_fp: 0,
            pos_start_fp: 0,
            pay_start_fp: 0,
            pos_delta_buffer: [0; BLOCK_SIZE],
            payload_length_buffer: [0; BLOCK_SIZE],
            offset_start_delta_buffer: [0; BLOCK_SIZE],
            offset_length_buffer: [0; BLOCK_SIZE],
            pos_buffer_upto: 0,
            payload_bytes: Vec::new(),
            last_position: 0,
            last_start_offset: 0,
            last_block_doc_id: -1,
            last_block_pos_fp: 0,
            last_block_pay_fp: 0,
            last_block_pos_buffer_upto: 0,
            last_block_payload_byte_upto: 0,
        })
    }

    pub fn set_field(&mut self, caps: FieldCaps) {
        debug_assert!(!caps.has_positions() || self.pos_out.is_some());
        debug_assert!(!caps.has_pay_stream() || self.pay_out.is_some());
        self.caps = caps;
        self.skip_writer
            .set_field(caps.has_positions(), caps.payloads, caps.has_offsets());
    }

    pub fn start_term(&mut self) {
        self.doc_start_fp = self.doc_out.file_pointer();
        self.pos_start_fp = self.pos_out.as_ref().map_or(0, |o| o.file_pointer());
        self.pay_start_fp = self.pay_out.as_ref().map_or(0, |o| o.file_pointer());
        self.doc_buffer_upto = 0;
        self.doc_count = 0;
        self.last_doc_id = 0;
        self.total_term_freq = 0;
        self.pos_buffer_upto = 0;
        self.payload_bytes.clear();
        self.last_block_doc_id = -1;
        self.skip_writer
            .reset(self.doc_start_fp, self.pos_start_fp, self.pay_start_fp);
    }

    /// Begin one document. `freq` is the number of positions that will
    /// follow (pass 1 for fields without frequencies).
    pub fn start_doc(&mut self, doc_id: u32, freq: u32) -> Result<()> {
        // The previous block is complete once the next document arrives.
        if self.last_block_doc_id != -1 && self.doc_buffer_upto == 0 {
            self.skip_writer.buffer_skip(
                self.last_block_doc_id as u32,
                self.doc_out.file_pointer(),
                self.last_block_pos_fp,
                self.last_block_pay_fp,
                self.last_block_pos_buffer_upto,
                self.last_block_payload_byte_upto,
            );
        }

        if self.doc_count > 0 && doc_id <= self.last_doc_id {
            return Err(Error::DocsOutOfOrder {
                doc: doc_id,
                prev: self.last_doc_id,
            });
        }
        // For the first document last_doc_id is 0, so the delta is the
        // absolute doc id.
        let delta = doc_id - self.last_doc_id;
        self.doc_delta_buffer[self.doc_buffer_upto] = delta;
        if self.caps.has_freqs() {
            self.freq_buffer[self.doc_buffer_upto] = freq;
        }
        self.doc_buffer_upto += 1;
        self.doc_count += 1;
        self.total_term_freq += freq as u64;

        if self.doc_buffer_upto == BLOCK_SIZE {
            write_block(&mut self.doc_out, &self.doc_delta_buffer, &mut self.scratch)?;
            if self.caps.has_freqs() {
                write_block(&mut self.doc_out, &self.freq_buffer, &mut self.scratch)?;
            }
            // doc_buffer_upto stays at BLOCK_SIZE; finish_doc snapshots the
            // block boundary and resets it.
        }

        self.last_doc_id = doc_id;
        self.last_position = 0;
        self.last_start_offset = 0;
        Ok(())
    }

    pub fn add_position(
        &mut self,
        position: u32,
        payload: Option<&[u8]>,
        offsets: Option<(u32, u32)>,
    ) -> Result<()> {
        self.pos_delta_buffer[self.pos_buffer_upto] = position - self.last_position;
        if self.caps.payloads {
            let payload = payload.unwrap_or(&[]);
            self.payload_length_buffer[self.pos_buffer_upto] = payload.len() as u32;
            self.payload_bytes.extend_from_slice(payload);
        }
        if self.caps.has_offsets() {
            let (start, end) = offsets.unwrap_or((self.last_start_offset, self.last_start_offset));
            self.offset_start_delta_buffer[self.pos_buffer_upto] = start - self.last_start_offset;
            self.offset_length_buffer[self.pos_buffer_upto] = end - start;
            self.last_start_offset = start;
        }
        self.last_position = position;
        self.pos_buffer_upto += 1;

        if self.pos_buffer_upto == BLOCK_SIZE {
            let pos_out = self.pos_out.as_mut().expect("field has no positions");
            write_block(pos_out, &self.pos_delta_buffer, &mut self.scratch)?;
            if self.caps.payloads {
                let pay_out = self.pay_out.as_mut().expect("field has no pay stream");
                write_block(pay_out, &self.payload_length_buffer, &mut self.scratch)?;
                pay_out.write_vint(self.payload_bytes.len() as u32)?;
                pay_out.write_bytes(&self.payload_bytes)?;
                self.payload_bytes.clear();
            }
            if self.caps.has_offsets() {
                let pay_out = self.pay_out.as_mut().expect("field has no pay stream");
                write_block(pay_out, &self.offset_start_delta_buffer, &mut self.scratch)?;
                write_block(pay_out, &self.offset_length_buffer, &mut self.scratch)?;
            }
            self.pos_buffer_upto = 0;
        }
        Ok(())
    }

    pub fn finish_doc(&mut self) {
        if self.doc_buffer_upto == BLOCK_SIZE {
            self.last_block_doc_id = self.last_doc_id as i64;
            if let Some(pos_out) = &self.pos_out {
                self.last_block_pos_fp = pos_out.file_pointer();
                self.last_block_pos_buffer_upto = self.pos_buffer_upto as u32;
                self.last_block_payload_byte_upto = self.payload_bytes.len() as u32;
            }
            if let Some(pay_out) = &self.pay_out {
                self.last_block_pay_fp = pay_out.file_pointer();
            }
            self.doc_buffer_upto = 0;
        }
    }

    /// Complete the term, filling `state` with its metadata.
    pub fn finish_term(&mut self, state: &mut BlockTermState) -> Result<()> {
        debug_assert!(self.doc_count > 0);

        let singleton = if self.doc_count == 1 {
            // One posting: inline the doc id into the term dictionary and
            // write nothing to the doc stream.
            Some(self.doc_delta_buffer[0])
        } else {
            for i in 0..self.doc_buffer_upto {
                let delta = self.doc_delta_buffer[i];
                if self.caps.has_freqs() {
                    let freq = self.freq_buffer[i];
                    if freq == 1 {
                        self.doc_out.write_vint((delta << 1) | 1)?;
                    } else {
                        self.doc_out.write_vint(delta << 1)?;
                        self.doc_out.write_vint(freq)?;
                    }
                } else {
                    self.doc_out.write_vint(delta)?;
                }
            }
            None
        };

        let mut last_pos_block_offset = None;
        if self.caps.has_positions() {
            let pos_out = self.pos_out.as_mut().expect("field has no positions");
            if self.total_term_freq > BLOCK_SIZE as u64 {
                last_pos_block_offset = Some(pos_out.file_pointer() - self.pos_start_fp);
            }
            if self.pos_buffer_upto > 0 {
                // vInt tail: payload bytes ride inline here, unlike full
                // blocks which put them in the pay stream.
                let mut last_payload_length: i64 = -1;
                let mut last_offset_length: i64 = -1;
                let mut payload_cursor = 0usize;
                for i in 0..self.pos_buffer_upto {
                    let delta = self.pos_delta_buffer[i];
                    if self.caps.payloads {
                        let len = self.payload_length_buffer[i];
                        if len as i64 != last_payload_length {
                            last_payload_length = len as i64;
                            pos_out.write_vint((delta << 1) | 1)?;
                            pos_out.write_vint(len)?;
                        } else {
                            pos_out.write_vint(delta << 1)?;
                        }
                        if len > 0 {
                            pos_out
                                .write_bytes(&self.payload_bytes[payload_cursor..payload_cursor + len as usize])?;
                            payload_cursor += len as usize;
                        }
                    } else {
                        pos_out.write_vint(delta)?;
                    }
                    if self.caps.has_offsets() {
                        let start_delta = self.offset_start_delta_buffer[i];
                        let length = self.offset_length_buffer[i];
                        if length as i64 != last_offset_length {
                            last_offset_length = length as i64;
                            pos_out.write_vint((start_delta << 1) | 1)?;
                            pos_out.write_vint(length)?;
                        } else {
                            pos_out.write_vint(start_delta << 1)?;
                        }
                    }
                }
                self.pos_buffer_upto = 0;
                self.payload_bytes.clear();
            }
        }

        let skip_offset = if self.doc_count > BLOCK_SIZE as u32 {
            Some(self.skip_writer.write_skip(&mut self.doc_out)? - self.doc_start_fp)
        } else {
            None
        };

        state.doc_freq = self.doc_count;
        state.total_term_freq = self.total_term_freq;
        state.doc_start_fp = self.doc_start_fp;
        state.pos_start_fp = self.pos_start_fp;
        state.pay_start_fp = self.pay_start_fp;
        state.singleton_doc_id = singleton;
        state.skip_offset = skip_offset;
        state.last_pos_block_offset = last_pos_block_offset;
        Ok(())
    }

    /// Seal all streams with checksum footers.
    pub fn close(mut self) -> Result<()> {
        format::write_footer(&mut self.doc_out)?;
        self.doc_out.close()?;
        if let Some(mut out) = self.pos_out.take() {
            format::write_footer(&mut out)?;
            out.close()?;
        }
        if let Some(mut out) = self.pay_out.take() {
            format::write_footer(&mut out)?;
            out.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::IndexOptions;

    #[test]
    fn test_out_of_order_doc_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            PostingsWriter::create(&dir.path().join("terms.doc"), None, None).unwrap();
        writer.set_field(FieldCaps::new(IndexOptions::DocsAndFreqs, false));
        writer.start_term();
        writer.start_doc(5, 1).unwrap();
        writer.finish_doc();
        assert!(matches!(
            writer.start_doc(5, 1),
            Err(Error::DocsOutOfOrder { doc: 5, prev: 5 })
        ));
        writer.start_term();
        writer.start_doc(9, 1).unwrap();
        writer.finish_doc();
        assert!(matches!(
            writer.start_doc(3, 1),
            Err(Error::DocsOutOfOrder { doc: 3, prev: 9 })
        ));
    }

    #[test]
    fn test_singleton_writes_no_doc_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terms.doc");
        let mut writer = PostingsWriter::create(&path, None, None).unwrap();
        writer.set_field(FieldCaps::new(IndexOptions::DocsAndFreqs, false));

        writer.start_term();
        let fp_before = writer.doc_out.file_pointer();
        writer.start_doc(42, 3).unwrap();
        writer.finish_doc();
        let mut state = BlockTermState::default();
        writer.finish_term(&mut state).unwrap();
        assert_eq!(writer.doc_out.file_pointer(), fp_before);
        assert_eq!(state.singleton_doc_id, Some(42));
        assert_eq!(state.total_term_freq, 3);
        assert_eq!(state.skip_offset, None);
        writer.close().unwrap();
    }

    #[test]
    fn test_skip_data_only_past_one_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terms.doc");
        let mut writer = PostingsWriter::create(&path, None, None).unwrap();
        writer.set_field(FieldCaps::new(IndexOptions::DocsAndFreqs, false));

        // Exactly one block: no skip data.
        writer.start_term();
        for doc in 0..BLOCK_SIZE as u32 {
            writer.start_doc(doc, 1).unwrap();
            writer.finish_doc();
        }
        let mut state = BlockTermState::default();
        writer.finish_term(&mut state).unwrap();
        assert_eq!(state.skip_offset, None);
        assert_eq!(state.doc_freq, BLOCK_SIZE as u32);

        // One past the block: skip data appears.
        writer.start_term();
        for doc in 0..=BLOCK_SIZE as u32 {
            writer.start_doc(doc * 2, 1).unwrap();
            writer.finish_doc();
        }
        let mut state = BlockTermState::default();
        writer.finish_term(&mut state).unwrap();
        assert!(state.skip_offset.is_some());
        writer.close().unwrap();
    }
}
