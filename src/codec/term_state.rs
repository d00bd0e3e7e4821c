//! Per-term postings metadata.

use crate::codec::FieldCaps;
use crate::error::Result;
use crate::store::{IndexInput, IndexOutput};

/// Where one term's postings live and how much there is.
///
/// Built once by the postings writer at flush time and used by the reader
/// to seed an enumerator. File pointers are encoded in the term dictionary
/// as deltas against the previous term; an `absolute` flag at dictionary
/// block starts resets the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockTermState {
    pub doc_freq: u32,
    pub total_term_freq: u64,
    pub doc_start_fp: u64,
    pub pos_start_fp: u64,
    pub pay_start_fp: u64,
    /// When `doc_freq == 1` the single doc id is inlined here and nothing
    /// is written to the doc stream for this term.
    pub singleton_doc_id: Option<u32>,
    /// Offset of skip data relative to `doc_start_fp`; present only when
    /// `doc_freq` exceeds one block.
    pub skip_offset: Option<u64>,
    /// Offset (relative to `pos_start_fp`) of the vInt position tail;
    /// present only when `total_term_freq` exceeds one block.
    pub last_pos_block_offset: Option<u64>,
}

const FLAG_SINGLETON: u8 = 1;
const FLAG_SKIP: u8 = 1 << 1;
const FLAG_LAST_POS_BLOCK: u8 = 1 << 2;

impl BlockTermState {
    /// Serialize against `prev`. With `absolute` set, file pointers are
    /// written in full instead of as deltas.
    pub fn encode(
        &self,
        out: &mut IndexOutput,
        prev: &BlockTermState,
        absolute: bool,
        caps: FieldCaps,
    ) -> Result<()> {
        let mut flags = 0u8;
        if self.singleton_doc_id.is_some() {
            flags |= FLAG_SINGLETON;
        }
        if self.skip_offset.is_some() {
            flags |= FLAG_SKIP;
        }
        if self.last_pos_block_offset.is_some() {
            flags |= FLAG_LAST_POS_BLOCK;
        }
        out.write_u8(flags)?;
        out.write_vint(self.doc_freq)?;
        if caps.has_freqs() {
            out.write_vlong(self.total_term_freq - self.doc_freq as u64)?;
        }
        match self.singleton_doc_id {
            Some(doc) => out.write_vint(doc)?,
            None => {
                if absolute {
                    out.write_vlong(self.doc_start_fp)?;
                } else {
                    out.write_vlong(self.doc_start_fp - prev.doc_start_fp)?;
                }
            }
        }
        if caps.has_positions() {
            if absolute {
                out.write_vlong(self.pos_start_fp)?;
            } else {
                out.write_vlong(self.pos_start_fp - prev.pos_start_fp)?;
            }
            if let Some(off) = self.last_pos_block_offset {
                out.write_vlong(off)?;
            }
            if caps.has_pay_stream() {
                if absolute {
                    out.write_vlong(self.pay_start_fp)?;
                } else {
                    out.write_vlong(self.pay_start_fp - prev.pay_start_fp)?;
                }
            }
        }
        if let Some(off) = self.skip_offset {
            out.write_vlong(off)?;
        }
        Ok(())
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn decode(
        input: &mut IndexInput,
        prev: &BlockTermState,
        absolute: bool,
        caps: FieldCaps,
    ) -> Result<BlockTermState> {
        let flags = input.read_u8()?;
        let doc_freq = input.read_vint()?;
        let total_term_freq = if caps.has_freqs() {
            input.read_vlong()? + doc_freq as u64
        } else {
            doc_freq as u64
        };
        let mut state = BlockTermState {
            doc_freq,
            total_term_freq,
            doc_start_fp: prev.doc_start_fp,
            pos_start_fp: prev.pos_start_fp,
            pay_start_fp: prev.pay_start_fp,
            singleton_doc_id: None,
            skip_offset: None,
            last_pos_block_offset: None,
        };
        if flags & FLAG_SINGLETON != 0 {
            state.singleton_doc_id = Some(input.read_vint()?);
        } else if absolute {
            state.doc_start_fp = input.read_vlong()?;
        } else {
            state.doc_start_fp = prev.doc_start_fp + input.read_vlong()?;
        }
        if caps.has_positions() {
            if absolute {
                state.pos_start_fp = input.read_vlong()?;
            } else {
                state.pos_start_fp = prev.pos_start_fp + input.read_vlong()?;
            }
            if flags & FLAG_LAST_POS_BLOCK != 0 {
                state.last_pos_block_offset = Some(input.read_vlong()?);
            }
            if caps.has_pay_stream() {
                if absolute {
                    state.pay_start_fp = input.read_vlong()?;
                } else {
                    state.pay_start_fp = prev.pay_start_fp + input.read_vlong()?;
                }
            }
        }
        if flags & FLAG_SKIP != 0 {
            state.skip_offset = Some(input.read_vlong()?);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::IndexOptions;

    #[test]
    fn test_delta_chain_roundtrip() {
        let caps = FieldCaps::new(IndexOptions::DocsAndFreqsAndPositions, false);
        let states = [
            BlockTermState {
                doc_freq: 300,
                total_term_freq: 500,
                doc_start_fp: 0,
                pos_start_fp: 0,
                skip_offset: Some(77),
                last_pos_block_offset: Some(12),
                ..Default::default()
            },
            // Singleton: writes no doc pointer, inherits the chain value.
            BlockTermState {
                doc_freq: 1,
                total_term_freq: 4,
                doc_start_fp: 0,
                pos_start_fp: 1000,
                singleton_doc_id: Some(42),
                ..Default::default()
            },
            BlockTermState {
                doc_freq: 10,
                total_term_freq: 11,
                doc_start_fp: 950,
                pos_start_fp: 1400,
                ..Default::default()
            },
        ];

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ts.bin");
        let mut out = IndexOutput::create(&path).unwrap();
        let mut prev = BlockTermState::default();
        for (i, s) in states.iter().enumerate() {
            s.encode(&mut out, &prev, i == 0, caps).unwrap();
            prev = s.clone();
        }
        out.close().unwrap();

        let mut input = IndexInput::open(&path).unwrap();
        let mut prev = BlockTermState::default();
        for (i, expected) in states.iter().enumerate() {
            let got = BlockTermState::decode(&mut input, &prev, i == 0, caps).unwrap();
            assert_eq!(&got, expected);
            prev = got;
        }
    }
}
