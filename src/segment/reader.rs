//! Read side: one segment, and the whole index.

use rayon::prelude::*;
use roaring::RoaringBitmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::dict::TermDict;
use crate::codec::{Postings, PostingsFlags, SegmentPostingsReader};
use crate::error::{Error, Result};
use crate::segment::{IndexMeta, LiveDocs, SegmentMeta};

/// Open handles over one published segment.
pub struct SegmentReader {
    pub meta: SegmentMeta,
    dict: TermDict,
    postings: SegmentPostingsReader,
    deleted: Arc<RoaringBitmap>,
}

impl SegmentReader {
    /// Open a segment, reading its live-docs bitmap from disk.
    pub fn open(index_dir: &Path, meta: &SegmentMeta) -> Result<Self> {
        let live = LiveDocs::load(&meta.live_docs_path(index_dir), meta.max_doc)?;
        Self::open_with_deleted(index_dir, meta, live.deleted().clone())
    }

    /// Open a segment with an explicit deletion set (used at publication
    /// time, before live docs are checkpointed).
    pub fn open_with_deleted(
        index_dir: &Path,
        meta: &SegmentMeta,
        deleted: RoaringBitmap,
    ) -> Result<Self> {
        let dict = TermDict::open(&meta.dict_path(index_dir))?;
        let postings = SegmentPostingsReader::open(
            &meta.doc_path(index_dir),
            meta.pos_path(index_dir).as_deref(),
            meta.pay_path(index_dir).as_deref(),
        )?;
        Ok(Self {
            meta: meta.clone(),
            dict,
            postings,
            deleted: Arc::new(deleted),
        })
    }

    pub fn num_docs(&self) -> u32 {
        self.meta.max_doc - self.deleted.len() as u32
    }

    pub fn max_doc(&self) -> u32 {
        self.meta.max_doc
    }

    pub fn num_deleted(&self) -> u64 {
        self.deleted.len()
    }

    pub fn dict(&self) -> &TermDict {
        &self.dict
    }

    /// Enumerator over one term's postings, or `None` if the term is
    /// absent. Deleted docs are filtered out.
    pub fn postings(
        &self,
        field: &str,
        term: &[u8],
        flags: PostingsFlags,
    ) -> Result<Option<Postings>> {
        let Some(field_terms) = self.dict.field(field) else {
            return Ok(None);
        };
        let caps = field_terms.caps;
        let Some(state) = self.dict.lookup(field, term)? else {
            return Ok(None);
        };
        let deleted = (!self.deleted.is_empty()).then(|| self.deleted.clone());
        Ok(Some(self.postings.postings(caps, &state, flags, deleted)?))
    }

    /// All docs (ignoring deletions) that contain `term`.
    pub fn term_docs_unfiltered(&self, field: &str, term: &[u8]) -> Result<RoaringBitmap> {
        let mut docs = RoaringBitmap::new();
        let Some(field_terms) = self.dict.field(field) else {
            return Ok(docs);
        };
        let caps = field_terms.caps;
        if let Some(state) = self.dict.lookup(field, term)? {
            let mut it = self
                .postings
                .postings(caps, &state, PostingsFlags::DOCS, None)?;
            loop {
                let doc = it.next_doc()?;
                if doc == crate::codec::NO_MORE_DOCS {
                    break;
                }
                docs.insert(doc);
            }
        }
        Ok(docs)
    }

    /// Verify checksums of every stream in this segment.
    pub fn check_integrity(&self) -> Result<()> {
        self.dict.check_integrity()?;
        self.postings.check_integrity()
    }
}

/// Multi-segment read view over an index directory.
pub struct IndexReader {
    dir: PathBuf,
    pub meta: IndexMeta,
    segments: Vec<SegmentReader>,
}

impl IndexReader {
    /// Open all published segments, in parallel.
    pub fn open(dir: &Path) -> Result<Self> {
        let meta_path = dir.join("meta.json");
        if !meta_path.exists() {
            return Err(Error::CorruptIndex(format!(
                "no index at {}: meta.json missing",
                dir.display()
            )));
        }
        let meta: IndexMeta = serde_json::from_reader(File::open(&meta_path)?)
            .map_err(|e| Error::CorruptIndex(format!("bad meta.json: {e}")))?;

        let segments = meta
            .segments
            .par_iter()
            .map(|seg| SegmentReader::open(dir, seg))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            dir: dir.to_path_buf(),
            meta,
            segments,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segments(&self) -> &[SegmentReader] {
        &self.segments
    }

    pub fn num_docs(&self) -> u64 {
        self.segments.iter().map(|s| s.num_docs() as u64).sum()
    }

    pub fn max_doc(&self) -> u64 {
        self.segments.iter().map(|s| s.max_doc() as u64).sum()
    }

    pub fn check_integrity(&self) -> Result<()> {
        for segment in &self.segments {
            segment.check_integrity()?;
        }
        Ok(())
    }
}
