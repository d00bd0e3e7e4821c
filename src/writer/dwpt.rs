//! Per-thread document writer: one in-memory segment under construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::segment::{LiveDocs, SegmentMeta};
use crate::writer::chain::{ChainFailure, IndexingChain, TermsHashChain};
use crate::writer::delete_queue::{BufferedDeletes, DeleteOp, DeleteQueue, DeleteSlice, FrozenDeletes};
use crate::writer::document::{Document, Term};

/// Per-document result of [`DocumentsWriterPerThread::update_document`].
///
/// Fatal conditions come back as `Err`; a rejected document is a normal,
/// recoverable outcome that only affects that document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocOutcome {
    Indexed,
    /// The document was excluded (deleted by id); siblings are intact.
    Rejected(String),
}

/// Everything a completed flush hands to publication.
pub struct FlushedSegment {
    pub meta: SegmentMeta,
    pub live: LiveDocs,
    /// Term/query deletes buffered in this DWPT, to be resolved against
    /// the new segment at publication time.
    pub private_deletes: FrozenDeletes,
}

pub struct DocumentsWriterPerThread {
    segment_name: String,
    chain: Box<dyn IndexingChain>,
    pending: BufferedDeletes,
    pub(crate) delete_slice: DeleteSlice,
    delete_queue: Arc<DeleteQueue>,
    num_docs_in_ram: u32,
    aborted: bool,
}

impl DocumentsWriterPerThread {
    pub fn new(segment_name: String, delete_queue: Arc<DeleteQueue>) -> Self {
        let delete_slice = delete_queue.new_slice();
        Self {
            segment_name,
            chain: Box::new(TermsHashChain::new()),
            pending: BufferedDeletes::default(),
            delete_slice,
            delete_queue,
            num_docs_in_ram: 0,
            aborted: false,
        }
    }

    pub fn segment_name(&self) -> &str {
        &self.segment_name
    }

    /// The delete queue this DWPT's slice reads from. After a full-flush
    /// queue swap this can differ from the writer's current queue.
    pub fn queue(&self) -> &Arc<DeleteQueue> {
        &self.delete_queue
    }

    /// The private delete slice, handed to the ticket queue so the global
    /// freeze and this DWPT's view cut at the same point.
    pub fn delete_slice_mut(&mut self) -> &mut DeleteSlice {
        &mut self.delete_slice
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs_in_ram
    }

    pub fn bytes_used(&self) -> u64 {
        self.chain.bytes_used() + self.pending.bytes_used()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Run the indexing chain for one document, then apply the delete
    /// slice so the document becomes visible exactly after the deletes
    /// that preceded it.
    pub fn update_document(
        &mut self,
        doc: &Document,
        del_term: Option<Term>,
    ) -> Result<DocOutcome> {
        if self.aborted {
            return Err(Error::Aborted("writer thread already aborted".into()));
        }
        let doc_id = self.num_docs_in_ram;
        let outcome = match self.chain.process_document(doc, doc_id) {
            Ok(()) => DocOutcome::Indexed,
            Err(ChainFailure::Rejected(reason)) => {
                // The document is half-indexed at most; deleting it by id
                // keeps per-document atomicity without touching siblings.
                log::debug!(
                    "rejecting doc {doc_id} in {}: {reason}",
                    self.segment_name
                );
                self.pending.add_doc_id(doc_id);
                DocOutcome::Rejected(reason)
            }
            Err(ChainFailure::Aborted(err)) => {
                self.aborted = true;
                return Err(err);
            }
        };
        self.finish_document(del_term);
        Ok(outcome)
    }

    /// Apply the delete slice and count the document. Deletes picked up
    /// here bound at the current doc id, so they affect prior documents
    /// but never this one.
    fn finish_document(&mut self, del_term: Option<Term>) {
        let moved = match del_term {
            Some(term) => {
                self.delete_queue
                    .add_and_update(DeleteOp::Term(term), &mut self.delete_slice);
                true
            }
            None => self.delete_queue.update_slice(&mut self.delete_slice),
        };
        if moved {
            self.delete_slice.apply(&mut self.pending, self.num_docs_in_ram);
        }
        self.num_docs_in_ram += 1;
    }

    /// Serialize the in-memory segment. Returns `None` when the DWPT was
    /// aborted (nothing to publish); `Err` is a flush failure whose partial
    /// files the caller must clean up.
    pub fn flush(&mut self, dir: &Path) -> Result<Option<FlushedSegment>> {
        if self.aborted {
            return Ok(None);
        }
        debug_assert!(self.num_docs_in_ram > 0, "flushing an empty segment");

        // Catch deletes that arrived since the last finish_document; the
        // freeze at ticket creation already extended our slice to the cut.
        self.delete_slice
            .apply(&mut self.pending, self.num_docs_in_ram);

        let mut live = LiveDocs::new(self.num_docs_in_ram);
        for doc_id in std::mem::take(&mut self.pending.doc_ids) {
            live.delete(doc_id);
        }

        log::debug!(
            "flushing {}: {} docs, {} bytes buffered",
            self.segment_name,
            self.num_docs_in_ram,
            self.bytes_used()
        );
        let meta = self
            .chain
            .flush(dir, &self.segment_name, self.num_docs_in_ram)?;

        Ok(Some(FlushedSegment {
            meta,
            live,
            private_deletes: self.pending.freeze(),
        }))
    }

    /// Best-effort discard. Returns files the chain may already have
    /// created so the caller can schedule their removal.
    pub fn abort(&mut self, dir: &Path) -> Vec<PathBuf> {
        self.aborted = true;
        self.chain.abort();
        self.pending.clear();
        let seg_dir = dir.join("segments").join(&self.segment_name);
        ["terms.dict", "terms.doc", "terms.pos", "terms.pay", "livedocs.bin"]
            .iter()
            .map(|f| seg_dir.join(f))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::IndexOptions;
    use crate::writer::document::{FieldValue, Token};
    use crate::codec::FieldCaps;

    fn doc(text: &str) -> Document {
        let mut d = Document::new();
        d.add_text("body", IndexOptions::DocsAndFreqs, text);
        d
    }

    #[test]
    fn test_rejected_doc_is_deleted_by_id() {
        let queue = Arc::new(DeleteQueue::new(0));
        let mut dwpt = DocumentsWriterPerThread::new("seg_0000".into(), queue);
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(dwpt.update_document(&doc("good one"), None).unwrap(), DocOutcome::Indexed);

        let mut bad = Document::new();
        bad.add_field(FieldValue {
            name: "body".to_string(),
            caps: FieldCaps::new(IndexOptions::DocsAndFreqs, false),
            tokens: vec![Token::new("", 0)],
        });
        assert!(matches!(
            dwpt.update_document(&bad, None).unwrap(),
            DocOutcome::Rejected(_)
        ));
        assert_eq!(dwpt.update_document(&doc("still fine"), None).unwrap(), DocOutcome::Indexed);
        assert_eq!(dwpt.num_docs(), 3);

        let flushed = dwpt.flush(dir.path()).unwrap().unwrap();
        assert_eq!(flushed.meta.max_doc, 3);
        assert_eq!(flushed.live.num_live(), 2);
        assert!(!flushed.live.is_live(1));
    }

    #[test]
    fn test_own_delete_term_spares_the_document() {
        let queue = Arc::new(DeleteQueue::new(0));
        let mut dwpt = DocumentsWriterPerThread::new("seg_0000".into(), queue.clone());

        dwpt.update_document(&doc("id1 v1"), None).unwrap();
        // Doc 1 deletes prior docs with its term but not itself.
        dwpt.update_document(&doc("id1 v2"), Some(Term::new("body", "id1")))
            .unwrap();

        assert_eq!(dwpt.pending.terms.len(), 1);
        assert_eq!(dwpt.pending.terms[&Term::new("body", "id1")], 1);
    }
}
