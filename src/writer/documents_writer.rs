//! Flush coordinator: routes documents to DWPTs, runs flushes, and
//! publishes segments in ticket order.

use rayon::prelude::*;
use roaring::RoaringBitmap;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Error, Result};
use crate::segment::{SegmentReader, SegmentRegistry, segment_name};
use crate::writer::WriterConfig;
use crate::writer::delete_queue::{DeleteOp, DeleteQuery, DeleteQueue, FrozenDeletes};
use crate::writer::document::{Document, Term};
use crate::writer::dwpt::{DocOutcome, DocumentsWriterPerThread, FlushedSegment};
use crate::writer::flush_control::FlushControl;
use crate::writer::pool::ThreadPool;
use crate::writer::tickets::{TicketPayload, TicketQueue};

thread_local! {
    /// Slot this thread used last; reusing it keeps a thread's documents
    /// concentrated in one DWPT.
    static LAST_SLOT: Cell<Option<usize>> = const { Cell::new(None) };
}

/// The concurrent document-admission front end for one index directory.
pub struct DocumentsWriter {
    dir: PathBuf,
    registry: Arc<SegmentRegistry>,
    delete_queue: RwLock<Arc<DeleteQueue>>,
    pool: ThreadPool,
    flush_control: FlushControl,
    tickets: TicketQueue,
    seg_counter: AtomicU64,
    closed: AtomicBool,
    full_flush_lock: Mutex<()>,
}

impl DocumentsWriter {
    pub fn create(dir: &Path, config: WriterConfig) -> Result<Self> {
        let registry = Arc::new(SegmentRegistry::create(dir)?);
        Ok(Self {
            dir: dir.to_path_buf(),
            registry,
            delete_queue: RwLock::new(Arc::new(DeleteQueue::new(0))),
            pool: ThreadPool::new(config.max_thread_states),
            flush_control: FlushControl::new(config),
            tickets: TicketQueue::new(),
            seg_counter: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            full_flush_lock: Mutex::new(()),
        })
    }

    pub fn registry(&self) -> &Arc<SegmentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &WriterConfig {
        self.flush_control.config()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn current_queue(&self) -> Arc<DeleteQueue> {
        self.delete_queue.read().unwrap().clone()
    }

    fn new_dwpt(&self) -> DocumentsWriterPerThread {
        let n = self.seg_counter.fetch_add(1, Ordering::Relaxed);
        DocumentsWriterPerThread::new(segment_name(n), self.current_queue())
    }

    pub fn update_document(&self, doc: &Document, del_term: Option<Term>) -> Result<DocOutcome> {
        let mut outcomes = self.update_documents(std::slice::from_ref(doc), del_term)?;
        Ok(outcomes.pop().expect("one outcome per document"))
    }

    /// Index a block of documents atomically on one DWPT. `del_term`
    /// applies once, bounded after the last document of the block.
    pub fn update_documents(
        &self,
        docs: &[Document],
        del_term: Option<Term>,
    ) -> Result<Vec<DocOutcome>> {
        self.ensure_open()?;
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        // Cooperative flushing: help drain the backlog before adding work.
        self.flush_pending_dwpts()?;
        self.flush_control.wait_if_stalled();

        let preferred = LAST_SLOT.with(|c| c.get());
        let mut state = self.pool.acquire(preferred);
        LAST_SLOT.with(|c| c.set(Some(state.index)));

        // A flagged DWPT takes no more documents; pull it out and flush it
        // after the slot is released.
        let mut pulled = None;
        if self.flush_control.is_pending(state.index)
            && let Some(dwpt) = state.dwpt.take()
        {
            let bytes = self.flush_control.checkout_for_flush(state.index);
            pulled = Some((dwpt, bytes));
        }
        if state.dwpt.is_none() {
            state.dwpt = Some(self.new_dwpt());
        }
        let dwpt = state.dwpt.as_mut().unwrap();

        let mut outcomes = Vec::with_capacity(docs.len());
        let mut fatal = None;
        let last = docs.len() - 1;
        for (i, doc) in docs.iter().enumerate() {
            let dt = if i == last { del_term.clone() } else { None };
            match dwpt.update_document(doc, dt) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    fatal = Some(e);
                    break;
                }
            }
        }

        if let Some(err) = fatal {
            // Aborting failure: this DWPT's buffered documents are gone.
            log::warn!("aborting {}: {err}", dwpt.segment_name());
            let files = dwpt.abort(&self.dir);
            state.dwpt = None;
            let bytes = self.flush_control.checkout_for_flush(state.index);
            self.flush_control.after_flush(bytes);
            self.pool.release(state);
            self.registry.files().schedule_delete(files);
            self.registry.files().delete_pending();
            if let Some((dwpt, bytes)) = pulled
                && let Err(secondary) = self.flush_one(dwpt, bytes)
            {
                log::warn!("secondary flush failure while aborting: {secondary}");
            }
            return Err(err);
        }

        let bytes = dwpt.bytes_used();
        let num_docs = dwpt.num_docs();
        self.flush_control.after_insert(state.index, bytes, num_docs);
        if del_term.is_some() {
            self.flush_control
                .set_delete_bytes(self.current_queue().bytes_used());
        }
        self.pool.release(state);

        if let Some((dwpt, bytes)) = pulled {
            self.flush_one(dwpt, bytes)?;
        }
        self.flush_pending_dwpts()?;
        Ok(outcomes)
    }

    pub fn delete_term(&self, term: Term) -> Result<()> {
        self.delete(DeleteOp::Term(term))
    }

    pub fn delete_query(&self, query: Arc<dyn DeleteQuery>) -> Result<()> {
        self.delete(DeleteOp::Query(query))
    }

    fn delete(&self, op: DeleteOp) -> Result<()> {
        self.ensure_open()?;
        let queue = self.current_queue();
        queue.add(op);
        self.flush_control.set_delete_bytes(queue.bytes_used());
        self.flush_control.after_delete();
        self.flush_pending_dwpts()
    }

    /// Drain every DWPT currently flagged pending-flush.
    fn flush_pending_dwpts(&self) -> Result<()> {
        while let Some((dwpt, bytes)) = self.next_pending_flush() {
            self.flush_one(dwpt, bytes)?;
        }
        Ok(())
    }

    fn next_pending_flush(&self) -> Option<(DocumentsWriterPerThread, u64)> {
        for i in 0..self.pool.size() {
            if !self.flush_control.is_pending(i) {
                continue;
            }
            let mut state = self.pool.acquire_specific(i);
            // Re-check: the owner may have pulled it while we waited.
            let candidate = if self.flush_control.is_pending(i) {
                let dwpt = state.dwpt.take();
                let bytes = self.flush_control.checkout_for_flush(i);
                dwpt.map(|d| (d, bytes))
            } else {
                None
            };
            self.pool.release(state);
            if let Some((dwpt, bytes)) = candidate {
                if dwpt.num_docs() > 0 && !dwpt.is_aborted() {
                    return Some((dwpt, bytes));
                }
                self.flush_control.after_flush(bytes);
            }
        }
        None
    }

    /// Flush one DWPT: acquire a ticket (fixing publication order), run
    /// the flush with no global lock held, then complete the ticket.
    fn flush_one(&self, mut dwpt: DocumentsWriterPerThread, bytes: u64) -> Result<()> {
        let queue = dwpt.queue().clone();
        let ticket = self
            .tickets
            .add_flush_ticket(&queue, Some(&mut dwpt.delete_slice));

        match dwpt.flush(&self.dir) {
            Ok(segment) => {
                self.tickets.complete(&ticket, segment);
                self.flush_control.after_flush(bytes);
            }
            Err(err) => {
                // The ticket still publishes its frozen deletes.
                log::warn!("flush of {} failed: {err}", dwpt.segment_name());
                self.tickets.complete(&ticket, None);
                let files = dwpt.abort(&self.dir);
                self.registry.files().schedule_delete(files);
                self.registry.files().delete_pending();
                self.flush_control.after_flush(bytes);
                if let Err(purge_err) = self.purge_tickets(false) {
                    log::warn!("purge after failed flush also failed: {purge_err}");
                }
                return Err(err);
            }
        }

        // Backpressure valve: an unpurged backlog as large as the thread
        // pool forces synchronous publication.
        if self.tickets.len() >= self.pool.size() {
            self.purge_tickets(true)?;
        } else {
            self.purge_tickets(false)?;
        }
        Ok(())
    }

    fn purge_tickets(&self, blocking: bool) -> Result<usize> {
        self.tickets.purge(blocking, |payload| self.publish(payload))
    }

    /// Publish one ticket: global deletes first, then the segment with its
    /// private deletes, then checkpoint.
    fn publish(&self, payload: TicketPayload) -> Result<()> {
        if !payload.frozen.is_empty() {
            self.apply_global_deletes(&payload.frozen)?;
        }
        if let Some(flushed) = payload.segment {
            let FlushedSegment {
                meta,
                mut live,
                private_deletes,
            } = flushed;
            if !private_deletes.is_empty() {
                // Segment-private deletes resolve against the segment they
                // were buffered in, bounded by each op's doc id.
                let reader =
                    SegmentReader::open_with_deleted(&self.dir, &meta, RoaringBitmap::new())?;
                for (term, upto) in &private_deletes.terms {
                    for doc in reader.term_docs_unfiltered(&term.field, &term.text)? {
                        if doc < *upto {
                            live.delete(doc);
                        }
                    }
                }
                for (query, upto) in &private_deletes.queries {
                    for doc in query.matching_docs(&reader)? {
                        if doc < *upto {
                            live.delete(doc);
                        }
                    }
                }
            }
            self.registry.publish(meta, live);
        }
        self.registry.checkpoint()
    }

    /// Global deletes apply in full to every previously published segment.
    fn apply_global_deletes(&self, frozen: &FrozenDeletes) -> Result<()> {
        for meta in self.registry.segment_metas() {
            let reader = SegmentReader::open_with_deleted(&self.dir, &meta, RoaringBitmap::new())?;
            let mut to_delete = RoaringBitmap::new();
            for (term, _) in &frozen.terms {
                to_delete |= reader.term_docs_unfiltered(&term.field, &term.text)?;
            }
            for (query, _) in &frozen.queries {
                to_delete |= query.matching_docs(&reader)?;
            }
            if !to_delete.is_empty() {
                let newly = self.registry.delete_docs(&meta.name, &to_delete);
                log::debug!("applied {newly} global deletes to {}", meta.name);
            }
        }
        Ok(())
    }

    /// Full flush: swap in a fresh delete queue, flush every active DWPT,
    /// and force-purge so nothing is left in flight.
    pub fn flush_all(&self) -> Result<()> {
        self.ensure_open()?;
        self.flush_all_inner()
    }

    fn flush_all_inner(&self) -> Result<()> {
        let _full = self.full_flush_lock.lock().unwrap();
        log::info!("full flush requested");

        // From here on, newly admitted documents see only the new queue.
        let old_queue = {
            let mut queue = self.delete_queue.write().unwrap();
            let old = queue.clone();
            *queue = Arc::new(DeleteQueue::new(old.generation() + 1));
            old
        };
        self.flush_control.set_delete_bytes(0);

        let mut pulled = Vec::new();
        for i in 0..self.pool.size() {
            let mut state = self.pool.acquire_specific(i);
            if let Some(dwpt) = state.dwpt.take() {
                let bytes = self.flush_control.checkout_for_flush(i);
                if dwpt.num_docs() > 0 && !dwpt.is_aborted() {
                    pulled.push((dwpt, bytes));
                } else {
                    self.flush_control.after_flush(bytes);
                }
            } else if self.flush_control.is_pending(i) {
                let bytes = self.flush_control.checkout_for_flush(i);
                self.flush_control.after_flush(bytes);
            }
            self.pool.release(state);
        }

        // Tickets are acquired in order up front; flush I/O then runs in
        // parallel, and publication still follows ticket order.
        let jobs: Vec<_> = pulled
            .into_iter()
            .map(|(mut dwpt, bytes)| {
                let queue = dwpt.queue().clone();
                let ticket = self
                    .tickets
                    .add_flush_ticket(&queue, Some(&mut dwpt.delete_slice));
                (dwpt, ticket, bytes)
            })
            .collect();

        let errors: Vec<Error> = jobs
            .into_par_iter()
            .filter_map(|(mut dwpt, ticket, bytes)| {
                let failure = match dwpt.flush(&self.dir) {
                    Ok(segment) => {
                        self.tickets.complete(&ticket, segment);
                        None
                    }
                    Err(err) => {
                        log::warn!("flush of {} failed: {err}", dwpt.segment_name());
                        self.tickets.complete(&ticket, None);
                        let files = dwpt.abort(&self.dir);
                        self.registry.files().schedule_delete(files);
                        Some(err)
                    }
                };
                self.flush_control.after_flush(bytes);
                failure
            })
            .collect();

        // Deletes issued against the old queue after its last DWPT froze
        // still need a carrier.
        let straggler = self.tickets.add_flush_ticket(&old_queue, None);
        self.tickets.complete(&straggler, None);

        self.purge_tickets(true)?;
        self.registry.files().delete_pending();

        match errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Abort every DWPT, discarding all buffered documents. Walks every
    /// thread state and guarantees each slot is released again even when
    /// individual aborts misbehave; abort itself never fails.
    pub fn abort_all(&self) {
        let _full = self.full_flush_lock.lock().unwrap();
        log::warn!("aborting all thread states");
        for i in 0..self.pool.size() {
            let mut state = self.pool.acquire_specific(i);
            if let Some(mut dwpt) = state.dwpt.take() {
                let files = dwpt.abort(&self.dir);
                self.registry.files().schedule_delete(files);
            }
            let bytes = self.flush_control.checkout_for_flush(i);
            self.flush_control.after_flush(bytes);
            self.pool.release(state);
        }
        self.registry.files().delete_pending();
        if let Err(err) = self.purge_tickets(false) {
            log::warn!("purge during abort failed: {err}");
        }
    }

    /// Flush everything and refuse further updates.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.flush_all_inner()
    }

    pub fn num_published_docs(&self) -> u64 {
        self.registry.num_docs()
    }

    pub fn num_published_segments(&self) -> usize {
        self.registry.num_segments()
    }
}
