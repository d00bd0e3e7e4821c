//! Writer pipeline integration tests: delete visibility, publication
//! ordering, abort isolation, and the multi-segment end-to-end scenario.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use strata::codec::{IndexOptions, NO_MORE_DOCS, PostingsFlags};
use strata::segment::{IndexReader, SegmentRegistry};
use strata::writer::{
    DeleteQueue, DocOutcome, Document, DocumentsWriter, DocumentsWriterPerThread, Term,
    WriterConfig,
};

fn doc_with_id(id: &str, body: &str) -> Document {
    let mut doc = Document::new();
    doc.add_text("id", IndexOptions::Docs, id);
    doc.add_text("content", IndexOptions::DocsAndFreqs, body);
    doc
}

fn config(max_docs: u32, threads: usize) -> WriterConfig {
    WriterConfig {
        max_thread_states: threads,
        ram_buffer_bytes: 1 << 30,
        max_buffered_docs: max_docs,
        stall_factor: 2.0,
    }
}

fn count_docs_with_term(dir: &Path, field: &str, term: &str) -> u64 {
    let reader = IndexReader::open(dir).unwrap();
    let mut count = 0;
    for segment in reader.segments() {
        if let Some(mut it) = segment
            .postings(field, term.as_bytes(), PostingsFlags::DOCS)
            .unwrap()
        {
            while it.next_doc().unwrap() != NO_MORE_DOCS {
                count += 1;
            }
        }
    }
    count
}

#[test]
fn test_delete_before_document_does_not_touch_it() {
    let dir = tempfile::tempdir().unwrap();
    let writer = DocumentsWriter::create(dir.path(), config(1000, 2)).unwrap();

    // The delete is enqueued first; the document starts (and finishes)
    // after it, so the delete must not remove it.
    writer.delete_term(Term::new("id", "k1")).unwrap();
    writer
        .update_document(&doc_with_id("k1", "survives"), None)
        .unwrap();
    writer.flush_all().unwrap();

    assert_eq!(IndexReader::open(dir.path()).unwrap().num_docs(), 1);
    assert_eq!(count_docs_with_term(dir.path(), "id", "k1"), 1);
}

#[test]
fn test_delete_after_document_removes_it() {
    let dir = tempfile::tempdir().unwrap();
    let writer = DocumentsWriter::create(dir.path(), config(1000, 2)).unwrap();

    writer
        .update_document(&doc_with_id("k1", "old"), None)
        .unwrap();
    writer.delete_term(Term::new("id", "k1")).unwrap();
    writer.flush_all().unwrap();

    assert_eq!(IndexReader::open(dir.path()).unwrap().num_docs(), 0);
}

#[test]
fn test_update_document_replaces_prior_version() {
    let dir = tempfile::tempdir().unwrap();
    let writer = DocumentsWriter::create(dir.path(), config(1000, 2)).unwrap();

    writer
        .update_document(&doc_with_id("k1", "version one"), None)
        .unwrap();
    writer
        .update_document(&doc_with_id("k2", "other"), None)
        .unwrap();
    // Atomic delete-then-add: removes the old k1 but not itself.
    writer
        .update_document(&doc_with_id("k1", "version two"), Some(Term::new("id", "k1")))
        .unwrap();
    writer.flush_all().unwrap();

    let reader = IndexReader::open(dir.path()).unwrap();
    assert_eq!(reader.num_docs(), 2);
    assert_eq!(count_docs_with_term(dir.path(), "id", "k1"), 1);
    assert_eq!(count_docs_with_term(dir.path(), "content", "two"), 1);
    assert_eq!(count_docs_with_term(dir.path(), "content", "one"), 0);
}

#[test]
fn test_delete_applies_across_published_segments() {
    let dir = tempfile::tempdir().unwrap();
    let writer = DocumentsWriter::create(dir.path(), config(1000, 2)).unwrap();

    writer
        .update_document(&doc_with_id("k1", "first segment"), None)
        .unwrap();
    writer.flush_all().unwrap();
    assert_eq!(IndexReader::open(dir.path()).unwrap().num_docs(), 1);

    // The doc now lives in a published segment; a later delete plus flush
    // must reach back into it.
    writer.delete_term(Term::new("id", "k1")).unwrap();
    writer
        .update_document(&doc_with_id("k2", "second segment"), None)
        .unwrap();
    writer.flush_all().unwrap();

    let reader = IndexReader::open(dir.path()).unwrap();
    assert_eq!(reader.num_docs(), 1);
    assert_eq!(count_docs_with_term(dir.path(), "id", "k2"), 1);
}

/// F1 acquires its ticket first but finishes after F2. The
/// published order must still be F1 then F2, and F2's segment-private
/// delete packet is resolved against F2's segment only — F1 sees that
/// delete through its own slice, bounded at its own doc count.
#[test]
fn test_ticket_order_overrides_completion_order() {
    use strata::writer::tickets::TicketQueue;

    let dir = tempfile::tempdir().unwrap();
    let registry = SegmentRegistry::create(dir.path()).unwrap();
    let queue = Arc::new(DeleteQueue::new(0));
    let tickets = TicketQueue::new();

    let mut dwpt1 = DocumentsWriterPerThread::new("seg_0000".into(), queue.clone());
    dwpt1
        .update_document(&doc_with_id("a", "in first"), None)
        .unwrap();

    let mut dwpt2 = DocumentsWriterPerThread::new("seg_0001".into(), queue.clone());
    dwpt2
        .update_document(&doc_with_id("b", "in second"), None)
        .unwrap();
    // An update of key "a": deletes the copy buffered in dwpt1, spares
    // its own replacement document.
    dwpt2
        .update_document(&doc_with_id("a", "shadow"), Some(Term::new("id", "a")))
        .unwrap();

    let t1 = tickets.add_flush_ticket(&queue, Some(dwpt1.delete_slice_mut()));
    let t2 = tickets.add_flush_ticket(&queue, Some(dwpt2.delete_slice_mut()));

    // F2's I/O completes first; nothing may publish while F1 is open.
    let f2 = dwpt2.flush(dir.path()).unwrap();
    tickets.complete(&t2, f2);
    let published_before = tickets
        .purge(false, |_| panic!("t1 is not complete, nothing may publish"))
        .unwrap();
    assert_eq!(published_before, 0);

    let f1 = dwpt1.flush(dir.path()).unwrap();
    tickets.complete(&t1, f1);

    let mut order = Vec::new();
    tickets
        .purge(false, |payload| {
            let flushed = payload.segment.expect("both tickets carry segments");
            order.push(flushed.meta.name.clone());
            // Resolve each segment's private deletes against that segment
            // alone, as publication does.
            let mut live = flushed.live;
            let reader = strata::segment::SegmentReader::open_with_deleted(
                dir.path(),
                &flushed.meta,
                roaring::RoaringBitmap::new(),
            )
            .unwrap();
            for (term, upto) in &flushed.private_deletes.terms {
                for doc in reader.term_docs_unfiltered(&term.field, &term.text).unwrap() {
                    if doc < *upto {
                        live.delete(doc);
                    }
                }
            }
            registry.publish(flushed.meta, live);
            Ok(())
        })
        .unwrap();

    assert_eq!(order, vec!["seg_0000", "seg_0001"]);
    // The old copy of "a" (in F1) is gone; the shadow copy (in F2)
    // survived its own delete's bound.
    assert_eq!(registry.num_docs(), 2);
    registry.checkpoint().unwrap();
    assert_eq!(count_docs_with_term(dir.path(), "id", "a"), 1);
    assert_eq!(count_docs_with_term(dir.path(), "id", "b"), 1);
    assert_eq!(count_docs_with_term(dir.path(), "content", "shadow"), 1);
}

#[test]
fn test_abort_isolation_between_dwpts() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(DeleteQueue::new(0));

    let mut dwpt_a = DocumentsWriterPerThread::new("seg_000a".into(), queue.clone());
    let mut dwpt_b = DocumentsWriterPerThread::new("seg_000b".into(), queue.clone());

    for i in 0..10 {
        dwpt_a
            .update_document(&doc_with_id(&format!("a{i}"), "doomed"), None)
            .unwrap();
        dwpt_b
            .update_document(&doc_with_id(&format!("b{i}"), "kept"), None)
            .unwrap();
    }

    let _files = dwpt_a.abort(dir.path());
    assert!(dwpt_a.is_aborted());
    assert!(dwpt_a.flush(dir.path()).unwrap().is_none());

    // B is unaffected and still flushable.
    let flushed = dwpt_b.flush(dir.path()).unwrap().unwrap();
    assert_eq!(flushed.meta.max_doc, 10);
    assert_eq!(flushed.live.num_live(), 10);
}

#[test]
fn test_abort_all_discards_buffered_docs() {
    let dir = tempfile::tempdir().unwrap();
    let writer = DocumentsWriter::create(dir.path(), config(1000, 2)).unwrap();

    for i in 0..20 {
        writer
            .update_document(&doc_with_id(&format!("k{i}"), "buffered"), None)
            .unwrap();
    }
    writer.abort_all();
    writer.flush_all().unwrap();

    assert_eq!(writer.num_published_segments(), 0);
    assert_eq!(IndexReader::open(dir.path()).unwrap().num_docs(), 0);
}

#[test]
fn test_rejected_document_outcome() {
    use strata::codec::FieldCaps;
    use strata::writer::{FieldValue, Token};

    let dir = tempfile::tempdir().unwrap();
    let writer = DocumentsWriter::create(dir.path(), config(1000, 2)).unwrap();

    writer
        .update_document(&doc_with_id("k1", "fine"), None)
        .unwrap();
    let mut bad = Document::new();
    bad.add_field(FieldValue {
        name: "content".to_string(),
        caps: FieldCaps::new(IndexOptions::DocsAndFreqs, false),
        tokens: vec![Token::new("", 0)],
    });
    match writer.update_document(&bad, None).unwrap() {
        DocOutcome::Rejected(reason) => assert!(reason.contains("empty term")),
        other => panic!("expected rejection, got {other:?}"),
    }
    writer
        .update_document(&doc_with_id("k2", "also fine"), None)
        .unwrap();
    writer.flush_all().unwrap();

    // The rejected doc is counted in max_doc but invisible.
    let reader = IndexReader::open(dir.path()).unwrap();
    assert_eq!(reader.max_doc(), 3);
    assert_eq!(reader.num_docs(), 2);
}

/// End-to-end: 300 documents through a writer configured
/// with a 2-state pool and a 100-doc flush threshold yield exactly three
/// published segments with disjoint doc ranges.
#[test]
fn test_three_hundred_docs_three_segments() {
    let dir = tempfile::tempdir().unwrap();
    let writer = DocumentsWriter::create(dir.path(), config(100, 2)).unwrap();

    for i in 0..300 {
        let mut doc = Document::new();
        doc.add_text("content", IndexOptions::DocsAndFreqs, &format!("word{i} common"));
        writer.update_document(&doc, None).unwrap();
    }
    writer.flush_all().unwrap();

    assert_eq!(writer.num_published_segments(), 3);
    let reader = IndexReader::open(dir.path()).unwrap();
    assert_eq!(reader.num_docs(), 300);
    for segment in reader.segments() {
        assert_eq!(segment.max_doc(), 100);
    }

    // Disjoint ranges: each word lands in exactly the segment its insertion
    // order dictates.
    for (i, segment_idx) in [(0u32, 0usize), (99, 0), (100, 1), (250, 2)] {
        let reader = IndexReader::open(dir.path()).unwrap();
        let segment = &reader.segments()[segment_idx];
        let mut it = segment
            .postings("content", format!("word{i}").as_bytes(), PostingsFlags::DOCS)
            .unwrap()
            .unwrap_or_else(|| panic!("word{i} missing from segment {segment_idx}"));
        assert_eq!(it.next_doc().unwrap(), i % 100);
        assert_eq!(it.next_doc().unwrap(), NO_MORE_DOCS);
    }
    assert_eq!(count_docs_with_term(dir.path(), "content", "common"), 300);
}

#[test]
fn test_concurrent_indexing_under_small_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Arc::new(DocumentsWriter::create(dir.path(), config(50, 4)).unwrap());

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let writer = writer.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    let doc = doc_with_id(&format!("t{t}d{i}"), "shared corpus text");
                    writer.update_document(&doc, None).unwrap();
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }
    writer.flush_all().unwrap();

    let reader = IndexReader::open(dir.path()).unwrap();
    assert_eq!(reader.num_docs(), 400);
    reader.check_integrity().unwrap();
    assert_eq!(count_docs_with_term(dir.path(), "content", "corpus"), 400);
}

#[test]
fn test_concurrent_updates_of_same_keys() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Arc::new(DocumentsWriter::create(dir.path(), config(40, 4)).unwrap());

    // Each key is updated by several threads; after the dust settles each
    // key resolves to at most one live doc per surviving update chain.
    let threads: Vec<_> = (0..4)
        .map(|t| {
            let writer = writer.clone();
            thread::spawn(move || {
                for round in 0..25 {
                    let key = format!("k{}", round % 10);
                    let doc = doc_with_id(&key, &format!("thread{t} round{round}"));
                    writer
                        .update_document(&doc, Some(Term::new("id", &key)))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }
    writer.flush_all().unwrap();

    // 10 distinct keys; concurrent interleavings may briefly leave more
    // than one doc per key only if their delete bounds raced, which the
    // queue forbids: the last update of each key in queue order survives.
    let reader = IndexReader::open(dir.path()).unwrap();
    let live_total = reader.num_docs();
    assert!(live_total >= 10, "at least one doc per key: {live_total}");
    for key in 0..10 {
        let count = count_docs_with_term(dir.path(), "id", &format!("k{key}"));
        assert_eq!(count, 1, "key k{key} has {count} live docs");
    }
}

#[test]
fn test_close_refuses_further_updates() {
    let dir = tempfile::tempdir().unwrap();
    let writer = DocumentsWriter::create(dir.path(), config(1000, 2)).unwrap();
    writer
        .update_document(&doc_with_id("k1", "x"), None)
        .unwrap();
    writer.close().unwrap();

    assert!(matches!(
        writer.update_document(&doc_with_id("k2", "y"), None),
        Err(strata::Error::Closed)
    ));
    assert_eq!(IndexReader::open(dir.path()).unwrap().num_docs(), 1);
}
