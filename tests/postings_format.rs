//! End-to-end postings format tests: write with the codec, read back with
//! every enumerator variant, and cross-check `advance` against linear
//! scans.

use roaring::RoaringBitmap;
use std::path::PathBuf;
use std::sync::Arc;

use strata::codec::{
    BlockTermState, FieldCaps, IndexOptions, NO_MORE_DOCS, PostingsFlags, PostingsWriter,
    SegmentPostingsReader,
};

struct TermFixture {
    _dir: tempfile::TempDir,
    doc_path: PathBuf,
    pos_path: Option<PathBuf>,
    pay_path: Option<PathBuf>,
    caps: FieldCaps,
    state: BlockTermState,
}

impl TermFixture {
    fn reader(&self) -> SegmentPostingsReader {
        SegmentPostingsReader::open(
            &self.doc_path,
            self.pos_path.as_deref(),
            self.pay_path.as_deref(),
        )
        .unwrap()
    }
}

/// Write one term's postings. `postings[i] = (doc_id, freq)`; positions for
/// doc d are `d + 10 * k` for k in 0..freq, each with a one-byte payload
/// `[k]` when payloads are enabled, and offsets `(pos, pos + 2)` when
/// offsets are enabled.
fn write_term(postings: &[(u32, u32)], caps: FieldCaps) -> TermFixture {
    let dir = tempfile::tempdir().unwrap();
    let doc_path = dir.path().join("terms.doc");
    let pos_path = caps.has_positions().then(|| dir.path().join("terms.pos"));
    let pay_path = caps.has_pay_stream().then(|| dir.path().join("terms.pay"));

    let mut writer =
        PostingsWriter::create(&doc_path, pos_path.as_deref(), pay_path.as_deref()).unwrap();
    writer.set_field(caps);
    writer.start_term();
    for &(doc, freq) in postings {
        writer.start_doc(doc, freq).unwrap();
        if caps.has_positions() {
            for k in 0..freq {
                let pos = doc + 10 * k;
                let payload = [k as u8];
                writer
                    .add_position(
                        pos,
                        caps.payloads.then_some(&payload[..]),
                        caps.has_offsets().then_some((pos, pos + 2)),
                    )
                    .unwrap();
            }
        }
        writer.finish_doc();
    }
    let mut state = BlockTermState::default();
    writer.finish_term(&mut state).unwrap();
    writer.close().unwrap();

    TermFixture {
        _dir: dir,
        doc_path,
        pos_path,
        pay_path,
        caps,
        state,
    }
}

fn gapped_postings(count: u32) -> Vec<(u32, u32)> {
    // Irregular gaps and frequencies so blocks get distinct bit widths.
    let mut postings = Vec::with_capacity(count as usize);
    let mut doc = 0u32;
    for i in 0..count {
        doc += 1 + (i % 7) * (i % 3 + 1);
        postings.push((doc, 1 + i % 4));
    }
    postings
}

#[test]
fn test_docs_and_freqs_roundtrip_multi_block() {
    let postings = gapped_postings(1000);
    let fixture = write_term(&postings, FieldCaps::new(IndexOptions::DocsAndFreqs, false));
    let reader = fixture.reader();
    reader.check_integrity().unwrap();

    let mut it = reader
        .postings(fixture.caps, &fixture.state, PostingsFlags::FREQS, None)
        .unwrap();
    for &(doc, freq) in &postings {
        assert_eq!(it.next_doc().unwrap(), doc);
        assert_eq!(it.freq(), freq);
    }
    assert_eq!(it.next_doc().unwrap(), NO_MORE_DOCS);
}

#[test]
fn test_docs_only_iterator_reports_freq_one() {
    let postings = gapped_postings(300);
    let fixture = write_term(&postings, FieldCaps::new(IndexOptions::DocsAndFreqs, false));
    let reader = fixture.reader();

    // Frequencies indexed but not requested: blocks are skipped, freq is 1.
    let mut it = reader
        .postings(fixture.caps, &fixture.state, PostingsFlags::DOCS, None)
        .unwrap();
    for &(doc, _) in &postings {
        assert_eq!(it.next_doc().unwrap(), doc);
        assert_eq!(it.freq(), 1);
    }
}

#[test]
fn test_advance_matches_linear_scan_for_every_target() {
    let postings = gapped_postings(700);
    let fixture = write_term(&postings, FieldCaps::new(IndexOptions::DocsAndFreqs, false));
    let reader = fixture.reader();

    let docs: Vec<u32> = postings.iter().map(|p| p.0).collect();
    let max_doc = *docs.last().unwrap();
    for target in 0..=max_doc + 1 {
        let expected = docs
            .iter()
            .copied()
            .find(|&d| d >= target)
            .unwrap_or(NO_MORE_DOCS);
        let mut it = reader
            .postings(fixture.caps, &fixture.state, PostingsFlags::FREQS, None)
            .unwrap();
        assert_eq!(it.advance(target).unwrap(), expected, "target {target}");
    }
}

#[test]
fn test_advance_with_live_docs_filter() {
    let postings = gapped_postings(700);
    let fixture = write_term(&postings, FieldCaps::new(IndexOptions::DocsAndFreqs, false));
    let reader = fixture.reader();

    // Delete every third posting.
    let mut deleted = RoaringBitmap::new();
    for (i, &(doc, _)) in postings.iter().enumerate() {
        if i % 3 == 0 {
            deleted.insert(doc);
        }
    }
    let deleted = Arc::new(deleted);
    let live: Vec<u32> = postings
        .iter()
        .map(|p| p.0)
        .filter(|d| !deleted.contains(*d))
        .collect();

    let max_doc = postings.last().unwrap().0;
    for target in (0..=max_doc + 1).step_by(11) {
        let expected = live
            .iter()
            .copied()
            .find(|&d| d >= target)
            .unwrap_or(NO_MORE_DOCS);
        let mut it = reader
            .postings(
                fixture.caps,
                &fixture.state,
                PostingsFlags::FREQS,
                Some(deleted.clone()),
            )
            .unwrap();
        assert_eq!(it.advance(target).unwrap(), expected, "target {target}");
    }
}

#[test]
fn test_monotonic_advance_chain() {
    let postings = gapped_postings(900);
    let fixture = write_term(&postings, FieldCaps::new(IndexOptions::DocsAndFreqs, false));
    let reader = fixture.reader();
    let docs: Vec<u32> = postings.iter().map(|p| p.0).collect();

    let mut it = reader
        .postings(fixture.caps, &fixture.state, PostingsFlags::FREQS, None)
        .unwrap();
    let mut target = 0;
    while target <= *docs.last().unwrap() {
        let expected = docs
            .iter()
            .copied()
            .find(|&d| d >= target)
            .unwrap_or(NO_MORE_DOCS);
        assert_eq!(it.advance(target).unwrap(), expected);
        target = expected + 37;
    }
}

#[test]
fn test_positions_reset_per_document() {
    let postings = gapped_postings(400);
    let fixture = write_term(
        &postings,
        FieldCaps::new(IndexOptions::DocsAndFreqsAndPositions, false),
    );
    let reader = fixture.reader();

    let mut it = reader
        .postings(fixture.caps, &fixture.state, PostingsFlags::POSITIONS, None)
        .unwrap();
    for &(doc, freq) in &postings {
        assert_eq!(it.next_doc().unwrap(), doc);
        assert_eq!(it.freq(), freq);
        let mut last = 0;
        for k in 0..freq {
            let pos = it.next_position().unwrap();
            assert_eq!(pos, doc + 10 * k, "doc {doc} position {k}");
            assert!(pos >= last);
            last = pos;
        }
    }
}

#[test]
fn test_unconsumed_positions_are_skipped() {
    let postings = gapped_postings(400);
    let fixture = write_term(
        &postings,
        FieldCaps::new(IndexOptions::DocsAndFreqsAndPositions, false),
    );
    let reader = fixture.reader();

    // Consume positions only for every fifth document; skipped positions
    // must not leak into later documents, including across block refills.
    let mut it = reader
        .postings(fixture.caps, &fixture.state, PostingsFlags::POSITIONS, None)
        .unwrap();
    for (i, &(doc, freq)) in postings.iter().enumerate() {
        assert_eq!(it.next_doc().unwrap(), doc);
        if i % 5 == 0 {
            for k in 0..freq {
                assert_eq!(it.next_position().unwrap(), doc + 10 * k);
            }
        }
    }
}

#[test]
fn test_payloads_and_offsets_roundtrip() {
    let postings = gapped_postings(300);
    let caps = FieldCaps::new(IndexOptions::DocsAndFreqsAndPositionsAndOffsets, true);
    let fixture = write_term(&postings, caps);
    let reader = fixture.reader();
    reader.check_integrity().unwrap();

    let mut it = reader
        .postings(fixture.caps, &fixture.state, PostingsFlags::ALL, None)
        .unwrap();
    for &(doc, freq) in &postings {
        assert_eq!(it.next_doc().unwrap(), doc);
        for k in 0..freq {
            let pos = it.next_position().unwrap();
            assert_eq!(pos, doc + 10 * k);
            assert_eq!(it.payload().unwrap(), &[k as u8]);
            assert_eq!(it.start_offset(), Some(pos));
            assert_eq!(it.end_offset(), Some(pos + 2));
        }
    }
}

#[test]
fn test_payload_accounting_survives_position_skips() {
    let postings = gapped_postings(500);
    let caps = FieldCaps::new(IndexOptions::DocsAndFreqsAndPositions, true);
    let fixture = write_term(&postings, caps);
    let reader = fixture.reader();

    // Advance far into the list, skip most position reads, then verify
    // payloads still line up: the payload byte cursor must account for
    // every skipped position.
    let mut it = reader
        .postings(fixture.caps, &fixture.state, PostingsFlags::ALL, None)
        .unwrap();
    let probe: Vec<usize> = vec![3, 150, 151, 320, 499];
    let mut cursor = 0usize;
    for &i in &probe {
        let (doc, freq) = postings[i];
        while cursor < i {
            it.next_doc().unwrap();
            cursor += 1;
        }
        assert_eq!(it.next_doc().unwrap(), doc);
        cursor += 1;
        for k in 0..freq {
            assert_eq!(it.next_position().unwrap(), doc + 10 * k);
            assert_eq!(it.payload().unwrap(), &[k as u8], "doc {doc}");
        }
    }
}

#[test]
fn test_advance_then_positions() {
    let postings = gapped_postings(600);
    let caps = FieldCaps::new(IndexOptions::DocsAndFreqsAndPositions, true);
    let fixture = write_term(&postings, caps);
    let reader = fixture.reader();

    for &i in &[0usize, 130, 257, 400, 599] {
        let (doc, freq) = postings[i];
        let mut it = reader
            .postings(fixture.caps, &fixture.state, PostingsFlags::ALL, None)
            .unwrap();
        assert_eq!(it.advance(doc).unwrap(), doc);
        for k in 0..freq {
            assert_eq!(it.next_position().unwrap(), doc + 10 * k, "after advance to {doc}");
            assert_eq!(it.payload().unwrap(), &[k as u8]);
        }
    }
}

#[test]
fn test_singleton_term_roundtrip() {
    let fixture = write_term(&[(77, 5)], FieldCaps::new(IndexOptions::DocsAndFreqs, false));
    assert_eq!(fixture.state.singleton_doc_id, Some(77));
    assert_eq!(fixture.state.total_term_freq, 5);

    let reader = fixture.reader();
    let mut it = reader
        .postings(fixture.caps, &fixture.state, PostingsFlags::FREQS, None)
        .unwrap();
    assert_eq!(it.next_doc().unwrap(), 77);
    assert_eq!(it.freq(), 5);
    assert_eq!(it.next_doc().unwrap(), NO_MORE_DOCS);

    let mut it = reader
        .postings(fixture.caps, &fixture.state, PostingsFlags::FREQS, None)
        .unwrap();
    assert_eq!(it.advance(50).unwrap(), 77);
}

#[test]
fn test_exact_block_boundary_term() {
    // docFreq exactly one block: vInt tail is empty, no skip data.
    let postings = gapped_postings(128);
    let fixture = write_term(
        &postings,
        FieldCaps::new(IndexOptions::DocsAndFreqsAndPositions, false),
    );
    assert_eq!(fixture.state.skip_offset, None);

    let reader = fixture.reader();
    let mut it = reader
        .postings(fixture.caps, &fixture.state, PostingsFlags::POSITIONS, None)
        .unwrap();
    for &(doc, freq) in &postings {
        assert_eq!(it.next_doc().unwrap(), doc);
        for k in 0..freq {
            assert_eq!(it.next_position().unwrap(), doc + 10 * k);
        }
    }
    assert_eq!(it.next_doc().unwrap(), NO_MORE_DOCS);
}
