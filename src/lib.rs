//! # Strata - Segment-Based Inverted Index Storage
//!
//! Strata is the storage core of an inverted-index search engine: a
//! block-compressed postings codec and a concurrent, lock-minimized
//! segment writing pipeline.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`codec`] - Postings encoding/decoding (packed blocks, skip lists,
//!   term dictionary, postings writer/reader)
//! - [`writer`] - Concurrent document ingestion (per-thread segment
//!   builders, delete queue, flush control, ticket-ordered publication)
//! - [`segment`] - Segment metadata, live docs, and read-side views
//! - [`store`] - Byte-stream primitives (mmap inputs, checksummed outputs)
//!
//! ## Quick Start
//!
//! ```no_run
//! use strata::codec::IndexOptions;
//! use strata::segment::IndexReader;
//! use strata::writer::{Document, DocumentsWriter, WriterConfig};
//! use std::path::Path;
//!
//! let dir = Path::new("/tmp/strata-index");
//! let writer = DocumentsWriter::create(dir, WriterConfig::default()).unwrap();
//!
//! let mut doc = Document::new();
//! doc.add_text("content", IndexOptions::DocsAndFreqsAndPositions, "hello world");
//! writer.update_document(&doc, None).unwrap();
//! writer.flush_all().unwrap();
//!
//! let reader = IndexReader::open(dir).unwrap();
//! assert_eq!(reader.num_docs(), 1);
//! ```
//!
//! ## Concurrency model
//!
//! Each indexing thread is bound to one in-memory segment builder (DWPT),
//! so document processing never takes cross-thread locks. Deletes flow
//! through a globally ordered append-only queue, sliced per DWPT so each
//! document sees exactly the deletes that preceded it. Flushes run
//! concurrently; a ticket queue pins publication to flush-start order.

pub mod codec;
pub mod error;
pub mod segment;
pub mod store;
pub mod writer;

pub use error::{Error, Result};
