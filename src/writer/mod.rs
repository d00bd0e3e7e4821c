//! Concurrent segment writing pipeline.
//!
//! Callers feed documents to [`DocumentsWriter`]; each calling thread is
//! bound to a [`dwpt::DocumentsWriterPerThread`] building one in-memory
//! segment without cross-thread locking. Flush control decides when a DWPT
//! must be cut to disk, and the ticket queue serializes publication so
//! segments and their deletes become visible in flush-start order.

pub mod chain;
pub mod delete_queue;
pub mod document;
pub mod documents_writer;
pub mod dwpt;
pub mod flush_control;
pub mod pool;
pub mod tickets;

pub use chain::{ChainFailure, IndexingChain, TermsHashChain};
pub use delete_queue::{BufferedDeletes, DeleteOp, DeleteQuery, DeleteQueue, DeleteSlice, FrozenDeletes};
pub use document::{Document, FieldValue, Term, Token};
pub use documents_writer::DocumentsWriter;
pub use dwpt::{DocOutcome, DocumentsWriterPerThread, FlushedSegment};

use serde::{Deserialize, Serialize};

/// Tunables for one writer session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Maximum concurrently active thread states (DWPTs).
    pub max_thread_states: usize,
    /// Aggregate in-memory buffer target across all DWPTs.
    pub ram_buffer_bytes: u64,
    /// Per-DWPT document count that forces a flush.
    pub max_buffered_docs: u32,
    /// Admissions stall once aggregate RAM exceeds
    /// `stall_factor * ram_buffer_bytes`, giving in-flight flushes room to
    /// drain.
    pub stall_factor: f64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_thread_states: 8,
            ram_buffer_bytes: 16 * 1024 * 1024,
            max_buffered_docs: 10_000,
            stall_factor: 2.0,
        }
    }
}
