//! Globally ordered delete log, sliced per DWPT.
//!
//! The queue is an append-only linked list of `Arc` nodes. Appends take a
//! short tail lock; readers walk `next` pointers lock-free, so many DWPT
//! slices can advance concurrently with appends. Nodes are only reclaimed
//! once every slice has moved past them and the frozen buffers holding
//! their ops are dropped.

use roaring::RoaringBitmap;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::Result;
use crate::segment::SegmentReader;
use crate::writer::document::Term;

/// A deletion the query layer resolves against a segment.
pub trait DeleteQuery: Send + Sync + fmt::Debug {
    /// Docs matching this deletion in `reader`, ignoring live docs.
    fn matching_docs(&self, reader: &SegmentReader) -> Result<RoaringBitmap>;
}

#[derive(Debug, Clone)]
pub enum DeleteOp {
    Term(Term),
    Query(Arc<dyn DeleteQuery>),
}

struct Node {
    op: Option<DeleteOp>,
    next: OnceLock<Arc<Node>>,
}

impl Node {
    fn sentinel() -> Arc<Node> {
        Arc::new(Node {
            op: None,
            next: OnceLock::new(),
        })
    }
}

/// A (start, end] cursor range into the queue, owned by one DWPT.
pub struct DeleteSlice {
    head: Arc<Node>,
    tail: Arc<Node>,
}

impl DeleteSlice {
    fn empty(at: Arc<Node>) -> Self {
        Self {
            head: at.clone(),
            tail: at,
        }
    }

    pub fn is_empty(&self) -> bool {
        Arc::ptr_eq(&self.head, &self.tail)
    }

    /// Buffer every op in `(head, tail]` into `target`, bounding each to
    /// docs below `doc_id_upto`, then advance the slice past them.
    pub fn apply(&mut self, target: &mut BufferedDeletes, doc_id_upto: u32) {
        if self.is_empty() {
            return;
        }
        let mut cursor = self.head.clone();
        loop {
            let next = cursor
                .next
                .get()
                .expect("slice tail is always reachable")
                .clone();
            if let Some(op) = &next.op {
                target.add(op.clone(), doc_id_upto);
            }
            let at_tail = Arc::ptr_eq(&next, &self.tail);
            cursor = next;
            if at_tail {
                break;
            }
        }
        self.head = self.tail.clone();
    }
}

/// Buffered deletes private to one DWPT (or the queue's global buffer).
#[derive(Default)]
pub struct BufferedDeletes {
    /// Term → highest doc id bound seen for it.
    pub terms: FxHashMap<Term, u32>,
    pub queries: Vec<(Arc<dyn DeleteQuery>, u32)>,
    /// Docs rejected during indexing, deleted by id at flush.
    pub doc_ids: Vec<u32>,
    bytes: u64,
}

impl BufferedDeletes {
    pub fn add(&mut self, op: DeleteOp, doc_id_upto: u32) {
        match op {
            DeleteOp::Term(term) => {
                let entry = self.terms.entry(term).or_insert(0);
                *entry = (*entry).max(doc_id_upto);
                self.bytes += 48;
            }
            DeleteOp::Query(query) => {
                self.queries.push((query, doc_id_upto));
                self.bytes += 32;
            }
        }
    }

    pub fn add_doc_id(&mut self, doc_id: u32) {
        self.doc_ids.push(doc_id);
        self.bytes += 4;
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.queries.is_empty() && self.doc_ids.is_empty()
    }

    pub fn bytes_used(&self) -> u64 {
        self.bytes
    }

    pub fn clear(&mut self) {
        self.terms.clear();
        self.queries.clear();
        self.doc_ids.clear();
        self.bytes = 0;
    }

    /// Freeze term and query deletes into an immutable packet. Doc-id
    /// deletes stay behind; they are consumed directly at flush.
    pub fn freeze(&mut self) -> FrozenDeletes {
        let mut terms: Vec<(Term, u32)> = self.terms.drain().collect();
        terms.sort();
        let queries = std::mem::take(&mut self.queries);
        self.bytes = 0;
        FrozenDeletes { terms, queries }
    }
}

/// Immutable snapshot of buffered deletes, attached to a flush ticket or a
/// flushed segment.
#[derive(Default, Clone)]
pub struct FrozenDeletes {
    pub terms: Vec<(Term, u32)>,
    pub queries: Vec<(Arc<dyn DeleteQuery>, u32)>,
}

impl FrozenDeletes {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.queries.is_empty()
    }
}

/// The shared, append-only delete log.
pub struct DeleteQueue {
    tail: Mutex<Arc<Node>>,
    generation: u64,
    next_seq: AtomicU64,
    bytes_used: AtomicU64,
    global: Mutex<GlobalBuffer>,
}

struct GlobalBuffer {
    slice: DeleteSlice,
    buffer: BufferedDeletes,
}

impl DeleteQueue {
    pub fn new(generation: u64) -> Self {
        let sentinel = Node::sentinel();
        Self {
            tail: Mutex::new(sentinel.clone()),
            generation,
            next_seq: AtomicU64::new(1),
            bytes_used: AtomicU64::new(0),
            global: Mutex::new(GlobalBuffer {
                slice: DeleteSlice::empty(sentinel),
                buffer: BufferedDeletes::default(),
            }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn append(tail: &mut Arc<Node>, op: DeleteOp) -> Arc<Node> {
        let node = Arc::new(Node {
            op: Some(op),
            next: OnceLock::new(),
        });
        tail.next
            .set(node.clone())
            .unwrap_or_else(|_| unreachable!("tail updates are serialized"));
        *tail = node.clone();
        node
    }

    /// Append a global delete (not tied to any in-flight document).
    pub fn add(&self, op: DeleteOp) -> u64 {
        {
            let mut tail = self.tail.lock().unwrap();
            Self::append(&mut tail, op);
        }
        self.bytes_used.fetch_add(48, Ordering::Relaxed);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        // Fold into the global buffer opportunistically; a contended lock
        // just leaves the work to the next freeze.
        if let Ok(mut global) = self.global.try_lock() {
            let tail = self.tail.lock().unwrap().clone();
            global.slice.tail = tail;
            let GlobalBuffer { slice, buffer } = &mut *global;
            slice.apply(buffer, u32::MAX);
        }
        seq
    }

    /// Append a document's own delete and extend `slice` to cover exactly
    /// up to it, atomically with respect to other appends.
    pub fn add_and_update(&self, op: DeleteOp, slice: &mut DeleteSlice) -> u64 {
        {
            let mut tail = self.tail.lock().unwrap();
            let node = Self::append(&mut tail, op);
            slice.tail = node;
        }
        self.bytes_used.fetch_add(48, Ordering::Relaxed);
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// A new empty slice positioned at the current tail.
    pub fn new_slice(&self) -> DeleteSlice {
        DeleteSlice::empty(self.tail.lock().unwrap().clone())
    }

    /// Extend `slice` to the current tail; returns whether it moved.
    pub fn update_slice(&self, slice: &mut DeleteSlice) -> bool {
        let tail = self.tail.lock().unwrap().clone();
        if Arc::ptr_eq(&slice.tail, &tail) {
            return false;
        }
        slice.tail = tail;
        true
    }

    /// Atomically cut the queue: every op up to the current tail moves into
    /// an immutable packet. `caller_slice`, when given, is extended to the
    /// cut point so its owner sees exactly the same boundary.
    pub fn freeze_global_buffer(&self, caller_slice: Option<&mut DeleteSlice>) -> FrozenDeletes {
        let mut global = self.global.lock().unwrap();
        let tail = self.tail.lock().unwrap().clone();
        if let Some(slice) = caller_slice {
            slice.tail = tail.clone();
        }
        global.slice.tail = tail;
        let GlobalBuffer { slice, buffer } = &mut *global;
        slice.apply(buffer, u32::MAX);
        self.bytes_used.store(0, Ordering::Relaxed);
        buffer.freeze()
    }

    pub fn bytes_used(&self) -> u64 {
        self.bytes_used.load(Ordering::Relaxed)
    }
}
