//! Flush tickets: publication order is fixed at flush start, not flush end.
//!
//! A ticket is created (under the queue lock, together with the global
//! delete freeze) when a DWPT starts flushing. Concurrent flushes may
//! finish in any order, but tickets are purged strictly front-to-back, so
//! segments and their deletes become visible in flush-start order.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::Result;
use crate::writer::delete_queue::{DeleteQueue, DeleteSlice, FrozenDeletes};
use crate::writer::dwpt::FlushedSegment;

/// What publication receives for one ticket.
pub struct TicketPayload {
    /// Global deletes frozen when the flush started.
    pub frozen: FrozenDeletes,
    /// The flushed segment; `None` for failed flushes, aborted DWPTs and
    /// deletes-only tickets. Deletes are applied either way.
    pub segment: Option<FlushedSegment>,
}

struct TicketState {
    completed: bool,
    segment: Option<FlushedSegment>,
}

pub struct FlushTicket {
    frozen: FrozenDeletes,
    state: Mutex<TicketState>,
}

impl FlushTicket {
    fn is_completed(&self) -> bool {
        self.state.lock().unwrap().completed
    }
}

pub struct TicketQueue {
    queue: Mutex<VecDeque<Arc<FlushTicket>>>,
    completed: Condvar,
    purge_lock: Mutex<()>,
}

impl TicketQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            completed: Condvar::new(),
            purge_lock: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    /// Acquire a ticket for a starting flush. The global delete freeze and
    /// the queue push happen under one lock: ticket order is freeze order.
    pub fn add_flush_ticket(
        &self,
        delete_queue: &DeleteQueue,
        caller_slice: Option<&mut DeleteSlice>,
    ) -> Arc<FlushTicket> {
        let mut queue = self.queue.lock().unwrap();
        let frozen = delete_queue.freeze_global_buffer(caller_slice);
        let ticket = Arc::new(FlushTicket {
            frozen,
            state: Mutex::new(TicketState {
                completed: false,
                segment: None,
            }),
        });
        queue.push_back(ticket.clone());
        ticket
    }

    /// Record a flush result (or failure, as `None`) on its ticket.
    pub fn complete(&self, ticket: &Arc<FlushTicket>, segment: Option<FlushedSegment>) {
        let _queue = self.queue.lock().unwrap();
        let mut state = ticket.state.lock().unwrap();
        debug_assert!(!state.completed);
        state.completed = true;
        state.segment = segment;
        self.completed.notify_all();
    }

    /// Publish completed tickets strictly in order. With `blocking` set,
    /// waits for the head ticket to complete instead of stopping at it, so
    /// the queue is fully drained.
    ///
    /// Returns the number of tickets published.
    pub fn purge(
        &self,
        blocking: bool,
        mut publisher: impl FnMut(TicketPayload) -> Result<()>,
    ) -> Result<usize> {
        // Opportunistic purges back off when another thread is already
        // publishing; a forced purge waits its turn.
        let _purge = if blocking {
            self.purge_lock.lock().unwrap()
        } else {
            match self.purge_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => return Ok(0),
            }
        };
        let mut published = 0;
        loop {
            let ticket = {
                let mut queue = self.queue.lock().unwrap();
                loop {
                    match queue.front() {
                        None => break None,
                        Some(head) if head.is_completed() => break queue.pop_front(),
                        Some(_) if blocking => {
                            queue = self.completed.wait(queue).unwrap();
                        }
                        Some(_) => break None,
                    }
                }
            };
            let Some(ticket) = ticket else {
                return Ok(published);
            };
            let segment = ticket.state.lock().unwrap().segment.take();
            publisher(TicketPayload {
                frozen: ticket.frozen.clone(),
                segment,
            })?;
            published += 1;
        }
    }
}

impl Default for TicketQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::delete_queue::{DeleteOp, DeleteQueue};
    use crate::writer::document::Term;

    #[test]
    fn test_out_of_order_completion_publishes_in_order() {
        let tickets = TicketQueue::new();
        let deletes = DeleteQueue::new(0);

        deletes.add(DeleteOp::Term(Term::new("id", "a")));
        let t1 = tickets.add_flush_ticket(&deletes, None);
        deletes.add(DeleteOp::Term(Term::new("id", "b")));
        let t2 = tickets.add_flush_ticket(&deletes, None);

        // Second flush finishes first; nothing can be published yet.
        tickets.complete(&t2, None);
        let mut seen = Vec::new();
        tickets
            .purge(false, |payload| {
                seen.push(payload.frozen.terms.len());
                Ok(())
            })
            .unwrap();
        assert!(seen.is_empty());
        assert_eq!(tickets.len(), 2);

        tickets.complete(&t1, None);
        tickets
            .purge(false, |payload| {
                seen.push(payload.frozen.terms.len());
                Ok(())
            })
            .unwrap();
        // Both published now, each carrying its own freeze point.
        assert_eq!(seen, vec![1, 1]);
        assert!(tickets.is_empty());
    }

    #[test]
    fn test_blocking_purge_waits_for_head() {
        use std::sync::Arc as StdArc;
        use std::thread;
        use std::time::Duration;

        let tickets = StdArc::new(TicketQueue::new());
        let deletes = DeleteQueue::new(0);
        let t1 = tickets.add_flush_ticket(&deletes, None);

        let tickets2 = tickets.clone();
        let completer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            tickets2.complete(&t1, None);
        });

        let published = tickets.purge(true, |_| Ok(())).unwrap();
        assert_eq!(published, 1);
        completer.join().unwrap();
    }
}
