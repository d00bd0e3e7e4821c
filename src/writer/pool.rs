//! Thread-state pool: a fixed slot array with condvar-guarded checkout.
//!
//! A slot is either parked in the pool or checked out by exactly one
//! thread; ownership of the [`ThreadState`] value moves out and back, so a
//! checked-out DWPT is accessed without any further locking.

use std::sync::{Condvar, Mutex};

use crate::writer::dwpt::DocumentsWriterPerThread;

pub struct ThreadState {
    pub index: usize,
    pub dwpt: Option<DocumentsWriterPerThread>,
}

pub struct ThreadPool {
    slots: Mutex<Vec<Option<ThreadState>>>,
    available: Condvar,
    size: usize,
}

impl ThreadPool {
    pub fn new(size: usize) -> Self {
        let slots = (0..size)
            .map(|index| Some(ThreadState { index, dwpt: None }))
            .collect();
        Self {
            slots: Mutex::new(slots),
            available: Condvar::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Check out a thread state, preferring `preferred` (thread affinity).
    /// Blocks when every slot is checked out.
    pub fn acquire(&self, preferred: Option<usize>) -> ThreadState {
        let mut slots = self.slots.lock().unwrap();
        loop {
            if let Some(i) = preferred
                && i < self.size
                && slots[i].is_some()
            {
                return slots[i].take().unwrap();
            }
            if let Some(i) = (0..self.size).find(|&i| slots[i].is_some()) {
                return slots[i].take().unwrap();
            }
            slots = self.available.wait(slots).unwrap();
        }
    }

    /// Check out one specific slot, waiting until its current owner
    /// releases it.
    pub fn acquire_specific(&self, index: usize) -> ThreadState {
        let mut slots = self.slots.lock().unwrap();
        loop {
            if slots[index].is_some() {
                return slots[index].take().unwrap();
            }
            slots = self.available.wait(slots).unwrap();
        }
    }

    pub fn release(&self, state: ThreadState) {
        let mut slots = self.slots.lock().unwrap();
        let index = state.index;
        debug_assert!(slots[index].is_none());
        slots[index] = Some(state);
        // notify_all: acquire_specific waiters need their particular slot.
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_affinity_prefers_last_slot() {
        let pool = ThreadPool::new(4);
        let state = pool.acquire(None);
        let index = state.index;
        pool.release(state);
        let state = pool.acquire(Some(index));
        assert_eq!(state.index, index);
        pool.release(state);
    }

    #[test]
    fn test_blocking_acquire_waits_for_release() {
        let pool = Arc::new(ThreadPool::new(1));
        let state = pool.acquire(None);

        let pool2 = pool.clone();
        let waiter = thread::spawn(move || {
            let state = pool2.acquire(None);
            let index = state.index;
            pool2.release(state);
            index
        });

        thread::sleep(Duration::from_millis(30));
        pool.release(state);
        assert_eq!(waiter.join().unwrap(), 0);
    }

    #[test]
    fn test_acquire_specific_waits_for_that_slot() {
        let pool = Arc::new(ThreadPool::new(2));
        let s0 = pool.acquire(Some(0));
        let _s1 = pool.acquire(Some(1));

        let pool2 = pool.clone();
        let waiter = thread::spawn(move || {
            let state = pool2.acquire_specific(0);
            let index = state.index;
            pool2.release(state);
            index
        });

        thread::sleep(Duration::from_millis(30));
        pool.release(s0);
        assert_eq!(waiter.join().unwrap(), 0);
    }
}
