//! RAM accounting, flush-pending flags, and admission backpressure.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use crate::writer::WriterConfig;

/// Per-slot accounting, readable and flaggable from any thread while the
/// slot's DWPT is checked out elsewhere.
#[derive(Default)]
pub struct SlotStats {
    bytes: AtomicU64,
    docs: AtomicU32,
    flush_pending: AtomicBool,
}

/// Tracks RAM across all DWPTs and decides which of them must flush.
pub struct FlushControl {
    config: WriterConfig,
    slots: Vec<SlotStats>,
    /// RAM held by DWPTs still accepting documents.
    active_bytes: AtomicU64,
    /// RAM held by DWPTs flagged or being flushed, released as flushes
    /// complete.
    flushing_bytes: AtomicU64,
    delete_bytes: AtomicU64,
    stall_lock: Mutex<()>,
    stall_cond: Condvar,
    policy: Box<dyn FlushPolicy>,
}

/// Pluggable flush decision, consulted after every insert and delete.
pub trait FlushPolicy: Send + Sync {
    /// `slot` is the thread state that just indexed a document.
    fn on_insert(&self, ctl: &FlushControl, slot: usize);
    /// Deletes have no attributable DWPT; policies typically flag the
    /// largest one.
    fn on_delete(&self, ctl: &FlushControl);
}

impl FlushControl {
    pub fn new(config: WriterConfig) -> Self {
        let slots = (0..config.max_thread_states)
            .map(|_| SlotStats::default())
            .collect();
        Self {
            slots,
            active_bytes: AtomicU64::new(0),
            flushing_bytes: AtomicU64::new(0),
            delete_bytes: AtomicU64::new(0),
            stall_lock: Mutex::new(()),
            stall_cond: Condvar::new(),
            policy: Box::new(RamOrCountPolicy),
            config,
        }
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn active_bytes(&self) -> u64 {
        self.active_bytes.load(Ordering::Relaxed)
    }

    pub fn flushing_bytes(&self) -> u64 {
        self.flushing_bytes.load(Ordering::Relaxed)
    }

    pub fn slot_bytes(&self, slot: usize) -> u64 {
        self.slots[slot].bytes.load(Ordering::Relaxed)
    }

    pub fn slot_docs(&self, slot: usize) -> u32 {
        self.slots[slot].docs.load(Ordering::Relaxed)
    }

    pub fn is_pending(&self, slot: usize) -> bool {
        self.slots[slot].flush_pending.load(Ordering::Relaxed)
    }

    pub fn any_pending(&self) -> bool {
        self.slots.iter().any(|s| s.flush_pending.load(Ordering::Relaxed))
    }

    pub fn set_delete_bytes(&self, bytes: u64) {
        self.delete_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Update a slot's accounting after one document, then consult the
    /// flush policy.
    pub fn after_insert(&self, slot: usize, bytes_used: u64, docs: u32) {
        let stats = &self.slots[slot];
        let old = stats.bytes.swap(bytes_used, Ordering::Relaxed);
        stats.docs.store(docs, Ordering::Relaxed);
        // A slot can be flagged by another thread mid-document; its growth
        // then belongs to the flushing pool, keeping both pools consistent
        // with what checkout_for_flush will hand back.
        let pool = if stats.flush_pending.load(Ordering::Relaxed) {
            &self.flushing_bytes
        } else {
            &self.active_bytes
        };
        if bytes_used >= old {
            pool.fetch_add(bytes_used - old, Ordering::Relaxed);
        } else {
            pool.fetch_sub(old - bytes_used, Ordering::Relaxed);
        }
        self.policy.on_insert(self, slot);
    }

    pub fn after_delete(&self) {
        self.policy.on_delete(self);
    }

    /// Flag a slot's DWPT pending-flush and move its RAM from the active
    /// pool to the flushing pool. Idempotent.
    pub fn mark_flush_pending(&self, slot: usize) {
        let stats = &self.slots[slot];
        if stats.docs.load(Ordering::Relaxed) == 0 {
            return;
        }
        if !stats.flush_pending.swap(true, Ordering::Relaxed) {
            let bytes = stats.bytes.load(Ordering::Relaxed);
            self.active_bytes.fetch_sub(bytes, Ordering::Relaxed);
            self.flushing_bytes.fetch_add(bytes, Ordering::Relaxed);
            log::debug!(
                "slot {slot} flagged for flush ({bytes} bytes, {} docs)",
                stats.docs.load(Ordering::Relaxed)
            );
        }
    }

    /// Detach a slot's accounting when its DWPT is pulled for flushing (or
    /// aborted). Returns the bytes now owned by the flush.
    pub fn checkout_for_flush(&self, slot: usize) -> u64 {
        let stats = &self.slots[slot];
        let bytes = stats.bytes.swap(0, Ordering::Relaxed);
        stats.docs.store(0, Ordering::Relaxed);
        if stats.flush_pending.swap(false, Ordering::Relaxed) {
            // Bytes already moved to the flushing pool by mark_flush_pending.
        } else {
            self.active_bytes.fetch_sub(bytes, Ordering::Relaxed);
            self.flushing_bytes.fetch_add(bytes, Ordering::Relaxed);
        }
        bytes
    }

    /// Release flush-held RAM once a flush (or abort) finishes, and wake
    /// any stalled admission threads.
    pub fn after_flush(&self, bytes: u64) {
        self.flushing_bytes.fetch_sub(bytes, Ordering::Relaxed);
        let _guard = self.stall_lock.lock().unwrap();
        self.stall_cond.notify_all();
    }

    fn stall_limit(&self) -> u64 {
        (self.config.ram_buffer_bytes as f64 * self.config.stall_factor) as u64
    }

    fn total_bytes(&self) -> u64 {
        self.active_bytes.load(Ordering::Relaxed)
            + self.flushing_bytes.load(Ordering::Relaxed)
            + self.delete_bytes.load(Ordering::Relaxed)
    }

    pub fn is_stalled(&self) -> bool {
        self.total_bytes() > self.stall_limit()
    }

    /// Block the calling thread while aggregate RAM is over the stall
    /// limit. Threads are released in no particular order, but every one
    /// is released as flushes drain the backlog.
    pub fn wait_if_stalled(&self) {
        if !self.is_stalled() {
            return;
        }
        log::debug!(
            "stalling document admission: {} bytes buffered (limit {})",
            self.total_bytes(),
            self.stall_limit()
        );
        let mut guard = self.stall_lock.lock().unwrap();
        while self.is_stalled() {
            guard = self.stall_cond.wait(guard).unwrap();
        }
    }

    /// Largest-by-RAM slot that is not already flagged.
    pub fn largest_non_pending_slot(&self) -> Option<usize> {
        (0..self.slots.len())
            .filter(|&i| !self.is_pending(i) && self.slot_docs(i) > 0)
            .max_by_key(|&i| self.slot_bytes(i))
    }
}

/// Default policy: flush a DWPT once it holds too many documents or the
/// aggregate buffer is over target (largest DWPT first).
struct RamOrCountPolicy;

impl FlushPolicy for RamOrCountPolicy {
    fn on_insert(&self, ctl: &FlushControl, slot: usize) {
        if ctl.slot_docs(slot) >= ctl.config.max_buffered_docs {
            ctl.mark_flush_pending(slot);
            return;
        }
        if ctl.active_bytes() + ctl.delete_bytes.load(Ordering::Relaxed)
            >= ctl.config.ram_buffer_bytes
            && let Some(largest) = ctl.largest_non_pending_slot()
        {
            ctl.mark_flush_pending(largest);
        }
    }

    fn on_delete(&self, ctl: &FlushControl) {
        if ctl.delete_bytes.load(Ordering::Relaxed) + ctl.active_bytes()
            >= ctl.config.ram_buffer_bytes
            && let Some(largest) = ctl.largest_non_pending_slot()
        {
            ctl.mark_flush_pending(largest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ram: u64, docs: u32) -> WriterConfig {
        WriterConfig {
            max_thread_states: 2,
            ram_buffer_bytes: ram,
            max_buffered_docs: docs,
            stall_factor: 2.0,
        }
    }

    #[test]
    fn test_doc_count_trigger_flags_own_slot() {
        let ctl = FlushControl::new(config(1 << 30, 3));
        ctl.after_insert(0, 100, 1);
        ctl.after_insert(0, 200, 2);
        assert!(!ctl.is_pending(0));
        ctl.after_insert(0, 300, 3);
        assert!(ctl.is_pending(0));
        assert_eq!(ctl.flushing_bytes(), 300);
        assert_eq!(ctl.active_bytes(), 0);
    }

    #[test]
    fn test_ram_trigger_flags_largest() {
        let ctl = FlushControl::new(config(1000, u32::MAX));
        ctl.after_insert(0, 300, 5);
        ctl.after_insert(1, 800, 4);
        // Slot 1 is largest when the aggregate crosses 1000.
        assert!(ctl.is_pending(1));
        assert!(!ctl.is_pending(0));
    }

    #[test]
    fn test_checkout_releases_accounting() {
        let ctl = FlushControl::new(config(1 << 30, 2));
        ctl.after_insert(0, 500, 2);
        assert!(ctl.is_pending(0));
        let bytes = ctl.checkout_for_flush(0);
        assert_eq!(bytes, 500);
        assert_eq!(ctl.flushing_bytes(), 500);
        ctl.after_flush(bytes);
        assert_eq!(ctl.flushing_bytes(), 0);
        assert!(!ctl.is_pending(0));
    }

    #[test]
    fn test_stall_threshold() {
        let ctl = FlushControl::new(config(100, u32::MAX));
        ctl.after_insert(0, 150, 1);
        // 150 < 200 limit: no stall yet.
        assert!(!ctl.is_stalled());
        ctl.after_insert(1, 100, 1);
        assert!(ctl.is_stalled());
    }
}
