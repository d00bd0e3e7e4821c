//! Registry of published segments plus file-cleanup tracking.

use roaring::RoaringBitmap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::segment::{IndexMeta, LiveDocs, SegmentMeta};

const META_VERSION: u32 = 1;

struct SegmentEntry {
    meta: SegmentMeta,
    live: LiveDocs,
}

/// The visible segment set for one writer session.
///
/// Guarded by a single lock: publication and checkpointing are
/// low-frequency relative to document indexing.
pub struct SegmentRegistry {
    dir: PathBuf,
    inner: Mutex<Vec<SegmentEntry>>,
    files: FileTracker,
}

impl SegmentRegistry {
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir.join("segments"))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            inner: Mutex::new(Vec::new()),
            files: FileTracker::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self) -> &FileTracker {
        &self.files
    }

    /// Add a flushed segment to the visible set.
    pub fn publish(&self, meta: SegmentMeta, live: LiveDocs) {
        log::info!(
            "publishing segment {} ({} docs, {} deleted)",
            meta.name,
            meta.max_doc,
            live.num_deleted()
        );
        self.inner.lock().unwrap().push(SegmentEntry { meta, live });
    }

    /// Apply a deletion bitmap to one published segment. Returns how many
    /// docs went from live to deleted.
    pub fn delete_docs(&self, segment: &str, docs: &RoaringBitmap) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        match inner.iter_mut().find(|e| e.meta.name == segment) {
            Some(entry) => entry.live.delete_all(docs),
            None => 0,
        }
    }

    pub fn segment_metas(&self) -> Vec<SegmentMeta> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.meta.clone())
            .collect()
    }

    pub fn num_segments(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn num_docs(&self) -> u64 {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.live.num_live() as u64)
            .sum()
    }

    /// Persist live-docs bitmaps and meta.json.
    pub fn checkpoint(&self) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        for entry in inner.iter() {
            if entry.live.num_deleted() > 0 {
                entry.live.save(&entry.meta.live_docs_path(&self.dir))?;
            }
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let meta = IndexMeta {
            version: META_VERSION,
            segments: inner.iter().map(|e| e.meta.clone()).collect(),
            updated_at: now,
        };
        drop(inner);

        let meta_path = self.dir.join("meta.json");
        let file = File::create(&meta_path)?;
        serde_json::to_writer_pretty(file, &meta).map_err(|e| Error::Serialization(e.to_string()))?;
        log::debug!("checkpoint written: {} segments", meta.segments.len());
        Ok(())
    }
}

/// Tracks files scheduled for removal after failed or aborted flushes.
///
/// Cleanup is best-effort: a file that cannot be removed is logged and
/// retried at the next sweep, never surfaced as an error.
#[derive(Default)]
pub struct FileTracker {
    pending_delete: Mutex<Vec<PathBuf>>,
}

impl FileTracker {
    pub fn schedule_delete(&self, files: Vec<PathBuf>) {
        if files.is_empty() {
            return;
        }
        log::debug!("scheduling {} files for deletion", files.len());
        self.pending_delete.lock().unwrap().extend(files);
    }

    /// Attempt to remove everything scheduled; keep what still fails.
    pub fn delete_pending(&self) {
        let mut pending = self.pending_delete.lock().unwrap();
        pending.retain(|path| {
            if !path.exists() {
                return false;
            }
            match fs::remove_file(path) {
                Ok(()) => false,
                Err(e) => {
                    log::warn!("could not remove {}: {e}", path.display());
                    true
                }
            }
        });
    }

    pub fn num_pending(&self) -> usize {
        self.pending_delete.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FieldCaps, IndexOptions};
    use crate::segment::FieldInfo;

    fn meta(name: &str, max_doc: u32) -> SegmentMeta {
        SegmentMeta {
            name: name.to_string(),
            max_doc,
            has_positions: false,
            has_payloads: false,
            fields: vec![FieldInfo {
                name: "body".to_string(),
                number: 0,
                caps: FieldCaps::new(IndexOptions::DocsAndFreqs, false),
            }],
        }
    }

    #[test]
    fn test_publish_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SegmentRegistry::create(dir.path()).unwrap();
        registry.publish(meta("seg_0000", 10), LiveDocs::new(10));
        let mut live = LiveDocs::new(20);
        live.delete(5);
        registry.publish(meta("seg_0001", 20), live);

        assert_eq!(registry.num_segments(), 2);
        assert_eq!(registry.num_docs(), 29);
        registry.checkpoint().unwrap();

        let meta_file = File::open(dir.path().join("meta.json")).unwrap();
        let loaded: IndexMeta = serde_json::from_reader(meta_file).unwrap();
        assert_eq!(loaded.segments.len(), 2);
    }

    #[test]
    fn test_file_tracker_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.bin");
        std::fs::write(&path, b"x").unwrap();

        let tracker = FileTracker::default();
        tracker.schedule_delete(vec![path.clone(), dir.path().join("never-existed.bin")]);
        tracker.delete_pending();
        assert!(!path.exists());
        assert_eq!(tracker.num_pending(), 0);
    }
}
