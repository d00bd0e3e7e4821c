//! Per-segment deletion bitmap.

use roaring::RoaringBitmap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{Error, Result};

/// Marks which docs of a segment are still visible. Internally stores the
/// deleted set; an empty bitmap means every doc is live.
#[derive(Debug, Clone, Default)]
pub struct LiveDocs {
    max_doc: u32,
    deleted: RoaringBitmap,
}

impl LiveDocs {
    pub fn new(max_doc: u32) -> Self {
        Self {
            max_doc,
            deleted: RoaringBitmap::new(),
        }
    }

    #[inline]
    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    #[inline]
    pub fn is_live(&self, doc: u32) -> bool {
        !self.deleted.contains(doc)
    }

    /// Mark a doc deleted; returns true if it was live before.
    pub fn delete(&mut self, doc: u32) -> bool {
        debug_assert!(doc < self.max_doc);
        self.deleted.insert(doc)
    }

    pub fn delete_all(&mut self, docs: &RoaringBitmap) -> u64 {
        let before = self.deleted.len();
        self.deleted |= docs;
        self.deleted.len() - before
    }

    pub fn num_deleted(&self) -> u64 {
        self.deleted.len()
    }

    pub fn num_live(&self) -> u32 {
        self.max_doc - self.deleted.len() as u32
    }

    pub fn deleted(&self) -> &RoaringBitmap {
        &self.deleted
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = BufWriter::new(File::create(path)?);
        self.deleted
            .serialize_into(&mut file)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(())
    }

    /// Load from disk; a missing file means no deletions.
    pub fn load(path: &Path, max_doc: u32) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(max_doc));
        }
        let file = BufReader::new(File::open(path)?);
        let deleted = RoaringBitmap::deserialize_from(file)
            .map_err(|e| Error::CorruptIndex(format!("bad live docs bitmap: {e}")))?;
        Ok(Self { max_doc, deleted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_and_counts() {
        let mut live = LiveDocs::new(10);
        assert_eq!(live.num_live(), 10);
        assert!(live.delete(3));
        assert!(!live.delete(3));
        assert!(live.delete(7));
        assert_eq!(live.num_deleted(), 2);
        assert_eq!(live.num_live(), 8);
        assert!(!live.is_live(3));
        assert!(live.is_live(4));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("livedocs.bin");
        let mut live = LiveDocs::new(100);
        live.delete(1);
        live.delete(50);
        live.save(&path).unwrap();

        let loaded = LiveDocs::load(&path, 100).unwrap();
        assert_eq!(loaded.num_deleted(), 2);
        assert!(!loaded.is_live(50));

        let missing = LiveDocs::load(&dir.path().join("absent.bin"), 5).unwrap();
        assert_eq!(missing.num_live(), 5);
    }
}
