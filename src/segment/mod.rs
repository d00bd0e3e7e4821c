//! Segment metadata, live docs, and the published-segment registry.

pub mod live_docs;
pub mod reader;
pub mod registry;

pub use live_docs::LiveDocs;
pub use reader::{IndexReader, SegmentReader};
pub use registry::{FileTracker, SegmentRegistry};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::codec::FieldCaps;

/// One indexed field's identity and capabilities within a segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub number: u32,
    pub caps: FieldCaps,
}

/// Metadata for one immutable segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub name: String,
    pub max_doc: u32,
    /// Whether the segment carries a pos / pay stream at all.
    pub has_positions: bool,
    pub has_payloads: bool,
    pub fields: Vec<FieldInfo>,
}

impl SegmentMeta {
    pub fn seg_dir(&self, index_dir: &Path) -> PathBuf {
        index_dir.join("segments").join(&self.name)
    }

    pub fn dict_path(&self, index_dir: &Path) -> PathBuf {
        self.seg_dir(index_dir).join("terms.dict")
    }

    pub fn doc_path(&self, index_dir: &Path) -> PathBuf {
        self.seg_dir(index_dir).join("terms.doc")
    }

    pub fn pos_path(&self, index_dir: &Path) -> Option<PathBuf> {
        self.has_positions
            .then(|| self.seg_dir(index_dir).join("terms.pos"))
    }

    pub fn pay_path(&self, index_dir: &Path) -> Option<PathBuf> {
        self.has_payloads
            .then(|| self.seg_dir(index_dir).join("terms.pay"))
    }

    pub fn live_docs_path(&self, index_dir: &Path) -> PathBuf {
        self.seg_dir(index_dir).join("livedocs.bin")
    }

    /// All files belonging to this segment, existing or not.
    pub fn files(&self, index_dir: &Path) -> Vec<PathBuf> {
        let mut files = vec![
            self.dict_path(index_dir),
            self.doc_path(index_dir),
            self.live_docs_path(index_dir),
        ];
        files.extend(self.pos_path(index_dir));
        files.extend(self.pay_path(index_dir));
        files
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Index metadata stored in meta.json.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexMeta {
    pub version: u32,
    pub segments: Vec<SegmentMeta>,
    pub updated_at: u64,
}

/// Segment name for the `n`-th segment cut by a writer session.
pub fn segment_name(n: u64) -> String {
    format!("seg_{n:04}")
}
