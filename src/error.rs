//! Error types for strata

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("docs out of order: doc {doc} after doc {prev}")]
    DocsOutOfOrder { doc: u32, prev: u32 },

    #[error("Indexing aborted: {0}")]
    Aborted(String),

    #[error("Writer is closed")]
    Closed,

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for failures that must discard the whole in-progress segment.
    pub fn is_aborting(&self) -> bool {
        matches!(
            self,
            Error::Aborted(_) | Error::DocsOutOfOrder { .. } | Error::Io(_)
        )
    }
}
