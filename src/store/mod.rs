//! Byte-oriented storage primitives.
//!
//! The codec reads and writes named byte streams through two handles:
//! [`IndexOutput`] (buffered, checksummed writer) and [`IndexInput`]
//! (memory-mapped reader with cheap clones for independent cursors).
//! [`format`] defines the shared header/footer grammar.

pub mod format;
pub mod input;
pub mod output;
pub mod varint;

pub use input::IndexInput;
pub use output::IndexOutput;
pub use varint::*;
