//! Pre-analyzed document model.
//!
//! Analysis lives outside this crate: fields arrive as token sequences
//! with positions already assigned. [`Document::add_text`] is a whitespace
//! convenience for tests and tooling, not an analyzer.

use crate::codec::{FieldCaps, IndexOptions};

/// A field/term pair, the unit of deletion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Term {
    pub field: String,
    pub text: Vec<u8>,
}

impl Term {
    pub fn new(field: &str, text: &str) -> Self {
        Self {
            field: field.to_string(),
            text: text.as_bytes().to_vec(),
        }
    }
}

/// One term occurrence within a field.
#[derive(Debug, Clone)]
pub struct Token {
    pub term: Vec<u8>,
    pub position: u32,
    pub payload: Option<Vec<u8>>,
    pub offsets: Option<(u32, u32)>,
}

impl Token {
    pub fn new(term: &str, position: u32) -> Self {
        Self {
            term: term.as_bytes().to_vec(),
            position,
            payload: None,
            offsets: None,
        }
    }
}

/// One field of a document: a name, its declared capabilities, and tokens.
#[derive(Debug, Clone)]
pub struct FieldValue {
    pub name: String,
    pub caps: FieldCaps,
    pub tokens: Vec<Token>,
}

/// An ordered set of field values.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub fields: Vec<FieldValue>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, field: FieldValue) -> &mut Self {
        self.fields.push(field);
        self
    }

    /// Split `text` on whitespace into tokens with sequential positions and
    /// byte offsets.
    pub fn add_text(&mut self, name: &str, options: IndexOptions, text: &str) -> &mut Self {
        let mut tokens = Vec::new();
        let mut position = 0u32;
        let mut byte_pos = 0usize;
        for word in text.split_whitespace() {
            // split_whitespace discards offsets; recover them by searching
            // forward from the previous token's end.
            let start = text[byte_pos..].find(word).map(|i| byte_pos + i).unwrap_or(byte_pos);
            let end = start + word.len();
            byte_pos = end;
            tokens.push(Token {
                term: word.as_bytes().to_vec(),
                position,
                payload: None,
                offsets: options
                    .has_offsets()
                    .then_some((start as u32, end as u32)),
            });
            position += 1;
        }
        self.fields.push(FieldValue {
            name: name.to_string(),
            caps: FieldCaps::new(options, false),
            tokens,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_text_positions_and_offsets() {
        let mut doc = Document::new();
        doc.add_text(
            "body",
            IndexOptions::DocsAndFreqsAndPositionsAndOffsets,
            "hello brave  world",
        );
        let field = &doc.fields[0];
        assert_eq!(field.tokens.len(), 3);
        assert_eq!(field.tokens[0].position, 0);
        assert_eq!(field.tokens[2].position, 2);
        assert_eq!(field.tokens[0].offsets, Some((0, 5)));
        assert_eq!(field.tokens[2].offsets, Some((13, 18)));
    }
}
