//! Text chunking
//!
//! Splits a document into fixed-size overlapping windows measured in
//! characters. Chunking is deterministic: the same text and parameters
//! always produce the same chunks, and every character of the input is
//! covered by at least one chunk.

use resumatch_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};

/// A contiguous slice of a source document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Stable identifier, `{source_doc_id}:{ordinal}`
    pub id: String,

    pub source_doc_id: String,

    /// Position of this chunk within the document, starting at 0
    pub ordinal: usize,

    pub text: String,

    /// Inclusive start, in characters
    pub start_offset: usize,

    /// Exclusive end, in characters
    pub end_offset: usize,
}

/// Split `text` into overlapping windows of `size` characters advancing
/// by `size - overlap` each step.
pub fn chunk_text(
    source_doc_id: &str,
    text: &str,
    size: usize,
    overlap: usize,
) -> Result<Vec<TextChunk>> {
    if size == 0 {
        return Err(AppError::InvalidParameter {
            message: "chunk size must be greater than zero".to_string(),
        });
    }
    if overlap >= size {
        return Err(AppError::InvalidParameter {
            message: format!("chunk overlap {overlap} must be smaller than chunk size {size}"),
        });
    }

    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Char boundaries as byte offsets; the trailing entry closes the
    // last character
    let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    boundaries.push(text.len());
    let char_count = boundaries.len() - 1;

    let step = size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut ordinal = 0usize;

    loop {
        let end = (start + size).min(char_count);
        chunks.push(TextChunk {
            id: format!("{source_doc_id}:{ordinal}"),
            source_doc_id: source_doc_id.to_string(),
            ordinal,
            text: text[boundaries[start]..boundaries[end]].to_string(),
            start_offset: start,
            end_offset: end,
        });

        if end == char_count {
            break;
        }
        start += step;
        ordinal += 1;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thousand_chars_size_300_overlap_50() {
        let text = "a".repeat(1000);
        let chunks = chunk_text("doc", &text, 300, 50).unwrap();

        assert_eq!(chunks.len(), 4);
        assert_eq!((chunks[0].start_offset, chunks[0].end_offset), (0, 300));
        assert_eq!((chunks[1].start_offset, chunks[1].end_offset), (250, 550));
        assert_eq!((chunks[2].start_offset, chunks[2].end_offset), (500, 800));
        assert_eq!((chunks[3].start_offset, chunks[3].end_offset), (750, 1000));
    }

    #[test]
    fn test_every_character_covered() {
        let text: String = (0..777).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = chunk_text("doc", &text, 100, 20).unwrap();

        let mut covered = vec![false; 777];
        for chunk in &chunks {
            assert_eq!(chunk.text.chars().count(), chunk.end_offset - chunk.start_offset);
            for flag in &mut covered[chunk.start_offset..chunk.end_offset] {
                *flag = true;
            }
        }
        assert!(covered.iter().all(|&c| c));
    }

    #[test]
    fn test_deterministic() {
        let text = "Resume text with many repeated sections. ".repeat(30);
        let a = chunk_text("doc", &text, 120, 30).unwrap();
        let b = chunk_text("doc", &text, 120, 30).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_ordinals_sequential() {
        let text = "x".repeat(450);
        let chunks = chunk_text("doc", &text, 100, 10).unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i);
            assert_eq!(chunk.id, format!("doc:{i}"));
        }
    }

    #[test]
    fn test_text_shorter_than_window() {
        let chunks = chunk_text("doc", "short", 100, 10).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "short");
        assert_eq!(chunks[0].end_offset, 5);
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunk_text("doc", "", 100, 10).unwrap().is_empty());
    }

    #[test]
    fn test_multibyte_offsets_are_chars() {
        let text = "héllo wörld çombining tëxt".repeat(10);
        let char_count = text.chars().count();
        let chunks = chunk_text("doc", &text, 50, 10).unwrap();
        assert_eq!(chunks.last().unwrap().end_offset, char_count);
        for chunk in &chunks {
            assert_eq!(chunk.text.chars().count(), chunk.end_offset - chunk.start_offset);
        }
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(chunk_text("doc", "text", 0, 0).is_err());
        assert!(chunk_text("doc", "text", 10, 10).is_err());
        assert!(chunk_text("doc", "text", 10, 20).is_err());
    }
}
