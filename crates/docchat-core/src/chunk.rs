//! Page-aware, paragraph-boundary text chunker.
//!
//! Splits the extracted text of each PDF page into [`Chunk`]s that respect
//! a configurable `max_tokens` limit. Chunks never span pages, so every
//! chunk carries exact page provenance.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Split each page's text on `\n\n` paragraph boundaries.
//! 3. Accumulate paragraphs into a buffer until adding the next paragraph
//!    would exceed `max_chars`, then flush the buffer as a chunk.
//! 4. A single paragraph longer than `max_chars` is split at the last
//!    sentence end inside the limit, else the last newline, else the last
//!    space, else at the nearest UTF-8 char boundary.
//! 5. Whitespace-only pieces are dropped. Chunk indices are contiguous
//!    across the whole document.
//!
//! Each chunk's `id` is the SHA-256 of its text.
//!
//! # Example
//!
//! ```rust
//! use docchat_core::chunk::chunk_pages;
//!
//! let pages = vec!["Intro.".to_string(), "Hello world.\n\nSecond paragraph.".to_string()];
//! let chunks = chunk_pages("report.pdf", &pages, 700);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].page, 2);
//! assert_eq!(chunks[1].chunk_index, 1);
//! ```

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Sentence terminators considered when splitting an oversized paragraph.
const SENTENCE_ENDS: [&str; 3] = [". ", "! ", "? "];

/// Chunk every page of a document. `pages[0]` is page 1.
pub fn chunk_pages(document: &str, pages: &[String], max_tokens: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for (i, text) in pages.iter().enumerate() {
        let next_index = chunks.len() as i64;
        chunks.extend(chunk_page(document, i as u32 + 1, text, max_tokens, next_index));
    }
    chunks
}

/// Split one page's text into chunks, numbering them from `first_index`.
///
/// Returns an empty vector when the page has no visible text.
pub fn chunk_page(
    document: &str,
    page: u32,
    text: &str,
    max_tokens: usize,
    first_index: i64,
) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            pieces.extend(split_oversized(trimmed, max_chars));
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(document, page, first_index + i as i64, &piece))
        .collect()
}

/// Break a paragraph longer than `max_chars` into bounded pieces.
fn split_oversized(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = paragraph;

    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            let piece = remaining.trim();
            if !piece.is_empty() {
                out.push(piece.to_string());
            }
            break;
        }

        let limit = snap_to_char_boundary(remaining, max_chars);
        let window = &remaining[..limit];
        let split_at = last_sentence_end(window)
            .or_else(|| window.rfind('\n').map(|pos| pos + 1))
            .or_else(|| window.rfind(' ').map(|pos| pos + 1))
            .filter(|&pos| pos > 0)
            .unwrap_or(limit);
        let split_at = if split_at == 0 {
            // max_chars is smaller than the first character
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split_at
        };

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }

    out
}

/// Byte offset just past the last sentence terminator in `window`.
fn last_sentence_end(window: &str) -> Option<usize> {
    SENTENCE_ENDS
        .iter()
        .filter_map(|end| window.rfind(end).map(|pos| pos + end.len()))
        .max()
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// SHA-256 hex digest of a chunk's text; the chunk's index key.
pub fn content_id(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(document: &str, page: u32, index: i64, text: &str) -> Chunk {
    Chunk {
        id: content_id(text),
        document: document.to_string(),
        page,
        chunk_index: index,
        text: text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_small_page_single_chunk() {
        let chunks = chunk_pages("doc.pdf", &pages(&["Hello, world!"]), 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].page, 1);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_pages_produce_no_chunks() {
        let chunks = chunk_pages("doc.pdf", &pages(&["", "   \n\n  "]), 700);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_chunks_never_span_pages() {
        let chunks = chunk_pages("doc.pdf", &pages(&["Page one.", "", "Page three."]), 700);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page, 1);
        assert_eq!(chunks[1].page, 3);
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn test_multiple_paragraphs_exceed_limit() {
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_pages("doc.pdf", &pages(&[text]), 8);
        assert_eq!(chunks.len(), 3);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_chunk_indices_contiguous_across_pages() {
        let page = (0..30)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_pages("doc.pdf", &[page.clone(), page], 10);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_oversized_paragraph_prefers_sentence_boundary() {
        let text = "The first sentence is here. The second sentence follows it closely.";
        // 10 tokens = 40 chars; the first sentence ends at byte 28
        let chunks = chunk_pages("doc.pdf", &pages(&[text]), 10);
        assert_eq!(chunks[0].text, "The first sentence is here.");
        for c in &chunks {
            assert!(c.text.len() <= 40);
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunk_pages("doc.pdf", &pages(&[text]), 3);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn test_ids_are_content_hashes() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_pages("a.pdf", &pages(&[text]), 2);
        let c2 = chunk_pages("b.pdf", &pages(&[text]), 2);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.id, content_id(&a.text));
        }
    }
}
