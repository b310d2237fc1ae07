//! Boundary-aware text chunker with overlap.
//!
//! Splits a [`Document`]'s text into [`Chunk`]s of at most `max_size`
//! characters. Consecutive chunks share exactly `overlap` characters, so
//! dropping each later chunk's leading overlap and concatenating the rest
//! reconstructs the original text (see [`reconstruct`]).
//!
//! Each chunk receives a deterministic UUID derived from its document ID
//! and index, plus a SHA-256 hash of its text.
//!
//! # Algorithm
//!
//! Sizes are measured in Unicode scalar values, never bytes. For each
//! window `[start, start + max_size)` that does not reach the end of the
//! text, the cut point is the right-most of, in order of preference:
//!
//! 1. a paragraph break (`\n\n`) in the back half of the window,
//! 2. a sentence break (`.`, `!` or `?` followed by whitespace, or a
//!    newline) in the back half of the window,
//! 3. any whitespace past the overlap region,
//! 4. a hard cut at `max_size`.
//!
//! The next window starts `overlap` characters before the cut. Cut points
//! always lie past `start + overlap`, so every window makes progress.
//!
//! # Example
//!
//! ```rust
//! use ragchat_core::chunk::{chunk_document, reconstruct};
//! use ragchat_core::models::Document;
//!
//! let doc = Document::new("notes.md", "Hello world.\n\nSecond paragraph.");
//! let chunks = chunk_document(&doc, 20, 4).unwrap();
//! assert_eq!(chunks[0].text, "Hello world.\n\n");
//! assert_eq!(reconstruct(&chunks), doc.text);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document};

/// Check a `(max_size, overlap)` pair without chunking anything.
pub fn validate_params(max_size: usize, overlap: usize) -> Result<()> {
    if max_size == 0 {
        return Err(RagError::InvalidConfig(
            "chunk_size must be greater than zero".to_string(),
        ));
    }
    if overlap >= max_size {
        return Err(RagError::InvalidConfig(format!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            overlap, max_size
        )));
    }
    Ok(())
}

/// Split a document into chunks of at most `max_size` characters.
///
/// Returns chunks with contiguous indices starting at 0, in source order.
/// Chunk 0 has `overlap == 0`; every later chunk begins with the last
/// `overlap` characters of its predecessor. A document with empty text
/// yields no chunks.
///
/// # Errors
///
/// [`RagError::InvalidConfig`] when `max_size == 0` or `overlap >= max_size`.
pub fn chunk_document(doc: &Document, max_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    validate_params(max_size, overlap)?;

    let chars: Vec<char> = doc.text.chars().collect();
    let total = chars.len();
    let mut chunks = Vec::new();
    if total == 0 {
        return Ok(chunks);
    }

    let mut start = 0;
    loop {
        let hard_end = (start + max_size).min(total);
        let end = if hard_end == total {
            total
        } else {
            find_break(&chars, start, start + overlap + 1, hard_end, max_size)
        };

        let text: String = chars[start..end].iter().collect();
        let shared = if chunks.is_empty() { 0 } else { overlap };
        chunks.push(make_chunk(doc, chunks.len(), text, shared));

        if end == total {
            break;
        }
        start = end - overlap;
    }

    Ok(chunks)
}

/// Rebuild the source text from a document's chunks, in order.
pub fn reconstruct(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        out.extend(chunk.text.chars().skip(chunk.overlap));
    }
    out
}

/// Choose a cut point in `[lo, hi]` (exclusive end of the chunk).
///
/// `chars[hi]` exists because `hi` is only searched when it is short of
/// the end of the text.
fn find_break(chars: &[char], start: usize, lo: usize, hi: usize, max_size: usize) -> usize {
    let soft_lo = lo.max(start + max_size / 2);

    let paragraph = (soft_lo.max(2)..=hi)
        .rev()
        .find(|&b| chars[b - 2] == '\n' && chars[b - 1] == '\n');
    if let Some(b) = paragraph {
        return b;
    }

    let sentence = (soft_lo.max(1)..=hi).rev().find(|&b| {
        chars[b - 1] == '\n' || (matches!(chars[b - 1], '.' | '!' | '?') && chars[b].is_whitespace())
    });
    if let Some(b) = sentence {
        return b;
    }

    let space = (lo.max(1)..=hi).rev().find(|&b| chars[b - 1].is_whitespace());
    space.unwrap_or(hi)
}

/// Create a single [`Chunk`] with a deterministic UUID and SHA-256 content hash.
fn make_chunk(doc: &Document, index: usize, text: String, overlap: usize) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let key = format!("{}:{}", doc.id, index);
    Chunk {
        id: Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string(),
        document_id: doc.id.clone(),
        source: doc.source.clone(),
        chunk_index: index,
        text,
        overlap,
        hash,
    }
}
