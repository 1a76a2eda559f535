//! Recursive character splitting of page text into retrieval chunks.
//!
//! Text is split on the coarsest separator present (paragraph break, line break, sentence stop,
//! space), with each separator kept at the start of the piece that follows it. Pieces that are
//! still too long are split again with the finer separators; the rest are merged greedily into
//! chunks of at most `chunk_size` characters. When a chunk is emitted, trailing pieces totalling
//! no more than `chunk_overlap` characters are carried into the next one.
//!
//! Lengths are counted in characters, not bytes or tokens.

use std::collections::VecDeque;

use super::types::{Chunk, ChunkingError, DocumentRecord};

const SEPARATORS: &[&str] = &["\n\n", "\n", ".", " "];

/// Splitter configured with a chunk size and overlap.
#[derive(Debug, Clone, Copy)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveSplitter {
    /// Validate the configuration and build a splitter.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(ChunkingError::InvalidOverlap {
                overlap: chunk_overlap,
                size: chunk_size,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Split a single text into trimmed, non-empty chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_with(text, SEPARATORS)
            .into_iter()
            .filter_map(|chunk| {
                let trimmed = chunk.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .collect()
    }

    /// Split every record, numbering chunks across the whole sequence.
    ///
    /// Each chunk inherits the page and source of the record it came from.
    pub fn split_records(&self, records: &[DocumentRecord]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for record in records {
            for text in self.split_text(&record.text) {
                chunks.push(Chunk {
                    text,
                    page: record.page,
                    source: record.source.clone(),
                    ordinal: chunks.len(),
                });
            }
        }
        chunks
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, finer) = match separators.iter().position(|sep| text.contains(*sep)) {
            Some(index) => (separators[index], &separators[index + 1..]),
            None => (separators[separators.len() - 1], &separators[..0]),
        };

        let mut chunks = Vec::new();
        let mut short_pieces = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                short_pieces.push(piece);
                continue;
            }

            if !short_pieces.is_empty() {
                chunks.extend(self.merge_pieces(&short_pieces));
                short_pieces.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_with(piece, finer));
            }
        }

        if !short_pieces.is_empty() {
            chunks.extend(self.merge_pieces(&short_pieces));
        }
        chunks
    }

    fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let mut merged = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                if total > self.chunk_size {
                    tracing::warn!(
                        length = total,
                        chunk_size = self.chunk_size,
                        "Created a chunk longer than the configured size"
                    );
                }
                push_joined(&mut merged, &window);

                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            window.push_back((piece, len));
            total += len;
        }

        push_joined(&mut merged, &window);
        merged
    }
}

fn push_joined(merged: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        merged.push(trimmed.to_string());
    }
}

/// Split `text` on `separator`, attaching each separator to the start of the following piece.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (index, _) in text.match_indices(separator) {
        if index > start {
            pieces.push(&text[start..index]);
        }
        start = index;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
