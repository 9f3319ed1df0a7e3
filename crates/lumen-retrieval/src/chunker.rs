//! Passage chunking with size/overlap policy.
//!
//! Splits extracted document text into overlapping character windows,
//! preferring to break just after a sentence end or newline once past half
//! the window. The policy is configurable but must stay stable across a
//! deployment: changing it invalidates persisted chunk offsets.

/// Size/overlap text splitter.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a chunker. `overlap` must be smaller than `chunk_size`;
    /// config validation enforces this before construction.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap,
        }
    }

    /// Split text into trimmed, non-empty chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < chars.len() {
            let mut end = (start + self.chunk_size).min(chars.len());

            if end < chars.len() {
                // Prefer a break right after '.', '!', '?' or a newline,
                // as long as it falls past half the window.
                let window = &chars[start..end];
                if let Some(pos) = window
                    .iter()
                    .rposition(|c| matches!(c, '.' | '!' | '?' | '\n'))
                {
                    if pos + 1 > self.chunk_size / 2 {
                        end = start + pos + 1;
                    }
                }
            }

            let chunk: String = chars[start..end].iter().collect();
            let trimmed = chunk.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }

            if end >= chars.len() {
                break;
            }
            // Overlap with the previous chunk, but always make progress.
            start = (end.saturating_sub(self.overlap)).max(start + 1);
        }

        chunks
    }
}
