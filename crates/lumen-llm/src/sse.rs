//! Minimal incremental server-sent-events decoder.
//!
//! Providers stream `data: <payload>` lines separated by newlines; payloads
//! may arrive split across arbitrary byte chunks. The decoder buffers
//! partial lines and yields complete payloads in order. Comment lines and
//! other SSE fields (`event:`, `id:`) are ignored by the callers that need
//! only the data payloads; `event:` lines are still surfaced for providers
//! that multiplex event types.

/// One decoded SSE line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// Payload of a `data:` line.
    Data(String),
    /// Name from an `event:` line.
    Event(String),
}

/// Incremental line decoder for an SSE byte stream.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns every complete line decoded so far.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseLine> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline_pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if let Some(data) = line.strip_prefix("data:") {
                lines.push(SseLine::Data(data.trim_start().to_string()));
            } else if let Some(event) = line.strip_prefix("event:") {
                lines.push(SseLine::Event(event.trim().to_string()));
            }
            // Blank lines (event separators) and other fields are skipped.
        }
        lines
    }
}
