//! Incremental emotion-sentinel parser.
//!
//! The LLM interleaves markers of the form `[[emotion:<name>]]` in its
//! output. The segmenter consumes the token stream chunk by chunk and cuts
//! it into segments: text before a marker is emitted with the previous
//! emotion (initially neutral), text after it takes the marker's emotion.
//! Markers may arrive split across chunk boundaries, so the parser holds
//! back the longest trailing piece that could still become a marker.
//! Marker syntax never reaches emitted content; `[[` sequences that cannot
//! form a marker are literal text.

use lumen_core::types::Emotion;

const SENTINEL_PREFIX: &str = "[[emotion:";
const SENTINEL_CLOSE: &str = "]]";
/// Longest emotion name the scanner will wait for; anything longer is
/// literal text, which bounds the held-back buffer.
const MAX_NAME_LEN: usize = 24;

/// One cut of the assistant reply, carrying a uniform emotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub content: String,
    pub emotion: Emotion,
}

enum SentinelScan {
    /// A full `[[emotion:<name>]]` starting at the probe position.
    Complete { consumed: usize, emotion: Emotion },
    /// The probe is a prefix of a marker; more input is needed.
    Partial,
    /// The probe cannot become a marker; `[[` is literal text.
    NotSentinel,
}

/// Streaming segment cutter.
#[derive(Debug, Default)]
pub struct EmotionSegmenter {
    /// Text accumulated for the segment currently being built.
    buffer: String,
    /// Held-back suffix that may still become a sentinel.
    pending: String,
    /// Emotion applied to the segment currently being built.
    current: Emotion,
}

impl EmotionSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one provider chunk; returns every segment completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        let mut work = std::mem::take(&mut self.pending);
        work.push_str(chunk);

        let mut segments = Vec::new();
        let mut rest = work.as_str();

        while !rest.is_empty() {
            match rest.find("[[") {
                None => {
                    // A single trailing '[' could still open a marker.
                    if let Some(stripped) = rest.strip_suffix('[') {
                        self.buffer.push_str(stripped);
                        self.pending.push('[');
                    } else {
                        self.buffer.push_str(rest);
                    }
                    rest = "";
                }
                Some(pos) => {
                    self.buffer.push_str(&rest[..pos]);
                    let probe = &rest[pos..];
                    match scan_sentinel(probe) {
                        SentinelScan::Complete { consumed, emotion } => {
                            if let Some(segment) = self.cut() {
                                segments.push(segment);
                            }
                            self.current = emotion;
                            rest = &probe[consumed..];
                        }
                        SentinelScan::Partial => {
                            self.pending = probe.to_string();
                            rest = "";
                        }
                        SentinelScan::NotSentinel => {
                            self.buffer.push_str("[[");
                            rest = &probe[2..];
                        }
                    }
                }
            }
        }

        segments
    }

    /// End of stream: flush whatever remains as the last segment.
    ///
    /// A held-back marker prefix that never completed is literal text.
    pub fn finish(mut self) -> Option<Segment> {
        self.buffer.push_str(&self.pending);
        self.pending.clear();
        self.cut()
    }

    /// Take the current buffer as a segment, discarding whitespace-only
    /// cuts.
    fn cut(&mut self) -> Option<Segment> {
        let content = std::mem::take(&mut self.buffer);
        if content.trim().is_empty() {
            None
        } else {
            Some(Segment {
                content,
                emotion: self.current,
            })
        }
    }
}

/// Classify text starting with `[` as a complete marker, a possible marker
/// prefix, or literal text.
fn scan_sentinel(probe: &str) -> SentinelScan {
    if probe.len() < SENTINEL_PREFIX.len() {
        return if SENTINEL_PREFIX.starts_with(probe) {
            SentinelScan::Partial
        } else {
            SentinelScan::NotSentinel
        };
    }
    if !probe.starts_with(SENTINEL_PREFIX) {
        return SentinelScan::NotSentinel;
    }

    let after_prefix = &probe[SENTINEL_PREFIX.len()..];
    let name_len = after_prefix
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_' && *c != '-')
        .map(|(i, _)| i)
        .unwrap_or(after_prefix.len());
    if name_len > MAX_NAME_LEN {
        return SentinelScan::NotSentinel;
    }
    let after_name = &after_prefix[name_len..];

    if after_name.is_empty() {
        // Name may continue in the next chunk.
        return SentinelScan::Partial;
    }
    if after_name.starts_with(SENTINEL_CLOSE) {
        let name = &after_prefix[..name_len];
        return SentinelScan::Complete {
            consumed: SENTINEL_PREFIX.len() + name_len + SENTINEL_CLOSE.len(),
            emotion: Emotion::parse(name),
        };
    }
    if after_name == "]" {
        // Might be the first half of ']]'.
        return SentinelScan::Partial;
    }
    SentinelScan::NotSentinel
}
