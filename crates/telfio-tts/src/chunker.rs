// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sentence batching for providers without streaming text input.
//!
//! Incoming token text accumulates until a sentence boundary (`.`, `?`,
//! `!`) or 120 characters, whichever comes first; each flush becomes one
//! synthesis request.

/// Maximum batch length in characters before a forced flush.
pub const MAX_BATCH_CHARS: usize = 120;

/// Accumulates streamed text and yields synthesis-ready batches.
#[derive(Debug, Default)]
pub struct SentenceChunker {
    buf: String,
}

impl SentenceChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds incremental text, returning any batches that became complete.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        let mut ready = Vec::new();
        for ch in text.chars() {
            self.buf.push(ch);
            let boundary = matches!(ch, '.' | '?' | '!');
            if boundary || self.buf.chars().count() >= MAX_BATCH_CHARS {
                let batch = std::mem::take(&mut self.buf);
                let batch = batch.trim().to_string();
                if !batch.is_empty() {
                    ready.push(batch);
                }
            }
        }
        ready
    }

    /// Flushes any trailing text that never hit a boundary.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        let rest = rest.trim().to_string();
        if rest.is_empty() { None } else { Some(rest) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_sentence_boundaries() {
        let mut chunker = SentenceChunker::new();
        let batches = chunker.push("Olá. Tudo bem? Sim");
        assert_eq!(batches, vec!["Olá.", "Tudo bem?"]);
        assert_eq!(chunker.flush().as_deref(), Some("Sim"));
    }

    #[test]
    fn boundary_may_arrive_across_pushes() {
        let mut chunker = SentenceChunker::new();
        assert!(chunker.push("Sem fronteira ainda").is_empty());
        let batches = chunker.push(" aqui.");
        assert_eq!(batches, vec!["Sem fronteira ainda aqui."]);
        assert!(chunker.flush().is_none());
    }

    #[test]
    fn long_text_flushes_at_cap() {
        let mut chunker = SentenceChunker::new();
        let long = "a".repeat(MAX_BATCH_CHARS * 2 + 10);
        let batches = chunker.push(&long);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.chars().count() == MAX_BATCH_CHARS));
        assert_eq!(chunker.flush().map(|b| b.len()), Some(10));
    }

    #[test]
    fn whitespace_only_batches_are_dropped() {
        let mut chunker = SentenceChunker::new();
        assert!(chunker.push("   .").is_empty());
        assert!(chunker.flush().is_none());
    }
}
