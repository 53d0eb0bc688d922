use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single transcript utterance as supplied by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    /// Speaker identifier (display name or id, taken as-is)
    pub speaker: String,
    /// Utterance timestamp; absent timestamps trigger the positional
    /// ordering fallback, never an error
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Raw utterance text
    pub text: String,
}

/// Chunking strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Fixed-size token windows with optional overlap
    FixedSize { tokens: usize, overlap: usize },
    /// One chunk per contiguous same-speaker run
    SpeakerTurn,
    /// New chunk when the gap between consecutive utterances exceeds
    /// the threshold (a "session" boundary)
    TimeGap { max_gap_secs: i64 },
}

impl Default for ChunkingStrategy {
    fn default() -> Self {
        ChunkingStrategy::SpeakerTurn
    }
}

/// An analyzable unit of transcript. Chunks are non-overlapping by
/// default (fixed-size with overlap > 0 is the only exception) and
/// preserve transcript order: ascending index reproduces the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id derived from the sequence index
    pub id: String,
    /// Attributed speaker; for multi-speaker fixed-size chunks this is
    /// the majority speaker with ties broken by first-seen order
    pub speaker: String,
    /// Timestamp of the first contributing utterance
    pub start: Option<DateTime<Utc>>,
    /// Timestamp of the last contributing utterance
    pub end: Option<DateTime<Utc>>,
    /// Monotonic sequence index matching transcript order
    pub index: usize,
    /// Chunk text (utterance texts joined with newlines)
    pub text: String,
}

impl Chunk {
    /// Whitespace token count, used by the fixed-size strategy
    pub fn token_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Output of the chunker: the ordered chunk sequence plus any
/// non-fatal conditions hit along the way
#[derive(Debug, Clone)]
pub struct ChunkingResult {
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<crate::error::RunWarning>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utterance_timestamp_optional() {
        let json = r#"{"speaker": "anna", "text": "hallo"}"#;
        let utterance: Utterance = serde_json::from_str(json).unwrap();
        assert!(utterance.timestamp.is_none());
        assert_eq!(utterance.speaker, "anna");
    }

    #[test]
    fn test_utterance_parses_iso8601() {
        let json = r#"{"speaker": "ben", "timestamp": "2024-03-01T10:15:00Z", "text": "hi"}"#;
        let utterance: Utterance = serde_json::from_str(json).unwrap();
        assert!(utterance.timestamp.is_some());
    }

    #[test]
    fn test_token_count() {
        let chunk = Chunk {
            id: "chunk_0".to_string(),
            speaker: "anna".to_string(),
            start: None,
            end: None,
            index: 0,
            text: "das ist doch alles".to_string(),
        };
        assert_eq!(chunk.token_count(), 4);
    }
}
