use regex::Regex;
use serde::{Deserialize, Serialize};

/// A marker definition as supplied by an external source (one entry per
/// marker). Format loaders are adapters; this is the canonical shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerDefinition {
    /// Globally unique marker id (e.g. "GASLIGHTING")
    pub id: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Semantic anchor exemplars used to build reference embeddings
    #[serde(default)]
    pub examples: Vec<String>,
    /// Lexical patterns (regex source strings, compiled case-insensitive)
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Category tags (e.g. "manipulation", "positive", "fraud")
    #[serde(default)]
    pub tags: Vec<String>,
    /// Scoring weight
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// A compiled marker, ready for matching. Built once at library load and
/// immutable for the rest of the run.
#[derive(Debug, Clone)]
pub struct Marker {
    pub id: String,
    pub description: String,
    pub tags: Vec<String>,
    pub weight: f64,
    /// Compiled case-insensitive lexical patterns. Empty for
    /// needs-review markers: the placeholder regex must never run.
    pub patterns: Vec<Regex>,
    /// Anchor exemplars for semantic matching
    pub examples: Vec<String>,
    /// True when the definition carries only an unresolved placeholder.
    /// Excluded from active matching unless explicitly overridden.
    pub needs_review: bool,
    /// Reference embeddings for the anchor exemplars, filled once by
    /// the library's semantic preparation step
    pub anchor_embeddings: Vec<Vec<f32>>,
}

impl Marker {
    /// Whether this marker carries a given tag (case-insensitive)
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Whether semantic matching is possible for this marker
    pub fn has_anchors(&self) -> bool {
        !self.anchor_embeddings.is_empty()
    }
}

/// How a match was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// A lexical pattern hit (score always 1.0)
    Lexical,
    /// Cosine similarity of the chunk embedding against anchor
    /// embeddings met the threshold
    Semantic,
}

/// Byte span of a lexical hit within the chunk text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSpan {
    pub start: usize,
    pub end: usize,
}

/// One surviving match of a marker against a chunk.
///
/// At most one record exists per (chunk, marker, kind): repeated pattern
/// hits within a chunk collapse into a single record carrying the
/// maximum confidence and the first span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub chunk_id: String,
    /// Sequence index of the chunk, used for ordered folding
    pub chunk_index: usize,
    pub marker_id: String,
    pub kind: MatchKind,
    /// Confidence in [0,1]; 1.0 for lexical hits
    pub confidence: f64,
    /// Matched span, lexical hits only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<MatchSpan>,
}
