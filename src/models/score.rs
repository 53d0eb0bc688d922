use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lower and upper bound of every composite dimension value
pub const SCALE_MIN: f64 = 0.0;
pub const SCALE_MAX: f64 = 10.0;

/// A composite scoring dimension: maps category tags to signed weights
/// and normalizes the weighted sum onto the 0-10 scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionModel {
    /// Dimension name (e.g. "manipulation_index")
    pub name: String,
    /// Tag -> signed contribution weight. Positive weights raise the
    /// dimension, negative weights lower it.
    pub tag_weights: BTreeMap<String, f64>,
    /// Starting value before contributions (5.0 for health-style
    /// scales, 0.0 for risk-style scales)
    pub baseline: f64,
    /// Normalization scale: a raw weighted sum equal to this value
    /// moves the dimension by the full 10 points
    pub scale: f64,
}

impl DimensionModel {
    /// Signed weight for a tag, 0.0 when the tag does not contribute
    pub fn weight_for(&self, tag: &str) -> f64 {
        self.tag_weights.get(&tag.to_ascii_lowercase()).copied().unwrap_or(0.0)
    }

    /// Clamp a computed value onto the dimension scale
    pub fn clamp(value: f64) -> f64 {
        value.clamp(SCALE_MIN, SCALE_MAX)
    }
}

/// Composite scores for one chunk. Created once by the scoring engine
/// and immutable afterwards. BTreeMap keys keep serialized output
/// deterministically ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkScore {
    pub chunk_id: String,
    pub chunk_index: usize,
    pub speaker: String,
    /// Dimension name -> clamped value in [0,10]
    pub dimensions: BTreeMap<String, f64>,
    /// Marker ids that contributed to this chunk's scores
    pub markers_found: Vec<String>,
    /// True when the embedding provider was unavailable for this chunk
    /// and only lexical matches were considered
    pub degraded: bool,
}

/// Aggregated per-speaker scores (mean over the speaker's chunks)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerScore {
    pub speaker: String,
    pub chunk_count: usize,
    pub dimensions: BTreeMap<String, f64>,
}
