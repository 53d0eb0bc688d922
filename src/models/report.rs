use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RunWarning;

/// One aggregated time window of the output series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_end: Option<DateTime<Utc>>,
    /// Chunk index range covered by this window (used when the run fell
    /// back to positional windows and as a stable reference otherwise)
    pub first_chunk_index: usize,
    pub last_chunk_index: usize,
    pub chunk_count: usize,
    /// Dimension name -> mean chunk value within the window
    pub scores: BTreeMap<String, f64>,
    /// Marker id -> hit count within the window
    pub marker_hits: BTreeMap<String, usize>,
}

impl TimeWindow {
    /// Markers with the most hits in this window, descending, ties by id
    pub fn top_markers(&self, n: usize) -> Vec<(String, usize)> {
        let mut hits: Vec<(String, usize)> = self
            .marker_hits
            .iter()
            .map(|(id, &count)| (id.clone(), count))
            .collect();
        hits.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(n);
        hits
    }
}

/// A detected shift in the aggregated series. Produced only by the
/// aggregator and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePoint {
    /// Start of the window in which the shift was observed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Index of the window in the emitted series
    pub window_index: usize,
    /// Marker ids that triggered or dominated the shift
    pub markers: Vec<String>,
    /// Dimension whose value shifted; absent for pure
    /// marker-frequency crossings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    /// Magnitude of the shift (score delta or hit-count delta)
    pub magnitude: f64,
}

/// Per-chunk entry of the report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReport {
    pub id: String,
    pub speaker: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub markers_found: Vec<String>,
    pub scores: BTreeMap<String, f64>,
    pub degraded: bool,
}

/// The engine's sole externally-visible artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Unique id of this analysis run
    pub run_id: String,
    pub chunks: Vec<ChunkReport>,
    /// Dimension name -> mean over all chunks
    pub overall_scores: BTreeMap<String, f64>,
    /// Speaker -> dimension means over that speaker's chunks
    pub speaker_scores: BTreeMap<String, BTreeMap<String, f64>>,
    pub time_series: Vec<TimeWindow>,
    pub change_points: Vec<ChangePoint>,
    /// Marker id -> total surviving match count across the run
    pub marker_totals: BTreeMap<String, usize>,
    /// Non-fatal conditions recorded during the run
    pub warnings: Vec<RunWarning>,
    /// True when the run was cancelled and covers only a prefix of the
    /// transcript
    pub incomplete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_markers_ordering() {
        let mut hits = BTreeMap::new();
        hits.insert("B_MARKER".to_string(), 3);
        hits.insert("A_MARKER".to_string(), 3);
        hits.insert("C_MARKER".to_string(), 7);
        let window = TimeWindow {
            window_start: None,
            window_end: None,
            first_chunk_index: 0,
            last_chunk_index: 5,
            chunk_count: 6,
            scores: BTreeMap::new(),
            marker_hits: hits,
        };

        let top = window.top_markers(2);
        assert_eq!(top[0], ("C_MARKER".to_string(), 7));
        // Tie between A and B resolves alphabetically
        assert_eq!(top[1], ("A_MARKER".to_string(), 3));
    }
}
