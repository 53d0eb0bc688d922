use std::collections::BTreeMap;

use tracing::debug;

use crate::library::MarkerLibrary;
use crate::models::{Chunk, ChunkScore, DimensionModel, MatchRecord, SpeakerScore};

/// Scoring configuration: the set of composite dimensions to compute
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub models: Vec<DimensionModel>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
        }
    }
}

/// The default dimension models. Risk-style scales start at 0 and rise
/// with negative behavior; health-style scales start at the midpoint
/// and move in both directions.
fn default_models() -> Vec<DimensionModel> {
    fn weights(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs
            .iter()
            .map(|(tag, w)| (tag.to_string(), *w))
            .collect()
    }

    vec![
        DimensionModel {
            name: "manipulation_index".to_string(),
            tag_weights: weights(&[
                ("manipulation", 2.0),
                ("gaslighting", 3.0),
                ("emotional_abuse", 2.5),
                ("love_bombing", 1.5),
                ("fraud", 3.0),
                ("positive", -1.0),
                ("empathy", -0.5),
                ("support", -0.5),
            ]),
            baseline: 0.0,
            scale: 10.0,
        },
        DimensionModel {
            name: "relationship_health".to_string(),
            tag_weights: weights(&[
                ("positive", 2.0),
                ("empathy", 2.5),
                ("support", 2.0),
                ("conflict_resolution", 1.5),
                ("manipulation", -2.0),
                ("gaslighting", -3.0),
                ("emotional_abuse", -2.5),
                ("fraud", -3.0),
            ]),
            baseline: 5.0,
            scale: 10.0,
        },
        DimensionModel {
            name: "fraud_probability".to_string(),
            tag_weights: weights(&[
                ("fraud", 3.0),
                ("financial_abuse", 2.5),
                ("love_bombing", 1.5),
                ("manipulation", 1.0),
                ("positive", -0.5),
                ("empathy", -0.3),
            ]),
            baseline: 0.0,
            scale: 10.0,
        },
        DimensionModel {
            name: "communication_quality".to_string(),
            tag_weights: weights(&[
                ("positive", 1.5),
                ("empathy", 2.0),
                ("support", 1.5),
                ("conflict_resolution", 2.0),
                ("boundary_setting", 1.0),
                ("self_care", 0.5),
                ("manipulation", -1.5),
                ("gaslighting", -2.0),
                ("emotional_abuse", -2.0),
            ]),
            baseline: 5.0,
            scale: 10.0,
        },
    ]
}

/// Converts surviving match records into weighted composite scores.
/// Pure function of its inputs: identical (chunk, match-set) pairs
/// always yield identical scores.
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn models(&self) -> &[DimensionModel] {
        &self.config.models
    }

    /// Score one chunk from its surviving match records. A dimension
    /// value is the weight-sum of record confidences over the marker's
    /// tags, normalized by the model scale and clamped to [0,10].
    pub fn score_chunk(
        &self,
        chunk: &Chunk,
        matches: &[MatchRecord],
        library: &MarkerLibrary,
        degraded: bool,
    ) -> ChunkScore {
        let mut dimensions = BTreeMap::new();

        for model in &self.config.models {
            let mut raw = 0.0f64;
            for record in matches {
                let Some(marker) = library.get(&record.marker_id) else {
                    continue;
                };
                for tag in &marker.tags {
                    raw += model.weight_for(tag) * marker.weight * record.confidence;
                }
            }
            let value = DimensionModel::clamp(model.baseline + raw * 10.0 / model.scale);
            dimensions.insert(model.name.clone(), value);
        }

        let mut markers_found: Vec<String> =
            matches.iter().map(|r| r.marker_id.clone()).collect();
        markers_found.sort();
        markers_found.dedup();

        debug!(
            "scored {}: {} markers, degraded={}",
            chunk.id,
            markers_found.len(),
            degraded
        );

        ChunkScore {
            chunk_id: chunk.id.clone(),
            chunk_index: chunk.index,
            speaker: chunk.speaker.clone(),
            dimensions,
            markers_found,
            degraded,
        }
    }
}

/// Mean of each dimension over all chunk scores
pub fn overall_scores(chunk_scores: &[ChunkScore]) -> BTreeMap<String, f64> {
    mean_dimensions(chunk_scores.iter())
}

/// Per-speaker dimension means, restricted to each speaker's chunks
pub fn speaker_scores(chunk_scores: &[ChunkScore]) -> Vec<SpeakerScore> {
    let mut by_speaker: BTreeMap<&str, Vec<&ChunkScore>> = BTreeMap::new();
    for score in chunk_scores {
        by_speaker.entry(&score.speaker).or_default().push(score);
    }

    by_speaker
        .into_iter()
        .map(|(speaker, scores)| SpeakerScore {
            speaker: speaker.to_string(),
            chunk_count: scores.len(),
            dimensions: mean_dimensions(scores.into_iter()),
        })
        .collect()
}

fn mean_dimensions<'a>(scores: impl Iterator<Item = &'a ChunkScore>) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for score in scores {
        for (name, &value) in &score.dimensions {
            let entry = sums.entry(name.clone()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(name, (sum, count))| (name, sum / count as f64))
        .collect()
}
