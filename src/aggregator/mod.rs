use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::models::{ChangePoint, Chunk, ChunkScore, TimeWindow};

/// Aggregation configuration
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Window width in seconds when timestamps are available
    pub window_secs: i64,
    /// Chunks per window when the run fell back to positional ordering
    pub fallback_chunk_window: usize,
    /// Minimum dimension shift between consecutive windows that
    /// emits a change point
    pub score_delta: f64,
    /// Per-window marker hit count whose crossing from below emits a
    /// change point
    pub marker_frequency: usize,
    /// How many top-hitting markers to attach to a score-shift point
    pub top_marker_count: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            window_secs: 3_600,
            fallback_chunk_window: 10,
            score_delta: 2.0,
            marker_frequency: 5,
            top_marker_count: 3,
        }
    }
}

/// Fold chunk scores into time-ordered windows and flag change points.
///
/// The per-window fold (sums and counts) is commutative over chunk
/// order, but window assignment is timestamp-dependent: scores are
/// sorted by chunk index first and windows are closed and emitted
/// strictly in ascending order (gather, sort, fold). The per-window
/// value is the arithmetic mean of the chunk dimension values.
pub fn aggregate(
    chunks: &[Chunk],
    chunk_scores: &[ChunkScore],
    config: &AggregationConfig,
) -> (Vec<TimeWindow>, Vec<ChangePoint>) {
    if chunk_scores.is_empty() {
        return (vec![], vec![]);
    }

    // Gather-then-sort: parallel workers may deliver out of order
    let mut ordered: Vec<&ChunkScore> = chunk_scores.iter().collect();
    ordered.sort_by_key(|s| s.chunk_index);

    let starts: BTreeMap<usize, DateTime<Utc>> = chunks
        .iter()
        .filter_map(|c| c.start.map(|t| (c.index, t)))
        .collect();

    let all_timed = ordered.iter().all(|s| starts.contains_key(&s.chunk_index));
    let windows = if all_timed {
        timed_windows(&ordered, &starts, config)
    } else {
        debug!("timestamps unavailable, using positional windows");
        positional_windows(&ordered, config)
    };

    let change_points = detect_change_points(&windows, config);

    info!(
        "aggregated {} chunks into {} windows, {} change points",
        chunk_scores.len(),
        windows.len(),
        change_points.len()
    );

    (windows, change_points)
}

/// Fixed-duration windows spanning the timestamp range. Empty windows
/// are skipped; occupied windows are emitted in ascending time order.
fn timed_windows(
    ordered: &[&ChunkScore],
    starts: &BTreeMap<usize, DateTime<Utc>>,
    config: &AggregationConfig,
) -> Vec<TimeWindow> {
    let width = Duration::seconds(config.window_secs.max(1));
    let Some(origin) = ordered
        .iter()
        .filter_map(|s| starts.get(&s.chunk_index))
        .min()
        .copied()
    else {
        return vec![];
    };

    // Window ordinal -> member scores; BTreeMap keeps ascending order
    let mut buckets: BTreeMap<i64, Vec<&ChunkScore>> = BTreeMap::new();
    for score in ordered {
        let t = starts[&score.chunk_index];
        let ordinal = t.signed_duration_since(origin).num_seconds() / width.num_seconds();
        buckets.entry(ordinal).or_default().push(score);
    }

    buckets
        .into_iter()
        .map(|(ordinal, members)| {
            let window_start = origin + Duration::seconds(width.num_seconds() * ordinal);
            let mut window = fold_window(&members);
            window.window_start = Some(window_start);
            window.window_end = Some(window_start + width);
            window
        })
        .collect()
}

/// Count-based session windows over chunk indices, used when the run
/// fell back to positional ordering
fn positional_windows(ordered: &[&ChunkScore], config: &AggregationConfig) -> Vec<TimeWindow> {
    ordered
        .chunks(config.fallback_chunk_window.max(1))
        .map(fold_window)
        .collect()
}

/// The commutative per-window fold: dimension sums/counts and marker
/// hit counts over the member chunks
fn fold_window(members: &[&ChunkScore]) -> TimeWindow {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    let mut marker_hits: BTreeMap<String, usize> = BTreeMap::new();

    for score in members {
        for (name, &value) in &score.dimensions {
            let entry = sums.entry(name.clone()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
        for marker in &score.markers_found {
            *marker_hits.entry(marker.clone()).or_insert(0) += 1;
        }
    }

    let scores = sums
        .into_iter()
        .map(|(name, (sum, count))| (name, sum / count as f64))
        .collect();

    TimeWindow {
        window_start: None,
        window_end: None,
        first_chunk_index: members.iter().map(|s| s.chunk_index).min().unwrap_or(0),
        last_chunk_index: members.iter().map(|s| s.chunk_index).max().unwrap_or(0),
        chunk_count: members.len(),
        scores,
        marker_hits,
    }
}

/// Emit change points for (a) dimension shifts between consecutive
/// windows beyond the delta and (b) marker hit counts crossing the
/// frequency threshold from below. One emission per crossing event.
fn detect_change_points(windows: &[TimeWindow], config: &AggregationConfig) -> Vec<ChangePoint> {
    let mut points = Vec::new();

    for (i, pair) in windows.windows(2).enumerate() {
        let (prev, curr) = (&pair[0], &pair[1]);
        let window_index = i + 1;

        for (dimension, &value) in &curr.scores {
            let Some(&prev_value) = prev.scores.get(dimension) else {
                continue;
            };
            let magnitude = (value - prev_value).abs();
            if magnitude > config.score_delta {
                points.push(ChangePoint {
                    timestamp: curr.window_start,
                    window_index,
                    markers: curr
                        .top_markers(config.top_marker_count)
                        .into_iter()
                        .map(|(id, _)| id)
                        .collect(),
                    dimension: Some(dimension.clone()),
                    magnitude,
                });
            }
        }

        for (marker, &count) in &curr.marker_hits {
            let prev_count = prev.marker_hits.get(marker).copied().unwrap_or(0);
            if prev_count < config.marker_frequency && count >= config.marker_frequency {
                points.push(ChangePoint {
                    timestamp: curr.window_start,
                    window_index,
                    markers: vec![marker.clone()],
                    dimension: None,
                    magnitude: (count - prev_count) as f64,
                });
            }
        }
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn chunk_at(index: usize, minute: Option<u32>) -> Chunk {
        Chunk {
            id: format!("chunk_{}", index),
            speaker: "anna".to_string(),
            start: minute.map(|m| Utc.with_ymd_and_hms(2024, 3, 1, 10 + m / 60, m % 60, 0).unwrap()),
            end: None,
            index,
            text: String::new(),
        }
    }

    fn score_at(index: usize, manipulation: f64, markers: Vec<&str>) -> ChunkScore {
        let mut dimensions = BTreeMap::new();
        dimensions.insert("manipulation_index".to_string(), manipulation);
        ChunkScore {
            chunk_id: format!("chunk_{}", index),
            chunk_index: index,
            speaker: "anna".to_string(),
            dimensions,
            markers_found: markers.into_iter().map(String::from).collect(),
            degraded: false,
        }
    }

    #[test]
    fn test_windows_emitted_in_time_order() {
        let chunks: Vec<Chunk> = (0..4).map(|i| chunk_at(i, Some(i as u32 * 40))).collect();
        let scores: Vec<ChunkScore> = (0..4).map(|i| score_at(i, 1.0, vec![])).collect();
        let config = AggregationConfig {
            window_secs: 1_800,
            ..Default::default()
        };

        let (windows, _) = aggregate(&chunks, &scores, &config);

        assert_eq!(windows.len(), 4);
        for pair in windows.windows(2) {
            assert!(pair[0].window_start < pair[1].window_start);
        }
    }

    #[test]
    fn test_out_of_order_scores_fold_identically() {
        let chunks: Vec<Chunk> = (0..4).map(|i| chunk_at(i, Some(i as u32))).collect();
        let ordered: Vec<ChunkScore> = (0..4).map(|i| score_at(i, i as f64, vec![])).collect();
        let mut shuffled = ordered.clone();
        shuffled.reverse();

        let config = AggregationConfig::default();
        let (a, _) = aggregate(&chunks, &ordered, &config);
        let (b, _) = aggregate(&chunks, &shuffled, &config);
        assert_eq!(a, b);
    }

    #[test]
    fn test_window_mean() {
        let chunks: Vec<Chunk> = (0..2).map(|i| chunk_at(i, Some(i as u32))).collect();
        let scores = vec![score_at(0, 2.0, vec![]), score_at(1, 4.0, vec![])];

        let (windows, _) = aggregate(&chunks, &scores, &AggregationConfig::default());
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].scores["manipulation_index"], 3.0);
        assert_eq!(windows[0].chunk_count, 2);
    }

    #[test]
    fn test_score_shift_emits_change_point() {
        let chunks: Vec<Chunk> = (0..2).map(|i| chunk_at(i, Some(i as u32 * 120))).collect();
        let scores = vec![
            score_at(0, 1.0, vec![]),
            score_at(1, 6.0, vec!["GASLIGHTING"]),
        ];
        let config = AggregationConfig {
            window_secs: 3_600,
            score_delta: 2.0,
            ..Default::default()
        };

        let (_, change_points) = aggregate(&chunks, &scores, &config);

        assert_eq!(change_points.len(), 1);
        let cp = &change_points[0];
        assert_eq!(cp.dimension.as_deref(), Some("manipulation_index"));
        assert_eq!(cp.magnitude, 5.0);
        assert_eq!(cp.markers, vec!["GASLIGHTING".to_string()]);
    }

    #[test]
    fn test_small_shift_emits_nothing() {
        let chunks: Vec<Chunk> = (0..2).map(|i| chunk_at(i, Some(i as u32 * 120))).collect();
        let scores = vec![score_at(0, 1.0, vec![]), score_at(1, 2.0, vec![])];

        let (_, change_points) = aggregate(&chunks, &scores, &AggregationConfig::default());
        assert!(change_points.is_empty());
    }

    #[test]
    fn test_marker_frequency_crossing_emitted_once() {
        // Three windows: counts 1, 5, 6 - the threshold crossing
        // happens once, between windows 0 and 1
        let mut chunks = Vec::new();
        let mut scores = Vec::new();
        let mut index = 0;
        for (window, count) in [(0u32, 1usize), (1, 5), (2, 6)] {
            for _ in 0..count {
                chunks.push(chunk_at(index, Some(window * 120)));
                scores.push(score_at(index, 0.0, vec!["LOVE_BOMBING"]));
                index += 1;
            }
        }
        let config = AggregationConfig {
            window_secs: 3_600,
            marker_frequency: 5,
            score_delta: 100.0,
            ..Default::default()
        };

        let (windows, change_points) = aggregate(&chunks, &scores, &config);

        assert_eq!(windows.len(), 3);
        assert_eq!(change_points.len(), 1);
        assert_eq!(change_points[0].markers, vec!["LOVE_BOMBING".to_string()]);
        assert_eq!(change_points[0].window_index, 1);
        assert!(change_points[0].dimension.is_none());
    }

    #[test]
    fn test_positional_fallback_without_timestamps() {
        let chunks: Vec<Chunk> = (0..5).map(|i| chunk_at(i, None)).collect();
        let scores: Vec<ChunkScore> = (0..5).map(|i| score_at(i, 1.0, vec![])).collect();
        let config = AggregationConfig {
            fallback_chunk_window: 2,
            ..Default::default()
        };

        let (windows, _) = aggregate(&chunks, &scores, &config);

        assert_eq!(windows.len(), 3);
        assert!(windows[0].window_start.is_none());
        assert_eq!(windows[0].first_chunk_index, 0);
        assert_eq!(windows[0].last_chunk_index, 1);
        assert_eq!(windows[2].chunk_count, 1);
    }

    #[test]
    fn test_empty_input() {
        let (windows, change_points) = aggregate(&[], &[], &AggregationConfig::default());
        assert!(windows.is_empty());
        assert!(change_points.is_empty());
    }
}
