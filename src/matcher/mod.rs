use std::collections::BTreeMap;

use tracing::debug;

use crate::embedding::cosine_similarity;
use crate::library::MarkerLibrary;
use crate::models::{Chunk, Marker, MatchKind, MatchRecord, MatchSpan};

/// Matching configuration
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Minimum cosine similarity for a semantic match
    pub semantic_threshold: f64,
    /// Run needs_review markers despite the exclusion default.
    /// Explicit analyst override, off in normal runs.
    pub include_needs_review: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: 0.7,
            include_needs_review: false,
        }
    }
}

/// Evaluate one chunk against the library.
///
/// Lexical and semantic records for the same marker are kept distinct:
/// downstream scoring distinguishes rule confidence from semantic
/// confidence. Markers in the same semantic cluster are reconciled so
/// only the highest-scoring record per (cluster, kind) survives, which
/// stops synonymous marker definitions from inflating composite scores.
///
/// Touches no mutable shared state, so chunks can be matched in
/// parallel against the same library.
pub fn match_chunk(
    chunk: &Chunk,
    library: &MarkerLibrary,
    chunk_embedding: Option<&[f32]>,
    config: &MatchConfig,
) -> Vec<MatchRecord> {
    let mut raw: Vec<MatchRecord> = Vec::new();

    let markers: Vec<&Marker> = if config.include_needs_review {
        library.all_markers().collect()
    } else {
        library.active_markers().collect()
    };

    for marker in markers {
        if let Some(record) = lexical_match(chunk, marker) {
            raw.push(record);
        }
        if let Some(embedding) = chunk_embedding {
            if let Some(record) = semantic_match(chunk, marker, embedding, config) {
                raw.push(record);
            }
        }
    }

    reconcile_clusters(raw, library)
}

/// Run all of a marker's lexical patterns, case-insensitive. Repeated
/// hits collapse into one record (confidence is always 1.0 for rule
/// hits; the earliest span is kept).
fn lexical_match(chunk: &Chunk, marker: &Marker) -> Option<MatchRecord> {
    let mut span: Option<MatchSpan> = None;

    for pattern in &marker.patterns {
        if let Some(m) = pattern.find(&chunk.text) {
            let candidate = MatchSpan {
                start: m.start(),
                end: m.end(),
            };
            span = Some(match span {
                Some(existing) if existing.start <= candidate.start => existing,
                _ => candidate,
            });
        }
    }

    span.map(|span| {
        debug!("lexical hit: {} on {}", marker.id, chunk.id);
        MatchRecord {
            chunk_id: chunk.id.clone(),
            chunk_index: chunk.index,
            marker_id: marker.id.clone(),
            kind: MatchKind::Lexical,
            confidence: 1.0,
            span: Some(span),
        }
    })
}

/// Maximum cosine similarity of the chunk embedding against the
/// marker's cached anchor embeddings; a record is produced when it
/// meets the threshold.
fn semantic_match(
    chunk: &Chunk,
    marker: &Marker,
    embedding: &[f32],
    config: &MatchConfig,
) -> Option<MatchRecord> {
    if !marker.has_anchors() {
        return None;
    }

    let best = marker
        .anchor_embeddings
        .iter()
        .map(|anchor| cosine_similarity(embedding, anchor))
        .fold(f64::MIN, f64::max);

    if best >= config.semantic_threshold {
        debug!(
            "semantic hit: {} on {} (similarity {:.3})",
            marker.id, chunk.id, best
        );
        Some(MatchRecord {
            chunk_id: chunk.id.clone(),
            chunk_index: chunk.index,
            marker_id: marker.id.clone(),
            kind: MatchKind::Semantic,
            confidence: best.clamp(0.0, 1.0),
            span: None,
        })
    } else {
        None
    }
}

/// Keep only the highest-confidence record per (cluster, kind) per
/// chunk. Ties resolve to the lexicographically smaller marker id, so
/// reconciliation is deterministic regardless of production order.
fn reconcile_clusters(records: Vec<MatchRecord>, library: &MarkerLibrary) -> Vec<MatchRecord> {
    let mut survivors: BTreeMap<(String, MatchKind), MatchRecord> = BTreeMap::new();

    for record in records {
        let key = (
            library.cluster_of(&record.marker_id).to_string(),
            record.kind,
        );
        match survivors.get(&key) {
            Some(existing)
                if existing.confidence > record.confidence
                    || (existing.confidence == record.confidence
                        && existing.marker_id <= record.marker_id) => {}
            _ => {
                survivors.insert(key, record);
            }
        }
    }

    let mut result: Vec<MatchRecord> = survivors.into_values().collect();
    result.sort_by(|a, b| a.marker_id.cmp(&b.marker_id).then(a.kind.cmp(&b.kind)));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::MockProvider;
    use crate::embedding::{EmbeddingProvider, RetryConfig};
    use crate::library::LibraryConfig;
    use crate::models::MarkerDefinition;

    fn chunk_with(text: &str) -> Chunk {
        Chunk {
            id: "chunk_0".to_string(),
            speaker: "anna".to_string(),
            start: None,
            end: None,
            index: 0,
            text: text.to_string(),
        }
    }

    fn def(id: &str, patterns: Vec<&str>, examples: Vec<&str>) -> MarkerDefinition {
        MarkerDefinition {
            id: id.to_string(),
            description: String::new(),
            examples: examples.into_iter().map(String::from).collect(),
            patterns: patterns.into_iter().map(String::from).collect(),
            tags: vec![],
            weight: 1.0,
        }
    }

    #[test]
    fn test_lexical_match_emotional_invalidation() {
        let defs = vec![def(
            "EMOTIONAL_INVALIDATION",
            vec![r"(?i)nur in deinem kopf"],
            vec![],
        )];
        let library = MarkerLibrary::load(defs, LibraryConfig::default()).unwrap();
        let chunk = chunk_with("Das ist doch alles nur in deinem Kopf.");

        let records = match_chunk(&chunk, &library, None, &MatchConfig::default());

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.marker_id, "EMOTIONAL_INVALIDATION");
        assert_eq!(record.kind, MatchKind::Lexical);
        assert_eq!(record.confidence, 1.0);
        let span = record.span.unwrap();
        assert_eq!(&chunk.text[span.start..span.end], "nur in deinem Kopf");
    }

    #[test]
    fn test_no_match_when_regex_misses() {
        let defs = vec![def("M", vec![r"geld überweisen"], vec![])];
        let library = MarkerLibrary::load(defs, LibraryConfig::default()).unwrap();
        let chunk = chunk_with("Schönes Wetter heute.");

        let records = match_chunk(&chunk, &library, None, &MatchConfig::default());
        assert!(records.is_empty());
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let defs = vec![def("M", vec!["du bist zu empfindlich"], vec![])];
        let library = MarkerLibrary::load(defs, LibraryConfig::default()).unwrap();
        let chunk = chunk_with("DU BIST ZU EMPFINDLICH!");

        let records = match_chunk(&chunk, &library, None, &MatchConfig::default());
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_repeated_hits_collapse_to_one_record() {
        let defs = vec![def("M", vec!["nein"], vec![])];
        let library = MarkerLibrary::load(defs, LibraryConfig::default()).unwrap();
        let chunk = chunk_with("nein nein nein");

        let records = match_chunk(&chunk, &library, None, &MatchConfig::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].span.unwrap().start, 0);
    }

    #[test]
    fn test_placeholder_marker_never_matches() {
        let defs = vec![def("STUB", vec![r"(muster.*wird.*ergänzt)"], vec![])];
        let library = MarkerLibrary::load(defs, LibraryConfig::default()).unwrap();
        // Even a transcript containing the literal placeholder text
        let chunk = chunk_with("hier steht: muster wird ergänzt");

        let records = match_chunk(&chunk, &library, None, &MatchConfig::default());
        assert!(records.is_empty());
    }

    #[test]
    fn test_multiple_markers_no_exclusivity() {
        let defs = vec![
            def("A_MARKER", vec!["nur ein scherz"], vec![]),
            def("B_MARKER", vec!["zu empfindlich"], vec![]),
        ];
        let library = MarkerLibrary::load(defs, LibraryConfig::default()).unwrap();
        let chunk = chunk_with("Du bist zu empfindlich, das war doch nur ein Scherz.");

        let records = match_chunk(&chunk, &library, None, &MatchConfig::default());
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_semantic_match_above_threshold() {
        let provider = MockProvider::with_synonyms(vec![vec!["nur eingebildet"]]);
        let defs = vec![def("GASLIGHTING", vec![], vec!["das hast du dir nur eingebildet"])];
        let mut library = MarkerLibrary::load(defs, LibraryConfig::default()).unwrap();
        library
            .prepare_semantics(&provider, &RetryConfig::default())
            .await
            .unwrap();

        let chunk = chunk_with("ich glaube das ist nur eingebildet gewesen");
        let texts = vec![chunk.text.clone()];
        let embedding = provider.encode_batch(&texts).await.unwrap().remove(0);

        let records = match_chunk(&chunk, &library, Some(&embedding), &MatchConfig::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, MatchKind::Semantic);
        assert!(records[0].confidence >= 0.7);
        assert!(records[0].span.is_none());
    }

    #[tokio::test]
    async fn test_lexical_and_semantic_coexist_for_one_marker() {
        let provider = MockProvider::with_synonyms(vec![vec!["nur eingebildet"]]);
        let defs = vec![def(
            "GASLIGHTING",
            vec!["eingebildet"],
            vec!["das hast du dir nur eingebildet"],
        )];
        let mut library = MarkerLibrary::load(defs, LibraryConfig::default()).unwrap();
        library
            .prepare_semantics(&provider, &RetryConfig::default())
            .await
            .unwrap();

        let chunk = chunk_with("das ist doch nur eingebildet");
        let texts = vec![chunk.text.clone()];
        let embedding = provider.encode_batch(&texts).await.unwrap().remove(0);

        let records = match_chunk(&chunk, &library, Some(&embedding), &MatchConfig::default());
        let kinds: Vec<MatchKind> = records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![MatchKind::Lexical, MatchKind::Semantic]);
    }

    #[tokio::test]
    async fn test_cluster_reconciliation_keeps_one_record() {
        let provider = MockProvider::with_synonyms(vec![vec!["nur in deinem kopf"]]);
        let defs = vec![
            def("GASLIGHT_A", vec![], vec!["das ist nur in deinem kopf"]),
            def("GASLIGHT_B", vec![], vec!["alles nur in deinem kopf gewesen"]),
        ];
        let mut library = MarkerLibrary::load(defs, LibraryConfig::default()).unwrap();
        library
            .prepare_semantics(&provider, &RetryConfig::default())
            .await
            .unwrap();
        assert_eq!(library.cluster_of("GASLIGHT_B"), "GASLIGHT_A");

        let chunk = chunk_with("ach das war doch nur in deinem kopf");
        let texts = vec![chunk.text.clone()];
        let embedding = provider.encode_batch(&texts).await.unwrap().remove(0);

        let records = match_chunk(&chunk, &library, Some(&embedding), &MatchConfig::default());
        // Both markers score above threshold, one survives
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, MatchKind::Semantic);
    }

    #[test]
    fn test_determinism_same_input_same_records() {
        let defs = vec![
            def("A", vec!["scherz"], vec![]),
            def("B", vec!["empfindlich"], vec![]),
        ];
        let library = MarkerLibrary::load(defs, LibraryConfig::default()).unwrap();
        let chunk = chunk_with("Du bist zu empfindlich, war nur ein Scherz.");

        let first = match_chunk(&chunk, &library, None, &MatchConfig::default());
        let second = match_chunk(&chunk, &library, None, &MatchConfig::default());
        assert_eq!(first, second);
    }
}
