use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::aggregator::{aggregate, AggregationConfig};
use crate::chunker;
use crate::embedding::{encode_with_retry, EmbeddingProvider, RetryConfig};
use crate::error::{RunWarning, SchemaError};
use crate::library::{LibraryConfig, MarkerLibrary};
use crate::matcher::{match_chunk, MatchConfig};
use crate::models::{
    AnalysisReport, Chunk, ChunkReport, ChunkScore, ChunkingStrategy, MarkerDefinition,
    MatchRecord, Utterance,
};
use crate::scoring::{overall_scores, speaker_scores, ScoringConfig, ScoringEngine};

/// Full configuration of an analysis run
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub chunking: ChunkingStrategy,
    pub matching: MatchConfig,
    pub library: LibraryConfig,
    pub scoring: ScoringConfig,
    pub aggregation: AggregationConfig,
    pub retry: RetryConfig,
    /// Chunks per embedding batch; one provider call per batch
    pub embed_batch_size: usize,
}

impl EngineConfig {
    fn batch_size(&self) -> usize {
        if self.embed_batch_size == 0 {
            32
        } else {
            self.embed_batch_size
        }
    }
}

/// Cooperative cancellation handle. A cancelled run halts at the next
/// chunk-batch boundary and returns a partial report flagged
/// `incomplete`; already-aggregated state is never corrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Output of matching one chunk, gathered from the worker pool
struct ChunkMatches {
    chunk_index: usize,
    records: Vec<MatchRecord>,
    degraded: bool,
}

/// A panicked worker delivers no result for its chunk. Fill the gap
/// with an empty degraded entry so every processed chunk has exactly
/// one match set and downstream scoring stays aligned.
fn fill_missing_matches(batch: &[Chunk], results: &mut Vec<ChunkMatches>) {
    if results.len() >= batch.len() {
        return;
    }
    for chunk in batch {
        if !results.iter().any(|m| m.chunk_index == chunk.index) {
            results.push(ChunkMatches {
                chunk_index: chunk.index,
                records: vec![],
                degraded: true,
            });
        }
    }
}

/// Run the full pipeline: library load, chunking, parallel matching,
/// scoring, temporal aggregation.
///
/// `provider = None` runs lexical-only by configuration (not flagged
/// as degraded); a present-but-failing provider degrades the affected
/// chunks instead of failing the run. The only fatal errors are
/// schema errors at library load, surfaced before any matching.
pub async fn run<P: EmbeddingProvider>(
    definitions: Vec<MarkerDefinition>,
    utterances: &[Utterance],
    provider: Option<&P>,
    config: &EngineConfig,
    cancel: Option<&CancelToken>,
) -> Result<AnalysisReport, SchemaError> {
    let mut library = MarkerLibrary::load(definitions, config.library.clone())?;
    let mut warnings: Vec<RunWarning> = library.warnings().to_vec();

    // Anchor embeddings and cluster map, once per run. Failure here
    // degrades the whole run to lexical-only.
    let mut semantic_enabled = false;
    if let Some(p) = provider {
        match library.prepare_semantics(p, &config.retry).await {
            Ok(()) => semantic_enabled = true,
            Err(e) => {
                warn!("anchor embedding failed, run degrades to lexical-only: {}", e);
                warnings.push(RunWarning::ProviderDegraded {
                    detail: format!("anchor embedding failed: {}", e),
                });
            }
        }
    }

    let chunking = chunker::chunk(utterances, config.chunking);
    warnings.extend(chunking.warnings);
    let chunks = chunking.chunks;

    // Published immutable; matching workers share it read-only
    let library = Arc::new(library);
    let provider_expected = provider.is_some();

    let mut gathered: Vec<ChunkMatches> = Vec::with_capacity(chunks.len());
    let mut processed_chunks: Vec<Chunk> = Vec::with_capacity(chunks.len());
    let mut incomplete = false;

    for batch in chunks.chunks(config.batch_size()) {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            info!(
                "run cancelled after {} of {} chunks",
                processed_chunks.len(),
                chunks.len()
            );
            incomplete = true;
            break;
        }

        // One provider call per chunk batch; a failed batch degrades
        // only its own chunks
        let embeddings: Option<Vec<Vec<f32>>> = match (provider, semantic_enabled) {
            (Some(p), true) => {
                let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                match encode_with_retry(p, &texts, &config.retry).await {
                    Ok(vectors) => Some(vectors),
                    Err(e) => {
                        warn!("chunk batch embedding failed, lexical-only: {}", e);
                        warnings.push(RunWarning::ProviderDegraded {
                            detail: format!(
                                "batch starting at chunk {} degraded: {}",
                                batch[0].index, e
                            ),
                        });
                        None
                    }
                }
            }
            _ => None,
        };

        // Matching is embarrassingly parallel: no mutable shared state
        // beyond the read-only library
        let mut workers = JoinSet::new();
        for (i, chunk) in batch.iter().enumerate() {
            let chunk = chunk.clone();
            let library = Arc::clone(&library);
            let match_config = config.matching.clone();
            let embedding = embeddings.as_ref().map(|v| v[i].clone());
            let degraded = provider_expected
                && (!semantic_enabled || embedding.is_none());

            workers.spawn(async move {
                let records = match_chunk(&chunk, &library, embedding.as_deref(), &match_config);
                ChunkMatches {
                    chunk_index: chunk.index,
                    records,
                    degraded,
                }
            });
        }

        let mut batch_results: Vec<ChunkMatches> = Vec::with_capacity(batch.len());
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(matches) => batch_results.push(matches),
                Err(e) => warn!("matching worker panicked: {}", e),
            }
        }
        fill_missing_matches(batch, &mut batch_results);
        gathered.append(&mut batch_results);

        processed_chunks.extend(batch.iter().cloned());
    }

    // Gather-then-sort-then-fold: workers may finish out of order but
    // scoring and aggregation consume ascending chunk index
    gathered.sort_by_key(|m| m.chunk_index);

    let engine = ScoringEngine::new(config.scoring.clone());
    let mut chunk_scores: Vec<ChunkScore> = Vec::with_capacity(gathered.len());
    let mut all_records: Vec<MatchRecord> = Vec::new();
    for matches in &gathered {
        // Chunk indices are dense from 0, so the processed prefix can
        // be indexed directly
        let chunk = &processed_chunks[matches.chunk_index];
        debug_assert_eq!(chunk.index, matches.chunk_index);
        chunk_scores.push(engine.score_chunk(chunk, &matches.records, &library, matches.degraded));
        all_records.extend(matches.records.iter().cloned());
    }

    let (time_series, change_points) =
        aggregate(&processed_chunks, &chunk_scores, &config.aggregation);

    let mut marker_totals: BTreeMap<String, usize> = BTreeMap::new();
    for record in &all_records {
        *marker_totals.entry(record.marker_id.clone()).or_insert(0) += 1;
    }

    let chunk_reports: Vec<ChunkReport> = chunk_scores
        .iter()
        .zip(processed_chunks.iter())
        .map(|(score, chunk)| ChunkReport {
            id: chunk.id.clone(),
            speaker: chunk.speaker.clone(),
            timestamp: chunk.start,
            markers_found: score.markers_found.clone(),
            scores: score.dimensions.clone(),
            degraded: score.degraded,
        })
        .collect();

    let speaker_map: BTreeMap<String, BTreeMap<String, f64>> = speaker_scores(&chunk_scores)
        .into_iter()
        .map(|s| (s.speaker, s.dimensions))
        .collect();

    info!(
        "analysis complete: {} chunks, {} matches, {} change points{}",
        chunk_reports.len(),
        all_records.len(),
        change_points.len(),
        if incomplete { " (incomplete)" } else { "" }
    );

    Ok(AnalysisReport {
        run_id: uuid::Uuid::new_v4().to_string(),
        chunks: chunk_reports,
        overall_scores: overall_scores(&chunk_scores),
        speaker_scores: speaker_map,
        time_series,
        change_points,
        marker_totals,
        warnings,
        incomplete,
    })
}
