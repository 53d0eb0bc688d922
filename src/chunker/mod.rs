use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::error::RunWarning;
use crate::models::{Chunk, ChunkingResult, ChunkingStrategy, Utterance};

/// Segment a transcript into ordered, speaker/time-bounded chunks.
///
/// Chunking always succeeds and preserves all text: malformed input
/// (missing timestamps) falls back to positional ordering with a
/// recorded warning, never an error.
pub fn chunk(utterances: &[Utterance], strategy: ChunkingStrategy) -> ChunkingResult {
    let mut warnings = Vec::new();

    if utterances.is_empty() {
        return ChunkingResult {
            chunks: vec![],
            warnings,
        };
    }

    let ordered = order_utterances(utterances, &mut warnings);

    let chunks = match strategy {
        ChunkingStrategy::FixedSize { tokens, overlap } => {
            fixed_size_chunks(&ordered, tokens.max(1), overlap)
        }
        ChunkingStrategy::SpeakerTurn => boundary_chunks(&ordered, |_prev, _next| false),
        ChunkingStrategy::TimeGap { max_gap_secs } => {
            let has_timestamps = ordered.iter().all(|u| u.timestamp.is_some());
            if !has_timestamps {
                warn!("time-gap strategy without timestamps, using speaker turns only");
                warnings.push(RunWarning::Chunking {
                    detail: "time-gap strategy requires timestamps; speaker-turn boundaries used"
                        .to_string(),
                });
            }
            let max_gap = Duration::seconds(max_gap_secs);
            boundary_chunks(&ordered, move |prev, next| {
                match (prev.timestamp, next.timestamp) {
                    (Some(a), Some(b)) => b.signed_duration_since(a) > max_gap,
                    _ => false,
                }
            })
        }
    };

    info!(
        "chunked {} utterances into {} chunks",
        utterances.len(),
        chunks.len()
    );

    ChunkingResult { chunks, warnings }
}

/// Sort by timestamp when every utterance carries one; otherwise keep
/// positional order and record a warning. The sort is stable, so
/// equal timestamps preserve transcript order.
fn order_utterances(utterances: &[Utterance], warnings: &mut Vec<RunWarning>) -> Vec<Utterance> {
    let mut ordered = utterances.to_vec();
    let missing = ordered.iter().filter(|u| u.timestamp.is_none()).count();

    if missing > 0 {
        warn!(
            "{} of {} utterances missing timestamps, using positional order",
            missing,
            ordered.len()
        );
        warnings.push(RunWarning::Chunking {
            detail: format!(
                "{} utterances missing timestamps; positional ordering used",
                missing
            ),
        });
    } else {
        ordered.sort_by_key(|u| u.timestamp);
    }

    ordered
}

/// One chunk per contiguous same-speaker run, additionally split where
/// `extra_boundary` fires between consecutive utterances. Used for
/// both the speaker-turn and time-gap strategies: a time-gap session
/// never spans speakers, so attribution stays unambiguous.
fn boundary_chunks<F>(utterances: &[Utterance], extra_boundary: F) -> Vec<Chunk>
where
    F: Fn(&Utterance, &Utterance) -> bool,
{
    let mut chunks = Vec::new();
    let mut run: Vec<&Utterance> = Vec::new();

    for utterance in utterances {
        let boundary = run.last().is_some_and(|prev| {
            prev.speaker != utterance.speaker || extra_boundary(prev, utterance)
        });
        if boundary {
            chunks.push(chunk_from_run(&run, chunks.len()));
            run.clear();
        }
        run.push(utterance);
    }
    if !run.is_empty() {
        chunks.push(chunk_from_run(&run, chunks.len()));
    }

    chunks
}

fn chunk_from_run(run: &[&Utterance], index: usize) -> Chunk {
    let text = run
        .iter()
        .map(|u| u.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    Chunk {
        id: format!("chunk_{}", index),
        speaker: run[0].speaker.clone(),
        start: run.first().and_then(|u| u.timestamp),
        end: run.last().and_then(|u| u.timestamp),
        index,
        text,
    }
}

/// Fixed-size token windows over the flattened word stream. The only
/// strategy that can produce multi-speaker chunks; attribution is the
/// majority speaker with ties broken by first-seen order.
fn fixed_size_chunks(utterances: &[Utterance], tokens: usize, overlap: usize) -> Vec<Chunk> {
    struct Word<'a> {
        text: &'a str,
        speaker: &'a str,
        timestamp: Option<DateTime<Utc>>,
    }

    let words: Vec<Word> = utterances
        .iter()
        .flat_map(|u| {
            u.text.split_whitespace().map(move |w| Word {
                text: w,
                speaker: &u.speaker,
                timestamp: u.timestamp,
            })
        })
        .collect();

    if words.is_empty() {
        return vec![];
    }

    let step = tokens.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < words.len() {
        let end = (start + tokens).min(words.len());
        let window = &words[start..end];

        let text = window
            .iter()
            .map(|w| w.text)
            .collect::<Vec<_>>()
            .join(" ");
        let speaker = majority_speaker(window.iter().map(|w| w.speaker));

        let index = chunks.len();
        chunks.push(Chunk {
            id: format!("chunk_{}", index),
            speaker,
            start: window.first().and_then(|w| w.timestamp),
            end: window.last().and_then(|w| w.timestamp),
            index,
            text,
        });

        if end == words.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// Majority vote over speakers; ties resolve to the speaker seen first
fn majority_speaker<'a>(speakers: impl Iterator<Item = &'a str>) -> String {
    // (speaker, count) in first-seen order
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for speaker in speakers {
        match counts.iter_mut().find(|(s, _)| *s == speaker) {
            Some((_, count)) => *count += 1,
            None => counts.push((speaker, 1)),
        }
    }
    // Replace only on strictly greater count so ties keep the
    // first-seen speaker
    let mut best: Option<(&str, usize)> = None;
    for &(speaker, count) in &counts {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((speaker, count));
        }
    }
    best.map(|(s, _)| s.to_string()).unwrap_or_default()
}
