pub mod aggregator;
pub mod chunker;
pub mod embedding;
pub mod error;
pub mod io;
pub mod library;
pub mod matcher;
pub mod models;
pub mod pipeline;
pub mod scoring;

pub use aggregator::{aggregate, AggregationConfig};
pub use chunker::chunk;
pub use embedding::{
    cosine_similarity, EmbeddingConfig, EmbeddingProvider, HttpEmbeddingClient, RetryConfig,
};
pub use error::{ProviderError, RunWarning, SchemaError};
pub use io::{parse_markers_file, parse_transcript_file, write_report};
pub use library::{LibraryConfig, MarkerLibrary};
pub use matcher::{match_chunk, MatchConfig};
pub use models::{
    AnalysisReport, ChangePoint, Chunk, ChunkScore, ChunkingStrategy, Marker, MarkerDefinition,
    MatchKind, MatchRecord, TimeWindow, Utterance,
};
pub use pipeline::{run, CancelToken, EngineConfig};
pub use scoring::{ScoringConfig, ScoringEngine};
