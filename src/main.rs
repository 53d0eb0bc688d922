use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use markerlens::{
    parse_markers_file, parse_transcript_file, write_report, AggregationConfig, ChunkingStrategy,
    EmbeddingConfig, EngineConfig, HttpEmbeddingClient, LibraryConfig, MarkerLibrary, MatchConfig,
};

#[derive(Parser)]
#[command(name = "markerlens")]
#[command(author, version, about = "Conversational marker matching and temporal scoring engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a transcript against a marker library
    Analyze {
        /// Marker definition file (JSON array)
        #[arg(short, long)]
        markers: PathBuf,

        /// Transcript file (JSON array of utterances)
        #[arg(short, long)]
        transcript: PathBuf,

        /// Output file for the analysis report (JSON)
        #[arg(short, long)]
        output: PathBuf,

        /// Chunking strategy: speaker-turn, fixed-size, or time-gap
        #[arg(long, default_value = "speaker-turn")]
        strategy: String,

        /// Tokens per chunk (fixed-size strategy)
        #[arg(long, default_value = "50")]
        chunk_tokens: usize,

        /// Token overlap between chunks (fixed-size strategy)
        #[arg(long, default_value = "0")]
        chunk_overlap: usize,

        /// Session gap in seconds (time-gap strategy)
        #[arg(long, default_value = "1800")]
        max_gap_secs: i64,

        /// Embeddings endpoint URL; omit to run lexical-only
        #[arg(long)]
        embedding_url: Option<String>,

        /// Embedding model name
        #[arg(long, default_value = "text-embedding-3-small")]
        embedding_model: String,

        /// Minimum cosine similarity for semantic matches
        #[arg(long, default_value = "0.7")]
        semantic_threshold: f64,

        /// Aggregation window in seconds
        #[arg(long, default_value = "3600")]
        window_secs: i64,

        /// Dimension shift between windows that flags a change point
        #[arg(long, default_value = "2.0")]
        score_delta: f64,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Inspect a marker library without analyzing anything
    Inspect {
        /// Marker definition file (JSON array)
        #[arg(short, long)]
        markers: PathBuf,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            markers,
            transcript,
            output,
            strategy,
            chunk_tokens,
            chunk_overlap,
            max_gap_secs,
            embedding_url,
            embedding_model,
            semantic_threshold,
            window_secs,
            score_delta,
            verbose,
        } => {
            setup_logging(verbose);
            let strategy = parse_strategy(&strategy, chunk_tokens, chunk_overlap, max_gap_secs)?;
            analyze(
                markers,
                transcript,
                output,
                strategy,
                embedding_url,
                embedding_model,
                semantic_threshold,
                window_secs,
                score_delta,
            )
            .await
        }
        Commands::Inspect { markers, verbose } => {
            setup_logging(verbose);
            inspect(markers)
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn parse_strategy(
    name: &str,
    tokens: usize,
    overlap: usize,
    max_gap_secs: i64,
) -> Result<ChunkingStrategy> {
    match name {
        "speaker-turn" => Ok(ChunkingStrategy::SpeakerTurn),
        "fixed-size" => Ok(ChunkingStrategy::FixedSize { tokens, overlap }),
        "time-gap" => Ok(ChunkingStrategy::TimeGap { max_gap_secs }),
        other => anyhow::bail!("unknown chunking strategy: {}", other),
    }
}

async fn analyze(
    markers: PathBuf,
    transcript: PathBuf,
    output: PathBuf,
    strategy: ChunkingStrategy,
    embedding_url: Option<String>,
    embedding_model: String,
    semantic_threshold: f64,
    window_secs: i64,
    score_delta: f64,
) -> Result<()> {
    info!("Loading markers from {:?}", markers);
    let definitions = parse_markers_file(&markers).context("Failed to load marker definitions")?;

    info!("Loading transcript from {:?}", transcript);
    let utterances =
        parse_transcript_file(&transcript).context("Failed to load transcript")?;
    info!("Loaded {} markers, {} utterances", definitions.len(), utterances.len());

    let config = EngineConfig {
        chunking: strategy,
        matching: MatchConfig {
            semantic_threshold,
            ..Default::default()
        },
        aggregation: AggregationConfig {
            window_secs,
            score_delta,
            ..Default::default()
        },
        ..Default::default()
    };

    let provider = embedding_url.map(|endpoint| {
        let mut embedding_config = EmbeddingConfig::new(endpoint, embedding_model);
        embedding_config.api_key = std::env::var("EMBEDDING_API_KEY").ok();
        HttpEmbeddingClient::new(embedding_config)
    });
    if provider.is_none() {
        info!("No embedding endpoint configured, running lexical-only");
    }

    let report = markerlens::run(definitions, &utterances, provider.as_ref(), &config, None)
        .await
        .context("Analysis failed")?;

    write_report(&report, &output).context("Failed to write report")?;
    info!("Report written to {:?}", output);

    println!("{}", markerlens::io::format_summary(&report));
    Ok(())
}

fn inspect(markers: PathBuf) -> Result<()> {
    let definitions = parse_markers_file(&markers).context("Failed to load marker definitions")?;
    let library = MarkerLibrary::load(definitions, LibraryConfig::default())
        .context("Marker library failed validation")?;

    println!("Marker Library");
    println!("==============");
    println!("Total markers: {}", library.len());
    println!("Active markers: {}", library.active_markers().count());
    println!(
        "Needs review: {}",
        library.all_markers().filter(|m| m.needs_review).count()
    );
    println!();

    for marker in library.all_markers() {
        let status = if marker.needs_review {
            "needs_review"
        } else {
            "active"
        };
        println!(
            "{:<40} {:<12} patterns={} anchors={} tags={}",
            marker.id,
            status,
            marker.patterns.len(),
            marker.examples.len(),
            marker.tags.join(",")
        );
    }

    Ok(())
}
