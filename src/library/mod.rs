use std::collections::{BTreeMap, HashMap};

use regex::RegexBuilder;
use tracing::{debug, info, warn};

use crate::embedding::{cosine_similarity, encode_with_retry, EmbeddingProvider, RetryConfig};
use crate::error::{ProviderError, RunWarning, SchemaError};
use crate::models::{Marker, MarkerDefinition};

/// The unresolved placeholder template left behind by marker generators
/// ("muster wird ergänzt" / pattern to be filled in). A marker whose
/// patterns are all placeholders carries no real rule and must never
/// match, even against text containing the placeholder itself.
fn is_placeholder_pattern(pattern: &str) -> bool {
    let p = pattern.to_lowercase();
    (p.contains("muster") && p.contains("wird") && p.contains("ergänzt"))
        || p.contains("pattern to be added")
        || p.contains("pattern to be filled")
}

/// Configuration for library construction
#[derive(Debug, Clone)]
pub struct LibraryConfig {
    /// Pairwise cosine threshold above which two markers' anchor sets
    /// are considered near-duplicates and merged into one cluster
    pub cluster_threshold: f64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            cluster_threshold: 0.85,
        }
    }
}

/// Validated, indexed marker collection. Built once per analysis run,
/// immutable after `prepare_semantics`, and shared read-only with the
/// matching workers.
#[derive(Debug)]
pub struct MarkerLibrary {
    /// Markers keyed by id; BTreeMap keeps iteration order stable
    markers: BTreeMap<String, Marker>,
    /// Marker id -> canonical cluster id. Identity mapping until
    /// semantic preparation groups near-duplicates.
    clusters: HashMap<String, String>,
    warnings: Vec<RunWarning>,
    config: LibraryConfig,
    /// Set once anchor embeddings have been computed
    semantics_ready: bool,
}

impl MarkerLibrary {
    /// Load and validate marker definitions. Fails fast on duplicate
    /// ids and malformed patterns; placeholder-only markers are
    /// accepted but flagged `needs_review` and excluded from active
    /// matching.
    pub fn load(
        definitions: Vec<MarkerDefinition>,
        config: LibraryConfig,
    ) -> Result<Self, SchemaError> {
        let mut markers = BTreeMap::new();
        let mut warnings = Vec::new();

        for def in definitions {
            if markers.contains_key(&def.id) {
                return Err(SchemaError::DuplicateMarkerId(def.id));
            }

            let real_patterns: Vec<&String> = def
                .patterns
                .iter()
                .filter(|p| !is_placeholder_pattern(p))
                .collect();

            let needs_review = real_patterns.is_empty() && def.examples.is_empty();
            if needs_review {
                warn!("marker {} has only placeholder content, flagged needs_review", def.id);
                warnings.push(RunWarning::NeedsReview {
                    marker_id: def.id.clone(),
                });
            }

            // Placeholder patterns are dropped, never compiled
            let mut compiled = Vec::with_capacity(real_patterns.len());
            for pattern in real_patterns {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| SchemaError::InvalidPattern {
                        marker_id: def.id.clone(),
                        source,
                    })?;
                compiled.push(regex);
            }

            let marker = Marker {
                id: def.id.clone(),
                description: def.description,
                tags: def.tags,
                weight: def.weight,
                patterns: compiled,
                examples: def.examples,
                needs_review,
                anchor_embeddings: vec![],
            };
            markers.insert(def.id, marker);
        }

        let clusters = markers
            .keys()
            .map(|id| (id.clone(), id.clone()))
            .collect();

        info!(
            "loaded {} markers ({} needs_review)",
            markers.len(),
            warnings.len()
        );

        Ok(Self {
            markers,
            clusters,
            warnings,
            config,
            semantics_ready: false,
        })
    }

    /// Batch-encode all active markers' anchor exemplars and build the
    /// semantic cluster map. Runs once per analysis; on provider
    /// failure the run continues lexical-only (the caller records the
    /// degradation, this is not fatal).
    pub async fn prepare_semantics<P: EmbeddingProvider>(
        &mut self,
        provider: &P,
        retry: &RetryConfig,
    ) -> Result<(), ProviderError> {
        // One flat batch over (marker, example) pairs, markers in
        // sorted id order for determinism
        let mut owners: Vec<String> = Vec::new();
        let mut texts: Vec<String> = Vec::new();
        for marker in self.markers.values() {
            if marker.needs_review {
                continue;
            }
            for example in &marker.examples {
                owners.push(marker.id.clone());
                texts.push(example.clone());
            }
        }

        if texts.is_empty() {
            self.semantics_ready = true;
            return Ok(());
        }

        let vectors = encode_with_retry(provider, &texts, retry).await?;

        for (owner, vector) in owners.into_iter().zip(vectors) {
            if let Some(marker) = self.markers.get_mut(&owner) {
                marker.anchor_embeddings.push(vector);
            }
        }

        self.build_clusters();
        self.semantics_ready = true;
        Ok(())
    }

    /// Group markers whose mean anchor embeddings are mutually highly
    /// similar under one canonical id, so synonymous definitions are
    /// not double-counted downstream. Greedy over sorted ids; the
    /// canonical id is the lexicographically smallest member.
    fn build_clusters(&mut self) {
        let centroids: Vec<(String, Vec<f32>)> = self
            .markers
            .values()
            .filter(|m| m.has_anchors())
            .map(|m| (m.id.clone(), mean_vector(&m.anchor_embeddings)))
            .collect();

        // canonical id -> centroid of the canonical member
        let mut canonical: Vec<(String, Vec<f32>)> = Vec::new();

        for (id, centroid) in &centroids {
            let mut assigned = false;
            for (canon_id, canon_centroid) in &canonical {
                if cosine_similarity(centroid, canon_centroid) >= self.config.cluster_threshold {
                    debug!("marker {} clustered under {}", id, canon_id);
                    self.clusters.insert(id.clone(), canon_id.clone());
                    assigned = true;
                    break;
                }
            }
            if !assigned {
                canonical.push((id.clone(), centroid.clone()));
                self.clusters.insert(id.clone(), id.clone());
            }
        }
    }

    /// Marker by id
    pub fn get(&self, id: &str) -> Option<&Marker> {
        self.markers.get(id)
    }

    /// Markers participating in matching (needs_review excluded)
    pub fn active_markers(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values().filter(|m| !m.needs_review)
    }

    /// All markers, including needs_review ones
    pub fn all_markers(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    /// Canonical cluster id for a marker (the marker's own id when it
    /// is not grouped with any near-duplicate)
    pub fn cluster_of<'a>(&'a self, marker_id: &'a str) -> &'a str {
        self.clusters
            .get(marker_id)
            .map(String::as_str)
            .unwrap_or(marker_id)
    }

    /// Warnings recorded during load
    pub fn warnings(&self) -> &[RunWarning] {
        &self.warnings
    }

    /// Whether anchor embeddings are available for semantic matching
    pub fn semantics_ready(&self) -> bool {
        self.semantics_ready
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

fn mean_vector(vectors: &[Vec<f32>]) -> Vec<f32> {
    if vectors.is_empty() {
        return vec![];
    }
    let dim = vectors[0].len();
    let mut mean = vec![0.0f32; dim];
    for v in vectors {
        for (slot, &x) in mean.iter_mut().zip(v.iter()) {
            *slot += x;
        }
    }
    let n = vectors.len() as f32;
    for slot in mean.iter_mut() {
        *slot /= n;
    }
    mean
}
