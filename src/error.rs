use thiserror::Error;

/// Fatal library-construction errors. These abort a run before any
/// matching starts; everything else is absorbed as a warning or a
/// degradation flag in the report.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Two marker definitions share the same id
    #[error("duplicate marker id: {0}")]
    DuplicateMarkerId(String),

    /// A lexical pattern failed to compile as a regex
    #[error("invalid pattern in marker {marker_id}: {source}")]
    InvalidPattern {
        marker_id: String,
        #[source]
        source: regex::Error,
    },
}

/// Errors from the embedding provider. Recoverable: after bounded
/// retries the affected chunks degrade to lexical-only matching.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The call did not complete within the configured timeout
    #[error("embedding request timed out after {0} ms")]
    Timeout(u64),

    /// Transport or HTTP-level failure
    #[error("embedding request failed: {0}")]
    Request(String),

    /// The provider returned fewer/more vectors than texts, or an
    /// unexpected vector dimension
    #[error("embedding response shape mismatch: {0}")]
    ShapeMismatch(String),
}

/// Non-fatal conditions recorded during a run and surfaced in the report.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    /// Marker has only a placeholder pattern and was excluded from matching
    NeedsReview { marker_id: String },
    /// Timestamps were missing or unsortable; positional ordering was used
    Chunking { detail: String },
    /// Embedding provider was unreachable; affected chunks are lexical-only
    ProviderDegraded { detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_display() {
        let err = SchemaError::DuplicateMarkerId("GASLIGHTING".to_string());
        assert_eq!(err.to_string(), "duplicate marker id: GASLIGHTING");
    }

    #[test]
    fn test_warning_serializes_with_kind_tag() {
        let warning = RunWarning::NeedsReview {
            marker_id: "M1".to_string(),
        };
        let json = serde_json::to_string(&warning).unwrap();
        assert!(json.contains("\"kind\":\"needs_review\""));
    }
}
