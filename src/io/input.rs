use std::path::Path;

use anyhow::{Context, Result};

use crate::models::{MarkerDefinition, Utterance};

/// Parse a marker definition file (JSON array of definitions)
pub fn parse_markers_file(path: &Path) -> Result<Vec<MarkerDefinition>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    parse_markers_json(&content)
}

pub fn parse_markers_json(json: &str) -> Result<Vec<MarkerDefinition>> {
    serde_json::from_str(json).context("Failed to parse marker definitions")
}

/// Parse a transcript file (JSON array of utterances)
pub fn parse_transcript_file(path: &Path) -> Result<Vec<Utterance>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    parse_transcript_json(&content)
}

pub fn parse_transcript_json(json: &str) -> Result<Vec<Utterance>> {
    serde_json::from_str(json).context("Failed to parse transcript")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_markers_json() {
        let json = r#"[
            {
                "id": "LOVE_BOMBING",
                "description": "Übermäßige Zuneigungsbekundungen",
                "examples": ["du bist meine seelenverwandte"],
                "patterns": ["(?i)liebe dich über alles"],
                "tags": ["love_bombing", "manipulation"],
                "weight": 1.5
            }
        ]"#;

        let defs = parse_markers_json(json).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].id, "LOVE_BOMBING");
        assert_eq!(defs[0].weight, 1.5);
        assert_eq!(defs[0].tags.len(), 2);
    }

    #[test]
    fn test_parse_transcript_json() {
        let json = r#"[
            {"speaker": "anna", "timestamp": "2024-03-01T10:00:00Z", "text": "hallo"},
            {"speaker": "ben", "text": "hi"}
        ]"#;

        let utterances = parse_transcript_json(json).unwrap();
        assert_eq!(utterances.len(), 2);
        assert!(utterances[0].timestamp.is_some());
        assert!(utterances[1].timestamp.is_none());
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(parse_markers_json("not json").is_err());
        assert!(parse_transcript_json("{}").is_err());
    }

    #[test]
    fn test_parse_files_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markers.json");
        std::fs::write(&path, r#"[{"id": "M", "patterns": ["x"]}]"#).unwrap();

        let defs = parse_markers_file(&path).unwrap();
        assert_eq!(defs[0].id, "M");
    }
}
