use std::path::Path;

use anyhow::{Context, Result};

use crate::models::AnalysisReport;

/// Write the report as pretty-printed JSON
pub fn write_report(report: &AnalysisReport, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create file: {:?}", path))?;
    serde_json::to_writer_pretty(file, report).context("Failed to write report JSON")?;
    Ok(())
}

/// Render a short human-readable summary of the report
pub fn format_summary(report: &AnalysisReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("Run {}\n", report.run_id));
    out.push_str(&format!(
        "Chunks analyzed: {}{}\n",
        report.chunks.len(),
        if report.incomplete { " (incomplete)" } else { "" }
    ));

    out.push_str("\nOverall scores\n");
    for (dimension, value) in &report.overall_scores {
        out.push_str(&format!("  {:<24} {:>5.2}\n", dimension, value));
    }

    if !report.marker_totals.is_empty() {
        out.push_str("\nMarker hits\n");
        let mut totals: Vec<(&String, &usize)> = report.marker_totals.iter().collect();
        totals.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (marker, count) in totals {
            out.push_str(&format!("  {:<32} {:>4}\n", marker, count));
        }
    }

    if !report.change_points.is_empty() {
        out.push_str(&format!("\nChange points: {}\n", report.change_points.len()));
        for cp in &report.change_points {
            let when = cp
                .timestamp
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| format!("window {}", cp.window_index));
            match &cp.dimension {
                Some(dim) => out.push_str(&format!(
                    "  {} {} shifted by {:.2}\n",
                    when, dim, cp.magnitude
                )),
                None => out.push_str(&format!(
                    "  {} marker frequency crossing: {}\n",
                    when,
                    cp.markers.join(", ")
                )),
            }
        }
    }

    if !report.warnings.is_empty() {
        out.push_str(&format!("\nWarnings: {}\n", report.warnings.len()));
    }

    out
}
