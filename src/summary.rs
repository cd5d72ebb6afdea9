//! Fleet summary output
//!
//! Renders the merged records as a text table, JSON or CSV, and writes one
//! JSON detail report per record under its collision-safe report name.

use crate::analyzer::HostDiagnostic;
use crate::cli::OutputFormat;
use crate::diagnostics::HealthStatus;
use crate::scheduler::{FleetRun, RunIssue};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Base name of the consolidated summary file
pub const SUMMARY_BASENAME: &str = "fleet_summary";

/// A skipped or failed capture in JSON output
#[derive(Debug, Clone, Serialize)]
pub struct JsonRunIssue {
    pub source_file: String,
    pub stage: String,
    pub reason: String,
}

impl From<&RunIssue> for JsonRunIssue {
    fn from(issue: &RunIssue) -> Self {
        Self {
            source_file: issue.source_file.clone(),
            stage: issue.stage.to_string(),
            reason: issue.reason.clone(),
        }
    }
}

/// Consolidated JSON summary
#[derive(Debug, Clone, Serialize)]
pub struct JsonFleetSummary<'a> {
    pub analyzed: usize,
    pub skipped: Vec<JsonRunIssue>,
    pub failed: Vec<JsonRunIssue>,
    pub status_counts: BTreeMap<HealthStatus, usize>,
    pub total_dedup_hits: u64,
    pub records: Vec<&'a HostDiagnostic>,
}

/// Records sorted by (host, source file)
pub fn sorted_records(run: &FleetRun) -> Vec<&HostDiagnostic> {
    let mut records: Vec<&HostDiagnostic> = run.records.iter().collect();
    records.sort_by(|a, b| a.key().cmp(&b.key()));
    records
}

/// Count of records per status
pub fn status_counts(run: &FleetRun) -> BTreeMap<HealthStatus, usize> {
    let mut counts = BTreeMap::new();
    for record in &run.records {
        *counts.entry(record.status).or_insert(0) += 1;
    }
    counts
}

/// Render the fleet summary
pub fn render(run: &FleetRun, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(to_text(run)),
        OutputFormat::Csv => Ok(to_csv(run)),
        OutputFormat::Json => to_json(run),
    }
}

/// Human-readable table
pub fn to_text(run: &FleetRun) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<20} {:<40} {:>8} {:>10} {:<12}\n",
        "host", "source", "score", "fidelity", "status"
    ));
    out.push_str(&format!("{}\n", "-".repeat(94)));

    for record in sorted_records(run) {
        let fidelity = format!(
            "{:.1}s{}",
            record.fidelity_seconds,
            if record.low_fidelity { "*" } else { "" }
        );
        out.push_str(&format!(
            "{:<20} {:<40} {:>8.3} {:>10} {:<12}\n",
            record.host_name, record.source_file, record.contention_score, fidelity, record.status
        ));
    }

    out.push_str(&format!("{}\n", "-".repeat(94)));
    out.push_str(&format!(
        "{} analyzed, {} skipped, {} failed",
        run.records.len(),
        run.skipped.len(),
        run.failed.len()
    ));
    if run.records.iter().any(|r| r.low_fidelity) {
        out.push_str("  (* low sampling fidelity)");
    }
    out.push('\n');
    out
}

/// Escape CSV field (handle commas, quotes, newlines)
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// CSV table, one row per record
pub fn to_csv(run: &FleetRun) -> String {
    let mut output =
        String::from("host_name,source_file,report_file_name,contention_score,fidelity_seconds,status\n");
    for record in sorted_records(run) {
        let fields = [
            escape_field(&record.host_name),
            escape_field(&record.source_file),
            escape_field(&record.report_file_name),
            format!("{:.3}", record.contention_score),
            format!("{:.3}", record.fidelity_seconds),
            record.status.to_string(),
        ];
        output.push_str(&fields.join(","));
        output.push('\n');
    }
    output
}

/// Pretty-printed JSON summary
pub fn to_json(run: &FleetRun) -> Result<String> {
    let summary = JsonFleetSummary {
        analyzed: run.records.len(),
        skipped: run.skipped.iter().map(JsonRunIssue::from).collect(),
        failed: run.failed.iter().map(JsonRunIssue::from).collect(),
        status_counts: status_counts(run),
        total_dedup_hits: run.total_dedup_hits(),
        records: sorted_records(run),
    };
    serde_json::to_string_pretty(&summary).context("Failed to serialize fleet summary")
}

/// Write the fleet summary and every per-record detail report
///
/// Returns the path of the summary file.
pub fn write_outputs(run: &FleetRun, output_dir: &Path, format: OutputFormat) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    for record in &run.records {
        let path = output_dir.join(&record.report_file_name);
        let body = serde_json::to_string_pretty(record)
            .with_context(|| format!("Failed to serialize report for {}", record.source_file))?;
        std::fs::write(&path, body)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
    }

    let extension = match format {
        OutputFormat::Text => "txt",
        OutputFormat::Json => "json",
        OutputFormat::Csv => "csv",
    };
    let summary_path = output_dir.join(format!("{}.{}", SUMMARY_BASENAME, extension));
    std::fs::write(&summary_path, render(run, format)?)
        .with_context(|| format!("Failed to write {}", summary_path.display()))?;
    Ok(summary_path)
}
