//! Per-capture analysis
//!
//! Drives one capture through
//! `Discovered → Copied → Normalized → Parsed → Scored → Emitted`.
//! Every capture ends in exactly one [`CaptureOutcome`]: an emitted
//! [`HostDiagnostic`], or a logged skip/failure that contributes no record.

use crate::config::{AnalysisConfig, ConfigError};
use crate::decoder::CaptureDecoder;
use crate::diagnostics::{
    aggregate_cpu, classify, contention_score, summarize_process, HealthStatus,
    ProcessMetricSummary,
};
use crate::discovery::CaptureFile;
use crate::error::CaptureError;
use crate::normalize::CaptureNormalizer;
use crate::reader::{read_stream, CaptureSeries};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Host label used when no counter path names a host
pub const UNKNOWN_HOST: &str = "Unknown";

/// Lifecycle stages of one capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnalysisStage {
    Discovered,
    Copied,
    Normalized,
    Parsed,
    Scored,
    Emitted,
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Diagnostic record for one analyzed capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostDiagnostic {
    pub host_name: String,
    /// Capture path relative to the source root
    pub source_file: String,
    /// Collision-safe name for this capture's detail report
    pub report_file_name: String,
    /// Pearson correlation in [-1, 1], three decimals
    pub contention_score: f64,
    /// Mean seconds between samples (0 when undefined)
    pub fidelity_seconds: f64,
    pub status: HealthStatus,
    pub low_fidelity: bool,
    pub dedup_hits: u64,
    pub intervals: usize,
    /// Why the record is `DataMissing`, if it is
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_gap: Option<String>,
    pub processes: Vec<ProcessMetricSummary>,
}

impl HostDiagnostic {
    /// Fleet-wide identity of a record
    pub fn key(&self) -> (&str, &str) {
        (&self.host_name, &self.source_file)
    }
}

/// Terminal state of one capture
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Emitted(HostDiagnostic),
    Skipped {
        source_file: String,
        stage: AnalysisStage,
        reason: String,
    },
    Failed {
        source_file: String,
        stage: AnalysisStage,
        reason: String,
    },
}

impl CaptureOutcome {
    pub fn record(&self) -> Option<&HostDiagnostic> {
        match self {
            Self::Emitted(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<HostDiagnostic> {
        match self {
            Self::Emitted(record) => Some(record),
            _ => None,
        }
    }
}

/// Analyzes single captures; shared read-only by every worker
pub struct CaptureAnalyzer {
    config: AnalysisConfig,
    target: Regex,
    decoder: Arc<dyn CaptureDecoder>,
    work_dir: PathBuf,
}

impl CaptureAnalyzer {
    pub fn new(
        config: AnalysisConfig,
        decoder: Arc<dyn CaptureDecoder>,
        work_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let target = config.target_regex()?;
        Ok(Self {
            config,
            target,
            decoder,
            work_dir,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run one capture to a terminal outcome, logging skips and failures
    pub fn analyze(&self, capture: &CaptureFile) -> CaptureOutcome {
        let source_file = capture.display_name();
        tracing::debug!(file = %source_file, stage = %AnalysisStage::Discovered, "analyzing capture");

        match self.run_stages(capture, &source_file) {
            Ok(record) => {
                tracing::info!(
                    file = %source_file,
                    host = %record.host_name,
                    score = record.contention_score,
                    status = %record.status,
                    "capture analyzed"
                );
                CaptureOutcome::Emitted(record)
            }
            Err((stage, err)) if is_skippable(&err) => {
                tracing::warn!(file = %source_file, %stage, reason = err.kind(), "skipping capture: {}", err);
                CaptureOutcome::Skipped {
                    source_file,
                    stage,
                    reason: err.to_string(),
                }
            }
            Err((stage, err)) => {
                tracing::error!(file = %source_file, %stage, reason = err.kind(), "capture failed: {}", err);
                CaptureOutcome::Failed {
                    source_file,
                    stage,
                    reason: err.to_string(),
                }
            }
        }
    }

    fn run_stages(
        &self,
        capture: &CaptureFile,
        source_file: &str,
    ) -> Result<HostDiagnostic, (AnalysisStage, CaptureError)> {
        let normalizer = CaptureNormalizer::new(
            self.decoder.as_ref(),
            self.work_dir.clone(),
            self.config.diagnostic_lines,
        );

        let staged = normalizer
            .stage(capture)
            .map_err(|e| (AnalysisStage::Discovered, e))?;
        tracing::debug!(file = %source_file, stage = %AnalysisStage::Copied, dir = %staged.dir().display());

        let stream = normalizer
            .convert(&staged, &capture.path)
            .and_then(|text| crate::normalize::normalize_text(&text))
            .map_err(|e| (AnalysisStage::Copied, e))?;
        drop(staged);
        if stream.dedup_hits > 0 {
            tracing::info!(file = %source_file, dedup_hits = stream.dedup_hits, "legacy process samples superseded by Process V2");
        }
        if stream.rejected_rows > 0 {
            tracing::debug!(file = %source_file, rejected_rows = stream.rejected_rows, "rows with unparseable timestamps dropped");
        }
        tracing::debug!(file = %source_file, stage = %AnalysisStage::Normalized, intervals = stream.intervals.len());

        let series = read_stream(&stream, self.config.low_fidelity_seconds);
        if series.interval_count() == 0 || series.has_no_data() {
            return Err((
                AnalysisStage::Normalized,
                CaptureError::Import("decoder output contained no valid samples".to_string()),
            ));
        }
        tracing::debug!(file = %source_file, stage = %AnalysisStage::Parsed, processes = series.processes.len());

        let record = self.score(&series, capture);
        tracing::debug!(file = %source_file, stage = %AnalysisStage::Scored);
        Ok(record)
    }

    /// Score parsed series into a record
    pub fn score(&self, series: &CaptureSeries, capture: &CaptureFile) -> HostDiagnostic {
        let host_name = series.host.clone().unwrap_or_else(|| UNKNOWN_HOST.to_string());
        let source_file = capture.display_name();

        let processes: Vec<ProcessMetricSummary> = series
            .processes
            .iter()
            .map(|(label, ps)| summarize_process(label, ps, self.target.is_match(label), &self.config))
            .collect();

        let target_cpu = aggregate_cpu(
            series
                .processes
                .iter()
                .filter(|(label, _)| self.target.is_match(label))
                .map(|(_, ps)| ps.cpu.as_slice()),
            series.interval_count(),
        );

        let (contention_score, status, data_gap) =
            match find_data_gap(series, &target_cpu, &self.config.target_pattern) {
                Some(gap) => {
                    tracing::warn!(file = %source_file, host = %host_name, "{}", gap);
                    (0.0, HealthStatus::DataMissing, Some(gap.to_string()))
                }
                None => {
                    let score = contention_score(&series.scheduling_pressure, &target_cpu);
                    (score, classify(score, &self.config), None)
                }
            };

        HostDiagnostic {
            report_file_name: report_file_name(&host_name, &capture.relative_path),
            host_name,
            source_file,
            contention_score,
            fidelity_seconds: series.fidelity.average_interval_secs,
            status,
            low_fidelity: series.fidelity.low,
            dedup_hits: series.dedup_hits,
            intervals: series.interval_count(),
            data_gap,
            processes,
        }
    }
}

/// Everything except IO surprises is an expected, skippable per-file condition
fn is_skippable(err: &CaptureError) -> bool {
    matches!(
        err,
        CaptureError::EmptyCapture(_)
            | CaptureError::LockedFile(_)
            | CaptureError::Conversion { .. }
            | CaptureError::Import(_)
    )
}

fn find_data_gap(
    series: &CaptureSeries,
    target_cpu: &[Option<f64>],
    target_pattern: &str,
) -> Option<CaptureError> {
    if series.scheduling_pressure.iter().all(Option::is_none) {
        return Some(CaptureError::DataGap(
            "no scheduling-pressure (CPU stolen time) samples".to_string(),
        ));
    }
    if target_cpu.iter().all(Option::is_none) {
        return Some(CaptureError::DataGap(format!(
            "no CPU samples for target workload '{}'",
            target_pattern
        )));
    }
    None
}

/// Collision-safe report name from host and source path tokens
///
/// `<host>_<path tokens>_<8 hex of SHA-256(relative path)>.json`
pub fn report_file_name(host: &str, relative_path: &Path) -> String {
    let mut tokens: Vec<String> = relative_path
        .parent()
        .into_iter()
        .flat_map(|p| p.components())
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if let Some(stem) = relative_path.file_stem() {
        tokens.push(stem.to_string_lossy().into_owned());
    }

    let canonical = relative_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    let digest = Sha256::digest(canonical.as_bytes());

    format!(
        "{}_{}_{}.json",
        sanitize(host),
        sanitize(&tokens.join("_")),
        &hex::encode(digest)[..8]
    )
}

fn sanitize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodeStatus;
    use crate::error::Result;

    struct CsvDecoder(String);

    impl CaptureDecoder for CsvDecoder {
        fn decode(&self, _input: &Path, output: &Path, _filter: Option<&[&str]>) -> Result<DecodeStatus> {
            std::fs::write(output, &self.0)?;
            Ok(DecodeStatus::Success)
        }
    }

    fn capture_csv(host: &str, rows: &[(f64, f64)]) -> String {
        let mut text = format!(
            r#""(PDH-CSV 4.0)","\\{h}\VM Processor(_Total)\CPU stolen time","\\{h}\Process(sqlservr)\% Processor Time""#,
            h = host
        );
        for (i, (stolen, cpu)) in rows.iter().enumerate() {
            text.push_str(&format!(
                "\n\"01/15/2024 10:{:02}:{:02}.000\",\"{}\",\"{}\"",
                i * 15 / 60,
                i * 15 % 60,
                stolen,
                cpu
            ));
        }
        text
    }

    fn analyze(csv: String, bytes: &[u8]) -> CaptureOutcome {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let path = root.path().join("host.blg");
        std::fs::write(&path, bytes).unwrap();
        let capture = CaptureFile {
            path,
            len: bytes.len() as u64,
            relative_path: PathBuf::from("host.blg"),
        };
        let analyzer = CaptureAnalyzer::new(
            AnalysisConfig::default(),
            Arc::new(CsvDecoder(csv)),
            work.path().to_path_buf(),
        )
        .unwrap();
        analyzer.analyze(&capture)
    }

    #[test]
    fn test_correlated_capture_is_critical() {
        let rows: Vec<(f64, f64)> = (0..12).map(|i| (i as f64, 10.0 + 5.0 * i as f64)).collect();
        let outcome = analyze(capture_csv("DB01", &rows), b"blg");
        let record = outcome.record().expect("record emitted");
        assert_eq!(record.host_name, "DB01");
        assert_eq!(record.source_file, "host.blg");
        assert_eq!(record.contention_score, 1.0);
        assert_eq!(record.status, HealthStatus::Critical);
        assert_eq!(record.fidelity_seconds, 15.0);
        assert_eq!(record.intervals, 12);
        assert!(record.processes[0].is_target);
    }

    #[test]
    fn test_missing_pressure_degrades_to_data_missing() {
        let rows = [(f64::NAN, 10.0), (f64::NAN, 20.0)];
        let record = analyze(capture_csv("DB01", &rows), b"blg")
            .into_record()
            .expect("record still emitted");
        assert_eq!(record.status, HealthStatus::DataMissing);
        assert_eq!(record.contention_score, 0.0);
        assert!(record.data_gap.is_some());
    }

    #[test]
    fn test_hostless_paths_report_unknown() {
        let csv = concat!(
            r#""(PDH-CSV 4.0)","\VM Processor(_Total)\CPU stolen time","\Process(sqlservr)\% Processor Time""#,
            "\n\"01/15/2024 10:00:00.000\",\"1\",\"2\"",
            "\n\"01/15/2024 10:00:15.000\",\"2\",\"4\"",
        );
        let record = analyze(csv.to_string(), b"blg").into_record().unwrap();
        assert_eq!(record.host_name, UNKNOWN_HOST);
        assert!(record.report_file_name.starts_with("Unknown_host_"));
    }

    #[test]
    fn test_empty_capture_is_skipped() {
        match analyze(capture_csv("DB01", &[(1.0, 1.0)]), b"") {
            CaptureOutcome::Skipped { stage, .. } => assert_eq!(stage, AnalysisStage::Discovered),
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[test]
    fn test_no_samples_is_skipped() {
        let csv = r#""(PDH-CSV 4.0)","\\H\Memory\Available MBytes""#.to_string()
            + "\n\"01/15/2024 10:00:00.000\",\"100\"";
        assert!(matches!(
            analyze(csv, b"blg"),
            CaptureOutcome::Skipped { stage: AnalysisStage::Normalized, .. }
        ));
    }

    #[test]
    fn test_report_names_do_not_collide() {
        let a = report_file_name("DB01", Path::new("siteA/DB01.blg"));
        let b = report_file_name("DB01", Path::new("siteB/DB01.blg"));
        assert_ne!(a, b);
        assert!(a.starts_with("DB01_siteA_DB01_"));
        assert!(a.ends_with(".json"));
    }

    #[test]
    fn test_report_name_sanitizes_tokens() {
        let name = report_file_name("db 01", Path::new("x y/a:b.blg"));
        assert!(name.starts_with("db_01_x_y_a_b_"));
    }
}
