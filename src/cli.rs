//! CLI argument parsing for contend

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the fleet summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default)
    Text,
    /// JSON format for machine parsing
    Json,
    /// CSV format for spreadsheet analysis
    Csv,
}

#[derive(Parser, Debug)]
#[command(name = "contend")]
#[command(version)]
#[command(about = "Correlate workload CPU with hypervisor scheduling pressure across captures", long_about = None)]
pub struct Cli {
    /// Root directory scanned recursively for capture files
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    /// Maximum captures analyzed concurrently (0 = one per CPU)
    #[arg(short = 'j', long = "jobs", value_name = "N", default_value = "0")]
    pub jobs: usize,

    /// Path to the capture decoder binary (default: $CONTEND_DECODER, then relog on PATH)
    #[arg(long = "decoder", value_name = "PATH")]
    pub decoder: Option<PathBuf>,

    /// Kill a decoder invocation after this many seconds
    #[arg(long = "decoder-timeout-secs", value_name = "SECS")]
    pub decoder_timeout_secs: Option<u64>,

    /// Directory for the fleet summary and per-host reports
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Working directory for temporary capture copies (default: system temp)
    #[arg(long = "work-dir", value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Summary output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Capture file extension
    #[arg(long = "extension", default_value = "blg")]
    pub extension: String,

    /// Regex selecting the target workload's process instances
    #[arg(long = "target-pattern", value_name = "REGEX")]
    pub target_pattern: Option<String>,

    /// TOML file with analysis thresholds
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable trace-level logging
    #[arg(long = "debug")]
    pub debug: bool,

    /// Only log warnings and errors
    #[arg(short = 'q', long = "quiet", conflicts_with = "debug")]
    pub quiet: bool,
}
