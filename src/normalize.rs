//! Capture normalization
//!
//! Stages a capture into a private temp directory, runs the decoder (filtered
//! first, unfiltered on failure) and turns its output into a de-duplicated
//! [`SampleStream`]. The staging directory is removed when the
//! [`StagedCapture`] drops, on every exit path.

use crate::counters::{CounterCatalog, CounterColumn, CounterId, DECODER_FILTER};
use crate::decoder::{CaptureDecoder, DecodeStatus};
use crate::discovery::CaptureFile;
use crate::error::{CaptureError, Result};
use crate::pdh_csv;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Windows `ERROR_SHARING_VIOLATION` / `ERROR_LOCK_VIOLATION`
const SHARING_VIOLATION_CODES: &[i32] = &[32, 33];

/// One cooked value of one recognized column
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Index into [`CounterCatalog::columns`]
    pub column: usize,
    pub value: Option<f64>,
}

/// All samples sharing one timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    /// Seconds since 1970-01-01 in the decoder's time zone
    pub timestamp: f64,
    pub samples: Vec<Sample>,
}

/// Normalized, de-duplicated decoder output for one capture
#[derive(Debug, Clone, Default)]
pub struct SampleStream {
    pub catalog: CounterCatalog,
    pub intervals: Vec<Interval>,
    /// Legacy samples replaced by a `Process V2` sample for the same counter
    pub dedup_hits: u64,
    /// Rows dropped because their timestamp did not parse
    pub rejected_rows: u64,
}

impl SampleStream {
    /// Column metadata for a sample
    pub fn column(&self, sample: &Sample) -> Option<&CounterColumn> {
        self.catalog.columns.get(sample.column)?.as_ref()
    }

    /// True when no interval carries any sample
    pub fn is_empty(&self) -> bool {
        self.intervals.iter().all(|i| i.samples.is_empty())
    }
}

/// A capture copied into its own temp directory
#[derive(Debug)]
pub struct StagedCapture {
    dir: TempDir,
    input: PathBuf,
    output: PathBuf,
}

impl StagedCapture {
    /// Path of the temp copy handed to the decoder
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Path the decoder writes to
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Temp directory that holds both files
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Normalizes captures through a decoder
pub struct CaptureNormalizer<'a> {
    decoder: &'a dyn CaptureDecoder,
    work_dir: PathBuf,
    diagnostic_lines: usize,
}

impl<'a> CaptureNormalizer<'a> {
    pub fn new(decoder: &'a dyn CaptureDecoder, work_dir: PathBuf, diagnostic_lines: usize) -> Self {
        Self {
            decoder,
            work_dir,
            diagnostic_lines,
        }
    }

    /// Copy a capture into a uniquely named temp directory
    ///
    /// Zero-length captures are rejected before anything is copied.
    pub fn stage(&self, capture: &CaptureFile) -> Result<StagedCapture> {
        let len = std::fs::metadata(&capture.path)
            .map_err(|e| classify_open_error(e, &capture.path))?
            .len();
        if len == 0 {
            return Err(CaptureError::EmptyCapture(capture.path.clone()));
        }

        let dir = tempfile::Builder::new()
            .prefix("contend-")
            .tempdir_in(&self.work_dir)?;
        let input = dir.path().join("capture.blg");
        let output = dir.path().join("capture.csv");

        let mut source =
            File::open(&capture.path).map_err(|e| classify_open_error(e, &capture.path))?;
        let mut target = File::create(&input)?;
        io::copy(&mut source, &mut target).map_err(|e| classify_open_error(e, &capture.path))?;

        Ok(StagedCapture { dir, input, output })
    }

    /// Run the decoder, retrying once without a counter filter
    ///
    /// Returns the decoder's CSV text.
    pub fn convert(&self, staged: &StagedCapture, source: &Path) -> Result<String> {
        let mut diagnostics = Vec::new();

        for filter in [Some(DECODER_FILTER), None] {
            let _ = std::fs::remove_file(staged.output());

            let failure = match self.decoder.decode(staged.input(), staged.output(), filter) {
                Ok(DecodeStatus::Success) => match std::fs::read(staged.output()) {
                    Ok(bytes) if !bytes.is_empty() => {
                        return Ok(String::from_utf8_lossy(&bytes).into_owned());
                    }
                    Ok(_) => "decoder produced an empty output file".to_string(),
                    Err(_) => "decoder produced no output file".to_string(),
                },
                Ok(DecodeStatus::Failed(text)) => text,
                Err(e) => e.to_string(),
            };

            tracing::debug!(
                file = %source.display(),
                filtered = filter.is_some(),
                "decoder attempt failed"
            );
            diagnostics.push(failure);
        }

        let diagnostic = diagnostics
            .iter()
            .flat_map(|d| d.lines())
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(self.diagnostic_lines)
            .collect::<Vec<_>>()
            .join(" | ");

        Err(CaptureError::Conversion {
            path: source.to_path_buf(),
            diagnostic,
        })
    }

    /// Stage, convert and normalize in one step
    pub fn normalize(&self, capture: &CaptureFile) -> Result<SampleStream> {
        let staged = self.stage(capture)?;
        let text = self.convert(&staged, &capture.path)?;
        normalize_text(&text)
    }
}

/// Map an open/copy failure onto the per-file taxonomy
fn classify_open_error(err: io::Error, path: &Path) -> CaptureError {
    let locked = err.kind() == io::ErrorKind::PermissionDenied
        || err
            .raw_os_error()
            .is_some_and(|code| cfg!(windows) && SHARING_VIOLATION_CODES.contains(&code));
    if locked {
        CaptureError::LockedFile(path.to_path_buf())
    } else {
        CaptureError::Io(err)
    }
}

/// Parse decoder CSV into a de-duplicated sample stream
///
/// When a `Process` and a `Process V2` column carry the same logical counter
/// in one row, the higher generation's valid value is kept and counted as a
/// dedup hit. A valid value always beats an invalid one.
pub fn normalize_text(text: &str) -> Result<SampleStream> {
    let table = pdh_csv::parse_table(text)?;
    let catalog = CounterCatalog::from_header(&table.counters);

    let mut stream = SampleStream::default();
    for row in &table.rows {
        let Some(timestamp) = row.first().and_then(|t| pdh_csv::parse_timestamp(t)) else {
            stream.rejected_rows += 1;
            continue;
        };

        let mut slots: HashMap<(Option<&str>, &CounterId), usize> = HashMap::new();
        let mut samples: Vec<Sample> = Vec::new();

        for (column, meta) in catalog.columns.iter().enumerate() {
            let Some(meta) = meta else { continue };
            let value = row
                .get(column + 1)
                .and_then(|cell| pdh_csv::parse_value(cell));
            let candidate = Sample { column, value };
            let key = (meta.path.host.as_deref(), &meta.id);

            let Some(&slot) = slots.get(&key) else {
                slots.insert(key, samples.len());
                samples.push(candidate);
                continue;
            };

            let current = samples[slot];
            let current_generation = catalog.columns[current.column]
                .as_ref()
                .map(|c| c.generation);
            let newer = Some(meta.generation) > current_generation;

            match (current.value, value) {
                (Some(_), Some(_)) if newer => {
                    samples[slot] = candidate;
                    stream.dedup_hits += 1;
                }
                (Some(_), Some(_)) if current_generation > Some(meta.generation) => {
                    stream.dedup_hits += 1;
                }
                (None, Some(_)) => samples[slot] = candidate,
                _ => {}
            }
        }

        stream.intervals.push(Interval { timestamp, samples });
    }

    stream.catalog = catalog;
    Ok(stream)
}
