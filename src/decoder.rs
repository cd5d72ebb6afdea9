//! External capture decoder
//!
//! The decoder is a separate binary that converts a binary capture into
//! PDH-CSV. This module owns its command-line contract and its resolution
//! from configuration, the environment or `PATH`.

use crate::error::{CaptureError, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Environment variable naming the decoder binary
pub const DECODER_ENV: &str = "CONTEND_DECODER";

/// How often a decoder with a deadline is checked for exit
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Binary names searched on `PATH`
pub const DECODER_NAMES: &[&str] = &["relog", "relog.exe"];

/// Outcome of one decoder invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Process exited zero
    Success,
    /// Non-zero exit (or killed after timeout), with combined diagnostic text
    Failed(String),
}

/// Converts a capture into PDH-CSV at `output`
///
/// `filter` lists counter paths to keep; `None` asks for every counter.
/// Implementations must be shareable across worker threads.
pub trait CaptureDecoder: Send + Sync {
    fn decode(&self, input: &Path, output: &Path, filter: Option<&[&str]>) -> Result<DecodeStatus>;
}

/// The external decoder binary (`relog`-compatible command line)
#[derive(Debug, Clone)]
pub struct ExternalDecoder {
    binary: PathBuf,
    timeout: Option<Duration>,
}

impl ExternalDecoder {
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            timeout: None,
        }
    }

    /// Kill invocations that run longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Build the decoder argument list
    ///
    /// `<input> -f CSV -o <output> [-c <counter>...] -y`
    pub fn arguments(input: &Path, output: &Path, filter: Option<&[&str]>) -> Vec<String> {
        let mut args = vec![
            input.display().to_string(),
            "-f".to_string(),
            "CSV".to_string(),
            "-o".to_string(),
            output.display().to_string(),
        ];
        if let Some(counters) = filter {
            args.push("-c".to_string());
            args.extend(counters.iter().map(|c| c.to_string()));
        }
        args.push("-y".to_string());
        args
    }

    fn run(&self, args: Vec<String>) -> Result<Option<Output>> {
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let Some(timeout) = self.timeout else {
            return Ok(Some(child.wait_with_output()?));
        };

        // Read concurrently with the exit poll
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(Output {
                    status,
                    stdout: collect(stdout),
                    stderr: collect(stderr),
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                // Not yet reaped, so the pid still names our child
                tracing::warn!(pid = child.id(), ?timeout, "decoder timed out, killing it");
                if let Err(e) = child.kill() {
                    tracing::warn!(pid = child.id(), error = %e, "failed to kill decoder");
                }
                if let Err(e) = child.wait() {
                    tracing::warn!(pid = child.id(), error = %e, "failed to reap decoder");
                }
                return Ok(None);
            }
            thread::sleep(WAIT_POLL_INTERVAL.min(deadline - now));
        }
    }
}

/// Read a child pipe to the end on a background thread
fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            tracing::debug!(error = %e, "decoder pipe read failed");
        }
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader.and_then(|h| h.join().ok()).unwrap_or_default()
}

impl CaptureDecoder for ExternalDecoder {
    fn decode(&self, input: &Path, output: &Path, filter: Option<&[&str]>) -> Result<DecodeStatus> {
        let args = Self::arguments(input, output, filter);
        tracing::debug!(binary = %self.binary.display(), ?args, "invoking decoder");

        let Some(result) = self.run(args)? else {
            return Ok(DecodeStatus::Failed("decoder timed out".to_string()));
        };

        if result.status.success() {
            return Ok(DecodeStatus::Success);
        }

        let mut diagnostic = String::from_utf8_lossy(&result.stdout).to_string();
        diagnostic.push_str(&String::from_utf8_lossy(&result.stderr));
        if diagnostic.trim().is_empty() {
            diagnostic = format!("decoder exited with {}", result.status);
        }
        Ok(DecodeStatus::Failed(diagnostic))
    }
}

/// Resolve the decoder binary
///
/// An explicit path must exist. Otherwise `CONTEND_DECODER` is consulted,
/// then `PATH`. Failure here is fatal to the whole run.
pub fn resolve_decoder(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(CaptureError::DecoderNotFound(format!(
                "{} does not exist",
                path.display()
            )))
        };
    }

    if let Some(from_env) = std::env::var_os(DECODER_ENV) {
        let path = PathBuf::from(from_env);
        if path.is_file() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "{} points to a missing file", DECODER_ENV);
    }

    let search_path = std::env::var_os("PATH").unwrap_or_default();
    find_in_path(&search_path, DECODER_NAMES).ok_or_else(|| {
        CaptureError::DecoderNotFound(format!(
            "none of {:?} found on PATH; pass --decoder or set {}",
            DECODER_NAMES, DECODER_ENV
        ))
    })
}

/// First `dir/name` that is a file, in `PATH` order
pub fn find_in_path(search_path: &std::ffi::OsStr, names: &[&str]) -> Option<PathBuf> {
    std::env::split_paths(search_path).find_map(|dir| {
        names
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}
