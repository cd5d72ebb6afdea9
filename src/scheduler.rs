//! Bounded parallel work scheduler
//!
//! ```text
//!   captures ──► job channel ──► worker 1..C ──► result channel ──► collector
//!                (pull model)    (analyze)                           (owns FleetRun)
//! ```
//!
//! Workers pull the next capture as soon as they finish one, so a slow capture
//! only occupies its own slot. The collector is the single writer of the
//! result list and waits with `recv_timeout`, never spinning. A panic inside a
//! unit is caught and recorded as a failure for that capture alone.

use crate::analyzer::{AnalysisStage, CaptureOutcome, HostDiagnostic};
use crate::discovery::CaptureFile;
use crossbeam::channel::{self, RecvTimeoutError};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

/// Default collector poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A capture that produced no record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIssue {
    pub source_file: String,
    pub stage: AnalysisStage,
    pub reason: String,
}

/// Merged results of a scheduler run
#[derive(Debug, Clone, Default)]
pub struct FleetRun {
    pub records: Vec<HostDiagnostic>,
    pub skipped: Vec<RunIssue>,
    pub failed: Vec<RunIssue>,
    seen: HashSet<(String, String)>,
}

impl FleetRun {
    /// Merge one outcome; a duplicate (host, source) record is dropped
    pub fn merge(&mut self, outcome: CaptureOutcome) {
        match outcome {
            CaptureOutcome::Emitted(record) => {
                let key = (record.host_name.clone(), record.source_file.clone());
                if self.seen.insert(key) {
                    self.records.push(record);
                } else {
                    tracing::warn!(
                        host = %record.host_name,
                        file = %record.source_file,
                        "duplicate record dropped"
                    );
                }
            }
            CaptureOutcome::Skipped {
                source_file,
                stage,
                reason,
            } => self.skipped.push(RunIssue {
                source_file,
                stage,
                reason,
            }),
            CaptureOutcome::Failed {
                source_file,
                stage,
                reason,
            } => self.failed.push(RunIssue {
                source_file,
                stage,
                reason,
            }),
        }
    }

    /// Number of captures accounted for
    pub fn completed(&self) -> usize {
        self.records.len() + self.skipped.len() + self.failed.len()
    }

    /// Sum of legacy samples superseded across all records
    pub fn total_dedup_hits(&self) -> u64 {
        self.records.iter().map(|r| r.dedup_hits).sum()
    }
}

/// Fans captures out over at most `max_concurrency` workers
#[derive(Debug, Clone)]
pub struct WorkScheduler {
    max_concurrency: usize,
    poll_interval: Duration,
}

impl WorkScheduler {
    /// `max_concurrency == 0` means one worker per available processing unit
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Worker count for `pending` captures
    ///
    /// Bounded by available processing units and by the amount of work.
    pub fn effective_concurrency(&self, pending: usize) -> usize {
        let units = thread::available_parallelism().map_or(1, |n| n.get());
        let requested = if self.max_concurrency == 0 {
            units
        } else {
            self.max_concurrency.min(units)
        };
        requested.min(pending).max(1)
    }

    /// Run `work` once per capture and merge every outcome
    pub fn run<F>(&self, captures: Vec<CaptureFile>, work: F) -> FleetRun
    where
        F: Fn(&CaptureFile) -> CaptureOutcome + Sync,
    {
        let total = captures.len();
        let workers = self.effective_concurrency(total);
        tracing::info!(captures = total, workers, "starting analysis");

        if workers == 1 {
            let mut run = FleetRun::default();
            for capture in &captures {
                run.merge(run_unit(&work, capture));
            }
            return run;
        }

        let (job_tx, job_rx) = channel::unbounded::<CaptureFile>();
        for capture in captures {
            // Receiver is alive until the scope below ends
            let _ = job_tx.send(capture);
        }
        drop(job_tx);

        let (result_tx, result_rx) = channel::unbounded::<CaptureOutcome>();

        thread::scope(|scope| {
            for worker in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let work = &work;
                scope.spawn(move || {
                    for capture in job_rx.iter() {
                        tracing::trace!(worker, file = %capture.display_name(), "unit started");
                        if result_tx.send(run_unit(work, &capture)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            let mut run = FleetRun::default();
            loop {
                match result_rx.recv_timeout(self.poll_interval) {
                    Ok(outcome) => {
                        run.merge(outcome);
                        tracing::debug!(completed = run.completed(), total, "unit finished");
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        tracing::trace!(completed = run.completed(), total, "waiting for workers");
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            run
        })
    }
}

/// Run one unit, turning a panic into a `Failed` outcome
fn run_unit<F>(work: &F, capture: &CaptureFile) -> CaptureOutcome
where
    F: Fn(&CaptureFile) -> CaptureOutcome,
{
    match panic::catch_unwind(AssertUnwindSafe(|| work(capture))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let source_file = capture.display_name();
            tracing::error!(file = %source_file, %reason, "analysis panicked");
            CaptureOutcome::Failed {
                source_file,
                stage: AnalysisStage::Discovered,
                reason: format!("panic: {}", reason),
            }
        }
    }
}
