//! Sample stream reader
//!
//! Turns a normalized [`SampleStream`] into per-interval readings and then into
//! interval-aligned series. A series has one slot per interval; invalid or
//! absent samples stay `None` so they can be excluded from averages and
//! regressions instead of pulling them toward zero.

use crate::counters::{is_pseudo_instance, CounterTarget, MetricKind, TOTAL_INSTANCE};
use crate::normalize::SampleStream;
use std::collections::BTreeMap;

/// One process's readings within one interval
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessReading {
    pub cpu: Option<f64>,
    pub privileged: Option<f64>,
    pub user: Option<f64>,
    pub private_bytes: Option<f64>,
    pub base_priority: Option<f64>,
}

impl ProcessReading {
    fn set(&mut self, kind: MetricKind, value: Option<f64>) {
        let slot = match kind {
            MetricKind::Cpu => &mut self.cpu,
            MetricKind::Privileged => &mut self.privileged,
            MetricKind::User => &mut self.user,
            MetricKind::Memory => &mut self.private_bytes,
            MetricKind::Priority => &mut self.base_priority,
            _ => return,
        };
        *slot = value;
    }
}

/// Everything the diagnostics need from one interval
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalReading {
    pub timestamp: f64,
    pub scheduling_pressure: Option<f64>,
    pub disk_throughput: Option<f64>,
    /// `_Total` process CPU, kept for host-level totals
    pub host_cpu_total: Option<f64>,
    /// Real process instances only (no `_Total` / `Idle`)
    pub processes: BTreeMap<String, ProcessReading>,
}

/// Interval-aligned series for one process instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessSeries {
    pub cpu: Vec<Option<f64>>,
    pub privileged: Vec<Option<f64>>,
    pub user: Vec<Option<f64>>,
    pub private_bytes: Vec<Option<f64>>,
    pub base_priority: Vec<Option<f64>>,
}

impl ProcessSeries {
    fn with_len(len: usize) -> Self {
        Self {
            cpu: vec![None; len],
            privileged: vec![None; len],
            user: vec![None; len],
            private_bytes: vec![None; len],
            base_priority: vec![None; len],
        }
    }
}

/// Sampling fidelity of a capture
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fidelity {
    /// Mean seconds between consecutive samples; 0 with fewer than 2 intervals
    pub average_interval_secs: f64,
    /// Average interval exceeds the configured limit
    pub low: bool,
}

/// Interval-aligned series for a whole capture
#[derive(Debug, Clone, Default)]
pub struct CaptureSeries {
    /// Host segment of the first counter path that carries one
    pub host: Option<String>,
    pub timestamps: Vec<f64>,
    pub scheduling_pressure: Vec<Option<f64>>,
    pub disk_throughput: Vec<Option<f64>>,
    pub host_cpu_total: Vec<Option<f64>>,
    pub processes: BTreeMap<String, ProcessSeries>,
    pub fidelity: Fidelity,
    pub dedup_hits: u64,
}

impl CaptureSeries {
    pub fn interval_count(&self) -> usize {
        self.timestamps.len()
    }

    /// True when no recognized counter produced a single valid value
    pub fn has_no_data(&self) -> bool {
        let host_empty = self
            .scheduling_pressure
            .iter()
            .chain(&self.disk_throughput)
            .chain(&self.host_cpu_total)
            .all(Option::is_none);
        let processes_empty = self.processes.values().all(|p| {
            p.cpu
                .iter()
                .chain(&p.privileged)
                .chain(&p.user)
                .chain(&p.private_bytes)
                .chain(&p.base_priority)
                .all(Option::is_none)
        });
        host_empty && processes_empty
    }
}

/// Per-interval readings of a normalized stream
pub fn read_intervals(stream: &SampleStream) -> Vec<IntervalReading> {
    stream
        .intervals
        .iter()
        .map(|interval| {
            let mut reading = IntervalReading {
                timestamp: interval.timestamp,
                ..Default::default()
            };

            for sample in &interval.samples {
                let Some(column) = stream.column(sample) else {
                    continue;
                };
                match (&column.id.target, column.id.kind) {
                    (CounterTarget::Host, MetricKind::SchedulingPressure) => {
                        reading.scheduling_pressure = sample.value;
                    }
                    (CounterTarget::Host, MetricKind::DiskThroughput) => {
                        reading.disk_throughput = sample.value;
                    }
                    (CounterTarget::Process(label), MetricKind::Cpu)
                        if label.eq_ignore_ascii_case(TOTAL_INSTANCE) =>
                    {
                        reading.host_cpu_total = sample.value;
                    }
                    (CounterTarget::Process(label), kind) if !is_pseudo_instance(label) => {
                        reading
                            .processes
                            .entry(label.clone())
                            .or_default()
                            .set(kind, sample.value);
                    }
                    _ => {}
                }
            }

            reading
        })
        .collect()
}

/// Mean spacing of consecutive timestamps
///
/// Fewer than two intervals means fidelity cannot be measured and reports 0.
pub fn measure_fidelity(timestamps: &[f64], low_fidelity_seconds: f64) -> Fidelity {
    if timestamps.len() < 2 {
        return Fidelity::default();
    }
    let total: f64 = timestamps.windows(2).map(|w| w[1] - w[0]).sum();
    let average = total / (timestamps.len() - 1) as f64;
    Fidelity {
        average_interval_secs: average,
        low: average > low_fidelity_seconds,
    }
}

/// Build interval-aligned series from a normalized stream
pub fn read_stream(stream: &SampleStream, low_fidelity_seconds: f64) -> CaptureSeries {
    let readings = read_intervals(stream);
    let len = readings.len();

    let mut series = CaptureSeries {
        host: stream.catalog.first_host().map(str::to_string),
        timestamps: readings.iter().map(|r| r.timestamp).collect(),
        scheduling_pressure: readings.iter().map(|r| r.scheduling_pressure).collect(),
        disk_throughput: readings.iter().map(|r| r.disk_throughput).collect(),
        host_cpu_total: readings.iter().map(|r| r.host_cpu_total).collect(),
        dedup_hits: stream.dedup_hits,
        ..Default::default()
    };

    for (index, reading) in readings.iter().enumerate() {
        for (label, process) in &reading.processes {
            let entry = series
                .processes
                .entry(label.clone())
                .or_insert_with(|| ProcessSeries::with_len(len));
            entry.cpu[index] = process.cpu;
            entry.privileged[index] = process.privileged;
            entry.user[index] = process.user;
            entry.private_bytes[index] = process.private_bytes;
            entry.base_priority[index] = process.base_priority;
        }
    }

    series.fidelity = measure_fidelity(&series.timestamps, low_fidelity_seconds);
    if series.fidelity.low {
        tracing::warn!(
            host = series.host.as_deref().unwrap_or("Unknown"),
            average_interval_secs = series.fidelity.average_interval_secs,
            "low sampling fidelity: bursts shorter than the interval may be hidden"
        );
    }

    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_text;

    fn stream(rows: &[&str]) -> SampleStream {
        let mut text = String::from(concat!(
            r#""(PDH-CSV 4.0)","\\DB01\VM Processor(_Total)\CPU stolen time","#,
            r#""\\DB01\PhysicalDisk(_Total)\Disk Transfers/sec","#,
            r#""\\DB01\Process(_Total)\% Processor Time","#,
            r#""\\DB01\Process(Idle)\% Processor Time","#,
            r#""\\DB01\Process(sqlservr)\% Processor Time","#,
            r#""\\DB01\Process(sqlservr)\Private Bytes""#
        ));
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        normalize_text(&text).unwrap()
    }

    #[test]
    fn test_reads_host_and_process_values() {
        let s = stream(&[r#""01/15/2024 10:00:00.000","3","120","55","40","30","1048576""#]);
        let readings = read_intervals(&s);
        assert_eq!(readings.len(), 1);
        let r = &readings[0];
        assert_eq!(r.scheduling_pressure, Some(3.0));
        assert_eq!(r.disk_throughput, Some(120.0));
        assert_eq!(r.host_cpu_total, Some(55.0));
        assert_eq!(r.processes.len(), 1);
        assert_eq!(r.processes["sqlservr"].cpu, Some(30.0));
        assert_eq!(r.processes["sqlservr"].private_bytes, Some(1_048_576.0));
    }

    #[test]
    fn test_invalid_values_leave_gaps() {
        let s = stream(&[
            r#""01/15/2024 10:00:00.000","3","1","1","1","30","100""#,
            r#""01/15/2024 10:00:15.000"," ","1","1","1","bad","100""#,
            r#""01/15/2024 10:00:30.000","5","1","1","1","32","100""#,
        ]);
        let series = read_stream(&s, 15.0);
        assert_eq!(series.interval_count(), 3);
        assert_eq!(series.scheduling_pressure, vec![Some(3.0), None, Some(5.0)]);
        assert_eq!(series.processes["sqlservr"].cpu, vec![Some(30.0), None, Some(32.0)]);
        assert_eq!(series.host.as_deref(), Some("DB01"));
        assert!(!series.has_no_data());
    }

    #[test]
    fn test_process_first_seen_late_is_padded() {
        let mut text = String::from(r#""(PDH-CSV 4.0)","\\H\Process(app)\% Processor Time""#);
        text.push_str("\n\"01/15/2024 10:00:00.000\",\" \"");
        text.push_str("\n\"01/15/2024 10:00:15.000\",\"7\"");
        let series = read_stream(&normalize_text(&text).unwrap(), 15.0);
        assert_eq!(series.processes["app"].cpu, vec![None, Some(7.0)]);
    }

    #[test]
    fn test_fidelity_average_and_warning() {
        let fine = measure_fidelity(&[0.0, 15.0, 30.0], 15.0);
        assert_eq!(fine.average_interval_secs, 15.0);
        assert!(!fine.low);

        let coarse = measure_fidelity(&[0.0, 60.0, 120.0], 15.0);
        assert_eq!(coarse.average_interval_secs, 60.0);
        assert!(coarse.low);
    }

    #[test]
    fn test_fidelity_undefined_for_single_interval() {
        assert_eq!(measure_fidelity(&[10.0], 15.0), Fidelity::default());
        assert_eq!(measure_fidelity(&[], 15.0).average_interval_secs, 0.0);
    }

    #[test]
    fn test_all_blank_capture_has_no_data() {
        let s = stream(&[r#""01/15/2024 10:00:00.000"," "," "," "," "," "," ""#]);
        assert!(read_stream(&s, 15.0).has_no_data());
    }
}
