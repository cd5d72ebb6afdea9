//! Counter path parsing and classification
//!
//! Raw decoder columns look like `\\HOST\Object(Instance)\Counter`. Each one is
//! parsed and classified into a [`MetricKind`] exactly once, when the header is
//! read, so scoring never has to re-match counter names.

use std::collections::HashMap;
use std::fmt;

/// Pseudo-instances that aggregate other processes
pub const PSEUDO_INSTANCES: &[&str] = &["_Total", "Idle"];

/// Host-level instance name for aggregate counters
pub const TOTAL_INSTANCE: &str = "_Total";

/// Counters requested from the decoder on the first (filtered) attempt
pub const DECODER_FILTER: &[&str] = &[
    r"\VM Processor(*)\CPU stolen time",
    r"\Hyper-V Hypervisor Virtual Processor(*)\CPU Wait Time Per Dispatch",
    r"\PhysicalDisk(_Total)\Disk Transfers/sec",
    r"\Process(*)\% Processor Time",
    r"\Process(*)\% Privileged Time",
    r"\Process(*)\% User Time",
    r"\Process(*)\Private Bytes",
    r"\Process(*)\Priority Base",
    r"\Process V2(*)\% Processor Time",
    r"\Process V2(*)\% Privileged Time",
    r"\Process V2(*)\% User Time",
    r"\Process V2(*)\Private Bytes",
    r"\Process V2(*)\Priority Base",
];

/// Recognized metric kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    /// Process `% Processor Time`
    Cpu,
    /// Process `% Privileged Time`
    Privileged,
    /// Process `% User Time`
    User,
    /// Process `Private Bytes`
    Memory,
    /// Process `Priority Base`
    Priority,
    /// Hypervisor stolen / ready time for the host
    SchedulingPressure,
    /// `PhysicalDisk(_Total)\Disk Transfers/sec`
    DiskThroughput,
    Unrecognized,
}

impl MetricKind {
    /// True for metrics reported per process instance
    pub fn is_process_metric(self) -> bool {
        matches!(
            self,
            Self::Cpu | Self::Privileged | Self::User | Self::Memory | Self::Priority
        )
    }
}

/// Counter namespace generation, ranked so newer sorts higher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Generation {
    /// Host-level objects that exist in one generation only
    Host,
    /// The `Process` object
    Legacy,
    /// The `Process V2` object
    V2,
}

/// A parsed `\\HOST\Object(Instance)\Counter` path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterPath {
    pub host: Option<String>,
    pub object: String,
    pub instance: Option<String>,
    pub counter: String,
}

impl CounterPath {
    /// Parse a counter path, returning `None` for anything that is not one
    ///
    /// The host segment is optional (`\Object(Instance)\Counter`).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (host, rest) = if let Some(stripped) = raw.strip_prefix(r"\\") {
            let (host, rest) = stripped.split_once('\\')?;
            (Some(host.to_string()).filter(|h| !h.is_empty()), rest)
        } else {
            (None, raw.strip_prefix('\\')?)
        };

        let (object_part, counter) = rest.rsplit_once('\\')?;
        if counter.is_empty() || object_part.is_empty() {
            return None;
        }

        let (object, instance) = match object_part.find('(') {
            Some(open) if object_part.ends_with(')') => (
                &object_part[..open],
                Some(object_part[open + 1..object_part.len() - 1].to_string()),
            ),
            Some(_) => return None,
            None => (object_part, None),
        };

        Some(Self {
            host,
            object: object.trim().to_string(),
            instance,
            counter: counter.to_string(),
        })
    }

    /// Classify the path into a metric kind and namespace generation
    pub fn classify(&self) -> (MetricKind, Generation) {
        let object = self.object.to_ascii_lowercase();
        let counter = self.counter.to_ascii_lowercase();
        let instance_is_total = self
            .instance
            .as_deref()
            .is_some_and(|i| i.eq_ignore_ascii_case(TOTAL_INSTANCE));

        let generation = match object.as_str() {
            "process" => Generation::Legacy,
            "process v2" => Generation::V2,
            _ => Generation::Host,
        };

        let kind = match (object.as_str(), counter.as_str()) {
            ("process" | "process v2", c) if self.instance.is_some() => match c {
                "% processor time" => MetricKind::Cpu,
                "% privileged time" => MetricKind::Privileged,
                "% user time" => MetricKind::User,
                "private bytes" => MetricKind::Memory,
                "priority base" => MetricKind::Priority,
                _ => MetricKind::Unrecognized,
            },
            ("vm processor", "cpu stolen time") if instance_is_total => {
                MetricKind::SchedulingPressure
            }
            ("hyper-v hypervisor virtual processor", "cpu wait time per dispatch")
                if instance_is_total =>
            {
                MetricKind::SchedulingPressure
            }
            ("physicaldisk", "disk transfers/sec") if instance_is_total => {
                MetricKind::DiskThroughput
            }
            _ => MetricKind::Unrecognized,
        };

        (kind, generation)
    }
}

impl fmt::Display for CounterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(host) = &self.host {
            write!(f, r"\\{}", host)?;
        }
        write!(f, r"\{}", self.object)?;
        if let Some(instance) = &self.instance {
            write!(f, "({})", instance)?;
        }
        write!(f, r"\{}", self.counter)
    }
}

/// What a column measures, independent of which generation reported it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CounterTarget {
    Host,
    Process(String),
}

/// Generation-independent identity of a logical counter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CounterId {
    pub target: CounterTarget,
    pub kind: MetricKind,
}

/// One classified decoder column
#[derive(Debug, Clone)]
pub struct CounterColumn {
    pub path: CounterPath,
    pub id: CounterId,
    pub generation: Generation,
}

/// All recognized columns of one decoder header
///
/// `columns[i]` describes data cell `i + 1` of every row (cell 0 is the
/// timestamp). Unparseable and unrecognized columns are `None`.
#[derive(Debug, Clone, Default)]
pub struct CounterCatalog {
    pub columns: Vec<Option<CounterColumn>>,
}

impl CounterCatalog {
    /// Classify every counter column of a header row (timestamp cell excluded)
    ///
    /// `Process V2` names instances `name:pid`. Those are mapped onto the
    /// legacy `name`, `name#1`, `name#2` labels by order of first appearance,
    /// so both generations land on the same process label.
    pub fn from_header(counter_cells: &[String]) -> Self {
        let mut v2_ordinals: HashMap<(Option<String>, String), Vec<String>> = HashMap::new();

        let columns = counter_cells
            .iter()
            .map(|cell| {
                let path = CounterPath::parse(cell)?;
                let (kind, generation) = path.classify();
                if kind == MetricKind::Unrecognized {
                    return None;
                }

                let target = if kind.is_process_metric() {
                    let instance = path.instance.clone()?;
                    let label = match (generation, instance.rsplit_once(':')) {
                        (Generation::V2, Some((name, pid))) if !pid.is_empty() => {
                            let seen = v2_ordinals
                                .entry((path.host.clone(), name.to_string()))
                                .or_default();
                            let ordinal = match seen.iter().position(|p| p == pid) {
                                Some(pos) => pos,
                                None => {
                                    seen.push(pid.to_string());
                                    seen.len() - 1
                                }
                            };
                            if ordinal == 0 {
                                name.to_string()
                            } else {
                                format!("{}#{}", name, ordinal)
                            }
                        }
                        _ => instance.clone(),
                    };
                    CounterTarget::Process(label)
                } else {
                    CounterTarget::Host
                };

                Some(CounterColumn {
                    id: CounterId { target, kind },
                    generation,
                    path,
                })
            })
            .collect();

        Self { columns }
    }

    /// Number of recognized columns
    pub fn recognized(&self) -> usize {
        self.columns.iter().filter(|c| c.is_some()).count()
    }

    /// Host segment of the first recognized counter path that carries one
    pub fn first_host(&self) -> Option<&str> {
        self.columns
            .iter()
            .flatten()
            .find_map(|c| c.path.host.as_deref())
    }
}

/// True for `_Total` / `Idle`
pub fn is_pseudo_instance(label: &str) -> bool {
    PSEUDO_INSTANCES
        .iter()
        .any(|p| p.eq_ignore_ascii_case(label))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_path() {
        let path = CounterPath::parse(r"\\SQLHOST01\Process(sqlservr)\% Processor Time").unwrap();
        assert_eq!(path.host.as_deref(), Some("SQLHOST01"));
        assert_eq!(path.object, "Process");
        assert_eq!(path.instance.as_deref(), Some("sqlservr"));
        assert_eq!(path.counter, "% Processor Time");
    }

    #[test]
    fn test_parse_without_host_or_instance() {
        let path = CounterPath::parse(r"\Memory\Available MBytes").unwrap();
        assert!(path.host.is_none());
        assert!(path.instance.is_none());
        assert_eq!(path.object, "Memory");
    }

    #[test]
    fn test_parse_instance_with_parens() {
        let path = CounterPath::parse(r"\\H\Process(app (2))\Private Bytes").unwrap();
        assert_eq!(path.instance.as_deref(), Some("app (2)"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CounterPath::parse("(PDH-CSV 4.0) (UTC)(0)").is_none());
        assert!(CounterPath::parse("").is_none());
        assert!(CounterPath::parse(r"\\HOSTONLY").is_none());
    }

    #[test]
    fn test_display_roundtrips_text() {
        let raw = r"\\H\VM Processor(_Total)\CPU stolen time";
        assert_eq!(CounterPath::parse(raw).unwrap().to_string(), raw);
    }

    #[test]
    fn test_classify_process_metrics() {
        let cases = [
            ("% Processor Time", MetricKind::Cpu),
            ("% Privileged Time", MetricKind::Privileged),
            ("% User Time", MetricKind::User),
            ("Private Bytes", MetricKind::Memory),
            ("Priority Base", MetricKind::Priority),
            ("Handle Count", MetricKind::Unrecognized),
        ];
        for (counter, expected) in cases {
            let path = CounterPath::parse(&format!(r"\\H\Process V2(x:1)\{}", counter)).unwrap();
            assert_eq!(path.classify(), (expected, Generation::V2));
        }
    }

    #[test]
    fn test_classify_host_metrics_require_total() {
        let stolen = CounterPath::parse(r"\\H\VM Processor(_Total)\CPU stolen time").unwrap();
        assert_eq!(stolen.classify().0, MetricKind::SchedulingPressure);

        let per_cpu = CounterPath::parse(r"\\H\VM Processor(0)\CPU stolen time").unwrap();
        assert_eq!(per_cpu.classify().0, MetricKind::Unrecognized);

        let disk = CounterPath::parse(r"\\H\PhysicalDisk(_Total)\Disk Transfers/sec").unwrap();
        assert_eq!(disk.classify(), (MetricKind::DiskThroughput, Generation::Host));
    }

    #[test]
    fn test_catalog_maps_v2_instances_to_legacy_labels() {
        let header: Vec<String> = [
            r"\\H\Process(sqlservr)\% Processor Time",
            r"\\H\Process V2(sqlservr:4100)\% Processor Time",
            r"\\H\Process V2(sqlservr:5200)\% Processor Time",
            r"\\H\Process V2(sqlservr:4100)\Private Bytes",
            r"\\H\Memory\Available MBytes",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let catalog = CounterCatalog::from_header(&header);
        let labels: Vec<Option<CounterTarget>> = catalog
            .columns
            .iter()
            .map(|c| c.as_ref().map(|c| c.id.target.clone()))
            .collect();

        assert_eq!(
            labels,
            vec![
                Some(CounterTarget::Process("sqlservr".into())),
                Some(CounterTarget::Process("sqlservr".into())),
                Some(CounterTarget::Process("sqlservr#1".into())),
                Some(CounterTarget::Process("sqlservr".into())),
                None,
            ]
        );
        assert_eq!(catalog.recognized(), 4);
        assert_eq!(catalog.first_host(), Some("H"));
    }

    #[test]
    fn test_pseudo_instances() {
        assert!(is_pseudo_instance("_Total"));
        assert!(is_pseudo_instance("idle"));
        assert!(!is_pseudo_instance("sqlservr"));
    }
}
