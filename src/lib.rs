//! Contend - fleet-wide hypervisor contention diagnostics from perf captures
//!
//! This library discovers binary performance-counter captures, converts them
//! through an external decoder, reconciles legacy and `Process V2` counter
//! generations, and scores how strongly the target workload's CPU tracks the
//! hypervisor's scheduling pressure on every host.

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod counters;
pub mod decoder;
pub mod diagnostics;
pub mod discovery;
pub mod error;
pub mod normalize;
pub mod pdh_csv;
pub mod reader;
pub mod scheduler;
pub mod summary;
