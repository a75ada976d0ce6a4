//! Application layer module
//!
//! Coordinates the domain rules with the browser session and the record
//! store: batch runs over collections and single-URL probes.

pub mod orchestrator;
pub mod probe;

pub use orchestrator::{BatchReport, ObserveError, RecordOutcome, RunOrchestrator};
pub use probe::{ProbeReport, probe};
