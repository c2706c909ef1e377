//! # Ledger Module
//!
//! Append-only execution history and its audit mirrors.

pub mod csv_sink;
pub mod record;
pub mod sink;
pub mod stats;
pub mod store;
pub mod tracing_sink;

pub use csv_sink::CsvSink;
pub use record::{ExecutionOutcome, ExecutionRecord};
pub use sink::{MultiSink, RecordSink};
pub use stats::LedgerStats;
pub use store::{AppendOutcome, ExecutionLedger};
pub use tracing_sink::TracingSink;
