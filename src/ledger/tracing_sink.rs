//! Tracing-based ledger sink
//!
//! Emits one structured audit line per record under the `ledger` target, so
//! a JSON subscriber can ship the audit trail without extra dependencies.

use async_trait::async_trait;
use tracing::info;

use super::record::ExecutionRecord;
use super::sink::RecordSink;
use crate::error::PersistenceError;

#[derive(Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RecordSink for TracingSink {
    async fn record(&self, record: &ExecutionRecord) -> Result<(), PersistenceError> {
        info!(
            target: "ledger",
            record_id = %record.id,
            strategy_id = %record.strategy_id,
            fired_at = %record.fired_at.to_rfc3339(),
            attempt = record.attempt,
            outcome = %record.outcome,
            result_delta = record.result_delta.map(|d| d.to_string()).unwrap_or_default(),
            details = %record.details,
            "Execution recorded"
        );
        Ok(())
    }
}
