//! Record Sinks
//!
//! Pluggable mirrors for ledger records:
//! - `TracingSink` - structured audit log (captured by any subscriber)
//! - `CsvSink` - CSV audit export
//! - `MultiSink` - fans out to several sinks

use async_trait::async_trait;

use super::record::ExecutionRecord;
use crate::error::PersistenceError;

/// Destination for appended ledger records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Mirror one record. Called once per newly appended record.
    async fn record(&self, record: &ExecutionRecord) -> Result<(), PersistenceError>;

    /// Flush any buffered records (optional, default no-op)
    async fn flush(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// A sink that fans out to multiple backends.
///
/// Best effort: fails only when every backend fails.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn RecordSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Box<dyn RecordSink>>) -> Self {
        Self { sinks }
    }

    pub fn add(&mut self, sink: Box<dyn RecordSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl RecordSink for MultiSink {
    async fn record(&self, record: &ExecutionRecord) -> Result<(), PersistenceError> {
        let mut error_count = 0;
        let mut last_error = None;

        for sink in &self.sinks {
            if let Err(e) = sink.record(record).await {
                tracing::error!(error = %e, record_id = %record.id, "Failed to mirror ledger record");
                last_error = Some(e);
                error_count += 1;
            }
        }

        if error_count > 0 && error_count == self.sinks.len() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), PersistenceError> {
        for sink in &self.sinks {
            sink.flush().await?;
        }
        Ok(())
    }
}
