//! CSV ledger export
//!
//! Appends every record to a CSV file, writing the header on first use of
//! an empty file. File I/O runs on the blocking pool.

use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::record::ExecutionRecord;
use super::sink::RecordSink;
use crate::error::PersistenceError;

pub struct CsvSink {
    file_path: Arc<PathBuf>,
    /// Serializes writes and tracks header state
    state: Arc<Mutex<CsvState>>,
}

struct CsvState {
    header_written: bool,
}

impl CsvSink {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Arc::new(file_path.into()),
            state: Arc::new(Mutex::new(CsvState {
                header_written: false,
            })),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.file_path
    }
}

#[async_trait]
impl RecordSink for CsvSink {
    async fn record(&self, record: &ExecutionRecord) -> Result<(), PersistenceError> {
        let file_path = Arc::clone(&self.file_path);
        let state = Arc::clone(&self.state);
        let line = record.to_csv_line();

        tokio::task::spawn_blocking(move || {
            let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&*file_path)?;

            if !guard.header_written {
                if file.metadata()?.len() == 0 {
                    writeln!(file, "{}", ExecutionRecord::csv_header())?;
                }
                guard.header_written = true;
            }
            writeln!(file, "{}", line)?;
            Ok::<(), PersistenceError>(())
        })
        .await
        .map_err(|e| PersistenceError::Io(e.to_string()))??;

        Ok(())
    }
}
