//! Execution records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{FireKey, StrategyId};

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    /// Attempt failed transiently or is still pending; more attempts follow
    Retrying,
    Failed,
}

impl ExecutionOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Retrying)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger line. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub strategy_id: StrategyId,
    pub fired_at: DateTime<Utc>,
    /// 1-based attempt number within the fire
    pub attempt: u32,
    pub outcome: ExecutionOutcome,
    pub details: String,
    /// Signed value change attributed to the execution (quote currency)
    pub result_delta: Option<Decimal>,
    pub recorded_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Build a record with an explicit timestamp (deterministic).
    pub fn with_timestamp(
        key: &FireKey,
        attempt: u32,
        outcome: ExecutionOutcome,
        details: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            strategy_id: key.strategy_id.clone(),
            fired_at: key.fired_at,
            attempt,
            outcome,
            details: details.into(),
            result_delta: None,
            recorded_at,
        }
    }

    #[must_use]
    pub fn with_result_delta(mut self, delta: Decimal) -> Self {
        self.result_delta = Some(delta);
        self
    }

    pub fn fire_key(&self) -> FireKey {
        FireKey::new(self.strategy_id.clone(), self.fired_at)
    }

    /// Write one CSV line (no trailing newline). `details` is quoted.
    pub fn write_csv_to<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        write!(
            writer,
            "{},{},{},{},{},\"{}\",{},{}",
            self.id,
            self.strategy_id,
            self.fired_at.to_rfc3339(),
            self.attempt,
            self.outcome,
            self.details.replace('"', "\"\""),
            self.result_delta.map(|d| d.to_string()).unwrap_or_default(),
            self.recorded_at.to_rfc3339(),
        )
    }

    pub fn to_csv_line(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_csv_to(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn csv_header() -> &'static str {
        "id,strategy_id,fired_at,attempt,outcome,details,result_delta,recorded_at"
    }
}
