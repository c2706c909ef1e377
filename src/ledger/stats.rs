//! Per-strategy statistics derived from ledger records.

use rust_decimal::Decimal;
use serde::Serialize;

use super::record::{ExecutionOutcome, ExecutionRecord};
use crate::strategy::Performance;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    /// Every record, terminal or not
    pub attempts: usize,
    pub successes: usize,
    pub failures: usize,
    pub retries: usize,
    pub total_result_delta: Decimal,
}

impl LedgerStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ExecutionRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.attempts += 1;
            match record.outcome {
                ExecutionOutcome::Success => {
                    stats.successes += 1;
                    stats.total_result_delta += record.result_delta.unwrap_or(Decimal::ZERO);
                }
                ExecutionOutcome::Failed => stats.failures += 1,
                ExecutionOutcome::Retrying => stats.retries += 1,
            }
        }
        stats
    }

    /// Successes over terminal outcomes, in percent. `None` before any
    /// terminal outcome.
    pub fn success_rate(&self) -> Option<Decimal> {
        let terminal = self.successes + self.failures;
        if terminal == 0 {
            return None;
        }
        let rate = Decimal::from(self.successes) * Decimal::ONE_HUNDRED / Decimal::from(terminal);
        Some(rate.round_dp(2))
    }

    pub fn performance(&self) -> Option<Performance> {
        self.success_rate().map(|success_rate| Performance {
            profit_loss: self.total_result_delta,
            success_rate,
        })
    }
}
