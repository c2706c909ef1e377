//! Execution History Ledger
//!
//! Append-only, idempotent on `(strategy_id, fired_at, attempt)`. Records are
//! kept per strategy in `(fired_at, attempt)` order and mirrored to the
//! configured sinks after they are accepted.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::record::{ExecutionOutcome, ExecutionRecord};
use super::sink::RecordSink;
use super::stats::LedgerStats;
use crate::error::PersistenceError;
use crate::resilience::{retry_async, RetryPolicy};
use crate::types::{FireKey, StrategyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// A record with the same key already exists; nothing was written
    Duplicate,
}

type Timeline = BTreeMap<(DateTime<Utc>, u32), ExecutionRecord>;

pub struct ExecutionLedger {
    timelines: RwLock<HashMap<StrategyId, Timeline>>,
    sinks: Vec<Arc<dyn RecordSink>>,
    persistence_retry: RetryPolicy,
}

impl ExecutionLedger {
    pub fn new(persistence_retry: RetryPolicy) -> Self {
        Self {
            timelines: RwLock::new(HashMap::new()),
            sinks: Vec::new(),
            persistence_retry,
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Append a record. The in-memory ledger accepts it first; a sink that
    /// keeps failing after retries is reported as a `PersistenceError`.
    pub async fn append(&self, record: ExecutionRecord) -> Result<AppendOutcome, PersistenceError> {
        {
            let mut timelines = self.timelines.write().await;
            let timeline = timelines.entry(record.strategy_id.clone()).or_default();
            let slot = (record.fired_at, record.attempt);
            if timeline.contains_key(&slot) {
                debug!(
                    strategy_id = %record.strategy_id,
                    attempt = record.attempt,
                    "Duplicate ledger append ignored"
                );
                return Ok(AppendOutcome::Duplicate);
            }
            timeline.insert(slot, record.clone());
        }

        for sink in &self.sinks {
            retry_async(
                &self.persistence_retry,
                "ledger_sink",
                || sink.record(&record),
                |_: &PersistenceError| true,
            )
            .await?;
        }
        Ok(AppendOutcome::Appended)
    }

    /// Records for one strategy, ordered by `fired_at` then `attempt`.
    pub async fn query(&self, strategy_id: &StrategyId) -> Vec<ExecutionRecord> {
        self.timelines
            .read()
            .await
            .get(strategy_id)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every record, ordered by `fired_at`, then strategy, then `attempt`.
    pub async fn all(&self) -> Vec<ExecutionRecord> {
        let timelines = self.timelines.read().await;
        let mut all: Vec<ExecutionRecord> =
            timelines.values().flat_map(|t| t.values().cloned()).collect();
        all.sort_by(|a, b| {
            a.fired_at
                .cmp(&b.fired_at)
                .then_with(|| a.strategy_id.cmp(&b.strategy_id))
                .then_with(|| a.attempt.cmp(&b.attempt))
        });
        all
    }

    pub async fn len(&self) -> usize {
        self.timelines.read().await.values().map(|t| t.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn has_success(&self, key: &FireKey) -> bool {
        self.records_for(key)
            .await
            .iter()
            .any(|r| r.outcome == ExecutionOutcome::Success)
    }

    /// Whether the fire already reached `Success` or `Failed`.
    pub async fn is_settled(&self, key: &FireKey) -> bool {
        self.records_for(key)
            .await
            .iter()
            .any(|r| r.outcome.is_terminal())
    }

    /// Attempt number the next record for `key` should carry.
    pub async fn next_attempt(&self, key: &FireKey) -> u32 {
        self.records_for(key)
            .await
            .last()
            .map(|r| r.attempt + 1)
            .unwrap_or(1)
    }

    pub async fn stats(&self, strategy_id: &StrategyId) -> LedgerStats {
        let timelines = self.timelines.read().await;
        match timelines.get(strategy_id) {
            Some(timeline) => LedgerStats::from_records(timeline.values()),
            None => LedgerStats::default(),
        }
    }

    async fn records_for(&self, key: &FireKey) -> Vec<ExecutionRecord> {
        let timelines = self.timelines.read().await;
        timelines
            .get(&key.strategy_id)
            .map(|t| {
                t.range((key.fired_at, 0)..=(key.fired_at, u32::MAX))
                    .map(|(_, r)| r.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
    }

    fn rec(key: &FireKey, attempt: u32, outcome: ExecutionOutcome) -> ExecutionRecord {
        ExecutionRecord::with_timestamp(key, attempt, outcome, "", t0())
    }

    struct FlakySink {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RecordSink for FlakySink {
        async fn record(&self, _record: &ExecutionRecord) -> Result<(), PersistenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(PersistenceError::Unavailable("sink down".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_append_is_idempotent() {
        let ledger = ExecutionLedger::new(RetryPolicy::immediate(1));
        let key = FireKey::new(StrategyId::new("s"), t0());

        assert_eq!(
            ledger.append(rec(&key, 1, ExecutionOutcome::Success)).await.unwrap(),
            AppendOutcome::Appended
        );
        assert_eq!(
            ledger.append(rec(&key, 1, ExecutionOutcome::Success)).await.unwrap(),
            AppendOutcome::Duplicate
        );
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_query_is_ordered() {
        let ledger = ExecutionLedger::new(RetryPolicy::immediate(1));
        let id = StrategyId::new("s");
        let later = FireKey::new(id.clone(), t0() + Duration::hours(1));
        let earlier = FireKey::new(id.clone(), t0());

        ledger.append(rec(&later, 1, ExecutionOutcome::Success)).await.unwrap();
        ledger.append(rec(&earlier, 2, ExecutionOutcome::Success)).await.unwrap();
        ledger.append(rec(&earlier, 1, ExecutionOutcome::Retrying)).await.unwrap();

        let order: Vec<(DateTime<Utc>, u32)> = ledger
            .query(&id)
            .await
            .iter()
            .map(|r| (r.fired_at, r.attempt))
            .collect();
        assert_eq!(
            order,
            vec![(t0(), 1), (t0(), 2), (t0() + Duration::hours(1), 1)]
        );
    }

    #[tokio::test]
    async fn test_attempt_tracking() {
        let ledger = ExecutionLedger::new(RetryPolicy::immediate(1));
        let key = FireKey::new(StrategyId::new("s"), t0());

        assert_eq!(ledger.next_attempt(&key).await, 1);
        assert!(!ledger.has_success(&key).await);

        ledger.append(rec(&key, 1, ExecutionOutcome::Retrying)).await.unwrap();
        assert_eq!(ledger.next_attempt(&key).await, 2);
        assert!(!ledger.is_settled(&key).await);

        ledger.append(rec(&key, 2, ExecutionOutcome::Success)).await.unwrap();
        assert!(ledger.has_success(&key).await);
        assert!(ledger.is_settled(&key).await);

        // Other fire of the same strategy is independent
        let other = FireKey::new(StrategyId::new("s"), t0() + Duration::seconds(1));
        assert_eq!(ledger.next_attempt(&other).await, 1);
    }

    #[tokio::test]
    async fn test_sink_failures_are_retried() {
        let sink = Arc::new(FlakySink {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        });
        let ledger = ExecutionLedger::new(RetryPolicy::immediate(3)).with_sink(sink.clone());
        let key = FireKey::new(StrategyId::new("s"), t0());

        ledger.append(rec(&key, 1, ExecutionOutcome::Success)).await.unwrap();
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_sink_failure_surfaces_after_retries() {
        let sink = Arc::new(FlakySink {
            failures_left: AtomicU32::new(10),
            calls: AtomicU32::new(0),
        });
        let ledger = ExecutionLedger::new(RetryPolicy::immediate(2)).with_sink(sink.clone());
        let key = FireKey::new(StrategyId::new("s"), t0());

        assert!(matches!(
            ledger.append(rec(&key, 1, ExecutionOutcome::Success)).await,
            Err(PersistenceError::Unavailable(_))
        ));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
        // The record itself is kept
        assert!(ledger.has_success(&key).await);
    }
}
