//! Action Executor
//!
//! Turns a fired trigger into at most one successful submission:
//!
//! 1. Hash the action and collect signer approvals
//! 2. Check them against the owning account's threshold
//! 3. Submit to the execution layer, retrying transient failures with backoff
//! 4. Record every attempt in the ledger and feed the outcome back to the registry
//!
//! Submissions still pending after the timeout are parked and settled later
//! by [`ActionExecutor::reconcile_pending`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use super::in_flight::{InFlightClaim, InFlightSlots};
use super::layer::{ExecutionLayer, ExecutionReceipt, SubmissionId, SubmissionRequest, SubmissionStatus};
use crate::delegation::{ActionHash, ApprovalProvider, Authorization, DelegationAuthority};
use crate::error::{AuthorizationError, ExecutionError};
use crate::evaluation::Fire;
use crate::ledger::{AppendOutcome, ExecutionLedger, ExecutionOutcome, ExecutionRecord};
use crate::logging::LogThrottle;
use crate::metrics;
use crate::resilience::RetryPolicy;
use crate::strategy::{ActionSpec, Performance, Strategy, StrategyRegistry};
use crate::types::{AccountId, Clock, FireKey, StrategyId};

/// Executor tuning, taken from the engine configuration.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub retry: RetryPolicy,
    pub submission_timeout: Duration,
    pub reconcile_poll_timeout: Duration,
    pub consecutive_failure_threshold: u32,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            submission_timeout: Duration::from_secs(30),
            reconcile_poll_timeout: Duration::from_secs(1),
            consecutive_failure_threshold: 3,
        }
    }
}

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Succeeded,
    Failed,
    Unauthorized,
    /// Parked; settled by a later reconciliation
    Pending,
    /// The fire was already settled in the ledger
    AlreadyExecuted,
    /// Another execution of the strategy was in flight
    Dropped,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Unauthorized => "unauthorized",
            Self::Pending => "pending",
            Self::AlreadyExecuted => "already_executed",
            Self::Dropped => "dropped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub key: FireKey,
    pub disposition: Disposition,
    /// Ledger records written for this fire by this call
    pub records_written: u32,
    pub details: String,
    pub result_delta: Option<Decimal>,
    /// Set when a record was kept in memory but its sink mirror failed
    pub persistence_error: Option<String>,
}

impl ExecutionReport {
    fn new(key: FireKey, disposition: Disposition, details: impl Into<String>) -> Self {
        Self {
            key,
            disposition,
            records_written: 0,
            details: details.into(),
            result_delta: None,
            persistence_error: None,
        }
    }

    fn with_writes(mut self, writes: LedgerWrites) -> Self {
        self.records_written += writes.records;
        if writes.persistence_error.is_some() {
            self.persistence_error = writes.persistence_error;
        }
        self
    }
}

/// Ledger writes made while handling one fire.
#[derive(Debug, Default)]
struct LedgerWrites {
    records: u32,
    persistence_error: Option<String>,
}

/// A submission that outlived its timeout.
#[derive(Debug, Clone)]
struct PendingSubmission {
    submission_id: SubmissionId,
    action: ActionSpec,
    reference_price: Option<Decimal>,
}

/// SHA-256 over the canonical JSON of what is being authorized.
pub fn action_hash(
    strategy_id: &StrategyId,
    account_id: &AccountId,
    fired_at: DateTime<Utc>,
    action: &ActionSpec,
) -> ActionHash {
    #[derive(Serialize)]
    struct Signed<'a> {
        strategy_id: &'a StrategyId,
        account_id: &'a AccountId,
        fired_at: DateTime<Utc>,
        action: &'a ActionSpec,
    }
    let encoded = serde_json::to_vec(&Signed {
        strategy_id,
        account_id,
        fired_at,
        action,
    })
    .unwrap_or_default();
    ActionHash::from_bytes(Sha256::digest(&encoded).into())
}

/// Signed value change of a fill against the fire's reference price.
///
/// Buying below the reference or selling above it is a gain.
pub fn result_delta(
    action: &ActionSpec,
    reference_price: Option<Decimal>,
    receipt: &ExecutionReceipt,
) -> Option<Decimal> {
    let reference = reference_price?;
    let fill = receipt.fill_price?;
    let quantity = receipt.filled_quantity;
    match action {
        ActionSpec::Buy { .. } => Some((reference - fill) * quantity),
        ActionSpec::Sell { .. } | ActionSpec::Swap { .. } => Some((fill - reference) * quantity),
        ActionSpec::Alert { .. } | ActionSpec::Rebalance { .. } => None,
    }
}

pub struct ActionExecutor {
    authority: Arc<DelegationAuthority>,
    approvals: Arc<dyn ApprovalProvider>,
    layer: Arc<dyn ExecutionLayer>,
    ledger: Arc<ExecutionLedger>,
    registry: Arc<StrategyRegistry>,
    clock: Arc<dyn Clock>,
    settings: ExecutorSettings,
    in_flight: InFlightSlots,
    /// Submission ids per fire, so retries poll instead of resubmitting
    submissions: DashMap<FireKey, SubmissionId>,
    pending: DashMap<FireKey, PendingSubmission>,
    throttle: LogThrottle,
}

impl ActionExecutor {
    pub fn new(
        authority: Arc<DelegationAuthority>,
        approvals: Arc<dyn ApprovalProvider>,
        layer: Arc<dyn ExecutionLayer>,
        ledger: Arc<ExecutionLedger>,
        registry: Arc<StrategyRegistry>,
        clock: Arc<dyn Clock>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            authority,
            approvals,
            layer,
            ledger,
            registry,
            clock,
            settings,
            in_flight: InFlightSlots::new(),
            submissions: DashMap::new(),
            pending: DashMap::new(),
            throttle: LogThrottle::default(),
        }
    }

    pub fn in_flight(&self) -> &InFlightSlots {
        &self.in_flight
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn ledger(&self) -> &Arc<ExecutionLedger> {
        &self.ledger
    }

    /// Claim the strategy's in-flight slot for `fire`. A fire for a strategy
    /// that is already executing is dropped.
    pub fn try_dispatch(&self, fire: &Fire) -> Option<InFlightClaim> {
        match self.in_flight.try_claim(&fire.key) {
            Some(claim) => Some(claim),
            None => {
                metrics::record_dropped_fire(fire.strategy_id().as_str());
                let throttle_key = format!("dropped:{}", fire.strategy_id());
                if let Some(suppressed) = self.throttle.check(&throttle_key) {
                    warn!(
                        strategy_id = %fire.strategy_id(),
                        fired_at = %fire.fired_at(),
                        busy_with = ?self.in_flight.holder(fire.strategy_id()).map(|k| k.to_string()),
                        suppressed,
                        "Dropping fire: execution already in flight"
                    );
                }
                None
            }
        }
    }

    /// Claim and execute in one step.
    pub async fn execute(&self, strategy: &Strategy, fire: &Fire) -> ExecutionReport {
        match self.try_dispatch(fire) {
            Some(claim) => self.execute_claimed(claim, strategy, fire).await,
            None => ExecutionReport::new(
                fire.key.clone(),
                Disposition::Dropped,
                "execution already in flight",
            ),
        }
    }

    /// Run an execution whose slot has already been claimed.
    #[instrument(skip_all, fields(strategy_id = %fire.strategy_id(), fired_at = %fire.fired_at()))]
    pub async fn execute_claimed(
        &self,
        claim: InFlightClaim,
        strategy: &Strategy,
        fire: &Fire,
    ) -> ExecutionReport {
        let started = Instant::now();
        let key = fire.key.clone();
        let action_label = strategy.action.kind().as_str();

        if self.ledger.is_settled(&key).await {
            debug!("Fire already settled, skipping");
            return ExecutionReport::new(key, Disposition::AlreadyExecuted, "already settled");
        }

        let report = match self.authorize(strategy, &key).await {
            Ok(authorization) => {
                let request = SubmissionRequest {
                    idempotency_key: key.clone(),
                    account_id: strategy.account_id.clone(),
                    action: strategy.action.clone(),
                    reference_price: fire.reference_price,
                    authorization,
                };
                self.submit_with_retry(claim, strategy, &request).await
            }
            Err(e) => self.record_unauthorized(&key, e).await,
        };

        metrics::record_execution(action_label, report.disposition.as_str());
        if report.disposition != Disposition::Pending {
            metrics::record_execution_latency(action_label, started.elapsed().as_secs_f64());
        }
        report
    }

    async fn authorize(
        &self,
        strategy: &Strategy,
        key: &FireKey,
    ) -> Result<Authorization, AuthorizationError> {
        let account = self
            .authority
            .account(&strategy.account_id)
            .ok_or_else(|| AuthorizationError::AccountNotFound(strategy.account_id.clone()))?;
        let hash = action_hash(&strategy.id, &strategy.account_id, key.fired_at, &strategy.action);
        let approvals = self.approvals.collect(&account, &hash).await?;
        self.authority.authorize(&strategy.account_id, &hash, &approvals)
    }

    async fn record_unauthorized(&self, key: &FireKey, e: AuthorizationError) -> ExecutionReport {
        let reason = match &e {
            AuthorizationError::AccountNotFound(_) => "account_not_found",
            AuthorizationError::Revoked(_) => "revoked",
            AuthorizationError::InsufficientSignatures { .. } => "insufficient_signatures",
            AuthorizationError::ApprovalUnavailable(_) => "approval_unavailable",
        };
        metrics::record_authorization_failure(reason);
        warn!(key = %key, error = %e, "Execution not authorized");

        let details = format!("unauthorized: {}", e);
        let mut writes = LedgerWrites::default();
        self.write(&mut writes, key, ExecutionOutcome::Failed, details.clone(), None)
            .await;
        ExecutionReport::new(key.clone(), Disposition::Unauthorized, details).with_writes(writes)
    }

    async fn submit_with_retry(
        &self,
        claim: InFlightClaim,
        strategy: &Strategy,
        request: &SubmissionRequest,
    ) -> ExecutionReport {
        let key = &request.idempotency_key;
        let attempts = self.settings.retry.attempts();
        let mut writes = LedgerWrites::default();

        for attempt in 1..=attempts {
            let last = attempt == attempts;
            let error = match self.submit_once(request).await {
                Ok(SubmissionStatus::Success(receipt)) => {
                    return self
                        .settle_success(key, &request.action, request.reference_price, &receipt)
                        .await
                        .with_writes(writes);
                }
                Ok(SubmissionStatus::Pending) => {
                    if let Some(submission_id) = self.submissions.get(key).map(|s| s.value().clone()) {
                        self.pending.insert(
                            key.clone(),
                            PendingSubmission {
                                submission_id,
                                action: request.action.clone(),
                                reference_price: request.reference_price,
                            },
                        );
                    }
                    metrics::set_pending_submissions(self.pending.len());
                    claim.park();
                    self.write(&mut writes, key, ExecutionOutcome::Retrying, "pending", None)
                        .await;
                    info!(key = %key, "Submission pending, parked for reconciliation");
                    return ExecutionReport::new(key.clone(), Disposition::Pending, "pending")
                        .with_writes(writes);
                }
                Ok(SubmissionStatus::Failed { reason }) => {
                    // Settled without effect: next attempt submits afresh
                    self.submissions.remove(key);
                    ExecutionError::Transient(reason)
                }
                Err(e) => e,
            };

            if !error.is_transient() {
                self.submissions.remove(key);
                let details = format!("rejected: {}", error);
                self.write(&mut writes, key, ExecutionOutcome::Failed, details.clone(), None)
                    .await;
                self.book_failure(&strategy.id).await;
                return ExecutionReport::new(key.clone(), Disposition::Failed, details)
                    .with_writes(writes);
            }

            if last {
                self.submissions.remove(key);
                let details = format!("exhausted after {} attempt(s): {}", attempts, error);
                self.write(&mut writes, key, ExecutionOutcome::Failed, details.clone(), None)
                    .await;
                error!(key = %key, error = %error, "Execution failed after retries");
                self.book_failure(&strategy.id).await;
                return ExecutionReport::new(key.clone(), Disposition::Failed, details)
                    .with_writes(writes);
            }

            self.write(
                &mut writes,
                key,
                ExecutionOutcome::Retrying,
                format!("transient: {}", error),
                None,
            )
            .await;
            let delay = self.settings.retry.calculate_delay(attempt - 1);
            warn!(
                key = %key,
                attempt,
                max_attempts = attempts,
                backoff_ms = delay.as_millis() as u64,
                error = %error,
                "Transient execution failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }

        // attempts() is never zero, so the loop always returns
        ExecutionReport::new(key.clone(), Disposition::Failed, "no attempts made").with_writes(writes)
    }

    /// Submit (or reuse the memoised submission) and wait for it to settle.
    ///
    /// Both the submit call and the wait are bounded by the submission
    /// timeout. A submit that never answers is a transient timeout; a wait
    /// that runs out leaves the submission pending.
    async fn submit_once(&self, request: &SubmissionRequest) -> Result<SubmissionStatus, ExecutionError> {
        let key = &request.idempotency_key;
        let timeout = self.settings.submission_timeout;
        let existing = self.submissions.get(key).map(|s| s.value().clone());
        let submission_id = match existing {
            Some(id) => id,
            None => {
                let id = tokio::time::timeout(timeout, self.layer.submit(request))
                    .await
                    .map_err(|_| ExecutionError::Timeout(timeout.as_millis() as u64))??;
                self.submissions.insert(key.clone(), id.clone());
                id
            }
        };

        match tokio::time::timeout(timeout, self.layer.await_result(&submission_id, timeout)).await {
            Ok(result) => result,
            Err(_) => Ok(SubmissionStatus::Pending),
        }
    }

    async fn settle_success(
        &self,
        key: &FireKey,
        action: &ActionSpec,
        reference_price: Option<Decimal>,
        receipt: &ExecutionReceipt,
    ) -> ExecutionReport {
        self.submissions.remove(key);
        let delta = result_delta(action, reference_price, receipt);
        let mut writes = LedgerWrites::default();
        self.write(&mut writes, key, ExecutionOutcome::Success, receipt.details.clone(), delta)
            .await;
        let mut report = ExecutionReport::new(key.clone(), Disposition::Succeeded, receipt.details.clone())
            .with_writes(writes);
        report.result_delta = delta;

        let performance = self
            .ledger
            .stats(&key.strategy_id)
            .await
            .performance()
            .unwrap_or(Performance {
                profit_loss: delta.unwrap_or(Decimal::ZERO),
                success_rate: Decimal::ONE_HUNDRED,
            });
        if let Err(e) = self
            .registry
            .record_success(&key.strategy_id, key.fired_at, performance)
        {
            warn!(key = %key, error = %e, "Could not update strategy after success");
        }
        info!(key = %key, result_delta = ?delta, details = %receipt.details, "Execution succeeded");
        report
    }

    async fn book_failure(&self, strategy_id: &StrategyId) {
        let performance = self.ledger.stats(strategy_id).await.performance();
        match self.registry.record_failure(
            strategy_id,
            performance,
            self.settings.consecutive_failure_threshold,
        ) {
            Ok(outcome) if outcome.deactivated => metrics::record_deactivation(strategy_id.as_str()),
            Ok(_) => {}
            Err(e) => warn!(strategy_id = %strategy_id, error = %e, "Could not update strategy after failure"),
        }
    }

    /// Append the next attempt for `key` and tally it into `writes`.
    ///
    /// A record the in-memory ledger accepted counts even when its sink
    /// mirror failed; the failure is carried on `writes` for the report.
    async fn write(
        &self,
        writes: &mut LedgerWrites,
        key: &FireKey,
        outcome: ExecutionOutcome,
        details: impl Into<String>,
        delta: Option<Decimal>,
    ) {
        let attempt = self.ledger.next_attempt(key).await;
        let mut record =
            ExecutionRecord::with_timestamp(key, attempt, outcome, details, self.clock.now());
        if let Some(delta) = delta {
            record = record.with_result_delta(delta);
        }
        match self.ledger.append(record).await {
            Ok(AppendOutcome::Appended) => writes.records += 1,
            Ok(AppendOutcome::Duplicate) => {}
            Err(e) => {
                metrics::record_persistence_failure();
                error!(key = %key, attempt, error = %e, "Ledger sink failed, record kept in memory only");
                writes.records += 1;
                writes.persistence_error = Some(e.to_string());
            }
        }
    }

    /// Poll every parked submission once and settle those with a result.
    #[instrument(skip_all)]
    pub async fn reconcile_pending(&self) -> Vec<ExecutionReport> {
        let parked: Vec<(FireKey, PendingSubmission)> = self
            .pending
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let mut reports = Vec::new();

        for (key, parked_submission) in parked {
            let status = self
                .layer
                .await_result(&parked_submission.submission_id, self.settings.reconcile_poll_timeout)
                .await;
            let report = match status {
                Ok(SubmissionStatus::Pending) => continue,
                Err(e) if e.is_transient() => {
                    debug!(key = %key, error = %e, "Reconciliation poll failed, will retry");
                    continue;
                }
                Ok(SubmissionStatus::Success(receipt)) => {
                    self.settle_success(
                        &key,
                        &parked_submission.action,
                        parked_submission.reference_price,
                        &receipt,
                    )
                    .await
                }
                Ok(SubmissionStatus::Failed { reason }) => self.settle_parked_failure(&key, reason).await,
                Err(e) => self.settle_parked_failure(&key, format!("rejected: {}", e)).await,
            };

            self.pending.remove(&key);
            self.submissions.remove(&key);
            self.in_flight.release(&key);
            metrics::record_execution(
                parked_submission.action.kind().as_str(),
                report.disposition.as_str(),
            );
            reports.push(report);
        }

        metrics::set_pending_submissions(self.pending.len());
        reports
    }

    async fn settle_parked_failure(&self, key: &FireKey, reason: String) -> ExecutionReport {
        let details = format!("settled unsuccessfully: {}", reason);
        let mut writes = LedgerWrites::default();
        self.write(&mut writes, key, ExecutionOutcome::Failed, details.clone(), None)
            .await;
        self.book_failure(&key.strategy_id).await;
        ExecutionReport::new(key.clone(), Disposition::Failed, details).with_writes(writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::{DelegationKind, InMemoryDelegationStore, LocalKeyring};
    use crate::error::PersistenceError;
    use crate::execution::paper::PaperExecutionLayer;
    use crate::ledger::RecordSink;
    use crate::strategy::{ComparisonOperator, NewStrategy, TriggerSpec};
    use crate::types::SystemClock;
    use rust_decimal_macros::dec;

    struct Harness {
        executor: ActionExecutor,
        registry: Arc<StrategyRegistry>,
        ledger: Arc<ExecutionLedger>,
        layer: Arc<PaperExecutionLayer>,
        strategy: Arc<Strategy>,
    }

    fn harness(sign: bool) -> Harness {
        harness_with_ledger(sign, ExecutionLedger::new(RetryPolicy::immediate(1)))
    }

    fn harness_with_ledger(sign: bool, ledger: ExecutionLedger) -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let authority = Arc::new(DelegationAuthority::new(
            Arc::new(InMemoryDelegationStore::new()),
            RetryPolicy::immediate(1),
            clock.clone(),
        ));
        let mut keyring = LocalKeyring::new();
        let owner = keyring.insert_seed(&[1u8; 32]);
        let signers = if sign {
            keyring
        } else {
            LocalKeyring::new()
        };
        let account = authority
            .create_account(owner.clone(), DelegationKind::Single, vec![owner], 1)
            .unwrap();

        let registry = Arc::new(StrategyRegistry::new(clock.clone()));
        let strategy = registry
            .create(NewStrategy::new(
                account.id().clone(),
                "dip buyer",
                TriggerSpec::PriceThreshold {
                    asset: "ETH".into(),
                    operator: ComparisonOperator::Lt,
                    price: dec!(2000),
                },
                ActionSpec::Buy {
                    asset: "ETH".into(),
                    amount: dec!(100),
                    currency: "USD".into(),
                },
            ))
            .unwrap();
        let ledger = Arc::new(ledger);
        let layer = Arc::new(PaperExecutionLayer::new(dec!(0)));

        let executor = ActionExecutor::new(
            authority,
            Arc::new(signers),
            layer.clone(),
            ledger.clone(),
            registry.clone(),
            clock,
            ExecutorSettings {
                retry: RetryPolicy::immediate(3),
                ..Default::default()
            },
        );
        Harness {
            executor,
            registry,
            ledger,
            layer,
            strategy,
        }
    }

    fn fire(strategy: &Strategy, price: Decimal) -> Fire {
        Fire {
            key: FireKey::new(strategy.id.clone(), Utc::now()),
            cycle: 1,
            reference_price: Some(price),
            detail: "test".into(),
        }
    }

    #[tokio::test]
    async fn test_successful_execution_updates_registry() {
        let h = harness(true);
        let f = fire(&h.strategy, dec!(1900));
        let report = h.executor.execute(&h.strategy, &f).await;

        assert_eq!(report.disposition, Disposition::Succeeded);
        assert_eq!(report.result_delta, Some(dec!(0)));
        let records = h.ledger.query(&h.strategy.id).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, ExecutionOutcome::Success);

        let updated = h.registry.get(&h.strategy.id).unwrap();
        assert_eq!(updated.execution_count, 1);
        assert_eq!(updated.last_triggered, Some(f.fired_at()));
        assert_eq!(
            updated.performance.as_ref().map(|p| p.success_rate),
            Some(dec!(100))
        );
        assert!(h.executor.in_flight().is_empty());
    }

    struct DetachedSink;

    #[async_trait::async_trait]
    impl RecordSink for DetachedSink {
        async fn record(&self, _record: &ExecutionRecord) -> Result<(), PersistenceError> {
            Err(PersistenceError::Unavailable("volume detached".into()))
        }
    }

    #[tokio::test]
    async fn test_sink_failure_is_reported_not_swallowed() {
        let ledger = ExecutionLedger::new(RetryPolicy::immediate(2)).with_sink(Arc::new(DetachedSink));
        let h = harness_with_ledger(true, ledger);
        let f = fire(&h.strategy, dec!(1900));
        let report = h.executor.execute(&h.strategy, &f).await;

        assert_eq!(report.disposition, Disposition::Succeeded);
        assert_eq!(report.records_written, 1);
        let error = report.persistence_error.expect("sink failure should be reported");
        assert!(error.contains("volume detached"), "{error}");
        // The in-memory ledger still holds the record
        assert!(h.ledger.is_settled(&f.key).await);
        assert!(metrics::LEDGER_PERSISTENCE_FAILURES.get() >= 1);
    }

    #[tokio::test]
    async fn test_healthy_sink_leaves_no_persistence_error() {
        let h = harness(true);
        let f = fire(&h.strategy, dec!(1900));
        let report = h.executor.execute(&h.strategy, &f).await;
        assert_eq!(report.persistence_error, None);
    }

    #[tokio::test]
    async fn test_same_fire_twice_executes_once() {
        let h = harness(true);
        let f = fire(&h.strategy, dec!(1900));
        h.executor.execute(&h.strategy, &f).await;
        let second = h.executor.execute(&h.strategy, &f).await;

        assert_eq!(second.disposition, Disposition::AlreadyExecuted);
        assert_eq!(h.layer.submission_count(), 1);
        assert_eq!(h.ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_unauthorized_is_terminal_and_not_counted() {
        let h = harness(false);
        let f = fire(&h.strategy, dec!(1900));
        let report = h.executor.execute(&h.strategy, &f).await;

        assert_eq!(report.disposition, Disposition::Unauthorized);
        let records = h.ledger.query(&h.strategy.id).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, ExecutionOutcome::Failed);
        assert!(records[0].details.starts_with("unauthorized"));
        assert_eq!(h.layer.submission_count(), 0);

        let strategy = h.registry.get(&h.strategy.id).unwrap();
        assert!(strategy.is_active);
        assert_eq!(strategy.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_busy_strategy_drops_fire() {
        let h = harness(true);
        let f = fire(&h.strategy, dec!(1900));
        let _claim = h.executor.try_dispatch(&f).unwrap();

        let other = fire(&h.strategy, dec!(1800));
        let report = h.executor.execute(&h.strategy, &other).await;
        assert_eq!(report.disposition, Disposition::Dropped);
        assert!(h.ledger.is_empty().await);
    }

    #[test]
    fn test_action_hash_depends_on_fire_time() {
        let id = StrategyId::new("s");
        let account = AccountId::new("a");
        let action = ActionSpec::Alert {
            message: "hi".into(),
            channels: vec![crate::strategy::AlertChannel::Email],
        };
        let t = Utc::now();
        assert_eq!(
            action_hash(&id, &account, t, &action),
            action_hash(&id, &account, t, &action)
        );
        assert_ne!(
            action_hash(&id, &account, t, &action),
            action_hash(&id, &account, t + chrono::Duration::seconds(1), &action)
        );
    }

    #[test]
    fn test_result_delta_sign_by_side() {
        let receipt = ExecutionReceipt {
            fill_price: Some(dec!(2010)),
            filled_quantity: dec!(2),
            details: String::new(),
        };
        let buy = ActionSpec::Buy {
            asset: "ETH".into(),
            amount: dec!(4020),
            currency: "USD".into(),
        };
        let sell = ActionSpec::Sell {
            asset: "ETH".into(),
            amount: dec!(4020),
            currency: "USD".into(),
        };
        assert_eq!(result_delta(&buy, Some(dec!(2000)), &receipt), Some(dec!(-20)));
        assert_eq!(result_delta(&sell, Some(dec!(2000)), &receipt), Some(dec!(20)));
        assert_eq!(result_delta(&buy, None, &receipt), None);
    }
}
