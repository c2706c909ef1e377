//! Automation Engine
//!
//! Drives the evaluate/dispatch loop:
//!
//! 1. Start a new evaluator cycle and settle parked submissions
//! 2. Read and validate the snapshot (an unusable one skips the whole cycle)
//! 3. Evaluate every active strategy in its own task
//! 4. Hand each fire to the executor on a spawned task
//!
//! Executions outlive the cycle that spawned them; `wait_for_executions`
//! drains them, and `run` does so before returning on shutdown.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::cli::EngineConfig;
use crate::delegation::DelegationAuthority;
use crate::error::{EvaluationError, RegistryError};
use crate::evaluation::{
    CompositeValidator, Evaluation, Fire, MarketSnapshot, SnapshotFeed, SnapshotValidator,
    TriggerEvaluator,
};
use crate::execution::{ActionExecutor, ExecutionReport};
use crate::health::{HealthResponse, HealthState};
use crate::logging::LogThrottle;
use crate::metrics;
use crate::strategy::{NewStrategy, Strategy, StrategyFilter, StrategyPatch, StrategyRegistry};
use crate::types::{Clock, StrategyId};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    /// Set when the snapshot was unusable and nothing was evaluated
    pub skipped: Option<String>,
    pub evaluated: usize,
    pub fired: usize,
    pub dispatched: usize,
    pub dropped: usize,
    /// Strategies whose evaluation failed on missing data
    pub evaluation_errors: usize,
    /// Parked submissions settled at the start of the cycle
    pub reconciled: usize,
}

pub struct AutomationEngine {
    config: EngineConfig,
    registry: Arc<StrategyRegistry>,
    authority: Arc<DelegationAuthority>,
    evaluator: Arc<TriggerEvaluator>,
    executor: Arc<ActionExecutor>,
    feed: Arc<dyn SnapshotFeed>,
    clock: Arc<dyn Clock>,
    validator: CompositeValidator,
    executions: Mutex<JoinSet<ExecutionReport>>,
    health: Option<HealthState>,
    cycles_completed: AtomicU64,
    cycles_skipped: AtomicU64,
    consecutive_skips: AtomicU64,
    last_skip_reason: RwLock<Option<String>>,
    last_cycle_at: RwLock<Option<DateTime<Utc>>>,
    throttle: LogThrottle,
    started: Instant,
}

impl AutomationEngine {
    pub fn new(
        config: EngineConfig,
        registry: Arc<StrategyRegistry>,
        authority: Arc<DelegationAuthority>,
        evaluator: Arc<TriggerEvaluator>,
        executor: Arc<ActionExecutor>,
        feed: Arc<dyn SnapshotFeed>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let validator =
            CompositeValidator::standard(config.max_snapshot_age_secs, config.max_clock_skew_secs);
        Self {
            config,
            registry,
            authority,
            evaluator,
            executor,
            feed,
            clock,
            validator,
            executions: Mutex::new(JoinSet::new()),
            health: None,
            cycles_completed: AtomicU64::new(0),
            cycles_skipped: AtomicU64::new(0),
            consecutive_skips: AtomicU64::new(0),
            last_skip_reason: RwLock::new(None),
            last_cycle_at: RwLock::new(None),
            throttle: LogThrottle::default(),
            started: Instant::now(),
        }
    }

    /// Publish health into `state` after every cycle.
    pub fn with_health_state(mut self, state: HealthState) -> Self {
        self.health = Some(state);
        self
    }

    pub fn registry(&self) -> &Arc<StrategyRegistry> {
        &self.registry
    }

    pub fn authority(&self) -> &Arc<DelegationAuthority> {
        &self.authority
    }

    pub fn executor(&self) -> &Arc<ActionExecutor> {
        &self.executor
    }

    /// Register a strategy owned by an existing, unrevoked account.
    pub fn create_strategy(&self, new: NewStrategy) -> Result<Arc<Strategy>, RegistryError> {
        match self.authority.account(&new.account_id) {
            Some(account) if !account.is_revoked() => self.registry.create(new),
            _ => Err(RegistryError::AccountNotFound(new.account_id)),
        }
    }

    /// Pause or resume a strategy. Pausing forgets its trigger state, so a
    /// resumed strategy starts from an unknown previous condition.
    pub fn set_strategy_active(
        &self,
        id: &StrategyId,
        active: bool,
    ) -> Result<Arc<Strategy>, RegistryError> {
        let updated = self.registry.set_active(id, active)?;
        if !active {
            self.evaluator.forget(id);
        }
        Ok(updated)
    }

    /// Apply a partial update. A new trigger or reference allocation resets
    /// the strategy's trigger state; edges seen under the old definition do
    /// not carry over.
    pub fn update_strategy(
        &self,
        id: &StrategyId,
        patch: StrategyPatch,
    ) -> Result<Arc<Strategy>, RegistryError> {
        let redefined = patch.trigger.is_some() || patch.reference_allocation.is_some();
        let updated = self.registry.update(id, patch)?;
        if redefined {
            self.evaluator.forget(id);
            debug!(strategy_id = %id, trigger = updated.trigger.kind().as_str(), "Trigger state reset after update");
        }
        Ok(updated)
    }

    pub fn delete_strategy(&self, id: &StrategyId) -> Result<Arc<Strategy>, RegistryError> {
        let removed = self.registry.delete(id)?;
        self.evaluator.forget(id);
        Ok(removed)
    }

    /// Pull a snapshot from the feed and run one cycle on it.
    #[instrument(skip_all)]
    pub async fn run_cycle(&self) -> CycleReport {
        let (cycle, reconciled) = self.start_cycle().await;
        match self.feed.latest().await {
            Ok(snapshot) => self.process(cycle, reconciled, snapshot).await,
            Err(e) => self.skip(cycle, reconciled, e).await,
        }
    }

    /// Run one cycle on a pushed snapshot.
    #[instrument(skip_all, fields(snapshot_at = %snapshot.timestamp))]
    pub async fn on_snapshot(&self, snapshot: MarketSnapshot) -> CycleReport {
        let (cycle, reconciled) = self.start_cycle().await;
        self.process(cycle, reconciled, snapshot).await
    }

    async fn start_cycle(&self) -> (u64, usize) {
        let cycle = self.evaluator.begin_cycle();
        self.reap_finished().await;
        let reconciled = self.executor.reconcile_pending().await.len();
        (cycle, reconciled)
    }

    async fn process(&self, cycle: u64, reconciled: usize, snapshot: MarketSnapshot) -> CycleReport {
        let now = self.clock.now();
        if let Err(e) = self.validator.validate(&snapshot, now) {
            return self.skip(cycle, reconciled, e).await;
        }

        let mut report = CycleReport {
            cycle,
            reconciled,
            ..Default::default()
        };
        let snapshot = Arc::new(snapshot);
        let strategies = self.registry.list(&StrategyFilter::active());

        let mut evaluations: JoinSet<(Arc<Strategy>, Result<Evaluation, EvaluationError>)> =
            JoinSet::new();
        for strategy in strategies {
            let evaluator = Arc::clone(&self.evaluator);
            let snapshot = Arc::clone(&snapshot);
            evaluations.spawn(async move {
                let result = evaluator.evaluate(&strategy, &snapshot, now);
                (strategy, result)
            });
        }

        let mut fires: Vec<(Arc<Strategy>, Fire)> = Vec::new();
        while let Some(joined) = evaluations.join_next().await {
            let (strategy, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "Evaluation task failed");
                    report.evaluation_errors += 1;
                    continue;
                }
            };
            report.evaluated += 1;
            let trigger = strategy.trigger.kind().as_str();
            match result {
                Ok(Evaluation::Fired(fire)) => {
                    metrics::record_evaluation(trigger, "fired");
                    fires.push((strategy, fire));
                }
                Ok(Evaluation::Idle { .. }) => metrics::record_evaluation(trigger, "idle"),
                Err(_) => {
                    // Logged (throttled) by the evaluator
                    metrics::record_evaluation(trigger, "skipped");
                    report.evaluation_errors += 1;
                }
            }
        }

        // Deterministic dispatch order within a cycle
        fires.sort_by(|a, b| a.1.key.strategy_id.cmp(&b.1.key.strategy_id));
        report.fired = fires.len();
        {
            let mut executions = self.executions.lock().await;
            for (strategy, fire) in fires {
                match self.executor.try_dispatch(&fire) {
                    Some(claim) => {
                        let executor = Arc::clone(&self.executor);
                        executions.spawn(async move {
                            executor.execute_claimed(claim, &strategy, &fire).await
                        });
                        report.dispatched += 1;
                    }
                    None => report.dropped += 1,
                }
            }
        }

        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.consecutive_skips.store(0, Ordering::Relaxed);
        *self.last_skip_reason.write().await = None;
        *self.last_cycle_at.write().await = Some(now);
        self.throttle.clear("cycle_skipped");

        info!(
            cycle,
            evaluated = report.evaluated,
            fired = report.fired,
            dispatched = report.dispatched,
            dropped = report.dropped,
            evaluation_errors = report.evaluation_errors,
            reconciled,
            "Cycle complete"
        );
        self.publish_health().await;
        report
    }

    async fn skip(&self, cycle: u64, reconciled: usize, e: EvaluationError) -> CycleReport {
        metrics::record_cycle_skipped(skip_label(&e));
        self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
        let streak = self.consecutive_skips.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_skip_reason.write().await = Some(e.to_string());

        if let Some(suppressed) = self.throttle.check("cycle_skipped") {
            warn!(cycle, error = %e, streak, suppressed, "Skipping cycle: unusable snapshot");
        }
        self.publish_health().await;
        CycleReport {
            cycle,
            skipped: Some(e.to_string()),
            reconciled,
            ..Default::default()
        }
    }

    /// Collect results of executions that already finished.
    async fn reap_finished(&self) {
        let mut executions = self.executions.lock().await;
        while let Some(joined) = executions.try_join_next() {
            log_join_result(joined);
        }
    }

    /// Wait for every spawned execution to reach a terminal (or parked) outcome.
    pub async fn wait_for_executions(&self) -> Vec<ExecutionReport> {
        let mut executions = self.executions.lock().await;
        let mut reports = Vec::new();
        while let Some(joined) = executions.join_next().await {
            if let Some(report) = log_join_result(joined) {
                reports.push(report);
            }
        }
        drop(executions);
        self.publish_health().await;
        reports
    }

    /// Run cycles on the configured interval until `shutdown` flips to true
    /// or `max_cycles` have run. In-flight executions are drained before
    /// returning; none are aborted.
    #[instrument(skip_all)]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, max_cycles: Option<u64>) {
        let mut interval = tokio::time::interval(self.config.evaluation_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            interval_secs = self.config.evaluation_interval_secs,
            strategies = self.registry.len(),
            "Automation engine started"
        );

        let mut ran = 0u64;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                    ran += 1;
                    if max_cycles.is_some_and(|max| ran >= max) {
                        info!(cycles = ran, "Cycle limit reached");
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested");
                        break;
                    }
                }
            }
        }

        let drained = self.wait_for_executions().await;
        info!(drained = drained.len(), "Automation engine stopped");
    }

    pub async fn health(&self) -> HealthResponse {
        let strategies = self.registry.list(&StrategyFilter::default());
        HealthResponse {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            consecutive_skips: self.consecutive_skips.load(Ordering::Relaxed),
            last_skip_reason: self.last_skip_reason.read().await.clone(),
            last_cycle_at: *self.last_cycle_at.read().await,
            active_strategies: strategies.iter().filter(|s| s.is_active).count(),
            strategies_needing_review: strategies.iter().filter(|s| s.needs_review).count(),
            in_flight_executions: self.executor.in_flight().len(),
            pending_submissions: self.executor.pending_count(),
            ledger_records: self.executor.ledger().len().await,
            uptime_seconds: self.started.elapsed().as_secs(),
            timestamp: self.clock.now().timestamp(),
            ..HealthResponse::default()
        }
        .with_derived_status()
    }

    async fn publish_health(&self) {
        if let Some(state) = &self.health {
            let snapshot = self.health().await;
            *state.write().await = snapshot;
        }
    }
}

fn skip_label(e: &EvaluationError) -> &'static str {
    match e {
        EvaluationError::FeedUnavailable(_) => "feed_unavailable",
        EvaluationError::StaleSnapshot { .. } => "stale",
        EvaluationError::FutureSnapshot { .. } => "future",
        _ => "invalid",
    }
}

fn log_join_result(
    joined: Result<ExecutionReport, tokio::task::JoinError>,
) -> Option<ExecutionReport> {
    match joined {
        Ok(report) => {
            debug!(
                key = %report.key,
                disposition = report.disposition.as_str(),
                details = %report.details,
                "Execution task finished"
            );
            Some(report)
        }
        Err(e) if e.is_panic() => {
            let panic_info = e.into_panic();
            let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            error!(panic_msg = %panic_msg, "CRITICAL: Execution task panicked");
            None
        }
        Err(e) => {
            error!(error = %e, "Execution task cancelled");
            None
        }
    }
}
