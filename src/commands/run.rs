//! Run command handler.
//!
//! Implements the `run` subcommand: loads the deployment file, wires the
//! engine to a file-backed snapshot feed and the paper execution layer, and
//! runs cycles until Ctrl-C or the cycle limit.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::{ConfigError, EngineFile};
use crate::delegation::{DelegationAuthority, InMemoryDelegationStore, LocalKeyring, ParticipantFilter};
use crate::engine::AutomationEngine;
use crate::evaluation::{FileSnapshotFeed, TriggerEvaluator};
use crate::execution::{ActionExecutor, PaperExecutionLayer};
use crate::health::{create_health_state, run_health_server};
use crate::ledger::{CsvSink, ExecutionLedger, MultiSink, RecordSink, TracingSink};
use crate::strategy::{StrategyFilter, StrategyRegistry};
use crate::types::{Clock, SystemClock};

/// Overrides taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cycles: Option<u64>,
    pub health_port: Option<u16>,
    pub ledger_csv: Option<PathBuf>,
}

/// Run the automation engine.
///
/// # Errors
/// Returns error if the deployment file, an account or a strategy is invalid.
pub async fn run_engine(
    config_path: &Path,
    snapshot_path: &Path,
    options: RunOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("--- Autopilot: Initializing ---");
    let file = EngineFile::load(config_path)?;
    let mut config = file.engine.clone();
    if options.health_port.is_some() {
        config.health_port = options.health_port;
    }
    if options.ledger_csv.is_some() {
        config.ledger_csv = options.ledger_csv;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let authority = Arc::new(DelegationAuthority::new(
        Arc::new(InMemoryDelegationStore::new()),
        config.persistence_retry.clone(),
        clock.clone(),
    ));

    let mut keyring = LocalKeyring::new();
    for spec in &file.accounts {
        let signers = spec.resolve_signers(&mut keyring)?;
        let owner = signers.first().cloned().ok_or_else(|| ConfigError::Invalid {
            field: "accounts.signers",
            reason: format!("account {} has no signers", spec.id),
        })?;
        let account = authority.create_account_with_id(
            spec.id.clone(),
            owner,
            spec.kind,
            signers,
            spec.threshold,
        )?;
        info!(
            account_id = %account.id(),
            kind = %account.kind(),
            signers = account.signers().len(),
            threshold = account.threshold(),
            "Delegation account loaded"
        );
    }
    info!(local_keys = keyring.len(), "Signing keys loaded");

    for links in file.delegations.iter().cloned() {
        let hash = authority.store_chain(links).await?;
        let chain = authority.fetch_chain(&hash).await?;
        let related = authority
            .fetch_chains_by_participant(chain.leaf(), ParticipantFilter::Both)
            .await?;
        info!(
            chain_hash = %hash,
            root = chain.root().short(),
            leaf = chain.leaf().short(),
            chains_for_leaf = related.len(),
            "Delegation chain registered"
        );
    }

    let mut sinks: Vec<Box<dyn RecordSink>> = vec![Box::new(TracingSink::new())];
    if let Some(path) = &config.ledger_csv {
        info!(path = %path.display(), "Mirroring ledger to CSV");
        sinks.push(Box::new(CsvSink::new(path.clone())));
    }
    let ledger = Arc::new(
        ExecutionLedger::new(config.persistence_retry.clone()).with_sink(Arc::new(MultiSink::new(sinks))),
    );

    let registry = Arc::new(StrategyRegistry::new(clock.clone()));
    let executor = Arc::new(ActionExecutor::new(
        authority.clone(),
        Arc::new(keyring),
        Arc::new(PaperExecutionLayer::new(config.paper_slippage_bps)),
        ledger.clone(),
        registry.clone(),
        clock.clone(),
        config.executor_settings(),
    ));

    let health = create_health_state();
    let engine = AutomationEngine::new(
        config.clone(),
        registry.clone(),
        authority,
        Arc::new(TriggerEvaluator::new(config.time_window())),
        executor,
        Arc::new(FileSnapshotFeed::new(snapshot_path)),
        clock,
    )
    .with_health_state(health.clone());

    for new in file.strategies {
        let strategy = engine.create_strategy(new)?;
        info!(
            strategy_id = %strategy.id,
            name = %strategy.name,
            trigger = strategy.trigger.kind().as_str(),
            action = strategy.action.kind().as_str(),
            active = strategy.is_active,
            "Strategy registered"
        );
    }
    if registry.is_empty() {
        warn!("No strategies configured; the engine will only reconcile and report health");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    if let Some(port) = config.health_port {
        tokio::spawn(run_health_server(port, health, shutdown_rx.clone()));
    }
    {
        let shutdown_tx = Arc::clone(&shutdown_tx);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(true);
            }
        });
    }

    engine.run(shutdown_rx, options.cycles).await;
    let _ = shutdown_tx.send(true);

    info!("--- Autopilot: Summary ---");
    for strategy in registry.list(&StrategyFilter::default()) {
        let stats = ledger.stats(&strategy.id).await;
        info!(
            strategy_id = %strategy.id,
            name = %strategy.name,
            executions = strategy.execution_count,
            successes = stats.successes,
            failures = stats.failures,
            success_rate = ?stats.success_rate(),
            profit_loss = %stats.total_result_delta,
            needs_review = strategy.needs_review,
            "Strategy summary"
        );
    }
    let health = engine.health().await;
    info!(status = %health.status, ledger_records = health.ledger_records, "Engine health");
    Ok(())
}
