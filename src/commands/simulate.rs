//! Simulate command handler.
//!
//! Projects each configured strategy against one snapshot and prints the
//! reports as JSON. Nothing is authorized, submitted or recorded.

use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::EngineFile;
use crate::evaluation::MarketSnapshot;
use crate::simulation::{simulate, SimulationReport};
use crate::strategy::{StrategyFilter, StrategyRegistry};
use crate::types::{StrategyId, SystemClock};

#[derive(Debug, Serialize)]
struct SimulationOutput {
    strategy_id: StrategyId,
    name: String,
    #[serde(flatten)]
    report: SimulationReport,
}

/// Simulate every strategy in the deployment file (or just `only`).
///
/// # Errors
/// Returns error if the files cannot be read or a strategy is malformed.
pub fn run_simulate(
    config_path: &Path,
    snapshot_path: &Path,
    only: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let file = EngineFile::load(config_path)?;
    let snapshot: MarketSnapshot = serde_json::from_reader(BufReader::new(File::open(snapshot_path)?))?;
    info!(
        snapshot_at = %snapshot.timestamp,
        prices = snapshot.prices.len(),
        "--- Autopilot: Simulation ---"
    );

    // The registry only validates and assigns ids here
    let registry = StrategyRegistry::new(Arc::new(SystemClock));
    for new in file.strategies {
        registry.create(new)?;
    }

    let config = file.engine.simulation_config();
    let outputs: Vec<SimulationOutput> = registry
        .list(&StrategyFilter::default())
        .into_iter()
        .filter(|s| only.map_or(true, |wanted| s.name == wanted || s.id.as_str() == wanted))
        .map(|s| SimulationOutput {
            strategy_id: s.id.clone(),
            name: s.name.clone(),
            report: simulate(&s, &snapshot, &config),
        })
        .collect();

    if outputs.is_empty() {
        warn!(filter = ?only, "No strategies matched");
    }
    for output in &outputs {
        if let Some(reason) = &output.report.reason {
            warn!(strategy_id = %output.strategy_id, %reason, "Simulation could not project");
        }
    }

    println!("{}", serde_json::to_string_pretty(&outputs)?);
    Ok(())
}
