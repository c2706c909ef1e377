//! Dry-run projection of a strategy against one snapshot.
//!
//! `simulate` runs the real trigger logic on a throwaway evaluator and prices
//! the action with a flat cost model. It touches no ledger, registry or
//! execution layer, and reads no clock: the snapshot timestamp is "now".

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;
use crate::evaluation::{max_drift, MarketSnapshot, TriggerEvaluator};
use crate::strategy::model::validate_definition;
use crate::strategy::trigger::metric_key;
use crate::strategy::{ActionSpec, CheckFrequency, Frequency, MarketMetric, MetricWindow, Strategy, TriggerSpec};

const DAYS_PER_MONTH: Decimal = dec!(30);

/// Cost model and heuristics for projections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Venue fee charged on traded notional, in basis points
    pub fee_bps: Decimal,
    /// Flat network fee per on-chain transaction, in quote currency
    pub network_fee: Decimal,
    /// Daily volatility assumed when the snapshot carries none, in percent
    pub default_daily_volatility_pct: Decimal,
    /// Same meaning as the engine's time-based fire window
    pub time_window_secs: i64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fee_bps: dec!(30),
            network_fee: dec!(2),
            default_daily_volatility_pct: dec!(3),
            time_window_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub would_fire_now: bool,
    pub expected_fires_per_month: Decimal,
    /// Fees over a month at the expected fire rate
    pub estimated_cost: Decimal,
    pub benefit: String,
}

impl Projection {
    fn empty() -> Self {
        Self {
            would_fire_now: false,
            expected_fires_per_month: Decimal::ZERO,
            estimated_cost: Decimal::ZERO,
            benefit: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub success: bool,
    pub projected: Projection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SimulationReport {
    fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            projected: Projection::empty(),
            reason: Some(reason.into()),
        }
    }
}

/// Project what `strategy` would do given `snapshot`.
pub fn simulate(
    strategy: &Strategy,
    snapshot: &MarketSnapshot,
    config: &SimulationConfig,
) -> SimulationReport {
    if let Err(e) = validate_definition(
        &strategy.name,
        &strategy.trigger,
        &strategy.action,
        strategy.reference_allocation.as_ref(),
    ) {
        return SimulationReport::failed(e.to_string());
    }

    let evaluator = TriggerEvaluator::new(Duration::seconds(config.time_window_secs));
    evaluator.begin_cycle();
    let would_fire_now = match evaluator.evaluate(strategy, snapshot, snapshot.timestamp) {
        Ok(evaluation) => evaluation.fired().is_some(),
        Err(e) => return SimulationReport::failed(e.to_string()),
    };

    let fires = match expected_fires_per_month(strategy, snapshot, config) {
        Ok(fires) => fires.round_dp(2),
        Err(e) => return SimulationReport::failed(e.to_string()),
    };
    let cost = (fires * cost_per_execution(&strategy.action, snapshot, config)).round_dp(2);

    SimulationReport {
        success: true,
        projected: Projection {
            would_fire_now,
            expected_fires_per_month: fires,
            estimated_cost: cost,
            benefit: benefit(strategy, fires),
        },
        reason: None,
    }
}

fn expected_fires_per_month(
    strategy: &Strategy,
    snapshot: &MarketSnapshot,
    config: &SimulationConfig,
) -> Result<Decimal, EvaluationError> {
    match &strategy.trigger {
        TriggerSpec::TimeBased { frequency, .. } => Ok(match frequency {
            Frequency::Hourly => dec!(720),
            Frequency::Daily => DAYS_PER_MONTH,
            Frequency::Weekly => dec!(52) / dec!(12),
            Frequency::Monthly => Decimal::ONE,
        }),
        TriggerSpec::PriceThreshold { asset, price, .. } => {
            let current = snapshot.price(asset)?;
            if current <= Decimal::ZERO {
                return Err(EvaluationError::InvalidSnapshot(format!(
                    "non-positive price for {}",
                    asset
                )));
            }
            let distance_pct = ((current - *price).abs() / current) * Decimal::ONE_HUNDRED;
            let volatility = daily_volatility(snapshot, config);
            Ok(DAYS_PER_MONTH * reach(volatility, distance_pct))
        }
        TriggerSpec::MarketEvent {
            metric,
            threshold,
            window,
        } => {
            let value = snapshot.metric(&metric_key(*metric, *window))?;
            if *threshold <= Decimal::ZERO {
                return Ok(DAYS_PER_MONTH);
            }
            Ok(DAYS_PER_MONTH * (value / *threshold).clamp(Decimal::ZERO, Decimal::ONE))
        }
        TriggerSpec::PortfolioDrift {
            threshold_pct,
            check_frequency,
        } => {
            let checks = match check_frequency {
                CheckFrequency::Hourly => dec!(720),
                CheckFrequency::Daily => DAYS_PER_MONTH,
                CheckFrequency::Weekly => dec!(52) / dec!(12),
            };
            let current = snapshot.current_allocation()?;
            let drift = strategy
                .drift_reference()
                .map(|reference| max_drift(current, reference).1)
                .unwrap_or(Decimal::ZERO);
            let ratio = (drift / *threshold_pct).clamp(Decimal::ZERO, Decimal::ONE);
            Ok(checks.min(DAYS_PER_MONTH) * ratio)
        }
    }
}

/// Share of days on which a move of `distance_pct` is within a day's range.
fn reach(volatility_pct: Decimal, distance_pct: Decimal) -> Decimal {
    if distance_pct <= volatility_pct {
        Decimal::ONE
    } else {
        volatility_pct / distance_pct
    }
}

fn daily_volatility(snapshot: &MarketSnapshot, config: &SimulationConfig) -> Decimal {
    snapshot
        .metric(&metric_key(MarketMetric::Volatility, MetricWindow::OneDay))
        .ok()
        .filter(|v| *v > Decimal::ZERO)
        .unwrap_or(config.default_daily_volatility_pct)
}

fn cost_per_execution(action: &ActionSpec, snapshot: &MarketSnapshot, config: &SimulationConfig) -> Decimal {
    let fee_rate = config.fee_bps / dec!(10000);
    match action {
        ActionSpec::Buy { amount, .. } | ActionSpec::Sell { amount, .. } => {
            *amount * fee_rate + config.network_fee
        }
        ActionSpec::Swap {
            from_asset, amount, ..
        } => {
            let notional = snapshot
                .price(from_asset)
                .map(|p| *amount * p)
                .unwrap_or(*amount);
            notional * fee_rate + config.network_fee
        }
        // One transaction per leg
        ActionSpec::Rebalance { target_allocation } => {
            config.network_fee * Decimal::from(target_allocation.len())
        }
        ActionSpec::Alert { .. } => Decimal::ZERO,
    }
}

fn benefit(strategy: &Strategy, fires: Decimal) -> String {
    let cadence = if fires.is_zero() {
        "unlikely to fire this month".to_string()
    } else {
        format!("about {} time(s) per month", fires.normalize())
    };
    match (&strategy.trigger, &strategy.action) {
        (TriggerSpec::TimeBased { .. }, ActionSpec::Buy { asset, amount, currency }) => format!(
            "Dollar-cost averages {} {} into {} {}, smoothing entry price",
            amount, currency, asset, cadence
        ),
        (_, ActionSpec::Buy { asset, .. }) => {
            format!("Buys {} on your conditions, {}", asset, cadence)
        }
        (_, ActionSpec::Sell { asset, .. }) => {
            format!("Locks in {} positions without watching the market, {}", asset, cadence)
        }
        (_, ActionSpec::Swap { from_asset, to_asset, .. }) => format!(
            "Moves exposure from {} to {} automatically, {}",
            from_asset, to_asset, cadence
        ),
        (_, ActionSpec::Rebalance { .. }) => {
            format!("Keeps the portfolio on its target allocation, {}", cadence)
        }
        (_, ActionSpec::Alert { .. }) => format!("Notifies you when it matters, {}", cadence),
    }
}
