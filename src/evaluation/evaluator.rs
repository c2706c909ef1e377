//! Trigger Evaluator
//!
//! Decides, per strategy and per snapshot, whether a trigger fires.
//!
//! Each strategy carries a small state machine:
//!
//! ```text
//! Idle -> Evaluating -> Fired -> Cooldown -> (next cycle) -> Idle
//!                   \-> Idle
//! ```
//!
//! Price, drift and market-event triggers are edge-triggered: they fire when
//! the condition goes from false to true and stay quiet while it holds.
//! Time-based triggers fire once per scheduled occurrence.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::schedule::due_occurrence;
use super::snapshot::MarketSnapshot;
use crate::error::EvaluationError;
use crate::logging::LogThrottle;
use crate::strategy::trigger::metric_key;
use crate::strategy::{Strategy, TriggerSpec};
use crate::types::{FireKey, StrategyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPhase {
    Idle,
    Evaluating,
    Fired,
    Cooldown,
}

#[derive(Debug, Clone)]
struct TriggerState {
    phase: TriggerPhase,
    /// Condition value at the previous observation (edge detection)
    condition_was_true: bool,
    /// Occurrence start of the last time-based fire
    last_fired_occurrence: Option<DateTime<Utc>>,
    last_drift_check: Option<DateTime<Utc>>,
    fired_cycle: Option<u64>,
}

impl Default for TriggerState {
    fn default() -> Self {
        Self {
            phase: TriggerPhase::Idle,
            condition_was_true: false,
            last_fired_occurrence: None,
            last_drift_check: None,
            fired_cycle: None,
        }
    }
}

/// A trigger that fired.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fire {
    pub key: FireKey,
    pub cycle: u64,
    /// Snapshot price of the action's asset, when it has one
    pub reference_price: Option<Decimal>,
    /// Human-readable reason, copied into ledger records
    pub detail: String,
}

impl Fire {
    pub fn strategy_id(&self) -> &StrategyId {
        &self.key.strategy_id
    }

    pub fn fired_at(&self) -> DateTime<Utc> {
        self.key.fired_at
    }
}

/// Result of evaluating one strategy against one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Evaluation {
    Fired(Fire),
    Idle { reason: String },
}

impl Evaluation {
    pub fn fired(&self) -> Option<&Fire> {
        match self {
            Self::Fired(fire) => Some(fire),
            Self::Idle { .. } => None,
        }
    }

    fn idle(reason: impl Into<String>) -> Self {
        Self::Idle {
            reason: reason.into(),
        }
    }
}

pub struct TriggerEvaluator {
    states: DashMap<StrategyId, TriggerState>,
    cycle: AtomicU64,
    time_window: Duration,
    throttle: LogThrottle,
}

impl TriggerEvaluator {
    pub fn new(time_window: Duration) -> Self {
        Self {
            states: DashMap::new(),
            cycle: AtomicU64::new(0),
            time_window,
            throttle: LogThrottle::default(),
        }
    }

    /// Open a new evaluation cycle. Strategies that fired in an earlier
    /// cycle leave cooldown on their next evaluation.
    pub fn begin_cycle(&self) -> u64 {
        self.cycle.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_cycle(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    pub fn phase(&self, id: &StrategyId) -> TriggerPhase {
        let cycle = self.current_cycle();
        self.states
            .get(id)
            .map(|s| match (s.phase, s.fired_cycle) {
                (TriggerPhase::Fired | TriggerPhase::Cooldown, Some(c)) if c < cycle => {
                    TriggerPhase::Idle
                }
                (phase, _) => phase,
            })
            .unwrap_or(TriggerPhase::Idle)
    }

    /// Drop all state for a strategy (deleted or redefined).
    pub fn forget(&self, id: &StrategyId) {
        self.states.remove(id);
        self.throttle.clear(id.as_str());
    }

    /// Evaluate one strategy. Missing data is an error and leaves the
    /// strategy's edge state untouched.
    pub fn evaluate(
        &self,
        strategy: &Strategy,
        snapshot: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, EvaluationError> {
        let cycle = self.current_cycle();
        let mut state = self.states.entry(strategy.id.clone()).or_default();

        if let Some(fired_cycle) = state.fired_cycle {
            if fired_cycle >= cycle {
                state.phase = TriggerPhase::Cooldown;
                return Ok(Evaluation::idle("cooling down until next cycle"));
            }
        }
        state.phase = TriggerPhase::Evaluating;

        let outcome = self.check_trigger(strategy, &mut state, snapshot, now);

        match outcome {
            Ok(Some((fired_at, detail))) => {
                state.phase = TriggerPhase::Fired;
                state.fired_cycle = Some(cycle);
                let reference_price = strategy
                    .action
                    .priced_asset()
                    .and_then(|asset| snapshot.price(asset).ok());
                debug!(strategy_id = %strategy.id, cycle, %detail, "Trigger fired");
                Ok(Evaluation::Fired(Fire {
                    key: FireKey::new(strategy.id.clone(), fired_at),
                    cycle,
                    reference_price,
                    detail,
                }))
            }
            Ok(None) => {
                state.phase = TriggerPhase::Idle;
                Ok(Evaluation::idle("condition not met"))
            }
            Err(e) => {
                state.phase = TriggerPhase::Idle;
                drop(state);
                let key = format!("{}:{}", strategy.id, e);
                if let Some(suppressed) = self.throttle.check(&key) {
                    warn!(
                        strategy_id = %strategy.id,
                        error = %e,
                        suppressed,
                        "Skipping evaluation"
                    );
                }
                Err(e)
            }
        }
    }

    /// Returns `Some((fired_at, detail))` when the trigger fires.
    fn check_trigger(
        &self,
        strategy: &Strategy,
        state: &mut TriggerState,
        snapshot: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Option<(DateTime<Utc>, String)>, EvaluationError> {
        match &strategy.trigger {
            TriggerSpec::PriceThreshold {
                asset,
                operator,
                price,
            } => {
                let current = snapshot.price(asset)?;
                let condition = operator.compare(current, *price);
                Ok(edge(state, condition).then(|| {
                    (
                        snapshot.timestamp,
                        format!("{} {} {} {}", asset, current, operator, price),
                    )
                }))
            }
            TriggerSpec::TimeBased {
                frequency,
                day,
                time,
            } => {
                let Some(occurrence) = due_occurrence(*frequency, *day, *time, now, self.time_window)
                else {
                    return Ok(None);
                };
                if state.last_fired_occurrence == Some(occurrence) {
                    return Ok(None);
                }
                state.last_fired_occurrence = Some(occurrence);
                Ok(Some((
                    occurrence,
                    format!("{} schedule occurrence {}", frequency, occurrence.to_rfc3339()),
                )))
            }
            TriggerSpec::PortfolioDrift {
                threshold_pct,
                check_frequency,
            } => {
                if let Some(last) = state.last_drift_check {
                    if now - last < check_frequency.period() {
                        return Ok(None);
                    }
                }
                let current = snapshot.current_allocation()?;
                let Some(reference) = strategy.drift_reference() else {
                    return Ok(None);
                };
                state.last_drift_check = Some(now);

                let (worst_asset, worst_drift) = max_drift(current, reference);

                let condition = worst_drift > *threshold_pct;
                Ok(edge(state, condition).then(|| {
                    (
                        snapshot.timestamp,
                        format!(
                            "{} drifted {} points (threshold {})",
                            worst_asset, worst_drift, threshold_pct
                        ),
                    )
                }))
            }
            TriggerSpec::MarketEvent {
                metric,
                threshold,
                window,
            } => {
                let key = metric_key(*metric, *window);
                let value = snapshot.metric(&key)?;
                let condition = value > *threshold;
                Ok(edge(state, condition).then(|| {
                    (
                        snapshot.timestamp,
                        format!("{} {} exceeds {}", key, value, threshold),
                    )
                }))
            }
        }
    }
}

/// Largest absolute weight difference over the union of assets, in
/// percentage points. Assets missing on one side count as zero.
pub fn max_drift<'a>(
    current: &'a BTreeMap<String, Decimal>,
    reference: &'a BTreeMap<String, Decimal>,
) -> (&'a str, Decimal) {
    let assets: BTreeSet<&String> = current.keys().chain(reference.keys()).collect();
    assets
        .into_iter()
        .map(|asset| {
            let have = current.get(asset).copied().unwrap_or(Decimal::ZERO);
            let want = reference.get(asset).copied().unwrap_or(Decimal::ZERO);
            (asset.as_str(), (have - want).abs())
        })
        .fold(("", Decimal::ZERO), |acc, item| if item.1 > acc.1 { item } else { acc })
}

/// Record `condition` and report a false -> true transition.
fn edge(state: &mut TriggerState, condition: bool) -> bool {
    let rising = condition && !state.condition_was_true;
    state.condition_was_true = condition;
    rising
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{
        ActionSpec, CheckFrequency, ComparisonOperator, Frequency, MarketMetric, MetricWindow,
        ScheduleDay,
    };
    use crate::types::AccountId;
    use chrono::{NaiveTime, TimeZone, Weekday};
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
    }

    fn strategy(trigger: TriggerSpec, action: ActionSpec) -> Strategy {
        Strategy {
            id: StrategyId::new("s-1"),
            account_id: AccountId::new("a-1"),
            name: "test".into(),
            description: String::new(),
            is_active: true,
            trigger,
            action,
            reference_allocation: None,
            created_at: t0(),
            updated_at: t0(),
            last_triggered: None,
            execution_count: 0,
            consecutive_failures: 0,
            needs_review: false,
            performance: None,
        }
    }

    fn buy_eth() -> ActionSpec {
        ActionSpec::Buy {
            asset: "ETH".into(),
            amount: dec!(50),
            currency: "USD".into(),
        }
    }

    fn eth_at(price: Decimal, at: DateTime<Utc>) -> MarketSnapshot {
        MarketSnapshot::new(at).with_price("ETH", price)
    }

    #[test]
    fn test_price_threshold_fires_once_on_crossing() {
        let evaluator = TriggerEvaluator::new(Duration::hours(1));
        let s = strategy(
            TriggerSpec::PriceThreshold {
                asset: "ETH".into(),
                operator: ComparisonOperator::Gt,
                price: dec!(2500),
            },
            buy_eth(),
        );

        let mut fires = 0;
        for (i, price) in [dec!(2490), dec!(2510), dec!(2510)].into_iter().enumerate() {
            evaluator.begin_cycle();
            let at = t0() + Duration::minutes(i as i64);
            if let Evaluation::Fired(fire) = evaluator.evaluate(&s, &eth_at(price, at), at).unwrap() {
                fires += 1;
                assert_eq!(fire.reference_price, Some(dec!(2510)));
                assert_eq!(fire.fired_at(), at);
            }
        }
        assert_eq!(fires, 1);
    }

    #[test]
    fn test_first_observation_true_fires() {
        let evaluator = TriggerEvaluator::new(Duration::hours(1));
        let s = strategy(
            TriggerSpec::PriceThreshold {
                asset: "ETH".into(),
                operator: ComparisonOperator::Gt,
                price: dec!(2500),
            },
            buy_eth(),
        );
        evaluator.begin_cycle();
        let result = evaluator.evaluate(&s, &eth_at(dec!(2600), t0()), t0()).unwrap();
        assert!(result.fired().is_some());
    }

    #[test]
    fn test_one_fire_per_cycle() {
        let evaluator = TriggerEvaluator::new(Duration::hours(1));
        let s = strategy(
            TriggerSpec::PriceThreshold {
                asset: "ETH".into(),
                operator: ComparisonOperator::Lt,
                price: dec!(2000),
            },
            buy_eth(),
        );
        evaluator.begin_cycle();
        assert!(evaluator
            .evaluate(&s, &eth_at(dec!(1900), t0()), t0())
            .unwrap()
            .fired()
            .is_some());
        assert_eq!(evaluator.phase(&s.id), TriggerPhase::Fired);

        // Condition goes false then true again within the same cycle
        evaluator.evaluate(&s, &eth_at(dec!(2100), t0()), t0()).unwrap();
        assert_eq!(evaluator.phase(&s.id), TriggerPhase::Cooldown);

        evaluator.begin_cycle();
        assert_eq!(evaluator.phase(&s.id), TriggerPhase::Idle);
    }

    #[test]
    fn test_missing_price_is_error_and_keeps_state() {
        let evaluator = TriggerEvaluator::new(Duration::hours(1));
        let s = strategy(
            TriggerSpec::PriceThreshold {
                asset: "ETH".into(),
                operator: ComparisonOperator::Gt,
                price: dec!(2500),
            },
            buy_eth(),
        );
        evaluator.begin_cycle();
        evaluator.evaluate(&s, &eth_at(dec!(2600), t0()), t0()).unwrap();

        evaluator.begin_cycle();
        let empty = MarketSnapshot::new(t0());
        assert_eq!(
            evaluator.evaluate(&s, &empty, t0()),
            Err(EvaluationError::MissingPrice("ETH".into()))
        );

        // Still above: no new edge
        evaluator.begin_cycle();
        let result = evaluator.evaluate(&s, &eth_at(dec!(2600), t0()), t0()).unwrap();
        assert!(result.fired().is_none());
    }

    #[test]
    fn test_weekly_schedule_fires_once_per_occurrence() {
        let evaluator = TriggerEvaluator::new(Duration::hours(1));
        let s = strategy(
            TriggerSpec::TimeBased {
                frequency: Frequency::Weekly,
                day: Some(ScheduleDay::Weekday(Weekday::Mon)),
                time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            },
            buy_eth(),
        );
        let snap = eth_at(dec!(2500), t0());

        evaluator.begin_cycle();
        let first = evaluator
            .evaluate(&s, &snap, t0() + Duration::minutes(5))
            .unwrap();
        assert_eq!(first.fired().map(|f| f.fired_at()), Some(t0()));

        evaluator.begin_cycle();
        let second = evaluator
            .evaluate(&s, &snap, t0() + Duration::minutes(30))
            .unwrap();
        assert!(second.fired().is_none());

        // Next Monday's occurrence fires again
        evaluator.begin_cycle();
        let next_week = t0() + Duration::weeks(1) + Duration::minutes(1);
        assert!(evaluator
            .evaluate(&s, &snap, next_week)
            .unwrap()
            .fired()
            .is_some());
    }

    #[test]
    fn test_drift_uses_rebalance_target_and_frequency() {
        let evaluator = TriggerEvaluator::new(Duration::hours(1));
        let target = BTreeMap::from([("ETH".to_string(), dec!(60)), ("USDC".to_string(), dec!(40))]);
        let s = strategy(
            TriggerSpec::PortfolioDrift {
                threshold_pct: dec!(5),
                check_frequency: CheckFrequency::Daily,
            },
            ActionSpec::Rebalance {
                target_allocation: target,
            },
        );

        let balanced = MarketSnapshot::new(t0())
            .with_allocation("ETH", dec!(62))
            .with_allocation("USDC", dec!(38));
        evaluator.begin_cycle();
        assert!(evaluator.evaluate(&s, &balanced, t0()).unwrap().fired().is_none());

        // Drifted, but the daily check isn't due yet
        let drifted = MarketSnapshot::new(t0())
            .with_allocation("ETH", dec!(70))
            .with_allocation("USDC", dec!(30));
        evaluator.begin_cycle();
        let later = t0() + Duration::hours(2);
        assert!(evaluator.evaluate(&s, &drifted, later).unwrap().fired().is_none());

        evaluator.begin_cycle();
        let next_day = t0() + Duration::days(1);
        let fired = evaluator.evaluate(&s, &drifted, next_day).unwrap();
        assert!(fired.fired().is_some());
    }

    #[test]
    fn test_drift_counts_assets_missing_from_portfolio() {
        let evaluator = TriggerEvaluator::new(Duration::hours(1));
        let mut s = strategy(
            TriggerSpec::PortfolioDrift {
                threshold_pct: dec!(5),
                check_frequency: CheckFrequency::Hourly,
            },
            buy_eth(),
        );
        s.reference_allocation = Some(BTreeMap::from([
            ("ETH".to_string(), dec!(50)),
            ("BTC".to_string(), dec!(50)),
        ]));
        // BTC is entirely absent from the current allocation
        let snap = MarketSnapshot::new(t0()).with_allocation("ETH", dec!(100));
        evaluator.begin_cycle();
        assert!(evaluator.evaluate(&s, &snap, t0()).unwrap().fired().is_some());
    }

    #[test]
    fn test_market_event() {
        let evaluator = TriggerEvaluator::new(Duration::hours(1));
        let s = strategy(
            TriggerSpec::MarketEvent {
                metric: MarketMetric::Volatility,
                threshold: dec!(80),
                window: MetricWindow::OneDay,
            },
            buy_eth(),
        );
        evaluator.begin_cycle();
        let calm = MarketSnapshot::new(t0()).with_metric("volatility:24h", dec!(40));
        assert!(evaluator.evaluate(&s, &calm, t0()).unwrap().fired().is_none());

        evaluator.begin_cycle();
        let wild = MarketSnapshot::new(t0()).with_metric("volatility:24h", dec!(95));
        assert!(evaluator.evaluate(&s, &wild, t0()).unwrap().fired().is_some());

        evaluator.begin_cycle();
        let missing = MarketSnapshot::new(t0());
        assert!(matches!(
            evaluator.evaluate(&s, &missing, t0()),
            Err(EvaluationError::MissingMetric(_))
        ));
    }

    #[test]
    fn test_forget_resets_edge_state() {
        let evaluator = TriggerEvaluator::new(Duration::hours(1));
        let s = strategy(
            TriggerSpec::PriceThreshold {
                asset: "ETH".into(),
                operator: ComparisonOperator::Gt,
                price: dec!(2500),
            },
            buy_eth(),
        );
        evaluator.begin_cycle();
        assert!(evaluator.evaluate(&s, &eth_at(dec!(2600), t0()), t0()).unwrap().fired().is_some());
        evaluator.forget(&s.id);
        evaluator.begin_cycle();
        assert!(evaluator.evaluate(&s, &eth_at(dec!(2600), t0()), t0()).unwrap().fired().is_some());
    }
}
