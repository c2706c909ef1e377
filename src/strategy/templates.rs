//! Preset strategies users can start from.

use chrono::{NaiveTime, Weekday};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::action::{ActionSpec, AlertChannel};
use super::model::NewStrategy;
use super::trigger::{
    CheckFrequency, ComparisonOperator, Frequency, MarketMetric, MetricWindow, ScheduleDay,
    TriggerSpec,
};
use crate::types::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    Beginner,
    Intermediate,
    Advanced,
}

impl fmt::Display for TemplateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: TemplateCategory,
    pub trigger: TriggerSpec,
    pub action: ActionSpec,
}

impl StrategyTemplate {
    /// Pre-fill a strategy for `account_id`. The caller may still tweak it
    /// before handing it to the registry.
    pub fn instantiate(&self, account_id: AccountId) -> NewStrategy {
        NewStrategy::new(account_id, self.name, self.trigger.clone(), self.action.clone())
            .with_description(self.description)
    }
}

fn at(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn sixty_forty() -> BTreeMap<String, rust_decimal::Decimal> {
    BTreeMap::from([("ETH".to_string(), dec!(60)), ("USDC".to_string(), dec!(40))])
}

/// Every shipped template.
pub fn catalogue() -> Vec<StrategyTemplate> {
    vec![
        StrategyTemplate {
            id: "weekly-dca",
            name: "Weekly ETH DCA",
            description: "Buy $50 of ETH every Monday at 09:00 UTC",
            category: TemplateCategory::Beginner,
            trigger: TriggerSpec::TimeBased {
                frequency: Frequency::Weekly,
                day: Some(ScheduleDay::Weekday(Weekday::Mon)),
                time: at(9, 0),
            },
            action: ActionSpec::Buy {
                asset: "ETH".into(),
                amount: dec!(50),
                currency: "USD".into(),
            },
        },
        StrategyTemplate {
            id: "price-alert",
            name: "ETH price alert",
            description: "Notify when ETH trades above $3,000",
            category: TemplateCategory::Beginner,
            trigger: TriggerSpec::PriceThreshold {
                asset: "ETH".into(),
                operator: ComparisonOperator::Gt,
                price: dec!(3000),
            },
            action: ActionSpec::Alert {
                message: "ETH crossed $3,000".into(),
                channels: vec![AlertChannel::Push, AlertChannel::InApp],
            },
        },
        StrategyTemplate {
            id: "buy-the-dip",
            name: "Buy the dip",
            description: "Buy $200 of ETH when it falls below $2,000",
            category: TemplateCategory::Intermediate,
            trigger: TriggerSpec::PriceThreshold {
                asset: "ETH".into(),
                operator: ComparisonOperator::Lt,
                price: dec!(2000),
            },
            action: ActionSpec::Buy {
                asset: "ETH".into(),
                amount: dec!(200),
                currency: "USD".into(),
            },
        },
        StrategyTemplate {
            id: "take-profit",
            name: "Take profit",
            description: "Sell $500 of ETH when it rises above $4,000",
            category: TemplateCategory::Intermediate,
            trigger: TriggerSpec::PriceThreshold {
                asset: "ETH".into(),
                operator: ComparisonOperator::Gt,
                price: dec!(4000),
            },
            action: ActionSpec::Sell {
                asset: "ETH".into(),
                amount: dec!(500),
                currency: "USD".into(),
            },
        },
        StrategyTemplate {
            id: "monthly-rebalance",
            name: "Monthly rebalance",
            description: "Rebalance to 60% ETH / 40% USDC on the 1st of each month",
            category: TemplateCategory::Intermediate,
            trigger: TriggerSpec::TimeBased {
                frequency: Frequency::Monthly,
                day: Some(ScheduleDay::DayOfMonth(1)),
                time: at(0, 0),
            },
            action: ActionSpec::Rebalance {
                target_allocation: sixty_forty(),
            },
        },
        StrategyTemplate {
            id: "drift-rebalance",
            name: "Drift rebalance",
            description: "Rebalance to 60/40 when any asset drifts more than 5 points",
            category: TemplateCategory::Advanced,
            trigger: TriggerSpec::PortfolioDrift {
                threshold_pct: dec!(5),
                check_frequency: CheckFrequency::Daily,
            },
            action: ActionSpec::Rebalance {
                target_allocation: sixty_forty(),
            },
        },
        StrategyTemplate {
            id: "volatility-hedge",
            name: "Volatility hedge",
            description: "Swap 1 ETH into USDC when 24h volatility exceeds 80%",
            category: TemplateCategory::Advanced,
            trigger: TriggerSpec::MarketEvent {
                metric: MarketMetric::Volatility,
                threshold: dec!(80),
                window: MetricWindow::OneDay,
            },
            action: ActionSpec::Swap {
                from_asset: "ETH".into(),
                to_asset: "USDC".into(),
                amount: dec!(1),
            },
        },
    ]
}

pub fn by_category(category: TemplateCategory) -> Vec<StrategyTemplate> {
    catalogue()
        .into_iter()
        .filter(|t| t.category == category)
        .collect()
}

pub fn find(id: &str) -> Option<StrategyTemplate> {
    catalogue().into_iter().find(|t| t.id == id)
}
