//! Trigger definitions.

use chrono::{NaiveTime, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
}

impl ComparisonOperator {
    pub fn compare(&self, lhs: Decimal, rhs: Decimal) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Lt => lhs < rhs,
            Self::Gte => lhs >= rhs,
            Self::Lte => lhs <= rhs,
            Self::Eq => lhs == rhs,
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Eq => "==",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        };
        f.write_str(s)
    }
}

/// How often a drift trigger re-reads the portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckFrequency {
    Hourly,
    Daily,
    Weekly,
}

impl CheckFrequency {
    pub fn period(&self) -> chrono::Duration {
        match self {
            Self::Hourly => chrono::Duration::hours(1),
            Self::Daily => chrono::Duration::days(1),
            Self::Weekly => chrono::Duration::weeks(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketMetric {
    Volatility,
    PriceChange,
    VolumeChange,
}

impl MarketMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Volatility => "volatility",
            Self::PriceChange => "price_change",
            Self::VolumeChange => "volume_change",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricWindow {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
}

impl MetricWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "24h",
            Self::SevenDays => "7d",
        }
    }
}

/// Snapshot metric key, e.g. `volatility:24h`.
pub fn metric_key(metric: MarketMetric, window: MetricWindow) -> String {
    format!("{}:{}", metric.as_str(), window.as_str())
}

/// Day qualifier of a time-based schedule.
///
/// Strings deserialize as weekdays ("monday", "Mon"), integers as a day of
/// the month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleDay {
    DayOfMonth(u32),
    Weekday(Weekday),
}

/// When a rule should fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    PriceThreshold {
        asset: String,
        operator: ComparisonOperator,
        price: Decimal,
    },
    TimeBased {
        frequency: Frequency,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        day: Option<ScheduleDay>,
        #[serde(with = "clock_time")]
        time: NaiveTime,
    },
    PortfolioDrift {
        threshold_pct: Decimal,
        check_frequency: CheckFrequency,
    },
    MarketEvent {
        metric: MarketMetric,
        threshold: Decimal,
        window: MetricWindow,
    },
}

/// Trigger discriminant, used for filtering and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    PriceThreshold,
    TimeBased,
    PortfolioDrift,
    MarketEvent,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceThreshold => "price_threshold",
            Self::TimeBased => "time_based",
            Self::PortfolioDrift => "portfolio_drift",
            Self::MarketEvent => "market_event",
        }
    }
}

impl TriggerSpec {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::PriceThreshold { .. } => TriggerKind::PriceThreshold,
            Self::TimeBased { .. } => TriggerKind::TimeBased,
            Self::PortfolioDrift { .. } => TriggerKind::PortfolioDrift,
            Self::MarketEvent { .. } => TriggerKind::MarketEvent,
        }
    }

    /// Reject malformed parameters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::PriceThreshold { asset, price, .. } => {
                if asset.trim().is_empty() {
                    return Err(ValidationError::InvalidTrigger(
                        "price threshold needs an asset".into(),
                    ));
                }
                if *price <= Decimal::ZERO {
                    return Err(ValidationError::InvalidTrigger(format!(
                        "price threshold must be positive, got {}",
                        price
                    )));
                }
            }
            Self::TimeBased { frequency, day, .. } => match (frequency, day) {
                (Frequency::Hourly | Frequency::Daily, None) => {}
                (Frequency::Hourly | Frequency::Daily, Some(_)) => {
                    return Err(ValidationError::InvalidTrigger(format!(
                        "{} schedule does not take a day",
                        frequency
                    )));
                }
                (Frequency::Weekly, Some(ScheduleDay::Weekday(_))) => {}
                (Frequency::Weekly, _) => {
                    return Err(ValidationError::InvalidTrigger(
                        "weekly schedule needs a weekday".into(),
                    ));
                }
                (Frequency::Monthly, Some(ScheduleDay::DayOfMonth(d))) if (1..=31).contains(d) => {}
                (Frequency::Monthly, _) => {
                    return Err(ValidationError::InvalidTrigger(
                        "monthly schedule needs a day of month between 1 and 31".into(),
                    ));
                }
            },
            Self::PortfolioDrift { threshold_pct, .. } => {
                if *threshold_pct <= Decimal::ZERO || *threshold_pct > Decimal::ONE_HUNDRED {
                    return Err(ValidationError::InvalidTrigger(format!(
                        "drift threshold must be in (0, 100], got {}",
                        threshold_pct
                    )));
                }
            }
            Self::MarketEvent { .. } => {}
        }
        Ok(())
    }
}

/// `HH:MM` or `HH:MM:SS` wall-clock times.
mod clock_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format("%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M"))
            .map_err(|_| serde::de::Error::custom(format!("invalid time of day '{}'", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_operator_compare() {
        assert!(ComparisonOperator::Gt.compare(dec!(2510), dec!(2500)));
        assert!(!ComparisonOperator::Gt.compare(dec!(2500), dec!(2500)));
        assert!(ComparisonOperator::Gte.compare(dec!(2500), dec!(2500)));
        assert!(ComparisonOperator::Lt.compare(dec!(1), dec!(2)));
        assert!(ComparisonOperator::Eq.compare(dec!(2.50), dec!(2.5)));
    }

    #[test]
    fn test_deserialize_weekly_trigger() {
        let json = r#"{"type":"time_based","frequency":"weekly","day":"monday","time":"09:00"}"#;
        let trigger: TriggerSpec = serde_json::from_str(json).unwrap();
        assert_eq!(
            trigger,
            TriggerSpec::TimeBased {
                frequency: Frequency::Weekly,
                day: Some(ScheduleDay::Weekday(Weekday::Mon)),
                time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            }
        );
        assert!(trigger.validate().is_ok());
    }

    #[test]
    fn test_deserialize_price_trigger() {
        let json = r#"{"type":"price_threshold","asset":"ETH","operator":">","price":"2500"}"#;
        let trigger: TriggerSpec = serde_json::from_str(json).unwrap();
        assert_eq!(trigger.kind(), TriggerKind::PriceThreshold);
        assert!(trigger.validate().is_ok());
    }

    #[test]
    fn test_schedule_day_validation() {
        let at_nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let weekly_without_day = TriggerSpec::TimeBased {
            frequency: Frequency::Weekly,
            day: None,
            time: at_nine,
        };
        assert!(weekly_without_day.validate().is_err());

        let monthly_32 = TriggerSpec::TimeBased {
            frequency: Frequency::Monthly,
            day: Some(ScheduleDay::DayOfMonth(32)),
            time: at_nine,
        };
        assert!(monthly_32.validate().is_err());

        let daily_with_day = TriggerSpec::TimeBased {
            frequency: Frequency::Daily,
            day: Some(ScheduleDay::DayOfMonth(3)),
            time: at_nine,
        };
        assert!(daily_with_day.validate().is_err());
    }

    #[test]
    fn test_price_and_drift_bounds() {
        let zero_price = TriggerSpec::PriceThreshold {
            asset: "ETH".into(),
            operator: ComparisonOperator::Gt,
            price: Decimal::ZERO,
        };
        assert!(zero_price.validate().is_err());

        let drift = TriggerSpec::PortfolioDrift {
            threshold_pct: dec!(150),
            check_frequency: CheckFrequency::Daily,
        };
        assert!(drift.validate().is_err());
    }

    #[test]
    fn test_metric_key() {
        assert_eq!(
            metric_key(MarketMetric::Volatility, MetricWindow::OneDay),
            "volatility:24h"
        );
    }
}
