//! Action definitions.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    Email,
    Push,
    Webhook,
    InApp,
}

/// What a rule does when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    /// Spend `amount` of `currency` on `asset`
    Buy {
        asset: String,
        amount: Decimal,
        currency: String,
    },
    /// Sell `amount` worth of `asset` into `currency`
    Sell {
        asset: String,
        amount: Decimal,
        currency: String,
    },
    Swap {
        from_asset: String,
        to_asset: String,
        amount: Decimal,
    },
    Alert {
        message: String,
        channels: Vec<AlertChannel>,
    },
    /// Target weights in percent, keyed by asset
    Rebalance {
        target_allocation: BTreeMap<String, Decimal>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Buy,
    Sell,
    Swap,
    Alert,
    Rebalance,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Swap => "swap",
            Self::Alert => "alert",
            Self::Rebalance => "rebalance",
        }
    }
}

impl ActionSpec {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Buy { .. } => ActionKind::Buy,
            Self::Sell { .. } => ActionKind::Sell,
            Self::Swap { .. } => ActionKind::Swap,
            Self::Alert { .. } => ActionKind::Alert,
            Self::Rebalance { .. } => ActionKind::Rebalance,
        }
    }

    /// Asset whose price the action is valued against, if any.
    pub fn priced_asset(&self) -> Option<&str> {
        match self {
            Self::Buy { asset, .. } | Self::Sell { asset, .. } => Some(asset),
            Self::Swap { from_asset, .. } => Some(from_asset),
            Self::Alert { .. } | Self::Rebalance { .. } => None,
        }
    }

    /// Reject malformed parameters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Buy {
                asset,
                amount,
                currency,
            }
            | Self::Sell {
                asset,
                amount,
                currency,
            } => {
                require_symbol(asset, "asset")?;
                require_symbol(currency, "currency")?;
                require_positive(*amount)?;
            }
            Self::Swap {
                from_asset,
                to_asset,
                amount,
            } => {
                require_symbol(from_asset, "from_asset")?;
                require_symbol(to_asset, "to_asset")?;
                if from_asset.eq_ignore_ascii_case(to_asset) {
                    return Err(ValidationError::InvalidAction(format!(
                        "swap from {} to itself",
                        from_asset
                    )));
                }
                require_positive(*amount)?;
            }
            Self::Alert { message, channels } => {
                if message.trim().is_empty() {
                    return Err(ValidationError::InvalidAction("alert message is empty".into()));
                }
                if channels.is_empty() {
                    return Err(ValidationError::InvalidAction(
                        "alert needs at least one channel".into(),
                    ));
                }
            }
            Self::Rebalance { target_allocation } => validate_allocation(target_allocation)?,
        }
        Ok(())
    }
}

/// Percentages must each be in (0, 100] and sum to exactly 100.
pub fn validate_allocation(allocation: &BTreeMap<String, Decimal>) -> Result<(), ValidationError> {
    if allocation.is_empty() {
        return Err(ValidationError::AllocationSum(Decimal::ZERO));
    }
    for (asset, pct) in allocation {
        require_symbol(asset, "allocation asset")?;
        if *pct <= Decimal::ZERO || *pct > Decimal::ONE_HUNDRED {
            return Err(ValidationError::InvalidAction(format!(
                "allocation for {} must be in (0, 100], got {}",
                asset, pct
            )));
        }
    }
    let sum: Decimal = allocation.values().copied().sum();
    if sum != Decimal::ONE_HUNDRED {
        return Err(ValidationError::AllocationSum(sum));
    }
    Ok(())
}

fn require_symbol(symbol: &str, field: &str) -> Result<(), ValidationError> {
    if symbol.trim().is_empty() {
        return Err(ValidationError::InvalidAction(format!("{} is empty", field)));
    }
    Ok(())
}

fn require_positive(amount: Decimal) -> Result<(), ValidationError> {
    if amount <= Decimal::ZERO {
        return Err(ValidationError::InvalidAction(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}
