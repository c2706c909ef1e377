//! Strategy records and their mutation inputs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::action::{validate_allocation, ActionSpec};
use super::trigger::{TriggerKind, TriggerSpec};
use crate::error::ValidationError;
use crate::types::{AccountId, StrategyId};

/// Rolling performance figures derived from the execution ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Performance {
    /// Summed result delta of successful executions, in quote currency
    pub profit_loss: Decimal,
    /// Successes over terminal outcomes, in percent
    pub success_rate: Decimal,
}

/// An automation rule: one trigger, one action, owned by one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: StrategyId,
    pub account_id: AccountId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub is_active: bool,
    pub trigger: TriggerSpec,
    pub action: ActionSpec,
    /// Target weights for drift triggers that don't rebalance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_allocation: Option<BTreeMap<String, Decimal>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_triggered: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub consecutive_failures: u32,
    pub needs_review: bool,
    pub performance: Option<Performance>,
}

impl Strategy {
    /// Allocation a drift trigger measures against.
    pub fn drift_reference(&self) -> Option<&BTreeMap<String, Decimal>> {
        self.reference_allocation
            .as_ref()
            .or(match &self.action {
                ActionSpec::Rebalance { target_allocation } => Some(target_allocation),
                _ => None,
            })
    }
}

/// Input for creating a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStrategy {
    /// Caller-chosen id; generated when absent
    #[serde(default)]
    pub id: Option<StrategyId>,
    pub account_id: AccountId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub trigger: TriggerSpec,
    pub action: ActionSpec,
    #[serde(default)]
    pub reference_allocation: Option<BTreeMap<String, Decimal>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewStrategy {
    pub fn new(
        account_id: AccountId,
        name: impl Into<String>,
        trigger: TriggerSpec,
        action: ActionSpec,
    ) -> Self {
        Self {
            id: None,
            account_id,
            name: name.into(),
            description: String::new(),
            trigger,
            action,
            reference_allocation: None,
            is_active: true,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: StrategyId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_reference_allocation(mut self, allocation: BTreeMap<String, Decimal>) -> Self {
        self.reference_allocation = Some(allocation);
        self
    }

    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Partial update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger: Option<TriggerSpec>,
    pub action: Option<ActionSpec>,
    /// `Some(None)` clears the explicit reference allocation
    pub reference_allocation: Option<Option<BTreeMap<String, Decimal>>>,
}

/// Listing filter; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyFilter {
    pub active: Option<bool>,
    pub account_id: Option<AccountId>,
    pub trigger_kind: Option<TriggerKind>,
}

impl StrategyFilter {
    pub fn active() -> Self {
        Self {
            active: Some(true),
            ..Default::default()
        }
    }

    pub fn matches(&self, strategy: &Strategy) -> bool {
        self.active.map_or(true, |a| strategy.is_active == a)
            && self
                .account_id
                .as_ref()
                .map_or(true, |id| &strategy.account_id == id)
            && self
                .trigger_kind
                .map_or(true, |k| strategy.trigger.kind() == k)
    }
}

/// Field-level and cross-field checks run on create and on every update.
pub fn validate_definition(
    name: &str,
    trigger: &TriggerSpec,
    action: &ActionSpec,
    reference_allocation: Option<&BTreeMap<String, Decimal>>,
) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    trigger.validate()?;
    action.validate()?;
    if let Some(reference) = reference_allocation {
        validate_allocation(reference)?;
    }
    if trigger.kind() == TriggerKind::PortfolioDrift
        && reference_allocation.is_none()
        && !matches!(action, ActionSpec::Rebalance { .. })
    {
        return Err(ValidationError::MissingReferenceAllocation);
    }
    Ok(())
}
