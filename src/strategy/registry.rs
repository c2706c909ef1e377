//! Strategy Registry
//!
//! Concurrent CRUD store for automation rules. Each strategy is held as an
//! immutable `Arc<Strategy>`; every mutation builds a new version and swaps
//! it in under the entry lock, so evaluators reading concurrently see either
//! the old or the new version, never a half-applied update.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::model::{validate_definition, NewStrategy, Performance, Strategy, StrategyFilter, StrategyPatch};
use crate::error::RegistryError;
use crate::types::{Clock, StrategyId};

/// What happened to a strategy after a failed execution was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub consecutive_failures: u32,
    /// True when this failure pushed the strategy over the threshold
    pub deactivated: bool,
}

pub struct StrategyRegistry {
    strategies: DashMap<StrategyId, Arc<Strategy>>,
    clock: Arc<dyn Clock>,
}

impl StrategyRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            strategies: DashMap::new(),
            clock,
        }
    }

    pub fn create(&self, new: NewStrategy) -> Result<Arc<Strategy>, RegistryError> {
        validate_definition(
            &new.name,
            &new.trigger,
            &new.action,
            new.reference_allocation.as_ref(),
        )?;

        let now = self.clock.now();
        let strategy = Arc::new(Strategy {
            id: new.id.unwrap_or_else(StrategyId::generate),
            account_id: new.account_id,
            name: new.name,
            description: new.description,
            is_active: new.is_active,
            trigger: new.trigger,
            action: new.action,
            reference_allocation: new.reference_allocation,
            created_at: now,
            updated_at: now,
            last_triggered: None,
            execution_count: 0,
            consecutive_failures: 0,
            needs_review: false,
            performance: None,
        });

        match self.strategies.entry(strategy.id.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::AlreadyExists(strategy.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(strategy.clone());
            }
        }

        info!(
            strategy_id = %strategy.id,
            account_id = %strategy.account_id,
            trigger = strategy.trigger.kind().as_str(),
            action = strategy.action.kind().as_str(),
            "Strategy created"
        );
        Ok(strategy)
    }

    /// Apply a patch. The merged definition is validated before it replaces
    /// the stored version.
    pub fn update(&self, id: &StrategyId, patch: StrategyPatch) -> Result<Arc<Strategy>, RegistryError> {
        let now = self.clock.now();
        self.modify(id, |current| {
            let mut next = current.clone();
            if let Some(name) = patch.name {
                next.name = name;
            }
            if let Some(description) = patch.description {
                next.description = description;
            }
            if let Some(trigger) = patch.trigger {
                next.trigger = trigger;
            }
            if let Some(action) = patch.action {
                next.action = action;
            }
            if let Some(reference) = patch.reference_allocation {
                next.reference_allocation = reference;
            }
            validate_definition(
                &next.name,
                &next.trigger,
                &next.action,
                next.reference_allocation.as_ref(),
            )?;
            next.updated_at = now;
            Ok(next)
        })
    }

    pub fn delete(&self, id: &StrategyId) -> Result<Arc<Strategy>, RegistryError> {
        let (_, removed) = self
            .strategies
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        info!(strategy_id = %id, "Strategy deleted");
        Ok(removed)
    }

    /// Toggle evaluation. Does not touch executions already in flight.
    pub fn set_active(&self, id: &StrategyId, active: bool) -> Result<Arc<Strategy>, RegistryError> {
        let now = self.clock.now();
        let updated = self.modify(id, |current| {
            let mut next = current.clone();
            next.is_active = active;
            next.updated_at = now;
            Ok(next)
        })?;
        info!(strategy_id = %id, active, "Strategy activation changed");
        Ok(updated)
    }

    pub fn get(&self, id: &StrategyId) -> Option<Arc<Strategy>> {
        self.strategies.get(id).map(|s| s.clone())
    }

    /// Matching strategies ordered by creation time, then id.
    pub fn list(&self, filter: &StrategyFilter) -> Vec<Arc<Strategy>> {
        let mut found: Vec<Arc<Strategy>> = self
            .strategies
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        found
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Book a successful execution.
    pub fn record_success(
        &self,
        id: &StrategyId,
        fired_at: DateTime<Utc>,
        performance: Performance,
    ) -> Result<Arc<Strategy>, RegistryError> {
        let now = self.clock.now();
        self.modify(id, |current| {
            let mut next = current.clone();
            next.last_triggered = Some(fired_at);
            next.execution_count += 1;
            next.consecutive_failures = 0;
            next.performance = Some(performance);
            next.updated_at = now;
            Ok(next)
        })
    }

    /// Book a failed execution; deactivate and flag for review once
    /// consecutive failures exceed `threshold`.
    pub fn record_failure(
        &self,
        id: &StrategyId,
        performance: Option<Performance>,
        threshold: u32,
    ) -> Result<FailureOutcome, RegistryError> {
        let now = self.clock.now();
        let mut outcome = FailureOutcome {
            consecutive_failures: 0,
            deactivated: false,
        };
        self.modify(id, |current| {
            let mut next = current.clone();
            next.consecutive_failures += 1;
            if performance.is_some() {
                next.performance = performance;
            }
            if next.consecutive_failures > threshold && next.is_active {
                next.is_active = false;
                next.needs_review = true;
                outcome.deactivated = true;
            }
            next.updated_at = now;
            outcome.consecutive_failures = next.consecutive_failures;
            Ok(next)
        })?;

        if outcome.deactivated {
            warn!(
                strategy_id = %id,
                consecutive_failures = outcome.consecutive_failures,
                threshold,
                "Strategy deactivated after repeated failures, needs review"
            );
        }
        Ok(outcome)
    }

    /// Clear the review flag and the failure streak. Activation is left to the caller.
    pub fn clear_review(&self, id: &StrategyId) -> Result<Arc<Strategy>, RegistryError> {
        let now = self.clock.now();
        self.modify(id, |current| {
            let mut next = current.clone();
            next.needs_review = false;
            next.consecutive_failures = 0;
            next.updated_at = now;
            Ok(next)
        })
    }

    fn modify<F>(&self, id: &StrategyId, f: F) -> Result<Arc<Strategy>, RegistryError>
    where
        F: FnOnce(&Strategy) -> Result<Strategy, RegistryError>,
    {
        let mut entry = self
            .strategies
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let next = Arc::new(f(entry.value())?);
        *entry.value_mut() = next.clone();
        Ok(next)
    }
}
