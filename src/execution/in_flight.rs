//! Per-strategy in-flight slots.
//!
//! A strategy may have at most one execution running (or parked waiting on
//! a pending submission). Claims release their slot on drop unless parked.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::types::{FireKey, StrategyId};

#[derive(Debug, Default, Clone)]
pub struct InFlightSlots {
    slots: Arc<DashMap<StrategyId, FireKey>>,
}

impl InFlightSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `key.strategy_id`. `None` if it is taken.
    pub fn try_claim(&self, key: &FireKey) -> Option<InFlightClaim> {
        match self.slots.entry(key.strategy_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                vacant.insert(key.clone());
                Some(InFlightClaim {
                    slots: Arc::clone(&self.slots),
                    key: key.clone(),
                    armed: true,
                })
            }
        }
    }

    /// The fire currently holding the strategy's slot.
    pub fn holder(&self, id: &StrategyId) -> Option<FireKey> {
        self.slots.get(id).map(|k| k.clone())
    }

    pub fn is_busy(&self, id: &StrategyId) -> bool {
        self.slots.contains_key(id)
    }

    /// Free a parked slot, only if `key` still holds it.
    pub fn release(&self, key: &FireKey) {
        self.slots.remove_if(&key.strategy_id, |_, holder| holder == key);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// RAII guard over one strategy's slot.
#[derive(Debug)]
pub struct InFlightClaim {
    slots: Arc<DashMap<StrategyId, FireKey>>,
    key: FireKey,
    armed: bool,
}

impl InFlightClaim {
    pub fn key(&self) -> &FireKey {
        &self.key
    }

    /// Keep the slot occupied after this guard is gone (pending submission).
    /// Freed later through [`InFlightSlots::release`].
    pub fn park(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        if self.armed {
            let key = &self.key;
            self.slots.remove_if(&key.strategy_id, |_, holder| holder == key);
        }
    }
}
