//! Delegation chain storage.
//!
//! The authority talks to storage only through [`DelegationStore`], so the
//! in-memory implementation below can be swapped for a remote service.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

use super::chain::{ChainHash, DelegationChain, ParticipantFilter};
use crate::error::PersistenceError;
use crate::types::Address;

/// Content-addressed chain storage service.
#[async_trait]
pub trait DelegationStore: Send + Sync {
    /// Persist `chain` under `hash`. Storing the same chain twice is a no-op.
    async fn store(&self, hash: &ChainHash, chain: &DelegationChain)
        -> Result<(), PersistenceError>;

    async fn fetch(&self, hash: &ChainHash) -> Result<Option<DelegationChain>, PersistenceError>;

    async fn fetch_by_participant(
        &self,
        address: &Address,
        filter: ParticipantFilter,
    ) -> Result<Vec<DelegationChain>, PersistenceError>;
}

/// Process-local store. Chains are never overwritten once written.
#[derive(Debug, Default)]
pub struct InMemoryDelegationStore {
    chains: RwLock<HashMap<ChainHash, DelegationChain>>,
    // Injected failures for exercising the persistence retry path
    fail_next: AtomicU32,
}

impl InMemoryDelegationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls fail with `PersistenceError::Unavailable`.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.chains.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chains.read().await.is_empty()
    }

    fn check_injected_failure(&self) -> Result<(), PersistenceError> {
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(PersistenceError::Unavailable(
                "delegation store unavailable".into(),
            )),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl DelegationStore for InMemoryDelegationStore {
    async fn store(
        &self,
        hash: &ChainHash,
        chain: &DelegationChain,
    ) -> Result<(), PersistenceError> {
        self.check_injected_failure()?;
        let mut chains = self.chains.write().await;
        chains.entry(hash.clone()).or_insert_with(|| chain.clone());
        Ok(())
    }

    async fn fetch(&self, hash: &ChainHash) -> Result<Option<DelegationChain>, PersistenceError> {
        self.check_injected_failure()?;
        Ok(self.chains.read().await.get(hash).cloned())
    }

    async fn fetch_by_participant(
        &self,
        address: &Address,
        filter: ParticipantFilter,
    ) -> Result<Vec<DelegationChain>, PersistenceError> {
        self.check_injected_failure()?;
        let chains = self.chains.read().await;
        let mut matches: Vec<(&ChainHash, &DelegationChain)> = chains
            .iter()
            .filter(|(_, chain)| chain.involves(address, filter))
            .collect();
        // Stable output order regardless of map iteration
        matches.sort_by(|a, b| a.0.cmp(b.0));
        Ok(matches.into_iter().map(|(_, c)| c.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::chain::DelegationLink;

    fn addr(b: u8) -> Address {
        Address::from_key_bytes(&[b; 32])
    }

    #[tokio::test]
    async fn test_store_is_write_once() {
        let store = InMemoryDelegationStore::new();
        let chain = DelegationChain::new(vec![DelegationLink::new(addr(1), addr(2))]).unwrap();
        let hash = chain.content_hash();

        store.store(&hash, &chain).await.unwrap();
        store.store(&hash, &chain).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.fetch(&hash).await.unwrap(), Some(chain));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = InMemoryDelegationStore::new();
        store.fail_next(2);
        let hash = ChainHash::new("missing");

        assert!(store.fetch(&hash).await.is_err());
        assert!(store.fetch(&hash).await.is_err());
        assert_eq!(store.fetch(&hash).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_by_participant() {
        let store = InMemoryDelegationStore::new();
        let first = DelegationChain::new(vec![DelegationLink::new(addr(1), addr(2))]).unwrap();
        let second = DelegationChain::new(vec![DelegationLink::new(addr(3), addr(1))]).unwrap();
        store.store(&first.content_hash(), &first).await.unwrap();
        store.store(&second.content_hash(), &second).await.unwrap();

        let as_delegator = store
            .fetch_by_participant(&addr(1), ParticipantFilter::Delegator)
            .await
            .unwrap();
        assert_eq!(as_delegator, vec![first.clone()]);

        let both = store
            .fetch_by_participant(&addr(1), ParticipantFilter::Both)
            .await
            .unwrap();
        assert_eq!(both.len(), 2);
    }
}
