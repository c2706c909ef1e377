//! Delegation authority: account registry, threshold checks and chain storage.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::account::{DelegationAccount, DelegationKind};
use super::approvals::{ActionHash, Approval};
use super::chain::{ChainHash, DelegationChain, ParticipantFilter};
use super::storage::DelegationStore;
use crate::error::{AuthorizationError, DelegationError, PersistenceError, ValidationError};
use crate::resilience::{retry_async, RetryPolicy};
use crate::types::{AccountId, Address, Clock};

/// Proof that an action met its account's signature threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Authorization {
    pub account_id: AccountId,
    pub action_hash: String,
    /// Distinct signers whose signatures verified
    pub approved_by: Vec<Address>,
    pub granted_at: DateTime<Utc>,
}

/// Owns every delegation account and fronts the chain store.
pub struct DelegationAuthority {
    accounts: DashMap<AccountId, DelegationAccount>,
    store: Arc<dyn DelegationStore>,
    persistence_retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl DelegationAuthority {
    pub fn new(
        store: Arc<dyn DelegationStore>,
        persistence_retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accounts: DashMap::new(),
            store,
            persistence_retry,
            clock,
        }
    }

    /// Create an account with a generated id.
    pub fn create_account(
        &self,
        owner: Address,
        kind: DelegationKind,
        signers: impl IntoIterator<Item = Address>,
        threshold: u32,
    ) -> Result<DelegationAccount, ValidationError> {
        self.create_account_with_id(AccountId::generate(), owner, kind, signers, threshold)
    }

    /// Create an account under a caller-chosen id (config files, replays).
    pub fn create_account_with_id(
        &self,
        id: AccountId,
        owner: Address,
        kind: DelegationKind,
        signers: impl IntoIterator<Item = Address>,
        threshold: u32,
    ) -> Result<DelegationAccount, ValidationError> {
        let account =
            DelegationAccount::new(id, owner, kind, signers, threshold, self.clock.now())?;
        // Ids are never reused, so a revoked account stays revoked
        match self.accounts.entry(account.id().clone()) {
            Entry::Occupied(_) => {
                return Err(ValidationError::DuplicateAccount(account.id().clone()));
            }
            Entry::Vacant(slot) => {
                slot.insert(account.clone());
            }
        }
        info!(
            account_id = %account.id(),
            kind = %account.kind(),
            signers = account.signers().len(),
            threshold = account.threshold(),
            "Delegation account created"
        );
        Ok(account)
    }

    /// Check `approvals` against the account's signer set and threshold.
    ///
    /// Only approvals from members of the signer set whose signature verifies
    /// over `hash` count, and each signer counts once. Bad signatures are
    /// skipped rather than reported.
    pub fn authorize(
        &self,
        account_id: &AccountId,
        hash: &ActionHash,
        approvals: &[Approval],
    ) -> Result<Authorization, AuthorizationError> {
        let account = self
            .accounts
            .get(account_id)
            .map(|a| a.clone())
            .ok_or_else(|| AuthorizationError::AccountNotFound(account_id.clone()))?;

        if account.is_revoked() {
            return Err(AuthorizationError::Revoked(account_id.clone()));
        }

        let mut valid: BTreeSet<Address> = BTreeSet::new();
        for approval in approvals {
            if !account.is_signer(&approval.signer) || valid.contains(&approval.signer) {
                continue;
            }
            if approval.verifies(hash) {
                valid.insert(approval.signer.clone());
            } else {
                debug!(
                    account_id = %account_id,
                    signer = approval.signer.short(),
                    "Ignoring approval with invalid signature"
                );
            }
        }

        if valid.len() < account.threshold() as usize {
            return Err(AuthorizationError::InsufficientSignatures {
                valid: valid.len(),
                threshold: account.threshold(),
            });
        }

        Ok(Authorization {
            account_id: account_id.clone(),
            action_hash: hash.to_hex(),
            approved_by: valid.into_iter().collect(),
            granted_at: self.clock.now(),
        })
    }

    /// Stop the account from authorizing anything further.
    pub fn revoke(&self, account_id: &AccountId) -> Result<(), DelegationError> {
        let mut account = self
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| DelegationError::AccountNotFound(account_id.clone()))?;
        account.revoke();
        warn!(account_id = %account_id, "Delegation account revoked");
        Ok(())
    }

    pub fn account(&self, account_id: &AccountId) -> Option<DelegationAccount> {
        self.accounts.get(account_id).map(|a| a.clone())
    }

    /// All accounts, ordered by id.
    pub fn accounts(&self) -> Vec<DelegationAccount> {
        let mut all: Vec<DelegationAccount> =
            self.accounts.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Validate, content-address and persist a chain. Returns its hash.
    pub async fn store_chain(
        &self,
        links: Vec<super::chain::DelegationLink>,
    ) -> Result<ChainHash, DelegationError> {
        let chain = DelegationChain::new(links)?;
        let hash = chain.content_hash();

        retry_async(
            &self.persistence_retry,
            "store_chain",
            || self.store.store(&hash, &chain),
            |_: &PersistenceError| true,
        )
        .await?;

        info!(chain_hash = %hash, links = chain.links().len(), "Delegation chain stored");
        Ok(hash)
    }

    pub async fn fetch_chain(&self, hash: &ChainHash) -> Result<DelegationChain, DelegationError> {
        let found = retry_async(
            &self.persistence_retry,
            "fetch_chain",
            || self.store.fetch(hash),
            |_: &PersistenceError| true,
        )
        .await?;
        found.ok_or_else(|| DelegationError::ChainNotFound(hash.to_string()))
    }

    pub async fn fetch_chains_by_participant(
        &self,
        address: &Address,
        filter: ParticipantFilter,
    ) -> Result<Vec<DelegationChain>, DelegationError> {
        let chains = retry_async(
            &self.persistence_retry,
            "fetch_chains_by_participant",
            || self.store.fetch_by_participant(address, filter),
            |_: &PersistenceError| true,
        )
        .await?;
        Ok(chains)
    }
}
