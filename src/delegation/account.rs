//! Delegation accounts: single-owner or m-of-n multisig.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::ValidationError;
use crate::types::{AccountId, Address};

/// Shape of a delegation account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationKind {
    /// One owner key, threshold 1
    Single,
    /// Several signers, `threshold` of them must approve
    Multisig,
}

impl std::fmt::Display for DelegationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Multisig => write!(f, "multisig"),
        }
    }
}

/// An authorization unit that can approve actions on a user's behalf.
///
/// Fields are private: the only way to obtain one is [`DelegationAccount::new`],
/// which enforces `1 <= threshold <= |signers|`, `owner ∈ signers`, and the
/// 1-of-1 shape for `Single` accounts. Deserialization goes through the
/// same checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AccountRecord")]
pub struct DelegationAccount {
    id: AccountId,
    owner: Address,
    kind: DelegationKind,
    signers: BTreeSet<Address>,
    threshold: u32,
    revoked: bool,
    created_at: DateTime<Utc>,
}

/// Wire shape of a stored account, validated before it becomes one.
#[derive(Deserialize)]
struct AccountRecord {
    id: AccountId,
    owner: Address,
    kind: DelegationKind,
    signers: BTreeSet<Address>,
    threshold: u32,
    #[serde(default)]
    revoked: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<AccountRecord> for DelegationAccount {
    type Error = ValidationError;

    fn try_from(record: AccountRecord) -> Result<Self, Self::Error> {
        let mut account = Self::new(
            record.id,
            record.owner,
            record.kind,
            record.signers,
            record.threshold,
            record.created_at,
        )?;
        account.revoked = record.revoked;
        Ok(account)
    }
}

impl DelegationAccount {
    /// Validate and build a new account.
    pub fn new(
        id: AccountId,
        owner: Address,
        kind: DelegationKind,
        signers: impl IntoIterator<Item = Address>,
        threshold: u32,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let signers: BTreeSet<Address> = signers.into_iter().collect();

        if signers.is_empty() {
            return Err(ValidationError::EmptySignerSet);
        }
        if threshold < 1 || threshold as usize > signers.len() {
            return Err(ValidationError::ThresholdOutOfRange {
                threshold,
                signers: signers.len(),
            });
        }
        if !signers.contains(&owner) {
            return Err(ValidationError::OwnerNotSigner(owner));
        }
        if kind == DelegationKind::Single && (signers.len() != 1 || threshold != 1) {
            return Err(ValidationError::SingleAccountShape {
                signers: signers.len(),
                threshold,
            });
        }

        Ok(Self {
            id,
            owner,
            kind,
            signers,
            threshold,
            revoked: false,
            created_at,
        })
    }

    pub fn id(&self) -> &AccountId {
        &self.id
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    pub fn kind(&self) -> DelegationKind {
        self.kind
    }

    pub fn signers(&self) -> &BTreeSet<Address> {
        &self.signers
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_signer(&self, address: &Address) -> bool {
        self.signers.contains(address)
    }

    pub(crate) fn revoke(&mut self) {
        self.revoked = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::from_key_bytes(&[b; 32])
    }

    fn build(
        kind: DelegationKind,
        owner: Address,
        signers: Vec<Address>,
        threshold: u32,
    ) -> Result<DelegationAccount, ValidationError> {
        DelegationAccount::new(
            AccountId::new("acct"),
            owner,
            kind,
            signers,
            threshold,
            Utc::now(),
        )
    }

    #[test]
    fn test_single_account_valid() {
        let account = build(DelegationKind::Single, addr(1), vec![addr(1)], 1).unwrap();
        assert_eq!(account.threshold(), 1);
        assert_eq!(account.signers().len(), 1);
        assert!(!account.is_revoked());
    }

    #[test]
    fn test_single_account_rejects_extra_signers() {
        let err = build(DelegationKind::Single, addr(1), vec![addr(1), addr(2)], 1).unwrap_err();
        assert!(matches!(err, ValidationError::SingleAccountShape { signers: 2, .. }));
    }

    #[test]
    fn test_threshold_bounds() {
        let signers = vec![addr(1), addr(2), addr(3)];
        assert!(matches!(
            build(DelegationKind::Multisig, addr(1), signers.clone(), 0),
            Err(ValidationError::ThresholdOutOfRange { threshold: 0, signers: 3 })
        ));
        assert!(matches!(
            build(DelegationKind::Multisig, addr(1), signers.clone(), 4),
            Err(ValidationError::ThresholdOutOfRange { threshold: 4, signers: 3 })
        ));
        assert!(build(DelegationKind::Multisig, addr(1), signers, 3).is_ok());
    }

    #[test]
    fn test_owner_must_be_signer() {
        let err = build(DelegationKind::Multisig, addr(9), vec![addr(1), addr(2)], 1).unwrap_err();
        assert_eq!(err, ValidationError::OwnerNotSigner(addr(9)));
    }

    #[test]
    fn test_empty_signers_rejected() {
        let err = build(DelegationKind::Multisig, addr(1), vec![], 1).unwrap_err();
        assert_eq!(err, ValidationError::EmptySignerSet);
    }

    #[test]
    fn test_duplicate_signers_collapse() {
        // {A, A, B} is a 2-signer set, so threshold 3 is out of range
        let err = build(
            DelegationKind::Multisig,
            addr(1),
            vec![addr(1), addr(1), addr(2)],
            3,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::ThresholdOutOfRange { signers: 2, .. }));
    }

    #[test]
    fn test_deserialize_round_trips_revoked_flag() {
        let mut account =
            build(DelegationKind::Multisig, addr(1), vec![addr(1), addr(2)], 2).unwrap();
        account.revoke();
        let json = serde_json::to_string(&account).unwrap();
        let restored: DelegationAccount = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, account);
        assert!(restored.is_revoked());
    }

    #[test]
    fn test_deserialize_rejects_invalid_threshold() {
        let account =
            build(DelegationKind::Multisig, addr(1), vec![addr(1), addr(2)], 2).unwrap();
        let mut value = serde_json::to_value(&account).unwrap();
        value["threshold"] = serde_json::json!(0);
        let err = serde_json::from_value::<DelegationAccount>(value.clone()).unwrap_err();
        assert!(err.to_string().contains("Threshold"), "{err}");

        value["threshold"] = serde_json::json!(2);
        value["owner"] = serde_json::to_value(addr(9)).unwrap();
        assert!(serde_json::from_value::<DelegationAccount>(value).is_err());
    }
}
