//! Signer approvals over action hashes.

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::account::DelegationAccount;
use crate::error::{AuthorizationError, ValidationError};
use crate::types::Address;

/// SHA-256 digest identifying one concrete action. This is what signers sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionHash([u8; 32]);

impl ActionHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ActionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// One signer's ed25519 signature over an [`ActionHash`], hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub signer: Address,
    pub signature: String,
}

impl Approval {
    /// Sign `hash` with `key`.
    pub fn sign(key: &SigningKey, hash: &ActionHash) -> Self {
        let signature = key.sign(hash.as_bytes());
        Self {
            signer: Address::from_key_bytes(key.verifying_key().as_bytes()),
            signature: hex::encode(signature.to_bytes()),
        }
    }

    /// True when the signature decodes and verifies for `signer` over `hash`.
    /// Any malformed input simply yields false.
    pub fn verifies(&self, hash: &ActionHash) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.signer.key_bytes()) else {
            return false;
        };
        let Ok(raw) = hex::decode(&self.signature) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(raw.as_slice()) else {
            return false;
        };
        let signature = Signature::from_bytes(&sig_bytes);
        key.verify(hash.as_bytes(), &signature).is_ok()
    }
}

/// Collects approvals for an action from an account's signers.
///
/// In production this fronts wallet prompts or a co-signing service; the
/// engine only cares about the signatures that come back.
#[async_trait]
pub trait ApprovalProvider: Send + Sync {
    async fn collect(
        &self,
        account: &DelegationAccount,
        hash: &ActionHash,
    ) -> Result<Vec<Approval>, AuthorizationError>;
}

/// In-process signer holding ed25519 keys by address.
///
/// Signs with every key it holds that belongs to the account's signer set.
#[derive(Default)]
pub struct LocalKeyring {
    keys: HashMap<Address, SigningKey>,
}

impl fmt::Debug for LocalKeyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material
        f.debug_struct("LocalKeyring")
            .field("addresses", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LocalKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key from its 32-byte seed and return its address.
    pub fn insert_seed(&mut self, seed: &[u8; 32]) -> Address {
        let key = SigningKey::from_bytes(seed);
        let address = Address::from_key_bytes(key.verifying_key().as_bytes());
        self.keys.insert(address.clone(), key);
        address
    }

    /// Add a key from a hex-encoded seed.
    pub fn insert_hex_seed(&mut self, seed_hex: &str) -> Result<Address, ValidationError> {
        let trimmed = seed_hex.trim().trim_start_matches("0x");
        let bytes = hex::decode(trimmed)
            .map_err(|_| ValidationError::InvalidAddress("<signing seed>".into()))?;
        let seed = <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| ValidationError::InvalidAddress("<signing seed>".into()))?;
        Ok(self.insert_seed(&seed))
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.keys.keys()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl ApprovalProvider for LocalKeyring {
    async fn collect(
        &self,
        account: &DelegationAccount,
        hash: &ActionHash,
    ) -> Result<Vec<Approval>, AuthorizationError> {
        let mut approvals: Vec<Approval> = account
            .signers()
            .iter()
            .filter_map(|signer| self.keys.get(signer))
            .map(|key| Approval::sign(key, hash))
            .collect();
        approvals.sort_by(|a, b| a.signer.cmp(&b.signer));
        Ok(approvals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let hash = ActionHash::from_bytes([1u8; 32]);
        let approval = Approval::sign(&key, &hash);

        assert!(approval.verifies(&hash));
        assert!(!approval.verifies(&ActionHash::from_bytes([2u8; 32])));
    }

    #[test]
    fn test_malformed_signature_is_not_valid() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let hash = ActionHash::from_bytes([1u8; 32]);
        let mut approval = Approval::sign(&key, &hash);

        approval.signature = "not-hex".into();
        assert!(!approval.verifies(&hash));

        approval.signature = "abcd".into();
        assert!(!approval.verifies(&hash));
    }

    #[test]
    fn test_signature_bound_to_signer() {
        let a = SigningKey::from_bytes(&[1u8; 32]);
        let b = SigningKey::from_bytes(&[2u8; 32]);
        let hash = ActionHash::from_bytes([9u8; 32]);

        let mut forged = Approval::sign(&a, &hash);
        forged.signer = Address::from_key_bytes(b.verifying_key().as_bytes());
        assert!(!forged.verifies(&hash));
    }

    #[test]
    fn test_keyring_hex_seed() {
        let mut keyring = LocalKeyring::new();
        let addr = keyring.insert_hex_seed(&"05".repeat(32)).unwrap();
        assert_eq!(keyring.len(), 1);
        assert_eq!(keyring.addresses().next(), Some(&addr));
        assert!(keyring.insert_hex_seed("1234").is_err());
    }
}
