//! Content-addressed delegation chains.
//!
//! A chain is an ordered list of links from a root delegator down to the
//! final delegate. Its identity is the SHA-256 of its canonical JSON
//! encoding, so identical chains always hash identically.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::ValidationError;
use crate::types::Address;

/// Hex-encoded SHA-256 content address of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainHash(String);

impl ChainHash {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One hop of authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationLink {
    pub delegator: Address,
    pub delegate: Address,
    /// Free-form restrictions carried with the grant (e.g. "max_amount:500")
    #[serde(default)]
    pub caveats: Vec<String>,
}

impl DelegationLink {
    pub fn new(delegator: Address, delegate: Address) -> Self {
        Self {
            delegator,
            delegate,
            caveats: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_caveat(mut self, caveat: impl Into<String>) -> Self {
        self.caveats.push(caveat.into());
        self
    }
}

/// Which side of a link an address lookup should match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantFilter {
    Delegate,
    Delegator,
    Both,
}

/// Ordered, validated delegation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<DelegationLink>", into = "Vec<DelegationLink>")]
pub struct DelegationChain {
    links: Vec<DelegationLink>,
}

impl DelegationChain {
    /// Validate link continuity and build the chain.
    pub fn new(links: Vec<DelegationLink>) -> Result<Self, ValidationError> {
        if links.is_empty() {
            return Err(ValidationError::EmptyChain);
        }
        for (index, pair) in links.windows(2).enumerate() {
            if pair[0].delegate != pair[1].delegator {
                return Err(ValidationError::BrokenChain { index });
            }
        }
        Ok(Self { links })
    }

    pub fn links(&self) -> &[DelegationLink] {
        &self.links
    }

    /// The original delegator.
    pub fn root(&self) -> &Address {
        &self.links[0].delegator
    }

    /// The final delegate holding the authority.
    pub fn leaf(&self) -> &Address {
        &self.links[self.links.len() - 1].delegate
    }

    /// Whether `address` appears on the side(s) selected by `filter`.
    pub fn involves(&self, address: &Address, filter: ParticipantFilter) -> bool {
        self.links.iter().any(|link| match filter {
            ParticipantFilter::Delegate => &link.delegate == address,
            ParticipantFilter::Delegator => &link.delegator == address,
            ParticipantFilter::Both => &link.delegate == address || &link.delegator == address,
        })
    }

    /// Content address: SHA-256 over the canonical JSON of the links.
    pub fn content_hash(&self) -> ChainHash {
        // Struct fields serialize in declaration order and addresses are
        // normalised at parse time, so the encoding is canonical.
        let encoded = serde_json::to_vec(&self.links).unwrap_or_default();
        let digest = Sha256::digest(&encoded);
        ChainHash(hex::encode(digest))
    }
}

impl TryFrom<Vec<DelegationLink>> for DelegationChain {
    type Error = ValidationError;

    fn try_from(links: Vec<DelegationLink>) -> Result<Self, Self::Error> {
        Self::new(links)
    }
}

impl From<DelegationChain> for Vec<DelegationLink> {
    fn from(chain: DelegationChain) -> Self {
        chain.links
    }
}
