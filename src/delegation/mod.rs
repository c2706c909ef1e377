//! # Delegation Module
//!
//! Decides who may act on a user's behalf.
//!
//! - `account` - single-owner and m-of-n multisig accounts
//! - `approvals` - ed25519 approvals over action hashes, approval providers
//! - `authority` - account registry and threshold checks
//! - `chain` - content-addressed delegation chains
//! - `storage` - pluggable chain storage

pub mod account;
pub mod approvals;
pub mod authority;
pub mod chain;
pub mod storage;

pub use account::{DelegationAccount, DelegationKind};
pub use approvals::{ActionHash, Approval, ApprovalProvider, LocalKeyring};
pub use authority::{Authorization, DelegationAuthority};
pub use chain::{ChainHash, DelegationChain, DelegationLink, ParticipantFilter};
pub use storage::{DelegationStore, InMemoryDelegationStore};
