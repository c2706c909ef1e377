//! Common Types Module
//!
//! Identifiers, addresses and the injectable clock shared across the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Length in bytes of an ed25519 verifying key.
pub const ADDRESS_LEN: usize = 32;

/// Type-safe strategy identifier.
///
/// Newtype wrapper so strategy ids cannot be mixed with account ids or
/// free-form strings at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyId(String);

impl StrategyId {
    /// Create a new StrategyId from any string-like type.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let s: String = id.into();
        debug_assert!(!s.is_empty(), "StrategyId cannot be empty");
        if s.is_empty() {
            tracing::warn!("Creating StrategyId with empty string - lookups will never match");
        }
        Self(s)
    }

    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("strat-{}", uuid::Uuid::new_v4()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StrategyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Type-safe delegation account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(format!("acct-{}", uuid::Uuid::new_v4()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A participant address: lowercase hex of a 32-byte ed25519 verifying key.
///
/// Construction always goes through [`Address::parse`], so a value of this
/// type is known to decode into a key-sized byte array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalise an address.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let normalised = raw.trim().trim_start_matches("0x").to_lowercase();
        let bytes = hex::decode(&normalised)
            .map_err(|_| ValidationError::InvalidAddress(raw.to_string()))?;
        if bytes.len() != ADDRESS_LEN {
            return Err(ValidationError::InvalidAddress(raw.to_string()));
        }
        Ok(Self(normalised))
    }

    /// Build an address from raw verifying-key bytes.
    #[must_use]
    pub fn from_key_bytes(bytes: &[u8; ADDRESS_LEN]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Decode back into key bytes. Infallible for parsed addresses.
    #[must_use]
    pub fn key_bytes(&self) -> [u8; ADDRESS_LEN] {
        let mut out = [0u8; ADDRESS_LEN];
        if let Ok(bytes) = hex::decode(&self.0) {
            if bytes.len() == ADDRESS_LEN {
                out.copy_from_slice(&bytes);
            }
        }
        out
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

/// Idempotency key for one fire of one strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FireKey {
    pub strategy_id: StrategyId,
    pub fired_at: DateTime<Utc>,
}

impl FireKey {
    #[must_use]
    pub fn new(strategy_id: StrategyId, fired_at: DateTime<Utc>) -> Self {
        Self {
            strategy_id,
            fired_at,
        }
    }
}

impl fmt::Display for FireKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.strategy_id, self.fired_at.to_rfc3339())
    }
}

/// Time source, injected so schedules and staleness checks are testable.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
    fn now_ts_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and replays.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: std::sync::Arc<std::sync::Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: std::sync::Arc::new(std::sync::Mutex::new(start)),
        }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        if let Ok(mut guard) = self.current.lock() {
            *guard = t;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.current.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.current.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_normalises() {
        let raw = format!("0x{}", "AB".repeat(32));
        let addr = Address::parse(&raw).unwrap();
        assert_eq!(addr.as_str(), "ab".repeat(32));
        assert_eq!(addr.key_bytes(), [0xab; 32]);
    }

    #[test]
    fn test_address_rejects_wrong_length() {
        assert!(Address::parse("abcd").is_err());
        assert!(Address::parse(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_address_serde_roundtrip_validates() {
        let json = format!("\"{}\"", "01".repeat(32));
        let addr: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr.key_bytes(), [1u8; 32]);
        assert!(serde_json::from_str::<Address>("\"nope\"").is_err());
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(30));
    }
}
