//! Market snapshots, the feeds that supply them and the checks they must pass.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::error::EvaluationError;

/// Point-in-time view of prices, derived metrics and the user's allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub timestamp: DateTime<Utc>,
    pub prices: BTreeMap<String, Decimal>,
    /// Keyed `metric:window`, e.g. `volatility:24h`
    #[serde(default)]
    pub metrics: BTreeMap<String, Decimal>,
    /// Current portfolio weights in percent
    #[serde(default)]
    pub allocation: BTreeMap<String, Decimal>,
}

impl MarketSnapshot {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            prices: BTreeMap::new(),
            metrics: BTreeMap::new(),
            allocation: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_price(mut self, asset: impl Into<String>, price: Decimal) -> Self {
        self.prices.insert(asset.into(), price);
        self
    }

    #[must_use]
    pub fn with_metric(mut self, key: impl Into<String>, value: Decimal) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_allocation(mut self, asset: impl Into<String>, pct: Decimal) -> Self {
        self.allocation.insert(asset.into(), pct);
        self
    }

    pub fn price(&self, asset: &str) -> Result<Decimal, EvaluationError> {
        self.prices
            .get(asset)
            .copied()
            .ok_or_else(|| EvaluationError::MissingPrice(asset.to_string()))
    }

    pub fn metric(&self, key: &str) -> Result<Decimal, EvaluationError> {
        self.metrics
            .get(key)
            .copied()
            .ok_or_else(|| EvaluationError::MissingMetric(key.to_string()))
    }

    pub fn current_allocation(&self) -> Result<&BTreeMap<String, Decimal>, EvaluationError> {
        if self.allocation.is_empty() {
            return Err(EvaluationError::MissingAllocation);
        }
        Ok(&self.allocation)
    }
}

/// Pull-based source of snapshots.
#[async_trait]
pub trait SnapshotFeed: Send + Sync {
    async fn latest(&self) -> Result<MarketSnapshot, EvaluationError>;
}

/// In-memory feed whose snapshot is replaced by the caller.
#[derive(Debug, Default)]
pub struct StaticSnapshotFeed {
    current: RwLock<Option<MarketSnapshot>>,
}

impl StaticSnapshotFeed {
    pub fn new(initial: Option<MarketSnapshot>) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub async fn set(&self, snapshot: MarketSnapshot) {
        *self.current.write().await = Some(snapshot);
    }

    pub async fn clear(&self) {
        *self.current.write().await = None;
    }
}

#[async_trait]
impl SnapshotFeed for StaticSnapshotFeed {
    async fn latest(&self) -> Result<MarketSnapshot, EvaluationError> {
        self.current
            .read()
            .await
            .clone()
            .ok_or_else(|| EvaluationError::FeedUnavailable("no snapshot published yet".into()))
    }
}

/// Re-reads a JSON snapshot file on every call.
#[derive(Debug, Clone)]
pub struct FileSnapshotFeed {
    path: PathBuf,
}

impl FileSnapshotFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotFeed for FileSnapshotFeed {
    async fn latest(&self) -> Result<MarketSnapshot, EvaluationError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            EvaluationError::FeedUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            EvaluationError::InvalidSnapshot(format!("{}: {}", self.path.display(), e))
        })
    }
}

/// Check applied to a snapshot before any strategy sees it.
pub trait SnapshotValidator: Send + Sync {
    fn validate(&self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> Result<(), EvaluationError>;
}

/// Rejects snapshots older than `max_age_secs` or stamped more than
/// `max_clock_skew_secs` in the future.
#[derive(Debug, Clone)]
pub struct FreshnessValidator {
    max_age_secs: i64,
    max_clock_skew_secs: i64,
}

impl FreshnessValidator {
    /// No tolerance for future timestamps until [`Self::with_clock_skew`].
    pub fn new(max_age_secs: i64) -> Self {
        Self {
            max_age_secs,
            max_clock_skew_secs: 0,
        }
    }

    pub fn with_clock_skew(mut self, max_clock_skew_secs: i64) -> Self {
        self.max_clock_skew_secs = max_clock_skew_secs.max(0);
        self
    }
}

impl SnapshotValidator for FreshnessValidator {
    fn validate(&self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> Result<(), EvaluationError> {
        let age_secs = (now - snapshot.timestamp).num_seconds();
        if age_secs > self.max_age_secs {
            Err(EvaluationError::StaleSnapshot {
                age_secs,
                max_age_secs: self.max_age_secs,
            })
        } else if snapshot.timestamp > now + chrono::Duration::seconds(self.max_clock_skew_secs) {
            Err(EvaluationError::FutureSnapshot {
                ahead_secs: (snapshot.timestamp - now).num_seconds(),
            })
        } else {
            Ok(())
        }
    }
}

/// Every price must be strictly positive.
#[derive(Debug, Clone)]
pub struct PositivePriceValidator;

impl SnapshotValidator for PositivePriceValidator {
    fn validate(&self, snapshot: &MarketSnapshot, _now: DateTime<Utc>) -> Result<(), EvaluationError> {
        match snapshot.prices.iter().find(|(_, p)| **p <= Decimal::ZERO) {
            Some((asset, price)) => Err(EvaluationError::InvalidSnapshot(format!(
                "price for {} must be positive, got {}",
                asset, price
            ))),
            None => Ok(()),
        }
    }
}

/// Chains validators, failing on the first error.
pub struct CompositeValidator {
    validators: Vec<Box<dyn SnapshotValidator>>,
}

impl CompositeValidator {
    pub fn new(validators: Vec<Box<dyn SnapshotValidator>>) -> Self {
        Self { validators }
    }

    /// Freshness plus price sanity.
    pub fn standard(max_age_secs: i64, max_clock_skew_secs: i64) -> Self {
        Self::new(vec![
            Box::new(FreshnessValidator::new(max_age_secs).with_clock_skew(max_clock_skew_secs)),
            Box::new(PositivePriceValidator),
        ])
    }
}

impl SnapshotValidator for CompositeValidator {
    fn validate(&self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> Result<(), EvaluationError> {
        for validator in &self.validators {
            validator.validate(snapshot, now)?;
        }
        Ok(())
    }
}
