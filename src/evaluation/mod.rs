//! # Evaluation Module
//!
//! - `snapshot` - market snapshots, feeds, snapshot validators
//! - `schedule` - calendar math for time-based triggers
//! - `evaluator` - per-strategy trigger state machine

pub mod evaluator;
pub mod schedule;
pub mod snapshot;

pub use evaluator::{max_drift, Evaluation, Fire, TriggerEvaluator, TriggerPhase};
pub use snapshot::{
    CompositeValidator, FileSnapshotFeed, FreshnessValidator, MarketSnapshot,
    PositivePriceValidator, SnapshotFeed, SnapshotValidator, StaticSnapshotFeed,
};
