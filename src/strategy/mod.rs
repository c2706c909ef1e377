//! # Strategy Module
//!
//! Automation rules and their storage.
//!
//! - `trigger` / `action` - the tagged rule definitions
//! - `model` - `Strategy` records, creation input, patches and filters
//! - `registry` - concurrent CRUD store with execution feedback
//! - `templates` - preset catalogue

pub mod action;
pub mod model;
pub mod registry;
pub mod templates;
pub mod trigger;

pub use action::{ActionKind, ActionSpec, AlertChannel};
pub use model::{NewStrategy, Performance, Strategy, StrategyFilter, StrategyPatch};
pub use registry::{FailureOutcome, StrategyRegistry};
pub use templates::{StrategyTemplate, TemplateCategory};
pub use trigger::{
    CheckFrequency, ComparisonOperator, Frequency, MarketMetric, MetricWindow, ScheduleDay,
    TriggerKind, TriggerSpec,
};
