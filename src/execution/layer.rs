//! Execution layer interface.
//!
//! The executor never talks to a chain or venue directly; it submits
//! authorized actions to an [`ExecutionLayer`] and polls for their result.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::delegation::Authorization;
use crate::error::ExecutionError;
use crate::strategy::ActionSpec;
use crate::types::{AccountId, FireKey};

/// Layer-assigned handle for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(String);

impl SubmissionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the layer needs to carry out one action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionRequest {
    /// Layers must treat repeated submissions with the same key as one
    pub idempotency_key: FireKey,
    pub account_id: AccountId,
    pub action: ActionSpec,
    /// Snapshot price at fire time, if the action has a priced asset
    pub reference_price: Option<Decimal>,
    pub authorization: Authorization,
}

/// Fill details reported for a completed submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub fill_price: Option<Decimal>,
    /// Quantity of the priced asset moved
    pub filled_quantity: Decimal,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmissionStatus {
    Success(ExecutionReceipt),
    /// Not settled yet; poll again later
    Pending,
    /// Settled unsuccessfully; a fresh submission may succeed
    Failed { reason: String },
}

#[async_trait]
pub trait ExecutionLayer: Send + Sync {
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionId, ExecutionError>;

    /// Wait up to `timeout` for the submission to settle.
    async fn await_result(
        &self,
        id: &SubmissionId,
        timeout: Duration,
    ) -> Result<SubmissionStatus, ExecutionError>;
}
