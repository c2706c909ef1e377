//! Paper execution layer.
//!
//! Fills every submission immediately at the fire's reference price, shifted
//! by a fixed slippage. Repeated submissions with the same idempotency key
//! return the original submission id.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::info;

use super::layer::{
    ExecutionLayer, ExecutionReceipt, SubmissionId, SubmissionRequest, SubmissionStatus,
};
use crate::error::ExecutionError;
use crate::strategy::ActionSpec;
use crate::types::FireKey;

#[derive(Debug)]
pub struct PaperExecutionLayer {
    slippage_bps: Decimal,
    by_key: DashMap<FireKey, SubmissionId>,
    receipts: DashMap<SubmissionId, ExecutionReceipt>,
}

impl PaperExecutionLayer {
    pub fn new(slippage_bps: Decimal) -> Self {
        Self {
            slippage_bps,
            by_key: DashMap::new(),
            receipts: DashMap::new(),
        }
    }

    /// Number of distinct submissions accepted.
    pub fn submission_count(&self) -> usize {
        self.receipts.len()
    }

    fn fill(&self, request: &SubmissionRequest) -> Result<ExecutionReceipt, ExecutionError> {
        let slip = self.slippage_bps / Decimal::from(10_000);
        let price_for = |asset: &str| {
            request
                .reference_price
                .filter(|p| *p > Decimal::ZERO)
                .ok_or_else(|| ExecutionError::Rejected(format!("no reference price for {}", asset)))
        };

        let receipt = match &request.action {
            ActionSpec::Buy { asset, amount, currency } => {
                let fill = price_for(asset)? * (Decimal::ONE + slip);
                let quantity = *amount / fill;
                ExecutionReceipt {
                    fill_price: Some(fill),
                    filled_quantity: quantity,
                    details: format!("bought {} {} for {} {}", quantity.round_dp(8), asset, amount, currency),
                }
            }
            ActionSpec::Sell { asset, amount, currency } => {
                let fill = price_for(asset)? * (Decimal::ONE - slip);
                let quantity = *amount / fill;
                ExecutionReceipt {
                    fill_price: Some(fill),
                    filled_quantity: quantity,
                    details: format!("sold {} {} for {} {}", quantity.round_dp(8), asset, amount, currency),
                }
            }
            ActionSpec::Swap { from_asset, to_asset, amount } => {
                let fill = price_for(from_asset)? * (Decimal::ONE - slip);
                ExecutionReceipt {
                    fill_price: Some(fill),
                    filled_quantity: *amount,
                    details: format!("swapped {} {} into {}", amount, from_asset, to_asset),
                }
            }
            ActionSpec::Alert { message, channels } => ExecutionReceipt {
                fill_price: None,
                filled_quantity: Decimal::ZERO,
                details: format!("alert '{}' sent to {} channel(s)", message, channels.len()),
            },
            ActionSpec::Rebalance { target_allocation } => ExecutionReceipt {
                fill_price: None,
                filled_quantity: Decimal::ZERO,
                details: format!("rebalanced across {} asset(s)", target_allocation.len()),
            },
        };
        Ok(receipt)
    }
}

impl Default for PaperExecutionLayer {
    fn default() -> Self {
        Self::new(Decimal::from(10))
    }
}

#[async_trait]
impl ExecutionLayer for PaperExecutionLayer {
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionId, ExecutionError> {
        if let Some(existing) = self.by_key.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }
        let receipt = self.fill(request)?;
        let id = SubmissionId::new(format!("paper-{}", uuid::Uuid::new_v4()));
        info!(
            submission_id = %id,
            key = %request.idempotency_key,
            details = %receipt.details,
            "Paper submission filled"
        );
        self.receipts.insert(id.clone(), receipt);
        self.by_key.insert(request.idempotency_key.clone(), id.clone());
        Ok(id)
    }

    async fn await_result(
        &self,
        id: &SubmissionId,
        _timeout: Duration,
    ) -> Result<SubmissionStatus, ExecutionError> {
        match self.receipts.get(id) {
            Some(receipt) => Ok(SubmissionStatus::Success(receipt.clone())),
            None => Err(ExecutionError::Rejected(format!("unknown submission {}", id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::Authorization;
    use crate::types::{AccountId, StrategyId};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn request(action: ActionSpec, price: Option<Decimal>) -> SubmissionRequest {
        let now = Utc::now();
        SubmissionRequest {
            idempotency_key: FireKey::new(StrategyId::new("s"), now),
            account_id: AccountId::new("a"),
            action,
            reference_price: price,
            authorization: Authorization {
                account_id: AccountId::new("a"),
                action_hash: "00".repeat(32),
                approved_by: vec![],
                granted_at: now,
            },
        }
    }

    #[tokio::test]
    async fn test_buy_fills_with_slippage() {
        let layer = PaperExecutionLayer::new(dec!(100));
        let req = request(
            ActionSpec::Buy {
                asset: "ETH".into(),
                amount: dec!(101),
                currency: "USD".into(),
            },
            Some(dec!(100)),
        );
        let id = layer.submit(&req).await.unwrap();
        match layer.await_result(&id, Duration::from_secs(1)).await.unwrap() {
            SubmissionStatus::Success(receipt) => {
                assert_eq!(receipt.fill_price, Some(dec!(101)));
                assert_eq!(receipt.filled_quantity, dec!(1));
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resubmission_is_idempotent() {
        let layer = PaperExecutionLayer::default();
        let req = request(
            ActionSpec::Sell {
                asset: "ETH".into(),
                amount: dec!(50),
                currency: "USD".into(),
            },
            Some(dec!(2500)),
        );
        let first = layer.submit(&req).await.unwrap();
        let second = layer.submit(&req).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(layer.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_priced_action_without_price_rejected() {
        let layer = PaperExecutionLayer::default();
        let req = request(
            ActionSpec::Buy {
                asset: "ETH".into(),
                amount: dec!(50),
                currency: "USD".into(),
            },
            None,
        );
        assert!(matches!(
            layer.submit(&req).await,
            Err(ExecutionError::Rejected(_))
        ));
    }
}
