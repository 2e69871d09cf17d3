//! Domain traits defining contracts for external systems.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::{AppError, ChainError};
use super::types::{
    BatchReceipt, BatchStatus, FingerprintAdmission, InteractionFingerprint, PaginatedResponse,
    SettlementBatch, TipHistory, TippingConfig,
};

/// Persistence port for pipeline state
#[async_trait]
pub trait TipStore: Send + Sync {
    /// Check store connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Atomic insert-if-absent of an interaction fingerprint.
    ///
    /// Exactly one caller across all service instances receives `Accepted`
    /// for a given fingerprint; every other caller, concurrent or later,
    /// receives `Duplicate`.
    async fn admit_fingerprint(
        &self,
        fingerprint: &InteractionFingerprint,
    ) -> Result<FingerprintAdmission, AppError>;

    /// Remove a single fingerprint so the interaction can be re-admitted.
    /// Used when an accepted event hits a transient failure before it was
    /// handed to settlement; the provider's retry must not be treated as a
    /// duplicate of work that never happened.
    async fn forget_fingerprint(
        &self,
        fingerprint: &InteractionFingerprint,
    ) -> Result<(), AppError>;

    /// Delete fingerprints created before `older_than`. Returns the number
    /// of rows removed.
    async fn prune_fingerprints(&self, older_than: DateTime<Utc>) -> Result<u64, AppError>;

    /// Look up a recipient's tipping configuration
    async fn get_tipping_config(&self, recipient_fid: u64)
    -> Result<Option<TippingConfig>, AppError>;

    /// Look up a tipping configuration by the recipient's wallet address
    async fn get_config_by_address(&self, address: &str)
    -> Result<Option<TippingConfig>, AppError>;

    /// Conditionally reserve `amount` against the recipient's spending
    /// limit. Returns `true` when the reservation was committed, `false`
    /// when it would exceed the limit or the config is inactive. This is
    /// the admission decision point for the spending limit: the update is
    /// atomic at the storage layer, so concurrent reservations for the
    /// same recipient cannot both pass on a stale `total_spent`.
    async fn reserve_spend(&self, recipient_fid: u64, amount: u64) -> Result<bool, AppError>;

    /// Return a previously reserved amount after a terminal settlement
    /// failure.
    async fn release_spend(&self, recipient_fid: u64, amount: u64) -> Result<(), AppError>;

    /// Persist a new settlement batch before submission
    async fn insert_batch(&self, batch: &SettlementBatch) -> Result<(), AppError>;

    /// Update a batch's status, transaction reference, and last error
    async fn update_batch_status(
        &self,
        id: &str,
        status: BatchStatus,
        tx_ref: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), AppError>;

    /// Get a single batch by id
    async fn get_batch(&self, id: &str) -> Result<Option<SettlementBatch>, AppError>;

    /// Batches not yet terminal (pending or submitted), oldest first.
    /// Used by startup recovery.
    async fn get_unfinalized_batches(&self) -> Result<Vec<SettlementBatch>, AppError>;

    /// Record one confirmed transfer. Inserting the same (tx_ref,
    /// fingerprint) pair twice is a no-op, which is what makes receipt
    /// replay after a crash safe.
    async fn record_tip_history(&self, record: &TipHistory) -> Result<(), AppError>;

    /// List confirmed transfers with cursor-based pagination
    async fn list_tip_history(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<TipHistory>, AppError>;
}

/// Chain port for the opaque payout service
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Check chain RPC connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Current approval granted by `owner` to the payout contract's spender
    async fn allowance(&self, owner: &str, spender: &str, token: &str) -> Result<u64, AppError>;

    /// Current token balance of `owner`
    async fn balance_of(&self, owner: &str, token: &str) -> Result<u64, AppError>;

    /// Submit one batch of tips as a single transaction signed by the
    /// executor key. Returns the transaction reference.
    async fn submit_batch(
        &self,
        items: &[super::types::TipIntent],
    ) -> Result<String, AppError>;

    /// Fetch the receipt for a submitted transaction, if available yet
    async fn get_receipt(&self, tx_ref: &str) -> Result<Option<BatchReceipt>, AppError>;

    /// Poll for a receipt until it reports a terminal status or the
    /// timeout elapses.
    async fn wait_for_receipt(
        &self,
        tx_ref: &str,
        timeout_secs: u64,
    ) -> Result<BatchReceipt, AppError> {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(timeout_secs);
        loop {
            if let Some(receipt) = self.get_receipt(tx_ref).await? {
                if receipt.status != super::types::ReceiptStatus::Pending {
                    return Ok(receipt);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::Chain(ChainError::Timeout(format!(
                    "no terminal receipt for {} within {}s",
                    tx_ref, timeout_secs
                ))));
            }
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ItemOutcome, ReceiptStatus, TipIntent};
    use std::sync::Mutex;

    struct ScriptedChainClient {
        receipts: Mutex<Vec<Option<BatchReceipt>>>,
    }

    #[async_trait]
    impl ChainClient for ScriptedChainClient {
        async fn health_check(&self) -> Result<(), AppError> {
            Ok(())
        }

        async fn allowance(&self, _: &str, _: &str, _: &str) -> Result<u64, AppError> {
            Ok(0)
        }

        async fn balance_of(&self, _: &str, _: &str) -> Result<u64, AppError> {
            Ok(0)
        }

        async fn submit_batch(&self, _: &[TipIntent]) -> Result<String, AppError> {
            Ok("tx_1".to_string())
        }

        async fn get_receipt(&self, _: &str) -> Result<Option<BatchReceipt>, AppError> {
            let mut receipts = self.receipts.lock().unwrap();
            if receipts.is_empty() {
                Ok(None)
            } else {
                Ok(receipts.remove(0))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_receipt_polls_until_terminal() {
        let client = ScriptedChainClient {
            receipts: Mutex::new(vec![
                None,
                Some(BatchReceipt {
                    tx_ref: "tx_1".to_string(),
                    status: ReceiptStatus::Pending,
                    item_outcomes: vec![],
                }),
                Some(BatchReceipt {
                    tx_ref: "tx_1".to_string(),
                    status: ReceiptStatus::Confirmed,
                    item_outcomes: vec![ItemOutcome::Ok],
                }),
            ]),
        };

        let receipt = client.wait_for_receipt("tx_1", 60).await.unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_receipt_times_out() {
        let client = ScriptedChainClient {
            receipts: Mutex::new(vec![]),
        };

        let result = client.wait_for_receipt("tx_gone", 5).await;
        assert!(matches!(
            result,
            Err(AppError::Chain(ChainError::Timeout(_)))
        ));
    }
}
