//! Settlement executor: turns admitted tip intents into confirmed
//! on-chain transfers.
//!
//! Intents arrive over a channel and accumulate until a flush, triggered by
//! batch size or by the flush interval, whichever comes first. The worker
//! loop is strictly sequential, which makes it the single submission lane
//! for the executor key: there is never more than one transaction in flight
//! per signer, trading some latency for sequence-number safety.
//!
//! Each batch is persisted before submission. After a crash the recovery
//! pass finalizes submitted batches from their receipts; the receipt is the
//! durable source of truth for which intents actually paid.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::domain::{
    AppError, BatchReceipt, BatchStatus, BlockReason, ChainClient, ItemOutcome, ReceiptStatus,
    SettlementBatch, TipHistory, TipIntent, TipStore,
};
use crate::infra::BlocklistManager;

/// Maximum number of submission attempts per batch
const MAX_SUBMIT_ATTEMPTS: u32 = 5;

/// Maximum backoff duration in seconds between attempts
const MAX_BACKOFF_SECS: u64 = 60;

/// Settlement executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Flush when this many intents accumulate
    pub batch_size: usize,
    /// Flush at least this often while intents are pending
    pub flush_interval: Duration,
    /// How long to poll for a receipt after submission
    pub receipt_timeout_secs: u64,
    pub enabled: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval: Duration::from_secs(5),
            receipt_timeout_secs: 120,
            enabled: true,
        }
    }
}

/// Batches admitted intents and drives them through submission,
/// confirmation, and per-item outcome classification.
pub struct SettlementExecutor {
    store: Arc<dyn TipStore>,
    chain: Arc<dyn ChainClient>,
    blocklist: Arc<BlocklistManager>,
    config: ExecutorConfig,
}

impl SettlementExecutor {
    #[must_use]
    pub fn new(
        store: Arc<dyn TipStore>,
        chain: Arc<dyn ChainClient>,
        blocklist: Arc<BlocklistManager>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            chain,
            blocklist,
            config,
        }
    }

    /// Finalize batches a previous process left in flight.
    ///
    /// Submitted batches with a recorded tx_ref are replayed from their
    /// receipts. Batches that crashed before a tx_ref was recorded cannot
    /// be located on chain; they are marked failed and their reservations
    /// released, surfacing them for manual re-drive.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize, AppError> {
        let batches = self.store.get_unfinalized_batches().await?;
        let count = batches.len();

        if count == 0 {
            return Ok(0);
        }

        info!(count, "Recovering unfinalized settlement batches");

        for batch in batches {
            match (batch.status, batch.tx_ref.clone()) {
                (BatchStatus::Submitted, Some(tx_ref)) => {
                    match self
                        .chain
                        .wait_for_receipt(&tx_ref, self.config.receipt_timeout_secs)
                        .await
                    {
                        Ok(receipt) => {
                            if let Err(e) = self.finalize(&batch, &receipt).await {
                                error!(id = %batch.id, error = ?e, "Failed to finalize recovered batch");
                            }
                        }
                        Err(e) => {
                            warn!(id = %batch.id, tx_ref = %tx_ref, error = ?e, "Receipt still unavailable, leaving batch submitted");
                        }
                    }
                }
                _ => {
                    warn!(id = %batch.id, "Batch crashed before submission was recorded, marking failed");
                    self.fail_batch(&batch, "process exited before a tx_ref was recorded")
                        .await?;
                }
            }
        }

        Ok(count)
    }

    /// Settle one batch of intents end to end.
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn settle(&self, items: Vec<TipIntent>) -> Result<(), AppError> {
        if items.is_empty() {
            return Ok(());
        }

        let batch = SettlementBatch::new(items);
        self.store.insert_batch(&batch).await?;

        let tx_ref = match self.submit_with_backoff(&batch).await {
            Ok(tx_ref) => tx_ref,
            Err(e) => {
                warn!(id = %batch.id, error = ?e, "Submission exhausted retries");
                return self.fail_batch(&batch, &e.to_string()).await;
            }
        };

        self.store
            .update_batch_status(&batch.id, BatchStatus::Submitted, Some(&tx_ref), None)
            .await?;
        info!(id = %batch.id, tx_ref = %tx_ref, "Batch submitted");

        match self
            .chain
            .wait_for_receipt(&tx_ref, self.config.receipt_timeout_secs)
            .await
        {
            Ok(receipt) => self.finalize(&batch, &receipt).await,
            Err(e) => {
                // Leave the batch submitted; recovery will replay from the
                // receipt once it lands.
                warn!(id = %batch.id, tx_ref = %tx_ref, error = ?e, "Receipt not yet available");
                self.store
                    .update_batch_status(
                        &batch.id,
                        BatchStatus::Submitted,
                        Some(&tx_ref),
                        Some(&e.to_string()),
                    )
                    .await
            }
        }
    }

    async fn submit_with_backoff(&self, batch: &SettlementBatch) -> Result<String, AppError> {
        let mut last_error = None;

        for attempt in 0..MAX_SUBMIT_ATTEMPTS {
            if attempt > 0 {
                let backoff = calculate_backoff(attempt);
                warn!(id = %batch.id, attempt, backoff, "Retrying batch submission");
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }

            match self.chain.submit_batch(&batch.items).await {
                Ok(tx_ref) => return Ok(tx_ref),
                Err(e) => {
                    warn!(id = %batch.id, attempt, error = ?e, "Batch submission failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| AppError::Internal("submission failed without error".to_string())))
    }

    /// Apply a receipt's per-item outcomes.
    ///
    /// Confirmed items become tip history. Funding reverts insert blocklist
    /// entries so future admission stops repeating an on-chain failure the
    /// pipeline already paid gas to observe. Every non-paying item returns
    /// its reservation.
    async fn finalize(
        &self,
        batch: &SettlementBatch,
        receipt: &BatchReceipt,
    ) -> Result<(), AppError> {
        if receipt.status == ReceiptStatus::Failed {
            warn!(id = %batch.id, tx_ref = %receipt.tx_ref, "Transaction failed on chain");
            return self.fail_batch(batch, "transaction failed on chain").await;
        }

        let confirmed_at = chrono::Utc::now();
        let mut paid = 0usize;

        for (index, intent) in batch.items.iter().enumerate() {
            // A receipt shorter than the batch means the tail never executed
            let outcome = receipt
                .item_outcomes
                .get(index)
                .copied()
                .unwrap_or(ItemOutcome::Reverted);

            match outcome {
                ItemOutcome::Ok => {
                    self.store
                        .record_tip_history(&TipHistory {
                            from_address: intent.from_address.clone(),
                            to_address: intent.to_address.clone(),
                            token: intent.token.clone(),
                            amount: intent.amount,
                            kind: intent.kind,
                            tx_ref: receipt.tx_ref.clone(),
                            fingerprint: intent.fingerprint.as_str().to_string(),
                            confirmed_at,
                        })
                        .await?;
                    paid += 1;
                }
                ItemOutcome::InsufficientAllowance => {
                    self.revert_item(intent, BlockReason::InsufficientAllowance)
                        .await?;
                }
                ItemOutcome::InsufficientBalance => {
                    self.revert_item(intent, BlockReason::InsufficientBalance)
                        .await?;
                }
                ItemOutcome::Reverted => {
                    warn!(
                        from = %intent.from_address,
                        fingerprint = %intent.fingerprint,
                        "Item reverted, returning reservation"
                    );
                    self.store
                        .release_spend(intent.recipient_fid, intent.amount)
                        .await?;
                }
            }
        }

        self.store
            .update_batch_status(&batch.id, BatchStatus::Confirmed, Some(&receipt.tx_ref), None)
            .await?;

        info!(
            id = %batch.id,
            tx_ref = %receipt.tx_ref,
            paid,
            total = batch.items.len(),
            "Batch confirmed"
        );
        Ok(())
    }

    async fn revert_item(&self, intent: &TipIntent, reason: BlockReason) -> Result<(), AppError> {
        warn!(
            from = %intent.from_address,
            reason = %reason,
            "Item reverted for funding, blocklisting payer"
        );
        if let Err(e) = self.blocklist.insert(&intent.from_address, reason).await {
            warn!(error = ?e, "Failed to persist blocklist entry");
        }
        self.store
            .release_spend(intent.recipient_fid, intent.amount)
            .await
    }

    /// Terminal failure: return every reservation and record the batch as
    /// failed. Items are not re-admitted automatically; their fingerprints
    /// stay in the dedup store for a deliberate re-drive.
    async fn fail_batch(&self, batch: &SettlementBatch, error: &str) -> Result<(), AppError> {
        for intent in &batch.items {
            self.store
                .release_spend(intent.recipient_fid, intent.amount)
                .await?;
        }
        self.store
            .update_batch_status(&batch.id, BatchStatus::Failed, None, Some(error))
            .await?;
        warn!(id = %batch.id, items = batch.items.len(), error = %error, "Batch failed, items need manual re-drive");
        Ok(())
    }
}

/// Spawn the executor loop. Returns the join handle and a shutdown sender;
/// on shutdown the loop drains pending intents into one final flush.
pub fn spawn_executor(
    executor: Arc<SettlementExecutor>,
    mut intent_rx: mpsc::Receiver<TipIntent>,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let config = executor.config.clone();

    let handle = tokio::spawn(async move {
        info!(
            batch_size = config.batch_size,
            flush_interval_secs = config.flush_interval.as_secs(),
            "Settlement executor started"
        );

        let mut pending: Vec<TipIntent> = Vec::new();
        let mut ticker = tokio::time::interval(config.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        flush(&executor, &mut pending).await;
                    }
                }
                maybe_intent = intent_rx.recv() => {
                    match maybe_intent {
                        Some(intent) => {
                            pending.push(intent);
                            if pending.len() >= config.batch_size {
                                flush(&executor, &mut pending).await;
                                ticker.reset();
                            }
                        }
                        None => {
                            flush(&executor, &mut pending).await;
                            break;
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    // Drain whatever is already queued, then flush once
                    while let Ok(intent) = intent_rx.try_recv() {
                        pending.push(intent);
                    }
                    flush(&executor, &mut pending).await;
                    break;
                }
            }
        }

        info!("Settlement executor stopped");
    });

    (handle, shutdown_tx)
}

async fn flush(executor: &SettlementExecutor, pending: &mut Vec<TipIntent>) {
    let items = std::mem::take(pending);
    if items.is_empty() {
        return;
    }
    if let Err(e) = executor.settle(items).await {
        error!(error = ?e, "Failed to settle batch");
    }
}

/// Calculate exponential backoff with maximum cap
fn calculate_backoff(attempt: u32) -> u64 {
    let backoff = 2_u64.pow(attempt.min(8));
    backoff.min(MAX_BACKOFF_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InteractionFingerprint, InteractionKind};
    use crate::test_utils::{MockChainClient, MockTipStore};

    fn intent(fid: u64, amount: u64, fp: &str) -> TipIntent {
        TipIntent {
            recipient_fid: fid,
            from_address: format!("0xfrom{}", fid),
            to_address: "0xto".to_string(),
            token: "0xtoken".to_string(),
            amount,
            kind: InteractionKind::Like,
            fingerprint: InteractionFingerprint(fp.to_string()),
        }
    }

    fn executor(
        store: Arc<MockTipStore>,
        chain: Arc<MockChainClient>,
        blocklist: Arc<BlocklistManager>,
    ) -> SettlementExecutor {
        SettlementExecutor::new(store, chain, blocklist, ExecutorConfig::default())
    }

    #[test]
    fn test_calculate_backoff() {
        assert_eq!(calculate_backoff(0), 1);
        assert_eq!(calculate_backoff(1), 2);
        assert_eq!(calculate_backoff(2), 4);
        assert_eq!(calculate_backoff(3), 8);
        assert_eq!(calculate_backoff(6), 60); // Capped at MAX_BACKOFF_SECS
        assert_eq!(calculate_backoff(10), 60);
    }

    #[tokio::test]
    async fn test_settle_confirms_and_records_history() {
        let store = Arc::new(MockTipStore::new());
        let chain = Arc::new(MockChainClient::new());
        let blocklist = Arc::new(BlocklistManager::ephemeral());

        let exec = executor(Arc::clone(&store), Arc::clone(&chain), blocklist);
        exec.settle(vec![intent(1, 5, "fp_1"), intent(2, 3, "fp_2")])
            .await
            .unwrap();

        let history = store.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].amount, 5);
        assert_eq!(chain.submitted_batches().len(), 1);

        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].status, BatchStatus::Confirmed);
        assert!(batches[0].tx_ref.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_exhaustion_fails_batch_and_releases_spend() {
        let store = Arc::new(MockTipStore::new());
        store.seed_config(1, "0xfrom1", 100, 10);
        assert!(store.reserve_spend(1, 5).await.unwrap());

        let chain = Arc::new(MockChainClient::failing("nonce conflict"));
        let blocklist = Arc::new(BlocklistManager::ephemeral());

        let exec = executor(Arc::clone(&store), chain, blocklist);
        exec.settle(vec![intent(1, 5, "fp_1")]).await.unwrap();

        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].status, BatchStatus::Failed);
        assert!(store.history().is_empty());
        // Reservation returned
        assert_eq!(store.config(1).unwrap().total_spent, 0);
    }

    #[tokio::test]
    async fn test_funding_revert_blocklists_payer() {
        let store = Arc::new(MockTipStore::new());
        store.seed_config(1, "0xfrom1", 100, 10);
        assert!(store.reserve_spend(1, 5).await.unwrap());

        let chain = Arc::new(MockChainClient::new());
        chain.script_item_outcomes(vec![ItemOutcome::InsufficientAllowance]);
        let blocklist = Arc::new(BlocklistManager::ephemeral());

        let exec = executor(Arc::clone(&store), chain, Arc::clone(&blocklist));
        exec.settle(vec![intent(1, 5, "fp_1")]).await.unwrap();

        assert_eq!(
            blocklist.check("0xfrom1"),
            Some(BlockReason::InsufficientAllowance)
        );
        assert!(store.history().is_empty());
        assert_eq!(store.config(1).unwrap().total_spent, 0);

        // Batch itself still confirms; the revert is per item
        assert_eq!(store.batches()[0].status, BatchStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_partial_batch_mixes_outcomes() {
        let store = Arc::new(MockTipStore::new());
        store.seed_config(1, "0xfrom1", 100, 10);
        store.seed_config(2, "0xfrom2", 100, 10);
        assert!(store.reserve_spend(1, 5).await.unwrap());
        assert!(store.reserve_spend(2, 3).await.unwrap());

        let chain = Arc::new(MockChainClient::new());
        chain.script_item_outcomes(vec![ItemOutcome::Ok, ItemOutcome::InsufficientBalance]);
        let blocklist = Arc::new(BlocklistManager::ephemeral());

        let exec = executor(Arc::clone(&store), chain, Arc::clone(&blocklist));
        exec.settle(vec![intent(1, 5, "fp_1"), intent(2, 3, "fp_2")])
            .await
            .unwrap();

        let history = store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].fingerprint, "fp_1");
        assert_eq!(store.config(1).unwrap().total_spent, 5);
        assert_eq!(store.config(2).unwrap().total_spent, 0);
        assert_eq!(
            blocklist.check("0xfrom2"),
            Some(BlockReason::InsufficientBalance)
        );
    }

    #[tokio::test]
    async fn test_recover_finalizes_submitted_batch_from_receipt() {
        let store = Arc::new(MockTipStore::new());
        let chain = Arc::new(MockChainClient::new());
        let blocklist = Arc::new(BlocklistManager::ephemeral());

        // A batch a previous process submitted but never finalized
        let mut batch = SettlementBatch::new(vec![intent(1, 5, "fp_1")]);
        batch.status = BatchStatus::Submitted;
        batch.tx_ref = Some("tx_recovered".to_string());
        store.insert_batch(&batch).await.unwrap();

        let exec = executor(Arc::clone(&store), chain, blocklist);
        let recovered = exec.recover().await.unwrap();
        assert_eq!(recovered, 1);

        let history = store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].tx_ref, "tx_recovered");
        assert_eq!(store.batches()[0].status, BatchStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_recover_fails_batch_without_tx_ref() {
        let store = Arc::new(MockTipStore::new());
        store.seed_config(1, "0xfrom1", 100, 10);
        assert!(store.reserve_spend(1, 5).await.unwrap());

        let chain = Arc::new(MockChainClient::new());
        let blocklist = Arc::new(BlocklistManager::ephemeral());

        let batch = SettlementBatch::new(vec![intent(1, 5, "fp_1")]);
        store.insert_batch(&batch).await.unwrap();

        let exec = executor(Arc::clone(&store), chain, blocklist);
        exec.recover().await.unwrap();

        assert_eq!(store.batches()[0].status, BatchStatus::Failed);
        assert_eq!(store.config(1).unwrap().total_spent, 0);
    }
}
