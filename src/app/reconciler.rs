//! Reconciliation worker: repairs blocklist staleness on a fixed cadence.
//!
//! Blocklist entries are pessimistic caches; accounts that topped up their
//! allowance stay blocked until this worker re-checks them. An entry is
//! removed exactly when a fresh read of the quantity it was blocked on
//! (allowance or balance, per the entry's reason) covers the account's
//! current smallest configured tip, or when the account no longer has an
//! active config (nothing left to protect). A low balance never retains an
//! allowance entry: balance verdicts are not cached anywhere, admission
//! re-verifies them per event. The same cadence prunes dedup fingerprints
//! past their retention window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::domain::{AppError, BlockReason, BlocklistEntry, ChainClient, TipStore};
use crate::infra::BlocklistManager;

/// Reconciliation worker configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Cadence between reconciliation passes
    pub interval: Duration,
    /// Dedup fingerprints older than this are pruned. Must span the
    /// provider's retry window: pruning too early is the one staleness bug
    /// this cache can cause, a double tip.
    pub fingerprint_retention_days: i64,
    pub enabled: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            fingerprint_retention_days: 7,
            enabled: true,
        }
    }
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub removed: usize,
    pub retained: usize,
    pub pruned_fingerprints: u64,
}

/// Periodically re-verifies blocklisted accounts against the chain
pub struct ReconciliationWorker {
    store: Arc<dyn TipStore>,
    chain: Arc<dyn ChainClient>,
    blocklist: Arc<BlocklistManager>,
    spender_address: String,
    config: ReconcilerConfig,
}

impl ReconciliationWorker {
    #[must_use]
    pub fn new(
        store: Arc<dyn TipStore>,
        chain: Arc<dyn ChainClient>,
        blocklist: Arc<BlocklistManager>,
        spender_address: impl Into<String>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            chain,
            blocklist,
            spender_address: spender_address.into(),
            config,
        }
    }

    /// Run a single reconciliation pass over the blocklist snapshot.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<ReconcileSummary, AppError> {
        let mut summary = ReconcileSummary::default();

        for entry in self.blocklist.snapshot() {
            match self.reconcile_entry(&entry).await {
                Ok(true) => summary.removed += 1,
                Ok(false) => summary.retained += 1,
                Err(e) => {
                    warn!(address = %entry.address, error = ?e, "Failed to reconcile blocklist entry");
                    summary.retained += 1;
                }
            }
        }

        let cutoff = Utc::now() - chrono::Duration::days(self.config.fingerprint_retention_days);
        summary.pruned_fingerprints = self.store.prune_fingerprints(cutoff).await?;
        if summary.pruned_fingerprints > 0 {
            // An interaction redelivered after its fingerprint is pruned
            // would tip a second time; retention must outlive provider
            // retries.
            warn!(
                pruned = summary.pruned_fingerprints,
                retention_days = self.config.fingerprint_retention_days,
                "Pruned dedup fingerprints past retention"
            );
        }

        if summary.removed > 0 || summary.retained > 0 {
            info!(
                removed = summary.removed,
                retained = summary.retained,
                "Blocklist reconciliation pass complete"
            );
        }

        Ok(summary)
    }

    /// Returns `true` when the entry was removed.
    ///
    /// Only the quantity the entry was blocked on is re-checked: an
    /// allowance entry unblocks once allowance is restored even if the
    /// balance is currently low, since balance shortfalls are never cached
    /// and admission re-verifies them per event.
    async fn reconcile_entry(&self, entry: &BlocklistEntry) -> Result<bool, AppError> {
        let address = entry.address.as_str();

        let Some(config) = self.store.get_config_by_address(address).await? else {
            // No config left to protect
            self.blocklist.remove(address).await?;
            return Ok(true);
        };

        if !config.active {
            self.blocklist.remove(address).await?;
            return Ok(true);
        }

        let required = config.smallest_nonzero_amount();
        if required == 0 {
            self.blocklist.remove(address).await?;
            return Ok(true);
        }

        let sufficient = match entry.reason {
            BlockReason::InsufficientAllowance => {
                self.chain
                    .allowance(address, &self.spender_address, &config.payout_token)
                    .await?
                    >= required
            }
            BlockReason::InsufficientBalance => {
                self.chain.balance_of(address, &config.payout_token).await? >= required
            }
        };

        if sufficient {
            self.blocklist.remove(address).await?;
            Ok(true)
        } else {
            self.blocklist.touch(address).await?;
            Ok(false)
        }
    }
}

/// Spawn the reconciliation loop with a shutdown channel.
pub fn spawn_reconciler(
    worker: Arc<ReconciliationWorker>,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let interval = worker.config.interval;

    let handle = tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            "Reconciliation worker started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a restart loop does
        // not hammer the chain.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = worker.run_once().await {
                        error!(error = ?e, "Reconciliation pass failed");
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }

        info!("Reconciliation worker stopped");
    });

    (handle, shutdown_tx)
}
