//! Admission controller: decides whether a recipient's account may pay.
//!
//! Implements a "fast fail, cache first" hierarchy:
//! 1. Fast path: blocklist cache hit rejects immediately, no chain call.
//!    This is what bounds the rate of chain reads under bursty webhook
//!    traffic.
//! 2. Slow path: re-verify allowance and balance against the payout
//!    contract's spender. A stale "admit" memory is never trusted; only the
//!    negative verdict is cached.
//!
//! Chain reads run under a short deadline and fail closed: a timeout or RPC
//! error rejects as transient rather than admitting an account that may not
//! be able to pay.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::domain::{AppError, BlockReason, ChainClient};
use crate::infra::BlocklistManager;

/// Default deadline for admission-path chain reads
pub const DEFAULT_CHAIN_READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Admission controller configuration
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Spender address of the payout contract, the party users approve
    pub spender_address: String,
    /// Deadline for the slow path's allowance/balance reads
    pub chain_read_timeout: Duration,
}

impl AdmissionConfig {
    #[must_use]
    pub fn new(spender_address: impl Into<String>) -> Self {
        Self {
            spender_address: spender_address.into(),
            chain_read_timeout: DEFAULT_CHAIN_READ_TIMEOUT,
        }
    }
}

/// Admission verdict for one candidate tip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Reject(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Account known (or just verified) to lack funding
    Blocked(BlockReason),
    /// Chain state could not be verified in time; fail closed
    Transient,
}

/// Decides payer eligibility using the blocklist cache and chain reads
pub struct AdmissionController {
    chain: Arc<dyn ChainClient>,
    blocklist: Arc<BlocklistManager>,
    config: AdmissionConfig,
}

impl AdmissionController {
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        blocklist: Arc<BlocklistManager>,
        config: AdmissionConfig,
    ) -> Self {
        Self {
            chain,
            blocklist,
            config,
        }
    }

    /// Check whether `payer` can fund a tip of `required` units of `token`.
    ///
    /// Blocklist entries are pessimistic: a false block is acceptable and
    /// repaired by reconciliation, a false admit must not occur. Only
    /// insufficient allowance inserts a blocklist entry here; balance is
    /// expected to fluctuate on its own, while allowance only changes by an
    /// explicit user action, so caching a balance verdict would go stale
    /// for no reason.
    #[instrument(skip(self), fields(payer = %payer, required = required))]
    pub async fn admit(&self, payer: &str, token: &str, required: u64) -> Admission {
        // Fast path
        if let Some(reason) = self.blocklist.check(payer) {
            debug!(reason = %reason, "Rejected from blocklist cache");
            return Admission::Reject(RejectReason::Blocked(reason));
        }

        // Slow path: re-derive from the chain
        let allowance = match self.read_chain(self.chain.allowance(
            payer,
            &self.config.spender_address,
            token,
        ))
        .await
        {
            Some(allowance) => allowance,
            None => return Admission::Reject(RejectReason::Transient),
        };

        if allowance < required {
            warn!(allowance, required, "Insufficient allowance, blocklisting");
            if let Err(e) = self
                .blocklist
                .insert(payer, BlockReason::InsufficientAllowance)
                .await
            {
                warn!(error = ?e, "Failed to persist blocklist entry");
            }
            return Admission::Reject(RejectReason::Blocked(BlockReason::InsufficientAllowance));
        }

        let balance = match self.read_chain(self.chain.balance_of(payer, token)).await {
            Some(balance) => balance,
            None => return Admission::Reject(RejectReason::Transient),
        };

        if balance < required {
            debug!(balance, required, "Insufficient balance, rejecting without caching");
            return Admission::Reject(RejectReason::Blocked(BlockReason::InsufficientBalance));
        }

        Admission::Admit
    }

    async fn read_chain(
        &self,
        fut: impl std::future::Future<Output = Result<u64, AppError>>,
    ) -> Option<u64> {
        match tokio::time::timeout(self.config.chain_read_timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(error = ?e, "Chain read failed, failing closed");
                None
            }
            Err(_) => {
                warn!("Chain read timed out, failing closed");
                None
            }
        }
    }
}
