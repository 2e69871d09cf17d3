//! Application service running one event through the settlement pipeline.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    AppError, ChainClient, FingerprintAdmission, HealthResponse, HealthStatus, InteractionEvent,
    InteractionFingerprint, PipelineOutcome, SkipReason, TipIntent, TipStore,
};

use super::admission::{Admission, AdmissionController, RejectReason};

/// Runs the event pipeline: dedup, config resolution, admission, and
/// hand-off to the settlement executor.
pub struct TipService {
    store: Arc<dyn TipStore>,
    chain: Arc<dyn ChainClient>,
    admission: Arc<AdmissionController>,
    intent_tx: mpsc::Sender<TipIntent>,
}

impl TipService {
    #[must_use]
    pub fn new(
        store: Arc<dyn TipStore>,
        chain: Arc<dyn ChainClient>,
        admission: Arc<AdmissionController>,
        intent_tx: mpsc::Sender<TipIntent>,
    ) -> Self {
        Self {
            store,
            chain,
            admission,
            intent_tx,
        }
    }

    /// Process one normalized interaction event.
    ///
    /// Every outcome here is an acknowledgeable result, not an error:
    /// duplicates and skips are part of normal operation. Errors surface
    /// only for infrastructure failures the caller should report as 500.
    #[instrument(
        skip(self, event),
        fields(
            kind = %event.kind,
            recipient = event.recipient_fid,
            interactor = event.interactor_fid,
        )
    )]
    pub async fn process_event(
        &self,
        event: &InteractionEvent,
    ) -> Result<PipelineOutcome, AppError> {
        // Unaddressable events are valid but can never settle; skip before
        // consuming a dedup slot.
        if event.is_unaddressable() {
            debug!("Skipping event without verified addresses");
            return Ok(PipelineOutcome::Skipped(SkipReason::NoAddress));
        }

        let fingerprint = event.fingerprint();
        if self.store.admit_fingerprint(&fingerprint).await? == FingerprintAdmission::Duplicate {
            debug!(fingerprint = %fingerprint, "Duplicate delivery");
            return Ok(PipelineOutcome::Duplicate);
        }

        // The fingerprint is claimed from here on. Any failure before the
        // intent reaches settlement must give it back; otherwise the
        // provider's retry of a 500 would read as a duplicate of a tip
        // that never happened.
        match self.admit_and_enqueue(event, &fingerprint).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(forget_err) = self.store.forget_fingerprint(&fingerprint).await {
                    warn!(
                        fingerprint = %fingerprint,
                        error = ?forget_err,
                        "Failed to return fingerprint after pipeline error"
                    );
                }
                Err(e)
            }
        }
    }

    /// Pipeline stages that run after the fingerprint has been claimed.
    async fn admit_and_enqueue(
        &self,
        event: &InteractionEvent,
        fingerprint: &InteractionFingerprint,
    ) -> Result<PipelineOutcome, AppError> {
        let Some(config) = self.store.get_tipping_config(event.recipient_fid).await? else {
            debug!("Recipient has no tipping config");
            return Ok(PipelineOutcome::Skipped(SkipReason::NoConfig));
        };
        if !config.active {
            debug!("Recipient's tipping config is inactive");
            return Ok(PipelineOutcome::Skipped(SkipReason::NoConfig));
        }

        let amount = config.amount_for(event.kind);
        if amount == 0 {
            debug!("No tip amount configured for this kind");
            return Ok(PipelineOutcome::Skipped(SkipReason::ZeroAmount));
        }

        // Pre-check on the read snapshot; the conditional reserve below is
        // the actual decision point.
        if config.total_spent + amount > config.spending_limit {
            debug!(
                total_spent = config.total_spent,
                spending_limit = config.spending_limit,
                amount,
                "Spending limit reached"
            );
            return Ok(PipelineOutcome::Skipped(SkipReason::OverLimit));
        }

        match self
            .admission
            .admit(&config.address, &config.payout_token, amount)
            .await
        {
            Admission::Admit => {}
            Admission::Reject(RejectReason::Blocked(reason)) => {
                debug!(reason = %reason, "Payer rejected by admission");
                return Ok(PipelineOutcome::Skipped(SkipReason::Blocked));
            }
            Admission::Reject(RejectReason::Transient) => {
                // Retryable: give the fingerprint back so the provider's
                // redelivery is not misread as a duplicate.
                self.store.forget_fingerprint(fingerprint).await?;
                return Ok(PipelineOutcome::Skipped(SkipReason::Transient));
            }
        }

        if !self.store.reserve_spend(event.recipient_fid, amount).await? {
            debug!("Reservation refused by spending limit");
            return Ok(PipelineOutcome::Skipped(SkipReason::OverLimit));
        }

        let intent = TipIntent {
            recipient_fid: event.recipient_fid,
            // Recipient of the interaction pays; interactor receives
            from_address: config.address.clone(),
            to_address: event
                .interactor_address
                .clone()
                .unwrap_or_default(),
            token: config.payout_token.clone(),
            amount,
            kind: event.kind,
            fingerprint: fingerprint.clone(),
        };

        if let Err(e) = self.intent_tx.send(intent).await {
            warn!(error = %e, "Settlement executor unavailable, rolling back");
            self.store
                .release_spend(event.recipient_fid, amount)
                .await?;
            self.store.forget_fingerprint(fingerprint).await?;
            return Ok(PipelineOutcome::Skipped(SkipReason::Transient));
        }

        info!(fingerprint = %fingerprint, amount, "Tip admitted for settlement");
        Ok(PipelineOutcome::Queued(fingerprint.clone()))
    }

    /// Perform health check on all dependencies
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let db_health = match self.store.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        let chain_health = match self.chain.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        HealthResponse::new(db_health, chain_health)
    }
}
