//! Domain types for the tip settlement pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use validator::Validate;

/// Kind of social interaction that can earn a tip
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Like,
    Reply,
    Recast,
    Quote,
    Follow,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Reply => "reply",
            Self::Recast => "recast",
            Self::Quote => "quote",
            Self::Follow => "follow",
        }
    }
}

impl std::str::FromStr for InteractionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(Self::Like),
            "reply" => Ok(Self::Reply),
            "recast" => Ok(Self::Recast),
            "quote" => Ok(Self::Quote),
            "follow" => Ok(Self::Follow),
            _ => Err(format!("Invalid interaction kind: {}", s)),
        }
    }
}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical interaction event, immutable once constructed.
///
/// `recipient_fid`/`interactor_fid` are stable social identifiers, not wallet
/// addresses. The resolved addresses ride along when the provider supplied
/// verified wallets for both parties; an event missing either address is
/// still valid but must short-circuit downstream as `Skipped(NoAddress)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionEvent {
    pub kind: InteractionKind,
    pub recipient_fid: u64,
    pub interactor_fid: u64,
    /// Opaque content reference; empty for follows
    pub cast_ref: String,
    pub occurred_at: DateTime<Utc>,
    pub recipient_address: Option<String>,
    pub interactor_address: Option<String>,
}

impl InteractionEvent {
    /// True when either party lacks a verified wallet address.
    #[must_use]
    pub fn is_unaddressable(&self) -> bool {
        self.recipient_address.is_none() || self.interactor_address.is_none()
    }

    /// Deterministic digest identifying this physical interaction.
    #[must_use]
    pub fn fingerprint(&self) -> InteractionFingerprint {
        InteractionFingerprint::digest(
            self.recipient_fid,
            self.interactor_fid,
            self.kind,
            &self.cast_ref,
            self.occurred_at,
        )
    }
}

/// Write-once idempotency key derived from the interaction's identity fields.
///
/// Two events with equal fingerprints are the same physical interaction,
/// regardless of arrival order or transport retries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub struct InteractionFingerprint(pub String);

impl InteractionFingerprint {
    #[must_use]
    pub fn digest(
        recipient_fid: u64,
        interactor_fid: u64,
        kind: InteractionKind,
        cast_ref: &str,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(recipient_fid.to_be_bytes());
        hasher.update(interactor_fid.to_be_bytes());
        hasher.update(kind.as_str().as_bytes());
        hasher.update(cast_ref.as_bytes());
        hasher.update(occurred_at.timestamp().to_be_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InteractionFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of the dedup store's atomic insert-if-absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintAdmission {
    /// First delivery of this interaction
    Accepted,
    /// Already seen; the caller must not tip again
    Duplicate,
}

/// Reasons an event was dropped before settlement.
///
/// These are outcomes, not errors: they are recorded for observability and
/// reported in the webhook acknowledgement, and never fail the request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoConfig,
    ZeroAmount,
    NoAddress,
    OverLimit,
    Blocked,
    Transient,
    SubmissionFailed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoConfig => "no_config",
            Self::ZeroAmount => "zero_amount",
            Self::NoAddress => "no_address",
            Self::OverLimit => "over_limit",
            Self::Blocked => "blocked",
            Self::Transient => "transient",
            Self::SubmissionFailed => "submission_failed",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of running one event through the settlement pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Admitted and handed to the settlement executor
    Queued(InteractionFingerprint),
    /// Same physical interaction already admitted
    Duplicate,
    /// Recognized but dropped
    Skipped(SkipReason),
}

impl PipelineOutcome {
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

/// Per-recipient tipping configuration.
///
/// `total_spent` is mutated only through the store's conditional reserve and
/// release operations, which is what keeps `total_spent <= spending_limit`
/// true at every observation point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct TippingConfig {
    pub recipient_fid: u64,
    /// Verified wallet address paying the tips
    pub address: String,
    pub payout_token: String,
    pub amount_like: u64,
    pub amount_reply: u64,
    pub amount_recast: u64,
    pub amount_quote: u64,
    pub amount_follow: u64,
    pub spending_limit: u64,
    pub total_spent: u64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TippingConfig {
    /// Configured tip amount for one interaction kind
    #[must_use]
    pub fn amount_for(&self, kind: InteractionKind) -> u64 {
        match kind {
            InteractionKind::Like => self.amount_like,
            InteractionKind::Reply => self.amount_reply,
            InteractionKind::Recast => self.amount_recast,
            InteractionKind::Quote => self.amount_quote,
            InteractionKind::Follow => self.amount_follow,
        }
    }

    /// Smallest nonzero per-kind amount, or zero if nothing is configured.
    /// Used by reconciliation as the funding threshold for unblocking.
    #[must_use]
    pub fn smallest_nonzero_amount(&self) -> u64 {
        [
            self.amount_like,
            self.amount_reply,
            self.amount_recast,
            self.amount_quote,
            self.amount_follow,
        ]
        .into_iter()
        .filter(|a| *a > 0)
        .min()
        .unwrap_or(0)
    }
}

/// Why an address is blocklisted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    InsufficientAllowance,
    InsufficientBalance,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientAllowance => "insufficient_allowance",
            Self::InsufficientBalance => "insufficient_balance",
        }
    }
}

impl std::str::FromStr for BlockReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insufficient_allowance" => Ok(Self::InsufficientAllowance),
            "insufficient_balance" => Ok(Self::InsufficientBalance),
            _ => Err(format!("Invalid block reason: {}", s)),
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One blocklisted account: a cached derived fact, never ledger state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct BlocklistEntry {
    pub address: String,
    pub reason: BlockReason,
    pub last_checked_at: DateTime<Utc>,
}

/// Fully resolved, admission-checked unit of work for the executor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TipIntent {
    pub recipient_fid: u64,
    pub from_address: String,
    pub to_address: String,
    pub token: String,
    pub amount: u64,
    pub kind: InteractionKind,
    pub fingerprint: InteractionFingerprint,
}

/// Status of a settlement batch on its way to the chain
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Persisted, not yet handed to the chain service
    #[default]
    Pending,
    /// Transaction submitted, awaiting receipt
    Submitted,
    /// Receipt obtained, per-item outcomes applied
    Confirmed,
    /// Submission exhausted retries, or crashed before a tx_ref was recorded
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "submitted" => Ok(Self::Submitted),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid batch status: {}", s)),
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered group of admitted tips submitted as one on-chain transaction.
/// The batch is the unit of on-chain retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettlementBatch {
    pub id: String,
    pub items: Vec<TipIntent>,
    pub status: BatchStatus,
    pub tx_ref: Option<String>,
    pub last_error: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SettlementBatch {
    #[must_use]
    pub fn new(items: Vec<TipIntent>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            items,
            status: BatchStatus::Pending,
            tx_ref: None,
            last_error: None,
            submitted_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Per-item outcome reported by the payout contract within one batch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Ok,
    InsufficientAllowance,
    InsufficientBalance,
    Reverted,
}

/// Confirmation status carried by a batch receipt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Transaction receipt for a submitted batch.
///
/// The receipt is the durable source of truth for which intents actually
/// paid; finalization can be replayed from it after a crash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchReceipt {
    pub tx_ref: String,
    pub status: ReceiptStatus,
    /// Aligned with the submitted item order
    pub item_outcomes: Vec<ItemOutcome>,
}

/// One confirmed transfer, recorded per item at batch confirmation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct TipHistory {
    pub from_address: String,
    pub to_address: String,
    pub token: String,
    pub amount: u64,
    pub kind: InteractionKind,
    pub tx_ref: String,
    pub fingerprint: String,
    pub confirmed_at: DateTime<Utc>,
}

/// Webhook acknowledgement body.
///
/// `success` reflects the request, not the interaction: a recognized event
/// that was skipped or deduplicated still acknowledges with success so the
/// provider stops retrying.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub success: bool,
    /// Whether the payload mapped to a tippable interaction at all
    pub processed: bool,
    /// Whether the interaction was admitted to settlement
    pub queued: bool,
    #[schema(example = "like")]
    pub interaction_type: String,
    /// queued | duplicate | skipped:<reason> | ignored
    #[schema(example = "queued")]
    pub outcome: String,
}

/// Pagination parameters for list requests
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PaginationParams {
    /// Maximum number of items to return (1-100, default: 20)
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    #[serde(default = "default_limit")]
    #[schema(example = 20)]
    pub limit: i64,
    /// Cursor for pagination (row id to start after)
    pub cursor: Option<String>,
}

fn default_limit() -> i64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            cursor: None,
        }
    }
}

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T: ToSchema> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl<T: ToSchema> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>, has_more: bool) -> Self {
        Self {
            items,
            next_cursor,
            has_more,
        }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub chain: HealthStatus,
    pub timestamp: DateTime<Utc>,
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus, chain: HealthStatus) -> Self {
        let status = match (&database, &chain) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            chain,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    #[schema(example = "authentication_error")]
    pub r#type: String,
    #[schema(example = "Missing webhook signature")]
    pub message: String,
}

/// Rate limit exceeded response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RateLimitResponse {
    pub error: ErrorDetail,
    /// Seconds until rate limit resets
    #[schema(example = 60)]
    pub retry_after: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn sample_config() -> TippingConfig {
        let now = Utc::now();
        TippingConfig {
            recipient_fid: 42,
            address: "0xaaaa".to_string(),
            payout_token: "0xt0ken".to_string(),
            amount_like: 2,
            amount_reply: 5,
            amount_recast: 3,
            amount_quote: 4,
            amount_follow: 0,
            spending_limit: 100,
            total_spent: 0,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_interaction_kind_display_and_parsing() {
        let kinds = vec![
            (InteractionKind::Like, "like"),
            (InteractionKind::Reply, "reply"),
            (InteractionKind::Recast, "recast"),
            (InteractionKind::Quote, "quote"),
            (InteractionKind::Follow, "follow"),
        ];

        for (kind, string) in kinds {
            assert_eq!(kind.as_str(), string);
            assert_eq!(kind.to_string(), string);
            assert_eq!(InteractionKind::from_str(string).unwrap(), kind);
        }

        assert!(InteractionKind::from_str("upvote").is_err());
    }

    #[test]
    fn test_batch_status_display_and_parsing() {
        let statuses = vec![
            (BatchStatus::Pending, "pending"),
            (BatchStatus::Submitted, "submitted"),
            (BatchStatus::Confirmed, "confirmed"),
            (BatchStatus::Failed, "failed"),
        ];

        for (status, string) in statuses {
            assert_eq!(status.as_str(), string);
            assert_eq!(status.to_string(), string);
            assert_eq!(BatchStatus::from_str(string).unwrap(), status);
        }

        assert!(BatchStatus::from_str("invalid").is_err());
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let at = Utc.timestamp_opt(100, 0).unwrap();
        let a = InteractionFingerprint::digest(1, 2, InteractionKind::Like, "0xabc", at);
        let b = InteractionFingerprint::digest(1, 2, InteractionKind::Like, "0xabc", at);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_any_identity_field() {
        let at = Utc.timestamp_opt(100, 0).unwrap();
        let base = InteractionFingerprint::digest(1, 2, InteractionKind::Like, "0xabc", at);

        assert_ne!(
            base,
            InteractionFingerprint::digest(9, 2, InteractionKind::Like, "0xabc", at)
        );
        assert_ne!(
            base,
            InteractionFingerprint::digest(1, 9, InteractionKind::Like, "0xabc", at)
        );
        assert_ne!(
            base,
            InteractionFingerprint::digest(1, 2, InteractionKind::Recast, "0xabc", at)
        );
        assert_ne!(
            base,
            InteractionFingerprint::digest(1, 2, InteractionKind::Like, "0xdef", at)
        );
        assert_ne!(
            base,
            InteractionFingerprint::digest(
                1,
                2,
                InteractionKind::Like,
                "0xabc",
                Utc.timestamp_opt(101, 0).unwrap()
            )
        );
    }

    #[test]
    fn test_amount_for_each_kind() {
        let config = sample_config();
        assert_eq!(config.amount_for(InteractionKind::Like), 2);
        assert_eq!(config.amount_for(InteractionKind::Reply), 5);
        assert_eq!(config.amount_for(InteractionKind::Recast), 3);
        assert_eq!(config.amount_for(InteractionKind::Quote), 4);
        assert_eq!(config.amount_for(InteractionKind::Follow), 0);
    }

    #[test]
    fn test_smallest_nonzero_amount_skips_zeroes() {
        let config = sample_config();
        assert_eq!(config.smallest_nonzero_amount(), 2);

        let mut empty = config.clone();
        empty.amount_like = 0;
        empty.amount_reply = 0;
        empty.amount_recast = 0;
        empty.amount_quote = 0;
        assert_eq!(empty.smallest_nonzero_amount(), 0);
    }

    #[test]
    fn test_unaddressable_event_detection() {
        let mut event = InteractionEvent {
            kind: InteractionKind::Like,
            recipient_fid: 1,
            interactor_fid: 2,
            cast_ref: "0xabc".to_string(),
            occurred_at: Utc::now(),
            recipient_address: Some("0xaaaa".to_string()),
            interactor_address: Some("0xbbbb".to_string()),
        };
        assert!(!event.is_unaddressable());

        event.interactor_address = None;
        assert!(event.is_unaddressable());
    }

    #[test]
    fn test_health_response_aggregation() {
        let resp = HealthResponse::new(HealthStatus::Healthy, HealthStatus::Healthy);
        assert_eq!(resp.status, HealthStatus::Healthy);

        let resp = HealthResponse::new(HealthStatus::Healthy, HealthStatus::Unhealthy);
        assert_eq!(resp.status, HealthStatus::Unhealthy);

        let resp = HealthResponse::new(HealthStatus::Degraded, HealthStatus::Healthy);
        assert_eq!(resp.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_settlement_batch_serialization_roundtrip() {
        let batch = SettlementBatch::new(vec![TipIntent {
            recipient_fid: 42,
            from_address: "0xaaaa".to_string(),
            to_address: "0xbbbb".to_string(),
            token: "0xt0ken".to_string(),
            amount: 5,
            kind: InteractionKind::Reply,
            fingerprint: InteractionFingerprint("fp".to_string()),
        }]);

        let json = serde_json::to_string(&batch).unwrap();
        let deserialized: SettlementBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.items.len(), 1);
        assert_eq!(deserialized.status, BatchStatus::Pending);
        assert_eq!(deserialized.items[0].amount, 5);
    }
}
