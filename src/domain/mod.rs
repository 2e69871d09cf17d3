//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;
pub mod webhook;

pub use error::{AppError, ChainError, ConfigError, DatabaseError, ValidationError};
pub use traits::{ChainClient, TipStore};
pub use types::{
    BatchReceipt, BatchStatus, BlockReason, BlocklistEntry, ErrorDetail, ErrorResponse,
    FingerprintAdmission, HealthResponse, HealthStatus, InteractionEvent, InteractionFingerprint,
    InteractionKind, ItemOutcome, PaginatedResponse, PaginationParams, PipelineOutcome,
    RateLimitResponse, ReceiptStatus, SettlementBatch, SkipReason, TipHistory, TipIntent,
    TippingConfig, WebhookAck,
};
pub use webhook::{WebhookEnvelope, normalize};
