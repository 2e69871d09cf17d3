//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use secrecy::ExposeSecret;
use tracing::{error, info};
use utoipa::OpenApi;

use crate::app::AppState;
use crate::domain::{
    AppError, BlocklistEntry, ChainError, DatabaseError, ErrorDetail, ErrorResponse,
    HealthResponse, HealthStatus, PaginatedResponse, PaginationParams, PipelineOutcome,
    RateLimitResponse, TipHistory, TippingConfig, ValidationError, WebhookAck, normalize,
};

use super::signature;

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tipcast Relayer API",
        version = "0.1.0",
        description = "Settles social interaction events into batched on-chain tips",
        license(name = "MIT")
    ),
    paths(
        health_check_handler,
        liveness_handler,
        readiness_handler,
        crate::api::admin::list_blocklist_handler,
        crate::api::admin::clear_blocklist_handler,
        crate::api::admin::remove_blocklist_handler,
        crate::api::admin::get_config_handler,
        crate::api::admin::list_history_handler,
    ),
    components(
        schemas(
            WebhookAck,
            HealthResponse,
            HealthStatus,
            BlocklistEntry,
            TippingConfig,
            TipHistory,
            PaginationParams,
            PaginatedResponse<TipHistory>,
            ErrorResponse,
            ErrorDetail,
            RateLimitResponse,
        )
    ),
    tags(
        (name = "webhook", description = "Inbound interaction events"),
        (name = "health", description = "Health check endpoints"),
        (name = "admin", description = "Operational endpoints, not on the hot path")
    )
)]
pub struct ApiDoc;

/// Handle a signed interaction webhook.
///
/// The raw body is needed for HMAC verification, so this handler takes
/// `Bytes` and parses JSON itself. The response acknowledges receipt for
/// every recognized, authenticated request; interaction-level outcomes
/// (skipped, blocked, queued) are informational and never fail the
/// acknowledgement. Settlement happens after this response.
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let secret = state.webhook_secret.as_ref().ok_or_else(|| {
        AppError::Authentication("Webhook secret is not configured".to_string())
    })?;

    let provided = headers
        .get(signature::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Authentication("Missing webhook signature".to_string()))?;

    if !signature::verify(secret.expose_secret(), &body, provided) {
        return Err(AppError::Authentication(
            "Invalid webhook signature".to_string(),
        ));
    }

    let envelope = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(ValidationError::Malformed(e.to_string())))?;

    let Some(event) = normalize(&envelope)? else {
        return Ok(Json(WebhookAck {
            success: true,
            processed: false,
            queued: false,
            interaction_type: envelope.event_type,
            outcome: "ignored".to_string(),
        }));
    };

    let interaction_type = event.kind.to_string();
    let outcome = state.service.process_event(&event).await?;

    let (queued, outcome_str) = match &outcome {
        PipelineOutcome::Queued(_) => (true, "queued".to_string()),
        PipelineOutcome::Duplicate => (false, "duplicate".to_string()),
        PipelineOutcome::Skipped(reason) => (false, format!("skipped:{}", reason)),
    };

    info!(
        interaction_type = %interaction_type,
        outcome = %outcome_str,
        "Webhook processed"
    );

    Ok(Json(WebhookAck {
        success: true,
        processed: true,
        queued,
        interaction_type,
        outcome: outcome_str,
    }))
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::Chain(chain_err) => match chain_err {
                ChainError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "chain_error",
                    self.to_string(),
                ),
                ChainError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "chain_error",
                    self.to_string(),
                ),
            },
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                self.to_string(),
            ),
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                self.to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
            AppError::NotSupported(_) => (
                StatusCode::NOT_IMPLEMENTED,
                "not_supported",
                self.to_string(),
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Rate limit exceeded".to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
