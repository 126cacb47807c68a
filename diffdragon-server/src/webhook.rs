//! HTTP surface: the pull-request webhook endpoint and a health check.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use diffdragon_core::signature::SIGNATURE_HEADER;
use diffdragon_core::{CorrelationId, Direction, EventType, RecordedEvent, Sanitizer};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, Instrument};

use crate::pipeline::ReviewStatus;
use crate::AppState;

pub const WEBHOOK_PATH: &str = "/webhooks/pr-created";

/// GitHub caps webhook payloads at 25 MB.
const MAX_PAYLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(WEBHOOK_PATH, post(pr_webhook_handler))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "diffdragon"
    }))
}

pub fn status_code_for(status: ReviewStatus) -> StatusCode {
    match status {
        ReviewStatus::InvalidSignature => StatusCode::UNAUTHORIZED,
        ReviewStatus::MissingInstallation | ReviewStatus::MalformedPayload => {
            StatusCode::BAD_REQUEST
        }
        ReviewStatus::Ok
        | ReviewStatus::Ignored
        | ReviewStatus::Disabled
        | ReviewStatus::AlreadyReviewed
        | ReviewStatus::NoFilesToReview => StatusCode::OK,
    }
}

/// Runs the review for one delivery before responding, so the response
/// carries the outcome.
async fn pr_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    let correlation_id = CorrelationId::generate();
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if let Some(ref logger) = state.recording_logger {
        if state.pipeline.is_authentic(&body, signature) {
            let payload = serde_json::from_slice::<serde_json::Value>(&body)
                .map(|value| Sanitizer::sanitize_json(&value))
                .unwrap_or(serde_json::Value::Null);
            logger.record(RecordedEvent::now(
                &correlation_id,
                EventType::WebhookReceived,
                Direction::Request,
                "webhook",
                json!({
                    "headers": Sanitizer::sanitize_header_map(&headers),
                    "body": payload,
                }),
            ));
        }
    }

    let span = info_span!("delivery", correlation_id = %correlation_id);
    let result = state
        .pipeline
        .handle_delivery(&body, signature, Some(correlation_id))
        .instrument(span)
        .await;

    match result {
        Ok(status) => {
            info!("Webhook handled: {}", status);
            (
                status_code_for(status),
                Json(WebhookResponse {
                    status: status.as_str().to_string(),
                }),
            )
        }
        Err(e) => {
            error!("Webhook processing failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookResponse {
                    status: "error".to_string(),
                }),
            )
        }
    }
}
