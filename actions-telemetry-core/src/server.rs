//! HTTP webhook endpoint
//!
//! - `GET /health` → `{"status": "healthy"}`
//! - `POST /webhook` → 401 bad signature, 400 unparsable JSON, 200 ignored
//!   event type, 202 accepted, 500 processing (or enqueue) failed

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::events::EventEnvelope;
use crate::processor::EventProcessor;
use crate::queue::{self, MessageQueue};
use crate::signature::{self, SIGNATURE_HEADER};

pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

/// GitHub caps webhook payloads at 25 MB
pub const MAX_PAYLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    secret: Arc<str>,
    processor: EventProcessor,
    /// When set, recognised events are enqueued instead of processed inline
    queue: Option<Arc<dyn MessageQueue>>,
}

impl AppState {
    pub fn new(secret: impl Into<String>, processor: EventProcessor) -> Self {
        Self {
            secret: Arc::from(secret.into()),
            processor,
            queue: None,
        }
    }

    pub fn with_queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("Failed to read listener address")?;
    info!("Webhook server listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Webhook server failed")
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"detail": message}))).into_response()
}

async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let delivery_id = header(&headers, DELIVERY_HEADER).unwrap_or("unknown").to_string();
    let event_type = header(&headers, EVENT_HEADER).unwrap_or("unknown").to_string();

    if state.secret.is_empty() {
        debug!(target: "security", delivery_id = %delivery_id, "Signature check skipped, no secret configured");
    }
    if !signature::verify(&body, header(&headers, SIGNATURE_HEADER), &state.secret) {
        warn!(target: "security", delivery_id = %delivery_id, "Invalid webhook signature");
        return detail(StatusCode::UNAUTHORIZED, "Invalid signature");
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!(delivery_id = %delivery_id, error = %e, "Failed to parse webhook payload");
            return detail(StatusCode::BAD_REQUEST, "Invalid JSON payload");
        }
    };

    let action = payload
        .get("action")
        .and_then(|v| v.as_str())
        .unwrap_or("N/A");
    info!(
        event_type = %event_type,
        delivery_id = %delivery_id,
        action,
        "Received webhook"
    );

    let envelope = EventEnvelope::new(event_type, delivery_id, payload);
    if !envelope.kind().is_handled() {
        debug!(event_type = %envelope.event_type, "Ignoring event type");
        return (
            StatusCode::OK,
            Json(json!({"message": "Event type not processed", "event": envelope.event_type})),
        )
            .into_response();
    }

    if let Some(queue) = &state.queue {
        if let Err(e) = queue::enqueue(queue.as_ref(), &envelope).await {
            error!(delivery_id = %envelope.delivery_id, error = %format!("{e:#}"), "Failed to enqueue event");
            return detail(StatusCode::INTERNAL_SERVER_ERROR, "Failed to queue event");
        }
        return accepted("Event received and queued", &envelope);
    }

    let outcome = state.processor.process(&envelope).await;
    if !outcome.is_success() {
        return detail(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process event");
    }
    accepted("Event received and processed", &envelope)
}

fn accepted(message: &str, envelope: &EventEnvelope) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "message": message,
            "event": envelope.event_type,
            "delivery": envelope.delivery_id,
        })),
    )
        .into_response()
}
