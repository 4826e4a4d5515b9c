//! HTTP server for GitHub webhooks.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::dispatch::Dispatcher;
use crate::events::adapter::normalize_webhook;
use crate::pipeline::TriagePipeline;

type HmacSha256 = Hmac<Sha256>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Triage pipeline, shared with the scheduled scan loop.
    pub pipeline: Arc<TriagePipeline>,
    /// Per-group run dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// Webhook signing secret; deliveries are rejected when set and the
    /// signature does not verify.
    pub webhook_secret: Option<String>,
}

/// Build the HTTP router for the triage service.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/github", post(github_webhook_handler))
        // Health check
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(state)
}

/// Verify a GitHub webhook signature (`X-Hub-Signature-256`) using
/// HMAC-SHA256.
#[must_use]
pub fn verify_webhook_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    // Header format is "sha256=<hex digest>"
    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(signature_bytes) = hex::decode(hex_digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    // Constant-time comparison to prevent timing attacks
    computed.as_slice().ct_eq(&signature_bytes).into()
}

/// Handle a GitHub webhook delivery.
///
/// Each target gets its own concurrency group, so label mutations against
/// one issue/PR serialize while unrelated targets triage in parallel.
async fn github_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    let event_type = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let delivery_id = headers
        .get("X-GitHub-Delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    info!(
        event_type = %event_type,
        delivery_id = %delivery_id,
        "Received GitHub webhook"
    );

    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !verify_webhook_signature(&body, signature, secret) {
            warn!(delivery_id = %delivery_id, "Webhook signature verification failed");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    let Some(event) = normalize_webhook(event_type, &body) else {
        return Ok(Json(json!({
            "status": "ignored",
            "reason": "not_a_label_event"
        })));
    };

    let group = event.target.group();
    let pipeline = Arc::clone(&state.pipeline);
    let token = state
        .dispatcher
        .dispatch(&group, async move {
            pipeline.run(&event).await;
        })
        .await;

    Ok(Json(json!({
        "status": "accepted",
        "group": token.group(),
        "run_id": token.run_id()
    })))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "triage",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check() -> Json<Value> {
    Json(json!({
        "status": "ready",
        "service": "triage",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
