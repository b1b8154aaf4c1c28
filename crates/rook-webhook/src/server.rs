use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rook_github::RepoRef;
use rook_workflow::{DispatchError, IssueAgent, IssueLocks, WorkflowDispatcher, WorkflowEvent};
use serde_json::json;
use tokio::net::TcpListener;

use crate::events::{classify_delivery, WebhookDelivery};
use crate::signature::verify_github_sha256_signature;

pub const WEBHOOK_ENDPOINT: &str = "/webhook";
pub const HEALTH_ENDPOINT: &str = "/health";
const EVENT_HEADER: &str = "x-github-event";
const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Receiver for accepted workflow events.
pub trait EventSink: Send + Sync {
    fn submit(&self, event: WorkflowEvent) -> Result<(), DispatchError>;
}

impl EventSink for WorkflowDispatcher {
    fn submit(&self, event: WorkflowEvent) -> Result<(), DispatchError> {
        WorkflowDispatcher::submit(self, event)
    }
}

#[derive(Debug, Clone)]
/// Public struct `WebhookServerConfig` used across Rook components.
pub struct WebhookServerConfig {
    pub bind: String,
    pub secret: Option<String>,
    pub workers: usize,
    pub queue_capacity: usize,
    /// When non-empty, deliveries for other repositories are ignored.
    pub repositories: Vec<RepoRef>,
}

struct WebhookState {
    sink: Arc<dyn EventSink>,
    identity: String,
    secret: Option<String>,
    repositories: Vec<RepoRef>,
}

/// Serves `/webhook` and `/health` until Ctrl-C, then drains the worker pool.
pub async fn run_webhook_server(
    config: WebhookServerConfig,
    agent: Arc<IssueAgent>,
    locks: IssueLocks,
) -> Result<()> {
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid webhook bind address '{}'", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind webhook server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound webhook server address")?;

    let secret = config.secret.filter(|secret| !secret.trim().is_empty());
    if secret.is_none() {
        tracing::warn!("no webhook secret configured; accepting unsigned deliveries");
    }
    let identity = agent.identity().to_string();
    let dispatcher = Arc::new(WorkflowDispatcher::spawn(
        agent,
        locks,
        config.workers,
        config.queue_capacity,
    ));
    let state = Arc::new(WebhookState {
        sink: dispatcher.clone(),
        identity,
        secret,
        repositories: config.repositories,
    });

    tracing::info!(
        addr = %local_addr,
        endpoint = WEBHOOK_ENDPOINT,
        workers = config.workers,
        queue_capacity = config.queue_capacity,
        "webhook server listening"
    );
    let serve_result = axum::serve(listener, build_webhook_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    match Arc::try_unwrap(dispatcher) {
        Ok(dispatcher) => dispatcher.shutdown().await,
        Err(_) => tracing::warn!("webhook dispatcher still shared at shutdown; skipping drain"),
    }
    serve_result.context("webhook server exited unexpectedly")?;
    tracing::info!("webhook server stopped");
    Ok(())
}

fn build_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(WEBHOOK_ENDPOINT, post(handle_webhook))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .with_state(state)
}

async fn handle_health() -> Response {
    (StatusCode::OK, Json(json!({"status": "healthy"}))).into_response()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"error": message.into()}))).into_response()
}

async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(event_name) = headers
        .get(EVENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
    else {
        return error_response(StatusCode::BAD_REQUEST, "missing X-GitHub-Event header");
    };

    if let Some(secret) = state.secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if let Err(error) = verify_github_sha256_signature(&body, signature, secret) {
            tracing::warn!(event = %event_name, error = %error, "rejected webhook delivery");
            return error_response(StatusCode::UNAUTHORIZED, "invalid signature");
        }
    }

    let delivery = match classify_delivery(&event_name, &body, &state.identity) {
        Ok(delivery) => delivery,
        Err(error) => {
            tracing::warn!(event = %event_name, error = %format!("{error:#}"), "malformed webhook payload");
            return error_response(StatusCode::BAD_REQUEST, format!("{error:#}"));
        }
    };

    let event = match delivery {
        WebhookDelivery::Ping => {
            return (StatusCode::OK, Json(json!({"message": "pong"}))).into_response();
        }
        WebhookDelivery::Ignored { reason } => {
            tracing::debug!(event = %event_name, reason = %reason, "webhook delivery ignored");
            return (
                StatusCode::OK,
                Json(json!({"message": "ignored", "reason": reason})),
            )
                .into_response();
        }
        WebhookDelivery::Dispatch(event) => event,
    };

    if !state.repositories.is_empty() && !state.repositories.contains(event.repo()) {
        let reason = format!("repository '{}' is not configured", event.repo());
        tracing::debug!(event = %event_name, reason = %reason, "webhook delivery ignored");
        return (
            StatusCode::OK,
            Json(json!({"message": "ignored", "reason": reason})),
        )
            .into_response();
    }

    let kind = event.kind();
    let repo = event.repo().to_string();
    match state.sink.submit(event) {
        Ok(()) => {
            tracing::info!(event = kind, repo = %repo, "webhook event queued");
            (StatusCode::OK, Json(json!({"message": "accepted"}))).into_response()
        }
        Err(error) => {
            tracing::warn!(event = kind, repo = %repo, error = %error, "webhook event dropped");
            error_response(StatusCode::SERVICE_UNAVAILABLE, error.to_string())
        }
    }
}
